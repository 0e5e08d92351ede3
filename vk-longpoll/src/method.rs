//! API method invocation.

use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::{MethodError, Result, VkError};
use crate::transport::{HttpTransport, HttpVerb, Params};

/// Outcome of one API call, decoded from the response envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResult {
    /// `{"response": value}`
    Ok { value: Value },
    /// `{"error": {"error_code": code, "error_msg": message}}`
    Err { code: i64, message: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Err { error: ErrorBody },
    Ok { response: Value },
}

#[derive(Deserialize)]
struct ErrorBody {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

impl RpcResult {
    /// Decode a response body.
    pub fn from_json(body: Value) -> Result<Self> {
        let envelope: Envelope = serde_json::from_value(body).map_err(|_| {
            VkError::InvalidResponse("expected `response` or `error` field".to_string())
        })?;

        Ok(match envelope {
            Envelope::Ok { response } => RpcResult::Ok { value: response },
            Envelope::Err { error } => RpcResult::Err {
                code: error.error_code,
                message: error.error_msg,
            },
        })
    }

    /// Turn an error envelope into a `MethodError` for `method_name`.
    pub fn into_result(self, method_name: &str) -> Result<Value> {
        match self {
            RpcResult::Ok { value } => Ok(value),
            RpcResult::Err { code, message } => Err(MethodError {
                method_name: method_name.to_string(),
                code,
                message,
            }
            .into()),
        }
    }
}

/// Performs single API method calls.
///
/// Every call carries `access_token` and `v` from the config. There are no
/// retries here; any failure is returned to the caller as is.
#[derive(Clone)]
pub struct MethodInvoker {
    config: Arc<SessionConfig>,
    transport: Arc<dyn HttpTransport>,
}

impl MethodInvoker {
    /// Create an invoker over a transport.
    pub fn new(config: Arc<SessionConfig>, transport: Arc<dyn HttpTransport>) -> Self {
        Self { config, transport }
    }

    /// Configuration this invoker signs requests with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub(crate) fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    /// Call a method with a form-encoded POST.
    pub async fn call(&self, method_name: &str, params: Params) -> Result<Value> {
        self.call_with(method_name, params, HttpVerb::Post).await
    }

    /// Call a method with the given verb.
    pub async fn call_with(
        &self,
        method_name: &str,
        mut params: Params,
        verb: HttpVerb,
    ) -> Result<Value> {
        params.insert("access_token", &self.config.access_token);
        params.insert("v", &self.config.api_version);

        let url = self.config.method_url(method_name);
        debug!(method = method_name, ?verb, "Calling API method");

        let body = self.transport.send(verb, &url, &params).await?;
        RpcResult::from_json(body)?.into_result(method_name)
    }
}

impl std::fmt::Debug for MethodInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodInvoker")
            .field("api_base_url", &self.config.api_base_url)
            .field("api_version", &self.config.api_version)
            .finish_non_exhaustive()
    }
}
