//! High-level VK client

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::longpoll::LongpollSession;
use crate::method::MethodInvoker;
use crate::stream::EventStream;
use crate::transport::{HttpTransport, HttpVerb, Params, ReqwestTransport};

/// VK API client: method calls plus one long-poll event stream.
///
/// # Example
///
/// ```rust,no_run
/// use vk_longpoll::{Params, SessionConfig, VkClient};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = VkClient::new(SessionConfig::new("token").with_group_id(1))?;
///
/// let users = client
///     .call("users.get", Params::new().with("user_ids", 1))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct VkClient {
    invoker: MethodInvoker,
}

impl VkClient {
    /// Create a client over the network.
    ///
    /// The HTTP timeout is raised above the long-poll wait if needed.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let transport = ReqwestTransport::for_config(&config)?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a client over a custom transport.
    pub fn with_transport(config: SessionConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            invoker: MethodInvoker::new(Arc::new(config), transport),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        self.invoker.config()
    }

    /// Method invoker shared by this client.
    pub fn invoker(&self) -> &MethodInvoker {
        &self.invoker
    }

    /// Call an API method with a POST request.
    pub async fn call(&self, method_name: &str, params: Params) -> Result<Value> {
        self.invoker.call(method_name, params).await
    }

    /// Call an API method with the given verb.
    pub async fn call_with(&self, method_name: &str, params: Params, verb: HttpVerb) -> Result<Value> {
        self.invoker.call_with(method_name, params, verb).await
    }

    /// New, unprepared long-poll session.
    pub fn session(&self) -> LongpollSession {
        LongpollSession::new(self.invoker.clone())
    }

    /// Stream events from a fresh long-poll session.
    pub fn listen(&self) -> EventStream {
        EventStream::new(self.session())
    }

    /// Stream events until `cancel` is cancelled.
    pub fn listen_until(&self, cancel: CancellationToken) -> EventStream {
        EventStream::with_cancellation(self.session(), cancel)
    }
}
