//! `reqwest`-backed transport.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;

use super::traits::{HttpTransport, Params};
use crate::config::SessionConfig;
use crate::error::{Result, VkError};

/// Production transport over a pooled `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// Create a transport whose timeout outlasts the configured long-poll wait.
    pub fn for_config(config: &SessionConfig) -> Result<Self> {
        Self::new(config.effective_timeout())
    }

    /// Wrap an already configured client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    async fn decode(response: Response) -> Result<Value> {
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(VkError::Server {
                status,
                message: body,
            });
        }

        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_form(&self, url: &str, params: &Params) -> Result<Value> {
        let response = self.client.post(url).form(params).send().await?;
        Self::decode(response).await
    }

    async fn get(&self, url: &str, params: &Params) -> Result<Value> {
        let response = self.client.get(url).query(params).send().await?;
        Self::decode(response).await
    }
}
