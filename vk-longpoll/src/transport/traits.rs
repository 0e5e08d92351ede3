//! Core transport trait and request parameters.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;

use crate::error::Result;

/// HTTP verb used for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpVerb {
    Get,
    Post,
}

/// Request parameters, sent as a form body or a query string.
///
/// Values are stringified on insertion; later inserts overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Params(BTreeMap<String, String>);

impl Params {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter.
    pub fn with(mut self, key: impl Into<String>, value: impl Display) -> Self {
        self.insert(key, value);
        self
    }

    /// Insert or replace a parameter.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Display) {
        self.0.insert(key.into(), value.to_string());
    }

    /// Look up a parameter.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Whether a parameter is present.
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate parameters in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Display> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (key, value) in iter {
            params.insert(key, value);
        }
        params
    }
}

/// Minimal async HTTP client the VK client is built on.
///
/// Implementations own connection pooling, TLS and timeouts. Both methods
/// return the decoded JSON body of a successful response.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send a form-encoded POST request.
    async fn post_form(&self, url: &str, params: &Params) -> Result<Value>;

    /// Send a GET request with `params` as the query string.
    async fn get(&self, url: &str, params: &Params) -> Result<Value>;

    /// Send a request with the given verb.
    async fn send(&self, verb: HttpVerb, url: &str, params: &Params) -> Result<Value> {
        match verb {
            HttpVerb::Get => self.get(url, params).await,
            HttpVerb::Post => self.post_form(url, params).await,
        }
    }
}
