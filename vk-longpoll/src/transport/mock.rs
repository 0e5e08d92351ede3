//! Scripted transport for testing.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use super::traits::{HttpTransport, HttpVerb, Params};
use crate::error::{Result, VkError};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Respond with this JSON body
    Json(Value),
    /// Fail as if the server answered with a non-success status
    Status(u16, String),
    /// Never complete
    Pending,
}

/// A request seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub verb: HttpVerb,
    pub url: String,
    pub params: Params,
}

/// Mock transport for testing.
///
/// POST and GET replies are queued separately and consumed in order.
/// Every request is recorded, including ones that fail or never complete.
#[derive(Debug, Default)]
pub struct MockTransport {
    post_replies: Mutex<VecDeque<MockReply>>,
    get_replies: Mutex<VecDeque<MockReply>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MockTransport {
    /// Create a mock with nothing scripted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a JSON reply for the next POST.
    pub fn with_post(self, body: Value) -> Self {
        self.push(HttpVerb::Post, MockReply::Json(body));
        self
    }

    /// Queue a JSON reply for the next GET.
    pub fn with_get(self, body: Value) -> Self {
        self.push(HttpVerb::Get, MockReply::Json(body));
        self
    }

    /// Queue an arbitrary reply.
    pub fn with_reply(self, verb: HttpVerb, reply: MockReply) -> Self {
        self.push(verb, reply);
        self
    }

    /// Queue a reply on an existing mock.
    pub fn push(&self, verb: HttpVerb, reply: MockReply) {
        let queue = match verb {
            HttpVerb::Get => &self.get_replies,
            HttpVerb::Post => &self.post_replies,
        };
        lock(queue).push_back(reply);
    }

    /// All requests seen so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.requests).clone()
    }

    /// Requests seen with the given verb.
    pub fn requests_with(&self, verb: HttpVerb) -> Vec<RecordedRequest> {
        lock(&self.requests)
            .iter()
            .filter(|r| r.verb == verb)
            .cloned()
            .collect()
    }

    /// Number of requests seen with the given verb.
    pub fn count(&self, verb: HttpVerb) -> usize {
        lock(&self.requests).iter().filter(|r| r.verb == verb).count()
    }

    async fn reply(&self, verb: HttpVerb, url: &str, params: &Params) -> Result<Value> {
        lock(&self.requests).push(RecordedRequest {
            verb,
            url: url.to_string(),
            params: params.clone(),
        });

        let queue = match verb {
            HttpVerb::Get => &self.get_replies,
            HttpVerb::Post => &self.post_replies,
        };
        let next = lock(queue).pop_front();

        match next {
            Some(MockReply::Json(body)) => Ok(body),
            Some(MockReply::Status(status, message)) => Err(VkError::Server { status, message }),
            Some(MockReply::Pending) => futures::future::pending().await,
            None => Err(VkError::InvalidResponse(format!(
                "no scripted {:?} reply for {}",
                verb, url
            ))),
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn post_form(&self, url: &str, params: &Params) -> Result<Value> {
        self.reply(HttpVerb::Post, url, params).await
    }

    async fn get(&self, url: &str, params: &Params) -> Result<Value> {
        self.reply(HttpVerb::Get, url, params).await
    }
}
