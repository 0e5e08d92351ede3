//! Long-poll session state machine.
//!
//! A session acquires server info once, then keeps polling the long-poll
//! server while tracking the `ts` cursor. Failure codes 1, 2 and 3 are
//! absorbed by refreshing the cursor and/or key and polling again; any other
//! code ends the session with a [`LongpollError`].

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::fmt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EndpointKind;
use crate::error::{LongpollError, Result, VkError};
use crate::method::MethodInvoker;
use crate::stream::EventStream;
use crate::transport::Params;

/// A single long-poll update. Contents are passed through untouched.
pub type Event = Value;

/// Position in the server's event history (`ts`).
///
/// Group long-poll sends it as a string, user long-poll as a number; either
/// way it is echoed back exactly as received.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Cursor {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(serde_json::Number),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => Cursor(n.to_string()),
            Raw::Text(s) => Cursor(s),
        })
    }
}

/// Failure codes the session recovers from on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableFailure {
    /// Code 1: adopt the returned `ts` and poll again
    HistoryOutdated,
    /// Code 2: fetch a new key, keep the cursor
    KeyExpired,
    /// Code 3: fetch a new key and cursor
    SessionLost,
}

impl RecoverableFailure {
    pub fn code(self) -> i64 {
        match self {
            RecoverableFailure::HistoryOutdated => 1,
            RecoverableFailure::KeyExpired => 2,
            RecoverableFailure::SessionLost => 3,
        }
    }

    fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(RecoverableFailure::HistoryOutdated),
            2 => Some(RecoverableFailure::KeyExpired),
            3 => Some(RecoverableFailure::SessionLost),
            _ => None,
        }
    }
}

/// Description of a long-poll failure code.
///
/// `method` is the server-info method of the session's endpoint kind.
pub fn describe_failure(code: i64, method: &str) -> String {
    match code {
        1 => "Events history is outdated or partially lost, app can get further \
              events using new ts value from server response."
            .to_string(),
        2 => format!("Key is outdated, you need to get new key using method {}.", method),
        3 => format!(
            "Information about user is lost, you need to request new key and ts using method {}.",
            method
        ),
        4 => "Invalid version number passed in 'version' parameter.".to_string(),
        _ => "Unknown longpoll error.".to_string(),
    }
}

/// Decoded long-poll response.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    /// `{"ts": .., "updates": [..]}`; `cursor` is absent if the server omitted `ts`
    Success {
        cursor: Option<Cursor>,
        events: Vec<Event>,
    },
    /// `{"failed": 1|2|3, "ts"?: ..}`
    Recoverable {
        failure: RecoverableFailure,
        ts: Option<Cursor>,
    },
    /// Any other `failed` code
    Fatal { code: i64, message: String },
}

#[derive(Deserialize)]
struct PollWire {
    failed: Option<i64>,
    ts: Option<Cursor>,
    updates: Option<Vec<Value>>,
}

impl PollResult {
    /// Classify a long-poll response body.
    pub fn from_json(body: Value, method: &str) -> Result<Self> {
        let wire: PollWire = serde_json::from_value(body)
            .map_err(|e| VkError::InvalidResponse(format!("long-poll response: {}", e)))?;

        if let Some(code) = wire.failed {
            return Ok(match RecoverableFailure::from_code(code) {
                Some(failure) => PollResult::Recoverable {
                    failure,
                    ts: wire.ts,
                },
                None => PollResult::Fatal {
                    code,
                    message: describe_failure(code, method),
                },
            });
        }

        match wire.updates {
            Some(events) => Ok(PollResult::Success {
                cursor: wire.ts,
                events,
            }),
            None => Err(VkError::InvalidResponse(
                "long-poll response has neither `failed` nor `updates`".to_string(),
            )),
        }
    }
}

/// Fields of a server-info response.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerInfo {
    pub key: String,
    pub server: String,
    pub ts: Cursor,
}

async fn fetch_server_info(invoker: &MethodInvoker, kind: EndpointKind) -> Result<ServerInfo> {
    let method = kind.server_info_method();
    let params = match kind {
        EndpointKind::Group { group_id } => Params::new().with("group_id", group_id),
        EndpointKind::User { .. } => Params::new(),
    };

    let value = invoker.call(method, params).await?;
    serde_json::from_value(value)
        .map_err(|e| VkError::InvalidResponse(format!("{} response: {}", method, e)))
}

async fn acquire_endpoint(invoker: &MethodInvoker) -> Result<LongpollEndpoint> {
    let kind = invoker.config().endpoint_kind();
    let info = fetch_server_info(invoker, kind).await?;
    let endpoint = LongpollEndpoint::new(kind, info, invoker.config().wait);

    info!(
        method = kind.server_info_method(),
        server = %endpoint.server,
        ts = %endpoint.ts,
        "Long-poll session prepared"
    );
    Ok(endpoint)
}

/// Resolved long-poll endpoint and the state carried between polls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongpollEndpoint {
    kind: EndpointKind,
    server: String,
    key: String,
    ts: Cursor,
    wait: u64,
}

impl LongpollEndpoint {
    fn new(kind: EndpointKind, info: ServerInfo, wait: u64) -> Self {
        Self {
            kind,
            server: kind.server_address(&info.server),
            key: info.key,
            ts: info.ts,
            wait,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Address polls are sent to.
    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn cursor(&self) -> &Cursor {
        &self.ts
    }

    /// Query parameters for the next poll request.
    pub fn poll_params(&self) -> Params {
        let params = Params::new()
            .with("act", "a_check")
            .with("key", &self.key)
            .with("ts", &self.ts)
            .with("wait", self.wait);

        match self.kind {
            EndpointKind::Group { .. } => params,
            EndpointKind::User { mode, version } => {
                params.with("mode", mode).with("version", version)
            }
        }
    }
}

/// Preparation state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Prepared(LongpollEndpoint),
}

/// One long-poll session.
///
/// Created empty; the first [`poll`](Self::poll) (or an explicit
/// [`prepare`](Self::prepare)) acquires server info. After that the endpoint
/// kind never changes and only the key and cursor are updated.
#[derive(Debug)]
pub struct LongpollSession {
    invoker: MethodInvoker,
    state: SessionState,
    cancel: Option<CancellationToken>,
}

impl LongpollSession {
    /// Create an unprepared session.
    pub fn new(invoker: MethodInvoker) -> Self {
        Self {
            invoker,
            state: SessionState::Uninitialized,
            cancel: None,
        }
    }

    /// Stop issuing requests once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn invoker(&self) -> &MethodInvoker {
        &self.invoker
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_prepared(&self) -> bool {
        matches!(self.state, SessionState::Prepared(_))
    }

    /// Current endpoint, once prepared.
    pub fn endpoint(&self) -> Option<&LongpollEndpoint> {
        match &self.state {
            SessionState::Prepared(endpoint) => Some(endpoint),
            SessionState::Uninitialized => None,
        }
    }

    /// Acquire server info and build the endpoint.
    ///
    /// Does nothing if the session is already prepared.
    pub async fn prepare(&mut self) -> Result<()> {
        if self.is_prepared() {
            debug!("Long-poll session already prepared");
            return Ok(());
        }
        check_cancelled(self.cancel.as_ref())?;

        self.state = SessionState::Prepared(acquire_endpoint(&self.invoker).await?);
        Ok(())
    }

    /// Fetch the next batch of events.
    ///
    /// Prepares the session on first use. May issue several requests:
    /// failure codes 1-3 are handled here and polling continues until the
    /// server returns updates or a fatal code.
    pub async fn poll(&mut self) -> Result<Vec<Event>> {
        let Self {
            invoker,
            state,
            cancel,
        } = self;

        loop {
            check_cancelled(cancel.as_ref())?;
            let endpoint = match state {
                SessionState::Prepared(endpoint) => endpoint,
                SessionState::Uninitialized => {
                    *state = SessionState::Prepared(acquire_endpoint(invoker).await?);
                    continue;
                }
            };
            let method = endpoint.kind.server_info_method();
            debug!(ts = %endpoint.ts, "Polling long-poll server");

            let body = invoker
                .transport()
                .get(&endpoint.server, &endpoint.poll_params())
                .await?;

            match PollResult::from_json(body, method)? {
                PollResult::Success { cursor, events } => {
                    if let Some(cursor) = cursor {
                        endpoint.ts = cursor;
                    }
                    debug!(count = events.len(), ts = %endpoint.ts, "Received updates");
                    return Ok(events);
                }
                PollResult::Recoverable { failure, ts } => {
                    debug!(
                        code = failure.code(),
                        reason = %describe_failure(failure.code(), method),
                        "Recovering long-poll session"
                    );
                    match failure {
                        RecoverableFailure::HistoryOutdated => {
                            endpoint.ts = ts.ok_or_else(|| {
                                VkError::InvalidResponse(
                                    "long-poll failure 1 without `ts`".to_string(),
                                )
                            })?;
                        }
                        RecoverableFailure::KeyExpired => {
                            check_cancelled(cancel.as_ref())?;
                            let info = fetch_server_info(invoker, endpoint.kind).await?;
                            endpoint.key = info.key;
                        }
                        RecoverableFailure::SessionLost => {
                            check_cancelled(cancel.as_ref())?;
                            let info = fetch_server_info(invoker, endpoint.kind).await?;
                            endpoint.key = info.key;
                            endpoint.ts = info.ts;
                        }
                    }
                }
                PollResult::Fatal { code, message } => {
                    warn!(code, %message, "Long-poll failed");
                    return Err(LongpollError { code, message }.into());
                }
            }
        }
    }

    /// Turn this session into an endless event stream.
    pub fn into_stream(self) -> EventStream {
        EventStream::new(self)
    }
}

fn check_cancelled(token: Option<&CancellationToken>) -> Result<()> {
    match token {
        Some(token) if token.is_cancelled() => Err(VkError::Cancelled),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, GROUPS_LONGPOLL_METHOD, USERS_LONGPOLL_METHOD};
    use crate::transport::{HttpVerb, MockReply, MockTransport};
    use serde_json::json;
    use std::sync::Arc;

    fn group_session(mock: &Arc<MockTransport>) -> LongpollSession {
        let config = SessionConfig::new("token").with_group_id(42).with_wait(25);
        LongpollSession::new(MethodInvoker::new(Arc::new(config), mock.clone()))
    }

    fn user_session(mock: &Arc<MockTransport>) -> LongpollSession {
        let config = SessionConfig::new("token").with_user_flags(2, 3);
        LongpollSession::new(MethodInvoker::new(Arc::new(config), mock.clone()))
    }

    fn server_info(key: &str, ts: &str) -> Value {
        json!({"response": {"key": key, "server": "https://lp.vk.com/wh42", "ts": ts}})
    }

    #[tokio::test]
    async fn test_prepare_group_endpoint() {
        let mock = Arc::new(MockTransport::new().with_post(server_info("k1", "100")));
        let mut session = group_session(&mock);
        assert!(!session.is_prepared());

        session.prepare().await.unwrap();

        let posts = mock.requests_with(HttpVerb::Post);
        assert_eq!(posts.len(), 1);
        assert!(posts[0].url.ends_with(GROUPS_LONGPOLL_METHOD));
        assert_eq!(posts[0].params.get("group_id"), Some("42"));

        let endpoint = session.endpoint().unwrap();
        assert_eq!(endpoint.server(), "https://lp.vk.com/wh42");
        assert_eq!(endpoint.key(), "k1");
        assert_eq!(endpoint.cursor().as_str(), "100");

        let params = endpoint.poll_params();
        assert_eq!(params.get("act"), Some("a_check"));
        assert_eq!(params.get("wait"), Some("25"));
        assert!(!params.contains("mode"));
        assert!(!params.contains("version"));
    }

    #[tokio::test]
    async fn test_prepare_user_endpoint() {
        let mock = Arc::new(MockTransport::new().with_post(json!({
            "response": {"key": "uk", "server": "im.vk.com/nim7", "ts": 1874}
        })));
        let mut session = user_session(&mock);

        session.prepare().await.unwrap();

        let posts = mock.requests_with(HttpVerb::Post);
        assert!(posts[0].url.ends_with(USERS_LONGPOLL_METHOD));
        assert!(!posts[0].params.contains("group_id"));

        let endpoint = session.endpoint().unwrap();
        assert_eq!(endpoint.server(), "https://im.vk.com/nim7");
        assert_eq!(endpoint.cursor().as_str(), "1874");

        let params = endpoint.poll_params();
        assert_eq!(params.get("mode"), Some("2"));
        assert_eq!(params.get("version"), Some("3"));
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let mock = Arc::new(MockTransport::new().with_post(server_info("k1", "1")));
        let mut session = group_session(&mock);

        session.prepare().await.unwrap();
        session.prepare().await.unwrap();
        assert_eq!(mock.count(HttpVerb::Post), 1);
    }

    #[tokio::test]
    async fn test_poll_success_stores_cursor() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_get(json!({"ts": "11", "updates": [{"type": "message_new"}]}))
                .with_get(json!({"ts": "12", "updates": []})),
        );
        let mut session = group_session(&mock);

        let events = session.poll().await.unwrap();
        assert_eq!(events, vec![json!({"type": "message_new"})]);
        assert_eq!(session.endpoint().unwrap().cursor().as_str(), "11");

        let events = session.poll().await.unwrap();
        assert!(events.is_empty());
        assert_eq!(session.endpoint().unwrap().cursor().as_str(), "12");

        let gets = mock.requests_with(HttpVerb::Get);
        assert_eq!(gets[0].url, "https://lp.vk.com/wh42");
        assert_eq!(gets[0].params.get("ts"), Some("10"));
        assert_eq!(gets[1].params.get("ts"), Some("11"));
        assert_eq!(mock.count(HttpVerb::Post), 1);
    }

    #[tokio::test]
    async fn test_failed_1_adopts_returned_cursor() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_get(json!({"failed": 1, "ts": "30"}))
                .with_get(json!({"ts": "31", "updates": [1]})),
        );
        let mut session = group_session(&mock);

        let events = session.poll().await.unwrap();
        assert_eq!(events, vec![json!(1)]);

        let gets = mock.requests_with(HttpVerb::Get);
        assert_eq!(gets.len(), 2);
        assert_eq!(gets[1].params.get("ts"), Some("30"));
        assert_eq!(gets[1].params.get("key"), Some("k1"));
        assert_eq!(mock.count(HttpVerb::Post), 1);
    }

    #[tokio::test]
    async fn test_success_without_ts_keeps_cursor() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_get(json!({"updates": [1]}))
                .with_get(json!({"ts": "11", "updates": []})),
        );
        let mut session = group_session(&mock);

        let events = session.poll().await.unwrap();
        assert_eq!(events, vec![json!(1)]);
        assert_eq!(session.endpoint().unwrap().cursor().as_str(), "10");

        session.poll().await.unwrap();
        let gets = mock.requests_with(HttpVerb::Get);
        assert_eq!(gets.len(), 2);
        assert_eq!(gets[1].params.get("ts"), Some("10"));
    }

    #[tokio::test]
    async fn test_failed_1_without_ts_is_invalid() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_get(json!({"failed": 1}))
                .with_get(json!({"ts": "11", "updates": []})),
        );
        let mut session = group_session(&mock);

        let err = session.poll().await.unwrap_err();
        assert!(matches!(err, VkError::InvalidResponse(_)));

        let endpoint = session.endpoint().unwrap();
        assert_eq!(endpoint.cursor().as_str(), "10");
        assert_eq!(endpoint.key(), "k1");
        assert_eq!(mock.count(HttpVerb::Get), 1);
        assert_eq!(mock.count(HttpVerb::Post), 1);
    }

    #[tokio::test]
    async fn test_poll_prepares_on_first_use() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_get(json!({"ts": "11", "updates": []})),
        );
        let mut session = group_session(&mock);
        assert_eq!(session.state(), &SessionState::Uninitialized);

        session.poll().await.unwrap();
        assert!(session.is_prepared());

        session.prepare().await.unwrap();
        assert_eq!(mock.count(HttpVerb::Post), 1);
        let requests = mock.requests();
        assert_eq!(requests[0].verb, HttpVerb::Post);
        assert_eq!(requests[1].verb, HttpVerb::Get);
    }

    #[tokio::test]
    async fn test_failed_2_renews_key_only() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_post(server_info("k2", "99"))
                .with_get(json!({"failed": 2}))
                .with_get(json!({"ts": "11", "updates": []})),
        );
        let mut session = group_session(&mock);

        session.poll().await.unwrap();

        let posts = mock.requests_with(HttpVerb::Post);
        assert_eq!(posts.len(), 2);
        assert!(posts[1].url.ends_with(GROUPS_LONGPOLL_METHOD));

        let gets = mock.requests_with(HttpVerb::Get);
        assert_eq!(gets.len(), 2);
        assert_eq!(gets[1].params.get("key"), Some("k2"));
        assert_eq!(gets[1].params.get("ts"), Some("10"));
        assert!(session.is_prepared());
    }

    #[tokio::test]
    async fn test_failed_3_renews_key_and_cursor() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_post(server_info("k3", "500"))
                .with_get(json!({"failed": 3}))
                .with_get(json!({"ts": "501", "updates": []})),
        );
        let mut session = group_session(&mock);

        session.poll().await.unwrap();

        let gets = mock.requests_with(HttpVerb::Get);
        assert_eq!(gets[1].params.get("key"), Some("k3"));
        assert_eq!(gets[1].params.get("ts"), Some("500"));
        assert_eq!(session.endpoint().unwrap().cursor().as_str(), "501");
        assert_eq!(mock.count(HttpVerb::Post), 2);
    }

    #[tokio::test]
    async fn test_failed_4_is_fatal() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_get(json!({"failed": 4}))
                .with_get(json!({"ts": "11", "updates": []})),
        );
        let mut session = user_session(&mock);

        let err = session.poll().await.unwrap_err();
        match err {
            VkError::Longpoll(e) => {
                assert_eq!(e.code, 4);
                assert_eq!(
                    e.message,
                    "Invalid version number passed in 'version' parameter."
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(mock.count(HttpVerb::Get), 1);
        assert_eq!(mock.count(HttpVerb::Post), 1);
    }

    #[tokio::test]
    async fn test_unknown_code_is_fatal() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_get(json!({"failed": 9})),
        );
        let mut session = group_session(&mock);

        let err = session.poll().await.unwrap_err();
        assert_eq!(err.longpoll_code(), Some(9));
        assert_eq!(
            err.to_string(),
            "Error in longpoll with code 9: Unknown longpoll error."
        );
        assert_eq!(mock.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_method_error_during_recovery_is_fatal() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_post(json!({"error": {"error_code": 5, "error_msg": "User authorization failed"}}))
                .with_get(json!({"failed": 2})),
        );
        let mut session = group_session(&mock);

        let err = session.poll().await.unwrap_err();
        assert_eq!(err.method_code(), Some(5));
        assert_eq!(mock.count(HttpVerb::Get), 1);
        assert_eq!(session.endpoint().unwrap().key(), "k1");
    }

    #[tokio::test]
    async fn test_transport_error_during_poll() {
        let mock = Arc::new(
            MockTransport::new()
                .with_post(server_info("k1", "10"))
                .with_reply(HttpVerb::Get, MockReply::Status(503, "unavailable".to_string())),
        );
        let mut session = group_session(&mock);

        let err = session.poll().await.unwrap_err();
        assert!(matches!(err, VkError::Server { status: 503, .. }));
        assert_eq!(session.endpoint().unwrap().cursor().as_str(), "10");
    }

    #[tokio::test]
    async fn test_cancelled_session_issues_nothing() {
        let mock = Arc::new(MockTransport::new().with_post(server_info("k1", "10")));
        let token = CancellationToken::new();
        let mut session = group_session(&mock).with_cancellation(token.clone());

        token.cancel();
        assert!(matches!(session.poll().await, Err(VkError::Cancelled)));
        assert!(mock.requests().is_empty());
    }

    #[test]
    fn test_poll_result_classification() {
        let method = GROUPS_LONGPOLL_METHOD;

        assert_eq!(
            PollResult::from_json(json!({"ts": 5, "updates": []}), method).unwrap(),
            PollResult::Success {
                cursor: Some(Cursor::new("5")),
                events: vec![]
            }
        );
        assert_eq!(
            PollResult::from_json(json!({"updates": [1]}), method).unwrap(),
            PollResult::Success {
                cursor: None,
                events: vec![json!(1)]
            }
        );
        assert_eq!(
            PollResult::from_json(json!({"failed": 1, "ts": "7"}), method).unwrap(),
            PollResult::Recoverable {
                failure: RecoverableFailure::HistoryOutdated,
                ts: Some(Cursor::new("7"))
            }
        );
        assert_eq!(
            PollResult::from_json(json!({"failed": 4}), method).unwrap(),
            PollResult::Fatal {
                code: 4,
                message: describe_failure(4, method)
            }
        );
        assert!(PollResult::from_json(json!({"ts": "1"}), method).is_err());
    }

    #[test]
    fn test_failure_descriptions_name_method() {
        assert_eq!(
            describe_failure(2, GROUPS_LONGPOLL_METHOD),
            "Key is outdated, you need to get new key using method groups.getLongPollServer."
        );
        assert_eq!(
            describe_failure(3, USERS_LONGPOLL_METHOD),
            "Information about user is lost, you need to request new key and ts \
             using method messages.getLongPollServer."
        );
        assert_eq!(
            describe_failure(1, USERS_LONGPOLL_METHOD),
            "Events history is outdated or partially lost, app can get further events \
             using new ts value from server response."
        );
    }
}
