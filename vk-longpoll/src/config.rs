//! Session configuration

use serde::Deserialize;
use std::time::Duration;

/// Server-info method for group (community) long-poll.
pub const GROUPS_LONGPOLL_METHOD: &str = "groups.getLongPollServer";
/// Server-info method for user long-poll.
pub const USERS_LONGPOLL_METHOD: &str = "messages.getLongPollServer";

/// Seconds added to the long-poll wait when deriving the HTTP timeout.
const TIMEOUT_MARGIN_SECS: u64 = 10;

/// Client configuration
///
/// The presence of `group_id` decides which long-poll endpoint is used for
/// the whole lifetime of a session. `user_mode` and `user_version` are only
/// sent on user long-poll.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Access token (group or user)
    #[serde(default)]
    pub access_token: String,
    /// API version sent as `v` (default: "5.103")
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Community ID; absent for user long-poll
    #[serde(default)]
    pub group_id: Option<u64>,
    /// Server-side wait in seconds (default: 25)
    #[serde(default = "default_wait")]
    pub wait: u64,
    /// User long-poll `mode` flags (default: 2)
    #[serde(default = "default_user_mode")]
    pub user_mode: u32,
    /// User long-poll `version` (default: 3)
    #[serde(default = "default_user_version")]
    pub user_version: u32,
    /// Base URL of the method endpoint, without trailing slash
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// HTTP request timeout in seconds (default: 35)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_version() -> String { "5.103".to_string() }
fn default_wait() -> u64 { 25 }
fn default_user_mode() -> u32 { 2 }
fn default_user_version() -> u32 { 3 }
fn default_api_base_url() -> String { "https://api.vk.com/method".to_string() }
fn default_request_timeout() -> u64 { 35 }

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            api_version: default_api_version(),
            group_id: None,
            wait: default_wait(),
            user_mode: default_user_mode(),
            user_version: default_user_version(),
            api_base_url: default_api_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl SessionConfig {
    /// Create a config with the given access token and defaults elsewhere.
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            ..Default::default()
        }
    }

    /// Use group long-poll for this community.
    pub fn with_group_id(mut self, group_id: u64) -> Self {
        self.group_id = Some(group_id);
        self
    }

    /// Set API version.
    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Set server-side wait in seconds.
    pub fn with_wait(mut self, wait: u64) -> Self {
        self.wait = wait;
        self
    }

    /// Set user long-poll mode and version flags.
    pub fn with_user_flags(mut self, mode: u32, version: u32) -> Self {
        self.user_mode = mode;
        self.user_version = version;
        self
    }

    /// Point method calls at a different base URL.
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set HTTP request timeout in seconds.
    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    /// Which long-poll endpoint this config selects.
    pub fn endpoint_kind(&self) -> EndpointKind {
        match self.group_id {
            Some(group_id) => EndpointKind::Group { group_id },
            None => EndpointKind::User {
                mode: self.user_mode,
                version: self.user_version,
            },
        }
    }

    /// HTTP timeout that always outlasts the long-poll wait.
    pub fn effective_timeout(&self) -> Duration {
        let floor = self.wait.saturating_add(TIMEOUT_MARGIN_SECS);
        Duration::from_secs(self.request_timeout_secs.max(floor))
    }

    /// Full URL of an API method.
    pub fn method_url(&self, method_name: &str) -> String {
        format!("{}/{}", self.api_base_url, method_name)
    }
}

/// Long-poll endpoint kind, fixed once a session is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Community long-poll; `server` is used verbatim
    Group { group_id: u64 },
    /// User long-poll; `server` is a bare host and needs a scheme
    User { mode: u32, version: u32 },
}

impl EndpointKind {
    /// Method used to acquire server info for this kind.
    pub fn server_info_method(&self) -> &'static str {
        match self {
            EndpointKind::Group { .. } => GROUPS_LONGPOLL_METHOD,
            EndpointKind::User { .. } => USERS_LONGPOLL_METHOD,
        }
    }

    /// Turn the `server` field of a server-info response into a poll address.
    pub fn server_address(&self, server: &str) -> String {
        match self {
            EndpointKind::Group { .. } => server.to_string(),
            EndpointKind::User { .. } => format!("https://{}", server),
        }
    }
}
