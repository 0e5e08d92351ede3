//! Error types for the VK client

use thiserror::Error;

/// An RPC call came back with an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error in method {method_name} with code {code}: {message}")]
pub struct MethodError {
    /// Name of the method that failed (e.g. `groups.getLongPollServer`)
    pub method_name: String,
    /// Numeric `error_code` from the envelope
    pub code: i64,
    /// Human-readable `error_msg` from the envelope
    pub message: String,
}

/// The long-poll server answered with a failure code the session cannot absorb.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error in longpoll with code {code}: {message}")]
pub struct LongpollError {
    /// Value of the `failed` field
    pub code: i64,
    /// Description of the failure code
    pub message: String,
}

/// VK client error
#[derive(Debug, Error)]
pub enum VkError {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Server returned a non-success HTTP status
    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    /// Response body had neither of the expected shapes
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// API method returned an error envelope
    #[error(transparent)]
    Method(#[from] MethodError),

    /// Long-poll server returned a fatal failure code
    #[error(transparent)]
    Longpoll(#[from] LongpollError),

    /// Cancellation was requested before the next outbound request
    #[error("Long-poll session cancelled")]
    Cancelled,
}

impl VkError {
    /// Method error code, if this is an API method failure.
    pub fn method_code(&self) -> Option<i64> {
        match self {
            VkError::Method(e) => Some(e.code),
            _ => None,
        }
    }

    /// Long-poll failure code, if this is a fatal long-poll failure.
    pub fn longpoll_code(&self) -> Option<i64> {
        match self {
            VkError::Longpoll(e) => Some(e.code),
            _ => None,
        }
    }
}

/// Result type for VK client operations
pub type Result<T> = std::result::Result<T, VkError>;
