//! Asynchronous VK API client with a self-healing long-poll event stream.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐   poll()    ┌─────────────────┐  call()  ┌────────────────┐
//! │ EventStream │ ──────────▶ │ LongpollSession │ ───────▶ │ MethodInvoker  │
//! └─────────────┘             └────────┬────────┘          └───────┬────────┘
//!                                      │ GET                       │ POST
//!                                      ▼                           ▼
//!                              ┌─────────────────────────────────────────┐
//!                              │              HttpTransport              │
//!                              └─────────────────────────────────────────┘
//! ```
//!
//! Long-poll failure codes 1-3 are handled inside the session and never
//! reach the stream consumer. Code 4 and unknown codes end the stream.
//!
//! # Example
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use vk_longpoll::{SessionConfig, VkClient};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = VkClient::new(SessionConfig::new("token").with_group_id(1))?;
//!
//! let mut events = client.listen();
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{}", event["type"]);
//! }
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod longpoll;
pub mod method;
pub mod stream;
pub mod transport;

// Re-export main types
pub use client::VkClient;
pub use config::{EndpointKind, SessionConfig, GROUPS_LONGPOLL_METHOD, USERS_LONGPOLL_METHOD};
pub use error::{LongpollError, MethodError, Result, VkError};
pub use longpoll::{
    describe_failure, Cursor, Event, LongpollEndpoint, LongpollSession, PollResult,
    RecoverableFailure, SessionState,
};
pub use method::{MethodInvoker, RpcResult};
pub use stream::EventStream;
pub use transport::{HttpTransport, HttpVerb, MockTransport, Params, ReqwestTransport};
