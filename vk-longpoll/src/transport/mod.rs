//! HTTP transport abstraction.
//!
//! The session logic only needs two verbs: a form-encoded POST for API
//! methods and a GET with query parameters for the long-poll server.
//! - `ReqwestTransport` talks to the real network
//! - `MockTransport` replays scripted replies for tests

pub mod http;
pub mod mock;
pub mod traits;

pub use http::ReqwestTransport;
pub use mock::{MockReply, MockTransport, RecordedRequest};
pub use traits::{HttpTransport, HttpVerb, Params};
