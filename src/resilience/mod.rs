//! Retry classification and backoff for everything that talks to the server.
//!
//! - [`RequestError`] is the shared error taxonomy (network, timeout, 429, 5xx, 4xx)
//! - [`RetryPolicy`] turns an error and an attempt count into a delay
//! - [`UserMessage`] maps an error onto a fixed set of human-readable messages
//!
//! The reconnect loop in [`crate::realtime`] reuses [`RetryPolicy::backoff_delay`]
//! so ordinary requests and channel reconnects pace themselves the same way.

mod error;
mod policy;

pub use error::{parse_retry_after, ErrorCategory, RequestError, UserMessage};
pub use policy::{RetryDecision, RetryPolicy};
