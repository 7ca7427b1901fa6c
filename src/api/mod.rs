//! HTTP request layer. Consumes the shared [`RetryPolicy`](crate::resilience::RetryPolicy).

mod client;

pub use client::{ApiClient, ApiClientError};
