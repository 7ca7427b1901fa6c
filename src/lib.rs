//! Client for a news server's real-time push channel.
//!
//! - [`resilience`] - error taxonomy and retry policy shared by HTTP and the push channel
//! - [`api`] - JSON-over-HTTP client with retries
//! - [`realtime`] - connection manager, topic subscriptions and typed events
//! - [`live`] - bounded consumer-facing view of the channel
//! - [`identity`] - where the caller's identity comes from
//! - [`config`] - TOML configuration

pub mod api;
pub mod article;
pub mod config;
pub mod identity;
pub mod live;
pub mod realtime;
pub mod resilience;
pub(crate) mod util;
