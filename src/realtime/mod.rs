//! Real-time push channel: one persistent connection, multiplexed topic
//! subscriptions, and typed events.
//!
//! # Architecture
//!
//! - [`manager`] - the [`ChannelManager`] state machine and reconnect loop
//! - [`events`] - [`Event`] types and listener dispatch
//! - [`transport`] - the [`Transport`] contract and the [`Link`] handle
//! - [`ws`] - WebSocket implementation of [`Transport`]
//! - `protocol` - JSON envelopes on the wire
//! - `topics` - the [`TopicSet`] and category validation
//!
//! Network failures never come back as `Err` from the manager; they show up
//! as [`Event::Error`] plus a state change. The only synchronous error is
//! [`RealtimeError::InvalidArgument`].
//!
//! # Example
//!
//! ```ignore
//! let transport = Arc::new(WsTransport::new("https://news.example.com")?);
//! let manager = ChannelManager::new(transport, ManagerOptions::default());
//!
//! manager.on(EventKind::NewArticle, |event| {
//!     if let Event::NewArticle(article) = event {
//!         println!("{}", article.title().unwrap_or_default());
//!     }
//! });
//! manager.subscribe(["bitcoin", "defi"])?;
//! manager.connect(None);
//! ```

mod error;
pub mod events;
pub mod manager;
mod protocol;
mod topics;
pub mod transport;
pub mod ws;

pub use error::{RealtimeError, TransportError};
pub use events::{ConnectionState, ErrorDetail, ErrorOrigin, Event, EventKind, Listener, ListenerId};
pub use manager::{ChannelManager, ManagerOptions, WeakChannelManager};
pub use topics::{validate_category, TopicSet, MAX_CATEGORY_LEN};
pub use transport::{Inbound, Link, LinkPeer, Transport};
pub use ws::{WsTransport, NEWS_CHANNEL_PATH};
