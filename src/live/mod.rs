//! Consumer-facing adapter over a [`ChannelManager`](crate::realtime::ChannelManager).
//!
//! A [`LiveFeed`] exposes connection status plus two bounded, newest-first
//! views: general new articles and breaking news.

mod buffer;
mod feed;

pub use buffer::{RecentItems, BREAKING_NEWS_CAPACITY, NEW_ARTICLES_CAPACITY};
pub use feed::{ArticleCallback, ErrorCallback, LiveFeed, LiveFeedOptions};
