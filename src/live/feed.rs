use super::buffer::{RecentItems, BREAKING_NEWS_CAPACITY, NEW_ARTICLES_CAPACITY};
use crate::article::Article;
use crate::identity::{Identity, IdentitySource};
use crate::realtime::{
    validate_category, ChannelManager, ConnectionState, ErrorDetail, Event, EventKind,
    ListenerId, RealtimeError,
};
use crate::util::lock;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Callback for article events.
pub type ArticleCallback = Arc<dyn Fn(&Article) + Send + Sync>;
/// Callback for error events.
pub type ErrorCallback = Arc<dyn Fn(&ErrorDetail) + Send + Sync>;

/// How a [`LiveFeed`] should behave once activated.
#[derive(Clone)]
pub struct LiveFeedOptions {
    pub(crate) enabled: bool,
    pub(crate) categories: Vec<String>,
    pub(crate) on_new_article: Option<ArticleCallback>,
    pub(crate) on_breaking_news: Option<ArticleCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
}

impl Default for LiveFeedOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            categories: vec!["all".to_string()],
            on_new_article: None,
            on_breaking_news: None,
            on_error: None,
        }
    }
}

impl fmt::Debug for LiveFeedOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveFeedOptions")
            .field("enabled", &self.enabled)
            .field("categories", &self.categories)
            .field("on_new_article", &self.on_new_article.is_some())
            .field("on_breaking_news", &self.on_breaking_news.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

impl LiveFeedOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn categories<I, S>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_new_article<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Article) + Send + Sync + 'static,
    {
        self.on_new_article = Some(Arc::new(callback));
        self
    }

    pub fn on_breaking_news<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Article) + Send + Sync + 'static,
    {
        self.on_breaking_news = Some(Arc::new(callback));
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&ErrorDetail) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }
}

struct FeedState {
    is_connected: bool,
    new_articles: RecentItems<Arc<Article>>,
    breaking_news: RecentItems<Arc<Article>>,
    last_error: Option<ErrorDetail>,
    categories: Vec<String>,
}

/// Consumer-facing view of a push channel.
///
/// Folds article events into two bounded, newest-first buffers and tracks
/// connection status. Buffers survive reconnects and are only cleared by
/// [`reset`](Self::reset).
///
/// Deactivating (or dropping) a feed removes exactly the listeners it
/// registered. It never disconnects the manager, which other feeds may share;
/// the connection closes once the last manager handle is gone.
pub struct LiveFeed {
    manager: ChannelManager,
    state: Arc<Mutex<FeedState>>,
    registrations: Vec<(EventKind, ListenerId)>,
}

impl LiveFeed {
    /// Activate a feed on `manager`.
    ///
    /// Fails fast with [`RealtimeError::InvalidArgument`] on a malformed
    /// category. A disabled feed registers nothing and never connects.
    pub fn activate(
        manager: ChannelManager,
        options: LiveFeedOptions,
        identity: &dyn IdentitySource,
    ) -> Result<Self, RealtimeError> {
        for category in &options.categories {
            validate_category(category)?;
        }

        let state = Arc::new(Mutex::new(FeedState {
            is_connected: false,
            new_articles: RecentItems::new(NEW_ARTICLES_CAPACITY),
            breaking_news: RecentItems::new(BREAKING_NEWS_CAPACITY),
            last_error: None,
            categories: options.categories.clone(),
        }));
        let mut feed = LiveFeed {
            manager,
            state,
            registrations: Vec::new(),
        };

        if !options.enabled {
            tracing::debug!("Live feed disabled, staying inert");
            return Ok(feed);
        }

        feed.register_listeners(&options);

        if feed.manager.state() == ConnectionState::Connected {
            // Shared manager is already up: no Connected event is coming
            lock(&feed.state).is_connected = true;
            if !options.categories.is_empty() {
                feed.manager.subscribe(&options.categories)?;
            }
        } else {
            feed.manager.connect(identity.identity());
        }

        tracing::debug!(categories = ?options.categories, "Live feed activated");
        Ok(feed)
    }

    fn register_listeners(&mut self, options: &LiveFeedOptions) {
        let state = Arc::clone(&self.state);
        let manager = self.manager.downgrade();
        let id = self.manager.on(EventKind::Connected, move |_| {
            let categories = {
                let mut state = lock(&state);
                state.is_connected = true;
                state.last_error = None;
                state.categories.clone()
            };
            if categories.is_empty() {
                return;
            }
            if let Some(manager) = manager.upgrade() {
                // The manager already pushed its topic set on connect
                let topics = manager.topics();
                if categories.iter().all(|c| topics.contains(c)) {
                    return;
                }
                if let Err(e) = manager.subscribe(&categories) {
                    tracing::warn!(error = %e, "Failed to subscribe after connect");
                }
            }
        });
        self.registrations.push((EventKind::Connected, id));

        let state = Arc::clone(&self.state);
        let id = self.manager.on(EventKind::Disconnected, move |_| {
            lock(&state).is_connected = false;
        });
        self.registrations.push((EventKind::Disconnected, id));

        let state = Arc::clone(&self.state);
        let on_error = options.on_error.clone();
        let id = self.manager.on(EventKind::Error, move |event| {
            if let Event::Error(detail) = event {
                {
                    let mut state = lock(&state);
                    state.last_error = Some(detail.clone());
                    state.is_connected = false;
                }
                if let Some(callback) = &on_error {
                    callback(detail);
                }
            }
        });
        self.registrations.push((EventKind::Error, id));

        let state = Arc::clone(&self.state);
        let on_new_article = options.on_new_article.clone();
        let id = self.manager.on(EventKind::NewArticle, move |event| {
            if let Event::NewArticle(article) = event {
                lock(&state).new_articles.push(Arc::clone(article));
                if let Some(callback) = &on_new_article {
                    callback(article);
                }
            }
        });
        self.registrations.push((EventKind::NewArticle, id));

        let state = Arc::clone(&self.state);
        let on_breaking_news = options.on_breaking_news.clone();
        let id = self.manager.on(EventKind::BreakingNews, move |event| {
            if let Event::BreakingNews(article) = event {
                lock(&state).breaking_news.push(Arc::clone(article));
                if let Some(callback) = &on_breaking_news {
                    callback(article);
                }
            }
        });
        self.registrations.push((EventKind::BreakingNews, id));
    }

    /// Replace the category set.
    ///
    /// Additive on the channel: the new set is subscribed, but categories
    /// dropped from the set are not unsubscribed.
    pub fn set_categories<I, S>(&mut self, categories: I) -> Result<(), RealtimeError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let categories: Vec<String> = categories.into_iter().map(Into::into).collect();
        for category in &categories {
            validate_category(category)?;
        }
        lock(&self.state).categories = categories.clone();

        if self.is_active() && !categories.is_empty() {
            self.manager.subscribe(&categories)?;
        }
        Ok(())
    }

    /// Remove this feed's listeners. Idempotent.
    pub fn deactivate(&mut self) {
        if self.registrations.is_empty() {
            return;
        }
        for (kind, id) in self.registrations.drain(..) {
            self.manager.off(kind, id);
        }
        tracing::debug!("Live feed deactivated");
    }

    pub fn is_active(&self) -> bool {
        !self.registrations.is_empty()
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).is_connected
    }

    /// Recent articles, newest first (at most 50).
    pub fn new_articles(&self) -> Vec<Arc<Article>> {
        lock(&self.state).new_articles.snapshot()
    }

    /// Recent breaking news, newest first (at most 10).
    pub fn breaking_news(&self) -> Vec<Arc<Article>> {
        lock(&self.state).breaking_news.snapshot()
    }

    pub fn last_error(&self) -> Option<ErrorDetail> {
        lock(&self.state).last_error.clone()
    }

    pub fn categories(&self) -> Vec<String> {
        lock(&self.state).categories.clone()
    }

    /// Clear both buffers and the last error.
    pub fn reset(&self) {
        let mut state = lock(&self.state);
        state.new_articles.clear();
        state.breaking_news.clear();
        state.last_error = None;
    }

    pub fn connect(&self, identity: Option<Identity>) {
        self.manager.connect(identity);
    }

    pub fn disconnect(&self) {
        self.manager.disconnect();
        lock(&self.state).is_connected = false;
    }

    pub fn subscribe<I, S>(&self, categories: I) -> Result<(), RealtimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.manager.subscribe(categories)
    }

    pub fn unsubscribe<I, S>(&self, categories: I) -> Result<(), RealtimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.manager.unsubscribe(categories)
    }

    pub fn manager(&self) -> &ChannelManager {
        &self.manager
    }
}

impl Drop for LiveFeed {
    fn drop(&mut self) {
        self.deactivate();
    }
}
