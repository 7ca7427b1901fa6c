//! Connection manager for the push channel.
//!
//! Owns one logical connection and drives it through
//! `Disconnected -> Connecting -> Connected -> Errored -> Connecting ...`:
//!
//! - `connect` is idempotent and never blocks; the transport is opened by a
//!   background task
//! - the topic set survives drops and is pushed again on every `Connected`
//! - drops are retried after [`RetryPolicy::backoff_delay`], with the attempt
//!   counter reset on success
//! - `disconnect` invalidates the current epoch, so a reconnect whose timer
//!   already fired still sees it was cancelled before acting
//!
//! All mutable state sits behind one mutex. Every step the background task
//! takes re-checks the epoch under that mutex first.

use super::error::{RealtimeError, TransportError};
use super::events::{
    spawn_dispatcher, ConnectionState, ErrorDetail, Event, EventKind, ListenerId,
    ListenerRegistry,
};
use super::protocol::{self, ClientMessage, ServerMessage};
use super::topics::{validate_all, TopicSet};
use super::transport::{Inbound, Link, LinkSender, Transport};
use crate::identity::Identity;
use crate::resilience::RetryPolicy;
use crate::util::{lock, now_millis};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning for a [`ChannelManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    /// Give up on a single open attempt after this long.
    pub connect_timeout: Duration,
    /// Stop reconnecting after this many consecutive failed attempts.
    /// `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    /// Backoff between reconnect attempts.
    pub retry: RetryPolicy,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_reconnect_attempts: None,
            retry: RetryPolicy::default(),
        }
    }
}

struct Shared {
    state: ConnectionState,
    topics: TopicSet,
    /// Consecutive failed attempts since the last successful open.
    attempts: u32,
    /// Bumped by `connect` and `disconnect`; a task holding an older epoch
    /// must not touch anything.
    epoch: u64,
    identity: Option<Identity>,
    link: Option<LinkSender>,
    task: Option<AbortHandle>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    options: ManagerOptions,
    shared: Mutex<Shared>,
    listeners: Arc<Mutex<ListenerRegistry>>,
    events: mpsc::UnboundedSender<Event>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Inner {
    fn emit(&self, event: Event) {
        if self.events.send(event).is_err() {
            tracing::debug!("Event dispatcher gone, dropping event");
        }
    }

    fn set_state(&self, shared: &mut Shared, next: ConnectionState) {
        if shared.state != next {
            tracing::debug!(from = %shared.state, to = %next, "Channel state change");
            shared.state = next;
            self.state_tx.send_replace(next);
        }
    }

    /// Send the complete topic set; the server replaces its view with it.
    /// An empty set clears the server's subscriptions instead.
    fn push_topics(&self, shared: &Shared) {
        let message = if shared.topics.is_empty() {
            ClientMessage::Unsubscribe
        } else {
            ClientMessage::Subscribe {
                categories: shared.topics.to_vec(),
            }
        };
        self.send_frame(shared, message);
    }

    fn send_frame(&self, shared: &Shared, message: ClientMessage) {
        let Some(link) = &shared.link else {
            return;
        };
        if !link.send(message.to_json()) {
            tracing::debug!(?message, "Link closed before frame could be queued");
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let shared = lock(&self.shared);
        if let Some(task) = &shared.task {
            task.abort();
        }
    }
}

/// Handle to one push channel. Clones share the same connection.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<Inner>,
}

/// Non-owning handle, for listeners that need to call back into the manager
/// without keeping it alive.
#[derive(Clone)]
pub struct WeakChannelManager {
    inner: Weak<Inner>,
}

impl WeakChannelManager {
    pub fn upgrade(&self) -> Option<ChannelManager> {
        self.inner.upgrade().map(|inner| ChannelManager { inner })
    }
}

impl ChannelManager {
    /// Create a disconnected manager.
    ///
    /// Must be called from within a Tokio runtime: the event dispatcher is
    /// spawned here.
    pub fn new(transport: Arc<dyn Transport>, options: ManagerOptions) -> Self {
        let listeners = Arc::new(Mutex::new(ListenerRegistry::default()));
        let events = spawn_dispatcher(Arc::clone(&listeners));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                transport,
                options,
                shared: Mutex::new(Shared {
                    state: ConnectionState::Disconnected,
                    topics: TopicSet::new(),
                    attempts: 0,
                    epoch: 0,
                    identity: None,
                    link: None,
                    task: None,
                }),
                listeners,
                events,
                state_tx,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakChannelManager {
        WeakChannelManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Start connecting with the given identity (`None` is anonymous).
    ///
    /// No-op while connecting or connected. From `Errored` the pending
    /// reconnect is cancelled and an attempt starts immediately.
    pub fn connect(&self, identity: Option<Identity>) {
        let mut shared = lock(&self.inner.shared);
        if matches!(
            shared.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            tracing::trace!(state = %shared.state, "connect() ignored");
            return;
        }

        if let Some(task) = shared.task.take() {
            task.abort();
        }
        shared.epoch += 1;
        shared.identity = identity;
        let epoch = shared.epoch;
        self.inner.set_state(&mut shared, ConnectionState::Connecting);

        let handle = tokio::spawn(run_connection(
            Arc::downgrade(&self.inner),
            Arc::clone(&self.inner.transport),
            epoch,
        ));
        shared.task = Some(handle.abort_handle());
        tracing::info!(anonymous = shared.identity.is_none(), "Connecting push channel");
    }

    /// Close the channel and cancel any pending reconnect. Safe from any
    /// state, any number of times, including from inside a listener.
    pub fn disconnect(&self) {
        let mut shared = lock(&self.inner.shared);
        shared.epoch += 1;
        if let Some(task) = shared.task.take() {
            task.abort();
        }
        shared.link = None;
        shared.attempts = 0;

        let was_connected = shared.state == ConnectionState::Connected;
        if shared.state != ConnectionState::Disconnected {
            tracing::info!(from = %shared.state, "Disconnecting push channel");
        }
        self.inner
            .set_state(&mut shared, ConnectionState::Disconnected);
        if was_connected {
            self.inner.emit(Event::Disconnected);
        }
    }

    /// Add categories to the topic set. While connected, the full set is
    /// pushed to the server right away; otherwise on the next connect.
    pub fn subscribe<I, S>(&self, categories: I) -> Result<(), RealtimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let categories = validate_all(categories)?;
        if categories.is_empty() {
            return Ok(());
        }

        let mut shared = lock(&self.inner.shared);
        shared.topics.union(categories);
        if shared.state == ConnectionState::Connected {
            self.inner.push_topics(&shared);
        }
        Ok(())
    }

    /// Remove categories from the topic set. While connected, the remaining
    /// set is pushed to the server, or an `unsubscribe` once it is empty.
    pub fn unsubscribe<I, S>(&self, categories: I) -> Result<(), RealtimeError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let categories = validate_all(categories)?;
        if categories.is_empty() {
            return Ok(());
        }

        let mut shared = lock(&self.inner.shared);
        shared.topics.difference(&categories);
        if shared.state == ConnectionState::Connected {
            self.inner.push_topics(&shared);
        }
        Ok(())
    }

    /// Register a listener for one kind of event. Works in any state.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        lock(&self.inner.listeners).add(kind, Arc::new(listener))
    }

    /// Remove a listener. Returns false if it was not registered.
    ///
    /// Takes effect for every dispatch that starts afterwards.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        lock(&self.inner.listeners).remove(kind, id)
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.inner.listeners).count(kind)
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.shared).state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Observe state transitions.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Current subscription intent, sorted.
    pub fn topics(&self) -> Vec<String> {
        lock(&self.inner.shared).topics.to_vec()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        lock(&self.inner.shared).attempts
    }
}

// ── Background connection task ──────────────────────────────────────────────

/// How a link (or an attempt to open one) ended.
enum LinkEnd {
    OpenFailed(TransportError),
    Failed(TransportError),
    Closed(Option<String>),
}

/// Result of handling one inbound frame.
enum FrameOutcome {
    Continue,
    /// The server announced it is going away
    ServerClosing(Option<String>),
    /// This task no longer owns the channel
    Stale,
}

async fn run_connection(inner: Weak<Inner>, transport: Arc<dyn Transport>, epoch: u64) {
    loop {
        let Some((identity, timeout)) = begin_attempt(&inner, epoch) else {
            return;
        };

        let opened = match tokio::time::timeout(timeout, transport.open(identity)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout),
        };

        let end = match opened {
            Ok(link) => {
                let Some(inbound) = attach(&inner, epoch, link) else {
                    return;
                };
                match pump(&inner, epoch, inbound).await {
                    Some(end) => end,
                    None => return,
                }
            }
            Err(err) => LinkEnd::OpenFailed(err),
        };

        let Some(delay) = schedule_reconnect(&inner, epoch, end) else {
            return;
        };
        tokio::time::sleep(delay).await;
        if !resume(&inner, epoch) {
            return;
        }
    }
}

fn begin_attempt(inner: &Weak<Inner>, epoch: u64) -> Option<(Option<Identity>, Duration)> {
    let inner = inner.upgrade()?;
    let shared = lock(&inner.shared);
    if shared.epoch != epoch {
        return None;
    }
    Some((shared.identity.clone(), inner.options.connect_timeout))
}

/// Install a freshly opened link. Returns its inbound stream, or `None` if
/// the channel was disconnected meanwhile (the link is dropped and closes).
fn attach(
    inner: &Weak<Inner>,
    epoch: u64,
    link: Link,
) -> Option<mpsc::UnboundedReceiver<Inbound>> {
    let inner = inner.upgrade()?;
    let mut shared = lock(&inner.shared);
    if shared.epoch != epoch {
        tracing::debug!("Channel disconnected while opening, discarding link");
        return None;
    }

    let (sender, inbound) = link.into_parts();
    shared.link = Some(sender);
    shared.attempts = 0;
    inner.set_state(&mut shared, ConnectionState::Connected);
    tracing::info!(topics = shared.topics.len(), "Push channel connected");
    inner.emit(Event::Connected);

    if !shared.topics.is_empty() {
        inner.push_topics(&shared);
    }
    Some(inbound)
}

/// Read the link until it ends. `None` means this task was superseded.
async fn pump(
    inner: &Weak<Inner>,
    epoch: u64,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) -> Option<LinkEnd> {
    while let Some(item) = inbound.recv().await {
        match item {
            Inbound::Frame(text) => {
                let inner = inner.upgrade()?;
                match handle_frame(&inner, epoch, &text) {
                    FrameOutcome::Continue => {}
                    FrameOutcome::ServerClosing(reason) => return Some(LinkEnd::Closed(reason)),
                    FrameOutcome::Stale => return None,
                }
            }
            Inbound::Closed { reason } => return Some(LinkEnd::Closed(reason)),
            Inbound::Failed(err) => return Some(LinkEnd::Failed(err)),
        }
    }
    Some(LinkEnd::Closed(None))
}

fn handle_frame(inner: &Inner, epoch: u64, text: &str) -> FrameOutcome {
    let message = match protocol::parse_frame(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::warn!(error = %e, len = text.len(), "Dropping malformed frame");
            return FrameOutcome::Continue;
        }
    };

    let shared = lock(&inner.shared);
    if shared.epoch != epoch {
        return FrameOutcome::Stale;
    }

    match message {
        ServerMessage::Connected { message } => {
            tracing::debug!(message = ?message, "Server acknowledged connection");
        }
        ServerMessage::Disconnected { reason } => {
            let reason = protocol::describe(reason);
            tracing::info!(reason = ?reason, "Server is closing the channel");
            return FrameOutcome::ServerClosing(reason);
        }
        ServerMessage::Error { message } => {
            let message =
                protocol::describe(message).unwrap_or_else(|| "server reported an error".into());
            tracing::warn!(error = %message, "Server error on push channel");
            inner.emit(Event::Error(ErrorDetail::from_server(message)));
        }
        ServerMessage::NewArticle { article } => {
            tracing::debug!(id = %article.id, "New article");
            inner.emit(Event::NewArticle(Arc::new(article)));
        }
        ServerMessage::BreakingNews { article } => {
            tracing::debug!(id = %article.id, "Breaking news");
            inner.emit(Event::BreakingNews(Arc::new(article)));
        }
        ServerMessage::Ping { timestamp } => {
            tracing::trace!(timestamp = ?timestamp, "Ping");
            inner.send_frame(
                &shared,
                ClientMessage::Pong {
                    timestamp: now_millis(),
                },
            );
        }
        ServerMessage::Subscribed { categories } => {
            tracing::debug!(categories = ?categories, "Subscription confirmed");
        }
        ServerMessage::Unsubscribed { categories } => {
            tracing::debug!(categories = ?categories, "Unsubscription confirmed");
        }
    }
    FrameOutcome::Continue
}

/// Move to `Errored`, report what happened, and pick the backoff delay.
/// `None` means stop: superseded, or out of attempts.
fn schedule_reconnect(inner: &Weak<Inner>, epoch: u64, end: LinkEnd) -> Option<Duration> {
    let inner = inner.upgrade()?;
    let mut shared = lock(&inner.shared);
    if shared.epoch != epoch {
        return None;
    }

    let was_connected = shared.state == ConnectionState::Connected;
    shared.link = None;
    inner.set_state(&mut shared, ConnectionState::Errored);

    match end {
        LinkEnd::OpenFailed(err) => {
            tracing::warn!(error = %err, attempt = shared.attempts, "Failed to open push channel");
            inner.emit(Event::Error(ErrorDetail::from_transport(&err)));
        }
        LinkEnd::Failed(err) => {
            tracing::warn!(error = %err, "Push channel failed");
            inner.emit(Event::Error(ErrorDetail::from_transport(&err)));
            if was_connected {
                inner.emit(Event::Disconnected);
            }
        }
        LinkEnd::Closed(reason) => {
            tracing::info!(reason = ?reason, "Push channel closed");
            if was_connected {
                inner.emit(Event::Disconnected);
            }
        }
    }

    if let Some(max) = inner.options.max_reconnect_attempts {
        if shared.attempts >= max {
            tracing::error!(attempts = shared.attempts, "Max reconnect attempts reached");
            shared.attempts = 0;
            shared.task = None;
            inner.set_state(&mut shared, ConnectionState::Disconnected);
            inner.emit(Event::ReconnectFailed);
            return None;
        }
    }

    let delay = inner.options.retry.backoff_delay(shared.attempts);
    shared.attempts = shared.attempts.saturating_add(1);
    tracing::info!(
        attempt = shared.attempts,
        delay_ms = delay.as_millis() as u64,
        "Reconnecting after delay"
    );
    Some(delay)
}

/// After the backoff sleep: proceed only if nobody disconnected or
/// reconnected in the meantime.
fn resume(inner: &Weak<Inner>, epoch: u64) -> bool {
    let Some(inner) = inner.upgrade() else {
        return false;
    };
    let mut shared = lock(&inner.shared);
    if shared.epoch != epoch || shared.state != ConnectionState::Errored {
        tracing::debug!("Pending reconnect cancelled");
        return false;
    }
    inner.set_state(&mut shared, ConnectionState::Connecting);
    true
}
