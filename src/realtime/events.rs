//! Typed channel events and the listener registry that fans them out.
//!
//! Events are queued by the channel and delivered by a dedicated dispatcher
//! task, so emitting never blocks the caller. Per event kind, listeners run
//! in registration order.

use super::error::TransportError;
use crate::article::Article;
use crate::util::lock;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Lifecycle of the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Where an error event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOrigin {
    /// The local transport failed (open, send, read)
    Transport,
    /// The server sent an `error` envelope
    Server,
}

/// Payload of [`Event::Error`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDetail {
    pub message: String,
    pub origin: ErrorOrigin,
    /// Advisory classification from the retry policy. The channel reconnects
    /// regardless.
    pub retryable: bool,
}

impl ErrorDetail {
    pub fn from_transport(err: &TransportError) -> Self {
        Self {
            message: err.to_string(),
            origin: ErrorOrigin::Transport,
            retryable: err.to_request_error().is_retryable(),
        }
    }

    pub fn from_server(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            origin: ErrorOrigin::Server,
            retryable: false,
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Something that happened on the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connected,
    Disconnected,
    Error(ErrorDetail),
    NewArticle(Arc<Article>),
    BreakingNews(Arc<Article>),
    /// Reconnect attempts exhausted; the channel is now disconnected.
    ReconnectFailed,
}

/// Discriminant of [`Event`], used as the listener key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    NewArticle,
    BreakingNews,
    ReconnectFailed,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Connected => EventKind::Connected,
            Event::Disconnected => EventKind::Disconnected,
            Event::Error(_) => EventKind::Error,
            Event::NewArticle(_) => EventKind::NewArticle,
            Event::BreakingNews(_) => EventKind::BreakingNews,
            Event::ReconnectFailed => EventKind::ReconnectFailed,
        }
    }
}

/// Handle returned by `on`, needed to remove the listener again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: u64,
    by_kind: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&mut self, kind: EventKind, listener: Listener) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_kind.entry(kind).or_default().push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, kind: EventKind, id: ListenerId) -> bool {
        let Some(listeners) = self.by_kind.get_mut(&kind) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub(crate) fn count(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }

    fn snapshot(&self, kind: EventKind) -> Vec<Listener> {
        self.by_kind
            .get(&kind)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }
}

/// Spawn the dispatcher task and return the queue feeding it.
///
/// The task exits once every sender is dropped.
pub(crate) fn spawn_dispatcher(
    registry: Arc<Mutex<ListenerRegistry>>,
) -> mpsc::UnboundedSender<Event> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            dispatch(&registry, &event);
        }
        tracing::trace!("Event dispatcher stopped");
    });
    tx
}

fn dispatch(registry: &Mutex<ListenerRegistry>, event: &Event) {
    // Snapshot, then release the lock: listeners may call on/off themselves
    let listeners = lock(registry).snapshot(event.kind());
    for listener in listeners {
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
            tracing::error!(
                kind = ?event.kind(),
                error = %panic_message(&*panic),
                "Event listener panicked"
            );
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
