//! Shared helpers for integration tests: an in-memory transport whose opens
//! are scripted by the test, and small utilities for observing a channel.

#![allow(dead_code)]

use futures::future::BoxFuture;
use futures::FutureExt;
use newswire::identity::Identity;
use newswire::realtime::{
    ChannelManager, ConnectionState, Event, EventKind, Inbound, Link, LinkPeer, ManagerOptions,
    Transport, TransportError,
};
use newswire::resilience::RetryPolicy;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// What the next `open` call does.
#[derive(Debug, Clone)]
pub enum OpenScript {
    /// Succeed immediately
    Accept,
    /// Succeed after a delay
    AcceptAfter(Duration),
    /// Fail with this error
    Refuse(TransportError),
    /// Never complete
    Hang,
}

#[derive(Default)]
struct ScriptState {
    script: VecDeque<OpenScript>,
    opens: usize,
    identities: Vec<Option<String>>,
}

/// Transport that hands the server side of every opened link to the test.
///
/// Opens follow the queued script; once it runs out they succeed.
#[derive(Clone)]
pub struct MemoryTransport {
    state: Arc<Mutex<ScriptState>>,
    peers: mpsc::UnboundedSender<LinkPeer>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        (
            Self {
                state: Arc::new(Mutex::new(ScriptState::default())),
                peers,
            },
            rx,
        )
    }

    pub fn script(&self, steps: impl IntoIterator<Item = OpenScript>) {
        self.state.lock().unwrap().script.extend(steps);
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn identities(&self) -> Vec<Option<String>> {
        self.state.lock().unwrap().identities.clone()
    }
}

impl Transport for MemoryTransport {
    fn open(&self, identity: Option<Identity>) -> BoxFuture<'static, Result<Link, TransportError>> {
        let step = {
            let mut state = self.state.lock().unwrap();
            state.opens += 1;
            state
                .identities
                .push(identity.as_ref().map(|id| id.expose().to_string()));
            state.script.pop_front().unwrap_or(OpenScript::Accept)
        };
        let peers = self.peers.clone();

        async move {
            match step {
                OpenScript::Accept => {}
                OpenScript::AcceptAfter(delay) => tokio::time::sleep(delay).await,
                OpenScript::Refuse(err) => return Err(err),
                OpenScript::Hang => futures::future::pending::<()>().await,
            }
            let (link, peer) = Link::channel();
            let _ = peers.send(peer);
            Ok(link)
        }
        .boxed()
    }
}

/// Retry policy with small, deterministic delays: 100ms, 200ms, 400ms, ... capped at 1s.
pub fn test_policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(100),
        max_delay: Duration::from_secs(1),
        max_jitter: Duration::ZERO,
        max_attempts: 3,
    }
}

pub fn test_options() -> ManagerOptions {
    ManagerOptions {
        connect_timeout: Duration::from_secs(2),
        max_reconnect_attempts: None,
        retry: test_policy(),
    }
}

pub fn manager_with(transport: &MemoryTransport, options: ManagerOptions) -> ChannelManager {
    ChannelManager::new(Arc::new(transport.clone()), options)
}

/// Let queued work (dispatcher, connection task) run to idle.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

pub async fn wait_for_state(manager: &ChannelManager, wanted: ConnectionState) {
    let mut states = manager.watch_state();
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if *states.borrow_and_update() == wanted {
                return;
            }
            if states.changed().await.is_err() {
                panic!("manager dropped while waiting for {}", wanted);
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {}", wanted));
}

pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<LinkPeer>) -> LinkPeer {
    tokio::time::timeout(Duration::from_secs(30), peers.recv())
        .await
        .expect("timed out waiting for a link")
        .expect("transport dropped")
}

/// Next frame the client sent, parsed as JSON.
pub async fn next_sent(peer: &mut LinkPeer) -> Value {
    let text = tokio::time::timeout(Duration::from_secs(30), peer.outgoing.recv())
        .await
        .expect("timed out waiting for an outbound frame")
        .expect("link closed");
    serde_json::from_str(&text).expect("client sent invalid JSON")
}

/// Everything the client has sent so far, without waiting.
pub fn drain_sent(peer: &mut LinkPeer) -> Vec<Value> {
    let mut frames = Vec::new();
    while let Ok(text) = peer.outgoing.try_recv() {
        frames.push(serde_json::from_str(&text).expect("client sent invalid JSON"));
    }
    frames
}

pub fn push(peer: &LinkPeer, frame: Value) {
    peer.incoming
        .send(Inbound::Frame(frame.to_string()))
        .expect("client side of link is gone");
}

pub fn article_frame(kind: &str, id: &str) -> Value {
    json!({
        "type": kind,
        "payload": { "id": id, "title": format!("Article {}", id) }
    })
}

/// Records every event as a short label, in delivery order.
#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn attach(manager: &ChannelManager) -> Self {
        let log = EventLog::default();
        for kind in [
            EventKind::Connected,
            EventKind::Disconnected,
            EventKind::Error,
            EventKind::NewArticle,
            EventKind::BreakingNews,
            EventKind::ReconnectFailed,
        ] {
            let log = log.clone();
            manager.on(kind, move |event| log.record(event));
        }
        log
    }

    fn record(&self, event: &Event) {
        let label = match event {
            Event::Connected => "connected".to_string(),
            Event::Disconnected => "disconnected".to_string(),
            Event::Error(detail) => format!("error:{}", detail.message),
            Event::NewArticle(article) => format!("article:{}", article.id),
            Event::BreakingNews(article) => format!("breaking:{}", article.id),
            Event::ReconnectFailed => "reconnect_failed".to_string(),
        };
        self.0.lock().unwrap().push(label);
    }

    pub fn labels(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, label: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|l| *l == label).count()
    }

    pub fn errors(&self) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|l| l.starts_with("error:"))
            .count()
    }
}
