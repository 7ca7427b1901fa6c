use super::error::TransportError;
use crate::identity::Identity;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

/// Something received on an open link.
#[derive(Debug)]
pub enum Inbound {
    /// One text frame, in arrival order
    Frame(String),
    /// Remote closed the link cleanly
    Closed { reason: Option<String> },
    /// Link broke
    Failed(TransportError),
}

/// Bidirectional push channel to the server.
///
/// `open` must not block; establishment happens inside the returned future.
/// The resulting [`Link`] is the transport handle: sending on it queues an
/// outbound frame, and dropping or [closing](Link::close) it tears the
/// connection down.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, identity: Option<Identity>) -> BoxFuture<'static, Result<Link, TransportError>>;
}

/// Client side of an open connection.
#[derive(Debug)]
pub struct Link {
    sender: LinkSender,
    inbound: mpsc::UnboundedReceiver<Inbound>,
}

/// Transport side of an open connection, handed to whatever pumps frames.
#[derive(Debug)]
pub struct LinkPeer {
    /// Frames the client queued for sending. Yields `None` once the client
    /// closed the link.
    pub outgoing: mpsc::UnboundedReceiver<String>,
    /// Deliver inbound frames and close/failure notices to the client.
    pub incoming: mpsc::UnboundedSender<Inbound>,
}

/// Sending half of a [`Link`]. Dropping it closes the link.
#[derive(Debug)]
pub(crate) struct LinkSender(mpsc::UnboundedSender<String>);

impl LinkSender {
    /// Queue a frame. Returns false if the link is already gone.
    pub(crate) fn send(&self, text: String) -> bool {
        self.0.send(text).is_ok()
    }
}

impl Link {
    /// Create a connected link/peer pair.
    pub fn channel() -> (Link, LinkPeer) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        (
            Link {
                sender: LinkSender(out_tx),
                inbound: in_rx,
            },
            LinkPeer {
                outgoing: out_rx,
                incoming: in_tx,
            },
        )
    }

    pub fn send(&self, text: impl Into<String>) -> bool {
        self.sender.send(text.into())
    }

    pub async fn recv(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    pub fn close(self) {
        drop(self);
    }

    pub(crate) fn into_parts(self) -> (LinkSender, mpsc::UnboundedReceiver<Inbound>) {
        (self.sender, self.inbound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_link_pair_roundtrip() {
        let (mut link, mut peer) = Link::channel();
        assert!(link.send("hello"));
        assert_eq!(peer.outgoing.recv().await.as_deref(), Some("hello"));

        peer.incoming.send(Inbound::Frame("world".into())).unwrap();
        match link.recv().await {
            Some(Inbound::Frame(text)) => assert_eq!(text, "world"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_is_observed_by_peer() {
        let (link, mut peer) = Link::channel();
        link.close();
        assert!(peer.outgoing.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_peer_gone() {
        let (link, peer) = Link::channel();
        drop(peer);
        assert!(!link.send("lost"));
    }
}
