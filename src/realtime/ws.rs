//! WebSocket transport for the push channel.

use super::error::{RealtimeError, TransportError};
use super::transport::{Inbound, Link, LinkPeer, Transport};
use crate::identity::Identity;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{error::Error as WsError, protocol::Message},
};
use url::Url;

type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Path of the news channel relative to the server base URL.
pub const NEWS_CHANNEL_PATH: &str = "/ws/news";

/// Opens `ws(s)://<server>/ws/news` connections, one per [`Link`].
#[derive(Debug, Clone)]
pub struct WsTransport {
    endpoint: Url,
}

impl WsTransport {
    /// Build from an http(s) or ws(s) server base URL.
    pub fn new(base_url: &str) -> Result<Self, RealtimeError> {
        resolve_ws_url(base_url).map(|endpoint| Self { endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn request_url(&self, identity: Option<&Identity>) -> Url {
        let mut url = self.endpoint.clone();
        if let Some(identity) = identity {
            url.query_pairs_mut().append_pair("userId", identity.expose());
        }
        url
    }
}

fn resolve_ws_url(base_url: &str) -> Result<Url, RealtimeError> {
    let mut url = Url::parse(base_url.trim()).map_err(|e| {
        RealtimeError::InvalidArgument(format!("invalid server URL {:?}: {}", base_url, e))
    })?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(RealtimeError::InvalidArgument(format!(
                "unsupported server URL scheme {:?}",
                other
            )))
        }
    };
    url.set_scheme(scheme).map_err(|_| {
        RealtimeError::InvalidArgument(format!("cannot derive WebSocket URL from {:?}", base_url))
    })?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), NEWS_CHANNEL_PATH);
    url.set_path(&path);
    Ok(url)
}

impl Transport for WsTransport {
    fn open(&self, identity: Option<Identity>) -> BoxFuture<'static, Result<Link, TransportError>> {
        let url = self.request_url(identity.as_ref());
        let endpoint = self.endpoint.clone();
        Box::pin(async move {
            tracing::debug!(endpoint = %endpoint, "Opening WebSocket");
            let (stream, response) = connect_async(url.as_str()).await.map_err(map_ws_error)?;
            tracing::debug!(
                endpoint = %endpoint,
                status = %response.status(),
                "WebSocket handshake complete"
            );

            let (link, peer) = Link::channel();
            tokio::spawn(pump(stream, peer));
            Ok(link)
        })
    }
}

fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => TransportError::Rejected {
            status: response.status().as_u16(),
        },
        WsError::Io(e) => TransportError::Unavailable(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => {
            TransportError::Unavailable("connection closed".to_string())
        }
        other => TransportError::Protocol(other.to_string()),
    }
}

/// Shuttle frames between the socket and the link until either side ends.
async fn pump(stream: WebSocketStream, mut peer: LinkPeer) {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            outgoing = peer.outgoing.recv() => match outgoing {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        let _ = peer.incoming.send(Inbound::Failed(map_ws_error(e)));
                        break;
                    }
                }
                None => {
                    // Client dropped the link
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if peer.incoming.send(Inbound::Frame(text.to_string())).is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                    let _ = peer.incoming.send(Inbound::Closed { reason });
                    break;
                }
                // Ping/pong are answered by tungstenite; binary frames are not part of the protocol
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    let _ = peer.incoming.send(Inbound::Failed(map_ws_error(e)));
                    break;
                }
                None => {
                    let _ = peer.incoming.send(Inbound::Closed { reason: None });
                    break;
                }
            },
        }
    }
    tracing::trace!("WebSocket pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_base_becomes_ws() {
        let transport = WsTransport::new("http://localhost:8787").unwrap();
        assert_eq!(transport.endpoint().as_str(), "ws://localhost:8787/ws/news");
    }

    #[test]
    fn test_https_base_becomes_wss_and_keeps_path() {
        let transport = WsTransport::new("https://api.example.com/v1/").unwrap();
        assert_eq!(
            transport.endpoint().as_str(),
            "wss://api.example.com/v1/ws/news"
        );
    }

    #[test]
    fn test_ws_base_accepted() {
        let transport = WsTransport::new("wss://push.example.com").unwrap();
        assert_eq!(transport.endpoint().scheme(), "wss");
    }

    #[test]
    fn test_invalid_base_rejected() {
        assert!(matches!(
            WsTransport::new("not a url"),
            Err(RealtimeError::InvalidArgument(_))
        ));
        assert!(matches!(
            WsTransport::new("ftp://example.com"),
            Err(RealtimeError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_identity_goes_into_query() {
        let transport = WsTransport::new("http://localhost:8787").unwrap();
        let url = transport.request_url(Some(&Identity::new("user 42")));
        assert_eq!(url.as_str(), "ws://localhost:8787/ws/news?userId=user+42");

        let anonymous = transport.request_url(None);
        assert_eq!(anonymous.query(), None);
    }

    #[test]
    fn test_map_ws_error() {
        let io = WsError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "refused",
        ));
        assert!(matches!(map_ws_error(io), TransportError::Unavailable(_)));
        assert!(matches!(
            map_ws_error(WsError::ConnectionClosed),
            TransportError::Unavailable(_)
        ));
    }
}
