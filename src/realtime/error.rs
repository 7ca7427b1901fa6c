use crate::resilience::RequestError;
use thiserror::Error;

/// Misuse of the channel's public contract.
///
/// This is the only error the channel ever hands back synchronously; network
/// turbulence surfaces as [`Event::Error`](super::Event::Error) instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Failure reported by a [`Transport`](super::Transport).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Could not reach the server (DNS, refused, reset, TLS)
    #[error("Transport unavailable: {0}")]
    Unavailable(String),
    /// Handshake answered with a non-upgrade HTTP status
    #[error("Connection rejected: status {status}")]
    Rejected { status: u16 },
    /// Opening the channel took longer than the connect timeout
    #[error("Connection timed out")]
    Timeout,
    /// Framing or handshake violation
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Express this failure in the shared request taxonomy so the retry
    /// policy can classify it.
    pub fn to_request_error(&self) -> RequestError {
        match self {
            TransportError::Unavailable(msg) => RequestError::Network(msg.clone()),
            TransportError::Rejected { status } => RequestError::from_status(*status, None),
            TransportError::Timeout => RequestError::Timeout,
            TransportError::Protocol(msg) => RequestError::Protocol(msg.clone()),
        }
    }
}
