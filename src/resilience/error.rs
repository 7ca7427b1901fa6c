use reqwest::header::HeaderValue;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Failure of an outbound request, classified by what the caller can do about it.
///
/// This is the taxonomy shared by the request layer and the push channel:
/// the retry policy only ever looks at these variants, never at the
/// underlying transport error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    /// No response and the host has no network at all
    #[error("Network unavailable: offline")]
    Offline,
    /// Transport-level failure with no response (DNS, connect, TLS, reset)
    #[error("Network error: {0}")]
    Network(String),
    /// Request exceeded its deadline
    #[error("Request timed out")]
    Timeout,
    /// HTTP 429, optionally carrying the server's `Retry-After`
    #[error("Rate limited by server")]
    RateLimited { retry_after: Option<Duration> },
    /// HTTP 5xx
    #[error("Server error: status {status}")]
    Server { status: u16 },
    /// Any other non-success status (4xx and oddities like 3xx without a redirect)
    #[error("Request rejected: status {status}")]
    Client { status: u16 },
    /// Response arrived but could not be decoded
    #[error("Malformed response: {0}")]
    Protocol(String),
}

/// Coarse category of a [`RequestError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NetworkUnavailable,
    ServerError,
    RateLimited,
    ClientError,
    Timeout,
    ProtocolError,
}

/// Stable, human-readable message categories shown to users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UserMessage {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    RateLimited,
    ServerError,
    UpstreamUnavailable,
    Offline,
    Timeout,
    Unknown,
}

impl UserMessage {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserMessage::BadRequest => "Invalid request. Please check your input.",
            UserMessage::Unauthorized => "You are not authorized. Please log in again.",
            UserMessage::Forbidden => "You do not have permission to perform this action.",
            UserMessage::NotFound => "The requested resource was not found.",
            UserMessage::RateLimited => "Too many requests. Please try again later.",
            UserMessage::ServerError => "Server error. Please try again later.",
            UserMessage::UpstreamUnavailable => {
                "Service temporarily unavailable. Please try again later."
            }
            UserMessage::Offline => {
                "You appear to be offline. Please check your connection and try again."
            }
            UserMessage::Timeout => "Request timed out. Please try again.",
            UserMessage::Unknown => "An unexpected error occurred. Please try again.",
        }
    }
}

impl fmt::Display for UserMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl RequestError {
    /// Classify a non-success HTTP status.
    ///
    /// `retry_after` is only kept for 429; other statuses never carry one.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            429 => RequestError::RateLimited { retry_after },
            500..=599 => RequestError::Server { status },
            _ => RequestError::Client { status },
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            RequestError::Offline | RequestError::Network(_) => ErrorCategory::NetworkUnavailable,
            RequestError::Timeout => ErrorCategory::Timeout,
            RequestError::RateLimited { .. } => ErrorCategory::RateLimited,
            RequestError::Server { .. } => ErrorCategory::ServerError,
            RequestError::Client { .. } => ErrorCategory::ClientError,
            RequestError::Protocol(_) => ErrorCategory::ProtocolError,
        }
    }

    /// Returns true if this error is transient and the request should be retried.
    ///
    /// Network failures without a response, timeouts, 429 and 5xx are
    /// retryable. Everything else (other 4xx, undecodable bodies) is not.
    pub fn is_retryable(&self) -> bool {
        match self.category() {
            ErrorCategory::NetworkUnavailable
            | ErrorCategory::Timeout
            | ErrorCategory::RateLimited
            | ErrorCategory::ServerError => true,
            ErrorCategory::ClientError | ErrorCategory::ProtocolError => false,
        }
    }

    /// Server-imposed delay, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            RequestError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::RateLimited { .. } => Some(429),
            RequestError::Server { status } | RequestError::Client { status } => Some(*status),
            _ => None,
        }
    }

    /// Map to the fixed set of user-facing messages.
    pub fn user_message(&self) -> UserMessage {
        match self {
            RequestError::Offline | RequestError::Network(_) => UserMessage::Offline,
            RequestError::Timeout => UserMessage::Timeout,
            RequestError::RateLimited { .. } => UserMessage::RateLimited,
            RequestError::Server { status: 502..=504 } => UserMessage::UpstreamUnavailable,
            RequestError::Server { .. } => UserMessage::ServerError,
            RequestError::Client { status: 400 } => UserMessage::BadRequest,
            RequestError::Client { status: 401 } => UserMessage::Unauthorized,
            RequestError::Client { status: 403 } => UserMessage::Forbidden,
            RequestError::Client { status: 404 } => UserMessage::NotFound,
            RequestError::Client { .. } | RequestError::Protocol(_) => UserMessage::Unknown,
        }
    }
}

impl From<reqwest::Error> for RequestError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return RequestError::Timeout;
        }
        if let Some(status) = err.status() {
            return RequestError::from_status(status.as_u16(), None);
        }
        if err.is_decode() {
            return RequestError::Protocol(err.to_string());
        }
        RequestError::Network(err.to_string())
    }
}

/// Parse a `Retry-After` header given in whole seconds.
///
/// HTTP-date values and garbage yield `None`, which falls back to the
/// computed backoff.
pub fn parse_retry_after(value: &HeaderValue) -> Option<Duration> {
    value
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(RequestError::Network("connection reset".into()).is_retryable());
        assert!(RequestError::Offline.is_retryable());
        assert!(RequestError::Timeout.is_retryable());
        assert!(RequestError::from_status(429, None).is_retryable());
        assert!(RequestError::from_status(500, None).is_retryable());
        assert!(RequestError::from_status(599, None).is_retryable());

        assert!(!RequestError::from_status(404, None).is_retryable());
        assert!(!RequestError::from_status(400, None).is_retryable());
        assert!(!RequestError::from_status(401, None).is_retryable());
        assert!(!RequestError::Protocol("bad json".into()).is_retryable());
    }

    #[test]
    fn test_is_retryable_is_pure() {
        let err = RequestError::from_status(503, None);
        let first = err.is_retryable();
        for _ in 0..10 {
            assert_eq!(err.is_retryable(), first);
        }
    }

    #[test]
    fn test_from_status_keeps_retry_after_only_for_429() {
        let secs = Some(Duration::from_secs(5));
        assert_eq!(
            RequestError::from_status(429, secs).retry_after(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(RequestError::from_status(503, secs).retry_after(), None);
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            RequestError::Network("x".into()).category(),
            ErrorCategory::NetworkUnavailable
        );
        assert_eq!(
            RequestError::from_status(502, None).category(),
            ErrorCategory::ServerError
        );
        assert_eq!(
            RequestError::from_status(429, None).category(),
            ErrorCategory::RateLimited
        );
        assert_eq!(
            RequestError::from_status(418, None).category(),
            ErrorCategory::ClientError
        );
        assert_eq!(RequestError::Timeout.category(), ErrorCategory::Timeout);
    }

    #[test]
    fn test_user_messages() {
        let cases = [
            (RequestError::from_status(400, None), UserMessage::BadRequest),
            (RequestError::from_status(401, None), UserMessage::Unauthorized),
            (RequestError::from_status(403, None), UserMessage::Forbidden),
            (RequestError::from_status(404, None), UserMessage::NotFound),
            (RequestError::from_status(429, None), UserMessage::RateLimited),
            (RequestError::from_status(500, None), UserMessage::ServerError),
            (RequestError::from_status(502, None), UserMessage::UpstreamUnavailable),
            (RequestError::from_status(503, None), UserMessage::UpstreamUnavailable),
            (RequestError::from_status(504, None), UserMessage::UpstreamUnavailable),
            (RequestError::from_status(507, None), UserMessage::ServerError),
            (RequestError::Offline, UserMessage::Offline),
            (RequestError::Network("dns".into()), UserMessage::Offline),
            (RequestError::Timeout, UserMessage::Timeout),
            (RequestError::from_status(409, None), UserMessage::Unknown),
            (RequestError::Protocol("eof".into()), UserMessage::Unknown),
        ];
        for (err, expected) in cases {
            assert_eq!(err.user_message(), expected, "for {:?}", err);
        }
    }

    #[test]
    fn test_user_message_text_is_stable() {
        assert_eq!(
            UserMessage::NotFound.to_string(),
            "The requested resource was not found."
        );
        assert!(UserMessage::RateLimited.as_str().contains("Too many requests"));
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        let value = HeaderValue::from_static("5");
        assert_eq!(parse_retry_after(&value), Some(Duration::from_secs(5)));

        let padded = HeaderValue::from_static(" 12 ");
        assert_eq!(parse_retry_after(&padded), Some(Duration::from_secs(12)));
    }

    #[test]
    fn test_parse_retry_after_rejects_dates_and_garbage() {
        let date = HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_retry_after(&date), None);
        assert_eq!(parse_retry_after(&HeaderValue::from_static("-1")), None);
        assert_eq!(parse_retry_after(&HeaderValue::from_static("")), None);
    }
}
