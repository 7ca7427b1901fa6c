//! JSON envelopes exchanged over the push channel.
//!
//! Inbound frames are objects tagged by `type`. Article-bearing frames carry
//! the article under `payload`, or under `article` for older servers.

use crate::article::Article;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

/// A frame that could not be understood. Logged and dropped by the channel.
#[derive(Debug, Error)]
#[error("Malformed frame: {0}")]
pub(crate) struct ProtocolError(String);

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerMessage {
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    Disconnected {
        #[serde(default, alias = "payload")]
        reason: Option<Value>,
    },
    Error {
        #[serde(default, alias = "payload")]
        message: Option<Value>,
    },
    NewArticle {
        #[serde(alias = "payload")]
        article: Article,
    },
    BreakingNews {
        #[serde(alias = "payload")]
        article: Article,
    },
    Ping {
        #[serde(default)]
        timestamp: Option<i64>,
    },
    Subscribed {
        #[serde(default)]
        categories: Vec<String>,
    },
    Unsubscribed {
        #[serde(default)]
        categories: Vec<String>,
    },
}

pub(crate) fn parse_frame(text: &str) -> Result<ServerMessage, ProtocolError> {
    serde_json::from_str(text).map_err(|e| ProtocolError(e.to_string()))
}

/// Render a loosely-typed server value as display text.
pub(crate) fn describe(value: Option<Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| Some(Value::Object(map).to_string())),
        other => Some(other.to_string()),
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ClientMessage {
    /// Carries the complete topic set, which replaces the server's
    Subscribe { categories: Vec<String> },
    /// Clears every subscription on the server
    Unsubscribe,
    Pong { timestamp: i64 },
}

impl ClientMessage {
    pub(crate) fn to_json(&self) -> String {
        let value = match self {
            ClientMessage::Subscribe { categories } => {
                json!({ "type": "subscribe", "categories": categories })
            }
            ClientMessage::Unsubscribe => json!({ "type": "unsubscribe", "categories": [] }),
            ClientMessage::Pong { timestamp } => json!({ "type": "pong", "timestamp": timestamp }),
        };
        value.to_string()
    }
}
