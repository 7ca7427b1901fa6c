use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// A news article as delivered by the server.
///
/// The channel treats articles as opaque payloads. Only `id` is required;
/// every field is kept exactly as received and serializes back unchanged.
/// Common fields are read through accessors that return `None` when the
/// field is absent or has an unexpected type.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    /// The `id` field rendered as a string; numeric ids are kept as digits
    pub id: String,
    fields: Map<String, Value>,
}

impl Article {
    /// Minimal article, mostly useful for tests and demos.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let id = id.into();
        let mut fields = Map::new();
        fields.insert("id".to_string(), Value::String(id.clone()));
        fields.insert("title".to_string(), Value::String(title.into()));
        Self { id, fields }
    }

    /// Build from a JSON object. Fails if `id` is missing or not a string or number.
    pub fn from_fields(fields: Map<String, Value>) -> Result<Self, String> {
        let id = match fields.get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(format!(
                    "article id must be a string or number, got {}",
                    other
                ))
            }
            None => return Err("article has no id".to_string()),
        };
        Ok(Self { id, fields })
    }

    /// Every field as received.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn title(&self) -> Option<&str> {
        self.str_field("title")
    }

    pub fn summary(&self) -> Option<&str> {
        self.str_field("summary")
    }

    pub fn url(&self) -> Option<&str> {
        self.str_field("url")
    }

    pub fn source(&self) -> Option<&str> {
        self.str_field("source")
    }

    pub fn category(&self) -> Option<&str> {
        self.str_field("category")
    }

    /// `categories` entries that are strings.
    pub fn categories(&self) -> Vec<&str> {
        match self.fields.get("categories") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        }
    }

    /// Publication time from `published_at`, `publishedAt` or `timestamp`,
    /// first one that parses. Strings are RFC 3339, numbers are epoch millis.
    pub fn published_at(&self) -> Option<DateTime<Utc>> {
        ["published_at", "publishedAt", "timestamp"]
            .iter()
            .filter_map(|key| self.fields.get(*key))
            .find_map(parse_time)
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
        _ => None,
    }
}

impl Serialize for Article {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Article {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let fields = Map::<String, Value>::deserialize(deserializer)?;
        Article::from_fields(fields).map_err(serde::de::Error::custom)
    }
}
