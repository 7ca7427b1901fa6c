//! Configuration file parser for ~/.config/newswire/config.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are ignored by serde, though we log a warning when the file
//! contains potential typos.
use crate::realtime::ManagerOptions;
use crate::resilience::RetryPolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// `Debug` masks `access_token`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the news server. The push channel lives under it at `/ws/news`.
    pub server_url: String,

    /// Categories to subscribe to on startup.
    pub categories: Vec<String>,

    /// Bearer token for the HTTP API.
    pub access_token: Option<String>,

    /// Persisted user state (JSON with `user_id` or `id`). Absent means anonymous.
    pub user_state_path: Option<PathBuf>,

    pub realtime: RealtimeConfig,

    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8787".to_string(),
            categories: vec!["all".to_string()],
            access_token: None,
            user_state_path: None,
            realtime: RealtimeConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("server_url", &self.server_url)
            .field("categories", &self.categories)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("user_state_path", &self.user_state_path)
            .field("realtime", &self.realtime)
            .field("retry", &self.retry)
            .finish()
    }
}

/// `[realtime]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// When false the live feed stays inert and never connects.
    pub enabled: bool,
    pub connect_timeout_secs: u64,
    /// Give up after this many consecutive failed reconnects. Unset retries forever.
    pub max_reconnect_attempts: Option<u32>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            connect_timeout_secs: 10,
            max_reconnect_attempts: None,
        }
    }
}

/// `[retry]` table. Shared by HTTP retries and push-channel reconnects.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            max_jitter_ms: policy.max_jitter.as_millis() as u64,
            max_attempts: policy.max_attempts,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_jitter: Duration::from_millis(config.max_jitter_ms),
            // At least one attempt is always made
            max_attempts: config.max_attempts.max(1),
        }
    }
}

impl From<&Config> for ManagerOptions {
    fn from(config: &Config) -> Self {
        ManagerOptions {
            connect_timeout: Duration::from_secs(config.realtime.connect_timeout_secs.max(1)),
            max_reconnect_attempts: config.realtime.max_reconnect_attempts,
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "server_url",
        "categories",
        "access_token",
        "user_state_path",
        "realtime",
        "retry",
    ];

    const KNOWN_REALTIME_KEYS: [&'static str; 3] =
        ["enabled", "connect_timeout_secs", "max_reconnect_attempts"];

    const KNOWN_RETRY_KEYS: [&'static str; 4] =
        ["base_delay_ms", "max_delay_ms", "max_jitter_ms", "max_attempts"];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // Check size before reading so a huge file is never pulled into memory
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            warn_unknown_keys(&raw, &Self::KNOWN_KEYS, "");
            if let Some(toml::Value::Table(table)) = raw.get("realtime") {
                warn_unknown_keys(table, &Self::KNOWN_REALTIME_KEYS, "realtime.");
            }
            if let Some(toml::Value::Table(table)) = raw.get("retry") {
                warn_unknown_keys(table, &Self::KNOWN_RETRY_KEYS, "retry.");
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            server_url = %config.server_url,
            "Loaded configuration"
        );
        Ok(config)
    }
}

fn warn_unknown_keys(table: &toml::Table, known: &[&str], prefix: &str) {
    for key in table.keys() {
        if !known.contains(&key.as_str()) {
            tracing::warn!(key = %format!("{}{}", prefix, key), "Unknown key in config file, ignoring");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
