//! Opaque identity passed to the push channel at connect time.
//!
//! The identity is resolved from locally persisted user state. Absence is
//! valid and means the channel connects anonymously.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Upper bound for the persisted user file; anything larger is not user state.
const MAX_USER_FILE_SIZE: u64 = 64 * 1024;

/// Opaque identity token.
///
/// Cheap to clone. `Debug` never prints the token.
#[derive(Clone)]
pub struct Identity(Arc<SecretString>);

impl Identity {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::new(SecretString::from(token.into())))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Identity([REDACTED])")
    }
}

/// Anything that can produce the identity for a new activation.
pub trait IdentitySource {
    fn identity(&self) -> Option<Identity>;
}

/// Fixed identity (or fixed anonymity).
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<Identity>);

impl IdentitySource for StaticIdentity {
    fn identity(&self) -> Option<Identity> {
        self.0.clone()
    }
}

#[derive(Deserialize)]
struct StoredUser {
    #[serde(default)]
    user_id: Option<Value>,
    #[serde(default)]
    id: Option<Value>,
}

/// Persisted user state on disk (`user.json` in the config directory).
///
/// `user_id` wins over `id`; either may be a string or a number.
#[derive(Debug, Clone)]
pub struct UserStateFile {
    path: PathBuf,
}

impl UserStateFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Option<Identity> {
        match std::fs::metadata(&self.path) {
            Ok(meta) if meta.len() > MAX_USER_FILE_SIZE => {
                tracing::warn!(
                    path = %self.path.display(),
                    size = meta.len(),
                    "User state file too large, connecting anonymously"
                );
                return None;
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No user state, connecting anonymously");
                return None;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to stat user state");
                return None;
            }
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read user state");
                return None;
            }
        };
        if content.trim().is_empty() {
            return None;
        }

        let user: StoredUser = match serde_json::from_str(&content) {
            Ok(u) => u,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Malformed user state, connecting anonymously");
                return None;
            }
        };

        [user.user_id, user.id]
            .into_iter()
            .flatten()
            .find_map(id_to_string)
            .map(Identity::new)
    }
}

fn id_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl IdentitySource for UserStateFile {
    fn identity(&self) -> Option<Identity> {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_user_file(name: &str, content: &str) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("newswire_identity_test_{}", name));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("user.json");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_debug_redacts_token() {
        let identity = Identity::new("user-secret-123");
        let debug = format!("{:?}", identity);
        assert!(!debug.contains("user-secret-123"));
        assert!(debug.contains("REDACTED"));
        assert_eq!(identity.expose(), "user-secret-123");
    }

    #[test]
    fn test_missing_file_is_anonymous() {
        let source = UserStateFile::new("/tmp/newswire_identity_nonexistent/user.json");
        assert!(source.identity().is_none());
    }

    #[test]
    fn test_user_id_preferred_over_id() {
        let (dir, path) = write_user_file("prefer", r#"{"user_id": "u-1", "id": "other"}"#);
        let identity = UserStateFile::new(&path).identity().unwrap();
        assert_eq!(identity.expose(), "u-1");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_falls_back_to_id() {
        let (dir, path) = write_user_file("fallback", r#"{"id": 77, "name": "Ada"}"#);
        let identity = UserStateFile::new(&path).identity().unwrap();
        assert_eq!(identity.expose(), "77");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_user_id_falls_back_to_id() {
        let (dir, path) = write_user_file("empty_uid", r#"{"user_id": "", "id": "x9"}"#);
        let identity = UserStateFile::new(&path).identity().unwrap();
        assert_eq!(identity.expose(), "x9");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_no_id_is_anonymous() {
        let (dir, path) = write_user_file("noid", r#"{"name": "Ada"}"#);
        assert!(UserStateFile::new(&path).identity().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_malformed_is_anonymous() {
        let (dir, path) = write_user_file("malformed", "{not json");
        assert!(UserStateFile::new(&path).identity().is_none());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_static_identity() {
        assert!(StaticIdentity(None).identity().is_none());
        let id = StaticIdentity(Some(Identity::new("abc"))).identity().unwrap();
        assert_eq!(id.expose(), "abc");
    }
}
