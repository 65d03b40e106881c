//! Credential storage for the session token pair
//!
//! `SessionStore` is the injectable persistence seam: `get`/`set`/`clear` of
//! a single `CredentialPair`. `MemorySessionStore` keeps the pair in memory
//! (tests, ephemeral sessions). `FileSessionStore` persists it as JSON with
//! atomic temp-file + rename writes and 0600 permissions.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// The access/refresh token pair.
///
/// Either token may be absent: a fresh install has neither, and a server
/// that does not rotate refresh tokens only ever updates `access`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialPair {
    pub access: Option<Secret<String>>,
    pub refresh: Option<Secret<String>>,
}

impl CredentialPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access: Some(Secret::new(access.into())),
            refresh: Some(Secret::new(refresh.into())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access.is_none() && self.refresh.is_none()
    }
}

/// On-disk representation. Tokens are only unwrapped here, at the file boundary.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
}

impl From<&CredentialPair> for StoredSession {
    fn from(pair: &CredentialPair) -> Self {
        Self {
            access_token: pair.access.as_ref().map(|s| s.expose().clone()),
            refresh_token: pair.refresh.as_ref().map(|s| s.expose().clone()),
        }
    }
}

impl From<StoredSession> for CredentialPair {
    fn from(stored: StoredSession) -> Self {
        Self {
            access: stored.access_token.map(Secret::new),
            refresh: stored.refresh_token.map(Secret::new),
        }
    }
}

/// Boxed future returned by `SessionStore` operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence for the session's credential pair.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn SessionStore>`).
pub trait SessionStore: Send + Sync {
    /// Current stored pair (empty if nothing is stored).
    fn get(&self) -> StoreFuture<'_, CredentialPair>;

    /// Replace the stored pair.
    fn set(&self, pair: CredentialPair) -> StoreFuture<'_, ()>;

    /// Remove both tokens.
    fn clear(&self) -> StoreFuture<'_, ()>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<CredentialPair>,
}

impl MemorySessionStore {
    pub fn new(pair: CredentialPair) -> Self {
        Self {
            state: Mutex::new(pair),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> StoreFuture<'_, CredentialPair> {
        Box::pin(async move { Ok(self.state.lock().await.clone()) })
    }

    fn set(&self, pair: CredentialPair) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            *self.state.lock().await = pair;
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            *self.state.lock().await = CredentialPair::default();
            Ok(())
        })
    }
}

/// JSON file store.
///
/// The Mutex serializes writes; reads return the in-memory copy so they
/// never touch the disk after `load`.
pub struct FileSessionStore {
    path: PathBuf,
    state: Mutex<CredentialPair>,
}

impl FileSessionStore {
    /// Load the session from the given file path.
    ///
    /// If the file doesn't exist, creates it as `{}` (no session yet).
    pub async fn load(path: PathBuf) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading session file: {e}")))?;
            let stored: StoredSession = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing session file: {e}")))?;
            let pair = CredentialPair::from(stored);
            info!(
                path = %path.display(),
                has_access = pair.access.is_some(),
                has_refresh = pair.refresh.is_some(),
                "loaded session"
            );
            pair
        } else {
            info!(path = %path.display(), "session file not found, starting logged out");
            let pair = CredentialPair::default();
            write_atomic(&path, &pair).await?;
            pair
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> StoreFuture<'_, CredentialPair> {
        Box::pin(async move { Ok(self.state.lock().await.clone()) })
    }

    fn set(&self, pair: CredentialPair) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            write_atomic(&self.path, &pair).await?;
            *state = pair;
            debug!("stored session tokens");
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let empty = CredentialPair::default();
            write_atomic(&self.path, &empty).await?;
            *state = empty;
            debug!("cleared session tokens");
            Ok(())
        })
    }
}

/// Write the session to a file atomically.
///
/// Writes a temporary file in the same directory, then renames it over the
/// target. Sets 0600 permissions since the file contains bearer tokens.
async fn write_atomic(path: &Path, pair: &CredentialPair) -> Result<()> {
    let json = serde_json::to_string_pretty(&StoredSession::from(pair))
        .map_err(|e| Error::CredentialParse(format!("serializing session: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Io("session path has no parent directory".into()))?;

    let tmp_path = dir.join(format!(".session.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp session file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting session file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp session file: {e}")))?;

    debug!(path = %path.display(), "persisted session");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_set_get_clear() {
        let store = MemorySessionStore::default();
        assert!(store.get().await.unwrap().is_empty());

        store
            .set(CredentialPair::new("at_1", "rt_1"))
            .await
            .unwrap();
        let pair = store.get().await.unwrap();
        assert!(pair.access.as_ref().unwrap().matches("at_1"));
        assert!(pair.refresh.as_ref().unwrap().matches("rt_1"));

        store.clear().await.unwrap();
        assert!(store.get().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileSessionStore::load(path.clone()).await.unwrap();
        store
            .set(CredentialPair::new("at_1", "rt_1"))
            .await
            .unwrap();

        let reloaded = FileSessionStore::load(path).await.unwrap();
        let pair = reloaded.get().await.unwrap();
        assert!(pair.access.unwrap().matches("at_1"));
        assert!(pair.refresh.unwrap().matches("rt_1"));
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        assert!(!path.exists());
        let store = FileSessionStore::load(path.clone()).await.unwrap();
        assert!(store.get().await.unwrap().is_empty());
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents.trim(), "{}");
    }

    #[tokio::test]
    async fn clear_persists_empty_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileSessionStore::load(path.clone()).await.unwrap();
        store
            .set(CredentialPair::new("at_1", "rt_1"))
            .await
            .unwrap();
        store.clear().await.unwrap();

        let reloaded = FileSessionStore::load(path).await.unwrap();
        assert!(reloaded.get().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn access_only_pair_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileSessionStore::load(path.clone()).await.unwrap();
        store
            .set(CredentialPair {
                access: Some(Secret::new("at_only".to_string())),
                refresh: None,
            })
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("\"access_token\": \"at_only\""));
        assert!(!contents.contains("refresh_token"));
    }

    #[tokio::test]
    async fn corrupt_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let err = FileSessionStore::load(path).await.err().unwrap();
        assert!(matches!(err, Error::CredentialParse(_)), "got: {err:?}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let store = FileSessionStore::load(path.clone()).await.unwrap();
        store
            .set(CredentialPair::new("at_1", "rt_1"))
            .await
            .unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "session file must be 0600, got {mode:o}");
    }

    #[test]
    fn debug_never_shows_tokens() {
        let pair = CredentialPair::new("at_visible?", "rt_visible?");
        let debug = format!("{pair:?}");
        assert!(!debug.contains("visible"), "got: {debug}");
    }
}
