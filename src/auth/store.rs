use std::{fmt::Debug, io::ErrorKind, path::PathBuf};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use tokio::sync::RwLock;

/// Access and refresh bearer tokens, always replaced as a whole
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// token attached to requests and socket handshakes
    pub access_token: String,
    /// token exchanged for a new pair when the access token expires
    pub refresh_token: String,
}

impl TokenPair {
    /// Create a token pair
    pub fn new<A: Into<String>, R: Into<String>>(access_token: A, refresh_token: R) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

impl Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

/// Storage of the current token pair.
///
/// A reader must observe either the old or the new pair, never a mix of both.
#[async_trait::async_trait]
pub trait TokenStore: Debug + Send + Sync {
    /// current token pair, if logged in
    async fn get(&self) -> Option<TokenPair>;
    /// replace the whole token pair
    async fn set(&self, pair: TokenPair);
    /// forget stored tokens
    async fn clear(&self);

    /// current access token, if logged in
    async fn access_token(&self) -> Option<String> {
        self.get().await.map(|pair| pair.access_token)
    }
}

/// In-memory token store
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    pair: RwLock<Option<TokenPair>>,
}

impl MemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `pair`
    pub fn with_tokens(pair: TokenPair) -> Self {
        Self {
            pair: RwLock::new(Some(pair)),
        }
    }
}

#[async_trait::async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self) -> Option<TokenPair> {
        self.pair.read().await.clone()
    }

    async fn set(&self, pair: TokenPair) {
        *self.pair.write().await = Some(pair);
    }

    async fn clear(&self) {
        self.pair.write().await.take();
    }
}

/// Error when load persisted tokens
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(error), context(suffix(false)))]
pub enum LoadTokenError {
    /// read token file failed
    #[snafu(display("read token file {} failed: {source}", path.display()))]
    ReadFailed {
        /// token file path
        path: PathBuf,
        /// source error
        source: std::io::Error,
    },

    /// token file content is not a valid token pair
    #[snafu(display("parse token file {} failed: {source}", path.display()))]
    ParseFailed {
        /// token file path
        path: PathBuf,
        /// source error
        source: serde_json::Error,
    },
}

/// Token store persisted as a json file.
///
/// The in-memory copy is authoritative; a failed write is logged and the
/// process keeps working with the new tokens.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    pair: RwLock<Option<TokenPair>>,
}

impl FileTokenStore {
    /// Open a store at `path`, loading tokens if the file exists
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self, LoadTokenError> {
        let path = path.into();

        let pair = match tokio::fs::read(&path).await {
            Ok(data) => Some(
                serde_json::from_slice(&data).with_context(|_| error::ParseFailed { path: &path })?,
            ),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => return Err(err).with_context(|_| error::ReadFailed { path: &path }),
        };

        log::debug!(
            "Opened token file {}, tokens present: {}",
            path.display(),
            pair.is_some()
        );

        Ok(Self {
            path,
            pair: RwLock::new(pair),
        })
    }

    async fn persist(&self, pair: &TokenPair) -> std::io::Result<()> {
        let data = serde_json::to_vec(pair)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &self.path).await
    }
}

#[async_trait::async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self) -> Option<TokenPair> {
        self.pair.read().await.clone()
    }

    async fn set(&self, pair: TokenPair) {
        let mut guard = self.pair.write().await;
        if let Err(err) = self.persist(&pair).await {
            log::warn!("Persist tokens to {} failed: {}", self.path.display(), err);
        }
        *guard = Some(pair);
    }

    async fn clear(&self) {
        let mut guard = self.pair.write().await;
        guard.take();
        match tokio::fs::remove_file(&self.path).await {
            Err(err) if err.kind() != ErrorKind::NotFound => {
                log::warn!("Remove token file {} failed: {}", self.path.display(), err);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_replace_and_clear() {
        let store = MemoryTokenStore::new();
        assert!(store.get().await.is_none());

        store.set(TokenPair::new("a1", "r1")).await;
        store.set(TokenPair::new("a2", "r2")).await;
        assert_eq!(store.get().await, Some(TokenPair::new("a2", "r2")));
        assert_eq!(store.access_token().await.as_deref(), Some("a2"));

        store.clear().await;
        assert!(store.access_token().await.is_none());
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::open(&path).await.unwrap();
        assert!(store.get().await.is_none());
        store.set(TokenPair::new("access", "refresh")).await;
        drop(store);

        let store = FileTokenStore::open(&path).await.unwrap();
        assert_eq!(store.get().await, Some(TokenPair::new("access", "refresh")));

        store.clear().await;
        assert!(!path.exists());
        let store = FileTokenStore::open(&path).await.unwrap();
        assert!(store.get().await.is_none());
    }

    #[tokio::test]
    async fn test_file_store_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"not json").unwrap();

        let err = FileTokenStore::open(&path).await.unwrap_err();
        assert!(matches!(err, LoadTokenError::ParseFailed { .. }));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let text = format!("{:?}", TokenPair::new("secret-access", "secret-refresh"));
        assert!(!text.contains("secret"));
    }
}
