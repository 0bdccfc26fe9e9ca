//! Abstract key-value store.
//!
//! Every administrative resource lives in a [`Store`] under a path of the
//! form `/<kind>/<id>`.  Values are opaque bytes; [`StoreExt`] layers JSON
//! encoding on top so callers work with typed records.
//!
//! Three backends ship with the crate: [`memory::MemoryStore`] (ephemeral),
//! [`sqlite::SqliteStore`] (the default) and [`local::LocalStore`] (JSONL
//! files).  All of them report [`StoreError::NotFound`] for `get` and
//! `delete` on an absent key.

#[cfg(test)]
pub(crate) mod failing;
pub mod local;
pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::config::StoreConfig;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors reported by a [`Store`] backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No entry exists at the requested key.
    #[error("not found: {0}")]
    NotFound(String),

    /// A stored value could not be encoded or decoded.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend itself failed (I/O, database, connectivity).
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Persistent mapping from string paths to serialized values.
///
/// Dropping a returned future abandons the operation; request-scoped
/// deadlines are enforced by the caller dropping the handler future.
pub trait Store: Send + Sync + 'static {
    /// Fetch the value stored at `key`.
    fn get(&self, key: &str) -> StoreFuture<'_, Vec<u8>>;

    /// Store `value` at `key`, replacing any previous value.
    fn put(&self, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()>;

    /// Remove `key`. Fails with [`StoreError::NotFound`] if it is absent.
    fn delete(&self, key: &str) -> StoreFuture<'_, ()>;

    /// Return every key starting with `prefix`, with the prefix stripped.
    ///
    /// If the keys are `["aa", "ab", "cd"]` then `list("a")` yields
    /// `["a", "b"]`.  An empty result is not an error.
    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<String>>;
}

/// Typed JSON access on top of any [`Store`].
pub trait StoreExt {
    /// Fetch and decode the record at `key`.
    fn get_as<T>(&self, key: &str) -> StoreFuture<'_, T>
    where
        T: DeserializeOwned + Send + 'static;

    /// Encode `value` and store it at `key`.
    fn put_as<T>(&self, key: &str, value: &T) -> StoreFuture<'_, ()>
    where
        T: Serialize + ?Sized;
}

impl<S: Store + ?Sized> StoreExt for S {
    fn get_as<T>(&self, key: &str) -> StoreFuture<'_, T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let fetch = self.get(key);
        Box::pin(async move {
            let raw = fetch.await?;
            Ok(serde_json::from_slice(&raw)?)
        })
    }

    fn put_as<T>(&self, key: &str, value: &T) -> StoreFuture<'_, ()>
    where
        T: Serialize + ?Sized,
    {
        match serde_json::to_vec(value) {
            Ok(encoded) => self.put(key, encoded),
            Err(e) => Box::pin(async move { Err(StoreError::Serialization(e)) }),
        }
    }
}

/// Open the backend selected by `config.engine`.
pub fn open(config: &StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match config.engine.as_str() {
        "memory" => {
            info!("In-memory store initialized (contents are lost on exit)");
            Arc::new(memory::MemoryStore::new())
        }
        "local" => {
            let store = local::LocalStore::new(&config.local)?;
            info!("Local JSONL store initialized at {}", config.local.root_dir);
            Arc::new(store)
        }
        "sqlite" => {
            let path = &config.sqlite.path;
            if let Some(parent) = std::path::Path::new(path).parent() {
                std::fs::create_dir_all(parent)?;
            }
            let store = sqlite::SqliteStore::new(path)?;
            info!("SQLite store initialized at {}", path);
            Arc::new(store)
        }
        other => anyhow::bail!("unknown store engine '{other}' (expected sqlite, memory or local)"),
    };
    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_typed_round_trip() {
        let store: Arc<dyn Store> = Arc::new(memory::MemoryStore::new());
        let record = Record {
            name: "a".to_string(),
            count: 3,
        };
        store.put_as("/records/a", &record).await.unwrap();
        let fetched: Record = store.get_as("/records/a").await.unwrap();
        assert_eq!(fetched, record);
    }

    #[tokio::test]
    async fn test_get_as_reports_decode_failure() {
        let store = memory::MemoryStore::new();
        store.put("/records/bad", b"not json".to_vec()).await.unwrap();
        let err = store.get_as::<Record>("/records/bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_get_as_missing_is_not_found() {
        let store = memory::MemoryStore::new();
        let err = store.get_as::<Record>("/records/none").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_open_rejects_unknown_engine() {
        let mut config = StoreConfig::default();
        config.engine = "etcd".to_string();
        assert!(open(&config).is_err());
    }

    #[test]
    fn test_open_memory() {
        let mut config = StoreConfig::default();
        config.engine = "memory".to_string();
        assert!(open(&config).is_ok());
    }
}
