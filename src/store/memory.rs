//! In-memory store.
//!
//! Holds every entry in a `RwLock<BTreeMap>` with no persistence. Useful for
//! testing and ephemeral deployments.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{Store, StoreError, StoreFuture};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("rwlock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store for MemoryStore {
    fn get(&self, key: &str) -> StoreFuture<'_, Vec<u8>> {
        let key = key.to_string();
        Box::pin(async move {
            let entries = self.entries.read().expect("rwlock poisoned");
            entries.get(&key).cloned().ok_or(StoreError::NotFound(key))
        })
    }

    fn put(&self, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = self.entries.write().expect("rwlock poisoned");
            entries.insert(key, value);
            Ok(())
        })
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        let key = key.to_string();
        Box::pin(async move {
            let mut entries = self.entries.write().expect("rwlock poisoned");
            match entries.remove(&key) {
                Some(_) => Ok(()),
                None => Err(StoreError::NotFound(key)),
            }
        })
    }

    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<String>> {
        let prefix = prefix.to_string();
        Box::pin(async move {
            let entries = self.entries.read().expect("rwlock poisoned");
            Ok(entries
                .range(prefix.clone()..)
                .map(|(k, _)| k)
                .take_while(|k| k.starts_with(&prefix))
                .map(|k| k[prefix.len()..].to_string())
                .collect())
        })
    }
}
