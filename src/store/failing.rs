//! Store double that fails chosen operations with a backend error.

use std::collections::HashSet;
use std::sync::Mutex;

use super::memory::MemoryStore;
use super::{Store, StoreError, StoreFuture};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    Put,
    Delete,
    List,
}

/// Wraps a [`MemoryStore`]; operations marked with [`fail`](Self::fail)
/// return [`StoreError::Backend`] without touching the inner store.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing: Mutex<HashSet<Op>>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, op: Op) {
        self.failing.lock().expect("mutex poisoned").insert(op);
    }

    pub fn recover(&self) {
        self.failing.lock().expect("mutex poisoned").clear();
    }

    fn check(&self, op: Op) -> Result<(), StoreError> {
        if self.failing.lock().expect("mutex poisoned").contains(&op) {
            return Err(StoreError::Backend(anyhow::anyhow!("{op:?} unavailable")));
        }
        Ok(())
    }
}

impl Store for FailingStore {
    fn get(&self, key: &str) -> StoreFuture<'_, Vec<u8>> {
        match self.check(Op::Get) {
            Ok(()) => self.inner.get(key),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn put(&self, key: &str, value: Vec<u8>) -> StoreFuture<'_, ()> {
        match self.check(Op::Put) {
            Ok(()) => self.inner.put(key, value),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn delete(&self, key: &str) -> StoreFuture<'_, ()> {
        match self.check(Op::Delete) {
            Ok(()) => self.inner.delete(key),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }

    fn list(&self, prefix: &str) -> StoreFuture<'_, Vec<String>> {
        match self.check(Op::List) {
            Ok(()) => self.inner.list(prefix),
            Err(e) => Box::pin(async move { Err(e) }),
        }
    }
}
