//! Content-addressed node stores. The store key is the Poseidon hash of the
//! node encoding, so entries are immutable and writes are idempotent.

use std::collections::HashMap;
use std::num::NonZeroUsize;

use ethereum_types::U256;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Backing storage for tree nodes, keyed by node hash.
///
/// `get` returning `Ok(None)` means the hash is genuinely absent from the
/// store; backend failures are `Err`. Implementations take `&self` so a
/// store can serve concurrent readers while a writer appends new nodes.
pub trait NodeStore {
    fn get(&self, hash: U256) -> Result<Option<Vec<u8>>, StoreError>;

    /// Nodes are never overwritten: writing a hash that already exists is a
    /// no-op.
    fn set(&self, hash: U256, bytes: Vec<u8>) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    nodes: RwLock<HashMap<U256, Vec<u8>>>,
}

impl NodeStore for MemoryStore {
    fn get(&self, hash: U256) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.nodes.read().get(&hash).cloned())
    }

    fn set(&self, hash: U256, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.nodes.write().entry(hash).or_insert(bytes);
        Ok(())
    }
}

/// An LRU read cache in front of a slower store. Entries can never be stale
/// since nodes are immutable; a cache miss falls through to the inner store.
pub struct CachedStore<S> {
    cache: Mutex<LruCache<U256, Vec<u8>>>,
    inner: S,
}

impl<S: NodeStore> CachedStore<S> {
    pub fn new(inner: S, capacity: NonZeroUsize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            inner,
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: NodeStore> NodeStore for CachedStore<S> {
    fn get(&self, hash: U256) -> Result<Option<Vec<u8>>, StoreError> {
        if let Some(bytes) = self.cache.lock().get(&hash) {
            return Ok(Some(bytes.clone()));
        }
        let fetched = self.inner.get(hash)?;
        if let Some(bytes) = &fetched {
            self.cache.lock().put(hash, bytes.clone());
        }
        Ok(fetched)
    }

    fn set(&self, hash: U256, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.inner.set(hash, bytes.clone())?;
        self.cache.lock().put(hash, bytes);
        Ok(())
    }
}
