//! # Per-key async locks.
//!
//! [`KeyedLocks`] hands out one `tokio::sync::Mutex` per key so read-modify-write
//! sequences on one node (or one address) are serialized while unrelated keys
//! proceed in parallel. The map itself is sharded (`DashMap`); its shard lock is
//! held only while cloning the per-key `Arc`, never across an `.await`.

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lazily-populated map of per-key mutexes.
pub struct KeyedLocks<K> {
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    /// Acquires the lock for `key`, creating it on first use.
    pub async fn lock(&self, key: &K) -> OwnedMutexGuard<()> {
        let m = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        m.lock_owned().await
    }

    /// Drops the entry for `key` if nobody holds or waits on it.
    ///
    /// Call after the guard for `key` has been dropped.
    pub fn release(&self, key: &K) {
        self.locks.remove_if(key, |_, m| Arc::strong_count(m) == 1);
    }

    /// Drops entries nobody holds or waits on.
    pub fn prune(&self) {
        self.locks.retain(|_, m| Arc::strong_count(m) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}
