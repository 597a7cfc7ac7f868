use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio::time::error::Elapsed;

pub type KeyGuard = OwnedMutexGuard<()>;

/// One async mutex per key, created on first use.
///
/// Guards are owned so they can be held across awaits and moved between
/// helpers. Entries nobody holds or waits on are dropped by [`KeyedLocks::prune`].
pub struct KeyedLocks<K> {
    slots: DashMap<K, Arc<Mutex<()>>>,
}

impl<K: Eq + Hash + Ord + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Ord + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: DashMap::new(),
        }
    }

    fn slot(&self, key: &K) -> Arc<Mutex<()>> {
        self.slots.entry(key.clone()).or_default().value().clone()
    }

    pub async fn lock(&self, key: &K) -> KeyGuard {
        self.slot(key).lock_owned().await
    }

    /// Wait for the key until `deadline`.
    pub async fn lock_until(&self, key: &K, deadline: Instant) -> Result<KeyGuard, Elapsed> {
        tokio::time::timeout_at(deadline, self.slot(key).lock_owned()).await
    }

    /// Lock several keys in ascending order. Duplicates are locked once.
    pub async fn lock_many_until(
        &self,
        keys: impl IntoIterator<Item = K>,
        deadline: Instant,
    ) -> Result<Vec<KeyGuard>, Elapsed> {
        let mut keys: Vec<K> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            guards.push(self.lock_until(key, deadline).await?);
        }
        Ok(guards)
    }

    /// Drop idle entries. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let before = self.slots.len();
        // The map holds one reference; any guard or pending waiter holds another.
        self.slots.retain(|_, slot| Arc::strong_count(slot) > 1);
        before.saturating_sub(self.slots.len())
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
