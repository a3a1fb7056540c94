//! Keyed async locks
//!
//! One `tokio::sync::Mutex` per key, created on demand. The engine keys them
//! by owner (single writer per portfolio) and by bot (one evaluation of a
//! bot's trades at a time).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;
use tracing::debug;

/// Registry of per-key mutexes
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn entry(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        // A poisoned map only means another thread panicked mid-insert; the map itself is intact
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Wait for and take the lock for `key`
    pub async fn acquire(&self, key: &K) -> OwnedMutexGuard<()> {
        self.entry(key).lock_owned().await
    }

    /// Take the lock only if nobody holds it
    pub fn try_acquire(&self, key: &K) -> Option<OwnedMutexGuard<()>> {
        self.entry(key).try_lock_owned().ok()
    }

    /// Drop entries nobody is holding or waiting on
    pub fn cleanup(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let removed = before - locks.len();
        if removed > 0 {
            debug!("Cleaned up {} idle locks", removed);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        let guard = locks.acquire(&1).await;
        assert!(locks.try_acquire(&1).is_none());
        assert!(locks.try_acquire(&2).is_some());
        drop(guard);
        assert!(locks.try_acquire(&1).is_some());
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let locks: KeyedLocks<&'static str> = KeyedLocks::new();
        let held = tokio_test::block_on(locks.acquire(&"alice"));

        let mut waiter = tokio_test::task::spawn(locks.acquire(&"alice"));
        tokio_test::assert_pending!(waiter.poll());

        drop(held);
        assert!(waiter.is_woken());
        let _guard = tokio_test::assert_ready!(waiter.poll());
    }

    #[tokio::test]
    async fn test_cleanup_keeps_held_locks() {
        let locks: KeyedLocks<u32> = KeyedLocks::new();
        let held = locks.acquire(&1).await;
        drop(locks.acquire(&2).await);
        assert_eq!(locks.len(), 2);

        locks.cleanup();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.cleanup();
        assert!(locks.is_empty());
    }
}
