//! Keyed async locks
//!
//! One async mutex per key, created on demand and dropped once the last
//! holder or waiter is gone. Holders of different keys never contend.
//! Entries left by a cancelled waiter are swept on the next lock or release.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Slot = Arc<AsyncMutex<()>>;

/// Map of key to async mutex
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Slot>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: K) -> KeyedGuard<'_, K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            slots.entry(key.clone()).or_default().clone()
        };

        // Built before waiting so a cancelled lock() still releases its entry
        let mut pending = KeyedGuard {
            locks: self,
            key,
            slot,
            guard: None,
        };
        pending.guard = Some(pending.slot.clone().lock_owned().await);
        pending
    }

    /// Number of keys currently held or awaited
    pub fn active(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key; released on drop
pub struct KeyedGuard<'a, K: Eq + Hash + Clone> {
    locks: &'a KeyedLocks<K>,
    key: K,
    slot: Slot,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Eq + Hash + Clone> Drop for KeyedGuard<'_, K> {
    fn drop(&mut self) {
        // Waiters clone the slot under the map lock, so holding it here makes
        // the count check and removal race-free.
        let mut slots = self
            .locks
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.guard.take();
        slots.retain(|key, slot| {
            let idle = if *key == self.key { 2 } else { 1 };
            Arc::strong_count(slot) > idle
        });
    }
}
