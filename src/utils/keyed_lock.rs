// src/utils/keyed_lock.rs

//! Arena of per-key async locks.
//!
//! Holding the guard for a key excludes every other holder of the same key
//! while leaving other keys free.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held for the duration of the keyed operation.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Lazily created lock per key.
#[derive(Debug)]
pub struct KeyedLocks<K> {
    slots: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    /// Wait until the key is free and take it.
    pub async fn lock(&self, key: &K) -> KeyGuard {
        self.slot(key).lock_owned().await
    }

    /// Take the key only if nobody holds it.
    pub fn try_lock(&self, key: &K) -> Option<KeyGuard> {
        self.slot(key).try_lock_owned().ok()
    }

    pub fn is_locked(&self, key: &K) -> bool {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.get(key).is_some_and(|slot| slot.try_lock().is_err())
    }

    /// Drop the slot for a key that no longer exists.
    ///
    /// A current holder keeps its guard; later callers get a fresh slot.
    pub fn forget(&self, key: &K) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.remove(key);
    }
}
