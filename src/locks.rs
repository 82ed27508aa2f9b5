//! Per-key mutual exclusion registry.
//!
//! Serializes operations against a single instance key while leaving
//! distinct keys fully independent. The supervisor holds a key's lock for
//! the duration of a spawn or send, so concurrent callers racing to lazily
//! spawn the same instance queue up instead of both creating a process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard for one key; the lock releases when this drops.
pub type KeyGuard = OwnedMutexGuard<()>;

/// Registry of per-key async locks.
#[derive(Clone, Default)]
pub struct LockRegistry {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl LockRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, waiting behind any current holder.
    ///
    /// Holders of different keys never contend.
    pub async fn acquire(&self, key: &str) -> KeyGuard {
        let mutex = {
            let mut table = self.inner.lock().unwrap();
            Arc::clone(table.entry(key.to_string()).or_default())
        };
        mutex.lock_owned().await
    }

    /// Non-blocking check whether `key` is currently held.
    pub fn is_locked(&self, key: &str) -> bool {
        let table = self.inner.lock().unwrap();
        match table.get(key) {
            Some(mutex) => mutex.try_lock().is_err(),
            None => false,
        }
    }

    /// Force-clear every lock entry.
    ///
    /// Outstanding guards keep their (now detached) mutexes; subsequent
    /// acquirers get fresh ones. For test teardown and emergency reset.
    pub fn release_all(&self) {
        self.inner.lock().unwrap().clear();
    }
}
