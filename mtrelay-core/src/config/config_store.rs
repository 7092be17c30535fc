//! Hot-swappable config sections.
//!
//! A [`ConfigStore`] holds one section behind a `tokio` lock and bumps a
//! version on every [`replace`](ConfigStore::replace). Readers take a fresh
//! [`snapshot`](ConfigStore::snapshot) on each use, so a swap is picked up
//! by the next request or settlement without restarting anything.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{RwLock, RwLockReadGuard};

pub struct ConfigStore<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    value: RwLock<T>,
    version: AtomicU64,
}

impl<T> ConfigStore<T> {
    pub fn new(initial: T) -> Self {
        Self {
            shared: Arc::new(Shared {
                value: RwLock::new(initial),
                version: AtomicU64::new(0),
            }),
        }
    }

    /// Swap in a new value. Returns the new version.
    pub async fn replace(&self, value: T) -> u64 {
        let mut guard = self.shared.value.write().await;
        *guard = value;
        self.shared.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, T> {
        self.shared.value.read().await
    }

    /// Number of replacements so far.
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }
}

impl<T: Clone> ConfigStore<T> {
    /// Clone the current value out of the lock.
    pub async fn snapshot(&self) -> T {
        self.shared.value.read().await.clone()
    }
}

impl<T> Clone for ConfigStore<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}
