//! Process-local store on a sharded concurrent map.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::error::CacheBackendError;
use crate::store::ResponseStore;

struct StoredValue {
    data: Vec<u8>,
    expires_at: Instant,
}

impl StoredValue {
    fn is_expired_at(&self, now: Instant) -> bool {
        now > self.expires_at
    }
}

/// In-memory store with per-entry expiry.
///
/// Expired entries are hidden from reads immediately and reclaimed by
/// [`sweep_expired`](Self::sweep_expired), either on demand or from the
/// background sweeper.
#[derive(Default)]
pub struct LocalStore {
    entries: DashMap<String, StoredValue>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store with a background sweep every `interval`.
    ///
    /// The sweeper holds only a weak reference and stops once the store is
    /// dropped or closed.
    pub fn with_sweeper(interval: Duration) -> Arc<Self> {
        let store = Arc::new(Self::new());
        let handle = spawn_sweeper(Arc::downgrade(&store), interval);
        if let Ok(mut slot) = store.sweeper.lock() {
            *slot = Some(handle);
        }
        store
    }

    /// Removes expired entries and returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, value| {
            let keep = !value.is_expired_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn spawn_sweeper(store: Weak<LocalStore>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(store) = store.upgrade() else {
                break;
            };
            let removed = store.sweep_expired();
            if removed > 0 {
                tracing::debug!(removed, remaining = store.len(), "Swept expired cache entries");
            }
        }
    })
}

#[async_trait]
impl ResponseStore for LocalStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheBackendError> {
        let now = Instant::now();
        Ok(self
            .entries
            .get(key)
            .filter(|value| !value.is_expired_at(now))
            .map(|value| value.data.clone()))
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheBackendError> {
        self.entries.insert(
            key.to_string(),
            StoredValue {
                data: value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheBackendError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheBackendError> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheBackendError> {
        Ok(keys
            .iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count())
    }

    fn expired_count(&self, prefix: &str) -> Option<usize> {
        let now = Instant::now();
        Some(
            self.entries
                .iter()
                .filter(|entry| entry.key().starts_with(prefix) && entry.is_expired_at(now))
                .count(),
        )
    }

    async fn close(&self) {
        let handle = self.sweeper.lock().ok().and_then(|mut slot| slot.take());
        if let Some(handle) = handle {
            handle.abort();
        }
        self.entries.clear();
    }
}
