//! The response cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::entry::{CacheEntry, HeaderMap};
use crate::key::CacheKey;
use crate::store::ResponseStore;

/// Cache statistics for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Backend name.
    pub backend: &'static str,
    /// Keys currently held under this cache's namespace.
    pub total: usize,
    /// Held keys that are past expiry, when the backend can tell.
    pub expired: Option<usize>,
    /// Lookups answered from cache since startup.
    pub hits: u64,
    /// Lookups that missed since startup.
    pub misses: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Memoizes upstream responses per identity and payload.
///
/// Backend errors are logged and degrade to misses (on read) or dropped
/// writes; the cache never fails a request.
pub struct ResponseCache {
    store: Arc<dyn ResponseStore>,
    namespace: String,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("backend", &self.store.name())
            .field("namespace", &self.namespace)
            .field("ttl", &self.ttl)
            .finish()
    }
}

impl ResponseCache {
    pub fn new(store: Arc<dyn ResponseStore>, namespace: impl Into<String>, ttl: Duration) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Derives the key for `identity_token` and `payload` in this namespace.
    pub fn generate_key(&self, identity_token: &str, payload: &[u8]) -> CacheKey {
        CacheKey::derive(&self.namespace, identity_token, payload)
    }

    /// Returns the live entry for `key`, if any.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = match self.store.get(key.as_str()).await {
            Ok(Some(bytes)) => match CacheEntry::decode(&bytes) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Dropping undecodable cache entry");
                    self.delete(key).await;
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Cache GET error");
                None
            }
        };

        let entry = match entry {
            Some(entry) if entry.is_expired() => {
                tracing::debug!(key = %key, "cache entry expired");
                self.delete(key).await;
                None
            }
            other => other,
        };

        if entry.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %key, "cache miss");
        }
        entry
    }

    /// Stores a response under `key` with the configured TTL.
    pub async fn set(&self, key: &CacheKey, response: Vec<u8>, headers: HeaderMap) {
        let entry = CacheEntry::new(response, headers, self.ttl);
        let bytes = match entry.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to encode cache entry");
                return;
            }
        };

        match self.store.set(key.as_str(), bytes, self.ttl).await {
            Ok(()) => tracing::debug!(key = %key, ttl = ?self.ttl, "cache set"),
            Err(e) => tracing::warn!(key = %key, error = %e, "Cache SET error"),
        }
    }

    /// Removes `key`. Absent keys are ignored.
    pub async fn delete(&self, key: &CacheKey) {
        if let Err(e) = self.store.delete(key.as_str()).await {
            tracing::warn!(key = %key, error = %e, "Cache DEL error");
        }
    }

    /// Removes every entry in this namespace and returns how many were removed.
    pub async fn clear(&self) -> usize {
        let prefix = self.prefix();
        let keys = match self.store.keys_with_prefix(&prefix).await {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "Cache KEYS error");
                return 0;
            }
        };

        match self.store.delete_many(&keys).await {
            Ok(removed) => {
                tracing::info!(namespace = %self.namespace, removed, "Response cache cleared");
                removed
            }
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "Cache clear failed");
                0
            }
        }
    }

    /// Best-effort statistics for this namespace.
    pub async fn stats(&self) -> CacheStats {
        let prefix = self.prefix();
        let total = match self.store.keys_with_prefix(&prefix).await {
            Ok(keys) => keys.len(),
            Err(e) => {
                tracing::warn!(namespace = %self.namespace, error = %e, "Cache KEYS error");
                0
            }
        };

        CacheStats {
            backend: self.store.name(),
            total,
            expired: self.store.expired_count(&prefix),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Releases backend resources.
    pub async fn close(&self) {
        self.store.close().await;
    }

    fn prefix(&self) -> String {
        format!("{}:", self.namespace)
    }
}
