//! Storage capability behind the response cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CacheBackendError;
use crate::local::LocalStore;
use crate::redis_store::{RedisConfig, RedisStore};

/// Byte store with per-key expiry.
///
/// Implementations only move opaque bytes. Entry encoding and expiry
/// semantics live in [`ResponseCache`](crate::ResponseCache).
#[async_trait]
pub trait ResponseStore: Send + Sync {
    /// Backend name for logs and stats.
    fn name(&self) -> &'static str;

    /// Returns the value stored under `key`, if any and not yet expired.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheBackendError>;

    /// Stores `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheBackendError>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheBackendError>;

    /// Lists every key starting with `prefix`.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheBackendError>;

    /// Removes all given keys and returns how many existed.
    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheBackendError> {
        for key in keys {
            self.delete(key).await?;
        }
        Ok(keys.len())
    }

    /// Number of keys under `prefix` that are past their expiry but still held.
    ///
    /// `None` when the backend expires entries itself and cannot tell.
    fn expired_count(&self, _prefix: &str) -> Option<usize> {
        None
    }

    /// Releases connections and background tasks.
    async fn close(&self) {}
}

/// Which backend to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Local,
    Redis,
}

/// Builds the configured store.
///
/// A Redis backend that cannot be reached at startup falls back to the local
/// store so the gateway still starts; the fallback is logged.
pub async fn create_store(
    kind: BackendKind,
    redis: &RedisConfig,
    sweep_interval: Duration,
) -> Arc<dyn ResponseStore> {
    match kind {
        BackendKind::Local => {
            tracing::info!("Using local response cache");
            LocalStore::with_sweeper(sweep_interval)
        }
        BackendKind::Redis => match RedisStore::connect(redis).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to connect to Redis. Falling back to local cache."
                );
                LocalStore::with_sweeper(sweep_interval)
            }
        },
    }
}
