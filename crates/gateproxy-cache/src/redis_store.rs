//! Shared store on Redis.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::CacheBackendError;
use crate::store::ResponseStore;

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://localhost:6379`.
    pub url: String,

    /// Password applied on top of `url` when set.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Logical database applied on top of `url` when set.
    pub db: Option<i64>,

    /// Maximum pooled connections.
    pub pool_size: usize,

    /// Pool wait, create and recycle timeout.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            password: None,
            db: None,
            pool_size: 10,
            timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// The URL with password and database overrides applied.
    pub fn connection_url(&self) -> Result<String, CacheBackendError> {
        let mut url = Url::parse(&self.url)
            .map_err(|e| CacheBackendError::Connection(format!("invalid Redis URL: {e}")))?;

        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            url.set_password(Some(password)).map_err(|()| {
                CacheBackendError::Connection("Redis URL cannot carry a password".to_string())
            })?;
        }
        if let Some(db) = self.db {
            url.set_path(&format!("/{db}"));
        }

        Ok(url.into())
    }
}

/// Store backed by a deadpool Redis pool. Expiry is native (`PSETEX`).
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    /// Builds the pool and checks out one connection to verify reachability.
    pub async fn connect(config: &RedisConfig) -> Result<Self, CacheBackendError> {
        let url = config.connection_url()?;
        tracing::info!(db = ?config.db, pool_size = config.pool_size, "Connecting to Redis");

        let mut redis_config = deadpool_redis::Config::from_url(url);
        let pool_config = redis_config
            .pool
            .get_or_insert_with(|| deadpool_redis::PoolConfig::new(config.pool_size));
        pool_config.max_size = config.pool_size;
        pool_config.timeouts.wait = Some(config.timeout);
        pool_config.timeouts.create = Some(config.timeout);
        pool_config.timeouts.recycle = Some(config.timeout);

        let pool = redis_config
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| CacheBackendError::Connection(e.to_string()))?;

        pool.get().await?;
        tracing::info!("Connected to Redis");

        Ok(Self { pool })
    }
}

#[async_trait]
impl ResponseStore for RedisStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheBackendError> {
        let mut conn = self.pool.get().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheBackendError> {
        let mut conn = self.pool.get().await?;
        // PSETEX rejects a zero expiry.
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        conn.pset_ex::<_, _, ()>(key, value, ttl_ms).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheBackendError> {
        let mut conn = self.pool.get().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, CacheBackendError> {
        let mut conn = self.pool.get().await?;
        Ok(conn.keys::<_, Vec<String>>(format!("{prefix}*")).await?)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<usize, CacheBackendError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.pool.get().await?;
        Ok(conn.del::<_, usize>(keys.to_vec()).await?)
    }

    async fn close(&self) {
        self.pool.close();
        tracing::debug!("Redis pool closed");
    }
}
