//! Cache backend errors.

/// Errors raised by a [`ResponseStore`](crate::ResponseStore).
///
/// These never escape [`ResponseCache`](crate::ResponseCache); it logs them
/// and degrades to a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheBackendError {
    /// Could not obtain a connection to the backend.
    #[error("Cache connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed a command.
    #[error("Cache command error: {0}")]
    Command(String),

    /// An entry could not be serialized.
    #[error("Failed to encode cache entry: {0}")]
    Encode(String),

    /// A stored entry could not be deserialized.
    #[error("Failed to decode cache entry: {0}")]
    Decode(String),
}

impl From<redis::RedisError> for CacheBackendError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_connection_dropped() || err.is_timeout() {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

impl From<deadpool_redis::PoolError> for CacheBackendError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Self::Connection(err.to_string())
    }
}
