//! Cached response entries.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::CacheBackendError;

/// Response headers: lowercase name to ordered values.
pub type HeaderMap = BTreeMap<String, Vec<String>>;

/// A memoized upstream response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub response: Vec<u8>,
    pub headers: HeaderMap,
    pub stored_at: OffsetDateTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(response: Vec<u8>, headers: HeaderMap, ttl: Duration) -> Self {
        Self {
            response,
            headers,
            stored_at: OffsetDateTime::now_utc(),
            ttl,
        }
    }

    /// Time since the entry was stored. Zero if the clock went backwards.
    pub fn age_at(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(now - self.stored_at).unwrap_or_default()
    }

    pub fn age(&self) -> Duration {
        self.age_at(OffsetDateTime::now_utc())
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.age_at(now) > self.ttl
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }

    /// Encodes the entry as MessagePack.
    pub fn encode(&self) -> Result<Vec<u8>, CacheBackendError> {
        rmp_serde::to_vec_named(self).map_err(|e| CacheBackendError::Encode(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheBackendError> {
        rmp_serde::from_slice(bytes).map_err(|e| CacheBackendError::Decode(e.to_string()))
    }
}
