//! # gateproxy-cache
//!
//! Response memoization keyed by caller identity and request payload.
//!
//! The [`ResponseCache`] owns key derivation, entry encoding and expiry. The
//! bytes live in a [`ResponseStore`]: either the process-local
//! [`LocalStore`] or a shared [`RedisStore`]. Backend failures never reach
//! callers; they are logged and surface as misses.

pub mod cache;
pub mod entry;
pub mod error;
pub mod key;
pub mod local;
pub mod policy;
pub mod redis_store;
pub mod store;

pub use cache::{CacheStats, ResponseCache};
pub use entry::{CacheEntry, HeaderMap};
pub use error::CacheBackendError;
pub use key::CacheKey;
pub use local::LocalStore;
pub use policy::{KeywordClassifier, RequestClassifier};
pub use redis_store::{RedisConfig, RedisStore};
pub use store::{BackendKind, ResponseStore, create_store};
