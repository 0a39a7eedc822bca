//! Signing key directory.
//!
//! The directory holds the current key set as an immutable snapshot and
//! replaces it wholesale on every successful fetch. Lookups never block on
//! a refresh in progress; they see either the old or the new key set.
//!
//! # Refresh
//!
//! Keys are refreshed in two ways:
//!
//! - A background task fetches on a fixed interval
//!   ([`KeyDirectory::spawn_background_polling`]).
//! - A lookup for an unknown `kid` triggers exactly one fetch before giving up
//!   ([`KeyDirectory::find_key_by_id`]).
//!
//! A failed fetch never clears the directory. The last good key set stays in
//! place until a later fetch succeeds.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::keys::{KeyFetchError, KeyFetcher, SigningKey};
use crate::snapshot::SnapshotContainer;

/// Configuration for the key directory.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Deadline for a single fetch (default: 10 seconds).
    pub fetch_timeout: Duration,

    /// Lower bound for the background polling interval (default: 1 minute).
    pub min_poll_interval: Duration,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            min_poll_interval: Duration::from_secs(60),
        }
    }
}

impl DirectoryConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the deadline for a single fetch.
    #[must_use]
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Sets the lower bound applied to background polling intervals.
    #[must_use]
    pub fn with_min_poll_interval(mut self, interval: Duration) -> Self {
        self.min_poll_interval = interval;
        self
    }
}

/// The requested key id is not in the directory, even after a refetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Signing key not found: {kid}")]
pub struct KeyNotFoundError {
    pub kid: String,
}

struct Inner {
    fetcher: Arc<dyn KeyFetcher>,
    keys: SnapshotContainer<Vec<SigningKey>>,
    // Serializes snapshot writers.
    fetch_lock: Mutex<()>,
    config: DirectoryConfig,
}

/// Self-refreshing set of trusted signing keys.
///
/// Cheap to clone; all clones share one snapshot.
#[derive(Clone)]
pub struct KeyDirectory {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for KeyDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyDirectory")
            .field("keys", &self.inner.keys.latest().len())
            .field("config", &self.inner.config)
            .finish()
    }
}

impl KeyDirectory {
    /// Creates a directory and performs the initial fetch.
    ///
    /// # Errors
    ///
    /// Returns the fetch error if the initial key set cannot be loaded. A
    /// gateway cannot verify anything without it.
    pub async fn connect(
        fetcher: Arc<dyn KeyFetcher>,
        config: DirectoryConfig,
    ) -> Result<Self, KeyFetchError> {
        let directory = Self {
            inner: Arc::new(Inner {
                fetcher,
                keys: SnapshotContainer::new(Vec::new()),
                fetch_lock: Mutex::new(()),
                config,
            }),
        };

        directory.fetch().await?;
        tracing::info!(keys = directory.len(), "Signing key directory initialized");
        Ok(directory)
    }

    /// Fetches the key set and installs it as the new snapshot.
    ///
    /// On failure the previous snapshot is kept.
    pub async fn fetch(&self) -> Result<(), KeyFetchError> {
        let _guard = self.inner.fetch_lock.lock().await;
        let deadline = self.inner.config.fetch_timeout;

        let keys = match tokio::time::timeout(deadline, self.inner.fetcher.fetch_keys()).await {
            Ok(result) => result?,
            Err(_) => return Err(KeyFetchError::Timeout(deadline)),
        };

        tracing::debug!(count = keys.len(), "Replacing signing key snapshot");
        self.inner.keys.replace_with(keys);
        Ok(())
    }

    /// Looks up a key by id, refetching once if it is not present.
    ///
    /// A failed refetch is logged and treated like an unchanged key set.
    pub async fn find_key_by_id(&self, kid: &str) -> Result<SigningKey, KeyNotFoundError> {
        if let Some(key) = self.search(kid) {
            return Ok(key);
        }

        tracing::debug!(kid = %kid, "Signing key not cached, refetching");
        if let Err(e) = self.fetch().await {
            tracing::warn!(kid = %kid, error = %e, "Key refetch failed");
        }

        self.search(kid).ok_or_else(|| KeyNotFoundError {
            kid: kid.to_string(),
        })
    }

    /// Spawns a task that refreshes the key set every `interval`.
    ///
    /// Intervals below the configured minimum are raised to it. Fetch errors
    /// are logged and the task keeps running until aborted.
    pub fn spawn_background_polling(&self, interval: Duration) -> JoinHandle<()> {
        let interval = self.effective_poll_interval(interval);
        let directory = self.clone();

        tracing::info!(interval = ?interval, "Starting signing key polling");

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                match directory.fetch().await {
                    Ok(()) => tracing::debug!(keys = directory.len(), "Signing keys refreshed"),
                    Err(e) => tracing::warn!(error = %e, "Background key refresh failed"),
                }
            }
        })
    }

    /// Returns the polling interval actually used for `requested`.
    pub fn effective_poll_interval(&self, requested: Duration) -> Duration {
        requested.max(self.inner.config.min_poll_interval)
    }

    /// Returns the current key snapshot.
    pub fn snapshot(&self) -> Arc<Vec<SigningKey>> {
        self.inner.keys.latest()
    }

    pub fn len(&self) -> usize {
        self.inner.keys.latest().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // First match wins so that duplicate ids resolve deterministically.
    fn search(&self, kid: &str) -> Option<SigningKey> {
        self.inner.keys.latest().iter().find(|k| k.id == kid).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::StaticKeyFetcher;

    fn fast_config() -> DirectoryConfig {
        DirectoryConfig::new()
            .with_fetch_timeout(Duration::from_millis(200))
            .with_min_poll_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_connect_fails_when_initial_fetch_fails() {
        let fetcher = Arc::new(StaticKeyFetcher::failing());
        let result = KeyDirectory::connect(fetcher.clone(), fast_config()).await;

        assert!(result.is_err());
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_known_key_does_not_fetch() {
        let fetcher = Arc::new(StaticKeyFetcher::new(vec![SigningKey::new("a", "PEM-A")]));
        let directory = KeyDirectory::connect(fetcher.clone(), fast_config())
            .await
            .unwrap();

        let key = directory.find_key_by_id("a").await.unwrap();
        assert_eq!(key.pem_body, "PEM-A");
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_key_fetches_exactly_once() {
        let fetcher = Arc::new(StaticKeyFetcher::new(vec![SigningKey::new("a", "PEM-A")]));
        let directory = KeyDirectory::connect(fetcher.clone(), fast_config())
            .await
            .unwrap();

        let err = directory.find_key_by_id("missing").await.unwrap_err();
        assert_eq!(err.kid, "missing");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_key_found_after_refetch() {
        let fetcher = Arc::new(StaticKeyFetcher::new(vec![SigningKey::new("a", "PEM-A")]));
        let directory = KeyDirectory::connect(fetcher.clone(), fast_config())
            .await
            .unwrap();

        fetcher.set_keys(vec![
            SigningKey::new("a", "PEM-A"),
            SigningKey::new("b", "PEM-B"),
        ]);

        let key = directory.find_key_by_id("b").await.unwrap();
        assert_eq!(key.pem_body, "PEM-B");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() {
        let fetcher = Arc::new(StaticKeyFetcher::new(vec![SigningKey::new("a", "PEM-A")]));
        let directory = KeyDirectory::connect(fetcher.clone(), fast_config())
            .await
            .unwrap();

        fetcher.set_failing(true);
        assert!(directory.fetch().await.is_err());

        assert_eq!(directory.len(), 1);
        assert!(directory.find_key_by_id("a").await.is_ok());
    }

    #[tokio::test]
    async fn test_refetch_error_surfaces_as_not_found() {
        let fetcher = Arc::new(StaticKeyFetcher::new(vec![SigningKey::new("a", "PEM-A")]));
        let directory = KeyDirectory::connect(fetcher.clone(), fast_config())
            .await
            .unwrap();

        fetcher.set_failing(true);
        let err = directory.find_key_by_id("b").await.unwrap_err();
        assert_eq!(err, KeyNotFoundError { kid: "b".into() });
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_ids_resolve_to_first() {
        let fetcher = Arc::new(StaticKeyFetcher::new(vec![
            SigningKey::new("a", "FIRST"),
            SigningKey::new("a", "SECOND"),
        ]));
        let directory = KeyDirectory::connect(fetcher, fast_config()).await.unwrap();

        let key = directory.find_key_by_id("a").await.unwrap();
        assert_eq!(key.pem_body, "FIRST");
    }

    #[tokio::test]
    async fn test_slow_fetch_times_out() {
        let fetcher = Arc::new(
            StaticKeyFetcher::new(vec![SigningKey::new("a", "PEM-A")])
                .with_delay(Duration::from_secs(5)),
        );
        let result = KeyDirectory::connect(fetcher, fast_config()).await;
        assert!(matches!(result, Err(KeyFetchError::Timeout(_))));
    }

    #[test]
    fn test_poll_interval_clamped_to_minimum() {
        let directory = tokio_test::block_on(async {
            let fetcher = Arc::new(StaticKeyFetcher::new(vec![]));
            KeyDirectory::connect(fetcher, DirectoryConfig::default())
                .await
                .unwrap()
        });

        assert_eq!(
            directory.effective_poll_interval(Duration::from_secs(5)),
            Duration::from_secs(60)
        );
        assert_eq!(
            directory.effective_poll_interval(Duration::from_secs(900)),
            Duration::from_secs(900)
        );
    }

    #[tokio::test]
    async fn test_background_polling_refreshes_and_survives_errors() {
        let fetcher = Arc::new(StaticKeyFetcher::new(vec![SigningKey::new("a", "PEM-A")]));
        let directory = KeyDirectory::connect(fetcher.clone(), fast_config())
            .await
            .unwrap();

        fetcher.set_failing(true);
        let handle = directory.spawn_background_polling(Duration::from_millis(10));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(directory.len(), 1);

        fetcher.set_failing(false);
        fetcher.set_keys(vec![
            SigningKey::new("a", "PEM-A"),
            SigningKey::new("c", "PEM-C"),
        ]);

        let mut refreshed = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if directory.len() == 2 {
                refreshed = true;
                break;
            }
        }
        handle.abort();

        assert!(refreshed, "polling task stopped after a failed fetch");
        assert!(fetcher.calls() > 2);
    }
}
