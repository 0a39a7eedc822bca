//! Atomically replaceable immutable snapshots.
//!
//! Readers get an `Arc` to the value that was current at the time of the
//! call and keep it for as long as they like. Writers install a whole new
//! value; nothing is ever mutated in place.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwap;

/// Holder of an immutable value that can be swapped out atomically.
///
/// Cloning the container yields another handle to the same slot.
pub struct SnapshotContainer<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> SnapshotContainer<T> {
    /// Creates a container holding `initial`.
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(initial)),
        }
    }

    /// Returns the most recently installed value.
    ///
    /// This is a single atomic load and never waits on writers.
    pub fn latest(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Installs `value`, replacing the previous snapshot.
    ///
    /// Readers still holding the old `Arc` keep seeing the old value.
    pub fn replace_with(&self, value: T) {
        self.inner.store(Arc::new(value));
    }
}

impl<T> Clone for SnapshotContainer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for SnapshotContainer<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for SnapshotContainer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnapshotContainer")
            .field("latest", &self.latest())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_returns_initial_value() {
        let container = SnapshotContainer::new(vec![1, 2, 3]);
        assert_eq!(*container.latest(), vec![1, 2, 3]);
    }

    #[test]
    fn test_replace_does_not_affect_held_snapshot() {
        let container = SnapshotContainer::new(String::from("old"));
        let held = container.latest();

        container.replace_with(String::from("new"));

        assert_eq!(held.as_str(), "old");
        assert_eq!(container.latest().as_str(), "new");
    }

    #[test]
    fn test_clones_share_the_slot() {
        let a = SnapshotContainer::new(1u32);
        let b = a.clone();
        b.replace_with(2);
        assert_eq!(*a.latest(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_readers_see_whole_values() {
        // Each snapshot is a vector whose entries all equal its generation.
        let container = SnapshotContainer::new(vec![0u64; 64]);

        let writer = {
            let container = container.clone();
            tokio::spawn(async move {
                for generation in 1..=200u64 {
                    container.replace_with(vec![generation; 64]);
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..8 {
            let container = container.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..500 {
                    let snapshot = container.latest();
                    let first = snapshot[0];
                    assert!(snapshot.iter().all(|v| *v == first));
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }
        assert_eq!(container.latest()[0], 200);
    }
}
