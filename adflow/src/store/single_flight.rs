//! Per-key serialization of cache misses.

use super::ArtifactKey;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<ArtifactKey, Arc<Mutex<()>>>;

/// Lets only one caller at a time compute a given key.
///
/// A second caller for the same key waits until the first releases its
/// guard, then re-checks the store and finds the stored artifact.
#[derive(Debug, Default, Clone)]
pub struct SingleFlight {
    locks: Arc<LockMap>,
}

/// Held while computing one key. Dropping it admits the next caller.
#[derive(Debug)]
pub struct FlightGuard {
    key: ArtifactKey,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl SingleFlight {
    /// Creates an empty group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to a key.
    pub async fn acquire(&self, key: &ArtifactKey) -> FlightGuard {
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        FlightGuard {
            key: key.clone(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or awaited.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let flight = SingleFlight::new();
        let key = ArtifactKey::new(StageId::Upscale, "h");
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flight = flight.clone();
            let key = key.clone();
            let active = active.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _guard = flight.acquire(&key).await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(flight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let flight = SingleFlight::new();
        let _a = flight.acquire(&ArtifactKey::new(StageId::Upscale, "a")).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            flight.acquire(&ArtifactKey::new(StageId::Upscale, "b")),
        )
        .await;
        assert!(b.is_ok());
        assert_eq!(flight.in_flight(), 2);
    }
}
