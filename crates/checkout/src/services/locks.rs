//! Per-payment processing locks.
//!
//! Confirmations for the same provider reference are serialized within a
//! process. Across processes the compare-and-swap status update in the
//! session repository decides the winner.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Idle locks are evicted after this long.
const LOCK_IDLE: Duration = Duration::from_secs(600);

/// Registry of async mutexes keyed by provider reference.
#[derive(Clone)]
pub struct SessionLocks {
    locks: Cache<String, Arc<Mutex<()>>>,
}

impl SessionLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::with_idle(LOCK_IDLE)
    }

    #[must_use]
    pub fn with_idle(idle: Duration) -> Self {
        let locks = Cache::builder()
            .max_capacity(10_000)
            .time_to_idle(idle)
            .build();
        Self { locks }
    }

    /// Wait for and hold the lock for `reference`.
    pub async fn acquire(&self, reference: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .get_with(reference.to_owned(), async { Arc::new(Mutex::new(())) })
            .await;
        lock.lock_owned().await
    }
}

impl Default for SessionLocks {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_same_reference_is_serialized() {
        let locks = SessionLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    let _guard = locks.acquire("REF-1").await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for task in tasks {
            assert!(task.await.is_ok());
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_references_do_not_block() {
        let locks = SessionLocks::new();
        let _a = locks.acquire("REF-A").await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.acquire("REF-B")).await;
        assert!(b.is_ok());
    }
}
