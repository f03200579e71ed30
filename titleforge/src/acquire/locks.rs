//! Per-acquisition mutual exclusion.
//!
//! Exactly one acquisition may run for a given (working directory,
//! title id, version) triple at a time; a second request for the same
//! triple waits for the first and then observes its artifacts on disk.
//! Different versions of the same title proceed independently.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::title::TitleId;

type LockKey = (PathBuf, TitleId, u32);

/// Registry of in-flight acquisition locks.
#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for one (working dir, title, version) triple,
    /// waiting if another acquisition holds it.
    pub async fn acquire(
        &self,
        working_dir: &Path,
        title_id: TitleId,
        version: u32,
    ) -> AcquisitionGuard {
        let key = (working_dir.to_path_buf(), title_id, version);
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock_owned().await;
        AcquisitionGuard { _guard: guard }
    }
}

/// Held for the duration of one acquisition; releasing it wakes the
/// next waiter for the same triple.
pub struct AcquisitionGuard {
    _guard: OwnedMutexGuard<()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn title() -> TitleId {
        TitleId::from_hex("0100000000001000").unwrap()
    }

    #[tokio::test]
    async fn test_same_triple_is_exclusive() {
        let registry = Arc::new(LockRegistry::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let running = running.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _guard = registry.acquire(Path::new("/work"), title(), 65536).await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_versions_run_concurrently() {
        let registry = Arc::new(LockRegistry::new());
        let _v1 = registry.acquire(Path::new("/work"), title(), 65536).await;

        // A different version must not block behind v1's guard.
        let second = tokio::time::timeout(
            Duration::from_millis(100),
            registry.acquire(Path::new("/work"), title(), 131072),
        )
        .await;
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn test_distinct_working_dirs_run_concurrently() {
        let registry = Arc::new(LockRegistry::new());
        let _a = registry.acquire(Path::new("/a"), title(), 0).await;

        let second = tokio::time::timeout(
            Duration::from_millis(100),
            registry.acquire(Path::new("/b"), title(), 0),
        )
        .await;
        assert!(second.is_ok());
    }
}
