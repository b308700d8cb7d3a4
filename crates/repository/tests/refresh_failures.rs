//! Live query behavior when store reads fail or stall.

use async_trait::async_trait;
use repository::{Repository, RepositoryError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use storage::{
    DetectionSettings, EventFilter, MemoryStore, QuakeEvent, Query, Reading, ReadingFilter,
    StorageError, Store,
};
use tokio::sync::Notify;

/// Memory store whose reading queries can be made to fail or to block
#[derive(Default)]
struct ControlledStore {
    inner: MemoryStore,
    failing: AtomicBool,
    gated: AtomicBool,
    entered: Notify,
    release: Notify,
    failed_reads: AtomicUsize,
    finished_reads: AtomicUsize,
}

#[async_trait]
impl Store for ControlledStore {
    async fn insert_reading(&self, reading: Reading) -> Result<i64, StorageError> {
        self.inner.insert_reading(reading).await
    }

    async fn insert_event(&self, event: QuakeEvent) -> Result<i64, StorageError> {
        self.inner.insert_event(event).await
    }

    async fn update_settings(&self, settings: DetectionSettings) -> Result<(), StorageError> {
        self.inner.update_settings(settings).await
    }

    async fn delete_readings_older_than(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        self.inner.delete_readings_older_than(cutoff_ms).await
    }

    async fn readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>, StorageError> {
        if self.gated.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            self.failed_reads.fetch_add(1, Ordering::SeqCst);
            return Err(StorageError::DatabaseError("disk unavailable".to_string()));
        }
        let result = self.inner.readings(filter).await;
        self.finished_reads.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn events(&self, filter: &EventFilter) -> Result<Vec<QuakeEvent>, StorageError> {
        self.inner.events(filter).await
    }

    async fn settings(&self) -> Result<DetectionSettings, StorageError> {
        self.inner.settings().await
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_failed_refresh_is_skipped_then_retried() {
    let store = Arc::new(ControlledStore::default());
    let repo = Repository::new(store.clone());
    let mut live = repo.observe_all_readings().await.unwrap();
    assert!(live.current().is_empty());

    store.failing.store(true, Ordering::SeqCst);
    repo.insert_reading(Reading::new(100, 0.0, 0.0, 1.0));
    repo.flush().await.unwrap();
    wait_until(|| store.failed_reads.load(Ordering::SeqCst) >= 1).await;

    // Nothing delivered for the failed cycle
    assert!(!live.has_changed());
    assert!(live.current().is_empty());

    let snapshot: Result<Vec<Reading>, _> = repo.snapshot(Query::ALL_READINGS).await;
    assert!(matches!(
        snapshot,
        Err(RepositoryError::Storage(StorageError::DatabaseError(_)))
    ));

    store.failing.store(false, Ordering::SeqCst);
    repo.insert_reading(Reading::new(200, 0.0, 0.0, 1.0));

    let readings = live.changed().await.unwrap();
    assert_eq!(readings.len(), 2);
    assert_eq!(repo.active_subscriptions().len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_during_refresh() {
    let store = Arc::new(ControlledStore::default());
    let repo = Repository::new(store.clone());
    let live = repo.observe_all_readings().await.unwrap();
    let reads_before = store.finished_reads.load(Ordering::SeqCst);
    // Test handle, writer and registry
    let idle_refs = Arc::strong_count(&store) - 1;

    store.gated.store(true, Ordering::SeqCst);
    repo.insert_reading(Reading::new(100, 0.0, 0.0, 1.0));
    store.entered.notified().await;

    drop(live);
    assert!(repo.active_subscriptions().is_empty());

    store.gated.store(false, Ordering::SeqCst);
    store.release.notify_one();

    // The stalled evaluation completes, its result is discarded and the
    // refresh task lets go of the store
    wait_until(|| store.finished_reads.load(Ordering::SeqCst) > reads_before).await;
    wait_until(|| Arc::strong_count(&store) == idle_refs).await;
    assert!(repo.active_subscriptions().is_empty());

    // The repository keeps serving
    let all: Vec<Reading> = repo.snapshot(Query::ALL_READINGS).await.unwrap();
    assert_eq!(all.len(), 1);
}
