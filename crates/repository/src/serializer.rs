//! Write Serializer
//!
//! One worker task owns the store's write path. Operations are queued on an
//! unbounded channel and applied strictly in arrival order, each awaited to
//! completion before the next starts.

use metrics::counter;
use std::sync::Arc;
use storage::{DetectionSettings, QuakeEvent, Reading, StorageError, Store};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::RepositoryError;

/// Buffered failures per status subscriber before the oldest are dropped
const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// A mutation accepted by the serializer
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    InsertReading(Reading),
    InsertEvent(QuakeEvent),
    UpdateSettings(DetectionSettings),
    PruneReadings { older_than_ms: i64 },
}

impl WriteOp {
    /// Short operation name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            WriteOp::InsertReading(_) => "insert_reading",
            WriteOp::InsertEvent(_) => "insert_event",
            WriteOp::UpdateSettings(_) => "update_settings",
            WriteOp::PruneReadings { .. } => "prune_readings",
        }
    }
}

/// A write the store rejected; the operation was dropped
#[derive(Debug, Clone)]
pub struct WriteFailure {
    pub op: WriteOp,
    pub error: StorageError,
}

enum Command {
    Apply(WriteOp),
    /// Acknowledged once every earlier command has been processed
    Flush(oneshot::Sender<()>),
}

/// Handle to the single-writer worker
pub struct WriteSerializer {
    tx: mpsc::UnboundedSender<Command>,
    commits: watch::Receiver<u64>,
    failures: broadcast::Sender<WriteFailure>,
    worker: JoinHandle<()>,
}

impl WriteSerializer {
    /// Spawn the worker task on the current tokio runtime
    pub fn spawn(store: Arc<dyn Store>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (commit_tx, commits) = watch::channel(0);
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        let worker = tokio::spawn(run(store, rx, commit_tx, failures.clone()));

        Self {
            tx,
            commits,
            failures,
            worker,
        }
    }

    /// Queue a write and return immediately
    pub fn submit(&self, op: WriteOp) {
        let kind = op.kind();
        if self.tx.send(Command::Apply(op)).is_err() {
            error!("Write serializer stopped, dropping {}", kind);
        } else {
            debug!("Queued {}", kind);
        }
    }

    /// Wait until every write submitted before this call has been processed
    pub async fn flush(&self) -> Result<(), RepositoryError> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(Command::Flush(done_tx))
            .map_err(|_| RepositoryError::Closed)?;
        done_rx.await.map_err(|_| RepositoryError::Closed)
    }

    /// Commit counter, bumped after every successfully applied write
    pub fn commits(&self) -> watch::Receiver<u64> {
        self.commits.clone()
    }

    /// Number of writes applied so far
    pub fn committed(&self) -> u64 {
        *self.commits.borrow()
    }

    /// Subscribe to write failures
    pub fn failures(&self) -> broadcast::Receiver<WriteFailure> {
        self.failures.subscribe()
    }

    /// Close the queue, drain what is already queued and join the worker
    pub async fn shutdown(self) {
        let WriteSerializer { tx, worker, .. } = self;
        drop(tx);
        if let Err(e) = worker.await {
            error!("Write serializer task failed: {}", e);
        }
    }
}

async fn apply(store: &dyn Store, op: WriteOp) -> Result<(), StorageError> {
    match op {
        WriteOp::InsertReading(reading) => store.insert_reading(reading).await.map(drop),
        WriteOp::InsertEvent(event) => store.insert_event(event).await.map(drop),
        WriteOp::UpdateSettings(settings) => store.update_settings(settings).await,
        WriteOp::PruneReadings { older_than_ms } => {
            let removed = store.delete_readings_older_than(older_than_ms).await?;
            debug!("Pruned {} readings", removed);
            Ok(())
        }
    }
}

async fn run(
    store: Arc<dyn Store>,
    mut rx: mpsc::UnboundedReceiver<Command>,
    commits: watch::Sender<u64>,
    failures: broadcast::Sender<WriteFailure>,
) {
    info!("Starting write serializer");

    while let Some(command) = rx.recv().await {
        let op = match command {
            Command::Apply(op) => op,
            Command::Flush(done) => {
                let _ = done.send(());
                continue;
            }
        };

        match apply(store.as_ref(), op.clone()).await {
            Ok(()) => {
                counter!("quake_writes_applied_total").increment(1);
                commits.send_modify(|seq| *seq += 1);
            }
            Err(e) => {
                counter!("quake_writes_failed_total").increment(1);
                error!("{} failed: {}", op.kind(), e);
                // Nobody listening is fine
                let _ = failures.send(WriteFailure { op, error: e });
            }
        }
    }

    info!("Write serializer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use storage::{EventFilter, MemoryStore, ReadingFilter};

    /// Wraps a store and records overlap between write calls
    struct CountingStore {
        inner: MemoryStore,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        applied: Mutex<Vec<i64>>,
    }

    impl CountingStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                applied: Mutex::new(Vec::new()),
            }
        }

        async fn enter(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::task::yield_now().await;
        }

        fn exit(&self) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl Store for CountingStore {
        async fn insert_reading(&self, reading: Reading) -> Result<i64, StorageError> {
            self.enter().await;
            self.applied.lock().unwrap().push(reading.timestamp_ms);
            let result = self.inner.insert_reading(reading).await;
            self.exit();
            result
        }

        async fn insert_event(&self, event: QuakeEvent) -> Result<i64, StorageError> {
            self.enter().await;
            let result = self.inner.insert_event(event).await;
            self.exit();
            result
        }

        async fn update_settings(&self, settings: DetectionSettings) -> Result<(), StorageError> {
            self.enter().await;
            let result = self.inner.update_settings(settings).await;
            self.exit();
            result
        }

        async fn delete_readings_older_than(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
            self.enter().await;
            let result = self.inner.delete_readings_older_than(cutoff_ms).await;
            self.exit();
            result
        }

        async fn readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>, StorageError> {
            self.inner.readings(filter).await
        }

        async fn events(&self, filter: &EventFilter) -> Result<Vec<QuakeEvent>, StorageError> {
            self.inner.events(filter).await
        }

        async fn settings(&self) -> Result<DetectionSettings, StorageError> {
            self.inner.settings().await
        }
    }

    fn reading(ts: i64) -> WriteOp {
        WriteOp::InsertReading(Reading::new(ts, 0.0, 0.0, 1.0))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_one_write_in_flight() {
        let store = Arc::new(CountingStore::new());
        let writer = Arc::new(WriteSerializer::spawn(store.clone()));

        let mut callers = Vec::new();
        for caller in 0..4i64 {
            let writer = writer.clone();
            callers.push(tokio::spawn(async move {
                for i in 0..50 {
                    writer.submit(reading(caller * 1000 + i));
                }
            }));
        }
        for caller in callers {
            caller.await.unwrap();
        }
        writer.flush().await.unwrap();

        assert_eq!(store.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(writer.committed(), 200);

        // Each caller's writes appear in its own submission order
        let applied = store.applied.lock().unwrap().clone();
        for caller in 0..4i64 {
            let mine: Vec<_> = applied.iter().filter(|ts| **ts / 1000 == caller).collect();
            assert!(mine.windows(2).all(|w| w[0] < w[1]));
            assert_eq!(mine.len(), 50);
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_queue() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteSerializer::spawn(store.clone());
        let mut failures = writer.failures();

        let bad_event = QuakeEvent {
            id: 0,
            start_time_ms: 500,
            end_time_ms: 100,
            peak_magnitude: 1.0,
            average_magnitude: 1.0,
            reading_count: 1,
        };
        writer.submit(WriteOp::InsertEvent(bad_event));
        writer.submit(reading(100));
        writer.flush().await.unwrap();

        let failure = failures.recv().await.unwrap();
        assert_eq!(failure.op.kind(), "insert_event");
        assert!(matches!(failure.error, StorageError::Constraint(_)));

        assert_eq!(store.reading_count(), 1);
        assert_eq!(writer.committed(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteSerializer::spawn(store.clone());

        for ts in 0..10 {
            writer.submit(reading(ts));
        }
        writer.shutdown().await;

        assert_eq!(store.reading_count(), 10);
    }

    #[tokio::test]
    async fn test_prune_op() {
        let store = Arc::new(MemoryStore::new());
        let writer = WriteSerializer::spawn(store.clone());

        writer.submit(reading(100));
        writer.submit(reading(200));
        writer.submit(WriteOp::PruneReadings { older_than_ms: 150 });
        writer.flush().await.unwrap();

        let left = store.readings(&ReadingFilter::All).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].timestamp_ms, 200);
    }
}
