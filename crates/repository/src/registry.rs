//! Live Query Subscriptions
//!
//! Each subscription owns a refresh task that waits on the serializer's
//! commit counter and re-runs its query after every committed write. There
//! is no dependency tracking between write kinds and queries: every live
//! query is re-evaluated on every commit. Results are published through a
//! `watch` channel, so a slow consumer only ever sees the latest value.

use metrics::gauge;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use storage::{Query, QueryOutput, Store};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::RepositoryError;

pub type SubscriptionId = u64;

type ActiveSet = Arc<Mutex<HashMap<SubscriptionId, Query>>>;

/// Tracks live queries and spawns their refresh tasks
pub struct SubscriptionRegistry {
    store: Arc<dyn Store>,
    commits: watch::Receiver<u64>,
    active: ActiveSet,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    /// Create a registry that refreshes on every change of `commits`
    pub fn new(store: Arc<dyn Store>, commits: watch::Receiver<u64>) -> Self {
        Self {
            store,
            commits,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a live query.
    ///
    /// The query is evaluated before this returns and that result is the
    /// handle's first value. An error here means the initial evaluation
    /// failed and nothing was registered.
    pub async fn subscribe<T: QueryOutput>(
        &self,
        query: Query,
    ) -> Result<LiveQuery<T>, RepositoryError> {
        let mut commits = self.commits.clone();
        // Commits from here on trigger a refresh, so nothing between this
        // point and the initial read can be missed
        commits.borrow_and_update();

        let initial: T = evaluate(self.store.as_ref(), &query).await?;
        let (tx, rx) = watch::channel(initial);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut active = self.active.lock().map_err(|_| {
                RepositoryError::Storage(storage::StorageError::LockPoisoned)
            })?;
            active.insert(id, query);
            gauge!("quake_active_subscriptions").set(active.len() as f64);
        }

        tokio::spawn(refresh(
            id,
            query,
            self.store.clone(),
            commits,
            tx,
            self.active.clone(),
        ));
        debug!("Subscription {} registered for {}", id, query);

        Ok(LiveQuery {
            id,
            query,
            rx,
            active: self.active.clone(),
        })
    }

    /// One-shot read, no subscription
    pub async fn query_once<T: QueryOutput>(&self, query: Query) -> Result<T, RepositoryError> {
        evaluate(self.store.as_ref(), &query).await
    }

    /// Number of live subscriptions
    pub fn active_count(&self) -> usize {
        self.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Live subscriptions and their queries, ordered by id
    pub fn active_queries(&self) -> Vec<(SubscriptionId, Query)> {
        let mut queries: Vec<_> = self
            .active
            .lock()
            .map(|a| a.iter().map(|(id, q)| (*id, *q)).collect())
            .unwrap_or_default();
        queries.sort_by_key(|(id, _)| *id);
        queries
    }
}

async fn evaluate<T: QueryOutput>(store: &dyn Store, query: &Query) -> Result<T, RepositoryError> {
    let result = store.evaluate(query).await?;
    T::from_result(result).ok_or(RepositoryError::UnexpectedResult { query: *query })
}

fn release(active: &Mutex<HashMap<SubscriptionId, Query>>, id: SubscriptionId) {
    if let Ok(mut active) = active.lock() {
        if active.remove(&id).is_some() {
            debug!("Subscription {} released", id);
            gauge!("quake_active_subscriptions").set(active.len() as f64);
        }
    }
}

async fn refresh<T: QueryOutput>(
    id: SubscriptionId,
    query: Query,
    store: Arc<dyn Store>,
    mut commits: watch::Receiver<u64>,
    tx: watch::Sender<T>,
    active: ActiveSet,
) {
    loop {
        tokio::select! {
            _ = tx.closed() => break,
            changed = commits.changed() => {
                if changed.is_err() {
                    debug!("Serializer gone, ending subscription {}", id);
                    break;
                }

                // Runs to completion even if the handle is dropped meanwhile;
                // the value then lands in a closed channel and is discarded
                match evaluate::<T>(store.as_ref(), &query).await {
                    Ok(value) => {
                        tx.send_if_modified(|current| {
                            if *current == value {
                                false
                            } else {
                                *current = value;
                                true
                            }
                        });
                    }
                    Err(e) => warn!("Subscription {} ({}) skipped refresh: {}", id, query, e),
                }
            }
        }
    }

    release(&active, id);
}

/// Live handle to a query result.
///
/// Holds the latest evaluated value. Dropping the handle unsubscribes.
pub struct LiveQuery<T> {
    id: SubscriptionId,
    query: Query,
    rx: watch::Receiver<T>,
    active: ActiveSet,
}

impl<T: QueryOutput> LiveQuery<T> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn query(&self) -> Query {
        self.query
    }

    /// Latest delivered value
    pub fn current(&self) -> T {
        self.rx.borrow().clone()
    }

    /// Whether a value newer than the last one read is waiting
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Wait for the next superseding value.
    ///
    /// Intermediate results may be skipped; only the latest is returned.
    pub async fn changed(&mut self) -> Result<T, RepositoryError> {
        self.rx.changed().await.map_err(|_| RepositoryError::Closed)?;
        Ok(self.rx.borrow_and_update().clone())
    }

    /// Stop receiving updates
    pub fn unsubscribe(self) {}
}

impl<T> Drop for LiveQuery<T> {
    fn drop(&mut self) {
        release(&self.active, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::{WriteOp, WriteSerializer};
    use std::time::Duration;
    use storage::{MemoryStore, Reading};

    fn setup() -> (WriteSerializer, SubscriptionRegistry) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let writer = WriteSerializer::spawn(store.clone());
        let registry = SubscriptionRegistry::new(store, writer.commits());
        (writer, registry)
    }

    #[tokio::test]
    async fn test_initial_value_then_refresh() {
        let (writer, registry) = setup();
        let mut live = registry
            .subscribe::<Vec<Reading>>(Query::ALL_READINGS)
            .await
            .unwrap();
        assert!(live.current().is_empty());

        writer.submit(WriteOp::InsertReading(Reading::new(100, 0.0, 0.0, 1.0)));
        let readings = live.changed().await.unwrap();
        assert_eq!(readings.len(), 1);
        assert_eq!(live.current(), readings);
    }

    #[tokio::test]
    async fn test_unchanged_result_not_redelivered() {
        let (writer, registry) = setup();
        let mut live = registry
            .subscribe::<Vec<Reading>>(Query::POTENTIAL_EVENTS)
            .await
            .unwrap();

        writer.submit(WriteOp::InsertReading(Reading::new(100, 0.0, 0.0, 1.0)));
        writer.flush().await.unwrap();

        let waited = tokio::time::timeout(Duration::from_millis(100), live.changed()).await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_unsubscribe_releases() {
        let (_writer, registry) = setup();
        let first = registry.subscribe::<Vec<Reading>>(Query::ALL_READINGS).await.unwrap();
        let second = registry
            .subscribe::<storage::DetectionSettings>(Query::Settings)
            .await
            .unwrap();
        assert_eq!(registry.active_count(), 2);

        first.unsubscribe();
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.active_queries(), vec![(second.id(), Query::Settings)]);

        drop(second);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_wrong_output_type_rejected() {
        let (_writer, registry) = setup();
        let result = registry.subscribe::<Vec<Reading>>(Query::Settings).await;
        assert!(matches!(result, Err(RepositoryError::UnexpectedResult { .. })));
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_after_shutdown() {
        let (writer, registry) = setup();
        let mut live = registry.subscribe::<Vec<Reading>>(Query::ALL_READINGS).await.unwrap();

        writer.shutdown().await;
        assert!(matches!(live.changed().await, Err(RepositoryError::Closed)));
    }
}
