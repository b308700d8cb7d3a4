//! Repository Facade

use std::sync::Arc;
use storage::{DetectionSettings, QuakeEvent, Query, QueryOutput, Reading, Store};
use tokio::sync::broadcast;
use tracing::info;

use crate::registry::{LiveQuery, SubscriptionId, SubscriptionRegistry};
use crate::serializer::{WriteFailure, WriteOp, WriteSerializer};
use crate::RepositoryError;

/// Public data-access surface.
///
/// Write methods queue the mutation and return at once. `observe_*`
/// methods return live handles; snapshots are one-shot reads ordered after
/// every write submitted before them.
pub struct Repository {
    writer: WriteSerializer,
    registry: SubscriptionRegistry,
}

impl Repository {
    /// Build the repository around a store handle. Must be called inside a
    /// tokio runtime: the write worker is spawned here.
    pub fn new(store: Arc<dyn Store>) -> Self {
        let writer = WriteSerializer::spawn(store.clone());
        let registry = SubscriptionRegistry::new(store, writer.commits());
        info!("Repository ready");
        Self { writer, registry }
    }

    // --- Writes ---

    /// Queue a sensor reading
    pub fn insert_reading(&self, reading: Reading) {
        self.writer.submit(WriteOp::InsertReading(reading));
    }

    /// Queue a detected quake event
    pub fn insert_event(&self, event: QuakeEvent) {
        self.writer.submit(WriteOp::InsertEvent(event));
    }

    /// Queue a replacement of the detection settings
    pub fn update_settings(&self, settings: DetectionSettings) {
        self.writer.submit(WriteOp::UpdateSettings(settings));
    }

    /// Queue deletion of readings with `timestamp_ms < older_than_ms`
    pub fn prune_readings_older_than(&self, older_than_ms: i64) {
        self.writer.submit(WriteOp::PruneReadings { older_than_ms });
    }

    // --- Live queries ---

    /// Every reading, newest first
    pub async fn observe_all_readings(&self) -> Result<LiveQuery<Vec<Reading>>, RepositoryError> {
        self.registry.subscribe(Query::ALL_READINGS).await
    }

    /// Readings flagged as potential events
    pub async fn observe_potential_events(
        &self,
    ) -> Result<LiveQuery<Vec<Reading>>, RepositoryError> {
        self.registry.subscribe(Query::POTENTIAL_EVENTS).await
    }

    /// Readings with `start_ms <= timestamp_ms <= end_ms`
    pub async fn observe_readings_between(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<LiveQuery<Vec<Reading>>, RepositoryError> {
        self.registry
            .subscribe(Query::readings_between(start_ms, end_ms))
            .await
    }

    /// Readings with `magnitude > threshold`
    pub async fn observe_readings_above_magnitude(
        &self,
        threshold: f64,
    ) -> Result<LiveQuery<Vec<Reading>>, RepositoryError> {
        self.registry
            .subscribe(Query::readings_above_magnitude(threshold))
            .await
    }

    /// Flagged readings within `start_ms..=end_ms`
    pub async fn observe_potential_events_between(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<LiveQuery<Vec<Reading>>, RepositoryError> {
        self.registry
            .subscribe(Query::potential_events_between(start_ms, end_ms))
            .await
    }

    /// Every quake event, newest first
    pub async fn observe_all_events(&self) -> Result<LiveQuery<Vec<QuakeEvent>>, RepositoryError> {
        self.registry.subscribe(Query::ALL_EVENTS).await
    }

    /// Events whose start time falls within `start_ms..=end_ms`
    pub async fn observe_events_between(
        &self,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<LiveQuery<Vec<QuakeEvent>>, RepositoryError> {
        self.registry
            .subscribe(Query::events_between(start_ms, end_ms))
            .await
    }

    /// The detection settings singleton
    pub async fn observe_settings(&self) -> Result<LiveQuery<DetectionSettings>, RepositoryError> {
        self.registry.subscribe(Query::Settings).await
    }

    /// Subscribe to any query shape
    pub async fn observe<T: QueryOutput>(
        &self,
        query: Query,
    ) -> Result<LiveQuery<T>, RepositoryError> {
        self.registry.subscribe(query).await
    }

    // --- Snapshots ---

    /// Current settings, including every settings write queued before this call
    pub async fn settings_snapshot(&self) -> Result<DetectionSettings, RepositoryError> {
        self.snapshot(Query::Settings).await
    }

    /// One-shot read ordered after previously queued writes
    pub async fn snapshot<T: QueryOutput>(&self, query: Query) -> Result<T, RepositoryError> {
        self.writer.flush().await?;
        self.registry.query_once(query).await
    }

    // --- Control ---

    /// Wait until every queued write has been applied or has failed
    pub async fn flush(&self) -> Result<(), RepositoryError> {
        self.writer.flush().await
    }

    /// Failed writes, as they happen
    pub fn write_failures(&self) -> broadcast::Receiver<WriteFailure> {
        self.writer.failures()
    }

    /// Live subscriptions, ordered by id
    pub fn active_subscriptions(&self) -> Vec<(SubscriptionId, Query)> {
        self.registry.active_queries()
    }

    /// Drain the write queue and stop the worker. Live handles report
    /// [`RepositoryError::Closed`] afterwards.
    pub async fn shutdown(self) {
        info!("Shutting down repository");
        self.writer.shutdown().await;
    }
}
