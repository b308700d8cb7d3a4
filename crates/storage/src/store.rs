//! Store Trait

use async_trait::async_trait;

use crate::query::{EventFilter, Query, QueryResult, ReadingFilter};
use crate::records::{DetectionSettings, QuakeEvent, Reading};
use crate::StorageError;

/// Durable keyed collections for readings, events and settings.
///
/// Each call is one unit of work: a write is either fully visible to later
/// reads or not at all, and a read observes a single committed state.
/// Implementations must allow concurrent readers.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Insert a reading, returning its assigned id
    async fn insert_reading(&self, reading: Reading) -> Result<i64, StorageError>;

    /// Insert a quake event, returning its assigned id
    async fn insert_event(&self, event: QuakeEvent) -> Result<i64, StorageError>;

    /// Replace the settings singleton
    async fn update_settings(&self, settings: DetectionSettings) -> Result<(), StorageError>;

    /// Delete readings with `timestamp_ms < cutoff_ms`, returning how many were removed
    async fn delete_readings_older_than(&self, cutoff_ms: i64) -> Result<u64, StorageError>;

    async fn readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>, StorageError>;

    async fn events(&self, filter: &EventFilter) -> Result<Vec<QuakeEvent>, StorageError>;

    async fn settings(&self) -> Result<DetectionSettings, StorageError>;

    /// Evaluate a query descriptor
    async fn evaluate(&self, query: &Query) -> Result<QueryResult, StorageError> {
        match query {
            Query::Readings(filter) => self.readings(filter).await.map(QueryResult::Readings),
            Query::Events(filter) => self.events(filter).await.map(QueryResult::Events),
            Query::Settings => self.settings().await.map(QueryResult::Settings),
        }
    }
}
