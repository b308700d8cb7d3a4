//! In-Memory Store

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::query::{newest_event_first, newest_reading_first, EventFilter, ReadingFilter};
use crate::records::{DetectionSettings, QuakeEvent, Reading};
use crate::store::Store;
use crate::StorageError;

/// Collections guarded together so every write is applied atomically
#[derive(Debug, Default)]
struct Tables {
    readings: BTreeMap<i64, Reading>,
    events: BTreeMap<i64, QuakeEvent>,
    settings: DetectionSettings,
    next_reading_id: i64,
    next_event_id: i64,
}

/// Store backed by process memory
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store with default settings
    pub fn new() -> Self {
        Self::with_settings(DetectionSettings::default())
    }

    /// Create an empty store seeded with the given settings
    pub fn with_settings(settings: DetectionSettings) -> Self {
        info!("Creating in-memory store");
        Self {
            tables: RwLock::new(Tables {
                settings,
                next_reading_id: 1,
                next_event_id: 1,
                ..Default::default()
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, StorageError> {
        self.tables.read().map_err(|_| StorageError::LockPoisoned)
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, StorageError> {
        self.tables.write().map_err(|_| StorageError::LockPoisoned)
    }

    /// Total number of stored readings
    pub fn reading_count(&self) -> usize {
        self.tables.read().map(|t| t.readings.len()).unwrap_or(0)
    }

    /// Total number of stored events
    pub fn event_count(&self) -> usize {
        self.tables.read().map(|t| t.events.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_reading(&self, mut reading: Reading) -> Result<i64, StorageError> {
        let mut tables = self.write()?;

        if reading.id == 0 {
            reading.id = tables.next_reading_id;
        } else if tables.readings.contains_key(&reading.id) {
            return Err(StorageError::Constraint(format!(
                "reading {} already exists",
                reading.id
            )));
        }
        tables.next_reading_id = tables.next_reading_id.max(reading.id + 1);

        let id = reading.id;
        tables.readings.insert(id, reading);
        debug!("Inserted reading with ID {}", id);
        Ok(id)
    }

    async fn insert_event(&self, mut event: QuakeEvent) -> Result<i64, StorageError> {
        if event.end_time_ms < event.start_time_ms {
            return Err(StorageError::Constraint(format!(
                "event ends at {} before it starts at {}",
                event.end_time_ms, event.start_time_ms
            )));
        }

        let mut tables = self.write()?;

        if event.id == 0 {
            event.id = tables.next_event_id;
        } else if tables.events.contains_key(&event.id) {
            return Err(StorageError::Constraint(format!(
                "event {} already exists",
                event.id
            )));
        }
        tables.next_event_id = tables.next_event_id.max(event.id + 1);

        let id = event.id;
        tables.events.insert(id, event);
        debug!("Inserted event with ID {}", id);
        Ok(id)
    }

    async fn update_settings(&self, settings: DetectionSettings) -> Result<(), StorageError> {
        self.write()?.settings = settings;
        Ok(())
    }

    async fn delete_readings_older_than(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        let mut tables = self.write()?;
        let before = tables.readings.len();
        tables.readings.retain(|_, r| r.timestamp_ms >= cutoff_ms);
        let removed = (before - tables.readings.len()) as u64;
        debug!("Pruned {} readings older than {}", removed, cutoff_ms);
        Ok(removed)
    }

    async fn readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>, StorageError> {
        let tables = self.read()?;
        let mut selected: Vec<_> = tables
            .readings
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        selected.sort_by(newest_reading_first);
        Ok(selected)
    }

    async fn events(&self, filter: &EventFilter) -> Result<Vec<QuakeEvent>, StorageError> {
        let tables = self.read()?;
        let mut selected: Vec<_> = tables
            .events
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        selected.sort_by(newest_event_first);
        Ok(selected)
    }

    async fn settings(&self) -> Result<DetectionSettings, StorageError> {
        Ok(self.read()?.settings.clone())
    }
}
