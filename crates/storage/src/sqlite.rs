//! SQLite Store

use async_trait::async_trait;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Executor, Row};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::query::{EventFilter, ReadingFilter};
use crate::records::{DetectionSettings, QuakeEvent, Reading};
use crate::store::Store;
use crate::StorageError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS readings (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_ms       INTEGER NOT NULL,
    x                  REAL    NOT NULL,
    y                  REAL    NOT NULL,
    z                  REAL    NOT NULL,
    magnitude          REAL    NOT NULL,
    is_potential_event INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_readings_timestamp ON readings (timestamp_ms);

CREATE TABLE IF NOT EXISTS quake_events (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    start_time_ms     INTEGER NOT NULL,
    end_time_ms       INTEGER NOT NULL CHECK (end_time_ms >= start_time_ms),
    peak_magnitude    REAL    NOT NULL,
    average_magnitude REAL    NOT NULL,
    reading_count     INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_events_start ON quake_events (start_time_ms);

CREATE TABLE IF NOT EXISTS detection_settings (
    id                    INTEGER PRIMARY KEY CHECK (id = 1),
    magnitude_threshold   REAL    NOT NULL,
    min_event_duration_ms INTEGER NOT NULL,
    sampling_rate_hz      REAL    NOT NULL,
    notifications_enabled INTEGER NOT NULL
);
"#;

/// How long a connection waits on a locked database before failing
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const READING_COLUMNS: &str = "id, timestamp_ms, x, y, z, magnitude, is_potential_event";
const EVENT_COLUMNS: &str =
    "id, start_time_ms, end_time_ms, peak_magnitude, average_magnitude, reading_count";

/// Store backed by a SQLite database through sqlx
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `url`, e.g.
    /// `sqlite://quake.db` or `sqlite::memory:`.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // An in-memory database lives and dies with its connection
        let pool = if url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            // Readers re-run on every commit and must not stall the writer
            let options = options
                .journal_mode(SqliteJournalMode::Wal)
                .busy_timeout(BUSY_TIMEOUT);
            SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await?
        };

        let store = Self { pool };
        store.migrate().await?;
        info!("Opened SQLite store at {}", url);
        Ok(store)
    }

    /// Open an in-memory database
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:").await
    }

    /// Create tables and seed the settings singleton
    async fn migrate(&self) -> Result<(), StorageError> {
        self.pool.execute(SCHEMA).await?;

        let defaults = DetectionSettings::default();
        sqlx::query(
            "INSERT OR IGNORE INTO detection_settings \
             (id, magnitude_threshold, min_event_duration_ms, sampling_rate_hz, notifications_enabled) \
             VALUES (1, ?, ?, ?, ?)",
        )
        .bind(defaults.magnitude_threshold)
        .bind(defaults.min_event_duration_ms as i64)
        .bind(defaults.sampling_rate_hz)
        .bind(defaults.notifications_enabled)
        .execute(&self.pool)
        .await?;

        debug!("Schema ready");
        Ok(())
    }

    /// Close the underlying pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn reading_from_row(row: &SqliteRow) -> Result<Reading, sqlx::Error> {
    Ok(Reading {
        id: row.try_get("id")?,
        timestamp_ms: row.try_get("timestamp_ms")?,
        x: row.try_get("x")?,
        y: row.try_get("y")?,
        z: row.try_get("z")?,
        magnitude: row.try_get("magnitude")?,
        is_potential_event: row.try_get("is_potential_event")?,
    })
}

fn event_from_row(row: &SqliteRow) -> Result<QuakeEvent, sqlx::Error> {
    let reading_count: i64 = row.try_get("reading_count")?;
    Ok(QuakeEvent {
        id: row.try_get("id")?,
        start_time_ms: row.try_get("start_time_ms")?,
        end_time_ms: row.try_get("end_time_ms")?,
        peak_magnitude: row.try_get("peak_magnitude")?,
        average_magnitude: row.try_get("average_magnitude")?,
        reading_count: reading_count as u32,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_reading(&self, reading: Reading) -> Result<i64, StorageError> {
        // NULL id lets SQLite assign one
        let id = (reading.id != 0).then_some(reading.id);
        let result = sqlx::query(
            "INSERT INTO readings (id, timestamp_ms, x, y, z, magnitude, is_potential_event) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(reading.timestamp_ms)
        .bind(reading.x)
        .bind(reading.y)
        .bind(reading.z)
        .bind(reading.magnitude)
        .bind(reading.is_potential_event)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("Inserted reading with ID {}", id);
        Ok(id)
    }

    async fn insert_event(&self, event: QuakeEvent) -> Result<i64, StorageError> {
        let id = (event.id != 0).then_some(event.id);
        let result = sqlx::query(
            "INSERT INTO quake_events \
             (id, start_time_ms, end_time_ms, peak_magnitude, average_magnitude, reading_count) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(id)
        .bind(event.start_time_ms)
        .bind(event.end_time_ms)
        .bind(event.peak_magnitude)
        .bind(event.average_magnitude)
        .bind(event.reading_count as i64)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!("Inserted event with ID {}", id);
        Ok(id)
    }

    async fn update_settings(&self, settings: DetectionSettings) -> Result<(), StorageError> {
        let result = sqlx::query(
            "UPDATE detection_settings SET magnitude_threshold = ?, min_event_duration_ms = ?, \
             sampling_rate_hz = ?, notifications_enabled = ? WHERE id = 1",
        )
        .bind(settings.magnitude_threshold)
        .bind(settings.min_event_duration_ms as i64)
        .bind(settings.sampling_rate_hz)
        .bind(settings.notifications_enabled)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }

    async fn delete_readings_older_than(&self, cutoff_ms: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM readings WHERE timestamp_ms < ?")
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;

        debug!("Pruned {} readings older than {}", result.rows_affected(), cutoff_ms);
        Ok(result.rows_affected())
    }

    async fn readings(&self, filter: &ReadingFilter) -> Result<Vec<Reading>, StorageError> {
        let mut sql = format!("SELECT {} FROM readings", READING_COLUMNS);
        sql.push_str(match filter {
            ReadingFilter::All => "",
            ReadingFilter::PotentialEvents => " WHERE is_potential_event = 1",
            ReadingFilter::Between { .. } => " WHERE timestamp_ms BETWEEN ? AND ?",
            ReadingFilter::AboveMagnitude(_) => " WHERE magnitude > ?",
            ReadingFilter::PotentialEventsBetween { .. } => {
                " WHERE is_potential_event = 1 AND timestamp_ms BETWEEN ? AND ?"
            }
        });
        sql.push_str(" ORDER BY timestamp_ms DESC, id DESC");

        let query = match *filter {
            ReadingFilter::Between { start_ms, end_ms }
            | ReadingFilter::PotentialEventsBetween { start_ms, end_ms } => {
                sqlx::query(&sql).bind(start_ms).bind(end_ms)
            }
            ReadingFilter::AboveMagnitude(threshold) => sqlx::query(&sql).bind(threshold),
            ReadingFilter::All | ReadingFilter::PotentialEvents => sqlx::query(&sql),
        };

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(reading_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::from)
    }

    async fn events(&self, filter: &EventFilter) -> Result<Vec<QuakeEvent>, StorageError> {
        let mut sql = format!("SELECT {} FROM quake_events", EVENT_COLUMNS);
        if let EventFilter::Between { .. } = filter {
            sql.push_str(" WHERE start_time_ms BETWEEN ? AND ?");
        }
        sql.push_str(" ORDER BY start_time_ms DESC, id DESC");

        let query = match *filter {
            EventFilter::Between { start_ms, end_ms } => {
                sqlx::query(&sql).bind(start_ms).bind(end_ms)
            }
            EventFilter::All => sqlx::query(&sql),
        };

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(event_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(StorageError::from)
    }

    async fn settings(&self) -> Result<DetectionSettings, StorageError> {
        let row = sqlx::query(
            "SELECT magnitude_threshold, min_event_duration_ms, sampling_rate_hz, \
             notifications_enabled FROM detection_settings WHERE id = 1",
        )
        .fetch_one(&self.pool)
        .await?;

        let min_event_duration_ms: i64 = row.try_get("min_event_duration_ms")?;
        Ok(DetectionSettings {
            magnitude_threshold: row.try_get("magnitude_threshold")?,
            min_event_duration_ms: min_event_duration_ms as u64,
            sampling_rate_hz: row.try_get("sampling_rate_hz")?,
            notifications_enabled: row.try_get("notifications_enabled")?,
        })
    }
}
