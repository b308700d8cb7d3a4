//! JSON-Lines Ingest
//!
//! One record per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"reading","timestamp_ms":1700000000000,"x":0.1,"y":0.0,"z":9.8,"magnitude":0.4}
//! {"kind":"event","start_time_ms":1,"end_time_ms":2,"peak_magnitude":5.1,"average_magnitude":3.2,"reading_count":40}
//! {"kind":"settings","magnitude_threshold":4.5}
//! {"kind":"prune","older_than_ms":1699990000000}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Malformed lines are
//! logged and skipped.

use repository::Repository;
use serde::Deserialize;
use storage::{DetectionSettings, QuakeEvent, Reading};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, warn};

use crate::RecorderError;

/// A line of producer input
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestRecord {
    Reading(Reading),
    Event(QuakeEvent),
    Settings(DetectionSettings),
    Prune { older_than_ms: i64 },
}

impl IngestRecord {
    /// Hand the record to the repository's write queue
    pub fn submit(self, repository: &Repository) {
        match self {
            IngestRecord::Reading(reading) => repository.insert_reading(reading),
            IngestRecord::Event(event) => repository.insert_event(event),
            IngestRecord::Settings(settings) => repository.update_settings(settings),
            IngestRecord::Prune { older_than_ms } => {
                repository.prune_readings_older_than(older_than_ms)
            }
        }
    }
}

/// Ingest counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: usize,
    pub rejected: usize,
}

/// Read records until EOF, queueing each one
pub async fn ingest<R>(reader: R, repository: &Repository) -> Result<IngestStats, RecorderError>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = IngestStats::default();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match serde_json::from_str::<IngestRecord>(line) {
            Ok(record) => {
                debug!("Line {}: {:?}", line_no, record);
                record.submit(repository);
                stats.accepted += 1;
            }
            Err(e) => {
                warn!("Skipping line {}: {}", line_no, e);
                stats.rejected += 1;
            }
        }
    }

    Ok(stats)
}
