//! Query Shapes
//!
//! Every read the store answers is one of these descriptors. Range bounds
//! are inclusive on both ends; the magnitude threshold is strict.

use crate::records::{DetectionSettings, QuakeEvent, Reading};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Reading selection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ReadingFilter {
    All,
    PotentialEvents,
    Between { start_ms: i64, end_ms: i64 },
    AboveMagnitude(f64),
    PotentialEventsBetween { start_ms: i64, end_ms: i64 },
}

impl ReadingFilter {
    /// Check whether a reading is selected by this filter
    pub fn matches(&self, reading: &Reading) -> bool {
        match *self {
            ReadingFilter::All => true,
            ReadingFilter::PotentialEvents => reading.is_potential_event,
            ReadingFilter::Between { start_ms, end_ms } => {
                (start_ms..=end_ms).contains(&reading.timestamp_ms)
            }
            ReadingFilter::AboveMagnitude(threshold) => reading.magnitude > threshold,
            ReadingFilter::PotentialEventsBetween { start_ms, end_ms } => {
                reading.is_potential_event && (start_ms..=end_ms).contains(&reading.timestamp_ms)
            }
        }
    }
}

/// Event selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventFilter {
    All,
    /// Events whose start time falls in the range
    Between { start_ms: i64, end_ms: i64 },
}

impl EventFilter {
    pub fn matches(&self, event: &QuakeEvent) -> bool {
        match *self {
            EventFilter::All => true,
            EventFilter::Between { start_ms, end_ms } => {
                (start_ms..=end_ms).contains(&event.start_time_ms)
            }
        }
    }
}

/// Query descriptor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Query {
    Readings(ReadingFilter),
    Events(EventFilter),
    Settings,
}

impl Query {
    pub const ALL_READINGS: Query = Query::Readings(ReadingFilter::All);
    pub const POTENTIAL_EVENTS: Query = Query::Readings(ReadingFilter::PotentialEvents);
    pub const ALL_EVENTS: Query = Query::Events(EventFilter::All);

    pub fn readings_between(start_ms: i64, end_ms: i64) -> Self {
        Query::Readings(ReadingFilter::Between { start_ms, end_ms })
    }

    pub fn readings_above_magnitude(threshold: f64) -> Self {
        Query::Readings(ReadingFilter::AboveMagnitude(threshold))
    }

    pub fn potential_events_between(start_ms: i64, end_ms: i64) -> Self {
        Query::Readings(ReadingFilter::PotentialEventsBetween { start_ms, end_ms })
    }

    pub fn events_between(start_ms: i64, end_ms: i64) -> Self {
        Query::Events(EventFilter::Between { start_ms, end_ms })
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::Readings(ReadingFilter::All) => write!(f, "all-readings"),
            Query::Readings(ReadingFilter::PotentialEvents) => write!(f, "potential-events"),
            Query::Readings(ReadingFilter::Between { start_ms, end_ms }) => {
                write!(f, "readings[{}..={}]", start_ms, end_ms)
            }
            Query::Readings(ReadingFilter::AboveMagnitude(t)) => write!(f, "readings>{}", t),
            Query::Readings(ReadingFilter::PotentialEventsBetween { start_ms, end_ms }) => {
                write!(f, "potential-events[{}..={}]", start_ms, end_ms)
            }
            Query::Events(EventFilter::All) => write!(f, "all-events"),
            Query::Events(EventFilter::Between { start_ms, end_ms }) => {
                write!(f, "events[{}..={}]", start_ms, end_ms)
            }
            Query::Settings => write!(f, "settings"),
        }
    }
}

/// Result of evaluating a [`Query`]
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Readings(Vec<Reading>),
    Events(Vec<QuakeEvent>),
    Settings(DetectionSettings),
}

/// Typed extraction from a [`QueryResult`]
pub trait QueryOutput: Clone + PartialEq + Send + Sync + 'static {
    fn from_result(result: QueryResult) -> Option<Self>;
}

impl QueryOutput for Vec<Reading> {
    fn from_result(result: QueryResult) -> Option<Self> {
        match result {
            QueryResult::Readings(readings) => Some(readings),
            _ => None,
        }
    }
}

impl QueryOutput for Vec<QuakeEvent> {
    fn from_result(result: QueryResult) -> Option<Self> {
        match result {
            QueryResult::Events(events) => Some(events),
            _ => None,
        }
    }
}

impl QueryOutput for DetectionSettings {
    fn from_result(result: QueryResult) -> Option<Self> {
        match result {
            QueryResult::Settings(settings) => Some(settings),
            _ => None,
        }
    }
}

impl QueryOutput for QueryResult {
    fn from_result(result: QueryResult) -> Option<Self> {
        Some(result)
    }
}

/// Result ordering: newest first, ties broken by id
pub(crate) fn newest_reading_first(a: &Reading, b: &Reading) -> Ordering {
    b.timestamp_ms.cmp(&a.timestamp_ms).then_with(|| b.id.cmp(&a.id))
}

pub(crate) fn newest_event_first(a: &QuakeEvent, b: &QuakeEvent) -> Ordering {
    b.start_time_ms
        .cmp(&a.start_time_ms)
        .then_with(|| b.id.cmp(&a.id))
}
