//! Storage Layer
//!
//! Persistence for sensor readings, detected quake events and the detection
//! settings singleton. Two backends implement [`Store`]: an in-memory store
//! and a SQLite store built on sqlx.

mod memory;
mod query;
mod records;
mod sqlite;
mod store;

pub use memory::MemoryStore;
pub use query::{EventFilter, Query, QueryOutput, QueryResult, ReadingFilter};
pub use records::{DetectionSettings, QuakeEvent, Reading};
pub use sqlite::SqliteStore;
pub use store::Store;

use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("Constraint violation: {0}")]
    Constraint(String),
    #[error("Record not found")]
    NotFound,
    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => StorageError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() || db.is_check_violation() => {
                StorageError::Constraint(db.message().to_string())
            }
            _ => StorageError::DatabaseError(err.to_string()),
        }
    }
}
