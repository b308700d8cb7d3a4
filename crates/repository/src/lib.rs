//! Quake Repository
//!
//! Data-access facade over a [`storage::Store`]:
//! - every mutation goes through one ordered write queue (single writer)
//! - reads are live queries re-evaluated after each committed write, or
//!   one-shot snapshots
//!
//! Writes are fire-and-forget. Failures are logged and published on a
//! status channel; they never stop the queue.

mod facade;
mod registry;
mod serializer;

pub use facade::Repository;
pub use registry::{LiveQuery, SubscriptionId, SubscriptionRegistry};
pub use serializer::{WriteFailure, WriteOp, WriteSerializer};

use storage::{Query, StorageError};
use thiserror::Error;

/// Repository errors
#[derive(Debug, Clone, Error)]
pub enum RepositoryError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Write serializer is no longer running")]
    Closed,

    #[error("Query {query} produced a result of the wrong kind")]
    UnexpectedResult { query: Query },
}
