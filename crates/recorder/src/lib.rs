//! Quake Recorder
//!
//! Wires a store, the repository and its collaborators into one process:
//! readings and events arrive as JSON lines on stdin, a retention sweeper
//! prunes old readings, and reporters log live query changes.

mod config;
mod ingest;
mod report;
mod retention;

pub use crate::config::{
    LoggingConfig, RecorderConfig, RetentionConfig, StorageBackend, StorageConfig,
};
pub use ingest::{ingest, IngestRecord, IngestStats};
pub use report::spawn_reporters;
pub use retention::{cutoff_ms, spawn_retention};

use repository::{Repository, RepositoryError};
use std::sync::Arc;
use storage::{MemoryStore, SqliteStore, StorageError, Store};
use thiserror::Error;
use tokio::io::BufReader;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Recorder errors
#[derive(Debug, Error)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Config(#[from] ::config::ConfigError),

    #[error("Logging setup failed: {0}")]
    Logging(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Initialize logging
pub fn init_logging(config: &LoggingConfig) -> Result<(), RecorderError> {
    let parsed = config.level.parse::<Level>();
    let level = parsed.as_ref().copied().unwrap_or(Level::INFO);
    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true);

    if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }

    if parsed.is_err() {
        warn!("Unknown log level {:?}, using {}", config.level, level);
    }
    Ok(())
}

/// Open the configured store backend
pub async fn open_store(config: &StorageConfig) -> Result<Arc<dyn Store>, RecorderError> {
    let store: Arc<dyn Store> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::Sqlite => Arc::new(SqliteStore::connect(&config.database_url).await?),
    };
    Ok(store)
}

/// Run the recorder until stdin closes
pub async fn run(config: RecorderConfig) -> Result<(), RecorderError> {
    let store = open_store(&config.storage).await?;
    let repository = Arc::new(Repository::new(store));

    let reporters = spawn_reporters(&repository).await?;
    let retention = spawn_retention(repository.clone(), &config.retention);

    let stats = ingest(BufReader::new(tokio::io::stdin()), &repository).await?;
    repository.flush().await?;
    info!(
        "Input closed: {} records accepted, {} rejected",
        stats.accepted, stats.rejected
    );

    for task in reporters.into_iter().chain(retention) {
        task.abort();
        let _ = task.await;
    }

    match Arc::try_unwrap(repository) {
        Ok(repository) => repository.shutdown().await,
        Err(_) => warn!("Repository still shared at exit, skipping drain"),
    }
    Ok(())
}
