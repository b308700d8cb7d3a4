//! Recorder Configuration
//!
//! Defaults, then an optional TOML file, then `QUAKE__SECTION__KEY`
//! environment overrides (e.g. `QUAKE__STORAGE__BACKEND=memory`).

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use serde::{Deserialize, Serialize};

use crate::RecorderError;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "quake-recorder";

/// Top-level recorder configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    pub storage: StorageConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// sqlx connection URL, used by the SQLite backend
    pub database_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            database_url: "sqlite://quake.db".to_string(),
        }
    }
}

/// Reading retention
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Readings older than this are pruned (0 disables pruning)
    pub max_age_secs: u64,
    /// Time between sweeps
    pub sweep_interval_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_secs: 7 * 24 * 3600, // 7 days
            sweep_interval_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RecorderConfig {
    /// Load configuration. An explicit `path` must exist; otherwise
    /// `quake-recorder.toml` is read if present.
    pub fn load(path: Option<&str>) -> Result<Self, RecorderError> {
        let file = match path {
            Some(path) => File::with_name(path),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        Self::from_builder(config::Config::builder().add_source(file))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, RecorderError> {
        let settings = builder
            .add_source(
                Environment::with_prefix("QUAKE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn from_toml(toml: &str) -> RecorderConfig {
        RecorderConfig::from_builder(
            config::Config::builder().add_source(File::from_str(toml, FileFormat::Toml)),
        )
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = from_toml("");
        assert_eq!(config, RecorderConfig::default());
        assert_eq!(config.storage.backend, StorageBackend::Sqlite);
        assert_eq!(config.retention.max_age_secs, 604_800);
    }

    #[test]
    fn test_partial_file() {
        let config = from_toml(
            r#"
            [storage]
            backend = "memory"

            [retention]
            max_age_secs = 0
            "#,
        );
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.database_url, "sqlite://quake.db");
        assert_eq!(config.retention.max_age_secs, 0);
        assert_eq!(config.retention.sweep_interval_secs, 3600);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        assert!(RecorderConfig::load(Some("/nonexistent/quake-recorder")).is_err());
    }
}
