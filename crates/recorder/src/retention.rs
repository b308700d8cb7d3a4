//! Retention Sweeper

use chrono::{DateTime, Utc};
use repository::Repository;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::RetentionConfig;

/// Pruning cutoff: readings stamped before this are dropped
pub fn cutoff_ms(now: DateTime<Utc>, max_age_secs: u64) -> i64 {
    let max_age_ms = i64::try_from(max_age_secs)
        .unwrap_or(i64::MAX)
        .saturating_mul(1000);
    now.timestamp_millis().saturating_sub(max_age_ms)
}

/// Periodically queue a prune of old readings. Returns `None` when
/// retention is disabled.
pub fn spawn_retention(
    repository: Arc<Repository>,
    config: &RetentionConfig,
) -> Option<JoinHandle<()>> {
    if config.max_age_secs == 0 {
        info!("Retention disabled");
        return None;
    }

    let max_age_secs = config.max_age_secs;
    let period = Duration::from_secs(config.sweep_interval_secs.max(1));
    info!(
        "Retention: pruning readings older than {}s every {:?}",
        max_age_secs, period
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let cutoff = cutoff_ms(Utc::now(), max_age_secs);
            debug!("Retention sweep, cutoff {}", cutoff);
            repository.prune_readings_older_than(cutoff);
        }
    }))
}
