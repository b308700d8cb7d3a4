//! Live Query Reporters
//!
//! Consumers that log changes to potential-event readings, detected events
//! and the detection settings.

use repository::{LiveQuery, Repository, RepositoryError};
use storage::QueryOutput;
use tokio::task::JoinHandle;
use tracing::info;

/// Subscribe the reporters and spawn one task per live query
pub async fn spawn_reporters(
    repository: &Repository,
) -> Result<Vec<JoinHandle<()>>, RepositoryError> {
    let potential = repository.observe_potential_events().await?;
    let events = repository.observe_all_events().await?;
    let settings = repository.observe_settings().await?;

    info!(
        "Reporting: {} potential-event readings, {} events, threshold {}",
        potential.current().len(),
        events.current().len(),
        settings.current().magnitude_threshold
    );

    Ok(vec![
        tokio::spawn(report(potential, |readings| {
            if let Some(latest) = readings.first() {
                info!(
                    "Potential quake readings: {} (latest at {} ms, magnitude {:.2})",
                    readings.len(),
                    latest.timestamp_ms,
                    latest.magnitude
                );
            }
        })),
        tokio::spawn(report(events, |events| {
            if let Some(latest) = events.first() {
                info!(
                    "Quake events: {} (latest {} ms long, peak {:.2})",
                    events.len(),
                    latest.duration_ms(),
                    latest.peak_magnitude
                );
            }
        })),
        tokio::spawn(report(settings, |settings| {
            info!("Detection settings changed: {:?}", settings);
        })),
    ])
}

async fn report<T, F>(mut live: LiveQuery<T>, log: F)
where
    T: QueryOutput,
    F: Fn(&T) + Send + 'static,
{
    while let Ok(value) = live.changed().await {
        log(&value);
    }
    info!("Reporter for {} stopped", live.query());
}
