//! Quake Recorder - Main Entry Point

use recorder::{init_logging, run, RecorderConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1);
    let config = RecorderConfig::load(config_path.as_deref())?;
    init_logging(&config.logging)?;

    info!("=== Quake Recorder v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Storage backend: {:?}", config.storage.backend);

    run(config).await?;

    Ok(())
}
