//! sync-worker binary: load configuration, set up logging and run one
//! worker loop until it stops.

use sync_worker::config::Config;
use sync_worker::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        protocol = ?config.protocol,
        max_buffer_size = config.max_buffer_size,
        stat_refresh_seconds = config.stat_refresh_seconds,
        "Starting sync worker"
    );

    runtime::run(config)?;
    Ok(())
}
