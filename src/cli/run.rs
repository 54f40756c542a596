use crate::backend::{CloudWatchBackend, LogBackend};
use crate::config::{load_config, Config, ConfigError};
use crate::shipper::{ship, ShipError};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("shipper error: {0}")]
    Ship(#[from] ShipError),

    #[error("signal handler error: {0}")]
    Signal(#[from] std::io::Error),
}

pub async fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => {
            info!(config_path = %path.display(), "Loading configuration");
            load_config(&path)?
        }
        None => {
            info!("No config file found; reading LOG_GROUP, LOG_STREAM and LOG_FILE from the environment");
            Config::from_env(|name| std::env::var(name).ok()).map_err(|e| {
                eprintln!("Error: {}", e);
                eprintln!("Searched locations:");
                eprintln!("  ~/.config/cwtail/config.yml");
                eprintln!("  /etc/cwtail/config.yml");
                eprintln!("\nUse --config <path>, run 'cwtail config init', or set LOG_GROUP, LOG_STREAM and LOG_FILE.");
                e
            })?
        }
    };

    let backend: Arc<dyn LogBackend> = Arc::new(CloudWatchBackend::new(&config.destination).await);
    run_shipper(&config, backend).await.map_err(|e| e.into())
}

/// Ship until the sentinel is read, or until Ctrl+C. An interrupt skips the
/// final drain, so anything still buffered is not sent.
pub async fn run_shipper(config: &Config, backend: Arc<dyn LogBackend>) -> Result<(), RunError> {
    info!(
        path = %config.source.path.display(),
        log_group = %config.destination.log_group,
        log_stream = %config.destination.log_stream,
        region = %config.destination.region,
        "Starting shipper, append the sentinel line or press Ctrl+C to stop"
    );

    tokio::select! {
        result = ship(config, backend) => {
            let stats = result?;
            info!(
                events_shipped = stats.events_shipped,
                batches_flushed = stats.batches_flushed,
                "Shipper completed"
            );
        }
        signal_result = signal::ctrl_c() => {
            signal_result?;
            warn!("Interrupt received; exiting without draining buffered events");
        }
    }

    Ok(())
}
