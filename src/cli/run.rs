use crate::config::{load_or_default, Config};
use crate::pipeline::{start_ingest, IngestOptions, StoredDetection};
use crate::storage::duckdb::DuckDbSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::signal;
use tracing::info;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::traits::StorageError),

    #[error("ingest error: {0}")]
    Ingest(#[from] crate::pipeline::IngestError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Command-line overrides applied on top of the loaded config.
#[derive(Debug, Default, Clone)]
pub struct RunOverrides {
    pub file: Option<PathBuf>,
    pub poll_ms: Option<u64>,
    pub cooldown_ms: Option<u64>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut Config) {
        if let Some(file) = &self.file {
            config.source.path = crate::config::expand_tilde(file);
        }
        if let Some(ms) = self.poll_ms {
            config.source.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(ms) = self.cooldown_ms {
            config.dedup.cooldown = Duration::from_millis(ms);
        }
    }
}

pub async fn run(
    config_path: Option<PathBuf>,
    overrides: RunOverrides,
) -> Result<(), Box<dyn std::error::Error>> {
    run_pipeline(config_path, overrides)
        .await
        .map_err(|e| e.into())
}

async fn run_pipeline(
    config_path: Option<PathBuf>,
    overrides: RunOverrides,
) -> Result<(), RunError> {
    match &config_path {
        Some(path) => info!(config_path = %path.display(), "Loading configuration"),
        None => info!("No config file found, using defaults"),
    }

    let mut config = load_or_default(config_path.as_deref())?;
    overrides.apply(&mut config);

    info!(path = %config.storage.path.display(), "Opening detection store");
    let sink = Arc::new(DuckDbSink::open(&config.storage.path)?);
    sink.init_schema().await?;

    let options = IngestOptions::from_config(&config).on_detection(|d: StoredDetection| {
        info!(
            id = d.id,
            timestamp = %d.timestamp,
            latitude = d.latitude,
            longitude = d.longitude,
            "New detection"
        );
    });
    let handle = start_ingest(options, sink).await?;

    info!("Ingestion started, press Ctrl+C to shutdown");
    signal::ctrl_c().await?;
    info!("Shutdown signal received");

    handle.stop();
    let stats = handle.stats();
    handle.stopped().await?;

    info!(
        stored = stats.stored,
        suppressed = stats.suppressed,
        rejected = stats.rejected,
        failed = stats.failed,
        "Ingestion stopped"
    );

    Ok(())
}
