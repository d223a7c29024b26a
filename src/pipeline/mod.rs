pub mod forward;
pub mod poller;

pub use forward::{DetectionCallback, DetectionForwarder, ForwarderStats, StoredDetection};
pub use poller::run_poller;

use crate::config::Config;
use crate::dedup::CooldownGate;
use crate::source::tail::TailReader;
use crate::storage::traits::DetectionSink;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to open watched file '{path}': {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("poller task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Settings for one ingestion session.
#[derive(Clone)]
pub struct IngestOptions {
    pub path: PathBuf,
    pub poll_interval: Duration,
    pub flush_quiet_period: Duration,
    pub cooldown: Duration,
    pub key_precision: usize,
    pub sweep_interval: Option<Duration>,
    pub on_detection: Option<DetectionCallback>,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            path: config.source.path.clone(),
            poll_interval: config.source.poll_interval,
            flush_quiet_period: config.source.flush_quiet_period,
            cooldown: config.dedup.cooldown,
            key_precision: config.dedup.precision,
            sweep_interval: config.dedup.sweep_interval,
            on_detection: None,
        }
    }

    pub fn on_detection(
        mut self,
        callback: impl Fn(StoredDetection) + Send + Sync + 'static,
    ) -> Self {
        self.on_detection = Some(Arc::new(callback));
        self
    }
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Running ingestion session returned by [`start_ingest`].
///
/// Dropping the handle stops the poller the same way [`stop`](Self::stop)
/// does.
pub struct IngestHandle {
    shutdown_tx: watch::Sender<bool>,
    poller: JoinHandle<()>,
    reader: Arc<TailReader>,
    forwarder: Arc<DetectionForwarder>,
}

impl IngestHandle {
    /// Stop polling. A read cycle or stall flush that is already running is
    /// left to finish.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the poller task to exit.
    pub async fn stopped(self) -> Result<(), IngestError> {
        let Self {
            shutdown_tx,
            poller,
            ..
        } = self;
        poller.await?;
        drop(shutdown_tx);
        Ok(())
    }

    pub fn reader(&self) -> &Arc<TailReader> {
        &self.reader
    }

    pub fn stats(&self) -> ForwarderStats {
        self.forwarder.stats()
    }
}

/// Start tailing `options.path` from its current end and forwarding accepted
/// detections to `sink`.
pub async fn start_ingest(
    options: IngestOptions,
    sink: Arc<dyn DetectionSink>,
) -> Result<IngestHandle, IngestError> {
    let gate = Arc::new(CooldownGate::new(options.cooldown, options.key_precision));
    let forwarder = Arc::new(DetectionForwarder::new(
        gate.clone(),
        sink,
        options.on_detection.clone(),
    ));

    let reader = TailReader::open(
        options.path.clone(),
        options.flush_quiet_period,
        forwarder.clone(),
    )
    .await
    .map_err(|source| IngestError::Watch {
        path: options.path.clone(),
        source,
    })?;

    info!(
        path = %options.path.display(),
        poll_ms = options.poll_interval.as_millis() as u64,
        cooldown_ms = options.cooldown.as_millis() as u64,
        "Watching for new detections"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(run_poller(
        reader.clone(),
        options.poll_interval,
        gate,
        options.sweep_interval,
        shutdown_rx,
    ));

    Ok(IngestHandle {
        shutdown_tx,
        poller,
        reader,
        forwarder,
    })
}
