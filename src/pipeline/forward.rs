use crate::dedup::{Admission, CooldownGate};
use crate::source::event::parse_line;
use crate::source::tail::LineHandler;
use crate::storage::traits::{DetectionId, DetectionSink};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A detection the sink has stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDetection {
    pub id: DetectionId,
    pub timestamp: String,
    pub latitude: f64,
    pub longitude: f64,
}

/// Invoked once for every successful sink write.
pub type DetectionCallback = Arc<dyn Fn(StoredDetection) + Send + Sync>;

#[derive(Debug, Default)]
struct Counters {
    rejected: AtomicU64,
    suppressed: AtomicU64,
    stored: AtomicU64,
    failed: AtomicU64,
}

/// Running totals since the forwarder was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwarderStats {
    pub rejected: u64,
    pub suppressed: u64,
    pub stored: u64,
    pub failed: u64,
}

/// Takes complete lines from the tail reader through parsing, the cooldown
/// gate and the sink.
///
/// Nothing here fails the caller. Bad lines, suppressed repeats and sink
/// errors are logged and counted, then dropped.
pub struct DetectionForwarder {
    gate: Arc<CooldownGate>,
    sink: Arc<dyn DetectionSink>,
    on_detection: Option<DetectionCallback>,
    counters: Counters,
}

impl DetectionForwarder {
    pub fn new(
        gate: Arc<CooldownGate>,
        sink: Arc<dyn DetectionSink>,
        on_detection: Option<DetectionCallback>,
    ) -> Self {
        Self {
            gate,
            sink,
            on_detection,
            counters: Counters::default(),
        }
    }

    pub fn gate(&self) -> &Arc<CooldownGate> {
        &self.gate
    }

    pub fn stats(&self) -> ForwarderStats {
        ForwarderStats {
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            stored: self.counters.stored.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    pub async fn forward_line(&self, line: &str) {
        let event = match parse_line(line) {
            Ok(Some(event)) => event,
            Ok(None) => return,
            Err(e) => {
                warn!(line = %line.trim(), reason = %e, "Skipping line");
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if event.recorded_at().is_none() {
            debug!(timestamp = %event.timestamp, "Timestamp not in detector layout, passing through as-is");
        }

        let key = self.gate.key_for(&event);
        if let Admission::Suppress { remaining } = self.gate.admit(&key) {
            info!(
                key = %key,
                remaining_secs = remaining.as_secs(),
                "Skipping detection inside cooldown"
            );
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // The cooldown for this key is already running; a failed write is
        // not rolled back or retried.
        match self
            .sink
            .write(&event.timestamp, event.latitude, event.longitude)
            .await
        {
            Ok(id) => {
                info!(
                    id,
                    timestamp = %event.timestamp,
                    latitude = event.latitude,
                    longitude = event.longitude,
                    "Stored detection"
                );
                self.counters.stored.fetch_add(1, Ordering::Relaxed);
                if let Some(callback) = &self.on_detection {
                    callback(StoredDetection {
                        id,
                        timestamp: event.timestamp,
                        latitude: event.latitude,
                        longitude: event.longitude,
                    });
                }
            }
            Err(e) => {
                error!(key = %key, error = %e, "Failed to store detection, dropping it");
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[async_trait]
impl LineHandler for DetectionForwarder {
    async fn handle_line(&self, line: &str) {
        self.forward_line(line).await;
    }
}
