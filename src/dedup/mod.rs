use crate::config::DedupConfig;
use crate::source::event::DetectionEvent;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of running an event through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Same key was accepted recently; `remaining` is what is left of its
    /// cooldown window.
    Suppress { remaining: Duration },
}

/// Build the dedup key for a coordinate pair.
///
/// `-0.0` is folded into `0.0` so the two never land on different keys.
/// Values that only round to zero keep their sign (`-0.0000001` gives
/// `"-0.000000"`).
pub fn dedup_key(latitude: f64, longitude: f64, precision: usize) -> String {
    format!(
        "{:.prec$},{:.prec$}",
        latitude + 0.0,
        longitude + 0.0,
        prec = precision
    )
}

/// Per-location cooldown.
///
/// Remembers when each rounded coordinate pair was last accepted and
/// suppresses repeats inside the cooldown window. The window is reserved at
/// admission time, before the caller writes anywhere, so a slow or failing
/// write never lets a second event for the same key through.
#[derive(Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    precision: usize,
    last_accepted: Mutex<HashMap<String, Instant>>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration, precision: usize) -> Self {
        Self {
            cooldown,
            precision,
            last_accepted: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.cooldown, config.precision)
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn key_for(&self, event: &DetectionEvent) -> String {
        dedup_key(event.latitude, event.longitude, self.precision)
    }

    /// Decide on a key built by [`key_for`](Self::key_for).
    pub fn admit(&self, key: &str) -> Admission {
        self.admit_at(key, Instant::now())
    }

    pub fn admit_at(&self, key: &str, now: Instant) -> Admission {
        let mut table = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(last) = table.get(key) {
            let elapsed = now.saturating_duration_since(*last);
            if elapsed < self.cooldown {
                return Admission::Suppress {
                    remaining: self.cooldown - elapsed,
                };
            }
        }

        table.insert(key.to_string(), now);
        Admission::Accept
    }

    /// Drop entries whose window has already run out. Such entries would
    /// accept the next event anyway, so this never changes a decision.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        let mut table = self
            .last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = table.len();
        table.retain(|_, last| now.saturating_duration_since(*last) < self.cooldown);
        before - table.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.last_accepted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}
