use crate::dedup::CooldownGate;
use crate::source::tail::TailReader;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest period either timer runs at. `tokio::time::interval` rejects zero.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Fire a read cycle every `poll_interval` until shutdown is signalled.
/// Intervals shorter than [`MIN_INTERVAL`] are raised to it.
///
/// Each tick spawns its own cycle so a slow read never delays the timer; the
/// reader's in-flight guard turns overlapping ticks into no-ops. Shutdown
/// only stops the timer. Cycles and flushes already started run to
/// completion.
pub async fn run_poller(
    reader: Arc<TailReader>,
    poll_interval: Duration,
    gate: Arc<CooldownGate>,
    sweep_interval: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) {
    if poll_interval < MIN_INTERVAL {
        warn!(
            requested_ms = poll_interval.as_millis() as u64,
            "Poll interval below 1ms, clamping"
        );
    }
    let poll_interval = poll_interval.max(MIN_INTERVAL);

    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut sweeper = sweep_interval.map(|every| {
        let mut sweeper = interval(every.max(MIN_INTERVAL));
        sweeper.set_missed_tick_behavior(MissedTickBehavior::Delay);
        sweeper
    });

    info!(
        path = %reader.path().display(),
        poll_ms = poll_interval.as_millis() as u64,
        "Poller started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reader = Arc::clone(&reader);
                tokio::spawn(async move {
                    reader.poll().await;
                });
            }

            _ = next_sweep(&mut sweeper) => {
                let removed = gate.sweep_expired(Instant::now());
                if removed > 0 {
                    debug!(removed, remaining = gate.tracked_keys(), "Swept expired cooldown keys");
                }
            }

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    info!("Poller stopped");
}

async fn next_sweep(sweeper: &mut Option<Interval>) {
    match sweeper {
        Some(sweeper) => {
            sweeper.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
