//! Periodic eviction of expired entries

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::RegistryInner;

/// Shortest period the sweep will run at
pub const MIN_SWEEP_PERIOD: Duration = Duration::from_millis(10);

/// Background loop that evicts expired entries every `period`.
///
/// The first pass runs one full period after start. The loop ends when the
/// shutdown signal fires, when the sender is dropped, or when the registry
/// itself is gone.
pub(crate) async fn sweep_loop(
    registry: Weak<RegistryInner>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let period = period.max(MIN_SWEEP_PERIOD);
    info!(period_ms = period.as_millis() as u64, "Eviction sweep scheduled");

    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        if *shutdown.borrow() {
            break;
        }

        let Some(inner) = registry.upgrade() else {
            break;
        };
        let evicted = inner.sweep_expired().await;
        if evicted > 0 {
            info!(evicted, "Eviction sweep removed expired entries");
        } else {
            debug!("Eviction sweep found nothing to remove");
        }
    }

    debug!("Eviction sweep stopped");
}
