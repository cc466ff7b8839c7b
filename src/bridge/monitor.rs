//! Liveness monitor: periodic heartbeat sweep.

use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::state::Bridge;

/// Outcome of one sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: Vec<String>,
    pub restored: usize,
    pub assigned: usize,
    pub purged: usize,
}

/// Evict silent workers, restore lost queue entries, retry dispatch, then
/// purge finished tasks.
pub async fn sweep(bridge: &Bridge) -> SweepReport {
    let evicted = bridge.evict_stale().await;
    let restored = bridge.restore_queue_entries().await;
    let assigned = bridge.dispatch().await;
    let purged = bridge.purge_expired().await;
    SweepReport {
        evicted,
        restored,
        assigned,
        purged,
    }
}

/// Spawn the background sweep, every `sweep_interval`.
pub fn spawn_liveness_monitor(bridge: Arc<Bridge>) -> tokio::task::JoinHandle<()> {
    let period = bridge.config().sweep_interval;
    info!(interval_secs = period.as_secs_f64(), "Liveness monitor started");
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            let report = sweep(&bridge).await;
            if report != SweepReport::default() {
                debug!(
                    evicted = report.evicted.len(),
                    restored = report.restored,
                    assigned = report.assigned,
                    purged = report.purged,
                    "Liveness sweep"
                );
            }
        }
    })
}
