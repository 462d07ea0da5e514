//! Exited-session reaper.
//!
//! Removes sessions that have been `Exited` for longer than a TTL.

use super::controller::ExecController;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Start the reaper.
///
/// Ticks every `interval` until `shutdown` is cancelled.
pub fn start_reaper(
    controller: ExecController,
    ttl: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        debug!(?ttl, ?interval, "Exec reaper started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = controller.reap_exited(ttl);
                    if removed > 0 {
                        info!(removed, remaining = controller.store().len(), "Reaped exited exec sessions");
                    }
                }
            }
        }

        debug!("Exec reaper stopped");
    })
}
