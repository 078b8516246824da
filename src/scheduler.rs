use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::DealEngine;

/// Trigger a run every `every`, the first one after `initial_delay`.
///
/// Ticks never wait for the previous run; overlapping triggers are dropped by
/// the engine's single-flight guard. Cancelling `shutdown` stops new triggers
/// while a run already in flight is left to finish.
pub fn spawn_scheduler(
    engine: Arc<DealEngine>,
    every: Duration,
    initial_delay: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            every_secs = every.as_secs(),
            initial_delay_secs = initial_delay.as_secs(),
            "scheduler started"
        );
        let start = tokio::time::Instant::now() + initial_delay;
        let mut ticker = tokio::time::interval_at(start, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("scheduled tick");
                    drop(engine.trigger_run());
                }
            }
        }
        info!("scheduler stopped");
    })
}
