//! Session lifecycle background task
//!
//! Runs [`LifecycleScheduler::run_once`] on a fixed interval. Every process
//! runs its own copy; the conditional status writes keep concurrent ticks
//! from applying a transition twice.
//!
//! # Graceful Shutdown
//!
//! When the cancellation token is triggered the task finishes the tick in
//! progress and exits.

use crate::services::LifecycleScheduler;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Start the lifecycle scheduler loop
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "rollcall.task.lifecycle_scheduler")]
pub async fn start_lifecycle_scheduler(
    scheduler: Arc<LifecycleScheduler>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "rollcall.scheduler",
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        auto_end_enabled = scheduler.config().auto_end_enabled,
        "Starting lifecycle scheduler task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = scheduler.run_once().await {
                    // Next tick retries
                    error!(target: "rollcall.scheduler", error = %e, "Lifecycle tick failed");
                }
            }
            _ = cancel_token.cancelled() => {
                info!(target: "rollcall.scheduler", "Lifecycle scheduler received shutdown signal, exiting");
                break;
            }
        }
    }

    info!(target: "rollcall.scheduler", "Lifecycle scheduler task stopped");
}
