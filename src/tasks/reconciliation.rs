//! Capacity counter reconciliation task
//!
//! Periodically recomputes session counters from live check-ins, see
//! [`AdmissionController::reconcile`]. This is what heals slots leaked by a
//! process that died between reserving and writing a check-in.

use crate::services::AdmissionController;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

/// Start the reconciliation loop
///
/// Returns when the cancellation token is triggered.
#[instrument(skip_all, name = "rollcall.task.reconciliation")]
pub async fn start_reconciliation(
    admission: Arc<AdmissionController>,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "rollcall.reconcile",
        interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX),
        "Starting reconciliation task"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match admission.reconcile(Utc::now()).await {
                    Ok(report) => {
                        debug!(
                            target: "rollcall.reconcile",
                            store_corrected = report.store_corrected,
                            cache_scanned = report.cache_scanned,
                            cache_corrected = report.cache_corrected,
                            "Reconciliation pass finished"
                        );
                    }
                    Err(e) => {
                        error!(target: "rollcall.reconcile", error = %e, "Reconciliation pass failed");
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                info!(target: "rollcall.reconcile", "Reconciliation task received shutdown signal, exiting");
                break;
            }
        }
    }

    info!(target: "rollcall.reconcile", "Reconciliation task stopped");
}
