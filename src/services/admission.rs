//! Capacity admission controller
//!
//! Decides whether one more check-in fits into a session.
//!
//! Two atomic primitives are involved, and neither is ever a read followed by
//! a separate write:
//! 1. the cache counter `capacity:{session_id}`, checked and incremented by a
//!    single scripted operation (Lua on Redis, one lock in memory)
//! 2. the durable counter, incremented by one conditional `UPDATE` that only
//!    matches while the session has room
//!
//! The durable update runs for every admission and decides the outcome. The
//! cache counter only rejects early when a session is already full; whenever
//! the cache admitted but the durable update did not, the cache increment is
//! rolled back. An unavailable cache is logged and skipped.
//!
//! Counters that drift (a process dying between reservation and check-in
//! write, an expired cache key reseeded from a stale read) are corrected by
//! [`AdmissionController::reconcile`].

use crate::cache::{Cache, CacheLayer, CounterReservation};
use crate::config::ReconciliationConfig;
use crate::db::repositories::{CheckInRepository, SessionRepository};
use crate::models::Session;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prefix of cache counter keys
pub const CAPACITY_KEY_PREFIX: &str = "capacity:";

/// Upper bound on the reconciliation grace window (one week)
const MAX_GRACE_SECONDS: u64 = 7 * 24 * 3600;

pub fn capacity_key(session_id: &str) -> String {
    format!("{}{}", CAPACITY_KEY_PREFIX, session_id)
}

/// Error types for admission
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// The session has no room left
    #[error("Session {0} is at capacity")]
    CapacityExceeded(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// One admitted slot
///
/// Releasing consumes the slot exactly once; later releases are no-ops.
#[derive(Debug)]
#[must_use = "a reservation must be released if the check-in is not persisted"]
pub struct Reservation {
    session_id: String,
    /// Whether the cache counter includes this slot
    cached: bool,
    released: bool,
}

impl Reservation {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Mark the slot as used by a persisted check-in
    pub fn commit(mut self) {
        self.released = true;
    }
}

/// Outcome of one reconciliation pass
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub store_corrected: usize,
    /// Drifted sessions left alone because their counter was touched recently
    pub store_skipped: usize,
    pub cache_scanned: usize,
    pub cache_corrected: usize,
}

/// Capacity admission controller
pub struct AdmissionController {
    cache: Arc<Cache>,
    sessions: Arc<dyn SessionRepository>,
    check_ins: Arc<dyn CheckInRepository>,
    counter_ttl: Duration,
    reconcile: ReconciliationConfig,
}

impl AdmissionController {
    pub fn new(
        cache: Arc<Cache>,
        sessions: Arc<dyn SessionRepository>,
        check_ins: Arc<dyn CheckInRepository>,
        counter_ttl: Duration,
        reconcile: ReconciliationConfig,
    ) -> Self {
        Self {
            cache,
            sessions,
            check_ins,
            counter_ttl,
            reconcile,
        }
    }

    /// Reserve one slot in `session`
    ///
    /// # Errors
    /// - `CapacityExceeded` if an enforced capacity is reached
    /// - `InternalError` if the durable store fails; no slot is held then
    pub async fn reserve_slot(&self, session: &Session) -> Result<Reservation, AdmissionError> {
        let key = capacity_key(&session.id);
        let cached = match self.reserve_in_cache(&key, session).await {
            Ok(Some(outcome)) if !outcome.admitted => {
                debug!(
                    target: "rollcall.admission",
                    session_id = %session.id,
                    count = outcome.count,
                    "Rejected by cache counter"
                );
                return Err(AdmissionError::CapacityExceeded(session.id.clone()));
            }
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(target: "rollcall.admission", session_id = %session.id, error = %e, "Cache reservation failed, using durable store only");
                false
            }
        };

        let admitted = self.sessions.try_increment_count(&session.id, Utc::now()).await;
        match admitted {
            Ok(true) => {
                debug!(target: "rollcall.admission", session_id = %session.id, "Slot reserved");
                Ok(Reservation {
                    session_id: session.id.clone(),
                    cached,
                    released: false,
                })
            }
            Ok(false) => {
                if cached {
                    self.release_cache_counter(&key).await;
                }
                debug!(target: "rollcall.admission", session_id = %session.id, "Rejected by durable counter");
                Err(AdmissionError::CapacityExceeded(session.id.clone()))
            }
            Err(e) => {
                if cached {
                    self.release_cache_counter(&key).await;
                }
                Err(AdmissionError::InternalError(e.context("Failed to reserve slot")))
            }
        }
    }

    /// Give a reserved slot back
    ///
    /// Idempotent: a reservation that was already released or committed is
    /// left untouched. If the durable decrement fails the reservation stays
    /// unreleased so the call can be retried.
    pub async fn release(&self, reservation: &mut Reservation) -> Result<()> {
        if reservation.released {
            return Ok(());
        }

        self.sessions
            .decrement_count(&reservation.session_id, Utc::now())
            .await
            .context("Failed to release slot")?;
        if reservation.cached {
            self.release_cache_counter(&capacity_key(&reservation.session_id)).await;
        }
        reservation.released = true;

        debug!(target: "rollcall.admission", session_id = %reservation.session_id, "Slot released");
        Ok(())
    }

    /// Decrement the counters of a session after one of its check-ins was
    /// deleted
    ///
    /// Callers must only invoke this once per deleted row.
    pub async fn release_slot(&self, session_id: &str) -> Result<()> {
        self.sessions
            .decrement_count(session_id, Utc::now())
            .await
            .context("Failed to release slot")?;
        self.release_cache_counter(&capacity_key(session_id)).await;
        Ok(())
    }

    /// Authoritative occupancy of a session
    pub async fn current_count(&self, session_id: &str) -> Result<i64> {
        self.sessions
            .get_count(session_id)
            .await?
            .with_context(|| format!("Session not found: {}", session_id))
    }

    /// Run the cache script, seeding the counter from the durable store when
    /// the key is absent. `Ok(None)` means the session is not capacity bound.
    async fn reserve_in_cache(
        &self,
        key: &str,
        session: &Session,
    ) -> Result<Option<crate::cache::CounterOutcome>> {
        if !session.enforces_capacity() {
            return Ok(None);
        }

        let seed = match self.cache.get_counters(&[key.to_string()]).await?.first() {
            Some(Some(_)) => 0,
            _ => self.current_count(&session.id).await?,
        };

        let outcome = self
            .cache
            .reserve_counter(
                key,
                CounterReservation {
                    seed,
                    capacity: session.effective_capacity(),
                    enforced: true,
                    ttl: self.counter_ttl,
                },
            )
            .await?;
        Ok(Some(outcome))
    }

    async fn release_cache_counter(&self, key: &str) {
        if let Err(e) = self.cache.release_counter(key).await {
            warn!(target: "rollcall.admission", key, error = %e, "Cache counter release failed");
        }
    }

    /// Recompute counters from live check-ins
    ///
    /// Durable counters are corrected first, each with a compare-and-set so a
    /// concurrent admission is never overwritten. Then the cache counters are
    /// walked with a cursor scan, one page at a time, and overwritten where
    /// they disagree with the live count.
    pub async fn reconcile(&self, now: DateTime<Utc>) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        self.reconcile_store(now, &mut report).await?;
        if let Err(e) = self.reconcile_cache(&mut report).await {
            warn!(target: "rollcall.reconcile", error = %e, "Cache reconciliation aborted");
        }

        if report.store_corrected > 0 || report.cache_corrected > 0 {
            info!(
                target: "rollcall.reconcile",
                store_corrected = report.store_corrected,
                cache_corrected = report.cache_corrected,
                store_skipped = report.store_skipped,
                "Corrected drifted capacity counters"
            );
        }
        Ok(report)
    }

    async fn reconcile_store(&self, now: DateTime<Utc>, report: &mut ReconcileReport) -> Result<()> {
        let grace_seconds = self.reconcile.grace_seconds.min(MAX_GRACE_SECONDS);
        let grace = ChronoDuration::seconds(i64::try_from(grace_seconds).unwrap_or(0));

        for drift in self.sessions.list_counter_drift().await? {
            if now - drift.counter_updated_at < grace {
                report.store_skipped += 1;
                continue;
            }

            if self
                .sessions
                .compare_and_set_count(&drift.session_id, drift.stored, drift.actual, now)
                .await?
            {
                warn!(
                    target: "rollcall.reconcile",
                    session_id = %drift.session_id,
                    stored = drift.stored,
                    actual = drift.actual,
                    "Durable counter drift corrected"
                );
                report.store_corrected += 1;
            }
        }
        Ok(())
    }

    async fn reconcile_cache(&self, report: &mut ReconcileReport) -> Result<()> {
        let pattern = format!("{}*", CAPACITY_KEY_PREFIX);
        let mut cursor = 0;

        loop {
            let page = self
                .cache
                .scan(&pattern, cursor, self.reconcile.scan_batch_size)
                .await?;

            if !page.keys.is_empty() {
                report.cache_scanned += page.keys.len();
                let cached = self.cache.get_counters(&page.keys).await?;
                let session_ids: Vec<String> = page
                    .keys
                    .iter()
                    .map(|k| k.trim_start_matches(CAPACITY_KEY_PREFIX).to_string())
                    .collect();
                let live = self.check_ins.count_by_sessions(&session_ids).await?;

                for ((key, session_id), value) in page.keys.iter().zip(&session_ids).zip(cached) {
                    // Expired between SCAN and MGET
                    let Some(value) = value else { continue };
                    let actual = live.get(session_id).copied().unwrap_or(0);
                    if value != actual {
                        self.cache.set_counter(key, actual, self.counter_ttl).await?;
                        debug!(target: "rollcall.reconcile", %session_id, cached = value, actual, "Cache counter corrected");
                        report.cache_corrected += 1;
                    }
                }
            }

            cursor = page.cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }
}
