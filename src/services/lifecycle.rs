//! Session lifecycle scheduler
//!
//! Each tick evaluates every SCHEDULED or OPEN session against two
//! thresholds:
//! - auto-open at `start_time - auto_open_minutes_before`, as long as the
//!   session has not already finished
//! - auto-end at `end_time + auto_end_grace_minutes`, when enabled
//!
//! A transition is persisted as a conditional write on the status that was
//! read, so when several processes tick at once exactly one of them moves a
//! given session and publishes the event. Manual status changes write
//! directly; the next tick simply evaluates whatever status it finds.

use crate::config::SchedulerConfig;
use crate::db::repositories::SessionRepository;
use crate::models::{LifecycleEvent, Session, SessionEvent, SessionStatus, TransitionReason};
use crate::services::entity_cache::EntityCache;
use crate::services::notifier::DynEventSink;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of one scheduler tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub evaluated: usize,
    pub opened: usize,
    pub ended: usize,
    /// Transitions another writer performed first
    pub lost: usize,
    pub failed: usize,
}

impl TickReport {
    pub fn changed(&self) -> usize {
        self.opened + self.ended
    }
}

/// Transition the scheduler would apply to `session` at `now`, if any
pub fn decide_transition(
    session: &Session,
    now: DateTime<Utc>,
    config: &SchedulerConfig,
) -> Option<(SessionStatus, TransitionReason)> {
    match session.status {
        SessionStatus::Ended => None,
        SessionStatus::Open | SessionStatus::Scheduled
            if config.auto_end_enabled && now >= session.auto_end_at(config.auto_end_grace_minutes) =>
        {
            Some((SessionStatus::Ended, TransitionReason::AutoEnd))
        }
        SessionStatus::Scheduled
            if session.end_time > now
                && now >= session.auto_open_at(config.auto_open_minutes_before) =>
        {
            Some((SessionStatus::Open, TransitionReason::AutoOpen))
        }
        _ => None,
    }
}

/// Drives automatic session transitions
pub struct LifecycleScheduler {
    sessions: Arc<dyn SessionRepository>,
    entities: Arc<EntityCache>,
    sink: DynEventSink,
    config: SchedulerConfig,
}

impl LifecycleScheduler {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        entities: Arc<EntityCache>,
        sink: DynEventSink,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            sessions,
            entities,
            sink,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub async fn run_once(&self) -> Result<TickReport> {
        self.run_once_at(Utc::now()).await
    }

    /// Evaluate every active session as of `now`
    ///
    /// A failure on one session is logged and does not stop the others.
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let candidates = self
            .sessions
            .list_by_status(&[SessionStatus::Scheduled, SessionStatus::Open])
            .await
            .context("Failed to list active sessions")?;

        let mut report = TickReport {
            evaluated: candidates.len(),
            ..TickReport::default()
        };

        for session in &candidates {
            let Some((next, reason)) = decide_transition(session, now, &self.config) else {
                continue;
            };

            match self.apply(session, next, reason, now).await {
                Ok(true) if next == SessionStatus::Open => report.opened += 1,
                Ok(true) => report.ended += 1,
                Ok(false) => report.lost += 1,
                Err(e) => {
                    warn!(
                        target: "rollcall.scheduler",
                        session_id = %session.id,
                        to = %next,
                        error = %e,
                        "Session transition failed"
                    );
                    report.failed += 1;
                }
            }
        }

        if report.changed() > 0 {
            info!(
                target: "rollcall.scheduler",
                opened = report.opened,
                ended = report.ended,
                lost = report.lost,
                "Session lifecycle tick applied transitions"
            );
        }
        Ok(report)
    }

    async fn apply(
        &self,
        session: &Session,
        next: SessionStatus,
        reason: TransitionReason,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let won = self
            .sessions
            .transition_status(&session.id, session.status, next, now)
            .await?;
        if !won {
            debug!(
                target: "rollcall.scheduler",
                session_id = %session.id,
                expected = %session.status,
                "Session changed before transition, skipped"
            );
            return Ok(false);
        }

        self.entities.invalidate_session(&session.id).await;
        self.sink.publish(SessionEvent::Lifecycle(LifecycleEvent {
            session_id: session.id.clone(),
            from: session.status,
            to: next,
            reason,
            at: now,
        }));
        Ok(true)
    }
}
