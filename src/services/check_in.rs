//! Check-in service
//!
//! Admission sequence for one check-in:
//! 1. load the session through the cache, reject unless it is OPEN
//! 2. load the participant (by id, or by badge code for scans)
//! 3. reject unregistered participants of registration-only sessions
//! 4. reserve a capacity slot
//! 5. write the check-in row, with `is_late` fixed at this moment
//! 6. if the write fails, release the slot before returning the error
//! 7. invalidate statistics and publish a `check_in` event
//!
//! No check-in row is ever written without a reserved slot.

use crate::db::repositories::{is_unique_violation, CheckInRepository, ParticipantRepository};
use crate::models::{
    is_late, CapacityStatus, CheckIn, CheckInEvent, CheckInMethod, CheckInResult,
    CreateCheckInInput, Participant, ScanCheckInInput, Session, SessionEvent, SessionStatus,
};
use crate::services::admission::{AdmissionController, AdmissionError};
use crate::services::entity_cache::EntityCache;
use crate::services::notifier::DynEventSink;
use anyhow::Context;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Error types for check-in operations
#[derive(Debug, thiserror::Error)]
pub enum CheckInError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Participant not found: {0}")]
    ParticipantNotFound(String),

    #[error("Check-in not found: {0}")]
    CheckInNotFound(String),

    #[error("Session {0} is not open for check-in")]
    SessionNotOpen(String),

    #[error("Participant {participant_id} is not registered for session {session_id}")]
    NotRegistered {
        participant_id: String,
        session_id: String,
    },

    #[error("Session {0} is at capacity")]
    CapacityExceeded(String),

    #[error("Participant {participant_id} is already checked in to session {session_id}")]
    AlreadyCheckedIn {
        participant_id: String,
        session_id: String,
    },

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<AdmissionError> for CheckInError {
    fn from(err: AdmissionError) -> Self {
        match err {
            AdmissionError::CapacityExceeded(session_id) => Self::CapacityExceeded(session_id),
            AdmissionError::InternalError(e) => Self::Internal(e),
        }
    }
}

/// Check-in service
pub struct CheckInService {
    entities: Arc<EntityCache>,
    admission: Arc<AdmissionController>,
    participants: Arc<dyn ParticipantRepository>,
    check_ins: Arc<dyn CheckInRepository>,
    sink: DynEventSink,
    /// Used for sessions without their own threshold
    late_threshold_minutes: i64,
}

impl CheckInService {
    pub fn new(
        entities: Arc<EntityCache>,
        admission: Arc<AdmissionController>,
        participants: Arc<dyn ParticipantRepository>,
        check_ins: Arc<dyn CheckInRepository>,
        sink: DynEventSink,
        late_threshold_minutes: i64,
    ) -> Self {
        Self {
            entities,
            admission,
            participants,
            check_ins,
            sink,
            late_threshold_minutes,
        }
    }

    /// Check a participant in by id
    pub async fn check_in(&self, input: CreateCheckInInput) -> Result<CheckInResult, CheckInError> {
        self.check_in_at(input, Utc::now()).await
    }

    /// Check a participant in by id, as of `at`
    pub async fn check_in_at(
        &self,
        input: CreateCheckInInput,
        at: DateTime<Utc>,
    ) -> Result<CheckInResult, CheckInError> {
        let session = self.open_session(&input.session_id).await?;
        let participant = self
            .entities
            .participant(&input.participant_id)
            .await?
            .ok_or_else(|| CheckInError::ParticipantNotFound(input.participant_id.clone()))?;

        self.admit(&session, &participant, input.method, at).await
    }

    /// Check a participant in by badge code
    pub async fn scan(&self, input: ScanCheckInInput) -> Result<CheckInResult, CheckInError> {
        self.scan_at(input, Utc::now()).await
    }

    /// Check a participant in by badge code, as of `at`
    pub async fn scan_at(
        &self,
        input: ScanCheckInInput,
        at: DateTime<Utc>,
    ) -> Result<CheckInResult, CheckInError> {
        let participant = self
            .entities
            .participant_by_qr(&input.qr_code)
            .await?
            .ok_or_else(|| CheckInError::ParticipantNotFound(input.qr_code.clone()))?;
        let session = self.open_session(&input.session_id).await?;

        self.admit(&session, &participant, CheckInMethod::Qr, at).await
    }

    /// Delete a check-in and give its slot back
    pub async fn remove(&self, check_in_id: &str) -> Result<CheckIn, CheckInError> {
        let check_in = self
            .check_ins
            .get_by_id(check_in_id)
            .await
            .context("Failed to get check-in")?
            .ok_or_else(|| CheckInError::CheckInNotFound(check_in_id.to_string()))?;

        // Only the caller that deleted the row releases its slot
        if !self
            .check_ins
            .delete(check_in_id)
            .await
            .context("Failed to delete check-in")?
        {
            return Err(CheckInError::CheckInNotFound(check_in_id.to_string()));
        }
        self.admission.release_slot(&check_in.session_id).await?;
        self.entities.invalidate_stats(&check_in.session_id).await;

        let count = self.count_after_change(&check_in.session_id, None).await;
        self.sink.publish(SessionEvent::CheckIn(CheckInEvent {
            session_id: check_in.session_id.clone(),
            participant_id: check_in.participant_id.clone(),
            check_in_id: check_in.id.clone(),
            count,
            removed: true,
            at: Utc::now(),
        }));
        info!(
            target: "rollcall.admission",
            check_in_id = %check_in.id,
            session_id = %check_in.session_id,
            "Check-in removed"
        );
        Ok(check_in)
    }

    async fn open_session(&self, session_id: &str) -> Result<Session, CheckInError> {
        let session = self
            .entities
            .session(session_id)
            .await?
            .ok_or_else(|| CheckInError::SessionNotFound(session_id.to_string()))?;
        if session.status != SessionStatus::Open {
            return Err(CheckInError::SessionNotOpen(session_id.to_string()));
        }
        Ok(session)
    }

    async fn admit(
        &self,
        session: &Session,
        participant: &Participant,
        method: CheckInMethod,
        at: DateTime<Utc>,
    ) -> Result<CheckInResult, CheckInError> {
        let already_checked_in = || CheckInError::AlreadyCheckedIn {
            participant_id: participant.id.clone(),
            session_id: session.id.clone(),
        };

        if session.requires_registration
            && !self
                .participants
                .is_registered(&participant.id, &session.id)
                .await
                .context("Failed to check registration")?
        {
            return Err(CheckInError::NotRegistered {
                participant_id: participant.id.clone(),
                session_id: session.id.clone(),
            });
        }

        // Saves a reservation round trip for the common repeat scan; the
        // unique key still decides concurrent duplicates
        if self
            .check_ins
            .find(&participant.id, &session.id)
            .await
            .context("Failed to look up existing check-in")?
            .is_some()
        {
            return Err(already_checked_in());
        }

        let mut reservation = self.admission.reserve_slot(session).await?;

        let check_in = CheckIn {
            id: uuid::Uuid::new_v4().to_string(),
            participant_id: participant.id.clone(),
            session_id: session.id.clone(),
            method,
            check_in_time: at,
            is_late: is_late(at, session.start_time, session.late_threshold(self.late_threshold_minutes)),
            created_at: Utc::now(),
        };

        if let Err(e) = self.check_ins.create(&check_in).await {
            if let Err(release_err) = self.admission.release(&mut reservation).await {
                // Left for reconciliation
                error!(
                    target: "rollcall.admission",
                    session_id = %session.id,
                    error = %release_err,
                    "Failed to release slot after check-in write failed"
                );
            }
            if is_unique_violation(&e) {
                debug!(
                    target: "rollcall.admission",
                    session_id = %session.id,
                    participant_id = %participant.id,
                    "Concurrent duplicate check-in rejected"
                );
                return Err(already_checked_in());
            }
            return Err(CheckInError::Internal(e.context("Failed to create check-in")));
        }
        reservation.commit();

        self.entities.invalidate_stats(&session.id).await;

        let count = self.count_after_change(&session.id, Some(session)).await;
        let capacity = CapacityStatus::new(session.capacity, count, session.capacity_enforced);

        self.sink.publish(SessionEvent::CheckIn(CheckInEvent {
            session_id: session.id.clone(),
            participant_id: participant.id.clone(),
            check_in_id: check_in.id.clone(),
            count,
            removed: false,
            at,
        }));
        info!(
            target: "rollcall.admission",
            session_id = %session.id,
            participant_id = %participant.id,
            method = %method,
            is_late = check_in.is_late,
            count,
            "Check-in admitted"
        );

        Ok(CheckInResult { check_in, capacity })
    }

    /// Durable occupancy after a committed change
    ///
    /// The change is already persisted, so a failed read only degrades the
    /// reported count.
    async fn count_after_change(&self, session_id: &str, admitted_to: Option<&Session>) -> i64 {
        match self.admission.current_count(session_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(target: "rollcall.admission", %session_id, error = %e, "Failed to read session count");
                admitted_to.map(|s| s.check_ins_count + 1).unwrap_or(0)
            }
        }
    }
}
