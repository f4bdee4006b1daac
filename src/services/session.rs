//! Session service
//!
//! Session administration around the admission core: creation, lookup,
//! manual status overrides, registrations, occupancy and statistics.

use crate::config::MAX_OFFSET_MINUTES;
use crate::db::repositories::{CheckInRepository, ParticipantRepository, SessionRepository};
use crate::models::{
    CapacityStatus, CheckIn, CreateSessionInput, LifecycleEvent, Registration, Session,
    SessionEvent, SessionStats, SessionStatus, TransitionReason,
};
use crate::services::admission::AdmissionController;
use crate::services::entity_cache::EntityCache;
use crate::services::notifier::DynEventSink;
use anyhow::Context;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Error types for session service operations
#[derive(Debug, thiserror::Error)]
pub enum SessionServiceError {
    /// Session or participant not found
    #[error("{0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Session service
pub struct SessionService {
    sessions: Arc<dyn SessionRepository>,
    participants: Arc<dyn ParticipantRepository>,
    check_ins: Arc<dyn CheckInRepository>,
    entities: Arc<EntityCache>,
    admission: Arc<AdmissionController>,
    sink: DynEventSink,
}

impl SessionService {
    pub fn new(
        sessions: Arc<dyn SessionRepository>,
        participants: Arc<dyn ParticipantRepository>,
        check_ins: Arc<dyn CheckInRepository>,
        entities: Arc<EntityCache>,
        admission: Arc<AdmissionController>,
        sink: DynEventSink,
    ) -> Self {
        Self {
            sessions,
            participants,
            check_ins,
            entities,
            admission,
            sink,
        }
    }

    /// Create a session in SCHEDULED state
    ///
    /// # Errors
    /// - `ValidationError` if the name is empty, the window is empty, inverted
    ///   or too close to the representable time range, the capacity is
    ///   negative, or an override is out of range
    pub async fn create(&self, input: CreateSessionInput) -> Result<Session, SessionServiceError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(SessionServiceError::ValidationError(
                "Session name cannot be empty".to_string(),
            ));
        }
        if input.end_time <= input.start_time {
            return Err(SessionServiceError::ValidationError(
                "end_time must be after start_time".to_string(),
            ));
        }
        let margin = chrono::Duration::minutes(MAX_OFFSET_MINUTES);
        if input.start_time.checked_sub_signed(margin).is_none()
            || input.end_time.checked_add_signed(margin).is_none()
        {
            return Err(SessionServiceError::ValidationError(
                "start_time and end_time are out of range".to_string(),
            ));
        }
        if input.capacity.is_some_and(|c| c < 0) {
            return Err(SessionServiceError::ValidationError(
                "capacity cannot be negative".to_string(),
            ));
        }
        for (field, value) in [
            ("auto_open_minutes_before", input.auto_open_minutes_before),
            ("auto_end_grace_minutes", input.auto_end_grace_minutes),
            ("late_threshold_minutes", input.late_threshold_minutes),
        ] {
            if value.is_some_and(|m| !(0..=MAX_OFFSET_MINUTES).contains(&m)) {
                return Err(SessionServiceError::ValidationError(format!(
                    "{} must be between 0 and {}",
                    field, MAX_OFFSET_MINUTES
                )));
            }
        }

        let now = Utc::now();
        let session = Session {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            capacity: input.capacity,
            capacity_enforced: input.capacity_enforced,
            check_ins_count: 0,
            status: SessionStatus::Scheduled,
            is_open: false,
            start_time: input.start_time,
            end_time: input.end_time,
            auto_open_minutes_before: input.auto_open_minutes_before,
            auto_end_grace_minutes: input.auto_end_grace_minutes,
            late_threshold_minutes: input.late_threshold_minutes,
            requires_registration: input.requires_registration,
            counter_updated_at: now,
            created_at: now,
            updated_at: now,
        };

        let created = self
            .sessions
            .create(&session)
            .await
            .context("Failed to create session")?;
        info!(session_id = %created.id, name = %created.name, "Session created");
        Ok(created)
    }

    /// Get a session, with its counter read from the durable store
    ///
    /// The cached entity may carry an older `check_ins_count`.
    pub async fn get(&self, id: &str) -> Result<Session, SessionServiceError> {
        let mut session = self.require(id).await?;
        session.check_ins_count = self.admission.current_count(id).await?;
        Ok(session)
    }

    /// Manually set a session's status
    ///
    /// Writes unconditionally, so it wins over a scheduler tick in flight.
    /// Setting the current status again changes nothing and publishes nothing.
    pub async fn set_status(
        &self,
        id: &str,
        status: SessionStatus,
    ) -> Result<Session, SessionServiceError> {
        let current = self
            .sessions
            .get_by_id(id)
            .await
            .context("Failed to get session")?
            .ok_or_else(|| SessionServiceError::NotFound(format!("Session not found: {}", id)))?;
        if current.status == status {
            return Ok(current);
        }

        let now = Utc::now();
        if !self
            .sessions
            .set_status(id, status, now)
            .await
            .context("Failed to update session status")?
        {
            return Err(SessionServiceError::NotFound(format!("Session not found: {}", id)));
        }
        self.entities.invalidate_session(id).await;

        self.sink.publish(SessionEvent::Lifecycle(LifecycleEvent {
            session_id: id.to_string(),
            from: current.status,
            to: status,
            reason: TransitionReason::Manual,
            at: now,
        }));
        info!(session_id = %id, from = %current.status, to = %status, "Session status set manually");

        Ok(Session {
            status,
            is_open: status.is_open(),
            updated_at: now,
            ..current
        })
    }

    /// Occupancy of a session
    pub async fn capacity_status(&self, id: &str) -> Result<CapacityStatus, SessionServiceError> {
        let session = self.require(id).await?;
        let count = self.admission.current_count(id).await?;
        Ok(CapacityStatus::new(session.capacity, count, session.capacity_enforced))
    }

    /// Check-in statistics of a session
    pub async fn stats(&self, id: &str) -> Result<SessionStats, SessionServiceError> {
        self.require(id).await?;
        Ok(self.entities.stats(id).await?)
    }

    pub async fn list_check_ins(&self, id: &str) -> Result<Vec<CheckIn>, SessionServiceError> {
        self.require(id).await?;
        self.check_ins
            .list_by_session(id)
            .await
            .context("Failed to list check-ins")
            .map_err(Into::into)
    }

    /// Register a participant for a session
    ///
    /// Registering twice is not an error.
    pub async fn register(
        &self,
        session_id: &str,
        participant_id: &str,
    ) -> Result<Registration, SessionServiceError> {
        self.require(session_id).await?;
        if self.entities.participant(participant_id).await?.is_none() {
            return Err(SessionServiceError::NotFound(format!(
                "Participant not found: {}",
                participant_id
            )));
        }

        let registration = Registration {
            participant_id: participant_id.to_string(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
        };
        let created = self
            .participants
            .register(&registration)
            .await
            .context("Failed to register participant")?;
        if created {
            info!(%session_id, %participant_id, "Participant registered");
        }
        Ok(registration)
    }

    async fn require(&self, id: &str) -> Result<Session, SessionServiceError> {
        self.entities
            .session(id)
            .await?
            .ok_or_else(|| SessionServiceError::NotFound(format!("Session not found: {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support;
    use chrono::{DateTime, Duration};

    fn input(capacity: Option<i64>) -> CreateSessionInput {
        let start = Utc::now() + Duration::hours(1);
        CreateSessionInput {
            capacity,
            ..CreateSessionInput::new("Panel", start, start + Duration::hours(1))
        }
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let fixture = test_support::fixture().await;

        let created = fixture.sessions.create(input(Some(50))).await.unwrap();
        assert_eq!(created.status, SessionStatus::Scheduled);
        assert!(!created.is_open);

        let fetched = fixture.sessions.get(&created.id).await.unwrap();
        assert_eq!(fetched.name, "Panel");
        assert_eq!(fetched.capacity, Some(50));
        assert_eq!(fetched.check_ins_count, 0);
    }

    #[tokio::test]
    async fn test_create_validation() {
        let fixture = test_support::fixture().await;
        let start = Utc::now();

        let inverted = CreateSessionInput::new("Bad", start, start - Duration::minutes(1));
        assert!(matches!(
            fixture.sessions.create(inverted).await,
            Err(SessionServiceError::ValidationError(_))
        ));

        assert!(matches!(
            fixture.sessions.create(input(Some(-1))).await,
            Err(SessionServiceError::ValidationError(_))
        ));

        let mut negative_override = input(None);
        negative_override.late_threshold_minutes = Some(-5);
        assert!(matches!(
            fixture.sessions.create(negative_override).await,
            Err(SessionServiceError::ValidationError(_))
        ));

        let mut blank = input(None);
        blank.name = "  ".to_string();
        assert!(fixture.sessions.create(blank).await.is_err());
    }

    #[tokio::test]
    async fn test_create_rejects_window_at_end_of_time() {
        let fixture = test_support::fixture().await;
        let end = DateTime::<Utc>::MAX_UTC;

        let result = fixture
            .sessions
            .create(CreateSessionInput::new("Forever", end - Duration::hours(1), end))
            .await;

        assert!(matches!(result, Err(SessionServiceError::ValidationError(_))));
        // Nothing was stored, so the scheduler keeps running
        assert_eq!(fixture.scheduler.run_once_at(Utc::now()).await.unwrap().evaluated, 0);
    }

    #[tokio::test]
    async fn test_get_missing_session() {
        let fixture = test_support::fixture().await;
        assert!(matches!(
            fixture.sessions.get("nope").await,
            Err(SessionServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manual_status_publishes_once() {
        let fixture = test_support::fixture().await;
        let created = fixture.sessions.create(input(None)).await.unwrap();

        let opened = fixture.sessions.set_status(&created.id, SessionStatus::Open).await.unwrap();
        assert!(opened.is_open);
        fixture.sessions.set_status(&created.id, SessionStatus::Open).await.unwrap();

        let events = fixture.sink.events();
        assert_eq!(events.len(), 1);
        match &events[0] {
            SessionEvent::Lifecycle(e) => assert_eq!(e.reason, TransitionReason::Manual),
            other => panic!("unexpected event {:?}", other),
        }

        // The cached entity was invalidated by the write
        let fetched = fixture.sessions.get(&created.id).await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Open);
    }

    #[tokio::test]
    async fn test_capacity_status_tracks_check_ins() {
        let fixture = test_support::fixture().await;
        let session = fixture.open_session(Some(5)).await;
        for qr in ["QR-1", "QR-2", "QR-3", "QR-4"] {
            let participant = fixture.participant(qr).await;
            fixture.check_in(&participant, &session).await.unwrap();
        }

        let status = fixture.sessions.capacity_status(&session.id).await.unwrap();
        assert_eq!(status.check_ins_count, 4);
        assert_eq!(status.remaining, 1);
        assert_eq!(status.percent_full, 80.0);
        assert!(status.is_near_capacity);
        assert!(!status.is_at_capacity);

        let stats = fixture.sessions.stats(&session.id).await.unwrap();
        assert_eq!(stats.total, 4);
        assert_eq!(fixture.sessions.list_check_ins(&session.id).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_register_requires_existing_participant() {
        let fixture = test_support::fixture().await;
        let session = fixture.open_session(None).await;
        let participant = fixture.participant("QR-R").await;

        fixture.sessions.register(&session.id, &participant.id).await.unwrap();
        fixture.sessions.register(&session.id, &participant.id).await.unwrap();

        assert!(matches!(
            fixture.sessions.register(&session.id, "ghost").await,
            Err(SessionServiceError::NotFound(_))
        ));
    }
}
