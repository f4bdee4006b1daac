//! Participant repository
//!
//! Participants and their session registrations.

use crate::db::DynDatabasePool;
use crate::models::{Participant, Registration};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::is_unique_violation;

const PARTICIPANT_COLUMNS: &str = "id, name, email, qr_code, created_at";

/// Participant repository trait
#[async_trait]
pub trait ParticipantRepository: Send + Sync {
    /// Insert a participant
    async fn create(&self, participant: &Participant) -> Result<Participant>;

    /// Get participant by ID
    async fn get_by_id(&self, id: &str) -> Result<Option<Participant>>;

    /// Get participant by badge code
    async fn get_by_qr_code(&self, qr_code: &str) -> Result<Option<Participant>>;

    /// Register a participant for a session
    ///
    /// Returns false when the registration already existed.
    async fn register(&self, registration: &Registration) -> Result<bool>;

    /// Whether the participant is registered for the session
    async fn is_registered(&self, participant_id: &str, session_id: &str) -> Result<bool>;
}

/// SQLx-based participant repository implementation
pub struct SqlxParticipantRepository {
    pool: DynDatabasePool,
}

impl SqlxParticipantRepository {
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn ParticipantRepository> {
        Arc::new(Self::new(pool))
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> Result<Option<Participant>> {
        let sql = format!("SELECT {} FROM participants WHERE {} = ?", PARTICIPANT_COLUMNS, column);
        let row: Option<ParticipantRow> = with_pool!(self.pool, |p| {
            sqlx::query_as(&sql)
                .bind(value)
                .fetch_optional(p)
                .await
                .with_context(|| format!("Failed to get participant by {}", column))?
        });

        Ok(row.map(Participant::from))
    }
}

#[derive(sqlx::FromRow)]
struct ParticipantRow {
    id: String,
    name: String,
    email: Option<String>,
    qr_code: String,
    created_at: DateTime<Utc>,
}

impl From<ParticipantRow> for Participant {
    fn from(row: ParticipantRow) -> Self {
        Participant {
            id: row.id,
            name: row.name,
            email: row.email,
            qr_code: row.qr_code,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl ParticipantRepository for SqlxParticipantRepository {
    async fn create(&self, participant: &Participant) -> Result<Participant> {
        with_pool!(self.pool, |p| {
            sqlx::query("INSERT INTO participants (id, name, email, qr_code, created_at) VALUES (?, ?, ?, ?, ?)")
                .bind(&participant.id)
                .bind(&participant.name)
                .bind(&participant.email)
                .bind(&participant.qr_code)
                .bind(participant.created_at)
                .execute(p)
                .await
                .context("Failed to create participant")?;
        });

        Ok(participant.clone())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Participant>> {
        self.fetch_one_by("id", id).await
    }

    async fn get_by_qr_code(&self, qr_code: &str) -> Result<Option<Participant>> {
        self.fetch_one_by("qr_code", qr_code).await
    }

    async fn register(&self, registration: &Registration) -> Result<bool> {
        let result: Result<()> = with_pool!(self.pool, |p| {
            sqlx::query("INSERT INTO registrations (participant_id, session_id, created_at) VALUES (?, ?, ?)")
                .bind(&registration.participant_id)
                .bind(&registration.session_id)
                .bind(registration.created_at)
                .execute(p)
                .await
                .map(|_| ())
                .context("Failed to create registration")
        });

        match result {
            Ok(()) => Ok(true),
            Err(e) if is_unique_violation(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn is_registered(&self, participant_id: &str, session_id: &str) -> Result<bool> {
        let count: i64 = with_pool!(self.pool, |p| {
            sqlx::query_scalar("SELECT COUNT(*) FROM registrations WHERE participant_id = ? AND session_id = ?")
                .bind(participant_id)
                .bind(session_id)
                .fetch_one(p)
                .await
                .context("Failed to check registration")?
        });

        Ok(count > 0)
    }
}
