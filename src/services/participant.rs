//! Participant service

use crate::db::repositories::{is_unique_violation, ParticipantRepository};
use crate::models::{CreateParticipantInput, Participant};
use crate::services::entity_cache::EntityCache;
use chrono::Utc;
use std::sync::Arc;
use tracing::info;

/// Error types for participant operations
#[derive(Debug, thiserror::Error)]
pub enum ParticipantServiceError {
    #[error("Participant not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

/// Generate a badge code
///
/// 16 uppercase hex characters from a random UUID.
pub fn generate_qr_code() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
    format!("RC-{}", &id[..16])
}

pub struct ParticipantService {
    repo: Arc<dyn ParticipantRepository>,
    entities: Arc<EntityCache>,
}

impl ParticipantService {
    pub fn new(repo: Arc<dyn ParticipantRepository>, entities: Arc<EntityCache>) -> Self {
        Self { repo, entities }
    }

    /// Create a participant, generating a badge code when none is given
    ///
    /// # Errors
    /// - `ValidationError` if the name is empty or the code is already taken
    pub async fn create(
        &self,
        input: CreateParticipantInput,
    ) -> Result<Participant, ParticipantServiceError> {
        let name = input.name.trim();
        if name.is_empty() {
            return Err(ParticipantServiceError::ValidationError(
                "Participant name cannot be empty".to_string(),
            ));
        }
        let qr_code = match input.qr_code.as_deref().map(str::trim) {
            Some("") => {
                return Err(ParticipantServiceError::ValidationError(
                    "qr_code cannot be empty".to_string(),
                ))
            }
            Some(code) => code.to_string(),
            None => generate_qr_code(),
        };

        let participant = Participant {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: input.email.filter(|e| !e.trim().is_empty()),
            qr_code,
            created_at: Utc::now(),
        };

        let created = match self.repo.create(&participant).await {
            Ok(created) => created,
            Err(e) if is_unique_violation(&e) => {
                return Err(ParticipantServiceError::ValidationError(format!(
                    "qr_code already in use: {}",
                    participant.qr_code
                )))
            }
            Err(e) => return Err(e.context("Failed to create participant").into()),
        };

        // A scan of this code may have cached "not found"
        self.entities.invalidate_participant(&created).await;
        info!(participant_id = %created.id, "Participant created");
        Ok(created)
    }

    pub async fn get(&self, id: &str) -> Result<Participant, ParticipantServiceError> {
        self.entities
            .participant(id)
            .await?
            .ok_or_else(|| ParticipantServiceError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support;

    #[test]
    fn test_generated_codes_are_distinct() {
        let a = generate_qr_code();
        let b = generate_qr_code();
        assert_ne!(a, b);
        assert!(a.starts_with("RC-"));
        assert_eq!(a.len(), 19);
    }

    #[tokio::test]
    async fn test_create_generates_code() {
        let fixture = test_support::fixture().await;
        let created = fixture
            .participants
            .create(CreateParticipantInput {
                name: "Ada".to_string(),
                email: None,
                qr_code: None,
            })
            .await
            .unwrap();

        assert!(created.qr_code.starts_with("RC-"));
        assert_eq!(fixture.participants.get(&created.id).await.unwrap(), created);
    }

    #[tokio::test]
    async fn test_duplicate_code_rejected() {
        let fixture = test_support::fixture().await;
        fixture.participant("QR-DUP").await;

        let result = fixture
            .participants
            .create(CreateParticipantInput {
                name: "Other".to_string(),
                email: None,
                qr_code: Some("QR-DUP".to_string()),
            })
            .await;
        assert!(matches!(result, Err(ParticipantServiceError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_create_clears_cached_miss() {
        let fixture = test_support::fixture().await;
        assert!(fixture.entities.participant_by_qr("QR-LATE").await.unwrap().is_none());

        let created = fixture.participant("QR-LATE").await;

        let found = fixture.entities.participant_by_qr("QR-LATE").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(created.id));
    }
}
