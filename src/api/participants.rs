//! Participant API endpoints
//!
//! - POST /api/v1/participants - Create a participant
//! - GET /api/v1/participants/{id} - Get a participant

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{CreateParticipantInput, Participant};

/// Build the participants router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_participant))
        .route("/{id}", get(get_participant))
}

async fn create_participant(
    State(state): State<AppState>,
    Json(input): Json<CreateParticipantInput>,
) -> Result<(StatusCode, Json<Participant>), ApiError> {
    let participant = state.participant_service.create(input).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

async fn get_participant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Participant>, ApiError> {
    Ok(Json(state.participant_service.get(&id).await?))
}
