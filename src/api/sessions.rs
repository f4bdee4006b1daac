//! Session API endpoints
//!
//! - POST /api/v1/sessions - Create a session
//! - GET /api/v1/sessions/{id} - Get a session
//! - PUT /api/v1/sessions/{id}/status - Set the status manually
//! - GET /api/v1/sessions/{id}/capacity - Occupancy
//! - GET /api/v1/sessions/{id}/stats - Check-in statistics
//! - GET /api/v1/sessions/{id}/check-ins - Check-ins of the session
//! - POST /api/v1/sessions/{id}/registrations - Register a participant

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{
    CapacityStatus, CheckIn, CreateSessionInput, Registration, Session, SessionStats, SessionStatus,
};

/// Request body for a manual status change
#[derive(Debug, Deserialize)]
pub struct SetStatusRequest {
    pub status: SessionStatus,
}

/// Request body for a registration
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub participant_id: String,
}

/// Response for the check-in list
#[derive(Debug, Serialize)]
pub struct CheckInListResponse {
    pub check_ins: Vec<CheckIn>,
    pub total: usize,
}

/// Build the sessions router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/{id}", get(get_session))
        .route("/{id}/status", put(set_status))
        .route("/{id}/capacity", get(get_capacity))
        .route("/{id}/stats", get(get_stats))
        .route("/{id}/check-ins", get(list_check_ins))
        .route("/{id}/registrations", post(register))
}

/// POST /api/v1/sessions
async fn create_session(
    State(state): State<AppState>,
    Json(input): Json<CreateSessionInput>,
) -> Result<(StatusCode, Json<Session>), ApiError> {
    let session = state.session_service.create(input).await?;
    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/v1/sessions/{id}
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.session_service.get(&id).await?))
}

/// PUT /api/v1/sessions/{id}/status
async fn set_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<SetStatusRequest>,
) -> Result<Json<Session>, ApiError> {
    Ok(Json(state.session_service.set_status(&id, body.status).await?))
}

/// GET /api/v1/sessions/{id}/capacity
async fn get_capacity(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CapacityStatus>, ApiError> {
    Ok(Json(state.session_service.capacity_status(&id).await?))
}

/// GET /api/v1/sessions/{id}/stats
async fn get_stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionStats>, ApiError> {
    Ok(Json(state.session_service.stats(&id).await?))
}

/// GET /api/v1/sessions/{id}/check-ins
async fn list_check_ins(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckInListResponse>, ApiError> {
    let check_ins = state.session_service.list_check_ins(&id).await?;
    let total = check_ins.len();
    Ok(Json(CheckInListResponse { check_ins, total }))
}

/// POST /api/v1/sessions/{id}/registrations
async fn register(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Registration>), ApiError> {
    let registration = state
        .session_service
        .register(&id, &body.participant_id)
        .await?;
    Ok((StatusCode::CREATED, Json(registration)))
}
