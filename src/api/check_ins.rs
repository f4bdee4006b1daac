//! Check-in API endpoints
//!
//! - POST /api/v1/check-ins - Check a participant in by id
//! - POST /api/v1/check-ins/scan - Check a participant in by badge code
//! - DELETE /api/v1/check-ins/{id} - Remove a check-in

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};

use crate::api::middleware::{ApiError, AppState};
use crate::models::{CheckIn, CheckInResult, CreateCheckInInput, ScanCheckInInput};

/// Build the check-ins router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_check_in))
        .route("/scan", post(scan_check_in))
        .route("/{id}", delete(remove_check_in))
}

/// POST /api/v1/check-ins
async fn create_check_in(
    State(state): State<AppState>,
    Json(input): Json<CreateCheckInInput>,
) -> Result<(StatusCode, Json<CheckInResult>), ApiError> {
    let result = state.check_in_service.check_in(input).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /api/v1/check-ins/scan
async fn scan_check_in(
    State(state): State<AppState>,
    Json(input): Json<ScanCheckInInput>,
) -> Result<(StatusCode, Json<CheckInResult>), ApiError> {
    if input.qr_code.trim().is_empty() {
        return Err(ApiError::validation_error("qr_code cannot be empty"));
    }
    let result = state.check_in_service.scan(input).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// DELETE /api/v1/check-ins/{id}
async fn remove_check_in(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<CheckIn>, ApiError> {
    let removed = state.check_in_service.remove(&id).await?;
    Ok(Json(removed))
}
