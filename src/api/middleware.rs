//! API middleware and shared handler types
//!
//! Contains:
//! - Application state shared by all handlers
//! - The JSON error envelope and its mapping from service errors
//! - Request statistics middleware

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::db::DynDatabasePool;
use crate::services::{
    BroadcastNotifier, CheckInError, CheckInService, ParticipantService, ParticipantServiceError,
    SessionService, SessionServiceError,
};

// ============================================================================
// Request Statistics
// ============================================================================

/// Lightweight request statistics using atomic operations (no locks)
pub struct RequestStats {
    total_requests: AtomicU64,
    /// Total response time in microseconds (for calculating average)
    total_response_time_us: AtomicU64,
    start_time: Instant,
}

impl RequestStats {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            total_response_time_us: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a request with its response time
    pub fn record(&self, duration_us: u64) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.total_response_time_us.fetch_add(duration_us, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Average response time in microseconds
    pub fn avg_response_time_us(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let total_time = self.total_response_time_us.load(Ordering::Relaxed);
        total_time as f64 / total as f64
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl Default for RequestStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Request statistics middleware
pub async fn request_stats_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let response = next.run(request).await;

    let duration_us = u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX);
    state.request_stats.record(duration_us);

    response
}

// ============================================================================
// State
// ============================================================================

/// Application state containing shared services
#[derive(Clone)]
pub struct AppState {
    pub pool: DynDatabasePool,
    pub session_service: Arc<SessionService>,
    pub participant_service: Arc<ParticipantService>,
    pub check_in_service: Arc<CheckInService>,
    pub notifier: Arc<BroadcastNotifier>,
    pub request_stats: Arc<RequestStats>,
}

// ============================================================================
// Errors
// ============================================================================

/// Error response for API errors
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub error: ApiErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            error: ApiErrorDetail {
                code: code.into(),
                message: message.into(),
                details: Some(details),
            },
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("NOT_FOUND", message)
    }

    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new("VALIDATION_ERROR", message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new("INTERNAL_ERROR", message)
    }

    /// Log the cause and hide it from the client
    fn internal(err: &anyhow::Error) -> Self {
        tracing::error!(error = ?err, "Request failed");
        Self::internal_error("Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.code.as_str() {
            "NOT_FOUND" => StatusCode::NOT_FOUND,
            "VALIDATION_ERROR" | "SESSION_NOT_OPEN" => StatusCode::BAD_REQUEST,
            "NOT_REGISTERED" => StatusCode::FORBIDDEN,
            "ALREADY_CHECKED_IN" => StatusCode::CONFLICT,
            "CAPACITY_EXCEEDED" => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(self)).into_response()
    }
}

impl From<CheckInError> for ApiError {
    fn from(err: CheckInError) -> Self {
        let message = err.to_string();
        match err {
            CheckInError::SessionNotFound(id) => {
                Self::with_details("NOT_FOUND", message, serde_json::json!({ "session_id": id }))
            }
            CheckInError::ParticipantNotFound(_) | CheckInError::CheckInNotFound(_) => {
                Self::not_found(message)
            }
            CheckInError::SessionNotOpen(id) => Self::with_details(
                "SESSION_NOT_OPEN",
                message,
                serde_json::json!({ "session_id": id }),
            ),
            CheckInError::NotRegistered {
                participant_id,
                session_id,
            } => Self::with_details(
                "NOT_REGISTERED",
                message,
                serde_json::json!({ "participant_id": participant_id, "session_id": session_id }),
            ),
            CheckInError::CapacityExceeded(id) => Self::with_details(
                "CAPACITY_EXCEEDED",
                message,
                serde_json::json!({ "session_id": id }),
            ),
            CheckInError::AlreadyCheckedIn {
                participant_id,
                session_id,
            } => Self::with_details(
                "ALREADY_CHECKED_IN",
                message,
                serde_json::json!({ "participant_id": participant_id, "session_id": session_id }),
            ),
            CheckInError::Internal(e) => Self::internal(&e),
        }
    }
}

impl From<SessionServiceError> for ApiError {
    fn from(err: SessionServiceError) -> Self {
        match err {
            SessionServiceError::NotFound(message) => Self::not_found(message),
            SessionServiceError::ValidationError(message) => Self::validation_error(message),
            SessionServiceError::InternalError(e) => Self::internal(&e),
        }
    }
}

impl From<ParticipantServiceError> for ApiError {
    fn from(err: ParticipantServiceError) -> Self {
        let message = err.to_string();
        match err {
            ParticipantServiceError::NotFound(_) => Self::not_found(message),
            ParticipantServiceError::ValidationError(message) => Self::validation_error(message),
            ParticipantServiceError::InternalError(e) => Self::internal(&e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: ApiError) -> StatusCode {
        error.into_response().status()
    }

    #[test]
    fn test_check_in_errors_map_to_distinct_statuses() {
        let full = ApiError::from(CheckInError::CapacityExceeded("s1".to_string()));
        assert_eq!(full.error.code, "CAPACITY_EXCEEDED");
        assert_eq!(status_of(full), StatusCode::UNPROCESSABLE_ENTITY);

        let duplicate = ApiError::from(CheckInError::AlreadyCheckedIn {
            participant_id: "p1".to_string(),
            session_id: "s1".to_string(),
        });
        assert_eq!(duplicate.error.code, "ALREADY_CHECKED_IN");
        assert_eq!(status_of(duplicate), StatusCode::CONFLICT);

        let closed = ApiError::from(CheckInError::SessionNotOpen("s1".to_string()));
        assert_eq!(status_of(closed), StatusCode::BAD_REQUEST);

        let unregistered = ApiError::from(CheckInError::NotRegistered {
            participant_id: "p1".to_string(),
            session_id: "s1".to_string(),
        });
        assert_eq!(status_of(unregistered), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_internal_error_hides_cause() {
        let error = ApiError::from(CheckInError::Internal(anyhow::anyhow!("connection refused")));
        assert_eq!(error.error.code, "INTERNAL_ERROR");
        assert!(!error.error.message.contains("connection refused"));
        assert_eq!(status_of(error), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_with_details() {
        let details = serde_json::json!({"field": "end_time"});
        let error = ApiError::with_details("VALIDATION_ERROR", "Invalid", details.clone());
        assert_eq!(error.error.details, Some(details));
    }

    #[test]
    fn test_request_stats_average() {
        let stats = RequestStats::new();
        assert_eq!(stats.avg_response_time_us(), 0.0);

        stats.record(100);
        stats.record(300);

        assert_eq!(stats.total_requests(), 2);
        assert_eq!(stats.avg_response_time_us(), 200.0);
    }
}
