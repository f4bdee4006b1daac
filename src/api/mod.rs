//! API layer - HTTP handlers and routing
//!
//! This module contains all HTTP API endpoints of the Rollcall service:
//! - Check-in endpoints (by participant id and by badge scan)
//! - Session administration, occupancy and statistics
//! - Participant endpoints
//! - Server-Sent Events stream
//! - Health check

pub mod check_ins;
pub mod events;
pub mod health;
pub mod middleware;
pub mod participants;
pub mod sessions;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    middleware as axum_middleware,
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use middleware::{ApiError, ApiErrorDetail, AppState, RequestStats};

/// Build the main API router
pub fn build_api_router() -> Router<AppState> {
    Router::new()
        .nest("/check-ins", check_ins::router())
        .nest("/sessions", sessions::router())
        .nest("/participants", participants::router())
        .nest("/events", events::router())
        .nest("/health", health::router())
}

/// Build the complete router with middleware
pub fn build_router(state: AppState, cors_origin: &str) -> Result<Router> {
    let origin = cors_origin
        .parse::<HeaderValue>()
        .with_context(|| format!("Invalid CORS origin: {}", cors_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Ok(Router::new()
        .nest("/api/v1", build_api_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        // Request stats middleware (outermost layer, runs for all requests)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::request_stats_middleware,
        ))
        .with_state(state))
}
