//! Integration tests for the HTTP API.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use rollcall::api::build_router;
use rollcall::app::Application;
use rollcall::cache::{Cache, MemoryCache};
use rollcall::config::Config;
use rollcall::db::{create_test_pool, migrations};

async fn test_server() -> TestServer {
    let config = Config::default();
    let pool = create_test_pool().await.unwrap();
    migrations::run_migrations(&pool).await.unwrap();
    let cache = Arc::new(Cache::Memory(MemoryCache::new()));

    let app = Application::new(&config, pool, cache);
    let router = build_router(app.state, &config.server.cors_origin).unwrap();
    TestServer::new(router).unwrap()
}

async fn open_session(server: &TestServer, capacity: i64) -> String {
    let start = Utc::now() - Duration::minutes(5);
    let created = server
        .post("/api/v1/sessions")
        .json(&json!({
            "name": "Opening keynote",
            "start_time": start,
            "end_time": start + Duration::hours(1),
            "capacity": capacity,
        }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let id = created.json::<Value>()["id"].as_str().unwrap().to_string();

    server
        .put(&format!("/api/v1/sessions/{}/status", id))
        .json(&json!({ "status": "OPEN" }))
        .await
        .assert_status_ok();
    id
}

async fn participant(server: &TestServer, qr_code: &str) -> String {
    let created = server
        .post("/api/v1/participants")
        .json(&json!({ "name": "Grace", "qr_code": qr_code }))
        .await;
    created.assert_status(StatusCode::CREATED);
    created.json::<Value>()["id"].as_str().unwrap().to_string()
}

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health() {
    let server = test_server().await;

    let response = server.get("/api/v1/health").await;

    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
}

// ============================================================================
// Check-ins
// ============================================================================

#[tokio::test]
async fn test_scan_until_full() {
    let server = test_server().await;
    let session_id = open_session(&server, 1).await;
    participant(&server, "QR-1").await;
    participant(&server, "QR-2").await;

    let first = server
        .post("/api/v1/check-ins/scan")
        .json(&json!({ "qr_code": "QR-1", "session_id": session_id }))
        .await;
    first.assert_status(StatusCode::CREATED);
    let body = first.json::<Value>();
    assert_eq!(body["check_in"]["method"], "qr");
    assert_eq!(body["capacity"]["check_ins_count"], 1);
    assert_eq!(body["capacity"]["is_at_capacity"], true);

    let second = server
        .post("/api/v1/check-ins/scan")
        .json(&json!({ "qr_code": "QR-2", "session_id": session_id }))
        .await;
    second.assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(second.json::<Value>()["error"]["code"], "CAPACITY_EXCEEDED");
}

#[tokio::test]
async fn test_duplicate_check_in_is_conflict() {
    let server = test_server().await;
    let session_id = open_session(&server, 10).await;
    let participant_id = participant(&server, "QR-1").await;
    let body = json!({ "participant_id": participant_id, "session_id": session_id });

    server.post("/api/v1/check-ins").json(&body).await.assert_status(StatusCode::CREATED);
    let again = server.post("/api/v1/check-ins").json(&body).await;

    again.assert_status(StatusCode::CONFLICT);
    assert_eq!(again.json::<Value>()["error"]["code"], "ALREADY_CHECKED_IN");
}

#[tokio::test]
async fn test_check_in_to_scheduled_session_rejected() {
    let server = test_server().await;
    let start = Utc::now() + Duration::hours(3);
    let created = server
        .post("/api/v1/sessions")
        .json(&json!({
            "name": "Later",
            "start_time": start,
            "end_time": start + Duration::hours(1),
        }))
        .await;
    let session_id = created.json::<Value>()["id"].as_str().unwrap().to_string();
    let participant_id = participant(&server, "QR-1").await;

    let response = server
        .post("/api/v1/check-ins")
        .json(&json!({ "participant_id": participant_id, "session_id": session_id }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["code"], "SESSION_NOT_OPEN");
}

#[tokio::test]
async fn test_remove_frees_capacity() {
    let server = test_server().await;
    let session_id = open_session(&server, 1).await;
    let participant_id = participant(&server, "QR-1").await;

    let created = server
        .post("/api/v1/check-ins")
        .json(&json!({ "participant_id": participant_id, "session_id": session_id }))
        .await;
    let check_in_id = created.json::<Value>()["check_in"]["id"].as_str().unwrap().to_string();

    server
        .delete(&format!("/api/v1/check-ins/{}", check_in_id))
        .await
        .assert_status_ok();
    server
        .delete(&format!("/api/v1/check-ins/{}", check_in_id))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let capacity = server
        .get(&format!("/api/v1/sessions/{}/capacity", session_id))
        .await
        .json::<Value>();
    assert_eq!(capacity["check_ins_count"], 0);
    assert_eq!(capacity["remaining"], 1);
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_create_session_validation() {
    let server = test_server().await;
    let start = Utc::now();

    let response = server
        .post("/api/v1/sessions")
        .json(&json!({
            "name": "Backwards",
            "start_time": start,
            "end_time": start - Duration::minutes(30),
        }))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let server = test_server().await;

    server.get("/api/v1/sessions/missing").await.assert_status(StatusCode::NOT_FOUND);
    server
        .get("/api/v1/sessions/missing/capacity")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_registration_gate() {
    let server = test_server().await;
    let start = Utc::now() - Duration::minutes(5);
    let created = server
        .post("/api/v1/sessions")
        .json(&json!({
            "name": "Invite only",
            "start_time": start,
            "end_time": start + Duration::hours(1),
            "requires_registration": true,
        }))
        .await;
    let session_id = created.json::<Value>()["id"].as_str().unwrap().to_string();
    server
        .put(&format!("/api/v1/sessions/{}/status", session_id))
        .json(&json!({ "status": "OPEN" }))
        .await
        .assert_status_ok();
    let participant_id = participant(&server, "QR-1").await;
    let body = json!({ "participant_id": participant_id, "session_id": session_id });

    server.post("/api/v1/check-ins").json(&body).await.assert_status(StatusCode::FORBIDDEN);

    server
        .post(&format!("/api/v1/sessions/{}/registrations", session_id))
        .json(&json!({ "participant_id": participant_id }))
        .await
        .assert_status(StatusCode::CREATED);
    server.post("/api/v1/check-ins").json(&body).await.assert_status(StatusCode::CREATED);

    let stats = server
        .get(&format!("/api/v1/sessions/{}/stats", session_id))
        .await
        .json::<Value>();
    assert_eq!(stats["total"], 1);
    assert_eq!(stats["manual"], 1);

    let listed = server
        .get(&format!("/api/v1/sessions/{}/check-ins", session_id))
        .await
        .json::<Value>();
    assert_eq!(listed["total"], 1);
}
