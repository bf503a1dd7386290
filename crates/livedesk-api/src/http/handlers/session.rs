//! Read-only session history handlers.
//!
//! Endpoints:
//! - GET /api/v1/sessions          - List persisted sessions
//! - GET /api/v1/sessions/waiting  - Sessions waiting for an agent, oldest first
//! - GET /api/v1/sessions/{id}     - One session with its transcript

use std::time::Instant;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use livedesk_core::chat::repository::ChatRepository;
use livedesk_types::chat::{SessionSnapshot, SessionStatus};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::ServerState;

/// Query parameters for session listing.
#[derive(Debug, Deserialize)]
pub struct SessionListQuery {
    /// Filter by status (waiting, active, closed).
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

/// Parse a UUID from a path parameter, returning a 400 error on invalid format.
fn parse_uuid(s: &str) -> Result<Uuid, AppError> {
    s.parse::<Uuid>()
        .map_err(|_| AppError::Validation(format!("Invalid UUID: {s}")))
}

fn parse_status(s: Option<&str>) -> Result<Option<SessionStatus>, AppError> {
    s.map(str::parse::<SessionStatus>)
        .transpose()
        .map_err(AppError::Validation)
}

/// GET /api/v1/sessions - List persisted sessions, oldest first.
pub async fn list_sessions(
    State(state): State<ServerState>,
    Query(query): Query<SessionListQuery>,
) -> Result<Json<ApiResponse<Vec<SessionSnapshot>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let status = parse_status(query.status.as_deref())?;
    if query.limit < 0 || query.offset < 0 {
        return Err(AppError::Validation(
            "limit and offset must not be negative".to_string(),
        ));
    }

    let sessions = state
        .app
        .store
        .list_sessions(status, Some(query.limit), Some(query.offset))
        .await?;
    let snapshots: Vec<SessionSnapshot> = sessions.iter().map(|s| s.snapshot()).collect();

    let elapsed = start.elapsed().as_millis() as u64;
    let count = snapshots.len();
    let resp = ApiResponse::success(snapshots, request_id, elapsed)
        .with_count(count)
        .with_link("self", "/api/v1/sessions");

    Ok(Json(resp))
}

/// GET /api/v1/sessions/waiting - The coordinator's current waiting list.
pub async fn list_waiting(
    State(state): State<ServerState>,
) -> Result<Json<ApiResponse<Vec<SessionSnapshot>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let waiting = state.coordinator.list_waiting().await?;

    let elapsed = start.elapsed().as_millis() as u64;
    let count = waiting.len();
    let resp = ApiResponse::success(waiting, request_id, elapsed)
        .with_count(count)
        .with_link("self", "/api/v1/sessions/waiting");

    Ok(Json(resp))
}

/// GET /api/v1/sessions/{id} - Get a session with its transcript.
pub async fn get_session(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<SessionSnapshot>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let sid = parse_uuid(&session_id)?;

    let session = state
        .app
        .store
        .get_session(&sid)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session {sid} not found")))?;

    let elapsed = start.elapsed().as_millis() as u64;
    let resp = ApiResponse::success(session.snapshot(), request_id, elapsed)
        .with_link("self", &format!("/api/v1/sessions/{}", session.id));

    Ok(Json(resp))
}
