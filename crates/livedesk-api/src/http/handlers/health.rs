//! Liveness endpoint.

use axum::extract::State;
use axum::Json;

use crate::state::ServerState;

/// GET /health - Status, version, and live connection counts.
pub async fn health_check(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.app.store.backend_name(),
        "connections": state.events.connection_count(),
        "agents": state.events.agent_count(),
        "started_at": state.started_at.to_rfc3339(),
    }))
}
