//! HTTP API endpoints for health checks and state backup.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::protocol::PROTOCOL_VERSION;
use crate::state::AppState;
use crate::store::{keys, StoreSnapshot};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub protocol: &'static str,
    pub rooms: usize,
    pub sessions: usize,
    pub server_now: String,
}

/// GET /api/health
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let rooms = state.store.list(keys::rooms()).await;
    let sessions = state.store.list(keys::sessions()).await;

    match (rooms, sessions) {
        (Ok(rooms), Ok(sessions)) => Json(HealthResponse {
            status: "ok",
            protocol: PROTOCOL_VERSION,
            rooms: rooms.len(),
            sessions: sessions
                .iter()
                .filter(|(key, _)| keys::is_session_root(key))
                .count(),
            server_now: state.clock.now().to_rfc3339(),
        })
        .into_response(),
        (Err(e), _) | (_, Err(e)) => {
            tracing::error!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "store unavailable").into_response()
        }
    }
}

/// Export every document in the store as JSON.
///
/// GET /api/state/export
pub async fn export_state(State(state): State<Arc<AppState>>) -> Response {
    match state.export_state().await {
        Ok(snapshot) => Json(snapshot).into_response(),
        Err(e) => {
            tracing::error!("State export failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Export failed: {}", e)).into_response()
        }
    }
}

/// Import a store snapshot.
///
/// POST /api/state/import
///
/// Replaces all current state with the imported data. Connected clients
/// receive the change through their watches.
pub async fn import_state(
    State(state): State<Arc<AppState>>,
    Json(snapshot): Json<StoreSnapshot>,
) -> Response {
    match state.import_state(snapshot).await {
        Ok(()) => (StatusCode::OK, "State imported successfully").into_response(),
        Err(e) => {
            tracing::error!("State import failed: {}", e);
            (StatusCode::BAD_REQUEST, format!("Import failed: {}", e)).into_response()
        }
    }
}
