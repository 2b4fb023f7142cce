//! /sessions handlers — session inspection and kill.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use courier_services::SessionSnapshot;

use super::{error_status, parse_session_name, ApiState};

// ── /sessions/:login/:public_id (GET) ─────────────────────────────────────────

pub async fn handle_session_inspect(
    State(state): State<ApiState>,
    Path((login, public_id)): Path<(String, String)>,
) -> Result<Json<SessionSnapshot>, (StatusCode, String)> {
    let name = parse_session_name(&login, &public_id)?;
    let session = state
        .registry
        .subject_by_name(&name.login)
        .and_then(|subject| subject.session_by_public_id(name.public_id))
        .ok_or((StatusCode::NOT_FOUND, "session not found".to_string()))?;
    Ok(Json(session.snapshot()))
}

// ── /sessions/:login/:public_id (DELETE) ──────────────────────────────────────

#[derive(Serialize)]
pub struct SessionKillResponse {
    pub session: String,
    /// The kill was scheduled; the reaper removes the session shortly after.
    pub killed: bool,
}

pub async fn handle_session_kill(
    State(state): State<ApiState>,
    Path((login, public_id)): Path<(String, String)>,
) -> Result<Json<SessionKillResponse>, (StatusCode, String)> {
    let name = parse_session_name(&login, &public_id)?;
    state.registry.kill_session(&name).map_err(error_status)?;
    tracing::info!(session = %name, "session kill requested via API");
    Ok(Json(SessionKillResponse {
        session: name.to_string(),
        killed: true,
    }))
}
