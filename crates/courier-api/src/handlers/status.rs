//! /status handler.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use courier_services::SessionSnapshot;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub node_id: String,
    pub uptime_secs: u64,
    pub num_subjects: usize,
    pub num_sessions: usize,
    /// Both registry indexes agree.
    pub consistent: bool,
    pub sessions: Vec<SessionSnapshot>,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let status = state.registry.status();
    let sessions = status
        .subjects
        .into_iter()
        .flat_map(|subject| subject.sessions)
        .collect();

    Json(StatusResponse {
        node_id: status.node_id,
        uptime_secs: status.uptime_secs,
        num_subjects: status.num_subjects,
        num_sessions: status.num_sessions,
        consistent: status.consistent,
        sessions,
    })
}
