//! /subjects handlers — subject listing, inspection and login blocking.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use courier_services::SubjectSnapshot;

use super::{subject_not_found, ApiState};

// ── /subjects ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SubjectsResponse {
    pub subjects: Vec<SubjectSummary>,
}

#[derive(Serialize)]
pub struct SubjectSummary {
    pub login: String,
    pub num_sessions: usize,
    pub holding_queue_entries: usize,
    pub login_blocked: bool,
}

pub async fn handle_subjects(State(state): State<ApiState>) -> Json<SubjectsResponse> {
    let subjects = state
        .registry
        .subjects()
        .iter()
        .map(|s| SubjectSummary {
            login: s.login().to_string(),
            num_sessions: s.num_sessions(),
            holding_queue_entries: s.holding_queue().num_entries(),
            login_blocked: s.is_login_blocked(),
        })
        .collect();
    Json(SubjectsResponse { subjects })
}

// ── /subjects/:login ──────────────────────────────────────────────────────────

pub async fn handle_subject(
    State(state): State<ApiState>,
    Path(login): Path<String>,
) -> Result<Json<SubjectSnapshot>, (StatusCode, String)> {
    let subject = state
        .registry
        .subject_by_name(&login)
        .ok_or_else(|| subject_not_found(&login))?;
    Ok(Json(subject.snapshot()))
}

// ── /subjects/:login/block, /subjects/:login/unblock ──────────────────────────

#[derive(Serialize)]
pub struct BlockResponse {
    pub login: String,
    pub blocked: bool,
}

fn set_block(state: &ApiState, login: String, block: bool) -> Result<Json<BlockResponse>, (StatusCode, String)> {
    let subject = state
        .registry
        .subject_by_name(&login)
        .ok_or_else(|| subject_not_found(&login))?;
    subject.set_block_login(block);
    tracing::info!(login = %login, block, "login block changed via API");
    Ok(Json(BlockResponse {
        login,
        blocked: subject.is_login_blocked(),
    }))
}

pub async fn handle_block(
    State(state): State<ApiState>,
    Path(login): Path<String>,
) -> Result<Json<BlockResponse>, (StatusCode, String)> {
    set_block(&state, login, true)
}

pub async fn handle_unblock(
    State(state): State<ApiState>,
    Path(login): Path<String>,
) -> Result<Json<BlockResponse>, (StatusCode, String)> {
    set_block(&state, login, false)
}
