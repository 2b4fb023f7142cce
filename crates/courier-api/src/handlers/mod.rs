//! HTTP API handlers — exposes registry state as JSON.

pub mod sessions;
pub mod status;
pub mod subjects;

use std::sync::Arc;

use axum::http::StatusCode;

use courier_core::SessionName;
use courier_services::{Authenticate, RegistryError};

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Authenticate>,
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// Build a session name from the `{login}/{public_id}` path segments.
fn parse_session_name(login: &str, public_id: &str) -> Result<SessionName, (StatusCode, String)> {
    let id = public_id.parse::<i64>().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "public_id must be an integer".to_string(),
        )
    })?;
    Ok(SessionName::new(login, id))
}

/// Map a registry error onto an HTTP status.
fn error_status(e: RegistryError) -> (StatusCode, String) {
    let status = match &e {
        RegistryError::UnknownSession => StatusCode::NOT_FOUND,
        RegistryError::AccessDenied(_) | RegistryError::Authentication { .. } => StatusCode::FORBIDDEN,
        RegistryError::Capacity { .. } => StatusCode::CONFLICT,
        RegistryError::Shutdown(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn subject_not_found(login: &str) -> (StatusCode, String) {
    (StatusCode::NOT_FOUND, format!("subject '{}' not found", login))
}

// Re-export handler functions for use in router setup.
pub use sessions::{handle_session_inspect, handle_session_kill};
pub use status::handle_status;
pub use subjects::{handle_block, handle_subject, handle_subjects, handle_unblock};
