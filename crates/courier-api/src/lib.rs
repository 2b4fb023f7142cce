pub mod handlers;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};

pub use handlers::ApiState;

/// Admin routes, nested under `/api`.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/status", get(handlers::handle_status))
        .route("/subjects", get(handlers::handle_subjects))
        .route("/subjects/{login}", get(handlers::handle_subject))
        .route("/subjects/{login}/block", post(handlers::handle_block))
        .route("/subjects/{login}/unblock", post(handlers::handle_unblock))
        .route(
            "/sessions/{login}/{public_id}",
            get(handlers::handle_session_inspect).delete(handlers::handle_session_kill),
        )
        .with_state(state);

    Router::new().nest("/api", api_routes).layer(cors)
}

pub async fn serve(state: ApiState, port: u16) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!(port, "API listening on 127.0.0.1");
    axum::serve(listener, app).await?;
    Ok(())
}
