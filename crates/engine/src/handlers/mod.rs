//! HTTP handlers for the Drip engine API.
//!
//! A thin surface over [`WorkflowEngine`](crate::engine::WorkflowEngine):
//! trigger admission, execution controls and delay resumption.

pub mod delays;
pub mod executions;
pub mod health;
pub mod triggers;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use health::{api_health, health_check};

/// Build the application router with all routes.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(api_health))
        .route("/api/triggers/{trigger_type}", post(triggers::admit))
        .route("/api/triggers/{trigger_type}/enqueue", post(triggers::enqueue))
        .route("/api/executions", get(executions::list))
        .route("/api/executions/{execution_id}", get(executions::get))
        .route("/api/executions/{execution_id}/start", post(executions::start))
        .route("/api/executions/{execution_id}/stop", post(executions::stop))
        .route("/api/executions/{execution_id}/pause", post(executions::pause))
        .route("/api/executions/{execution_id}/resume", post(executions::resume))
        .route("/api/executions/{execution_id}/cancel", post(executions::cancel))
        .route("/api/delays/{delay_id}/resume", post(delays::resume))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}
