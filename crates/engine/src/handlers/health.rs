//! Health check endpoints.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};

use crate::config::StoreBackend;
use crate::db::health_check as db_health_check;
use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheckResponse {
    pub status: String,
}

/// Detailed health check response for the API.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiHealthResponse {
    pub status: String,

    /// Store backend in use (`postgres` or `memory`).
    pub store: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    pub trigger_types: Vec<String>,

    pub uptime_seconds: u64,

    pub version: String,
}

/// `GET /health`
pub async fn health_check() -> Json<HealthCheckResponse> {
    Json(HealthCheckResponse {
        status: "ok".to_string(),
    })
}

/// `GET /api/health`
///
/// Returns `503 Service Unavailable` when the database does not answer.
pub async fn api_health(State(state): State<AppState>) -> (StatusCode, Json<ApiHealthResponse>) {
    let db_healthy = match state.db {
        Some(ref pool) => Some(db_health_check(pool).await),
        None => None,
    };

    let healthy = db_healthy.unwrap_or(true);
    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let store = match state.config.store {
        StoreBackend::Postgres => "postgres",
        StoreBackend::Memory => "memory",
    };

    let response = ApiHealthResponse {
        status: if healthy { "ok" } else { "unhealthy" }.to_string(),
        store: store.to_string(),
        database: db_healthy.map(|ok| if ok { "connected" } else { "disconnected" }.to_string()),
        trigger_types: state
            .engine
            .trigger_types()
            .into_iter()
            .map(String::from)
            .collect(),
        uptime_seconds: state.uptime_seconds(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    (status_code, Json(response))
}
