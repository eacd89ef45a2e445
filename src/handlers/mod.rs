pub mod admin;
pub mod sessions;
pub mod tokens;
pub mod transactions;
pub mod webhook;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use utoipa::ToSchema;

use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    /// Which store family backs the engine: `postgres` or `memory`.
    pub store: String,
    pub db: String,
    pub queue_depth: i64,
    pub providers: Vec<String>,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthStatus),
        (status = 503, description = "Database is unreachable", body = HealthStatus)
    ),
    tag = "Health"
)]
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let (store, db_status) = match &state.db {
        Some(pool) => {
            let db = match sqlx::query("SELECT 1").execute(pool).await {
                Ok(_) => "connected",
                Err(_) => "disconnected",
            };
            ("postgres", db)
        }
        None => ("memory", "not_configured"),
    };

    let healthy = db_status != "disconnected";
    let response = HealthStatus {
        status: if healthy { "healthy" } else { "unhealthy" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        store: store.to_string(),
        db: db_status.to_string(),
        queue_depth: state.queue.depth(),
        providers: state.registry.names(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}
