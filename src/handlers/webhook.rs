use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::error::AppError;
use crate::services::GatewayOutcome;
use crate::AppState;

/// Provider callback intake. The raw body is handed to the gateway
/// untouched; signature schemes are computed over exact bytes.
#[utoipa::path(
    post,
    path = "/webhooks/{provider}",
    params(
        ("provider" = String, Path, description = "Configured provider name")
    ),
    responses(
        (status = 200, description = "Callback accepted, or a redelivery of one already on record"),
        (status = 400, description = "Unknown provider"),
        (status = 401, description = "Authenticity check failed"),
        (status = 500, description = "Callback could not be normalized; the provider should redeliver")
    ),
    tag = "Webhooks"
)]
pub async fn receive_callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state.gateway.receive(&provider, &headers, &body).await?;
    let body = match outcome {
        GatewayOutcome::Accepted { event_id } => {
            json!({"status": "accepted", "event_id": event_id})
        }
        GatewayOutcome::Duplicate { event_id } => {
            json!({"status": "duplicate", "event_id": event_id})
        }
    };
    Ok((StatusCode::OK, Json(body)))
}
