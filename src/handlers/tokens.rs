use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::domain::TokenView;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub user_ref: String,
}

/// Lists a customer's stored tokens. Only the projection leaves the
/// store; the credential value itself is never serialized.
#[utoipa::path(
    get,
    path = "/tokens",
    params(("user_ref" = String, Query, description = "Caller-side customer identifier")),
    responses(
        (status = 200, description = "Stored tokens for the customer"),
        (status = 400, description = "Missing user_ref")
    ),
    tag = "Tokens"
)]
pub async fn list_tokens(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<Value>, AppError> {
    let tokens = state.tokens.list_for_user(&query.user_ref).await?;
    let views: Vec<TokenView> = tokens.iter().map(TokenView::from).collect();

    Ok(Json(json!({
        "tokens": views,
        "count": views.len()
    })))
}

/// Revokes a stored token so it can no longer back new charges. The
/// row is kept; settled transactions keep pointing at it. Idempotent.
#[utoipa::path(
    post,
    path = "/tokens/{id}/deactivate",
    responses(
        (status = 200, description = "Token deactivated"),
        (status = 404, description = "No such token")
    ),
    tag = "Tokens"
)]
pub async fn deactivate_token(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state
        .tokens
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("token {}", id)))?;
    state.tokens.deactivate(id).await?;

    info!(token_id = %id, "stored token deactivated");
    Ok(Json(json!({
        "status": "deactivated",
        "token_id": id
    })))
}
