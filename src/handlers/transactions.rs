use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

const LIST_MAX: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[utoipa::path(
    get,
    path = "/transactions",
    params(
        ("limit" = Option<i64>, Query, description = "Page size, capped at 200"),
        ("offset" = Option<i64>, Query, description = "Rows to skip")
    ),
    responses(
        (status = 200, description = "Transactions, newest first")
    ),
    tag = "Transactions"
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Query(page): Query<Pagination>,
) -> Result<Json<Value>, AppError> {
    let limit = page.limit.unwrap_or(50).clamp(1, LIST_MAX);
    let offset = page.offset.unwrap_or(0).max(0);
    let transactions = state.transactions.list(limit, offset).await?;

    Ok(Json(json!({
        "transactions": transactions,
        "count": transactions.len()
    })))
}

#[utoipa::path(
    get,
    path = "/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses(
        (status = 200, description = "The transaction with its status history"),
        (status = 404, description = "No such transaction")
    ),
    tag = "Transactions"
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let tx = state
        .transactions
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;
    let history = state.transactions.history(id).await?;

    Ok(Json(json!({
        "transaction": tx,
        "history": history
    })))
}
