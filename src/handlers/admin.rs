//! Operator surface: orphan relinking, dead letter requeue, manual
//! cancellation and retirement. Everything here sits behind the admin
//! key layer.

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::domain::{AppliedEvent, EventStatus, TransactionStatus, Transition};
use crate::error::AppError;
use crate::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/providers", get(list_providers))
        .route("/events/orphaned", get(list_orphaned))
        .route("/events/:id", get(get_event))
        .route("/events/:id/link", post(link_event))
        .route("/dlq", get(list_dlq))
        .route("/dlq/:id/requeue", post(requeue_dlq))
        .route("/transactions/:id/cancel", post(cancel_transaction))
        .route("/transactions/:id/retire", post(retire_transaction))
}

#[utoipa::path(
    get,
    path = "/admin/providers",
    responses((status = 200, description = "Configured providers and their capabilities")),
    tag = "Admin"
)]
async fn list_providers(State(state): State<AppState>) -> Json<Value> {
    let providers: Vec<Value> = state
        .registry
        .names()
        .into_iter()
        .filter_map(|name| state.registry.get(&name))
        .map(|adapter| {
            json!({
                "name": adapter.name(),
                "capabilities": adapter.capabilities(),
                "settlement_currency": adapter.settlement_currency().map(|c| c.as_str()),
            })
        })
        .collect();
    Json(json!({
        "providers": providers,
        "count": providers.len()
    }))
}

#[utoipa::path(
    get,
    path = "/admin/events/orphaned",
    responses((status = 200, description = "Events no transaction could be resolved for")),
    tag = "Admin"
)]
async fn list_orphaned(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let events = state
        .events
        .list_by_status(EventStatus::Orphaned, 100)
        .await?;
    Ok(Json(json!({
        "events": events,
        "count": events.len()
    })))
}

async fn get_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let event = state
        .events
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {}", id)))?;
    Ok(Json(json!({ "event": event })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LinkEventRequest {
    pub transaction_id: Uuid,
}

/// Attaches an orphaned event to a transaction and puts it back on the
/// queue. The link lives in the ledger row, so a crash after the update
/// is recovered like any other accepted entry.
#[utoipa::path(
    post,
    path = "/admin/events/{id}/link",
    request_body = LinkEventRequest,
    responses(
        (status = 200, description = "Event linked and requeued"),
        (status = 400, description = "Provider mismatch"),
        (status = 404, description = "Event or transaction not found"),
        (status = 409, description = "Event is not orphaned")
    ),
    tag = "Admin"
)]
async fn link_event(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<LinkEventRequest>,
) -> Result<Json<Value>, AppError> {
    let mut event = state
        .events
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {}", id)))?;
    if event.status != EventStatus::Orphaned {
        return Err(AppError::Conflict(format!(
            "event {} is {}, only orphaned events can be linked",
            id, event.status
        )));
    }

    let tx = state
        .transactions
        .get(payload.transaction_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", payload.transaction_id)))?;
    if tx.provider != event.provider {
        return Err(AppError::Validation(format!(
            "event belongs to provider {}, transaction to {}",
            event.provider, tx.provider
        )));
    }

    event.transaction_id = Some(tx.id);
    event.status = EventStatus::Accepted;
    event.updated_at = Utc::now();
    state.events.update(&event).await?;

    // Route by the transaction so the entry lands on the same partition
    // as the rest of that transaction's events.
    if state.queue.enqueue(&tx.id.to_string(), event.id).is_err() {
        return Err(AppError::Internal("event queue is closed".to_string()));
    }

    info!(event_id = %event.id, transaction_id = %tx.id, "orphaned event linked and requeued");
    Ok(Json(json!({
        "status": "requeued",
        "event_id": event.id,
        "transaction_id": tx.id
    })))
}

#[utoipa::path(
    get,
    path = "/admin/dlq",
    responses((status = 200, description = "Events whose application retries were exhausted")),
    tag = "Admin"
)]
async fn list_dlq(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let events = state
        .events
        .list_by_status(EventStatus::FailedPermanently, 100)
        .await?;
    Ok(Json(json!({
        "events": events,
        "count": events.len()
    })))
}

#[utoipa::path(
    post,
    path = "/admin/dlq/{id}/requeue",
    responses(
        (status = 200, description = "Event returned to the queue"),
        (status = 404, description = "No such event"),
        (status = 409, description = "Event is not in the dead letter view")
    ),
    tag = "Admin"
)]
async fn requeue_dlq(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let mut event = state
        .events
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("event {}", id)))?;
    if event.status != EventStatus::FailedPermanently {
        return Err(AppError::Conflict(format!(
            "event {} is {}, not parked in the dead letter view",
            id, event.status
        )));
    }

    event.status = EventStatus::Accepted;
    event.attempts = 0;
    event.last_error = None;
    event.updated_at = Utc::now();
    state.events.update(&event).await?;

    if state.queue.enqueue(event.partition_hint(), event.id).is_err() {
        return Err(AppError::Internal("event queue is closed".to_string()));
    }

    info!(event_id = %event.id, "dead lettered event requeued");
    Ok(Json(json!({
        "status": "requeued",
        "event_id": event.id
    })))
}

/// Manual cancellation. Idempotent: cancelling a cancelled transaction
/// answers 200; a settled one answers 409.
#[utoipa::path(
    post,
    path = "/admin/transactions/{id}/cancel",
    responses(
        (status = 200, description = "Transaction cancelled"),
        (status = 404, description = "No such transaction"),
        (status = 409, description = "Transaction already settled")
    ),
    tag = "Admin"
)]
async fn cancel_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let mut tx = state
        .transactions
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;

    match tx.apply_status(TransactionStatus::Cancelled, Utc::now()) {
        Transition::Applied { from, to } => {
            state.transactions.update(&tx).await?;
            state
                .transactions
                .record_applied(&AppliedEvent::new(tx.id, None, from, to))
                .await?;
            info!(transaction_id = %tx.id, from = %from, "transaction cancelled by operator");
            Ok(Json(json!({
                "status": "cancelled",
                "transaction_id": tx.id
            })))
        }
        Transition::NoOp { .. } => Ok(Json(json!({
            "status": "cancelled",
            "transaction_id": tx.id
        }))),
        Transition::Illegal { from, .. } => Err(AppError::Conflict(format!(
            "transaction {} is already {}",
            id, from
        ))),
    }
}

/// Archives a settled transaction out of the default listing. The row
/// is never deleted and stays fetchable by id.
#[utoipa::path(
    post,
    path = "/admin/transactions/{id}/retire",
    responses(
        (status = 200, description = "Transaction retired"),
        (status = 404, description = "No such transaction"),
        (status = 409, description = "Transaction is still live")
    ),
    tag = "Admin"
)]
async fn retire_transaction(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let mut tx = state
        .transactions
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("transaction {}", id)))?;

    if tx.retired {
        return Ok(Json(json!({
            "status": "retired",
            "transaction_id": tx.id
        })));
    }
    if !tx.retire(Utc::now()) {
        return Err(AppError::Conflict(format!(
            "transaction {} is still {}",
            id, tx.status
        )));
    }
    state.transactions.update(&tx).await?;

    info!(transaction_id = %tx.id, "transaction retired by operator");
    Ok(Json(json!({
        "status": "retired",
        "transaction_id": tx.id
    })))
}
