//! Storage and notification boundaries.
//!
//! Services depend on these traits only. Two store families implement
//! them: the Postgres adapters used in production and the in-memory
//! adapters used by tests and database-less development runs.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    AppliedEvent, CardToken, DomainEvent, EventStatus, Transaction, WebhookEvent,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("{0} not found")]
    NotFound(String),
    #[error("stored data invalid: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result of an insert guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError>;
    async fn find_by_external_reference(
        &self,
        provider: &str,
        external_reference: &str,
    ) -> Result<Option<Transaction>, StoreError>;
    async fn update(&self, tx: &Transaction) -> Result<(), StoreError>;
    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Transaction>, StoreError>;
    async fn record_applied(&self, applied: &AppliedEvent) -> Result<(), StoreError>;
    async fn history(&self, transaction_id: Uuid) -> Result<Vec<AppliedEvent>, StoreError>;
}

/// The webhook event ledger. `insert_if_absent` is the idempotency
/// gate: exactly one concurrent insert per `(provider, idempotency_key)`
/// wins, everyone else observes `Duplicate`.
#[async_trait]
pub trait EventLedger: Send + Sync {
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<InsertOutcome, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, StoreError>;
    async fn find_by_key(
        &self,
        provider: &str,
        idempotency_key: &str,
    ) -> Result<Option<WebhookEvent>, StoreError>;
    /// Bumps the redelivery counter on the original entry.
    async fn count_duplicate(&self, provider: &str, idempotency_key: &str)
        -> Result<(), StoreError>;
    async fn update(&self, event: &WebhookEvent) -> Result<(), StoreError>;
    async fn list_by_status(
        &self,
        status: EventStatus,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, StoreError>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Guarded by the `(provider, source_event_key)` uniqueness rule so
    /// a redelivered tokenizing callback can never mint a second token.
    async fn create_if_absent(&self, token: &CardToken) -> Result<InsertOutcome, StoreError>;
    async fn get(&self, id: Uuid) -> Result<Option<CardToken>, StoreError>;
    async fn list_for_user(&self, user_ref: &str) -> Result<Vec<CardToken>, StoreError>;
    /// Revokes a token. Idempotent; errors with `NotFound` for an
    /// unknown id. The row is kept so past charges stay explainable.
    async fn deactivate(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Delivery of domain events to the outside world. Failures are the
/// implementation's problem to log; reconciliation never blocks on a
/// notification.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: DomainEvent) -> anyhow::Result<()>;
}

/// Source of conversion rates for providers that settle in a currency
/// other than the one the customer was charged in.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn rate(
        &self,
        from: crate::domain::Currency,
        to: crate::domain::Currency,
    ) -> anyhow::Result<bigdecimal::BigDecimal>;
}
