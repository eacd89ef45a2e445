//! Domain events emitted when a transaction reaches a terminal status.

use bigdecimal::BigDecimal;
use serde::Serialize;
use uuid::Uuid;

use super::money::Currency;

/// Outbound notification handed to the [`crate::ports::Notifier`].
/// Emitted at most once per transaction per terminal status; idempotent
/// re-applications of the same event never re-emit.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DomainEvent {
    TransactionSucceeded {
        transaction_id: Uuid,
        provider: String,
        amount: BigDecimal,
        currency: Currency,
        external_reference: Option<String>,
    },
    TransactionFailed {
        transaction_id: Uuid,
        provider: String,
        reason: Option<String>,
    },
    TokenCreated {
        token_id: Uuid,
        transaction_id: Uuid,
        provider: String,
        user_ref: Option<String>,
    },
}
