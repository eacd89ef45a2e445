//! Transaction entity and its status state machine.
//!
//! Every status change in the system, whether driven by a webhook event,
//! a synchronous provider response or an operator action, goes through
//! [`TransactionStatus::transition_to`] so the legality rules live in
//! exactly one place.

use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::money::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    StepUpRequired,
    Success,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::StepUpRequired => "step_up_required",
            TransactionStatus::Success => "success",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Success | TransactionStatus::Failed | TransactionStatus::Cancelled
        )
    }

    /// Evaluates a requested status change without applying it.
    ///
    /// Same-status requests are idempotent no-ops, terminal states accept
    /// nothing else, and `cancelled` is reachable only from the two live
    /// states.
    pub fn transition_to(self, to: TransactionStatus) -> Transition {
        use TransactionStatus::*;

        if self == to {
            return Transition::NoOp { status: self };
        }
        let legal = match (self, to) {
            (Pending, StepUpRequired) => true,
            (Pending, Success) | (Pending, Failed) | (Pending, Cancelled) => true,
            (StepUpRequired, Success) | (StepUpRequired, Failed) | (StepUpRequired, Cancelled) => {
                true
            }
            _ => false,
        };
        if legal {
            Transition::Applied { from: self, to }
        } else {
            Transition::Illegal { from: self, to }
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "step_up_required" => Ok(TransactionStatus::StepUpRequired),
            "success" => Ok(TransactionStatus::Success),
            "failed" => Ok(TransactionStatus::Failed),
            "cancelled" => Ok(TransactionStatus::Cancelled),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Outcome of asking the state machine for a status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: TransactionStatus,
        to: TransactionStatus,
    },
    NoOp {
        status: TransactionStatus,
    },
    Illegal {
        from: TransactionStatus,
        to: TransactionStatus,
    },
}

/// How a transaction interacts with the provider, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// Hosted payment page, no credential storage.
    ChargeOnly,
    /// Hosted payment page that also returns a reusable token.
    ChargeAndTokenize,
    /// Direct charge against a stored token, may escalate to a challenge.
    ChargeWithStepUp,
}

impl OperationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationMode::ChargeOnly => "charge_only",
            OperationMode::ChargeAndTokenize => "charge_and_tokenize",
            OperationMode::ChargeWithStepUp => "charge_with_step_up",
        }
    }
}

impl FromStr for OperationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "charge_only" => Ok(OperationMode::ChargeOnly),
            "charge_and_tokenize" => Ok(OperationMode::ChargeAndTokenize),
            "charge_with_step_up" => Ok(OperationMode::ChargeWithStepUp),
            other => Err(format!("unknown operation mode: {}", other)),
        }
    }
}

/// Field bundle for creating a transaction.
#[derive(Debug, Clone)]
pub struct TransactionDraft {
    pub provider: String,
    pub mode: OperationMode,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub user_ref: Option<String>,
    pub description: Option<String>,
    pub stored_token_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: Uuid,
    pub provider: String,
    pub mode: OperationMode,
    pub status: TransactionStatus,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub settlement_amount: Option<BigDecimal>,
    pub settlement_currency: Option<Currency>,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub user_ref: Option<String>,
    pub description: Option<String>,
    /// Provider-side transaction reference, set once by the first event
    /// that carries it.
    pub external_reference: Option<String>,
    pub provider_session_ref: Option<String>,
    pub stored_token_id: Option<Uuid>,
    /// Challenge redirect the customer was sent to, kept for audit even
    /// after the transaction resolves.
    pub step_up_url: Option<String>,
    pub failure_reason: Option<String>,
    pub provider_payload: Option<serde_json::Value>,
    /// Soft-retire flag; rows are never deleted.
    pub retired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    pub fn create(draft: TransactionDraft) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider: draft.provider,
            mode: draft.mode,
            status: TransactionStatus::Pending,
            amount: draft.amount,
            currency: draft.currency,
            settlement_amount: None,
            settlement_currency: None,
            customer_name: draft.customer_name,
            customer_email: draft.customer_email,
            customer_phone: draft.customer_phone,
            user_ref: draft.user_ref,
            description: draft.description,
            external_reference: None,
            provider_session_ref: None,
            stored_token_id: draft.stored_token_id,
            step_up_url: None,
            failure_reason: None,
            provider_payload: None,
            retired: false,
            created_at: now,
            updated_at: now,
            processed_at: None,
            failed_at: None,
        }
    }

    /// Whether this transaction asked the provider to mint a reusable
    /// token alongside the charge.
    pub fn token_requested(&self) -> bool {
        self.mode == OperationMode::ChargeAndTokenize
    }

    /// Applies a status change if the state machine allows it and stamps
    /// the bookkeeping timestamps. The caller decides what to do with a
    /// `NoOp` or `Illegal` result; the entity is untouched in both cases.
    pub fn apply_status(&mut self, to: TransactionStatus, at: DateTime<Utc>) -> Transition {
        let transition = self.status.transition_to(to);
        if let Transition::Applied { .. } = transition {
            self.status = to;
            self.updated_at = at;
            if to.is_terminal() {
                self.processed_at = Some(at);
            }
            if to == TransactionStatus::Failed {
                self.failed_at = Some(at);
            }
        }
        transition
    }

    /// Moves the transaction into the challenge branch and keeps the
    /// redirect URL the customer was sent to.
    pub fn record_step_up(&mut self, url: &str, at: DateTime<Utc>) -> Transition {
        let transition = self.apply_status(TransactionStatus::StepUpRequired, at);
        if let Transition::Applied { .. } = transition {
            self.step_up_url = Some(url.to_string());
        }
        transition
    }

    /// Soft-retires a settled transaction. A retired row drops out of the
    /// default listing but stays fetchable by id. Returns false while the
    /// transaction is still live.
    pub fn retire(&mut self, at: DateTime<Utc>) -> bool {
        if !self.status.is_terminal() {
            return false;
        }
        if !self.retired {
            self.retired = true;
            self.updated_at = at;
        }
        true
    }

    /// Records the provider-side reference the first time it is seen.
    /// Returns false when a different reference was already recorded,
    /// which callers log as an anomaly.
    pub fn record_external_reference(&mut self, reference: &str) -> bool {
        match &self.external_reference {
            None => {
                self.external_reference = Some(reference.to_string());
                true
            }
            Some(existing) => existing == reference,
        }
    }
}

/// Append-only history row written for every applied status change,
/// whether it came from a webhook event, a synchronous provider
/// response, or an operator action.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedEvent {
    pub id: Uuid,
    pub transaction_id: Uuid,
    /// Absent when the change came from a synchronous provider response
    /// or an operator action rather than a webhook event.
    pub event_id: Option<Uuid>,
    pub from_status: TransactionStatus,
    pub to_status: TransactionStatus,
    pub applied_at: DateTime<Utc>,
}

impl AppliedEvent {
    pub fn new(
        transaction_id: Uuid,
        event_id: Option<Uuid>,
        from_status: TransactionStatus,
        to_status: TransactionStatus,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            event_id,
            from_status,
            to_status,
            applied_at: Utc::now(),
        }
    }
}
