//! Webhook event ledger entries and the normalized view of a provider
//! callback.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Result of checking a callback's authenticity proof.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureCheck {
    Valid,
    /// The provider has no signature mechanism, or the header was not
    /// sent. Accepted with a warning; source filtering compensates.
    Absent,
    Invalid,
}

impl SignatureCheck {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureCheck::Valid => "valid",
            SignatureCheck::Absent => "absent",
            SignatureCheck::Invalid => "invalid",
        }
    }
}

impl FromStr for SignatureCheck {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "valid" => Ok(SignatureCheck::Valid),
            "absent" => Ok(SignatureCheck::Absent),
            "invalid" => Ok(SignatureCheck::Invalid),
            other => Err(format!("unknown signature check: {}", other)),
        }
    }
}

/// Lifecycle of a ledger entry. Entries are never deleted; whatever
/// happens to an event is recorded here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Persisted and queued, waiting for a worker.
    Accepted,
    /// Applied to its transaction, including idempotent no-ops.
    Applied,
    /// No transaction could be resolved; parked for an operator.
    Orphaned,
    /// Carried an illegal transition or an unmapped status code.
    Rejected,
    /// Retries exhausted; parked in the dead letter view.
    FailedPermanently,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Accepted => "accepted",
            EventStatus::Applied => "applied",
            EventStatus::Orphaned => "orphaned",
            EventStatus::Rejected => "rejected",
            EventStatus::FailedPermanently => "failed_permanently",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(EventStatus::Accepted),
            "applied" => Ok(EventStatus::Applied),
            "orphaned" => Ok(EventStatus::Orphaned),
            "rejected" => Ok(EventStatus::Rejected),
            "failed_permanently" => Ok(EventStatus::FailedPermanently),
            other => Err(format!("unknown event status: {}", other)),
        }
    }
}

/// Provider status codes collapsed into what the state machine cares
/// about. `Unknown` parks the event as an anomaly instead of guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizedStatus {
    Approved,
    Declined,
    Pending,
    Unknown,
}

/// Reusable credential material carried by a tokenizing callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMaterial {
    pub token: String,
    pub brand: Option<String>,
    pub last_four: Option<String>,
    pub expiry_month: Option<String>,
    pub expiry_year: Option<String>,
}

/// A provider callback after adapter normalization, before it is written
/// to the ledger.
#[derive(Debug, Clone)]
pub struct ParsedCallback {
    /// Unique per callback event within a provider. Redeliveries of the
    /// same event carry the same key.
    pub idempotency_key: String,
    /// Provider-side transaction reference, when the payload carries one.
    pub external_reference: Option<String>,
    /// Our transaction id echoed back by the provider, when supported.
    pub correlation: Option<String>,
    /// Raw provider status code, mapped later via the adapter.
    pub status_code: String,
    pub failure_message: Option<String>,
    pub token: Option<TokenMaterial>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub provider: String,
    pub idempotency_key: String,
    pub raw_payload: serde_json::Value,
    pub external_reference: Option<String>,
    pub correlation: Option<String>,
    pub status_code: String,
    pub failure_message: Option<String>,
    pub token_material: Option<TokenMaterial>,
    pub signature: SignatureCheck,
    pub status: EventStatus,
    pub transaction_id: Option<Uuid>,
    pub attempts: i32,
    pub last_error: Option<String>,
    /// Redeliveries observed after the first acceptance.
    pub duplicate_count: i64,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WebhookEvent {
    pub fn accepted(provider: &str, parsed: ParsedCallback, signature: SignatureCheck) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            idempotency_key: parsed.idempotency_key,
            raw_payload: parsed.raw,
            external_reference: parsed.external_reference,
            correlation: parsed.correlation,
            status_code: parsed.status_code,
            failure_message: parsed.failure_message,
            token_material: parsed.token,
            signature,
            status: EventStatus::Accepted,
            transaction_id: None,
            attempts: 0,
            last_error: None,
            duplicate_count: 0,
            received_at: now,
            updated_at: now,
        }
    }

    /// Hint used to route all events of one transaction to the same
    /// worker partition.
    pub fn partition_hint(&self) -> &str {
        self.correlation
            .as_deref()
            .or(self.external_reference.as_deref())
            .unwrap_or(&self.idempotency_key)
    }
}

/// Stable digest of a callback payload, used as an idempotency key of
/// last resort when a provider sends no usable event identifier.
/// serde_json keeps object keys sorted, so equal payloads hash equally
/// regardless of delivery formatting.
pub fn payload_fingerprint(value: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
}
