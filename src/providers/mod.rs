//! Provider adapters.
//!
//! Everything provider-specific lives behind [`ProviderAdapter`]:
//! endpoint shapes, signature schemes, status code tables. The rest of
//! the engine sees one normalized surface and consults
//! [`Capabilities`] before attempting an operation.

pub mod cardcom;
pub mod payplus;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use bigdecimal::BigDecimal;
use failsafe::{backoff, failure_policy, Config as BreakerConfig, StateMachine};
use thiserror::Error;
use uuid::Uuid;

use crate::config::ProviderSettings;
use crate::domain::{Currency, NormalizedStatus, OperationMode, ParsedCallback, SignatureCheck};

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider unreachable: {0}")]
    Unavailable(String),
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("unexpected provider response: {0}")]
    Protocol(String),
    #[error("provider {provider} does not support {operation}")]
    Unsupported { provider: String, operation: String },
    #[error("provider circuit breaker is open")]
    CircuitOpen,
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Unavailable(format!("request timed out: {}", err))
        } else {
            ProviderError::Unavailable(err.to_string())
        }
    }
}

/// What a provider can do. Checked before dispatch so unsupported
/// operations fail fast instead of producing a confusing provider error.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Capabilities {
    pub hosted_session: bool,
    pub tokenization: bool,
    pub stored_token_charge: bool,
    pub step_up: bool,
    /// Advertised for the operator surface; no refund operation runs
    /// through this service yet.
    pub refunds: bool,
}

/// Input for creating a hosted payment session.
#[derive(Debug, Clone)]
pub struct ProviderOrder {
    pub transaction_id: Uuid,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub mode: OperationMode,
    pub customer_name: String,
    pub customer_email: String,
    pub description: Option<String>,
    pub success_url: String,
    pub failure_url: String,
    pub notify_url: String,
}

/// A created hosted session: where to send the customer, plus the
/// provider's reference for the session if it issues one.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub redirect_url: String,
    pub session_ref: Option<String>,
    pub payload: serde_json::Value,
}

/// Input for charging a stored credential directly.
#[derive(Debug, Clone)]
pub struct TokenCharge {
    pub transaction_id: Uuid,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub token: String,
    pub verification_code: Option<String>,
    pub expiry_month: Option<String>,
    pub expiry_year: Option<String>,
}

/// Synchronous result of a direct charge.
#[derive(Debug, Clone)]
pub enum ChargeOutcome {
    Approved {
        external_reference: Option<String>,
        payload: serde_json::Value,
    },
    Declined {
        external_reference: Option<String>,
        code: String,
        message: String,
        payload: serde_json::Value,
    },
    /// The issuer demands a challenge; the customer must visit `url`
    /// and the final result arrives over the webhook channel.
    StepUp {
        url: String,
        payload: serde_json::Value,
    },
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities;

    /// The currency this provider settles in, when one is configured.
    fn settlement_currency(&self) -> Option<Currency> {
        None
    }

    async fn create_session(&self, order: &ProviderOrder) -> Result<SessionHandle, ProviderError>;

    async fn charge_token(&self, charge: &TokenCharge) -> Result<ChargeOutcome, ProviderError>;

    /// Checks the callback's authenticity proof against the raw body.
    /// Never touches storage.
    fn verify_signature(&self, headers: &HeaderMap, body: &[u8]) -> SignatureCheck;

    /// Normalizes a raw callback body. A parse failure here means the
    /// event was never recorded and the provider should retry.
    fn parse_callback(
        &self,
        content_type: Option<&str>,
        body: &[u8],
    ) -> Result<ParsedCallback, ProviderError>;

    /// Collapses a provider status code into the normalized vocabulary.
    fn map_status(&self, code: &str) -> NormalizedStatus;
}

pub(crate) type Breaker =
    StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

pub(crate) fn new_breaker(failure_threshold: u32, reset_timeout_secs: u64) -> Breaker {
    let backoff = backoff::equal_jittered(
        Duration::from_secs(reset_timeout_secs),
        Duration::from_secs(reset_timeout_secs * 2),
    );
    let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
    BreakerConfig::new().failure_policy(policy).build()
}

/// Lookup table of configured adapters, keyed by provider name.
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the registry from configuration. Unknown provider names are
/// a startup error, not something to discover at request time.
pub fn build_registry(
    providers: &[ProviderSettings],
    call_timeout_secs: u64,
) -> anyhow::Result<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    for settings in providers {
        match settings.name.as_str() {
            "cardcom" => registry.register(Arc::new(cardcom::CardcomAdapter::new(
                settings,
                call_timeout_secs,
            )?)),
            "payplus" => registry.register(Arc::new(payplus::PayplusAdapter::new(
                settings,
                call_timeout_secs,
            )?)),
            other => anyhow::bail!("unknown provider in configuration: {}", other),
        }
    }
    Ok(registry)
}
