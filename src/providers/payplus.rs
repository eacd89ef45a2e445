//! PayPlus adapter.
//!
//! PayPlus is JSON end to end. Hosted sessions come from the payment
//! page link API and callbacks carry a `hash` header holding a base64
//! HMAC-SHA256 of the raw body. Stored-token charges are not offered on
//! this integration, so the capability flag keeps the initiator from
//! ever dispatching one here.

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::Error as FailsafeError;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;
use std::time::Duration;

use crate::config::ProviderSettings;
use crate::domain::{
    payload_fingerprint, Currency, NormalizedStatus, ParsedCallback, Sealed, SignatureCheck,
    TokenMaterial,
};

use super::{
    Breaker, Capabilities, ChargeOutcome, ProviderAdapter, ProviderError, ProviderOrder,
    SessionHandle, TokenCharge,
};

type HmacSha256 = Hmac<Sha256>;

const APPROVED_CODE: &str = "000";
const PROCESSING_CODE: &str = "002";
const SIGNATURE_HEADER: &str = "hash";

#[derive(Debug, Deserialize)]
struct Credentials {
    api_key: String,
    secret_key: String,
    payment_page_uid: String,
}

pub struct PayplusAdapter {
    client: Client,
    base_url: String,
    credentials: Credentials,
    webhook_secret: Sealed,
    settlement_currency: Option<Currency>,
    circuit_breaker: Breaker,
}

impl PayplusAdapter {
    pub fn new(settings: &ProviderSettings, call_timeout_secs: u64) -> anyhow::Result<Self> {
        let credentials: Credentials = serde_json::from_str(settings.credentials.expose())
            .map_err(|e| anyhow::anyhow!("payplus credentials are malformed: {}", e))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(call_timeout_secs))
            .build()
            .unwrap_or_default();

        // Callbacks are signed with the secret key unless an explicit
        // webhook secret is configured.
        let webhook_secret = settings
            .webhook_secret
            .clone()
            .unwrap_or_else(|| Sealed::new(credentials.secret_key.clone()));

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            credentials,
            webhook_secret,
            settlement_currency: settings.settlement_currency,
            circuit_breaker: super::new_breaker(3, 60),
        })
    }

    async fn post_json(&self, path: &str, body: Value) -> Result<Value, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let client = self.client.clone();
        let api_key = self.credentials.api_key.clone();
        let secret_key = self.credentials.secret_key.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client
                    .post(&url)
                    .header("api-key", api_key)
                    .header("secret-key", secret_key)
                    .json(&body)
                    .send()
                    .await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ProviderError::Unavailable(format!(
                        "payplus returned HTTP {}",
                        status
                    )));
                }
                response
                    .json::<Value>()
                    .await
                    .map_err(|e| ProviderError::Protocol(format!("payplus sent invalid JSON: {}", e)))
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(ProviderError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn string_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

#[async_trait]
impl ProviderAdapter for PayplusAdapter {
    fn name(&self) -> &'static str {
        "payplus"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            hosted_session: true,
            tokenization: false,
            stored_token_charge: false,
            step_up: false,
            refunds: false,
        }
    }

    fn settlement_currency(&self) -> Option<Currency> {
        self.settlement_currency
    }

    async fn create_session(&self, order: &ProviderOrder) -> Result<SessionHandle, ProviderError> {
        let body = json!({
            "payment_page_uid": self.credentials.payment_page_uid,
            "charge_method": 1,
            "amount": order.amount.with_scale(2).to_string(),
            "currency_code": order.currency.as_str(),
            "more_info": order.transaction_id.to_string(),
            "customer": {
                "customer_name": order.customer_name,
                "email": order.customer_email,
            },
            "items": [{
                "name": order.description.clone().unwrap_or_else(|| "Order".to_string()),
                "price": order.amount.with_scale(2).to_string(),
            }],
            "refURL_success": order.success_url,
            "refURL_failure": order.failure_url,
            "refURL_callback": order.notify_url,
        });

        let response = self
            .post_json("/api/v1.0/PaymentPages/generateLink", body)
            .await?;

        let status = string_at(&response, "/results/status").unwrap_or_default();
        if status != "success" {
            let description =
                string_at(&response, "/results/description").unwrap_or("no description");
            return Err(ProviderError::Rejected(format!(
                "payplus rejected the session: {}",
                description
            )));
        }

        let redirect_url = string_at(&response, "/data/payment_page_link")
            .ok_or_else(|| {
                ProviderError::Protocol("payplus response has no payment_page_link".into())
            })?
            .to_string();

        Ok(SessionHandle {
            redirect_url,
            session_ref: string_at(&response, "/data/page_request_uid").map(str::to_string),
            payload: response,
        })
    }

    async fn charge_token(&self, _charge: &TokenCharge) -> Result<ChargeOutcome, ProviderError> {
        Err(ProviderError::Unsupported {
            provider: "payplus".to_string(),
            operation: "stored token charge".to_string(),
        })
    }

    fn verify_signature(&self, headers: &HeaderMap, body: &[u8]) -> SignatureCheck {
        let Some(header) = headers.get(SIGNATURE_HEADER) else {
            return SignatureCheck::Absent;
        };
        let Ok(header_value) = header.to_str() else {
            return SignatureCheck::Invalid;
        };
        let Ok(expected) = BASE64.decode(header_value.trim()) else {
            return SignatureCheck::Invalid;
        };

        let Ok(mut mac) = HmacSha256::new_from_slice(self.webhook_secret.expose().as_bytes())
        else {
            return SignatureCheck::Invalid;
        };
        mac.update(body);

        // verify_slice compares in constant time.
        match mac.verify_slice(&expected) {
            Ok(()) => SignatureCheck::Valid,
            Err(_) => SignatureCheck::Invalid,
        }
    }

    fn parse_callback(
        &self,
        _content_type: Option<&str>,
        body: &[u8],
    ) -> Result<ParsedCallback, ProviderError> {
        let raw: Value = serde_json::from_slice(body)
            .map_err(|e| ProviderError::Protocol(format!("payplus callback is not JSON: {}", e)))?;

        let status_code = string_at(&raw, "/status_code")
            .ok_or_else(|| ProviderError::Protocol("payplus callback has no status_code".into()))?
            .to_string();

        let external_reference = string_at(&raw, "/transaction_uid")
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let correlation = string_at(&raw, "/more_info")
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let idempotency_key = match &external_reference {
            Some(uid) => format!("{}:{}", uid, status_code),
            None => payload_fingerprint(&raw),
        };

        let token = string_at(&raw, "/token_uid")
            .filter(|t| !t.is_empty())
            .map(|token_value| TokenMaterial {
                token: token_value.to_string(),
                brand: string_at(&raw, "/brand_name").map(str::to_string),
                last_four: string_at(&raw, "/four_digits").map(str::to_string),
                expiry_month: string_at(&raw, "/expiry_month").map(str::to_string),
                expiry_year: string_at(&raw, "/expiry_year").map(str::to_string),
            });

        let failure_message = if status_code == APPROVED_CODE {
            None
        } else {
            string_at(&raw, "/status_description").map(str::to_string)
        };

        Ok(ParsedCallback {
            idempotency_key,
            external_reference,
            correlation,
            status_code,
            failure_message,
            token,
            raw,
        })
    }

    fn map_status(&self, code: &str) -> NormalizedStatus {
        if code == APPROVED_CODE {
            NormalizedStatus::Approved
        } else if code == PROCESSING_CODE {
            NormalizedStatus::Pending
        } else if code.len() == 3 && code.chars().all(|c| c.is_ascii_digit()) {
            NormalizedStatus::Declined
        } else {
            NormalizedStatus::Unknown
        }
    }
}
