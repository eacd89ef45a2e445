//! CardCom adapter.
//!
//! CardCom speaks form-encoded payloads in both directions. Hosted
//! sessions go through the LowProfile endpoint, stored tokens are
//! charged directly and may come back with a 3-D Secure challenge URL.
//! Callbacks carry no signature; the engine compensates with source IP
//! filtering and the ledger's idempotency gate.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::Error as FailsafeError;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::config::ProviderSettings;
use crate::domain::{
    payload_fingerprint, Currency, NormalizedStatus, OperationMode, ParsedCallback, SignatureCheck,
    TokenMaterial,
};

use super::{
    Breaker, Capabilities, ChargeOutcome, ProviderAdapter, ProviderError, ProviderOrder,
    SessionHandle, TokenCharge,
};

const APPROVED_CODE: &str = "0";

#[derive(Debug, Deserialize)]
struct Credentials {
    terminal: String,
    username: String,
}

pub struct CardcomAdapter {
    client: Client,
    base_url: String,
    credentials: Credentials,
    settlement_currency: Option<Currency>,
    circuit_breaker: Breaker,
}

impl CardcomAdapter {
    pub fn new(settings: &ProviderSettings, call_timeout_secs: u64) -> anyhow::Result<Self> {
        let credentials: Credentials = serde_json::from_str(settings.credentials.expose())
            .map_err(|e| anyhow::anyhow!("cardcom credentials are malformed: {}", e))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(call_timeout_secs))
            .build()
            .unwrap_or_default();

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            credentials,
            settlement_currency: settings.settlement_currency,
            circuit_breaker: super::new_breaker(3, 60),
        })
    }

    /// POSTs a form and returns the raw response body. The circuit
    /// breaker covers transport and HTTP-level failures only; a decline
    /// in a well-formed body is not a provider outage.
    async fn post_form(
        &self,
        path: &str,
        form: Vec<(&'static str, String)>,
    ) -> Result<String, ProviderError> {
        let url = format!("{}{}", self.base_url, path);
        let client = self.client.clone();

        let result = self
            .circuit_breaker
            .call(async move {
                let response = client.post(&url).form(&form).send().await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ProviderError::Unavailable(format!(
                        "cardcom returned HTTP {}",
                        status
                    )));
                }
                Ok(response.text().await?)
            })
            .await;

        match result {
            Ok(body) => Ok(body),
            Err(FailsafeError::Rejected) => Err(ProviderError::CircuitOpen),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }

    fn operation_code(mode: OperationMode) -> &'static str {
        match mode {
            OperationMode::ChargeOnly | OperationMode::ChargeWithStepUp => "1",
            OperationMode::ChargeAndTokenize => "2",
        }
    }

    fn coin_id(currency: Currency) -> String {
        match currency {
            Currency::Ils => "1".to_string(),
            Currency::Usd => "2".to_string(),
            other => other.iso_numeric().to_string(),
        }
    }
}

/// Case-insensitive lookup, CardCom is not consistent about key casing.
fn get_field<'a>(fields: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

fn fields_to_value(fields: &HashMap<String, String>) -> serde_json::Value {
    serde_json::Value::Object(
        fields
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect(),
    )
}

fn parse_form(body: &[u8]) -> Result<HashMap<String, String>, ProviderError> {
    serde_urlencoded::from_bytes::<HashMap<String, String>>(body)
        .map_err(|e| ProviderError::Protocol(format!("cardcom body is not form-encoded: {}", e)))
}

/// `TokenExDate` arrives as MMYY.
fn parse_token_expiry(raw: &str) -> (Option<String>, Option<String>) {
    if raw.len() == 4 && raw.chars().all(|c| c.is_ascii_digit()) {
        (
            Some(raw[..2].to_string()),
            Some(format!("20{}", &raw[2..])),
        )
    } else {
        (None, None)
    }
}

#[async_trait]
impl ProviderAdapter for CardcomAdapter {
    fn name(&self) -> &'static str {
        "cardcom"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            hosted_session: true,
            tokenization: true,
            stored_token_charge: true,
            step_up: true,
            refunds: true,
        }
    }

    fn settlement_currency(&self) -> Option<Currency> {
        self.settlement_currency
    }

    async fn create_session(&self, order: &ProviderOrder) -> Result<SessionHandle, ProviderError> {
        let form = vec![
            ("TerminalNumber", self.credentials.terminal.clone()),
            ("UserName", self.credentials.username.clone()),
            ("APILevel", "10".to_string()),
            ("codepage", "65001".to_string()),
            ("Operation", Self::operation_code(order.mode).to_string()),
            ("SumToBill", order.amount.with_scale(2).to_string()),
            ("CoinID", Self::coin_id(order.currency)),
            ("Language", "en".to_string()),
            (
                "ProductName",
                order
                    .description
                    .clone()
                    .unwrap_or_else(|| "Order".to_string()),
            ),
            ("SuccessRedirectUrl", order.success_url.clone()),
            ("ErrorRedirectUrl", order.failure_url.clone()),
            ("IndicatorUrl", order.notify_url.clone()),
            ("ReturnValue", order.transaction_id.to_string()),
        ];

        let body = self.post_form("/Interface/LowProfile.aspx", form).await?;
        let fields = parse_form(body.as_bytes())?;

        let code = get_field(&fields, "ResponseCode")
            .ok_or_else(|| ProviderError::Protocol("cardcom response has no ResponseCode".into()))?;
        if code != APPROVED_CODE {
            let description = get_field(&fields, "Description").unwrap_or("no description");
            return Err(ProviderError::Rejected(format!(
                "cardcom code {}: {}",
                code, description
            )));
        }

        let redirect_url = get_field(&fields, "url")
            .ok_or_else(|| ProviderError::Protocol("cardcom response has no redirect url".into()))?
            .to_string();

        Ok(SessionHandle {
            redirect_url,
            session_ref: get_field(&fields, "LowProfileCode").map(str::to_string),
            payload: fields_to_value(&fields),
        })
    }

    async fn charge_token(&self, charge: &TokenCharge) -> Result<ChargeOutcome, ProviderError> {
        let mut form = vec![
            ("TerminalNumber", self.credentials.terminal.clone()),
            ("UserName", self.credentials.username.clone()),
            ("Token", charge.token.clone()),
            ("SumToBill", charge.amount.with_scale(2).to_string()),
            ("CoinID", Self::coin_id(charge.currency)),
            ("ReturnValue", charge.transaction_id.to_string()),
        ];
        if let Some(cvv) = &charge.verification_code {
            form.push(("CVV", cvv.clone()));
        }
        if let Some(month) = &charge.expiry_month {
            form.push(("CardValidityMonth", month.clone()));
        }
        if let Some(year) = &charge.expiry_year {
            form.push(("CardValidityYear", year.clone()));
        }

        let body = self.post_form("/Interface/ChargeToken.aspx", form).await?;
        let fields = parse_form(body.as_bytes())?;
        let payload = fields_to_value(&fields);

        if let Some(url) = get_field(&fields, "ThreeDSecureUrl").filter(|u| !u.is_empty()) {
            return Ok(ChargeOutcome::StepUp {
                url: url.to_string(),
                payload,
            });
        }

        let code = get_field(&fields, "ResponseCode")
            .ok_or_else(|| ProviderError::Protocol("cardcom response has no ResponseCode".into()))?;
        let external_reference = get_field(&fields, "InternalDealNumber").map(str::to_string);

        if code == APPROVED_CODE {
            Ok(ChargeOutcome::Approved {
                external_reference,
                payload,
            })
        } else {
            Ok(ChargeOutcome::Declined {
                external_reference,
                code: code.to_string(),
                message: get_field(&fields, "Description")
                    .unwrap_or("declined")
                    .to_string(),
                payload,
            })
        }
    }

    /// CardCom has no callback signature mechanism.
    fn verify_signature(&self, _headers: &HeaderMap, _body: &[u8]) -> SignatureCheck {
        SignatureCheck::Absent
    }

    fn parse_callback(
        &self,
        _content_type: Option<&str>,
        body: &[u8],
    ) -> Result<ParsedCallback, ProviderError> {
        let fields = parse_form(body)?;
        let raw = fields_to_value(&fields);

        let status_code = get_field(&fields, "OperationResponse")
            .or_else(|| get_field(&fields, "DealResponse"))
            .ok_or_else(|| {
                ProviderError::Protocol("cardcom callback has no OperationResponse".into())
            })?
            .to_string();

        let correlation = get_field(&fields, "ReturnValue")
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        let external_reference = get_field(&fields, "InternalDealNumber")
            .filter(|v| !v.is_empty())
            .map(str::to_string);

        let idempotency_key = match get_field(&fields, "lowprofilecode") {
            Some(lpc) if !lpc.is_empty() => format!(
                "{}:{}:{}",
                lpc,
                external_reference.as_deref().unwrap_or("-"),
                status_code
            ),
            _ => payload_fingerprint(&raw),
        };

        let token = get_field(&fields, "Token")
            .filter(|t| !t.is_empty())
            .map(|token_value| {
                let (expiry_month, expiry_year) =
                    parse_token_expiry(get_field(&fields, "TokenExDate").unwrap_or_default());
                TokenMaterial {
                    token: token_value.to_string(),
                    brand: get_field(&fields, "CardName").map(str::to_string),
                    last_four: get_field(&fields, "Last4CardDigits").map(str::to_string),
                    expiry_month,
                    expiry_year,
                }
            });

        let failure_message = if status_code == APPROVED_CODE {
            None
        } else {
            get_field(&fields, "Description").map(str::to_string)
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
        } else if !code.is_empty() && code.chars().all(|c| c.is_ascii_digit()) {
            NormalizedStatus::Declined
        } else {
            NormalizedStatus::Unknown
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Currency, Sealed};
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use uuid::Uuid;

    fn settings(base_url: &str) -> ProviderSettings {
        ProviderSettings {
            name: "cardcom".to_string(),
            base_url: base_url.to_string(),
            credentials: Sealed::new(r#"{"terminal":"1000","username":"api-user"}"#),
            webhook_secret: None,
            settlement_currency: None,
        }
    }

    fn adapter(base_url: &str) -> CardcomAdapter {
        CardcomAdapter::new(&settings(base_url), 5).unwrap()
    }

    fn order() -> ProviderOrder {
        ProviderOrder {
            transaction_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("100.50").unwrap(),
            currency: Currency::Ils,
            mode: OperationMode::ChargeAndTokenize,
            customer_name: "Dana Levi".to_string(),
            customer_email: "dana@example.com".to_string(),
            description: Some("Annual plan".to_string()),
            success_url: "https://shop.example.com/ok".to_string(),
            failure_url: "https://shop.example.com/fail".to_string(),
            notify_url: "https://engine.example.com/webhooks/cardcom".to_string(),
        }
    }

    #[tokio::test]
    async fn create_session_returns_redirect_and_session_ref() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/LowProfile.aspx")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("TerminalNumber".into(), "1000".into()),
                mockito::Matcher::UrlEncoded("Operation".into(), "2".into()),
                mockito::Matcher::UrlEncoded("SumToBill".into(), "100.50".into()),
                mockito::Matcher::UrlEncoded("CoinID".into(), "1".into()),
            ]))
            .with_status(200)
            .with_body("ResponseCode=0&Description=OK&LowProfileCode=lp-123&url=https%3A%2F%2Fsecure.cardcom.example%2Fpage%2Flp-123")
            .create_async()
            .await;

        let handle = adapter(&server.url()).create_session(&order()).await.unwrap();
        assert_eq!(handle.redirect_url, "https://secure.cardcom.example/page/lp-123");
        assert_eq!(handle.session_ref.as_deref(), Some("lp-123"));
    }

    #[tokio::test]
    async fn create_session_rejection_carries_description() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/LowProfile.aspx")
            .with_status(200)
            .with_body("ResponseCode=33&Description=Terminal+blocked")
            .create_async()
            .await;

        let err = adapter(&server.url()).create_session(&order()).await.unwrap_err();
        match err {
            ProviderError::Rejected(message) => {
                assert!(message.contains("33"));
                assert!(message.contains("Terminal blocked"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn create_session_http_failure_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/LowProfile.aspx")
            .with_status(502)
            .create_async()
            .await;

        let err = adapter(&server.url()).create_session(&order()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unavailable(_)));
    }

    #[tokio::test]
    async fn charge_token_approved() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/ChargeToken.aspx")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("Token".into(), "tok-11".into()),
                mockito::Matcher::UrlEncoded("CVV".into(), "123".into()),
            ]))
            .with_status(200)
            .with_body("ResponseCode=0&Description=OK&InternalDealNumber=778899&ApprovalNumber=41")
            .create_async()
            .await;

        let charge = TokenCharge {
            transaction_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("55.00").unwrap(),
            currency: Currency::Ils,
            token: "tok-11".to_string(),
            verification_code: Some("123".to_string()),
            expiry_month: None,
            expiry_year: None,
        };
        let outcome = adapter(&server.url()).charge_token(&charge).await.unwrap();
        match outcome {
            ChargeOutcome::Approved {
                external_reference, ..
            } => assert_eq!(external_reference.as_deref(), Some("778899")),
            other => panic!("expected Approved, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn charge_token_step_up_redirects() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/ChargeToken.aspx")
            .with_status(200)
            .with_body("ThreeDSecureUrl=https%3A%2F%2F3ds.cardcom.example%2Fchallenge%2F9&ResponseCode=0")
            .create_async()
            .await;

        let charge = TokenCharge {
            transaction_id: Uuid::new_v4(),
            amount: BigDecimal::from_str("55.00").unwrap(),
            currency: Currency::Ils,
            token: "tok-11".to_string(),
            verification_code: None,
            expiry_month: None,
            expiry_year: None,
        };
        let outcome = adapter(&server.url()).charge_token(&charge).await.unwrap();
        match outcome {
            ChargeOutcome::StepUp { url, .. } => {
                assert_eq!(url, "https://3ds.cardcom.example/challenge/9")
            }
            other => panic!("expected StepUp, got {:?}", other),
        }
    }

    #[test]
    fn callback_parses_into_normalized_fields() {
        let adapter = adapter("https://secure.cardcom.example");
        let body = b"terminalnumber=1000&lowprofilecode=lp-9&OperationResponse=0&ReturnValue=3f0c1f6e-8d5c-4be2-a754-8e3f7d0c9a11&InternalDealNumber=445566&Token=tok-42&TokenExDate=0828&Last4CardDigits=4242&CardName=Visa";

        let parsed = adapter.parse_callback(None, body).unwrap();
        assert_eq!(parsed.status_code, "0");
        assert_eq!(
            parsed.correlation.as_deref(),
            Some("3f0c1f6e-8d5c-4be2-a754-8e3f7d0c9a11")
        );
        assert_eq!(parsed.external_reference.as_deref(), Some("445566"));
        assert_eq!(parsed.idempotency_key, "lp-9:445566:0");

        let token = parsed.token.unwrap();
        assert_eq!(token.token, "tok-42");
        assert_eq!(token.last_four.as_deref(), Some("4242"));
        assert_eq!(token.expiry_month.as_deref(), Some("08"));
        assert_eq!(token.expiry_year.as_deref(), Some("2028"));
    }

    #[test]
    fn callback_without_status_code_is_malformed() {
        let adapter = adapter("https://secure.cardcom.example");
        let err = adapter
            .parse_callback(None, b"terminalnumber=1000&ReturnValue=abc")
            .unwrap_err();
        assert!(matches!(err, ProviderError::Protocol(_)));
    }

    #[test]
    fn redelivered_callback_produces_the_same_key() {
        let adapter = adapter("https://secure.cardcom.example");
        let body = b"lowprofilecode=lp-9&OperationResponse=0&InternalDealNumber=445566";
        let first = adapter.parse_callback(None, body).unwrap();
        let second = adapter.parse_callback(None, body).unwrap();
        assert_eq!(first.idempotency_key, second.idempotency_key);
    }

    #[test]
    fn declined_callback_keeps_description() {
        let adapter = adapter("https://secure.cardcom.example");
        let body = b"lowprofilecode=lp-3&OperationResponse=502&Description=Insufficient+funds";
        let parsed = adapter.parse_callback(None, body).unwrap();
        assert_eq!(parsed.status_code, "502");
        assert_eq!(parsed.failure_message.as_deref(), Some("Insufficient funds"));
        assert!(parsed.token.is_none());
    }

    #[test]
    fn status_mapping_table() {
        let adapter = adapter("https://secure.cardcom.example");
        assert_eq!(adapter.map_status("0"), NormalizedStatus::Approved);
        assert_eq!(adapter.map_status("502"), NormalizedStatus::Declined);
        assert_eq!(adapter.map_status("33"), NormalizedStatus::Declined);
        assert_eq!(adapter.map_status("oops"), NormalizedStatus::Unknown);
        assert_eq!(adapter.map_status(""), NormalizedStatus::Unknown);
    }

    #[test]
    fn signature_is_always_absent() {
        let adapter = adapter("https://secure.cardcom.example");
        assert_eq!(
            adapter.verify_signature(&HeaderMap::new(), b"anything"),
            SignatureCheck::Absent
        );
    }

    #[test]
    fn token_expiry_parsing_handles_garbage() {
        assert_eq!(
            parse_token_expiry("0828"),
            (Some("08".to_string()), Some("2028".to_string()))
        );
        assert_eq!(parse_token_expiry(""), (None, None));
        assert_eq!(parse_token_expiry("bad"), (None, None));
    }
}
