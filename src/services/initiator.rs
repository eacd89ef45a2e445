//! Session initiation.
//!
//! Validates the caller's request, fixes the operation mode, persists
//! the pending transaction and only then talks to the provider, so a
//! callback arriving mid-flight always finds a row to correlate with.
//! Stored-token charges resolve synchronously and run through the same
//! state machine as webhook-driven changes.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::money::convert;
use crate::domain::{
    AppliedEvent, Currency, DomainEvent, OperationMode, Transaction, TransactionDraft,
    TransactionStatus, Transition,
};
use crate::error::AppError;
use crate::ports::{Notifier, RateSource, TokenStore, TransactionStore};
use crate::providers::{
    ChargeOutcome, ProviderAdapter, ProviderError, ProviderOrder, ProviderRegistry, TokenCharge,
};
use crate::validation;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionRequest {
    pub provider: String,
    pub amount: BigDecimal,
    pub currency: Currency,
    pub customer_name: String,
    pub customer_email: String,
    pub customer_phone: Option<String>,
    pub user_ref: Option<String>,
    pub description: Option<String>,
    pub success_url: String,
    pub failure_url: String,
    pub notify_url: Option<String>,
    pub stored_token_id: Option<Uuid>,
    pub verification_code: Option<String>,
    #[serde(default)]
    pub request_token_creation: bool,
}

#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// Hosted session created; send the customer to the provider page.
    Redirect {
        transaction_id: Uuid,
        redirect_url: String,
    },
    /// The issuer demands a challenge before the charge can complete.
    StepUpRequired {
        transaction_id: Uuid,
        step_up_url: String,
    },
    /// A stored-token charge resolved synchronously.
    Completed {
        transaction_id: Uuid,
        status: TransactionStatus,
    },
}

/// A stored token wins over everything; a tokenization request only
/// matters when no stored token is given.
pub fn decide_mode(request: &SessionRequest) -> OperationMode {
    if request.stored_token_id.is_some() {
        OperationMode::ChargeWithStepUp
    } else if request.request_token_creation {
        OperationMode::ChargeAndTokenize
    } else {
        OperationMode::ChargeOnly
    }
}

pub struct SessionInitiator {
    transactions: Arc<dyn TransactionStore>,
    tokens: Arc<dyn TokenStore>,
    registry: Arc<ProviderRegistry>,
    rates: Arc<dyn RateSource>,
    notifier: Arc<dyn Notifier>,
    public_base_url: String,
}

impl SessionInitiator {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        tokens: Arc<dyn TokenStore>,
        registry: Arc<ProviderRegistry>,
        rates: Arc<dyn RateSource>,
        notifier: Arc<dyn Notifier>,
        public_base_url: String,
    ) -> Self {
        Self {
            transactions,
            tokens,
            registry,
            rates,
            notifier,
            public_base_url,
        }
    }

    pub async fn create_session(&self, request: SessionRequest) -> Result<SessionOutcome, AppError> {
        validate_request(&request)?;

        let adapter = self
            .registry
            .get(&request.provider)
            .ok_or_else(|| AppError::UnknownProvider(request.provider.clone()))?;
        let capabilities = adapter.capabilities();
        let mode = decide_mode(&request);

        match mode {
            OperationMode::ChargeWithStepUp if !capabilities.stored_token_charge => {
                return Err(AppError::UnsupportedOperation {
                    provider: request.provider.clone(),
                    operation: "stored token charge".to_string(),
                });
            }
            OperationMode::ChargeAndTokenize if !capabilities.tokenization => {
                return Err(AppError::UnsupportedOperation {
                    provider: request.provider.clone(),
                    operation: "tokenization".to_string(),
                });
            }
            OperationMode::ChargeOnly | OperationMode::ChargeAndTokenize
                if !capabilities.hosted_session =>
            {
                return Err(AppError::UnsupportedOperation {
                    provider: request.provider.clone(),
                    operation: "hosted session".to_string(),
                });
            }
            _ => {}
        }

        // Resolve the stored token before creating any state so a bad
        // reference fails without leaving a pending row behind.
        let stored_token = match request.stored_token_id {
            Some(token_id) => {
                let token = self
                    .tokens
                    .get(token_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("stored token {}", token_id)))?;
                if token.provider != request.provider {
                    return Err(AppError::Validation(format!(
                        "stored token {} belongs to provider {}",
                        token_id, token.provider
                    )));
                }
                if !token.active {
                    return Err(AppError::Validation(format!(
                        "stored token {} was revoked",
                        token_id
                    )));
                }
                if !token.is_usable(Utc::now()) {
                    return Err(AppError::Validation(format!(
                        "stored token {} has expired",
                        token_id
                    )));
                }
                Some(token)
            }
            None => None,
        };

        let mut tx = Transaction::create(TransactionDraft {
            provider: request.provider.clone(),
            mode,
            amount: request.amount.clone(),
            currency: request.currency,
            customer_name: validation::sanitize_string(&request.customer_name),
            customer_email: validation::sanitize_string(&request.customer_email),
            customer_phone: request.customer_phone.clone(),
            user_ref: request.user_ref.clone(),
            description: request
                .description
                .as_deref()
                .map(validation::sanitize_string),
            stored_token_id: request.stored_token_id,
        });

        if let Some(target) = adapter.settlement_currency() {
            if target != request.currency {
                match self.rates.rate(request.currency, target).await {
                    Ok(rate) => {
                        tx.settlement_amount = Some(convert(&tx.amount, &rate));
                        tx.settlement_currency = Some(target);
                    }
                    Err(e) => {
                        // A missing rate must not block the charge.
                        warn!(
                            transaction_id = %tx.id,
                            error = %e,
                            "settlement conversion skipped"
                        );
                    }
                }
            }
        }

        self.transactions.insert(&tx).await?;
        info!(
            transaction_id = %tx.id,
            provider = %tx.provider,
            mode = %tx.mode.as_str(),
            "transaction created"
        );

        match stored_token {
            Some(token) => {
                self.charge_stored_token(adapter.as_ref(), tx, &request, token)
                    .await
            }
            None => self.open_hosted_session(adapter.as_ref(), tx, &request, mode).await,
        }
    }

    async fn open_hosted_session(
        &self,
        adapter: &dyn ProviderAdapter,
        mut tx: Transaction,
        request: &SessionRequest,
        mode: OperationMode,
    ) -> Result<SessionOutcome, AppError> {
        let notify_url = request.notify_url.clone().unwrap_or_else(|| {
            format!(
                "{}/webhooks/{}",
                self.public_base_url.trim_end_matches('/'),
                request.provider
            )
        });
        let order = ProviderOrder {
            transaction_id: tx.id,
            amount: tx.amount.clone(),
            currency: tx.currency,
            mode,
            customer_name: tx.customer_name.clone(),
            customer_email: tx.customer_email.clone(),
            description: tx.description.clone(),
            success_url: request.success_url.clone(),
            failure_url: request.failure_url.clone(),
            notify_url,
        };

        match adapter.create_session(&order).await {
            Ok(handle) => {
                tx.provider_session_ref = handle.session_ref;
                tx.updated_at = Utc::now();
                self.transactions.update(&tx).await?;
                info!(
                    transaction_id = %tx.id,
                    provider = %tx.provider,
                    "hosted session created"
                );
                Ok(SessionOutcome::Redirect {
                    transaction_id: tx.id,
                    redirect_url: handle.redirect_url,
                })
            }
            Err(e) => Err(self.fail_synchronously(tx, e).await),
        }
    }

    async fn charge_stored_token(
        &self,
        adapter: &dyn ProviderAdapter,
        mut tx: Transaction,
        request: &SessionRequest,
        token: crate::domain::CardToken,
    ) -> Result<SessionOutcome, AppError> {
        let charge = TokenCharge {
            transaction_id: tx.id,
            amount: tx.amount.clone(),
            currency: tx.currency,
            token: token.token.expose().to_string(),
            verification_code: request.verification_code.clone(),
            expiry_month: token.expiry_month.clone(),
            expiry_year: token.expiry_year.clone(),
        };

        match adapter.charge_token(&charge).await {
            Ok(ChargeOutcome::Approved {
                external_reference,
                payload,
            }) => {
                if let Some(reference) = &external_reference {
                    tx.record_external_reference(reference);
                }
                tx.provider_payload = Some(payload);
                self.complete(&mut tx, TransactionStatus::Success).await?;
                self.emit(DomainEvent::TransactionSucceeded {
                    transaction_id: tx.id,
                    provider: tx.provider.clone(),
                    amount: tx.amount.clone(),
                    currency: tx.currency,
                    external_reference: tx.external_reference.clone(),
                })
                .await;
                Ok(SessionOutcome::Completed {
                    transaction_id: tx.id,
                    status: tx.status,
                })
            }
            Ok(ChargeOutcome::Declined {
                external_reference,
                code,
                message,
                payload,
            }) => {
                if let Some(reference) = &external_reference {
                    tx.record_external_reference(reference);
                }
                tx.provider_payload = Some(payload);
                tx.failure_reason = Some(format!("{}: {}", code, message));
                self.complete(&mut tx, TransactionStatus::Failed).await?;
                self.emit(DomainEvent::TransactionFailed {
                    transaction_id: tx.id,
                    provider: tx.provider.clone(),
                    reason: tx.failure_reason.clone(),
                })
                .await;
                Ok(SessionOutcome::Completed {
                    transaction_id: tx.id,
                    status: tx.status,
                })
            }
            Ok(ChargeOutcome::StepUp { url, payload }) => {
                tx.provider_payload = Some(payload);
                let transition = tx.record_step_up(&url, Utc::now());
                self.persist(&tx, transition).await?;
                info!(
                    transaction_id = %tx.id,
                    "stored token charge escalated to a challenge"
                );
                Ok(SessionOutcome::StepUpRequired {
                    transaction_id: tx.id,
                    step_up_url: url,
                })
            }
            Err(e) => Err(self.fail_synchronously(tx, e).await),
        }
    }

    /// Applies a synchronous status change and records it in the
    /// transaction's history with no originating webhook event.
    async fn complete(
        &self,
        tx: &mut Transaction,
        to: TransactionStatus,
    ) -> Result<(), AppError> {
        let transition = tx.apply_status(to, Utc::now());
        self.persist(tx, transition).await
    }

    async fn persist(&self, tx: &Transaction, transition: Transition) -> Result<(), AppError> {
        self.transactions.update(tx).await?;
        if let Transition::Applied { from, to } = transition {
            self.transactions
                .record_applied(&AppliedEvent::new(tx.id, None, from, to))
                .await?;
        }
        Ok(())
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.notifier.notify(event).await {
            warn!(error = %e, "domain event notification failed");
        }
    }

    /// Marks the transaction failed after a provider call error and
    /// hands the caller a clear error.
    async fn fail_synchronously(&self, mut tx: Transaction, err: ProviderError) -> AppError {
        warn!(
            transaction_id = %tx.id,
            provider = %tx.provider,
            error = %err,
            "provider call failed during session initiation"
        );
        tx.failure_reason = Some(err.to_string());
        if let Err(store_err) = self.complete(&mut tx, TransactionStatus::Failed).await {
            return store_err;
        }
        self.emit(DomainEvent::TransactionFailed {
            transaction_id: tx.id,
            provider: tx.provider.clone(),
            reason: tx.failure_reason.clone(),
        })
        .await;
        err.into()
    }
}

fn validate_request(request: &SessionRequest) -> Result<(), AppError> {
    validation::validate_amount(&request.amount)?;
    validation::validate_customer_name(&request.customer_name)?;
    validation::validate_email(&request.customer_email)?;
    if let Some(phone) = &request.customer_phone {
        validation::validate_phone(phone)?;
    }
    if let Some(user_ref) = &request.user_ref {
        validation::validate_max_len("user_ref", user_ref, validation::USER_REF_MAX_LEN)?;
    }
    if let Some(description) = &request.description {
        validation::validate_max_len(
            "description",
            description,
            validation::DESCRIPTION_MAX_LEN,
        )?;
    }
    validation::validate_redirect_url("success_url", &request.success_url)?;
    validation::validate_redirect_url("failure_url", &request.failure_url)?;
    if let Some(notify_url) = &request.notify_url {
        validation::validate_redirect_url("notify_url", notify_url)?;
    }
    if request.verification_code.is_some() && request.stored_token_id.is_none() {
        return Err(AppError::Validation(
            "verification_code requires stored_token_id".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemoryTokenStore, InMemoryTransactionStore};
    use crate::adapters::{FixedRateSource, LogNotifier};
    use crate::config::ProviderSettings;
    use crate::domain::{CardToken, Sealed, TokenMaterial};
    use crate::ports::TransactionStore;
    use crate::providers::cardcom::CardcomAdapter;
    use crate::providers::payplus::PayplusAdapter;
    use std::str::FromStr;

    fn request() -> SessionRequest {
        SessionRequest {
            provider: "cardcom".to_string(),
            amount: BigDecimal::from_str("100.50").unwrap(),
            currency: Currency::Ils,
            customer_name: "Dana Levi".to_string(),
            customer_email: "dana@example.com".to_string(),
            customer_phone: None,
            user_ref: Some("user-77".to_string()),
            description: Some("Annual plan".to_string()),
            success_url: "https://shop.example.com/ok".to_string(),
            failure_url: "https://shop.example.com/fail".to_string(),
            notify_url: None,
            stored_token_id: None,
            verification_code: None,
            request_token_creation: false,
        }
    }

    #[test]
    fn mode_precedence_follows_the_decision_table() {
        let mut req = request();
        assert_eq!(decide_mode(&req), OperationMode::ChargeOnly);

        req.request_token_creation = true;
        assert_eq!(decide_mode(&req), OperationMode::ChargeAndTokenize);

        req.stored_token_id = Some(Uuid::new_v4());
        assert_eq!(decide_mode(&req), OperationMode::ChargeWithStepUp);

        req.request_token_creation = false;
        assert_eq!(decide_mode(&req), OperationMode::ChargeWithStepUp);
    }

    struct Harness {
        initiator: SessionInitiator,
        transactions: Arc<InMemoryTransactionStore>,
        tokens: Arc<InMemoryTokenStore>,
    }

    fn harness(base_url: &str) -> Harness {
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let tokens = Arc::new(InMemoryTokenStore::new());
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(
            CardcomAdapter::new(
                &ProviderSettings {
                    name: "cardcom".to_string(),
                    base_url: base_url.to_string(),
                    credentials: Sealed::new(r#"{"terminal":"1000","username":"api-user"}"#),
                    webhook_secret: None,
                    settlement_currency: None,
                },
                5,
            )
            .unwrap(),
        ));
        let initiator = SessionInitiator::new(
            transactions.clone(),
            tokens.clone(),
            Arc::new(registry),
            Arc::new(FixedRateSource::new()),
            Arc::new(LogNotifier),
            "http://localhost:8080".to_string(),
        );
        Harness {
            initiator,
            transactions,
            tokens,
        }
    }

    #[tokio::test]
    async fn hosted_session_leaves_transaction_pending() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/LowProfile.aspx")
            .with_status(200)
            .with_body("ResponseCode=0&LowProfileCode=lp-1&url=https%3A%2F%2Fpay.example%2Flp-1")
            .create_async()
            .await;

        let h = harness(&server.url());
        let outcome = h.initiator.create_session(request()).await.unwrap();

        let SessionOutcome::Redirect {
            transaction_id,
            redirect_url,
        } = outcome
        else {
            panic!("expected redirect");
        };
        assert_eq!(redirect_url, "https://pay.example/lp-1");

        let tx = h.transactions.get(transaction_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.mode, OperationMode::ChargeOnly);
        assert_eq!(tx.provider_session_ref.as_deref(), Some("lp-1"));
    }

    #[tokio::test]
    async fn provider_failure_marks_transaction_failed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/LowProfile.aspx")
            .with_status(503)
            .create_async()
            .await;

        let h = harness(&server.url());
        let err = h.initiator.create_session(request()).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderUnavailable(_)));

        let listed = h.transactions.list(10, 0).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, TransactionStatus::Failed);
        assert!(listed[0].failure_reason.is_some());
    }

    #[tokio::test]
    async fn provider_rejection_marks_transaction_failed() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/LowProfile.aspx")
            .with_status(200)
            .with_body("ResponseCode=33&Description=Terminal+blocked")
            .create_async()
            .await;

        let h = harness(&server.url());
        let err = h.initiator.create_session(request()).await.unwrap_err();
        assert!(matches!(err, AppError::ProviderRejected(_)));

        let listed = h.transactions.list(10, 0).await.unwrap();
        assert_eq!(listed[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn stored_token_charge_completes_synchronously() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/ChargeToken.aspx")
            .with_status(200)
            .with_body("ResponseCode=0&InternalDealNumber=8877")
            .create_async()
            .await;

        let h = harness(&server.url());
        let token = CardToken::from_material(
            "cardcom",
            Uuid::new_v4(),
            Some("user-77".to_string()),
            "evt-1",
            &TokenMaterial {
                token: "tok-11".to_string(),
                brand: None,
                last_four: Some("4242".to_string()),
                expiry_month: Some("08".to_string()),
                expiry_year: Some("2028".to_string()),
            },
        );
        h.tokens.create_if_absent(&token).await.unwrap();

        let mut req = request();
        req.stored_token_id = Some(token.id);
        req.verification_code = Some("123".to_string());

        let outcome = h.initiator.create_session(req).await.unwrap();
        let SessionOutcome::Completed {
            transaction_id,
            status,
        } = outcome
        else {
            panic!("expected completion");
        };
        assert_eq!(status, TransactionStatus::Success);

        let tx = h.transactions.get(transaction_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::Success);
        assert_eq!(tx.external_reference.as_deref(), Some("8877"));
        assert!(tx.processed_at.is_some());

        let history = h.transactions.history(transaction_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_status, TransactionStatus::Pending);
        assert_eq!(history[0].to_status, TransactionStatus::Success);
        assert!(history[0].event_id.is_none());
    }

    #[tokio::test]
    async fn stored_token_step_up_parks_the_transaction() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/Interface/ChargeToken.aspx")
            .with_status(200)
            .with_body("ThreeDSecureUrl=https%3A%2F%2F3ds.example%2Fc%2F1")
            .create_async()
            .await;

        let h = harness(&server.url());
        let token = CardToken::from_material(
            "cardcom",
            Uuid::new_v4(),
            None,
            "evt-2",
            &TokenMaterial {
                token: "tok-12".to_string(),
                brand: None,
                last_four: None,
                expiry_month: None,
                expiry_year: None,
            },
        );
        h.tokens.create_if_absent(&token).await.unwrap();

        let mut req = request();
        req.stored_token_id = Some(token.id);

        let outcome = h.initiator.create_session(req).await.unwrap();
        let SessionOutcome::StepUpRequired {
            transaction_id,
            step_up_url,
        } = outcome
        else {
            panic!("expected step up");
        };
        assert_eq!(step_up_url, "https://3ds.example/c/1");

        let tx = h.transactions.get(transaction_id).await.unwrap().unwrap();
        assert_eq!(tx.status, TransactionStatus::StepUpRequired);
        assert_eq!(tx.step_up_url.as_deref(), Some("https://3ds.example/c/1"));
        assert!(tx.processed_at.is_none());
    }

    #[tokio::test]
    async fn revoked_stored_token_fails_fast_without_a_transaction() {
        let h = harness("https://secure.cardcom.example");
        let token = CardToken::from_material(
            "cardcom",
            Uuid::new_v4(),
            Some("user-77".to_string()),
            "evt-3",
            &TokenMaterial {
                token: "tok-13".to_string(),
                brand: None,
                last_four: None,
                expiry_month: None,
                expiry_year: None,
            },
        );
        h.tokens.create_if_absent(&token).await.unwrap();
        h.tokens.deactivate(token.id).await.unwrap();

        let mut req = request();
        req.stored_token_id = Some(token.id);

        let err = h.initiator.create_session(req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.transactions.list(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn expired_stored_token_fails_fast_without_a_transaction() {
        let h = harness("https://secure.cardcom.example");
        let token = CardToken::from_material(
            "cardcom",
            Uuid::new_v4(),
            Some("user-77".to_string()),
            "evt-4",
            &TokenMaterial {
                token: "tok-14".to_string(),
                brand: None,
                last_four: None,
                expiry_month: Some("01".to_string()),
                expiry_year: Some("2020".to_string()),
            },
        );
        h.tokens.create_if_absent(&token).await.unwrap();

        let mut req = request();
        req.stored_token_id = Some(token.id);

        let err = h.initiator.create_session(req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.transactions.list(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_stored_token_fails_fast_without_a_transaction() {
        let h = harness("https://secure.cardcom.example");
        let mut req = request();
        req.stored_token_id = Some(Uuid::new_v4());

        let err = h.initiator.create_session(req).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(h.transactions.list(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn provider_without_the_capability_fails_fast() {
        let transactions = Arc::new(InMemoryTransactionStore::new());
        let tokens = Arc::new(InMemoryTokenStore::new());
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(
            PayplusAdapter::new(
                &ProviderSettings {
                    name: "payplus".to_string(),
                    base_url: "https://restapi.payplus.example".to_string(),
                    credentials: Sealed::new(
                        r#"{"api_key":"k","secret_key":"s","payment_page_uid":"p"}"#,
                    ),
                    webhook_secret: None,
                    settlement_currency: None,
                },
                5,
            )
            .unwrap(),
        ));
        let initiator = SessionInitiator::new(
            transactions.clone(),
            tokens.clone(),
            Arc::new(registry),
            Arc::new(FixedRateSource::new()),
            Arc::new(LogNotifier),
            "http://localhost:8080".to_string(),
        );

        let mut req = request();
        req.provider = "payplus".to_string();
        req.stored_token_id = Some(Uuid::new_v4());

        let err = initiator.create_session(req).await.unwrap_err();
        assert!(matches!(err, AppError::UnsupportedOperation { .. }));
        assert!(transactions.list(10, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_provider_is_rejected() {
        let h = harness("https://secure.cardcom.example");
        let mut req = request();
        req.provider = "stripe".to_string();
        let err = h.initiator.create_session(req).await.unwrap_err();
        assert!(matches!(err, AppError::UnknownProvider(_)));
    }

    #[tokio::test]
    async fn invalid_amount_is_rejected_before_any_io() {
        let h = harness("https://secure.cardcom.example");
        let mut req = request();
        req.amount = BigDecimal::from_str("10.999").unwrap();
        let err = h.initiator.create_session(req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.transactions.list(10, 0).await.unwrap().is_empty());
    }
}
