//! Postgres implementations of the store ports.
//!
//! Idempotency gates (`insert_if_absent`, `create_if_absent`) ride on
//! unique constraints with `ON CONFLICT DO NOTHING`, so concurrent
//! writers race safely inside the database.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    AppliedEvent, CardToken, Currency, EventStatus, OperationMode, Sealed, SignatureCheck,
    TokenMaterial, Transaction, TransactionStatus, WebhookEvent,
};
use crate::ports::{
    EventLedger, InsertOutcome, StoreError, TokenStore, TransactionStore,
};

#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, provider, mode, status, amount, currency,
                settlement_amount, settlement_currency,
                customer_name, customer_email, customer_phone, user_ref, description,
                external_reference, provider_session_ref, stored_token_id, step_up_url,
                failure_reason, provider_payload, retired,
                created_at, updated_at, processed_at, failed_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22, $23, $24
            )
            "#,
        )
        .bind(tx.id)
        .bind(&tx.provider)
        .bind(tx.mode.as_str())
        .bind(tx.status.as_str())
        .bind(&tx.amount)
        .bind(tx.currency.as_str())
        .bind(&tx.settlement_amount)
        .bind(tx.settlement_currency.map(|c| c.as_str()))
        .bind(&tx.customer_name)
        .bind(&tx.customer_email)
        .bind(&tx.customer_phone)
        .bind(&tx.user_ref)
        .bind(&tx.description)
        .bind(&tx.external_reference)
        .bind(&tx.provider_session_ref)
        .bind(tx.stored_token_id)
        .bind(&tx.step_up_url)
        .bind(&tx.failure_reason)
        .bind(&tx.provider_payload)
        .bind(tx.retired)
        .bind(tx.created_at)
        .bind(tx.updated_at)
        .bind(tx.processed_at)
        .bind(tx.failed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn find_by_external_reference(
        &self,
        provider: &str,
        external_reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE provider = $1 AND external_reference = $2",
        )
        .bind(provider)
        .bind(external_reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn update(&self, tx: &Transaction) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                status = $2,
                settlement_amount = $3,
                settlement_currency = $4,
                external_reference = $5,
                provider_session_ref = $6,
                step_up_url = $7,
                failure_reason = $8,
                provider_payload = $9,
                retired = $10,
                updated_at = $11,
                processed_at = $12,
                failed_at = $13
            WHERE id = $1
            "#,
        )
        .bind(tx.id)
        .bind(tx.status.as_str())
        .bind(&tx.settlement_amount)
        .bind(tx.settlement_currency.map(|c| c.as_str()))
        .bind(&tx.external_reference)
        .bind(&tx.provider_session_ref)
        .bind(&tx.step_up_url)
        .bind(&tx.failure_reason)
        .bind(&tx.provider_payload)
        .bind(tx.retired)
        .bind(tx.updated_at)
        .bind(tx.processed_at)
        .bind(tx.failed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("transaction {}", tx.id)));
        }
        Ok(())
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(
            "SELECT * FROM transactions WHERE NOT retired ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn record_applied(&self, applied: &AppliedEvent) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO applied_events (id, transaction_id, event_id, from_status, to_status, applied_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(applied.id)
        .bind(applied.transaction_id)
        .bind(applied.event_id)
        .bind(applied.from_status.as_str())
        .bind(applied.to_status.as_str())
        .bind(applied.applied_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn history(&self, transaction_id: Uuid) -> Result<Vec<AppliedEvent>, StoreError> {
        let rows = sqlx::query_as::<_, AppliedEventRow>(
            "SELECT * FROM applied_events WHERE transaction_id = $1 ORDER BY applied_at ASC",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }
}

#[derive(Clone)]
pub struct PgEventLedger {
    pool: PgPool,
}

impl PgEventLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventLedger for PgEventLedger {
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<InsertOutcome, StoreError> {
        let token_material = event
            .token_material
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (
                id, provider, idempotency_key, raw_payload,
                external_reference, correlation, status_code, failure_message,
                token_material, signature, status, transaction_id,
                attempts, last_error, duplicate_count, received_at, updated_at
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                $11, $12, $13, $14, $15, $16, $17
            )
            ON CONFLICT (provider, idempotency_key) DO NOTHING
            "#,
        )
        .bind(event.id)
        .bind(&event.provider)
        .bind(&event.idempotency_key)
        .bind(&event.raw_payload)
        .bind(&event.external_reference)
        .bind(&event.correlation)
        .bind(&event.status_code)
        .bind(&event.failure_message)
        .bind(token_material)
        .bind(event.signature.as_str())
        .bind(event.status.as_str())
        .bind(event.transaction_id)
        .bind(event.attempts)
        .bind(&event.last_error)
        .bind(event.duplicate_count)
        .bind(event.received_at)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, StoreError> {
        let row = sqlx::query_as::<_, WebhookEventRow>("SELECT * FROM webhook_events WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn find_by_key(
        &self,
        provider: &str,
        idempotency_key: &str,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        let row = sqlx::query_as::<_, WebhookEventRow>(
            "SELECT * FROM webhook_events WHERE provider = $1 AND idempotency_key = $2",
        )
        .bind(provider)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| r.into_domain()).transpose()
    }

    async fn count_duplicate(
        &self,
        provider: &str,
        idempotency_key: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET duplicate_count = duplicate_count + 1, updated_at = NOW()
            WHERE provider = $1 AND idempotency_key = $2
            "#,
        )
        .bind(provider)
        .bind(idempotency_key)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!(
                "webhook event {}/{}",
                provider, idempotency_key
            )));
        }
        Ok(())
    }

    async fn update(&self, event: &WebhookEvent) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events SET
                status = $2,
                transaction_id = $3,
                attempts = $4,
                last_error = $5,
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(event.id)
        .bind(event.status.as_str())
        .bind(event.transaction_id)
        .bind(event.attempts)
        .bind(&event.last_error)
        .bind(event.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("webhook event {}", event.id)));
        }
        Ok(())
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, StoreError> {
        let rows = sqlx::query_as::<_, WebhookEventRow>(
            "SELECT * FROM webhook_events WHERE status = $1 ORDER BY received_at ASC LIMIT $2",
        )
        .bind(status.as_str())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }
}

#[derive(Clone)]
pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    async fn create_if_absent(&self, token: &CardToken) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO card_tokens (
                id, provider, transaction_id, user_ref, source_event_key,
                token, brand, last_four, expiry_month, expiry_year,
                active, expires_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (provider, source_event_key) DO NOTHING
            "#,
        )
        .bind(token.id)
        .bind(&token.provider)
        .bind(token.transaction_id)
        .bind(&token.user_ref)
        .bind(&token.source_event_key)
        .bind(token.token.expose())
        .bind(&token.brand)
        .bind(&token.last_four)
        .bind(&token.expiry_month)
        .bind(&token.expiry_year)
        .bind(token.active)
        .bind(token.expires_at)
        .bind(token.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(InsertOutcome::Inserted)
        } else {
            Ok(InsertOutcome::Duplicate)
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<CardToken>, StoreError> {
        let row = sqlx::query_as::<_, CardTokenRow>("SELECT * FROM card_tokens WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.into_domain()))
    }

    async fn list_for_user(&self, user_ref: &str) -> Result<Vec<CardToken>, StoreError> {
        let rows = sqlx::query_as::<_, CardTokenRow>(
            "SELECT * FROM card_tokens WHERE user_ref = $1 ORDER BY created_at ASC",
        )
        .bind(user_ref)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into_domain()).collect())
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE card_tokens SET active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("card token {}", id)));
        }
        Ok(())
    }
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    provider: String,
    mode: String,
    status: String,
    amount: bigdecimal::BigDecimal,
    currency: String,
    settlement_amount: Option<bigdecimal::BigDecimal>,
    settlement_currency: Option<String>,
    customer_name: String,
    customer_email: String,
    customer_phone: Option<String>,
    user_ref: Option<String>,
    description: Option<String>,
    external_reference: Option<String>,
    provider_session_ref: Option<String>,
    stored_token_id: Option<Uuid>,
    step_up_url: Option<String>,
    failure_reason: Option<String>,
    provider_payload: Option<serde_json::Value>,
    retired: bool,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
    processed_at: Option<chrono::DateTime<chrono::Utc>>,
    failed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl TransactionRow {
    fn into_domain(self) -> Result<Transaction, StoreError> {
        Ok(Transaction {
            id: self.id,
            provider: self.provider,
            mode: self.mode.parse::<OperationMode>().map_err(StoreError::Decode)?,
            status: self
                .status
                .parse::<TransactionStatus>()
                .map_err(StoreError::Decode)?,
            amount: self.amount,
            currency: self.currency.parse::<Currency>().map_err(StoreError::Decode)?,
            settlement_amount: self.settlement_amount,
            settlement_currency: self
                .settlement_currency
                .map(|c| c.parse::<Currency>())
                .transpose()
                .map_err(StoreError::Decode)?,
            customer_name: self.customer_name,
            customer_email: self.customer_email,
            customer_phone: self.customer_phone,
            user_ref: self.user_ref,
            description: self.description,
            external_reference: self.external_reference,
            provider_session_ref: self.provider_session_ref,
            stored_token_id: self.stored_token_id,
            step_up_url: self.step_up_url,
            failure_reason: self.failure_reason,
            provider_payload: self.provider_payload,
            retired: self.retired,
            created_at: self.created_at,
            updated_at: self.updated_at,
            processed_at: self.processed_at,
            failed_at: self.failed_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AppliedEventRow {
    id: Uuid,
    transaction_id: Uuid,
    event_id: Option<Uuid>,
    from_status: String,
    to_status: String,
    applied_at: chrono::DateTime<chrono::Utc>,
}

impl AppliedEventRow {
    fn into_domain(self) -> Result<AppliedEvent, StoreError> {
        Ok(AppliedEvent {
            id: self.id,
            transaction_id: self.transaction_id,
            event_id: self.event_id,
            from_status: self
                .from_status
                .parse::<TransactionStatus>()
                .map_err(StoreError::Decode)?,
            to_status: self
                .to_status
                .parse::<TransactionStatus>()
                .map_err(StoreError::Decode)?,
            applied_at: self.applied_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WebhookEventRow {
    id: Uuid,
    provider: String,
    idempotency_key: String,
    raw_payload: serde_json::Value,
    external_reference: Option<String>,
    correlation: Option<String>,
    status_code: String,
    failure_message: Option<String>,
    token_material: Option<serde_json::Value>,
    signature: String,
    status: String,
    transaction_id: Option<Uuid>,
    attempts: i32,
    last_error: Option<String>,
    duplicate_count: i64,
    received_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl WebhookEventRow {
    fn into_domain(self) -> Result<WebhookEvent, StoreError> {
        let token_material = self
            .token_material
            .map(serde_json::from_value::<TokenMaterial>)
            .transpose()
            .map_err(|e| StoreError::Decode(e.to_string()))?;

        Ok(WebhookEvent {
            id: self.id,
            provider: self.provider,
            idempotency_key: self.idempotency_key,
            raw_payload: self.raw_payload,
            external_reference: self.external_reference,
            correlation: self.correlation,
            status_code: self.status_code,
            failure_message: self.failure_message,
            token_material,
            signature: self
                .signature
                .parse::<SignatureCheck>()
                .map_err(StoreError::Decode)?,
            status: self.status.parse::<EventStatus>().map_err(StoreError::Decode)?,
            transaction_id: self.transaction_id,
            attempts: self.attempts,
            last_error: self.last_error,
            duplicate_count: self.duplicate_count,
            received_at: self.received_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct CardTokenRow {
    id: Uuid,
    provider: String,
    transaction_id: Uuid,
    user_ref: Option<String>,
    source_event_key: String,
    token: String,
    brand: Option<String>,
    last_four: Option<String>,
    expiry_month: Option<String>,
    expiry_year: Option<String>,
    active: bool,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl CardTokenRow {
    fn into_domain(self) -> CardToken {
        CardToken {
            id: self.id,
            provider: self.provider,
            transaction_id: self.transaction_id,
            user_ref: self.user_ref,
            source_event_key: self.source_event_key,
            token: Sealed::new(self.token),
            brand: self.brand,
            last_four: self.last_four,
            expiry_month: self.expiry_month,
            expiry_year: self.expiry_year,
            active: self.active,
            expires_at: self.expires_at,
            created_at: self.created_at,
        }
    }
}
