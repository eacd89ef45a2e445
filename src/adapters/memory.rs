//! In-memory store adapters.
//!
//! Used by the test suite and by development runs without a
//! `DATABASE_URL`. Each store keeps its maps behind a single `RwLock`
//! so the check-and-insert operations are atomic, the same guarantee
//! the Postgres adapters get from unique constraints.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::{AppliedEvent, CardToken, EventStatus, Transaction, WebhookEvent};
use crate::ports::{
    EventLedger, InsertOutcome, StoreError, TokenStore, TransactionStore,
};

#[derive(Default)]
struct TransactionsInner {
    transactions: HashMap<Uuid, Transaction>,
    history: Vec<AppliedEvent>,
}

#[derive(Clone, Default)]
pub struct InMemoryTransactionStore {
    inner: Arc<RwLock<TransactionsInner>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.transactions.insert(tx.id, tx.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Transaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.transactions.get(&id).cloned())
    }

    async fn find_by_external_reference(
        &self,
        provider: &str,
        external_reference: &str,
    ) -> Result<Option<Transaction>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .transactions
            .values()
            .find(|tx| {
                tx.provider == provider
                    && tx.external_reference.as_deref() == Some(external_reference)
            })
            .cloned())
    }

    async fn update(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.transactions.get_mut(&tx.id) {
            Some(existing) => {
                *existing = tx.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("transaction {}", tx.id))),
        }
    }

    async fn list(&self, limit: i64, offset: i64) -> Result<Vec<Transaction>, StoreError> {
        let inner = self.inner.read().await;
        let mut all: Vec<Transaction> = inner
            .transactions
            .values()
            .filter(|tx| !tx.retired)
            .cloned()
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn record_applied(&self, applied: &AppliedEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.history.push(applied.clone());
        Ok(())
    }

    async fn history(&self, transaction_id: Uuid) -> Result<Vec<AppliedEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .history
            .iter()
            .filter(|applied| applied.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
struct LedgerInner {
    events: HashMap<Uuid, WebhookEvent>,
    by_key: HashMap<(String, String), Uuid>,
}

#[derive(Clone, Default)]
pub struct InMemoryEventLedger {
    inner: Arc<RwLock<LedgerInner>>,
}

impl InMemoryEventLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventLedger for InMemoryEventLedger {
    async fn insert_if_absent(&self, event: &WebhookEvent) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (event.provider.clone(), event.idempotency_key.clone());
        if inner.by_key.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        inner.by_key.insert(key, event.id);
        inner.events.insert(event.id, event.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<WebhookEvent>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.events.get(&id).cloned())
    }

    async fn find_by_key(
        &self,
        provider: &str,
        idempotency_key: &str,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        let inner = self.inner.read().await;
        let id = inner
            .by_key
            .get(&(provider.to_string(), idempotency_key.to_string()))
            .copied();
        Ok(id.and_then(|id| inner.events.get(&id).cloned()))
    }

    async fn count_duplicate(
        &self,
        provider: &str,
        idempotency_key: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        let id = inner
            .by_key
            .get(&(provider.to_string(), idempotency_key.to_string()))
            .copied();
        match id.and_then(|id| inner.events.get_mut(&id)) {
            Some(event) => {
                event.duplicate_count += 1;
                event.updated_at = Utc::now();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "webhook event {}/{}",
                provider, idempotency_key
            ))),
        }
    }

    async fn update(&self, event: &WebhookEvent) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.events.get_mut(&event.id) {
            Some(existing) => {
                *existing = event.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("webhook event {}", event.id))),
        }
    }

    async fn list_by_status(
        &self,
        status: EventStatus,
        limit: i64,
    ) -> Result<Vec<WebhookEvent>, StoreError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<WebhookEvent> = inner
            .events
            .values()
            .filter(|event| event.status == status)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.received_at.cmp(&b.received_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }
}

#[derive(Default)]
struct TokensInner {
    tokens: HashMap<Uuid, CardToken>,
    by_source: HashMap<(String, String), Uuid>,
}

#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    inner: Arc<RwLock<TokensInner>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn create_if_absent(&self, token: &CardToken) -> Result<InsertOutcome, StoreError> {
        let mut inner = self.inner.write().await;
        let key = (token.provider.clone(), token.source_event_key.clone());
        if inner.by_source.contains_key(&key) {
            return Ok(InsertOutcome::Duplicate);
        }
        inner.by_source.insert(key, token.id);
        inner.tokens.insert(token.id, token.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn get(&self, id: Uuid) -> Result<Option<CardToken>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.tokens.get(&id).cloned())
    }

    async fn list_for_user(&self, user_ref: &str) -> Result<Vec<CardToken>, StoreError> {
        let inner = self.inner.read().await;
        let mut matching: Vec<CardToken> = inner
            .tokens
            .values()
            .filter(|token| token.user_ref.as_deref() == Some(user_ref))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(matching)
    }

    async fn deactivate(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        match inner.tokens.get_mut(&id) {
            Some(token) => {
                token.active = false;
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("card token {}", id))),
        }
    }
}
