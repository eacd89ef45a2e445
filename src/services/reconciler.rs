//! Event application workers.
//!
//! One worker per queue partition pulls accepted ledger entries and
//! drives them through the transaction state machine. Storage failures
//! are retried with exponential backoff, then the entry is parked in
//! the dead letter view. Ordering within a transaction comes from the
//! queue's partitioning; nothing here takes cross-entry locks.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{
    AppliedEvent, CardToken, DomainEvent, EventStatus, NormalizedStatus, Transaction,
    TransactionStatus, Transition, WebhookEvent,
};
use crate::ports::{
    EventLedger, InsertOutcome, Notifier, StoreError, TokenStore, TransactionStore,
};
use crate::providers::ProviderRegistry;
use crate::services::queue::EventQueue;

const RECOVERY_BATCH: i64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct ApplyPolicy {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for ApplyPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_base_ms: 200,
        }
    }
}

/// What happened to one ledger entry. The ledger row is the
/// authoritative record; this is for callers and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// Redelivery of an outcome already on record.
    AlreadyApplied,
    /// A progress notification that changes nothing.
    Informational,
    Orphaned,
    Rejected,
    /// Retries exhausted, parked in the dead letter view.
    DeadLettered,
    /// Entry missing or no longer in an applicable status.
    Skipped,
}

pub struct Reconciler {
    transactions: Arc<dyn TransactionStore>,
    events: Arc<dyn EventLedger>,
    tokens: Arc<dyn TokenStore>,
    registry: Arc<ProviderRegistry>,
    notifier: Arc<dyn Notifier>,
    queue: EventQueue,
    policy: ApplyPolicy,
}

impl Reconciler {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        events: Arc<dyn EventLedger>,
        tokens: Arc<dyn TokenStore>,
        registry: Arc<ProviderRegistry>,
        notifier: Arc<dyn Notifier>,
        queue: EventQueue,
        policy: ApplyPolicy,
    ) -> Self {
        Self {
            transactions,
            events,
            tokens,
            registry,
            notifier,
            queue,
            policy,
        }
    }

    /// Spawns one worker task per queue partition.
    pub fn spawn_workers(
        self: &Arc<Self>,
        receivers: Vec<UnboundedReceiver<Uuid>>,
    ) -> Vec<JoinHandle<()>> {
        receivers
            .into_iter()
            .enumerate()
            .map(|(partition, receiver)| {
                let worker = Arc::clone(self);
                tokio::spawn(async move { worker.run(partition, receiver).await })
            })
            .collect()
    }

    async fn run(&self, partition: usize, mut receiver: UnboundedReceiver<Uuid>) {
        info!(partition, "apply worker started");
        while let Some(event_id) = receiver.recv().await {
            self.process(event_id).await;
            self.queue.mark_done();
        }
        info!(partition, "apply worker stopped");
    }

    /// Re-enqueues every entry still marked accepted. Run at boot so a
    /// crash between ledger insert and queue delivery loses nothing.
    pub async fn recover_pending(&self) -> Result<usize, StoreError> {
        let pending = self
            .events
            .list_by_status(EventStatus::Accepted, RECOVERY_BATCH)
            .await?;
        let mut recovered = 0;
        for event in &pending {
            if self.queue.enqueue(event.partition_hint(), event.id).is_ok() {
                recovered += 1;
            }
        }
        if recovered > 0 {
            info!(count = recovered, "re-enqueued unapplied ledger entries");
        }
        Ok(recovered)
    }

    /// Applies one entry, retrying storage failures with exponential
    /// backoff before parking the entry permanently.
    pub async fn process(&self, event_id: Uuid) -> ApplyOutcome {
        let mut last_error = String::new();
        for attempt in 0..self.policy.max_attempts {
            if attempt > 0 {
                let shift = (attempt - 1).min(8);
                let delay = self.policy.backoff_base_ms.saturating_mul(1 << shift);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            match self.apply(event_id).await {
                Ok(outcome) => return outcome,
                Err(e) => {
                    warn!(
                        event_id = %event_id,
                        attempt = attempt + 1,
                        error = %e,
                        "event application failed"
                    );
                    last_error = e.to_string();
                }
            }
        }
        self.park(event_id, &last_error).await;
        ApplyOutcome::DeadLettered
    }

    async fn apply(&self, event_id: Uuid) -> Result<ApplyOutcome, StoreError> {
        let Some(mut event) = self.events.get(event_id).await? else {
            warn!(event_id = %event_id, "queued event not found in the ledger");
            return Ok(ApplyOutcome::Skipped);
        };
        if event.status != EventStatus::Accepted {
            debug!(event_id = %event.id, status = %event.status, "entry already settled");
            return Ok(ApplyOutcome::Skipped);
        }
        event.attempts += 1;

        let Some(adapter) = self.registry.get(&event.provider) else {
            return self.reject(event, "provider no longer configured").await;
        };

        let Some(mut tx) = self.resolve_transaction(&event).await? else {
            event.status = EventStatus::Orphaned;
            event.updated_at = Utc::now();
            self.events.update(&event).await?;
            warn!(
                event_id = %event.id,
                provider = %event.provider,
                "no transaction matches this event, parked as orphaned"
            );
            return Ok(ApplyOutcome::Orphaned);
        };

        let target = match adapter.map_status(&event.status_code) {
            NormalizedStatus::Approved => TransactionStatus::Success,
            NormalizedStatus::Declined => TransactionStatus::Failed,
            NormalizedStatus::Pending => {
                event.status = EventStatus::Applied;
                event.transaction_id = Some(tx.id);
                event.updated_at = Utc::now();
                self.events.update(&event).await?;
                info!(
                    event_id = %event.id,
                    transaction_id = %tx.id,
                    code = %event.status_code,
                    "progress notification acknowledged"
                );
                return Ok(ApplyOutcome::Informational);
            }
            NormalizedStatus::Unknown => {
                let reason = format!("unmapped provider status code {}", event.status_code);
                event.transaction_id = Some(tx.id);
                return self.reject(event, &reason).await;
            }
        };

        // Token before transaction update. A crash between the two
        // writes leaves the event accepted; the re-run finds the token
        // already present and only finishes the transition. Material on
        // a transaction that never asked for a token is ignored.
        if target == TransactionStatus::Success && tx.token_requested() {
            if let Some(material) = &event.token_material {
                let token = CardToken::from_material(
                    &event.provider,
                    tx.id,
                    tx.user_ref.clone(),
                    &event.idempotency_key,
                    material,
                );
                match self.tokens.create_if_absent(&token).await? {
                    InsertOutcome::Inserted => {
                        info!(
                            token_id = %token.id,
                            transaction_id = %tx.id,
                            "card token stored"
                        );
                        self.emit(DomainEvent::TokenCreated {
                            token_id: token.id,
                            transaction_id: tx.id,
                            provider: event.provider.clone(),
                            user_ref: token.user_ref.clone(),
                        })
                        .await;
                    }
                    InsertOutcome::Duplicate => {
                        debug!(
                            transaction_id = %tx.id,
                            "token already stored for this event"
                        );
                    }
                }
            }
        }

        let now = Utc::now();
        match tx.apply_status(target, now) {
            Transition::Applied { from, to } => {
                if let Some(reference) = &event.external_reference {
                    if !tx.record_external_reference(reference) {
                        warn!(
                            transaction_id = %tx.id,
                            reference = %reference,
                            "event carries a provider reference different from the one on record"
                        );
                    }
                }
                if to == TransactionStatus::Failed {
                    tx.failure_reason = event
                        .failure_message
                        .clone()
                        .or_else(|| Some(format!("provider status {}", event.status_code)));
                }
                tx.provider_payload = Some(event.raw_payload.clone());
                self.transactions.update(&tx).await?;
                self.transactions
                    .record_applied(&AppliedEvent::new(tx.id, Some(event.id), from, to))
                    .await?;
                event.status = EventStatus::Applied;
                event.transaction_id = Some(tx.id);
                event.updated_at = now;
                self.events.update(&event).await?;
                info!(
                    event_id = %event.id,
                    transaction_id = %tx.id,
                    from = %from,
                    to = %to,
                    "event applied"
                );
                self.notify_terminal(&tx).await;
                Ok(ApplyOutcome::Applied)
            }
            Transition::NoOp { status } => {
                event.status = EventStatus::Applied;
                event.transaction_id = Some(tx.id);
                event.updated_at = now;
                self.events.update(&event).await?;
                debug!(
                    event_id = %event.id,
                    transaction_id = %tx.id,
                    status = %status,
                    "redelivered outcome already on record"
                );
                Ok(ApplyOutcome::AlreadyApplied)
            }
            Transition::Illegal { from, to } => {
                let reason = format!("illegal transition from {} to {}", from, to);
                event.transaction_id = Some(tx.id);
                self.reject(event, &reason).await
            }
        }
    }

    /// Transaction resolution order: an operator-made link wins, then
    /// the correlation echoed by the provider, then the provider-side
    /// reference.
    async fn resolve_transaction(
        &self,
        event: &WebhookEvent,
    ) -> Result<Option<Transaction>, StoreError> {
        if let Some(id) = event.transaction_id {
            if let Some(tx) = self.transactions.get(id).await? {
                return Ok(Some(tx));
            }
        }
        if let Some(correlation) = &event.correlation {
            if let Ok(id) = correlation.parse::<Uuid>() {
                if let Some(tx) = self.transactions.get(id).await? {
                    return Ok(Some(tx));
                }
            }
        }
        if let Some(reference) = &event.external_reference {
            if let Some(tx) = self
                .transactions
                .find_by_external_reference(&event.provider, reference)
                .await?
            {
                return Ok(Some(tx));
            }
        }
        Ok(None)
    }

    async fn reject(
        &self,
        mut event: WebhookEvent,
        reason: &str,
    ) -> Result<ApplyOutcome, StoreError> {
        event.status = EventStatus::Rejected;
        event.last_error = Some(reason.to_string());
        event.updated_at = Utc::now();
        self.events.update(&event).await?;
        warn!(
            event_id = %event.id,
            provider = %event.provider,
            reason,
            "event rejected"
        );
        Ok(ApplyOutcome::Rejected)
    }

    async fn park(&self, event_id: Uuid, last_error: &str) {
        match self.events.get(event_id).await {
            Ok(Some(mut event)) => {
                event.status = EventStatus::FailedPermanently;
                event.attempts = self.policy.max_attempts as i32;
                event.last_error = Some(last_error.to_string());
                event.updated_at = Utc::now();
                match self.events.update(&event).await {
                    Ok(()) => warn!(
                        event_id = %event.id,
                        "retries exhausted, event parked in the dead letter view"
                    ),
                    Err(e) => warn!(
                        event_id = %event_id,
                        error = %e,
                        "failed to park event, boot recovery will retry it"
                    ),
                }
            }
            Ok(None) => {
                warn!(event_id = %event_id, "event disappeared before it could be parked")
            }
            Err(e) => warn!(
                event_id = %event_id,
                error = %e,
                "failed to load event for parking"
            ),
        }
    }

    async fn notify_terminal(&self, tx: &Transaction) {
        let event = match tx.status {
            TransactionStatus::Success => DomainEvent::TransactionSucceeded {
                transaction_id: tx.id,
                provider: tx.provider.clone(),
                amount: tx.amount.clone(),
                currency: tx.currency,
                external_reference: tx.external_reference.clone(),
            },
            TransactionStatus::Failed => DomainEvent::TransactionFailed {
                transaction_id: tx.id,
                provider: tx.provider.clone(),
                reason: tx.failure_reason.clone(),
            },
            _ => return,
        };
        self.emit(event).await;
    }

    async fn emit(&self, event: DomainEvent) {
        if let Err(e) = self.notifier.notify(event).await {
            warn!(error = %e, "domain event notification failed");
        }
    }
}
