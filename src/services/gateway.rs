//! Webhook gateway.
//!
//! Receives raw provider callbacks and turns them into accepted ledger
//! entries. The order of operations is load-bearing: authenticity is
//! checked before anything is stored, parsing happens before the
//! idempotency key is consumed, and the ledger insert is the final,
//! atomic step. A callback that fails before the insert leaves no trace
//! and the provider's retry gets a clean slate.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::{SignatureCheck, WebhookEvent};
use crate::error::AppError;
use crate::ports::{EventLedger, InsertOutcome};
use crate::providers::ProviderRegistry;
use crate::services::cache::RecentKeyCache;
use crate::services::queue::EventQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayOutcome {
    /// First delivery: recorded and queued for reconciliation.
    Accepted { event_id: Uuid },
    /// Redelivery: counted on the original entry, nothing queued.
    Duplicate { event_id: Uuid },
}

pub struct WebhookGateway {
    registry: Arc<ProviderRegistry>,
    ledger: Arc<dyn EventLedger>,
    queue: EventQueue,
    cache: Option<RecentKeyCache>,
}

impl WebhookGateway {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        ledger: Arc<dyn EventLedger>,
        queue: EventQueue,
        cache: Option<RecentKeyCache>,
    ) -> Self {
        Self {
            registry,
            ledger,
            queue,
            cache,
        }
    }

    pub async fn receive(
        &self,
        provider_name: &str,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<GatewayOutcome, AppError> {
        let adapter = self
            .registry
            .get(provider_name)
            .ok_or_else(|| AppError::UnknownProvider(provider_name.to_string()))?;

        let signature = adapter.verify_signature(headers, body);
        match signature {
            SignatureCheck::Invalid => {
                warn!(provider = provider_name, "callback failed signature verification");
                return Err(AppError::Authenticity(
                    "callback signature verification failed".to_string(),
                ));
            }
            SignatureCheck::Absent => {
                warn!(
                    provider = provider_name,
                    "callback carried no signature, accepting based on source filtering"
                );
            }
            SignatureCheck::Valid => {}
        }

        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok());
        let parsed = adapter
            .parse_callback(content_type, body)
            .map_err(|e| AppError::MalformedCallback(e.to_string()))?;

        if let Some(cache) = &self.cache {
            if cache
                .first_sighting(provider_name, &parsed.idempotency_key)
                .await
                == Some(false)
            {
                // Re-confirm against the ledger; the cache can be ahead
                // of it but never overrules it.
                if let Some(original) = self
                    .ledger
                    .find_by_key(provider_name, &parsed.idempotency_key)
                    .await?
                {
                    self.ledger
                        .count_duplicate(provider_name, &parsed.idempotency_key)
                        .await?;
                    debug!(
                        provider = provider_name,
                        event_id = %original.id,
                        "redelivery short-circuited by recent key cache"
                    );
                    return Ok(GatewayOutcome::Duplicate {
                        event_id: original.id,
                    });
                }
            }
        }

        let event = WebhookEvent::accepted(provider_name, parsed, signature);
        match self.ledger.insert_if_absent(&event).await? {
            InsertOutcome::Inserted => {
                if let Err(e) = self.queue.enqueue(event.partition_hint(), event.id) {
                    // The entry is durable; boot recovery re-enqueues it.
                    warn!(event_id = %event.id, error = %e, "queue rejected accepted event");
                }
                info!(
                    provider = provider_name,
                    event_id = %event.id,
                    idempotency_key = %event.idempotency_key,
                    "webhook event accepted"
                );
                Ok(GatewayOutcome::Accepted { event_id: event.id })
            }
            InsertOutcome::Duplicate => {
                self.ledger
                    .count_duplicate(provider_name, &event.idempotency_key)
                    .await?;
                let original = self
                    .ledger
                    .find_by_key(provider_name, &event.idempotency_key)
                    .await?
                    .ok_or_else(|| {
                        AppError::Internal("duplicate event vanished from the ledger".to_string())
                    })?;
                info!(
                    provider = provider_name,
                    event_id = %original.id,
                    idempotency_key = %event.idempotency_key,
                    "duplicate delivery recorded"
                );
                Ok(GatewayOutcome::Duplicate {
                    event_id: original.id,
                })
            }
        }
    }
}
