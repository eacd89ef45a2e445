//! Redis-backed recent-key cache.
//!
//! An advisory pre-check in front of the ledger's idempotency gate.
//! During a redelivery storm it lets the gateway skip the insert
//! attempt for keys it has already seen recently. The ledger stays the
//! authority: a cache hit is always re-confirmed against it, and any
//! Redis failure fails open.

use redis::AsyncCommands;
use tracing::warn;

const RECENT_KEY_PREFIX: &str = "webhook:seen:";
const RECENT_KEY_TTL: usize = 86400; // 24 hours in seconds

#[derive(Clone)]
pub struct RecentKeyCache {
    redis_client: redis::Client,
}

impl RecentKeyCache {
    pub fn new(redis_url: &str) -> anyhow::Result<Self> {
        let redis_client = redis::Client::open(redis_url)?;
        Ok(Self { redis_client })
    }

    /// Atomically marks the key as seen. `Some(true)` on first
    /// sighting, `Some(false)` when the key was already marked, `None`
    /// when Redis is unreachable.
    pub async fn first_sighting(&self, provider: &str, idempotency_key: &str) -> Option<bool> {
        match self.try_mark(provider, idempotency_key).await {
            Ok(first) => Some(first),
            Err(e) => {
                warn!(error = %e, "recent key cache unavailable, continuing without it");
                None
            }
        }
    }

    async fn try_mark(&self, provider: &str, idempotency_key: &str) -> anyhow::Result<bool> {
        let mut conn = self.redis_client.get_multiplexed_async_connection().await?;
        let key = format!("{}{}:{}", RECENT_KEY_PREFIX, provider, idempotency_key);

        let options = redis::SetOptions::default()
            .conditional_set(redis::ExistenceCheck::NX)
            .with_expiration(redis::SetExpiry::EX(RECENT_KEY_TTL));
        let outcome: Option<String> = conn.set_options(&key, "1", options).await?;

        Ok(outcome.is_some())
    }
}
