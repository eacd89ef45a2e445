pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ports;
pub mod providers;
pub mod services;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::adapters::memory::{InMemoryEventLedger, InMemoryTokenStore, InMemoryTransactionStore};
use crate::adapters::postgres::{PgEventLedger, PgTokenStore, PgTransactionStore};
use crate::adapters::{FixedRateSource, LogNotifier};
use crate::config::{AllowedIps, Config};
use crate::domain::Sealed;
use crate::middleware::{admin_auth, IpFilterLayer};
use crate::ports::{EventLedger, Notifier, RateSource, TokenStore, TransactionStore};
use crate::providers::{build_registry, ProviderRegistry};
use crate::services::{
    ApplyPolicy, EventQueue, RecentKeyCache, Reconciler, SessionInitiator, WebhookGateway,
};

/// Shared handler state. Every field is a cheap clone.
#[derive(Clone)]
pub struct AppState {
    /// Present only when running against Postgres; health reporting
    /// pings it.
    pub db: Option<sqlx::PgPool>,
    pub transactions: Arc<dyn TransactionStore>,
    pub events: Arc<dyn EventLedger>,
    pub tokens: Arc<dyn TokenStore>,
    pub registry: Arc<ProviderRegistry>,
    pub gateway: Arc<WebhookGateway>,
    pub initiator: Arc<SessionInitiator>,
    pub queue: EventQueue,
    pub admin_api_key: Option<Sealed>,
}

pub fn create_app(state: AppState, allowed_ips: AllowedIps, trusted_proxy_depth: usize) -> Router {
    // Source filtering applies to the callback surface only; the rest
    // of the API is protected by its own means.
    let webhook = Router::new()
        .route(
            "/webhooks/:provider",
            post(handlers::webhook::receive_callback),
        )
        .layer(IpFilterLayer::new(allowed_ips, trusted_proxy_depth));

    let admin = handlers::admin::admin_routes().route_layer(
        axum::middleware::from_fn_with_state(state.admin_api_key.clone(), admin_auth),
    );

    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions", post(handlers::sessions::create_session))
        .route(
            "/transactions",
            get(handlers::transactions::list_transactions),
        )
        .route(
            "/transactions/:id",
            get(handlers::transactions::get_transaction),
        )
        .route("/tokens", get(handlers::tokens::list_tokens))
        .route(
            "/tokens/:id/deactivate",
            post(handlers::tokens::deactivate_token),
        )
        .merge(webhook)
        .nest("/admin", admin)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Boots the full engine: stores, provider registry, apply workers,
/// boot recovery, then the HTTP listener.
pub async fn start(config: Config) -> anyhow::Result<()> {
    let mut pg_pool = None;
    let (transactions, events, tokens) = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            pg_pool = Some(pool.clone());
            (
                Arc::new(PgTransactionStore::new(pool.clone())) as Arc<dyn TransactionStore>,
                Arc::new(PgEventLedger::new(pool.clone())) as Arc<dyn EventLedger>,
                Arc::new(PgTokenStore::new(pool)) as Arc<dyn TokenStore>,
            )
        }
        None => {
            warn!("DATABASE_URL is not set, using in-memory stores, state is lost on restart");
            (
                Arc::new(InMemoryTransactionStore::new()) as Arc<dyn TransactionStore>,
                Arc::new(InMemoryEventLedger::new()) as Arc<dyn EventLedger>,
                Arc::new(InMemoryTokenStore::new()) as Arc<dyn TokenStore>,
            )
        }
    };

    let registry = Arc::new(build_registry(
        &config.providers,
        config.provider_call_timeout_secs,
    )?);
    if registry.names().is_empty() {
        warn!("no payment providers are enabled");
    } else {
        info!(providers = ?registry.names(), "providers configured");
    }

    let cache = match &config.redis_url {
        Some(url) => Some(RecentKeyCache::new(url)?),
        None => None,
    };

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);
    let mut rate_table = FixedRateSource::new();
    for (from, to, rate) in &config.conversion_rates {
        rate_table = rate_table.with_rate(*from, *to, rate.clone());
    }
    let rates: Arc<dyn RateSource> = Arc::new(rate_table);

    let (queue, receivers) = EventQueue::new(config.worker_count);

    let gateway = Arc::new(WebhookGateway::new(
        Arc::clone(&registry),
        Arc::clone(&events),
        queue.clone(),
        cache,
    ));
    let initiator = Arc::new(SessionInitiator::new(
        Arc::clone(&transactions),
        Arc::clone(&tokens),
        Arc::clone(&registry),
        rates,
        Arc::clone(&notifier),
        config.public_base_url.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        Arc::clone(&transactions),
        Arc::clone(&events),
        Arc::clone(&tokens),
        Arc::clone(&registry),
        Arc::clone(&notifier),
        queue.clone(),
        ApplyPolicy {
            max_attempts: config.apply_max_attempts,
            backoff_base_ms: config.apply_backoff_ms,
        },
    ));
    reconciler.spawn_workers(receivers);
    reconciler.recover_pending().await?;

    let state = AppState {
        db: pg_pool,
        transactions,
        events,
        tokens,
        registry,
        gateway,
        initiator,
        queue,
        admin_api_key: config.admin_api_key.clone(),
    };
    let app = create_app(state, config.allowed_ips.clone(), config.trusted_proxy_depth);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
