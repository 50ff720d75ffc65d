//! tenant-billing - subscription reconciliation service
//!
//! Long-running service that:
//! - Serves the tenant billing API (create, change, cancel, status, invoices)
//! - Receives Stripe webhooks and reconciles them into subscription records
//! - Purges expired webhook dedup entries hourly

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use http::HeaderName;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use tenant_billing::adapters::http::{billing_router, BillingAppState};
use tenant_billing::adapters::memory::{InMemorySubscriptionStore, InMemoryWebhookEventRepository};
use tenant_billing::adapters::postgres::{
    self, PostgresSubscriptionStore, PostgresWebhookEventRepository,
};
use tenant_billing::adapters::stripe::StripePaymentAdapter;
use tenant_billing::config::AppConfig;
use tenant_billing::domain::foundation::Timestamp;
use tenant_billing::ports::{SubscriptionStore, WebhookEventRepository};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    tracing::info!(
        environment = ?config.server.environment,
        test_mode = config.payment.is_test_mode(),
        "Starting tenant-billing"
    );

    let (store, webhook_events) = build_stores(&config).await?;

    let provider = Arc::new(StripePaymentAdapter::new(
        config
            .payment
            .stripe_config(config.reconciliation.signature_tolerance_secs),
    ));

    let state = BillingAppState::new(
        store,
        webhook_events.clone(),
        provider,
        config.payment.stripe_webhook_secret.clone(),
    )
    .with_policy(config.reconciliation.policy())
    .with_pending_lease(config.reconciliation.pending_lease());

    spawn_dedup_purge(webhook_events, config.reconciliation.dedup_window_secs());

    let request_id = HeaderName::from_static("x-request-id");
    let app = Router::new()
        .nest("/api", billing_router())
        .with_state(state)
        .layer(TimeoutLayer::new(config.server.request_timeout()))
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid));

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "tenant-billing HTTP listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// JSON logs in production, human-readable otherwise. `RUST_LOG` wins over
/// the configured filter.
fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.server.log_level.as_str().into());

    if config.is_production() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn build_stores(
    config: &AppConfig,
) -> Result<(Arc<dyn SubscriptionStore>, Arc<dyn WebhookEventRepository>), BoxError> {
    match &config.database {
        Some(database) => {
            let pool = database.connect().await?;
            if database.run_migrations {
                postgres::run_migrations(&pool).await?;
                tracing::info!("Database migrations applied");
            }
            let store: Arc<dyn SubscriptionStore> =
                Arc::new(PostgresSubscriptionStore::new(pool.clone()));
            let events: Arc<dyn WebhookEventRepository> =
                Arc::new(PostgresWebhookEventRepository::new(pool));
            Ok((store, events))
        }
        None => {
            tracing::warn!("No database configured; subscription records are kept in memory");
            let store: Arc<dyn SubscriptionStore> = Arc::new(InMemorySubscriptionStore::new());
            let events: Arc<dyn WebhookEventRepository> =
                Arc::new(InMemoryWebhookEventRepository::new());
            Ok((store, events))
        }
    }
}

/// Hourly removal of dedup entries older than the window.
fn spawn_dedup_purge(events: Arc<dyn WebhookEventRepository>, window_secs: i64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PURGE_INTERVAL);
        loop {
            interval.tick().await;
            let cutoff = Timestamp::now().plus_secs(-window_secs);
            match events.delete_before(cutoff).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!(removed, "Purged expired webhook dedup entries"),
                Err(e) => tracing::warn!(error = %e, "Webhook dedup purge failed"),
            }
        }
    });
}
