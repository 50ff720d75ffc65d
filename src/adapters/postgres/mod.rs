//! PostgreSQL adapters - Database implementations for the store ports.
//!
//! - `PostgresSubscriptionStore` - versioned subscription records and invoice history
//! - `PostgresWebhookEventRepository` - webhook dedup window
//!
//! Schema lives in `migrations/` and is applied by `run_migrations`.

mod subscription_store;
mod webhook_event_repository;

pub use subscription_store::PostgresSubscriptionStore;
pub use webhook_event_repository::PostgresWebhookEventRepository;

use sqlx::PgPool;

/// Applies the bundled schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
