//! Application configuration module
//!
//! Type-safe configuration loaded from environment variables using the
//! `config` and `dotenvy` crates. Variables carry the `TENANT_BILLING`
//! prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use tenant_billing::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//! ```

mod database;
mod error;
mod payment;
mod reconciliation;
mod server;

pub use database::DatabaseConfig;
pub use error::{ConfigError, ValidationError};
pub use payment::PaymentConfig;
pub use reconciliation::ReconciliationConfig;
pub use server::{Environment, ServerConfig};

use serde::Deserialize;

/// Root application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// PostgreSQL; in-memory stores are used when absent
    #[serde(default)]
    pub database: Option<DatabaseConfig>,

    /// Payment provider configuration (Stripe)
    pub payment: PaymentConfig,

    /// Engine retry, timeout and dedup settings
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `TENANT_BILLING` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `TENANT_BILLING__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `TENANT_BILLING__PAYMENT__PRO_MONTHLY_PRICE_ID=price_...`
    /// - `TENANT_BILLING__RECONCILIATION__MAX_WRITE_ATTEMPTS=5`
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("TENANT_BILLING")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        if let Some(database) = &self.database {
            database.validate()?;
        }
        self.payment.validate()?;
        self.reconciliation.validate()?;
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
