//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the domain to external systems:
//! - `memory` - In-memory stores for tests and database-less runs
//! - `postgres` - PostgreSQL stores
//! - `stripe` - Stripe payment provider
//! - `http` - Axum REST API

pub mod http;
pub mod memory;
pub mod postgres;
pub mod stripe;

pub use memory::{InMemorySubscriptionStore, InMemoryWebhookEventRepository};
pub use postgres::{PostgresSubscriptionStore, PostgresWebhookEventRepository};
pub use stripe::{MockPaymentProvider, StripeConfig, StripePaymentAdapter, StripePriceMap};
