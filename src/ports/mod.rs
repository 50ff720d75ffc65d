//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the domain and the outside world. Adapters implement these ports.
//!
//! - `PaymentProvider` - external billing system of record
//! - `SubscriptionStore` - versioned per-tenant subscription records
//! - `WebhookEventRepository` - dedup store for inbound provider events

mod payment_provider;
mod store_error;
mod subscription_store;
mod webhook_event_repository;

pub use payment_provider::{
    CreateCustomerRequest, CreateSubscriptionRequest, Customer, PaymentError, PaymentErrorCode,
    PaymentProvider, ProviderInvoice, ProviderSubscription, UpdateSubscriptionRequest,
};
pub use store_error::StoreError;
pub use subscription_store::SubscriptionStore;
pub use webhook_event_repository::{
    ClaimResult, DedupStatus, EventOutcome, WebhookEventRecord, WebhookEventRepository,
    WebhookResult,
};
