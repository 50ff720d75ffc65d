//! Billing domain - subscription records, plans, lifecycle and provider events.
//!
//! # Module Structure
//!
//! - `plan` - Plans, billing cycles and the feature catalog
//! - `status` - Local status and the lifecycle state machine
//! - `record` - The per-tenant `SubscriptionRecord`
//! - `provider_event` - Decoded provider notifications
//! - `errors` - `BillingError` taxonomy
//! - `webhook_errors` - Webhook-specific errors with HTTP status mapping
//! - `webhook_processor` - Dedup-guarded dispatch of provider events

mod errors;
mod plan;
pub(crate) mod provider_event;
mod record;
mod status;
mod webhook_errors;
mod webhook_processor;

pub use errors::BillingError;
pub use plan::{plan_catalog, BillingCycle, Feature, Plan, PlanOffering};
pub use provider_event::{
    InvoiceNotice, ProviderEvent, ProviderEventKind, ProviderSubscriptionStatus,
    SubscriptionNotice, INVOICE_PAYMENT_FAILED, INVOICE_PAYMENT_SUCCEEDED, SUBSCRIPTION_DELETED,
    SUBSCRIPTION_UPDATED,
};
pub use record::{ChangeAction, InvoiceEntry, InvoiceStatus, SubscriptionChange, SubscriptionRecord};
pub use status::{LifecycleState, SubscriptionStatus};
pub use webhook_errors::WebhookError;
pub use webhook_processor::{IdempotentWebhookProcessor, WebhookDispatcher, WebhookEventHandler};
