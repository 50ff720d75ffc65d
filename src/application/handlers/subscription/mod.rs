//! Subscription handlers - the reconciliation engine.
//!
//! Commands talk to the payment provider first and then commit a single
//! versioned write; webhook handlers only write. Every write goes through
//! `RecordWriter::modify`, which retries lost races against the store and
//! never against the provider.

mod cancel_subscription;
mod create_subscription;
mod get_subscription_status;
mod handle_provider_webhook;
mod list_invoices;
mod list_plans;
mod manage_payment_method;
mod provider_event_handlers;
mod reconcile;
mod update_subscription;

pub use cancel_subscription::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
};
pub use create_subscription::{
    CreateSubscriptionCommand, CreateSubscriptionHandler, CreateSubscriptionResult,
};
pub use get_subscription_status::{
    GetSubscriptionStatusHandler, GetSubscriptionStatusQuery, SubscriptionStatusView,
};
pub use handle_provider_webhook::{HandleProviderWebhookCommand, HandleProviderWebhookHandler};
pub use list_invoices::{ListInvoicesHandler, ListInvoicesQuery, INVOICE_FETCH_LIMIT};
pub use list_plans::ListPlansHandler;
pub use manage_payment_method::{
    ManagePaymentMethodHandler, RemovePaymentMethodCommand, UpdatePaymentMethodCommand,
};
pub use provider_event_handlers::{
    PaymentFailedHandler, PaymentSucceededHandler, SubscriptionDeletedHandler,
    SubscriptionEventDispatcher, SubscriptionUpdatedHandler, SubscriptionWebhookProcessor,
};
pub use reconcile::{ReconcilePolicy, Reconciler, RecordWriter};
pub use update_subscription::{
    UpdateSubscriptionCommand, UpdateSubscriptionHandler, UpdateSubscriptionResult,
};
