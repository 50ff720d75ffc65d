//! Application layer - Commands, Queries, and Handlers.
//!
//! This layer orchestrates domain operations and coordinates between ports.
//! Command handlers write through the reconciliation engine; query handlers
//! only read (apart from the idempotent invoice backfill).

pub mod handlers;

pub use handlers::subscription::{
    // Commands
    CancelSubscriptionCommand, CancelSubscriptionHandler, CancelSubscriptionResult,
    CreateSubscriptionCommand, CreateSubscriptionHandler, CreateSubscriptionResult,
    HandleProviderWebhookCommand, HandleProviderWebhookHandler,
    ManagePaymentMethodHandler, RemovePaymentMethodCommand, UpdatePaymentMethodCommand,
    UpdateSubscriptionCommand, UpdateSubscriptionHandler, UpdateSubscriptionResult,
    // Queries
    GetSubscriptionStatusHandler, GetSubscriptionStatusQuery, ListInvoicesHandler,
    ListInvoicesQuery, ListPlansHandler, SubscriptionStatusView,
    // Engine
    ReconcilePolicy, Reconciler, RecordWriter,
};
