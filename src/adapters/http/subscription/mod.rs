//! HTTP adapter for billing endpoints.
//!
//! Exposes the reconciliation engine via REST API:
//! - `GET /api/subscriptions` - Current subscription status
//! - `POST /api/subscriptions` - Start a paid subscription
//! - `PUT /api/subscriptions` - Change plan or billing cycle
//! - `POST /api/subscriptions/cancel` - Cancel at period end
//! - `GET /api/subscriptions/plans` - Plan catalog
//! - `PUT /api/payment-method` - Replace the default payment method
//! - `DELETE /api/payment-method/:payment_method_ref` - Detach a payment method
//! - `GET /api/invoices` - Invoice history
//! - `POST /api/webhooks/stripe` - Provider webhook deliveries

pub mod dto;
pub mod handlers;
pub mod routes;

pub use handlers::{BillingAppState, BillingApiError, TenantContext};
pub use routes::{billing_router, payment_method_routes, subscription_routes, webhook_routes};
