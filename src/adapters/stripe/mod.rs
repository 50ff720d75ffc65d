//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` port for Stripe, including:
//! - Customer and payment method management
//! - Subscription create, price swap and cancel-at-period-end
//! - Invoice listing
//! - Webhook signature verification and event decoding
//!
//! # Security
//!
//! - Webhook signatures use HMAC-SHA256 with constant-time comparison
//! - Timestamps are validated to prevent replay attacks (5-minute window)
//! - All secrets are handled via `secrecy::SecretString`

mod mock_payment_provider;
mod price_map;
mod stripe_adapter;
mod webhook_types;
mod webhook_verifier;

pub use mock_payment_provider::{MethodCall, MockPaymentProvider};
pub use price_map::StripePriceMap;
pub use stripe_adapter::{StripeConfig, StripePaymentAdapter};
pub use webhook_types::{
    SignatureHeader, SignatureParseError, StripeCustomer, StripeInvoice, StripeSubscription,
    StripeWebhookEvent,
};
pub use webhook_verifier::{sign_payload, StripeWebhookVerifier, DEFAULT_SIGNATURE_TOLERANCE_SECS};
