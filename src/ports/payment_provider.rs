//! Payment provider port for the external billing system of record.
//!
//! Defines the contract for payment gateway integrations (e.g., Stripe).
//! Each operation is a single remote call. No retries happen behind this
//! interface: transient failures come back as retryable `PaymentError`s and
//! the caller decides what to do.
//!
//! # Design
//!
//! - **Gateway agnostic**: Interface works with any payment provider
//! - **Opaque references**: customer, subscription, invoice and payment
//!   method ids are the provider's strings
//! - **Single trust boundary**: inbound events only enter through
//!   `verify_webhook_signature`

use async_trait::async_trait;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use crate::domain::billing::{
    BillingCycle, BillingError, Plan, ProviderEvent, ProviderSubscriptionStatus,
    SubscriptionStatus,
};
use crate::domain::foundation::{TenantKey, Timestamp};

/// Port for payment provider integrations.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Create a customer, optionally with a default payment method.
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, PaymentError>;

    /// Get customer by provider ID. Deleted customers are `None`.
    async fn retrieve_customer(&self, customer_ref: &str)
        -> Result<Option<Customer>, PaymentError>;

    /// Create a subscription for a customer.
    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, PaymentError>;

    /// Swap the subscription's price, invoicing the proration immediately.
    async fn update_subscription(
        &self,
        request: UpdateSubscriptionRequest,
    ) -> Result<ProviderSubscription, PaymentError>;

    /// Get subscription by provider ID.
    async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<ProviderSubscription>, PaymentError>;

    /// Flag the subscription to cancel at the end of the current period.
    async fn cancel_at_period_end(
        &self,
        subscription_ref: &str,
    ) -> Result<ProviderSubscription, PaymentError>;

    /// Attach a payment method to a customer.
    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
    ) -> Result<(), PaymentError>;

    /// Make a payment method the customer's invoice default.
    async fn set_default_payment_method(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
    ) -> Result<(), PaymentError>;

    /// Detach a payment method from its customer.
    async fn detach_payment_method(&self, payment_method_ref: &str) -> Result<(), PaymentError>;

    /// List the customer's most recent invoices, newest first.
    async fn list_invoices(
        &self,
        customer_ref: &str,
        limit: u8,
    ) -> Result<Vec<ProviderInvoice>, PaymentError>;

    /// Verify a webhook signature against `secret` and decode the event.
    ///
    /// Returns `PaymentErrorCode::InvalidWebhook` for bad signatures and
    /// for payloads that cannot be decoded.
    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<ProviderEvent, PaymentError>;
}

/// Request to create a provider customer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCustomerRequest {
    pub tenant_key: TenantKey,
    /// Payment method attached at creation and made the invoice default.
    pub payment_method_ref: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Customer information from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub default_payment_method: Option<String>,
    pub created_at: i64,
}

/// Request to create a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub customer_ref: String,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
    /// Provider-side dedup key for the create call.
    pub idempotency_key: Option<String>,
}

/// Request to move a subscription to another price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub subscription_ref: String,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
}

/// Subscription details from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub id: String,
    pub customer_id: String,
    pub status: ProviderSubscriptionStatus,
    /// Unix timestamp.
    pub current_period_start: i64,
    /// Unix timestamp.
    pub current_period_end: i64,
    pub cancel_at_period_end: bool,
    /// Unix timestamp at which a requested cancellation takes effect.
    pub cancel_at: Option<i64>,
    pub canceled_at: Option<i64>,
    /// Plan and cycle of the subscribed price, when it is one of ours.
    pub plan: Option<(Plan, BillingCycle)>,
}

impl ProviderSubscription {
    pub fn period_end(&self) -> Option<Timestamp> {
        Timestamp::from_unix_secs(self.current_period_end)
    }

    /// Time at which a requested cancellation takes effect.
    pub fn cancel_effective_at(&self) -> Option<Timestamp> {
        self.cancel_at
            .and_then(Timestamp::from_unix_secs)
            .or_else(|| self.cancel_at_period_end.then(|| self.period_end()).flatten())
    }

    /// Provider status mapped onto the local status.
    pub fn local_status(&self) -> SubscriptionStatus {
        self.status.to_local(self.cancel_at_period_end)
    }

    /// Returns true if the subscription is billed at `plan`/`billing_cycle`.
    pub fn is_on(&self, plan: Plan, billing_cycle: BillingCycle) -> bool {
        self.plan == Some((plan, billing_cycle))
    }
}

/// Invoice summary from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInvoice {
    pub id: String,
    pub customer_id: String,
    pub subscription_id: Option<String>,
    /// Provider status string (draft, open, paid, void, uncollectible).
    pub status: String,
    pub amount_paid: i64,
    pub amount_due: i64,
    /// Unix timestamp.
    pub created: i64,
}

/// Payment provider errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentError {
    /// Error code for categorization.
    pub code: PaymentErrorCode,

    /// Human-readable message.
    pub message: String,

    /// Provider's error code (if available).
    pub provider_code: Option<String>,
}

impl PaymentError {
    pub fn new(code: PaymentErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            provider_code: None,
        }
    }

    pub fn with_provider_code(mut self, code: impl Into<String>) -> Self {
        self.provider_code = Some(code.into());
        self
    }

    /// Transport failure before a response was received.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::NetworkError, message)
    }

    /// No response within the call deadline; the side effect may have happened.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::Timeout, message)
    }

    pub fn card_declined(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::CardDeclined, message)
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::InvalidRequest, message)
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(PaymentErrorCode::NotFound, format!("{} not found", resource))
    }

    pub fn invalid_webhook(message: impl Into<String>) -> Self {
        Self::new(PaymentErrorCode::InvalidWebhook, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Returns true if the provider may or may not have applied the call.
    pub fn is_ambiguous(&self) -> bool {
        self.code == PaymentErrorCode::Timeout
    }
}

impl std::fmt::Display for PaymentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for PaymentError {}

impl From<PaymentError> for BillingError {
    fn from(err: PaymentError) -> Self {
        match err.code {
            PaymentErrorCode::InvalidWebhook => BillingError::SignatureInvalid(err.message),
            code if code.is_retryable() => BillingError::ProviderUnavailable(err.message),
            _ => BillingError::provider_rejected(err.message),
        }
    }
}

/// Payment error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentErrorCode {
    /// Network connectivity issue.
    NetworkError,

    /// Call exceeded its deadline; outcome unknown.
    Timeout,

    /// Rate limit exceeded.
    RateLimitExceeded,

    /// Provider-side 5xx.
    ProviderError,

    /// API authentication failed.
    AuthenticationError,

    /// Card was declined.
    CardDeclined,

    /// Request rejected as invalid (unknown price, bad parameters).
    InvalidRequest,

    /// Resource not found.
    NotFound,

    /// Invalid webhook signature or undecodable payload.
    InvalidWebhook,
}

impl PaymentErrorCode {
    /// Check if this error type is typically retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PaymentErrorCode::NetworkError
                | PaymentErrorCode::Timeout
                | PaymentErrorCode::RateLimitExceeded
                | PaymentErrorCode::ProviderError
        )
    }
}

impl std::fmt::Display for PaymentErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PaymentErrorCode::NetworkError => "network_error",
            PaymentErrorCode::Timeout => "timeout",
            PaymentErrorCode::RateLimitExceeded => "rate_limit_exceeded",
            PaymentErrorCode::ProviderError => "provider_error",
            PaymentErrorCode::AuthenticationError => "authentication_error",
            PaymentErrorCode::CardDeclined => "card_declined",
            PaymentErrorCode::InvalidRequest => "invalid_request",
            PaymentErrorCode::NotFound => "not_found",
            PaymentErrorCode::InvalidWebhook => "invalid_webhook",
        };
        write!(f, "{}", s)
    }
}
