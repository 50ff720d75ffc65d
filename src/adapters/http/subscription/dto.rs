//! HTTP DTOs (Data Transfer Objects) for subscription endpoints.
//!
//! These types define the JSON request/response structure of the billing API.
//! They serve as the boundary between HTTP and the application layer.

use serde::{Deserialize, Serialize};

use crate::application::SubscriptionStatusView;
use crate::domain::billing::{
    BillingCycle, Feature, InvoiceEntry, InvoiceStatus, LifecycleState, Plan, PlanOffering,
    SubscriptionRecord, SubscriptionStatus,
};
use crate::domain::foundation::Timestamp;

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Request to start a paid subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub plan: Plan,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
    pub payment_method_ref: String,
}

/// Request to change plan and/or billing cycle.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateSubscriptionRequest {
    pub plan: Plan,
    #[serde(default)]
    pub billing_cycle: BillingCycle,
}

/// Request to replace the default payment method.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethodRequest {
    pub payment_method_ref: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Subscription view for API responses.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionResponse {
    pub tenant_key: String,
    pub plan: Plan,
    /// Plan whose features are usable right now.
    pub effective_plan: Plan,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub lifecycle: LifecycleState,
    /// ISO 8601.
    pub next_billing_time: Option<String>,
    pub provider_customer_ref: Option<String>,
    pub provider_subscription_ref: Option<String>,
    pub features: Vec<Feature>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_period_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_at_period_end: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_effective_at: Option<String>,
}

impl From<&SubscriptionRecord> for SubscriptionResponse {
    fn from(record: &SubscriptionRecord) -> Self {
        let effective_plan = record.effective_plan();
        Self {
            tenant_key: record.tenant_key.to_string(),
            plan: record.plan,
            effective_plan,
            billing_cycle: record.billing_cycle,
            status: record.status,
            lifecycle: record.lifecycle(),
            next_billing_time: record.next_billing_time.as_ref().map(iso8601),
            provider_customer_ref: record.provider_customer_ref.clone(),
            provider_subscription_ref: record.provider_subscription_ref.clone(),
            features: effective_plan.features(),
            provider_period_end: None,
            cancel_at_period_end: None,
            cancel_effective_at: None,
        }
    }
}

impl From<SubscriptionStatusView> for SubscriptionResponse {
    fn from(view: SubscriptionStatusView) -> Self {
        Self {
            provider_period_end: view.provider_period_end.as_ref().map(iso8601),
            cancel_at_period_end: view.cancel_at_period_end,
            ..Self::from(&view.record)
        }
    }
}

impl SubscriptionResponse {
    pub fn with_cancel_effective_at(mut self, at: Option<Timestamp>) -> Self {
        self.cancel_effective_at = at.as_ref().map(iso8601);
        self
    }
}

/// One invoice of the history.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceResponse {
    pub invoice_ref: String,
    pub amount_cents: i64,
    pub status: InvoiceStatus,
    /// ISO 8601.
    pub time: String,
}

impl From<InvoiceEntry> for InvoiceResponse {
    fn from(entry: InvoiceEntry) -> Self {
        Self {
            time: iso8601(&entry.time),
            invoice_ref: entry.invoice_ref,
            amount_cents: entry.amount_cents,
            status: entry.status,
        }
    }
}

/// Invoice history.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceListResponse {
    pub invoices: Vec<InvoiceResponse>,
}

/// One catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct PlanResponse {
    pub plan: Plan,
    pub name: String,
    pub monthly_price_cents: i64,
    pub features: Vec<Feature>,
}

impl From<PlanOffering> for PlanResponse {
    fn from(offering: PlanOffering) -> Self {
        Self {
            plan: offering.plan,
            name: offering.name.to_string(),
            monthly_price_cents: offering.monthly_price_cents,
            features: offering.features,
        }
    }
}

/// The plan catalog.
#[derive(Debug, Clone, Serialize)]
pub struct PlanListResponse {
    pub plans: Vec<PlanResponse>,
}

/// Acknowledgement returned to the provider.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookAck {
    pub received: bool,
}

impl WebhookAck {
    pub fn received() -> Self {
        Self { received: true }
    }
}

/// Standard error response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Stable reason code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

fn iso8601(timestamp: &Timestamp) -> String {
    timestamp.as_datetime().to_rfc3339()
}
