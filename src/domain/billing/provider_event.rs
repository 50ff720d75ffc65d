//! Decoded provider notifications.
//!
//! The provider adapter turns a verified webhook payload into a
//! `ProviderEvent`. Only the event types the engine acts on get a typed
//! variant; everything else is carried as `Unhandled` and acknowledged.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::Timestamp;

use super::{BillingCycle, Plan, SubscriptionStatus};

pub const INVOICE_PAYMENT_SUCCEEDED: &str = "invoice.payment_succeeded";
pub const INVOICE_PAYMENT_FAILED: &str = "invoice.payment_failed";
pub const SUBSCRIPTION_UPDATED: &str = "customer.subscription.updated";
pub const SUBSCRIPTION_DELETED: &str = "customer.subscription.deleted";

/// Subscription status as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderSubscriptionStatus {
    Active,
    Trialing,
    PastDue,
    Canceled,
    Unpaid,
    Incomplete,
    IncompleteExpired,
    Paused,
    Unknown,
}

impl ProviderSubscriptionStatus {
    /// Parses the provider's status string. Unrecognised values map to `Unknown`.
    pub fn from_provider_str(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "trialing" => Self::Trialing,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            "unpaid" => Self::Unpaid,
            "incomplete" => Self::Incomplete,
            "incomplete_expired" => Self::IncompleteExpired,
            "paused" => Self::Paused,
            _ => Self::Unknown,
        }
    }

    /// Maps the provider status onto the simplified local status.
    ///
    /// A live subscription flagged to cancel at period end is `Canceled`
    /// locally (cancel pending). A subscription with an unpaid invoice
    /// (`past_due`, `unpaid`, `incomplete`) or one the provider considers
    /// finished is `Expired`, matching what `invoice.payment_failed` does.
    pub fn to_local(self, cancel_at_period_end: bool) -> SubscriptionStatus {
        match self {
            Self::Active | Self::Trialing => {
                if cancel_at_period_end {
                    SubscriptionStatus::Canceled
                } else {
                    SubscriptionStatus::Active
                }
            }
            Self::PastDue
            | Self::Canceled
            | Self::Unpaid
            | Self::Incomplete
            | Self::IncompleteExpired
            | Self::Paused
            | Self::Unknown => SubscriptionStatus::Expired,
        }
    }
}

/// Invoice details carried by `invoice.payment_*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceNotice {
    pub invoice_ref: String,
    pub customer_ref: String,
    pub subscription_ref: Option<String>,
    /// Paid amount for successes, amount due for failures, in cents.
    pub amount_cents: i64,
    pub created: Option<Timestamp>,
    /// End of the billing period covered by the invoice's first line.
    pub period_end: Option<Timestamp>,
}

/// Subscription details carried by `customer.subscription.*` events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionNotice {
    pub subscription_ref: String,
    pub customer_ref: String,
    pub status: ProviderSubscriptionStatus,
    pub current_period_end: Option<Timestamp>,
    pub cancel_at_period_end: bool,
    /// Plan and cycle, when the subscribed price is one of ours.
    pub plan: Option<(Plan, BillingCycle)>,
}

impl SubscriptionNotice {
    pub fn local_status(&self) -> SubscriptionStatus {
        self.status.to_local(self.cancel_at_period_end)
    }
}

/// Typed payload of a provider event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ProviderEventKind {
    InvoicePaymentSucceeded(InvoiceNotice),
    InvoicePaymentFailed(InvoiceNotice),
    SubscriptionUpdated(SubscriptionNotice),
    SubscriptionDeleted(SubscriptionNotice),
    /// Any other event type. Acknowledged and ignored.
    Unhandled,
}

/// A verified, decoded provider event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderEvent {
    /// Provider-assigned unique id (dedup key).
    pub event_ref: String,
    /// Raw provider type string, e.g. `invoice.payment_failed`.
    pub event_type: String,
    /// Provider-side creation time, used as the ordering key.
    pub created: Option<Timestamp>,
    pub kind: ProviderEventKind,
    /// The event's `data.object`, kept for the dedup record.
    pub payload: serde_json::Value,
}

impl ProviderEvent {
    /// Customer ref the event refers to, if any.
    pub fn customer_ref(&self) -> Option<&str> {
        match &self.kind {
            ProviderEventKind::InvoicePaymentSucceeded(n)
            | ProviderEventKind::InvoicePaymentFailed(n) => Some(&n.customer_ref),
            ProviderEventKind::SubscriptionUpdated(n)
            | ProviderEventKind::SubscriptionDeleted(n) => Some(&n.customer_ref),
            ProviderEventKind::Unhandled => None,
        }
    }

    /// Subscription ref the event refers to, if any.
    pub fn subscription_ref(&self) -> Option<&str> {
        match &self.kind {
            ProviderEventKind::InvoicePaymentSucceeded(n)
            | ProviderEventKind::InvoicePaymentFailed(n) => n.subscription_ref.as_deref(),
            ProviderEventKind::SubscriptionUpdated(n)
            | ProviderEventKind::SubscriptionDeleted(n) => Some(&n.subscription_ref),
            ProviderEventKind::Unhandled => None,
        }
    }

    pub fn is_handled(&self) -> bool {
        !matches!(self.kind, ProviderEventKind::Unhandled)
    }
}


#[cfg(test)]
mod tests {
    use super::builders::*;
    use super::*;

    #[test]
    fn provider_status_parses_known_values() {
        assert_eq!(
            ProviderSubscriptionStatus::from_provider_str("past_due"),
            ProviderSubscriptionStatus::PastDue
        );
        assert_eq!(
            ProviderSubscriptionStatus::from_provider_str("something_new"),
            ProviderSubscriptionStatus::Unknown
        );
    }

    #[test]
    fn live_statuses_map_to_active_unless_cancel_pending() {
        assert_eq!(
            ProviderSubscriptionStatus::Trialing.to_local(false),
            SubscriptionStatus::Active
        );
        assert_eq!(
            ProviderSubscriptionStatus::Active.to_local(true),
            SubscriptionStatus::Canceled
        );
    }

    #[test]
    fn ended_statuses_map_to_expired() {
        for status in [
            ProviderSubscriptionStatus::Canceled,
            ProviderSubscriptionStatus::Unpaid,
            ProviderSubscriptionStatus::IncompleteExpired,
        ] {
            assert_eq!(status.to_local(false), SubscriptionStatus::Expired);
        }
    }

    #[test]
    fn unpaid_statuses_map_to_expired_even_when_cancel_pending() {
        for status in [
            ProviderSubscriptionStatus::PastDue,
            ProviderSubscriptionStatus::Incomplete,
        ] {
            assert_eq!(status.to_local(false), SubscriptionStatus::Expired);
            assert_eq!(status.to_local(true), SubscriptionStatus::Expired);
        }
    }

    #[test]
    fn event_exposes_refs_from_invoice() {
        let e = event(
            "evt_1",
            1_704_067_200,
            ProviderEventKind::InvoicePaymentFailed(invoice("in_1", "cus_1", "sub_1")),
        );
        assert_eq!(e.customer_ref(), Some("cus_1"));
        assert_eq!(e.subscription_ref(), Some("sub_1"));
        assert!(e.is_handled());
    }

    #[test]
    fn unhandled_event_has_no_refs() {
        let e = event("evt_2", 1_704_067_200, ProviderEventKind::Unhandled);
        assert_eq!(e.customer_ref(), None);
        assert!(!e.is_handled());
    }
}
