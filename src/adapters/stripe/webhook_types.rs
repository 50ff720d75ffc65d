//! Stripe wire types.
//!
//! These types mirror Stripe API objects as they arrive in API responses and
//! webhook payloads. Every field that is not needed for reconciliation is
//! left out and unknown fields are ignored, so additive API changes never
//! break decoding.

use serde::{Deserialize, Serialize};

use crate::domain::billing::{
    InvoiceNotice, ProviderEvent, ProviderEventKind, ProviderSubscriptionStatus,
    SubscriptionNotice, INVOICE_PAYMENT_FAILED, INVOICE_PAYMENT_SUCCEEDED, SUBSCRIPTION_DELETED,
    SUBSCRIPTION_UPDATED,
};
use crate::domain::foundation::Timestamp;
use crate::ports::{Customer, PaymentError, ProviderInvoice, ProviderSubscription};

use super::StripePriceMap;

// ════════════════════════════════════════════════════════════════════════════════
// Signature Parsing
// ════════════════════════════════════════════════════════════════════════════════

/// Error parsing the Stripe-Signature header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureParseError {
    #[error("Missing Stripe-Signature header")]
    MissingHeader,
    #[error("Missing timestamp (t=) in signature")]
    MissingTimestamp,
    #[error("Missing v1 signature in header")]
    MissingV1Signature,
    #[error("Invalid timestamp format")]
    InvalidTimestamp,
    #[error("Invalid signature format (not valid hex)")]
    InvalidSignatureFormat,
}

/// Parsed Stripe-Signature header.
///
/// Format: `t=<timestamp>,v1=<signature>[,v1=<signature>...][,v0=<legacy>]`.
/// Stripe sends several `v1` entries while a signing secret is being rolled.
#[derive(Debug, Clone)]
pub struct SignatureHeader {
    /// Unix timestamp when Stripe signed the delivery.
    pub timestamp: i64,

    /// HMAC-SHA256 signatures, hex-decoded.
    pub v1_signatures: Vec<Vec<u8>>,
}

impl SignatureHeader {
    pub fn parse(header: &str) -> Result<Self, SignatureParseError> {
        if header.trim().is_empty() {
            return Err(SignatureParseError::MissingHeader);
        }

        let mut timestamp: Option<i64> = None;
        let mut v1_signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            match key.trim() {
                "t" => {
                    timestamp = Some(
                        value
                            .trim()
                            .parse()
                            .map_err(|_| SignatureParseError::InvalidTimestamp)?,
                    );
                }
                "v1" => {
                    let bytes = hex::decode(value.trim())
                        .map_err(|_| SignatureParseError::InvalidSignatureFormat)?;
                    v1_signatures.push(bytes);
                }
                // v0 and unknown schemes are ignored
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or(SignatureParseError::MissingTimestamp)?;
        if v1_signatures.is_empty() {
            return Err(SignatureParseError::MissingV1Signature);
        }
        Ok(Self {
            timestamp,
            v1_signatures,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Event Envelope
// ════════════════════════════════════════════════════════════════════════════════

/// Stripe event envelope.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeWebhookEvent {
    /// Unique event identifier (evt_...).
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix timestamp when the event was created.
    #[serde(default)]
    pub created: i64,

    pub data: StripeEventData,

    #[serde(default)]
    pub livemode: bool,

    pub api_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeEventData {
    /// The object affected by this event.
    pub object: serde_json::Value,
}

impl StripeWebhookEvent {
    /// Decodes the envelope's object into the typed event kind.
    ///
    /// Event types the engine does not act on become `Unhandled` without
    /// looking at the object.
    pub fn into_provider_event(self, prices: &StripePriceMap) -> Result<ProviderEvent, PaymentError> {
        let created = Timestamp::from_unix_secs(self.created);
        let kind = match self.event_type.as_str() {
            INVOICE_PAYMENT_SUCCEEDED => {
                let invoice = decode::<StripeInvoice>(&self.data.object, "invoice")?;
                ProviderEventKind::InvoicePaymentSucceeded(invoice.to_notice(invoice.amount_paid))
            }
            INVOICE_PAYMENT_FAILED => {
                let invoice = decode::<StripeInvoice>(&self.data.object, "invoice")?;
                ProviderEventKind::InvoicePaymentFailed(invoice.to_notice(invoice.amount_due))
            }
            SUBSCRIPTION_UPDATED => {
                let sub = decode::<StripeSubscription>(&self.data.object, "subscription")?;
                ProviderEventKind::SubscriptionUpdated(sub.to_notice(prices))
            }
            SUBSCRIPTION_DELETED => {
                let sub = decode::<StripeSubscription>(&self.data.object, "subscription")?;
                ProviderEventKind::SubscriptionDeleted(sub.to_notice(prices))
            }
            _ => ProviderEventKind::Unhandled,
        };

        Ok(ProviderEvent {
            event_ref: self.id,
            event_type: self.event_type,
            created,
            kind,
            payload: self.data.object,
        })
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    object: &serde_json::Value,
    what: &str,
) -> Result<T, PaymentError> {
    T::deserialize(object)
        .map_err(|e| PaymentError::invalid_webhook(format!("Invalid {}: {}", what, e)))
}

// ════════════════════════════════════════════════════════════════════════════════
// Stripe Objects
// ════════════════════════════════════════════════════════════════════════════════

/// Stripe list wrapper (`{"object": "list", "data": [...]}`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeList<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,

    #[serde(default)]
    pub has_more: bool,
}

impl<T> Default for StripeList<T> {
    fn default() -> Self {
        Self {
            data: Vec::new(),
            has_more: false,
        }
    }
}

/// Stripe Customer object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeCustomer {
    /// Unique customer identifier (cus_...).
    pub id: String,

    #[serde(default)]
    pub created: i64,

    /// Set on the tombstone returned for deleted customers.
    #[serde(default)]
    pub deleted: bool,

    #[serde(default)]
    pub invoice_settings: Option<StripeInvoiceSettings>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct StripeInvoiceSettings {
    pub default_payment_method: Option<String>,
}

impl From<StripeCustomer> for Customer {
    fn from(customer: StripeCustomer) -> Self {
        Customer {
            id: customer.id,
            default_payment_method: customer
                .invoice_settings
                .and_then(|settings| settings.default_payment_method),
            created_at: customer.created,
        }
    }
}

/// Stripe Subscription object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscription {
    /// Unique subscription identifier (sub_...).
    pub id: String,

    /// Customer ID owning this subscription.
    pub customer: String,

    pub status: String,

    /// Older API versions carry the period on the subscription itself.
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,

    #[serde(default)]
    pub cancel_at_period_end: bool,

    pub cancel_at: Option<i64>,
    pub canceled_at: Option<i64>,

    #[serde(default)]
    pub items: StripeList<StripeSubscriptionItem>,
}

/// Single subscription item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeSubscriptionItem {
    /// Item ID (si_...).
    pub id: String,

    pub price: StripePrice,

    /// Newer API versions carry the period on the item.
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

/// Stripe Price object (embedded in subscription items).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripePrice {
    pub id: String,
}

impl StripeSubscription {
    fn first_item(&self) -> Option<&StripeSubscriptionItem> {
        self.items.data.first()
    }

    fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .or_else(|| self.first_item().and_then(|item| item.current_period_start))
    }

    fn period_end(&self) -> Option<i64> {
        self.current_period_end
            .or_else(|| self.first_item().and_then(|item| item.current_period_end))
    }

    /// Item id to target when swapping the price.
    pub fn primary_item_id(&self) -> Option<&str> {
        self.first_item().map(|item| item.id.as_str())
    }

    pub fn to_provider_subscription(&self, prices: &StripePriceMap) -> ProviderSubscription {
        ProviderSubscription {
            id: self.id.clone(),
            customer_id: self.customer.clone(),
            status: ProviderSubscriptionStatus::from_provider_str(&self.status),
            current_period_start: self.period_start().unwrap_or_default(),
            current_period_end: self.period_end().unwrap_or_default(),
            cancel_at_period_end: self.cancel_at_period_end,
            cancel_at: self.cancel_at,
            canceled_at: self.canceled_at,
            plan: self
                .first_item()
                .and_then(|item| prices.plan_for(&item.price.id)),
        }
    }

    fn to_notice(&self, prices: &StripePriceMap) -> SubscriptionNotice {
        SubscriptionNotice {
            subscription_ref: self.id.clone(),
            customer_ref: self.customer.clone(),
            status: ProviderSubscriptionStatus::from_provider_str(&self.status),
            current_period_end: self.period_end().and_then(Timestamp::from_unix_secs),
            cancel_at_period_end: self.cancel_at_period_end,
            plan: self
                .first_item()
                .and_then(|item| prices.plan_for(&item.price.id)),
        }
    }
}

/// Stripe Invoice object.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoice {
    /// Unique invoice identifier (in_...).
    pub id: String,

    pub customer: String,

    pub subscription: Option<String>,

    /// Invoice status (draft, open, paid, void, uncollectible).
    pub status: Option<String>,

    #[serde(default)]
    pub amount_paid: i64,

    #[serde(default)]
    pub amount_due: i64,

    #[serde(default)]
    pub created: i64,

    #[serde(default)]
    pub lines: StripeList<StripeInvoiceLineItem>,
}

/// Single invoice line item.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoiceLineItem {
    pub period: Option<StripeInvoicePeriod>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StripeInvoicePeriod {
    pub start: i64,
    pub end: i64,
}

impl StripeInvoice {
    /// End of the billing period the invoice covers.
    fn period_end(&self) -> Option<Timestamp> {
        self.lines
            .data
            .first()
            .and_then(|line| line.period.as_ref())
            .and_then(|period| Timestamp::from_unix_secs(period.end))
    }

    fn to_notice(&self, amount_cents: i64) -> InvoiceNotice {
        InvoiceNotice {
            invoice_ref: self.id.clone(),
            customer_ref: self.customer.clone(),
            subscription_ref: self.subscription.clone(),
            amount_cents,
            created: Timestamp::from_unix_secs(self.created),
            period_end: self.period_end(),
        }
    }
}

impl From<StripeInvoice> for ProviderInvoice {
    fn from(invoice: StripeInvoice) -> Self {
        ProviderInvoice {
            id: invoice.id,
            customer_id: invoice.customer,
            subscription_id: invoice.subscription,
            status: invoice.status.unwrap_or_else(|| "draft".to_string()),
            amount_paid: invoice.amount_paid,
            amount_due: invoice.amount_due,
            created: invoice.created,
        }
    }
}

/// Error body returned by the Stripe API on non-2xx responses.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeErrorEnvelope {
    pub error: StripeApiError,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeApiError {
    #[serde(rename = "type")]
    pub error_type: Option<String>,
    pub code: Option<String>,
    pub decline_code: Option<String>,
    pub message: Option<String>,
}
