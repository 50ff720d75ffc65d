//! Handlers for provider webhook events.
//!
//! Each handler treats its event as absolute state, not a delta, and goes
//! through `RecordWriter::modify` so it is idempotent and safe to race with
//! commands. Status and date changes are gated by the record's ordering
//! watermark; invoice entries are always appended (deduplicated by ref).

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::billing::{
    BillingError, IdempotentWebhookProcessor, InvoiceEntry, InvoiceNotice, InvoiceStatus,
    ProviderEvent, ProviderEventKind, SubscriptionRecord, SubscriptionStatus, WebhookDispatcher,
    WebhookError, WebhookEventHandler, INVOICE_PAYMENT_FAILED, INVOICE_PAYMENT_SUCCEEDED,
    SUBSCRIPTION_DELETED, SUBSCRIPTION_UPDATED,
};
use crate::domain::foundation::{StateMachine, Timestamp};
use crate::ports::{SubscriptionStore, WebhookEventRepository};

use super::reconcile::{ReconcilePolicy, RecordWriter};

/// Processor wired to the subscription event handlers.
pub type SubscriptionWebhookProcessor =
    IdempotentWebhookProcessor<Arc<dyn WebhookEventRepository>, SubscriptionEventDispatcher>;

/// Provider ref used to find the record an event belongs to.
#[derive(Debug, Clone, Copy)]
enum ProviderRef<'a> {
    Customer(&'a str),
    Subscription(&'a str),
}

/// Finds the record for the first ref that matches one.
async fn locate(
    store: &dyn SubscriptionStore,
    refs: &[Option<ProviderRef<'_>>],
) -> Result<SubscriptionRecord, BillingError> {
    for reference in refs.iter().flatten() {
        let found = match reference {
            ProviderRef::Customer(id) => store.find_by_customer_ref(id).await?,
            ProviderRef::Subscription(id) => store.find_by_subscription_ref(id).await?,
        };
        if let Some(record) = found {
            return Ok(record);
        }
    }

    let tried = refs
        .iter()
        .flatten()
        .map(|r| match r {
            ProviderRef::Customer(id) | ProviderRef::Subscription(id) => *id,
        })
        .collect::<Vec<_>>()
        .join(", ");
    Err(BillingError::UnknownTenant(tried))
}

fn subscription_matches(record: &SubscriptionRecord, subscription_ref: Option<&str>) -> bool {
    subscription_ref.is_some() && record.provider_subscription_ref.as_deref() == subscription_ref
}

fn unexpected_payload(event: &ProviderEvent) -> WebhookError {
    WebhookError::ParseError(format!(
        "Payload of {} does not match its type",
        event.event_ref
    ))
}

// ════════════════════════════════════════════════════════════════════════════
// Invoice events
// ════════════════════════════════════════════════════════════════════════════

/// Shared handling of `invoice.payment_succeeded` / `invoice.payment_failed`.
async fn apply_invoice_event(
    writer: &RecordWriter,
    event: &ProviderEvent,
    notice: &InvoiceNotice,
    status: InvoiceStatus,
) -> Result<SubscriptionRecord, BillingError> {
    // 1. Find the tenant by customer, then by subscription
    let located = locate(
        writer.store(),
        &[
            Some(ProviderRef::Customer(&notice.customer_ref)),
            notice.subscription_ref.as_deref().map(ProviderRef::Subscription),
        ],
    )
    .await?;

    // 2. Append the invoice and, if current, set the absolute state
    let time = notice
        .created
        .or(event.created)
        .unwrap_or_else(Timestamp::now);
    let entry = InvoiceEntry::new(notice.invoice_ref.clone(), notice.amount_cents, status, time);

    writer
        .modify(&located.tenant_key, |record| {
            let before = record.clone();
            record.append_invoice(entry.clone());

            let current = subscription_matches(record, notice.subscription_ref.as_deref())
                && !record.is_stale(event.created, notice.period_end);
            if current {
                match status {
                    InvoiceStatus::Paid => {
                        record.status = SubscriptionStatus::Active;
                        if let Some(period_end) = notice.period_end {
                            if record.next_billing_time.map_or(true, |t| period_end > t) {
                                record.next_billing_time = Some(period_end);
                            }
                        }
                    }
                    _ => record.status = SubscriptionStatus::Expired,
                }
                record.advance_watermark(event.created);
            } else {
                tracing::debug!(
                    event_ref = %event.event_ref,
                    tenant_key = %record.tenant_key,
                    "Invoice recorded without state change"
                );
            }

            Ok(*record != before)
        })
        .await
}

/// Handles `invoice.payment_succeeded`: invoice paid, subscription active.
pub struct PaymentSucceededHandler {
    writer: RecordWriter,
}

impl PaymentSucceededHandler {
    pub fn new(writer: RecordWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl WebhookEventHandler for PaymentSucceededHandler {
    fn handles(&self) -> &'static str {
        INVOICE_PAYMENT_SUCCEEDED
    }

    async fn handle(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
        let ProviderEventKind::InvoicePaymentSucceeded(notice) = &event.kind else {
            return Err(unexpected_payload(event));
        };

        let record = apply_invoice_event(&self.writer, event, notice, InvoiceStatus::Paid).await?;

        tracing::info!(
            event_ref = %event.event_ref,
            tenant_key = %record.tenant_key,
            invoice_ref = %notice.invoice_ref,
            status = %record.status,
            "Payment succeeded"
        );
        Ok(())
    }
}

/// Handles `invoice.payment_failed`: invoice failed, subscription expired.
pub struct PaymentFailedHandler {
    writer: RecordWriter,
}

impl PaymentFailedHandler {
    pub fn new(writer: RecordWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl WebhookEventHandler for PaymentFailedHandler {
    fn handles(&self) -> &'static str {
        INVOICE_PAYMENT_FAILED
    }

    async fn handle(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
        let ProviderEventKind::InvoicePaymentFailed(notice) = &event.kind else {
            return Err(unexpected_payload(event));
        };

        let record =
            apply_invoice_event(&self.writer, event, notice, InvoiceStatus::Failed).await?;

        tracing::warn!(
            event_ref = %event.event_ref,
            tenant_key = %record.tenant_key,
            invoice_ref = %notice.invoice_ref,
            status = %record.status,
            "Payment failed"
        );
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Subscription events
// ════════════════════════════════════════════════════════════════════════════

/// Handles `customer.subscription.updated`: mirrors the provider's status,
/// period end, plan and cycle.
pub struct SubscriptionUpdatedHandler {
    writer: RecordWriter,
}

impl SubscriptionUpdatedHandler {
    pub fn new(writer: RecordWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl WebhookEventHandler for SubscriptionUpdatedHandler {
    fn handles(&self) -> &'static str {
        SUBSCRIPTION_UPDATED
    }

    async fn handle(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
        let ProviderEventKind::SubscriptionUpdated(notice) = &event.kind else {
            return Err(unexpected_payload(event));
        };

        let located = locate(
            self.writer.store(),
            &[
                Some(ProviderRef::Subscription(&notice.subscription_ref)),
                Some(ProviderRef::Customer(&notice.customer_ref)),
            ],
        )
        .await?;

        let record = self
            .writer
            .modify(&located.tenant_key, |record| {
                if !subscription_matches(record, Some(&notice.subscription_ref))
                    || record.is_stale(event.created, notice.current_period_end)
                {
                    return Ok(false);
                }

                let before = record.clone();
                record.status = notice.local_status();
                if let Some(period_end) = notice.current_period_end {
                    record.next_billing_time = Some(period_end);
                }
                if let Some((plan, billing_cycle)) = notice.plan {
                    record.plan = plan;
                    record.billing_cycle = billing_cycle;
                }
                record.advance_watermark(event.created);

                let (from, to) = (before.lifecycle(), record.lifecycle());
                if !from.can_transition_to(&to) {
                    tracing::warn!(
                        event_ref = %event.event_ref,
                        from = %from,
                        to = %to,
                        "Provider moved subscription through an unexpected transition"
                    );
                }
                Ok(*record != before)
            })
            .await?;

        tracing::info!(
            event_ref = %event.event_ref,
            tenant_key = %record.tenant_key,
            lifecycle = %record.lifecycle(),
            "Subscription updated"
        );
        Ok(())
    }
}

/// Handles `customer.subscription.deleted`: back to the free plan.
///
/// Deletion is final for a subscription, so it is applied whenever it names
/// the record's current subscription, regardless of the watermark.
pub struct SubscriptionDeletedHandler {
    writer: RecordWriter,
}

impl SubscriptionDeletedHandler {
    pub fn new(writer: RecordWriter) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl WebhookEventHandler for SubscriptionDeletedHandler {
    fn handles(&self) -> &'static str {
        SUBSCRIPTION_DELETED
    }

    async fn handle(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
        let ProviderEventKind::SubscriptionDeleted(notice) = &event.kind else {
            return Err(unexpected_payload(event));
        };

        let located = locate(
            self.writer.store(),
            &[Some(ProviderRef::Subscription(&notice.subscription_ref))],
        )
        .await?;

        let record = self
            .writer
            .modify(&located.tenant_key, |record| {
                if !subscription_matches(record, Some(&notice.subscription_ref)) {
                    return Ok(false);
                }
                record.clear_subscription();
                record.advance_watermark(event.created);
                Ok(true)
            })
            .await?;

        tracing::info!(
            event_ref = %event.event_ref,
            tenant_key = %record.tenant_key,
            subscription_ref = %notice.subscription_ref,
            "Subscription deleted; tenant back on free plan"
        );
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Dispatcher
// ════════════════════════════════════════════════════════════════════════════

/// Routes the four subscription event types to their handlers.
pub struct SubscriptionEventDispatcher {
    handlers: Vec<Box<dyn WebhookEventHandler>>,
}

impl SubscriptionEventDispatcher {
    pub fn new(store: Arc<dyn SubscriptionStore>) -> Self {
        Self::with_writer(RecordWriter::new(store, ReconcilePolicy::default()))
    }

    pub fn with_writer(writer: RecordWriter) -> Self {
        Self {
            handlers: vec![
                Box::new(PaymentSucceededHandler::new(writer.clone())),
                Box::new(PaymentFailedHandler::new(writer.clone())),
                Box::new(SubscriptionUpdatedHandler::new(writer.clone())),
                Box::new(SubscriptionDeletedHandler::new(writer)),
            ],
        }
    }
}

#[async_trait]
impl WebhookDispatcher for SubscriptionEventDispatcher {
    fn get_handler(&self, event_type: &str) -> Option<&dyn WebhookEventHandler> {
        self.handlers
            .iter()
            .find(|handler| handler.handles() == event_type)
            .map(|handler| handler.as_ref())
    }
}
