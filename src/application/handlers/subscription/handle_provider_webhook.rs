//! HandleProviderWebhookHandler - entry point for inbound provider webhooks.
//!
//! Pipeline: verify signature → decode → dedup claim → dispatch → mark
//! applied. Only the signature check happens here; dedup and dispatch live
//! in `IdempotentWebhookProcessor`.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use crate::domain::billing::{IdempotentWebhookProcessor, WebhookError};
use crate::ports::{PaymentProvider, SubscriptionStore, WebhookEventRepository, WebhookResult};

use super::provider_event_handlers::{SubscriptionEventDispatcher, SubscriptionWebhookProcessor};
use super::reconcile::{ReconcilePolicy, RecordWriter};

/// Command carrying one raw webhook delivery.
#[derive(Debug, Clone)]
pub struct HandleProviderWebhookCommand {
    /// Raw request body, exactly as received.
    pub payload: Vec<u8>,
    /// Signature header, if the request had one.
    pub signature: Option<String>,
}

/// Handler for provider webhook deliveries.
pub struct HandleProviderWebhookHandler {
    provider: Arc<dyn PaymentProvider>,
    processor: SubscriptionWebhookProcessor,
    webhook_secret: SecretString,
}

impl HandleProviderWebhookHandler {
    pub fn new(
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn SubscriptionStore>,
        events: Arc<dyn WebhookEventRepository>,
        webhook_secret: SecretString,
    ) -> Self {
        Self::with_policy(provider, store, events, webhook_secret, ReconcilePolicy::default())
    }

    pub fn with_policy(
        provider: Arc<dyn PaymentProvider>,
        store: Arc<dyn SubscriptionStore>,
        events: Arc<dyn WebhookEventRepository>,
        webhook_secret: SecretString,
        policy: ReconcilePolicy,
    ) -> Self {
        let dispatcher = SubscriptionEventDispatcher::with_writer(RecordWriter::new(store, policy));
        Self {
            provider,
            processor: IdempotentWebhookProcessor::new(events, dispatcher),
            webhook_secret,
        }
    }

    /// Overrides how long an unfinished claim blocks redeliveries.
    pub fn with_pending_lease(mut self, lease: Duration) -> Self {
        self.processor = self.processor.with_pending_lease(lease);
        self
    }

    pub async fn handle(
        &self,
        cmd: HandleProviderWebhookCommand,
    ) -> Result<WebhookResult, WebhookError> {
        // 1. Verify the signature and decode the event
        let signature = cmd.signature.ok_or(WebhookError::MissingSignature)?;
        let event = self
            .provider
            .verify_webhook_signature(&cmd.payload, &signature, &self.webhook_secret)
            .map_err(|e| {
                tracing::warn!(
                    target: "security",
                    error = %e,
                    payload_bytes = cmd.payload.len(),
                    "Rejected webhook with invalid signature"
                );
                WebhookError::InvalidSignature(e.message)
            })?;

        tracing::debug!(
            event_ref = %event.event_ref,
            event_type = %event.event_type,
            "Webhook verified"
        );

        // 2. Dedup and dispatch
        let event_ref = event.event_ref.clone();
        let result = self.processor.process(event).await;
        if let Err(err) = &result {
            tracing::error!(
                event_ref = %event_ref,
                error = %err,
                retryable = err.is_retryable(),
                "Webhook processing failed"
            );
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{InMemorySubscriptionStore, InMemoryWebhookEventRepository};
    use crate::adapters::stripe::{sign_payload, MockPaymentProvider};
    use crate::domain::billing::{
        BillingCycle, LifecycleState, Plan, SubscriptionRecord, SubscriptionStatus,
    };
    use crate::domain::foundation::{TenantKey, Timestamp};

    const SECRET: &str = "whsec_test";

    fn tenant() -> TenantKey {
        TenantKey::new("acme").unwrap()
    }

    async fn setup() -> (HandleProviderWebhookHandler, Arc<InMemorySubscriptionStore>) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let mut record = SubscriptionRecord::free(tenant());
        record.activate(
            Plan::Basic,
            BillingCycle::Monthly,
            "cus_1".into(),
            "sub_1".into(),
            Timestamp::now().add_days(30),
        );
        record.provider_synced_at = None;
        store.seed(record).await;

        let handler = HandleProviderWebhookHandler::new(
            Arc::new(MockPaymentProvider::new()),
            store.clone(),
            Arc::new(InMemoryWebhookEventRepository::new()),
            SecretString::new(SECRET.to_string()),
        );
        (handler, store)
    }

    fn failed_payment_body(event_ref: &str, customer: &str, subscription: &str) -> Vec<u8> {
        serde_json::json!({
            "id": event_ref,
            "type": "invoice.payment_failed",
            "created": chrono::Utc::now().timestamp(),
            "data": {
                "object": {
                    "id": "in_1",
                    "customer": customer,
                    "subscription": subscription,
                    "status": "open",
                    "amount_paid": 0,
                    "amount_due": 2900,
                    "created": chrono::Utc::now().timestamp()
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    fn signed(payload: Vec<u8>) -> HandleProviderWebhookCommand {
        let signature = sign_payload(
            &SecretString::new(SECRET.to_string()),
            chrono::Utc::now().timestamp(),
            &payload,
        );
        HandleProviderWebhookCommand {
            payload,
            signature: Some(signature),
        }
    }

    #[tokio::test]
    async fn verified_event_is_applied_once() {
        let (handler, store) = setup().await;

        let first = handler
            .handle(signed(failed_payment_body("evt_1", "cus_1", "sub_1")))
            .await
            .unwrap();
        let after_first = store.get(&tenant()).await.unwrap().unwrap();
        let second = handler
            .handle(signed(failed_payment_body("evt_1", "cus_1", "sub_1")))
            .await
            .unwrap();

        assert_eq!(first, WebhookResult::Processed);
        assert_eq!(second, WebhookResult::AlreadyProcessed);
        assert_eq!(after_first.status, SubscriptionStatus::Expired);
        assert_eq!(after_first.lifecycle(), LifecycleState::Expired);
        assert_eq!(store.get(&tenant()).await.unwrap().unwrap(), after_first);
    }

    #[tokio::test]
    async fn missing_signature_is_rejected() {
        let (handler, _) = setup().await;

        let err = handler
            .handle(HandleProviderWebhookCommand {
                payload: failed_payment_body("evt_1", "cus_1", "sub_1"),
                signature: None,
            })
            .await
            .unwrap_err();

        assert_eq!(err, WebhookError::MissingSignature);
    }

    #[tokio::test]
    async fn tampered_payload_is_rejected_without_state_change() {
        let (handler, store) = setup().await;
        let before = store.get(&tenant()).await.unwrap().unwrap();
        let mut cmd = signed(failed_payment_body("evt_1", "cus_1", "sub_1"));
        cmd.payload = failed_payment_body("evt_2", "cus_1", "sub_1");

        let err = handler.handle(cmd).await.unwrap_err();

        assert!(matches!(err, WebhookError::InvalidSignature(_)));
        assert_eq!(store.get(&tenant()).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn unknown_tenant_is_acknowledged() {
        let (handler, _) = setup().await;

        let result = handler
            .handle(signed(failed_payment_body("evt_1", "cus_unknown", "sub_unknown")))
            .await
            .unwrap();

        assert!(matches!(result, WebhookResult::Ignored(_)));
    }
}
