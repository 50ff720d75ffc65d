//! Webhook processor - Orchestrates idempotent webhook event handling.
//!
//! Sits between the verified provider event and the reconciliation handlers,
//! ensuring each event ref has its side effects applied at least once and
//! acknowledged at most once.
//!
//! ## Design
//!
//! 1. Claim the event ref in the dedup store (test-and-set, pending)
//! 2. Dispatch to the handler registered for the event type
//! 3. Mark the event applied, or release the claim on failure
//!
//! ## Race Condition Handling
//!
//! When multiple deliveries of one event arrive simultaneously:
//! - First to claim wins and dispatches
//! - Others get `InProgress` and a retryable error, so the provider
//!   redelivers later and finds the event applied
//!
//! A pending claim left behind by a crash expires after the lease and is
//! taken over by the next redelivery.

use async_trait::async_trait;
use std::time::Duration;

use crate::ports::{ClaimResult, EventOutcome, WebhookEventRecord, WebhookEventRepository, WebhookResult};

use super::{ProviderEvent, WebhookError};

/// Handler for one provider event type.
///
/// Implementations must be idempotent: the same event may be dispatched more
/// than once.
#[async_trait]
pub trait WebhookEventHandler: Send + Sync {
    /// Provider event type string this handler processes.
    fn handles(&self) -> &'static str;

    /// Handles the event.
    ///
    /// Returns `Err(WebhookError::Ignored(_))` or `Err(WebhookError::UnknownTenant(_))`
    /// if the event should be acknowledged without further processing.
    async fn handle(&self, event: &ProviderEvent) -> Result<(), WebhookError>;
}

/// Routes events to handlers by event type.
#[async_trait]
pub trait WebhookDispatcher: Send + Sync {
    /// Find a handler for the given event type.
    fn get_handler(&self, event_type: &str) -> Option<&dyn WebhookEventHandler>;

    /// Dispatch an event to its handler.
    ///
    /// Unhandled event types yield `Err(WebhookError::Ignored)`.
    async fn dispatch(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
        if !event.is_handled() {
            return Err(WebhookError::Ignored(format!(
                "Unhandled event type: {}",
                event.event_type
            )));
        }
        match self.get_handler(&event.event_type) {
            Some(handler) => handler.handle(event).await,
            None => Err(WebhookError::Ignored(format!(
                "No handler for event type: {}",
                event.event_type
            ))),
        }
    }
}

/// Processes webhook events with dedup guarantees.
pub struct IdempotentWebhookProcessor<R: WebhookEventRepository, D: WebhookDispatcher> {
    repository: R,
    dispatcher: D,
    pending_lease: Duration,
}

impl<R: WebhookEventRepository, D: WebhookDispatcher> IdempotentWebhookProcessor<R, D> {
    /// Default time after which an unfinished pending claim can be taken over.
    pub const DEFAULT_PENDING_LEASE: Duration = Duration::from_secs(300);

    pub fn new(repository: R, dispatcher: D) -> Self {
        Self {
            repository,
            dispatcher,
            pending_lease: Self::DEFAULT_PENDING_LEASE,
        }
    }

    pub fn with_pending_lease(mut self, lease: Duration) -> Self {
        self.pending_lease = lease;
        self
    }

    /// Process a verified event.
    ///
    /// # Returns
    ///
    /// - `Ok(WebhookResult::Processed)` - handler applied the event
    /// - `Ok(WebhookResult::Ignored(_))` - acknowledged without state change
    /// - `Ok(WebhookResult::AlreadyProcessed)` - duplicate delivery, skipped
    /// - `Err(_)` - processing failed; the claim was released for redelivery
    pub async fn process(&self, event: ProviderEvent) -> Result<WebhookResult, WebhookError> {
        // 1. Claim the event ref
        let claim = WebhookEventRecord::pending(&event);
        match self.repository.try_claim(claim, self.pending_lease).await? {
            ClaimResult::Claimed => {}
            ClaimResult::AlreadyApplied => {
                tracing::debug!(event_ref = %event.event_ref, "Duplicate webhook delivery skipped");
                return Ok(WebhookResult::AlreadyProcessed);
            }
            ClaimResult::InProgress => {
                return Err(WebhookError::InProgress(event.event_ref));
            }
        }

        // 2. Dispatch
        let (outcome, result) = match self.dispatcher.dispatch(&event).await {
            Ok(()) => (EventOutcome::Applied, WebhookResult::Processed),
            Err(WebhookError::Ignored(reason)) => {
                (EventOutcome::Ignored, WebhookResult::Ignored(reason))
            }
            Err(WebhookError::UnknownTenant(reference)) => {
                tracing::warn!(
                    event_ref = %event.event_ref,
                    event_type = %event.event_type,
                    reference = %reference,
                    "Webhook for unknown tenant dropped"
                );
                (
                    EventOutcome::UnknownTenant,
                    WebhookResult::Ignored(format!("Unknown tenant for {}", reference)),
                )
            }
            Err(err) => {
                // 3a. Release so a redelivery can retry immediately
                if let Err(release_err) = self.repository.release(&event.event_ref).await {
                    tracing::warn!(
                        event_ref = %event.event_ref,
                        error = %release_err,
                        "Failed to release webhook claim; it will expire after the lease"
                    );
                }
                return Err(err);
            }
        };

        // 3b. Mark applied
        self.repository
            .mark_applied(&event.event_ref, outcome)
            .await?;

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryWebhookEventRepository;
    use crate::domain::billing::provider_event::builders;
    use crate::domain::billing::{ProviderEventKind, INVOICE_PAYMENT_FAILED};
    use crate::ports::DedupStatus;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    // ══════════════════════════════════════════════════════════════
    // Test Infrastructure
    // ══════════════════════════════════════════════════════════════

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Ignore,
        UnknownTenant,
    }

    /// Handler that counts invocations.
    struct CountingHandler {
        call_count: AtomicU32,
        behavior: Behavior,
    }

    impl CountingHandler {
        fn new(behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                call_count: AtomicU32::new(0),
                behavior,
            })
        }

        fn call_count(&self) -> u32 {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl WebhookEventHandler for CountingHandler {
        fn handles(&self) -> &'static str {
            INVOICE_PAYMENT_FAILED
        }

        async fn handle(&self, _event: &ProviderEvent) -> Result<(), WebhookError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Fail => Err(WebhookError::Storage("Simulated failure".into())),
                Behavior::Ignore => Err(WebhookError::Ignored("Nothing to do".into())),
                Behavior::UnknownTenant => Err(WebhookError::UnknownTenant("cus_404".into())),
            }
        }
    }

    struct SingleHandlerDispatcher {
        handler: Arc<CountingHandler>,
    }

    #[async_trait]
    impl WebhookDispatcher for SingleHandlerDispatcher {
        fn get_handler(&self, event_type: &str) -> Option<&dyn WebhookEventHandler> {
            if event_type == self.handler.handles() {
                Some(self.handler.as_ref())
            } else {
                None
            }
        }
    }

    fn failed_payment(event_ref: &str) -> ProviderEvent {
        builders::event(
            event_ref,
            1_704_067_200,
            ProviderEventKind::InvoicePaymentFailed(builders::invoice("in_1", "cus_1", "sub_1")),
        )
    }

    fn processor(
        handler: Arc<CountingHandler>,
    ) -> (
        IdempotentWebhookProcessor<Arc<InMemoryWebhookEventRepository>, SingleHandlerDispatcher>,
        Arc<InMemoryWebhookEventRepository>,
    ) {
        let repo = Arc::new(InMemoryWebhookEventRepository::new());
        let processor =
            IdempotentWebhookProcessor::new(repo.clone(), SingleHandlerDispatcher { handler });
        (processor, repo)
    }

    // ══════════════════════════════════════════════════════════════
    // Dispatcher
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn dispatcher_ignores_unhandled_events() {
        let handler = CountingHandler::new(Behavior::Succeed);
        let dispatcher = SingleHandlerDispatcher {
            handler: handler.clone(),
        };
        let event = builders::event("evt_x", 1_704_067_200, ProviderEventKind::Unhandled);

        let result = dispatcher.dispatch(&event).await;

        assert!(matches!(result, Err(WebhookError::Ignored(_))));
        assert_eq!(handler.call_count(), 0);
    }

    // ══════════════════════════════════════════════════════════════
    // Processor
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn processes_new_event_and_marks_it_applied() {
        let handler = CountingHandler::new(Behavior::Succeed);
        let (processor, repo) = processor(handler.clone());

        let result = processor.process(failed_payment("evt_new")).await;

        assert_eq!(result.unwrap(), WebhookResult::Processed);
        assert_eq!(handler.call_count(), 1);
        let record = repo.find_by_event_ref("evt_new").await.unwrap().unwrap();
        assert_eq!(record.status, DedupStatus::Applied);
        assert_eq!(record.outcome, Some(EventOutcome::Applied));
    }

    #[tokio::test]
    async fn duplicate_delivery_is_not_dispatched_again() {
        let handler = CountingHandler::new(Behavior::Succeed);
        let (processor, _) = processor(handler.clone());

        processor.process(failed_payment("evt_dup")).await.unwrap();
        let result = processor.process(failed_payment("evt_dup")).await;

        assert_eq!(result.unwrap(), WebhookResult::AlreadyProcessed);
        assert_eq!(handler.call_count(), 1);
    }

    #[tokio::test]
    async fn failed_dispatch_releases_claim_for_redelivery() {
        let handler = CountingHandler::new(Behavior::Fail);
        let (processor, repo) = processor(handler.clone());

        assert!(processor.process(failed_payment("evt_fail")).await.is_err());
        assert!(repo.find_by_event_ref("evt_fail").await.unwrap().is_none());

        assert!(processor.process(failed_payment("evt_fail")).await.is_err());
        assert_eq!(handler.call_count(), 2);
    }

    #[tokio::test]
    async fn ignored_event_is_recorded_and_acknowledged() {
        let handler = CountingHandler::new(Behavior::Ignore);
        let (processor, repo) = processor(handler);

        let result = processor.process(failed_payment("evt_ignore")).await;

        assert!(matches!(result, Ok(WebhookResult::Ignored(_))));
        let record = repo.find_by_event_ref("evt_ignore").await.unwrap().unwrap();
        assert_eq!(record.outcome, Some(EventOutcome::Ignored));
    }

    #[tokio::test]
    async fn unknown_tenant_is_acknowledged_not_failed() {
        let handler = CountingHandler::new(Behavior::UnknownTenant);
        let (processor, repo) = processor(handler);

        let result = processor.process(failed_payment("evt_orphan")).await;

        assert!(matches!(result, Ok(WebhookResult::Ignored(_))));
        let record = repo.find_by_event_ref("evt_orphan").await.unwrap().unwrap();
        assert_eq!(record.outcome, Some(EventOutcome::UnknownTenant));
    }

    #[tokio::test]
    async fn live_pending_claim_reports_in_progress() {
        let handler = CountingHandler::new(Behavior::Succeed);
        let (processor, repo) = processor(handler.clone());
        let event = failed_payment("evt_busy");
        repo.try_claim(WebhookEventRecord::pending(&event), Duration::from_secs(300))
            .await
            .unwrap();

        let result = processor.process(event).await;

        assert!(matches!(result, Err(WebhookError::InProgress(_))));
        assert_eq!(handler.call_count(), 0);
    }

    #[tokio::test]
    async fn expired_pending_claim_is_taken_over() {
        let handler = CountingHandler::new(Behavior::Succeed);
        let (processor, repo) = processor(handler.clone());
        let processor = processor.with_pending_lease(Duration::ZERO);
        let event = failed_payment("evt_crashed");
        repo.try_claim(WebhookEventRecord::pending(&event), Duration::from_secs(300))
            .await
            .unwrap();

        let result = processor.process(event).await;

        assert_eq!(result.unwrap(), WebhookResult::Processed);
        assert_eq!(handler.call_count(), 1);
    }
}
