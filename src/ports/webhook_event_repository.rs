//! WebhookEventRepository port - dedup store for inbound provider events.
//!
//! Providers redeliver events (timeouts, non-2xx responses, lost acks), so
//! every event ref is claimed with a test-and-set before it is dispatched.
//!
//! ## Lifecycle of an entry
//!
//! ```text
//! (absent) ──try_claim──▶ Pending ──mark_applied──▶ Applied ──delete_before──▶ (absent)
//!                           │
//!                           └──release / lease expiry──▶ (absent / reclaimable)
//! ```
//!
//! A `Pending` entry whose lease has expired counts as not yet applied: a
//! process that crashed between claim and apply is recovered by the next
//! redelivery. Handlers must therefore be idempotent.

use async_trait::async_trait;
use std::time::Duration;

use crate::domain::billing::ProviderEvent;
use crate::domain::foundation::Timestamp;

use super::StoreError;

/// Processing state of an event ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupStatus {
    Pending,
    Applied,
}

impl DedupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupStatus::Pending => "pending",
            DedupStatus::Applied => "applied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(DedupStatus::Pending),
            "applied" => Some(DedupStatus::Applied),
            _ => None,
        }
    }
}

/// What applying the event amounted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Handler changed (or confirmed) subscription state.
    Applied,
    /// Unhandled type, or nothing to do.
    Ignored,
    /// No record matched the event's provider refs.
    UnknownTenant,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Applied => "applied",
            EventOutcome::Ignored => "ignored",
            EventOutcome::UnknownTenant => "unknown_tenant",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "applied" => Some(EventOutcome::Applied),
            "ignored" => Some(EventOutcome::Ignored),
            "unknown_tenant" => Some(EventOutcome::UnknownTenant),
            _ => None,
        }
    }
}

/// Dedup entry for one provider event.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookEventRecord {
    pub event_ref: String,
    pub event_type: String,
    pub status: DedupStatus,
    pub outcome: Option<EventOutcome>,
    pub received_at: Timestamp,
    /// When the current pending claim was taken.
    pub claimed_at: Timestamp,
    pub applied_at: Option<Timestamp>,
    pub payload: serde_json::Value,
}

impl WebhookEventRecord {
    /// Creates a pending claim for a freshly received event.
    pub fn pending(event: &ProviderEvent) -> Self {
        let now = Timestamp::now();
        Self {
            event_ref: event.event_ref.clone(),
            event_type: event.event_type.clone(),
            status: DedupStatus::Pending,
            outcome: None,
            received_at: now,
            claimed_at: now,
            applied_at: None,
            payload: event.payload.clone(),
        }
    }

    /// Returns true if this pending claim is older than `lease` at `now`.
    pub fn lease_expired(&self, lease: Duration, now: Timestamp) -> bool {
        let Ok(lease) = chrono::Duration::from_std(lease) else {
            return false;
        };
        self.status == DedupStatus::Pending
            && now.as_datetime().signed_duration_since(*self.claimed_at.as_datetime()) >= lease
    }
}

/// Result of trying to claim an event ref.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    /// The caller owns the event and must dispatch it.
    Claimed,
    /// The event was applied before; skip side effects.
    AlreadyApplied,
    /// Another delivery holds a live claim.
    InProgress,
}

/// Outcome reported to the webhook endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookResult {
    /// Event was dispatched and applied.
    Processed,
    /// Event was acknowledged without changing state.
    Ignored(String),
    /// Event was applied by an earlier delivery.
    AlreadyProcessed,
}

/// Port for the webhook dedup store.
///
/// Implementations must make `try_claim` atomic (a PRIMARY KEY on the event
/// ref plus a conditional re-claim of expired pending rows).
#[async_trait]
pub trait WebhookEventRepository: Send + Sync {
    /// Look up an event ref.
    async fn find_by_event_ref(
        &self,
        event_ref: &str,
    ) -> Result<Option<WebhookEventRecord>, StoreError>;

    /// Test-and-set: claim `record.event_ref` as pending.
    ///
    /// An existing pending claim older than `lease` is taken over.
    async fn try_claim(
        &self,
        record: WebhookEventRecord,
        lease: Duration,
    ) -> Result<ClaimResult, StoreError>;

    /// Mark a claimed event as applied.
    async fn mark_applied(&self, event_ref: &str, outcome: EventOutcome)
        -> Result<(), StoreError>;

    /// Drop a pending claim so a redelivery can retry immediately.
    ///
    /// Applied entries are left untouched.
    async fn release(&self, event_ref: &str) -> Result<(), StoreError>;

    /// Delete entries received before `cutoff`.
    ///
    /// Returns the number of entries removed.
    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, StoreError>;
}

#[async_trait]
impl<T: WebhookEventRepository + ?Sized> WebhookEventRepository for std::sync::Arc<T> {
    async fn find_by_event_ref(
        &self,
        event_ref: &str,
    ) -> Result<Option<WebhookEventRecord>, StoreError> {
        (**self).find_by_event_ref(event_ref).await
    }

    async fn try_claim(
        &self,
        record: WebhookEventRecord,
        lease: Duration,
    ) -> Result<ClaimResult, StoreError> {
        (**self).try_claim(record, lease).await
    }

    async fn mark_applied(&self, event_ref: &str, outcome: EventOutcome) -> Result<(), StoreError> {
        (**self).mark_applied(event_ref, outcome).await
    }

    async fn release(&self, event_ref: &str) -> Result<(), StoreError> {
        (**self).release(event_ref).await
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        (**self).delete_before(cutoff).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::ProviderEventKind;

    fn event() -> ProviderEvent {
        ProviderEvent {
            event_ref: "evt_1".into(),
            event_type: "invoice.payment_failed".into(),
            created: None,
            kind: ProviderEventKind::Unhandled,
            payload: serde_json::json!({"id": "in_1"}),
        }
    }

    #[test]
    fn pending_record_copies_event_identity() {
        let record = WebhookEventRecord::pending(&event());
        assert_eq!(record.event_ref, "evt_1");
        assert_eq!(record.status, DedupStatus::Pending);
        assert!(record.outcome.is_none());
        assert_eq!(record.payload["id"], "in_1");
    }

    #[test]
    fn lease_expires_only_for_pending_records() {
        let mut record = WebhookEventRecord::pending(&event());
        let later = record.claimed_at.plus_secs(301);

        assert!(record.lease_expired(Duration::from_secs(300), later));
        assert!(!record.lease_expired(Duration::from_secs(600), later));

        record.status = DedupStatus::Applied;
        assert!(!record.lease_expired(Duration::from_secs(300), later));
    }

    #[test]
    fn outcome_round_trips_through_str() {
        for outcome in [EventOutcome::Applied, EventOutcome::Ignored, EventOutcome::UnknownTenant] {
            assert_eq!(EventOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }

    #[test]
    fn webhook_event_repository_is_object_safe() {
        fn _accepts_dyn(_repo: &dyn WebhookEventRepository) {}
    }
}
