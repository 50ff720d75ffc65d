//! In-memory webhook dedup store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::domain::foundation::Timestamp;
use crate::ports::{
    ClaimResult, DedupStatus, EventOutcome, StoreError, WebhookEventRecord, WebhookEventRepository,
};

/// In-memory `WebhookEventRepository`.
#[derive(Default)]
pub struct InMemoryWebhookEventRepository {
    records: RwLock<HashMap<String, WebhookEventRecord>>,
}

impl InMemoryWebhookEventRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of remembered event refs.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl WebhookEventRepository for InMemoryWebhookEventRepository {
    async fn find_by_event_ref(
        &self,
        event_ref: &str,
    ) -> Result<Option<WebhookEventRecord>, StoreError> {
        Ok(self.records.read().await.get(event_ref).cloned())
    }

    async fn try_claim(
        &self,
        record: WebhookEventRecord,
        lease: Duration,
    ) -> Result<ClaimResult, StoreError> {
        let mut records = self.records.write().await;
        let now = Timestamp::now();

        if let Some(existing) = records.get_mut(&record.event_ref) {
            return Ok(match existing.status {
                DedupStatus::Applied => ClaimResult::AlreadyApplied,
                DedupStatus::Pending if existing.lease_expired(lease, now) => {
                    existing.claimed_at = now;
                    ClaimResult::Claimed
                }
                DedupStatus::Pending => ClaimResult::InProgress,
            });
        }

        records.insert(record.event_ref.clone(), record);
        Ok(ClaimResult::Claimed)
    }

    async fn mark_applied(&self, event_ref: &str, outcome: EventOutcome) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(event_ref)
            .ok_or_else(|| StoreError::NotFound(event_ref.to_string()))?;
        record.status = DedupStatus::Applied;
        record.outcome = Some(outcome);
        record.applied_at = Some(Timestamp::now());
        Ok(())
    }

    async fn release(&self, event_ref: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        if matches!(records.get(event_ref), Some(r) if r.status == DedupStatus::Pending) {
            records.remove(event_ref);
        }
        Ok(())
    }

    async fn delete_before(&self, cutoff: Timestamp) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.received_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{ProviderEvent, ProviderEventKind};

    fn record(event_ref: &str) -> WebhookEventRecord {
        WebhookEventRecord::pending(&ProviderEvent {
            event_ref: event_ref.to_string(),
            event_type: "invoice.payment_succeeded".into(),
            created: None,
            kind: ProviderEventKind::Unhandled,
            payload: serde_json::Value::Null,
        })
    }

    const LEASE: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn first_claim_wins() {
        let repo = InMemoryWebhookEventRepository::new();

        assert_eq!(repo.try_claim(record("evt_1"), LEASE).await.unwrap(), ClaimResult::Claimed);
        assert_eq!(
            repo.try_claim(record("evt_1"), LEASE).await.unwrap(),
            ClaimResult::InProgress
        );
    }

    #[tokio::test]
    async fn applied_event_reports_already_applied() {
        let repo = InMemoryWebhookEventRepository::new();
        repo.try_claim(record("evt_1"), LEASE).await.unwrap();
        repo.mark_applied("evt_1", EventOutcome::Applied).await.unwrap();

        assert_eq!(
            repo.try_claim(record("evt_1"), Duration::ZERO).await.unwrap(),
            ClaimResult::AlreadyApplied
        );
    }

    #[tokio::test]
    async fn release_only_drops_pending_claims() {
        let repo = InMemoryWebhookEventRepository::new();
        repo.try_claim(record("evt_pending"), LEASE).await.unwrap();
        repo.try_claim(record("evt_done"), LEASE).await.unwrap();
        repo.mark_applied("evt_done", EventOutcome::Ignored).await.unwrap();

        repo.release("evt_pending").await.unwrap();
        repo.release("evt_done").await.unwrap();

        assert!(repo.find_by_event_ref("evt_pending").await.unwrap().is_none());
        assert!(repo.find_by_event_ref("evt_done").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn delete_before_purges_old_entries() {
        let repo = InMemoryWebhookEventRepository::new();
        let mut old = record("evt_old");
        old.received_at = Timestamp::now().add_days(-2);
        repo.try_claim(old, LEASE).await.unwrap();
        repo.try_claim(record("evt_new"), LEASE).await.unwrap();

        let removed = repo.delete_before(Timestamp::now().add_days(-1)).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn mark_applied_unknown_ref_is_not_found() {
        let repo = InMemoryWebhookEventRepository::new();
        assert!(matches!(
            repo.mark_applied("evt_missing", EventOutcome::Applied).await,
            Err(StoreError::NotFound(_))
        ));
    }
}
