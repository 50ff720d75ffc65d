//! In-memory subscription record store with versioned writes.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::RwLock;

use crate::domain::billing::{InvoiceEntry, SubscriptionRecord};
use crate::domain::foundation::{TenantKey, Timestamp};
use crate::ports::{StoreError, SubscriptionStore};

/// In-memory `SubscriptionStore`.
///
/// Supports fault injection for exercising the engine's retry paths:
/// forced version conflicts and a simulated outage.
#[derive(Default)]
pub struct InMemorySubscriptionStore {
    records: RwLock<HashMap<TenantKey, SubscriptionRecord>>,
    forced_conflicts: AtomicU32,
    unavailable: AtomicBool,
    write_count: AtomicU32,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly, bypassing versioning.
    pub async fn seed(&self, mut record: SubscriptionRecord) -> SubscriptionRecord {
        if record.version == 0 {
            record.version = 1;
        }
        self.records
            .write()
            .await
            .insert(record.tenant_key.clone(), record.clone());
        record
    }

    /// Make the next `n` compare-and-swap calls fail with a version conflict.
    pub fn force_conflicts(&self, n: u32) {
        self.forced_conflicts.store(n, Ordering::SeqCst);
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of successful writes so far.
    pub fn write_count(&self) -> u32 {
        self.write_count.load(Ordering::SeqCst)
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory store offline".into()));
        }
        Ok(())
    }

    fn take_forced_conflict(&self) -> bool {
        self.forced_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn find_by(
        &self,
        matches: impl Fn(&SubscriptionRecord) -> bool,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.check_available()?;
        let records = self.records.read().await;
        Ok(records.values().find(|r| matches(r)).cloned())
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get(&self, tenant_key: &TenantKey) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.read().await.get(tenant_key).cloned())
    }

    async fn find_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.find_by(|r| r.provider_customer_ref.as_deref() == Some(customer_ref))
            .await
    }

    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError> {
        self.find_by(|r| r.provider_subscription_ref.as_deref() == Some(subscription_ref))
            .await
    }

    async fn compare_and_swap(
        &self,
        tenant_key: &TenantKey,
        expected_version: u64,
        record: &SubscriptionRecord,
    ) -> Result<SubscriptionRecord, StoreError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let actual = records.get(tenant_key).map(|r| r.version).unwrap_or(0);

        if self.take_forced_conflict() {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual: actual + 1,
            });
        }
        if expected_version == 0 && actual != 0 {
            return Err(StoreError::AlreadyExists(tenant_key.to_string()));
        }
        if actual != expected_version {
            return Err(StoreError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        let mut stored = record.clone();
        stored.tenant_key = tenant_key.clone();
        stored.version = expected_version + 1;
        stored.updated_at = Timestamp::now();
        records.insert(tenant_key.clone(), stored.clone());
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(stored)
    }

    async fn append_invoice(
        &self,
        tenant_key: &TenantKey,
        entry: &InvoiceEntry,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut records = self.records.write().await;
        let record = records
            .get_mut(tenant_key)
            .ok_or_else(|| StoreError::NotFound(tenant_key.to_string()))?;

        if !record.append_invoice(entry.clone()) {
            return Ok(false);
        }
        record.version += 1;
        record.updated_at = Timestamp::now();
        self.write_count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }
}
