//! SubscriptionStore port - the durable per-tenant subscription record.
//!
//! The store is the single writer of truth for subscription state. Every
//! mutation is an optimistic versioned write so the reconciliation engine can
//! detect lost updates from concurrent command/webhook races and retry them.
//!
//! ## Versioning
//!
//! A record that was never stored has version 0. `compare_and_swap` with
//! `expected_version = 0` inserts; any other value updates only if the stored
//! version still matches. On success the stored version is
//! `expected_version + 1` and the stored record is returned.

use async_trait::async_trait;

use crate::domain::billing::{InvoiceEntry, SubscriptionRecord};
use crate::domain::foundation::TenantKey;

use super::StoreError;

/// Port for the subscription record store.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Load the record for a tenant.
    ///
    /// Returns `None` if the tenant has no subscription history.
    async fn get(&self, tenant_key: &TenantKey) -> Result<Option<SubscriptionRecord>, StoreError>;

    /// Find the record owning a provider customer ref.
    async fn find_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError>;

    /// Find the record owning a provider subscription ref.
    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<SubscriptionRecord>, StoreError>;

    /// Write `record` only if the stored version equals `expected_version`.
    ///
    /// # Errors
    ///
    /// - `StoreError::VersionConflict` if another writer got there first
    /// - `StoreError::AlreadyExists` if inserting (version 0) and a record exists
    async fn compare_and_swap(
        &self,
        tenant_key: &TenantKey,
        expected_version: u64,
        record: &SubscriptionRecord,
    ) -> Result<SubscriptionRecord, StoreError>;

    /// Append an invoice to the tenant's history.
    ///
    /// A no-op if an entry with the same `invoice_ref` already exists. Returns
    /// true if the entry was appended.
    ///
    /// # Errors
    ///
    /// `StoreError::NotFound` if the tenant has no record.
    async fn append_invoice(
        &self,
        tenant_key: &TenantKey,
        entry: &InvoiceEntry,
    ) -> Result<bool, StoreError>;
}
