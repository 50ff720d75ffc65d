//! Shared machinery of the reconciliation engine.
//!
//! - `RecordWriter::modify` is the only way handlers write a record: read,
//!   apply a closure, compare-and-swap, and on a version conflict re-read and
//!   re-apply the same intent, up to `max_write_attempts`.
//! - `Reconciler::call_provider` bounds every provider call with a timeout.
//!   A timeout is reported as `PaymentErrorCode::Timeout` so callers can
//!   re-query before deciding what to do.
//! - `Reconciler::run_detached` runs a provider mutation and its commit on
//!   its own task, so dropping the caller's future cannot abandon a mutation
//!   that was already issued.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::billing::{BillingError, SubscriptionRecord};
use crate::domain::foundation::TenantKey;
use crate::ports::{PaymentError, PaymentProvider, StoreError, SubscriptionStore};

/// Retry and timeout tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Versioned write attempts before giving up with `ReconciliationConflict`.
    pub max_write_attempts: u32,
    /// Base delay between write attempts; grows linearly with the attempt.
    pub retry_backoff: Duration,
    /// Deadline for a single provider call.
    pub provider_timeout: Duration,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self {
            max_write_attempts: 5,
            retry_backoff: Duration::from_millis(25),
            provider_timeout: Duration::from_secs(10),
        }
    }
}

/// Lost races and outages are retried against the store only.
fn is_transient(err: &StoreError) -> bool {
    err.is_conflict() || matches!(err, StoreError::Unavailable(_))
}

/// Versioned writes to the record store.
///
/// Webhook handlers only need this half of the engine.
#[derive(Clone)]
pub struct RecordWriter {
    store: Arc<dyn SubscriptionStore>,
    policy: ReconcilePolicy,
}

impl RecordWriter {
    pub fn new(store: Arc<dyn SubscriptionStore>, policy: ReconcilePolicy) -> Self {
        Self { store, policy }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &dyn SubscriptionStore {
        self.store.as_ref()
    }

    /// Loads a tenant's record, failing with `NotFound` if it has none.
    pub async fn load(&self, tenant_key: &TenantKey) -> Result<SubscriptionRecord, BillingError> {
        self.store
            .get(tenant_key)
            .await?
            .ok_or_else(|| BillingError::NotFound(tenant_key.clone()))
    }

    /// Read-modify-write with bounded compare-and-swap retries.
    ///
    /// A lost version race or a store outage re-reads and re-applies; the
    /// provider is never called again from here.
    ///
    /// `apply` receives a fresh copy of the stored record (or the implicit
    /// free record with version 0) on every attempt and returns whether it
    /// changed anything. When it returns `false` nothing is written and the
    /// stored record is returned as-is.
    pub async fn modify<F>(
        &self,
        tenant_key: &TenantKey,
        mut apply: F,
    ) -> Result<SubscriptionRecord, BillingError>
    where
        F: FnMut(&mut SubscriptionRecord) -> Result<bool, BillingError> + Send,
    {
        let attempts = self.policy.max_write_attempts.max(1);
        let mut last_error = StoreError::VersionConflict {
            expected: 0,
            actual: 0,
        };

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.policy.retry_backoff * (attempt - 1)).await;
            }

            let current = match self.store.get(tenant_key).await {
                Ok(found) => found.unwrap_or_else(|| SubscriptionRecord::free(tenant_key.clone())),
                Err(err) if is_transient(&err) => {
                    last_error = err;
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let expected_version = current.version;

            let mut next = current.clone();
            if !apply(&mut next)? {
                return Ok(current);
            }

            match self
                .store
                .compare_and_swap(tenant_key, expected_version, &next)
                .await
            {
                Ok(stored) => return Ok(stored),
                Err(err) if is_transient(&err) => {
                    tracing::debug!(
                        tenant_key = %tenant_key,
                        attempt,
                        error = %err,
                        "Versioned write failed; re-reading"
                    );
                    last_error = err;
                }
                Err(err) => return Err(err.into()),
            }
        }

        tracing::warn!(
            tenant_key = %tenant_key,
            attempts,
            error = %last_error,
            "Giving up on versioned write"
        );
        if last_error.is_conflict() {
            Err(BillingError::ReconciliationConflict {
                tenant_key: tenant_key.clone(),
                attempts,
            })
        } else {
            Err(last_error.into())
        }
    }
}

/// Record writer + provider, shared by every subscription command handler.
#[derive(Clone)]
pub struct Reconciler {
    writer: RecordWriter,
    provider: Arc<dyn PaymentProvider>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        provider: Arc<dyn PaymentProvider>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            writer: RecordWriter::new(store, policy),
            provider,
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.writer = self.writer.with_policy(policy);
        self
    }

    pub fn store(&self) -> &dyn SubscriptionStore {
        self.writer.store()
    }

    pub fn provider(&self) -> &dyn PaymentProvider {
        self.provider.as_ref()
    }

    pub fn policy(&self) -> ReconcilePolicy {
        self.writer.policy
    }

    pub async fn load(&self, tenant_key: &TenantKey) -> Result<SubscriptionRecord, BillingError> {
        self.writer.load(tenant_key).await
    }

    /// See [`RecordWriter::modify`].
    pub async fn modify<F>(
        &self,
        tenant_key: &TenantKey,
        apply: F,
    ) -> Result<SubscriptionRecord, BillingError>
    where
        F: FnMut(&mut SubscriptionRecord) -> Result<bool, BillingError> + Send,
    {
        self.writer.modify(tenant_key, apply).await
    }

    /// Awaits a provider call with the configured deadline.
    pub async fn call_provider<T, Fut>(
        &self,
        operation: &'static str,
        call: Fut,
    ) -> Result<T, PaymentError>
    where
        Fut: Future<Output = Result<T, PaymentError>>,
    {
        match tokio::time::timeout(self.writer.policy.provider_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    operation,
                    timeout_ms = self.writer.policy.provider_timeout.as_millis() as u64,
                    "Provider call timed out; outcome unknown"
                );
                Err(PaymentError::timeout(format!(
                    "{} timed out after {:?}",
                    operation, self.writer.policy.provider_timeout
                )))
            }
        }
    }

    /// Runs `work` to completion on its own task.
    pub async fn run_detached<T, Fut>(&self, work: Fut) -> Result<T, BillingError>
    where
        T: Send + 'static,
        Fut: Future<Output = Result<T, BillingError>> + Send + 'static,
    {
        tokio::spawn(work)
            .await
            .map_err(|e| BillingError::Internal(format!("Reconciliation task failed: {}", e)))?
    }
}
