//! GetSubscriptionStatusHandler - Query handler for a tenant's subscription view.

use std::sync::Arc;

use crate::domain::billing::{
    BillingError, Feature, LifecycleState, Plan, SubscriptionRecord,
};
use crate::domain::foundation::{TenantKey, Timestamp};
use crate::ports::{PaymentProvider, SubscriptionStore};

use super::reconcile::{ReconcilePolicy, Reconciler};

/// Query for a tenant's subscription status.
#[derive(Debug, Clone)]
pub struct GetSubscriptionStatusQuery {
    pub tenant_key: TenantKey,
}

/// Subscription view returned to callers.
#[derive(Debug, Clone)]
pub struct SubscriptionStatusView {
    pub record: SubscriptionRecord,
    pub lifecycle: LifecycleState,
    pub effective_plan: Plan,
    pub features: Vec<Feature>,
    /// Provider's current period end, when it could be fetched.
    pub provider_period_end: Option<Timestamp>,
    pub cancel_at_period_end: Option<bool>,
}

/// Handler for status queries.
///
/// Tenants that never subscribed get the implicit free record. The provider
/// is consulted best-effort; a failure degrades to the local view.
pub struct GetSubscriptionStatusHandler {
    reconciler: Reconciler,
}

impl GetSubscriptionStatusHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self {
            reconciler: Reconciler::new(store, provider, ReconcilePolicy::default()),
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.reconciler = self.reconciler.with_policy(policy);
        self
    }

    pub async fn handle(
        &self,
        query: GetSubscriptionStatusQuery,
    ) -> Result<SubscriptionStatusView, BillingError> {
        let record = self
            .reconciler
            .store()
            .get(&query.tenant_key)
            .await?
            .unwrap_or_else(|| SubscriptionRecord::free(query.tenant_key.clone()));

        let mut provider_period_end = None;
        let mut cancel_at_period_end = None;
        if let Some(subscription_ref) = record.provider_subscription_ref.as_deref() {
            match self
                .reconciler
                .call_provider(
                    "retrieve_subscription",
                    self.reconciler
                        .provider()
                        .retrieve_subscription(subscription_ref),
                )
                .await
            {
                Ok(Some(subscription)) => {
                    provider_period_end = subscription.period_end();
                    cancel_at_period_end = Some(subscription.cancel_at_period_end);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(
                        tenant_key = %query.tenant_key,
                        subscription_ref,
                        error = %err,
                        "Provider lookup failed; returning local view"
                    );
                }
            }
        }

        let effective_plan = record.effective_plan();
        Ok(SubscriptionStatusView {
            lifecycle: record.lifecycle(),
            effective_plan,
            features: effective_plan.features(),
            record,
            provider_period_end,
            cancel_at_period_end,
        })
    }
}
