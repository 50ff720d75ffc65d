//! CancelSubscriptionHandler - requests cancellation at period end.

use std::sync::Arc;

use crate::domain::billing::{BillingError, ChangeAction, LifecycleState, SubscriptionRecord};
use crate::domain::foundation::{TenantKey, Timestamp};
use crate::ports::{PaymentProvider, ProviderSubscription, SubscriptionStore};

use super::reconcile::{ReconcilePolicy, Reconciler};

/// Command to cancel a tenant's subscription.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionCommand {
    pub tenant_key: TenantKey,
}

/// Result of a confirmed cancellation.
#[derive(Debug, Clone)]
pub struct CancelSubscriptionResult {
    pub record: SubscriptionRecord,
    /// When access ends, as reported by the provider.
    pub cancel_effective_at: Option<Timestamp>,
}

/// Handler for cancelling subscriptions.
///
/// Cancellation takes effect at the end of the current billing period.
/// Tenants keep paid access until then, so `next_billing_time` is left as is.
pub struct CancelSubscriptionHandler {
    reconciler: Reconciler,
}

impl CancelSubscriptionHandler {
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
        cmd: CancelSubscriptionCommand,
    ) -> Result<CancelSubscriptionResult, BillingError> {
        // 1. Find the tenant's subscription
        let record = self.reconciler.load(&cmd.tenant_key).await?;

        // 2. Check the lifecycle
        match record.lifecycle() {
            LifecycleState::Active => {}
            LifecycleState::CancelPending => {
                return Ok(CancelSubscriptionResult {
                    cancel_effective_at: record.next_billing_time,
                    record,
                });
            }
            other => return Err(BillingError::invalid_state(other, "cancel subscription")),
        }
        let subscription_ref = record
            .provider_subscription_ref
            .clone()
            .ok_or_else(|| BillingError::invalid_state(LifecycleState::None, "cancel subscription"))?;

        // 3. Provider mutation and commit run to completion
        let reconciler = self.reconciler.clone();
        self.reconciler
            .run_detached(async move {
                let subscription = cancel_at_provider(&reconciler, &subscription_ref).await?;
                commit(&reconciler, &cmd.tenant_key, &subscription).await
            })
            .await
    }
}

/// Issues the cancel, resolving an ambiguous timeout by re-querying.
async fn cancel_at_provider(
    reconciler: &Reconciler,
    subscription_ref: &str,
) -> Result<ProviderSubscription, BillingError> {
    let provider = reconciler.provider();

    match reconciler
        .call_provider(
            "cancel_at_period_end",
            provider.cancel_at_period_end(subscription_ref),
        )
        .await
    {
        Ok(subscription) => Ok(subscription),
        Err(err) if err.is_ambiguous() => {
            let observed = reconciler
                .call_provider(
                    "retrieve_subscription",
                    provider.retrieve_subscription(subscription_ref),
                )
                .await
                .map_err(|e| {
                    BillingError::ProviderUnavailable(format!(
                        "Cancel outcome unknown for {}: {}",
                        subscription_ref, e
                    ))
                })?;

            match observed {
                Some(subscription) if subscription.cancel_at_period_end => {
                    tracing::info!(
                        subscription_ref,
                        "Timed-out cancel was applied at the provider"
                    );
                    Ok(subscription)
                }
                Some(_) => {
                    tracing::info!(
                        subscription_ref,
                        "Timed-out cancel was not applied; re-issuing once"
                    );
                    Ok(reconciler
                        .call_provider(
                            "cancel_at_period_end",
                            provider.cancel_at_period_end(subscription_ref),
                        )
                        .await?)
                }
                None => Err(BillingError::provider_rejected(format!(
                    "Subscription {} no longer exists at the provider",
                    subscription_ref
                ))),
            }
        }
        Err(err) => Err(err.into()),
    }
}

async fn commit(
    reconciler: &Reconciler,
    tenant_key: &TenantKey,
    subscription: &ProviderSubscription,
) -> Result<CancelSubscriptionResult, BillingError> {
    let record = reconciler
        .modify(tenant_key, |record| {
            if record.provider_subscription_ref.as_deref() != Some(subscription.id.as_str()) {
                tracing::warn!(
                    tenant_key = %tenant_key,
                    subscription_ref = %subscription.id,
                    "Record moved to another subscription before the cancel committed"
                );
                return Ok(false);
            }
            match record.lifecycle() {
                LifecycleState::Active => {
                    record.mark_cancel_pending(subscription.period_end());
                    Ok(true)
                }
                LifecycleState::CancelPending => Ok(false),
                other => {
                    tracing::warn!(
                        tenant_key = %tenant_key,
                        subscription_ref = %subscription.id,
                        lifecycle = %other,
                        "Subscription left ACTIVE before the cancel committed; audit only"
                    );
                    let (plan, billing_cycle) = (record.plan, record.billing_cycle);
                    record.log_unapplied(ChangeAction::CancelRequested, plan, billing_cycle);
                    Ok(true)
                }
            }
        })
        .await?;

    tracing::info!(
        tenant_key = %tenant_key,
        subscription_ref = %subscription.id,
        "Subscription set to cancel at period end"
    );

    Ok(CancelSubscriptionResult {
        record,
        cancel_effective_at: subscription.cancel_effective_at(),
    })
}
