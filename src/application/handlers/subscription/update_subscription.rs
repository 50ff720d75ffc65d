//! UpdateSubscriptionHandler - moves an active subscription to another plan
//! or billing cycle.

use std::sync::Arc;

use crate::domain::billing::{
    BillingCycle, BillingError, ChangeAction, LifecycleState, Plan, SubscriptionRecord,
};
use crate::domain::foundation::TenantKey;
use crate::ports::{
    PaymentProvider, ProviderSubscription, SubscriptionStore, UpdateSubscriptionRequest,
};

use super::reconcile::{ReconcilePolicy, Reconciler};

/// Command to change plan and/or cycle.
#[derive(Debug, Clone)]
pub struct UpdateSubscriptionCommand {
    pub tenant_key: TenantKey,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
}

/// Result of a plan change.
#[derive(Debug, Clone)]
pub struct UpdateSubscriptionResult {
    pub record: SubscriptionRecord,
    /// False when the tenant was already on the requested plan and cycle.
    pub changed: bool,
}

/// Handler for plan changes.
///
/// The provider invoices the proration immediately. The commit replaces
/// plan, cycle, status and `next_billing_time` with the provider's response
/// and appends an audit entry, so two racing changes both show up in the
/// change log even though only the later one owns `plan`.
pub struct UpdateSubscriptionHandler {
    reconciler: Reconciler,
}

impl UpdateSubscriptionHandler {
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
        cmd: UpdateSubscriptionCommand,
    ) -> Result<UpdateSubscriptionResult, BillingError> {
        // 1. Downgrading to free is a cancellation, not a plan change
        if !cmd.plan.is_paid() {
            return Err(BillingError::InvalidPlan(
                "Cancel the subscription to return to the free plan".to_string(),
            ));
        }

        // 2. Find the subscription and check the lifecycle
        let record = self.reconciler.load(&cmd.tenant_key).await?;
        let lifecycle = record.lifecycle();
        if lifecycle != LifecycleState::Active {
            return Err(BillingError::invalid_state(lifecycle, "change plan"));
        }
        if record.plan == cmd.plan && record.billing_cycle == cmd.billing_cycle {
            return Ok(UpdateSubscriptionResult {
                record,
                changed: false,
            });
        }
        let subscription_ref = record
            .provider_subscription_ref
            .clone()
            .ok_or_else(|| BillingError::invalid_state(LifecycleState::None, "change plan"))?;

        // 3. Provider mutation and commit run to completion
        let reconciler = self.reconciler.clone();
        self.reconciler
            .run_detached(async move {
                let request = UpdateSubscriptionRequest {
                    subscription_ref,
                    plan: cmd.plan,
                    billing_cycle: cmd.billing_cycle,
                };
                let subscription = update_at_provider(&reconciler, request).await?;
                commit(&reconciler, &cmd, &subscription).await
            })
            .await
    }
}

/// Issues the update, resolving an ambiguous timeout by re-querying.
async fn update_at_provider(
    reconciler: &Reconciler,
    request: UpdateSubscriptionRequest,
) -> Result<ProviderSubscription, BillingError> {
    let provider = reconciler.provider();

    match reconciler
        .call_provider(
            "update_subscription",
            provider.update_subscription(request.clone()),
        )
        .await
    {
        Ok(subscription) => Ok(subscription),
        Err(err) if err.is_ambiguous() => {
            let observed = reconciler
                .call_provider(
                    "retrieve_subscription",
                    provider.retrieve_subscription(&request.subscription_ref),
                )
                .await
                .map_err(|e| {
                    BillingError::ProviderUnavailable(format!(
                        "Plan change outcome unknown for {}: {}",
                        request.subscription_ref, e
                    ))
                })?;

            match observed {
                Some(subscription) if subscription.is_on(request.plan, request.billing_cycle) => {
                    Ok(subscription)
                }
                Some(_) => {
                    tracing::info!(
                        subscription_ref = %request.subscription_ref,
                        "Timed-out plan change was not applied; re-issuing once"
                    );
                    Ok(reconciler
                        .call_provider("update_subscription", provider.update_subscription(request))
                        .await?)
                }
                None => Err(BillingError::provider_rejected(format!(
                    "Subscription {} no longer exists at the provider",
                    request.subscription_ref
                ))),
            }
        }
        Err(err) => Err(err.into()),
    }
}

async fn commit(
    reconciler: &Reconciler,
    cmd: &UpdateSubscriptionCommand,
    subscription: &ProviderSubscription,
) -> Result<UpdateSubscriptionResult, BillingError> {
    let status = subscription.local_status();

    let mut changed = false;
    let record = reconciler
        .modify(&cmd.tenant_key, |record| {
            if record.provider_subscription_ref.as_deref() != Some(subscription.id.as_str()) {
                tracing::warn!(
                    tenant_key = %cmd.tenant_key,
                    subscription_ref = %subscription.id,
                    "Record moved to another subscription before the plan change committed"
                );
                changed = false;
                return Ok(false);
            }
            let lifecycle = record.lifecycle();
            if lifecycle != LifecycleState::Active {
                tracing::warn!(
                    tenant_key = %cmd.tenant_key,
                    subscription_ref = %subscription.id,
                    lifecycle = %lifecycle,
                    "Subscription left ACTIVE before the plan change committed; audit only"
                );
                record.log_unapplied(ChangeAction::PlanChanged, cmd.plan, cmd.billing_cycle);
                changed = false;
                return Ok(true);
            }
            record.change_plan(cmd.plan, cmd.billing_cycle, status, subscription.period_end());
            changed = true;
            Ok(true)
        })
        .await?;

    if changed {
        tracing::info!(
            tenant_key = %cmd.tenant_key,
            plan = %cmd.plan,
            billing_cycle = %cmd.billing_cycle,
            "Subscription plan changed"
        );
    }

    Ok(UpdateSubscriptionResult { record, changed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemorySubscriptionStore;
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::application::handlers::subscription::{
        CreateSubscriptionCommand, CreateSubscriptionHandler,
    };
    use crate::domain::billing::{ChangeAction, SubscriptionStatus};
    use crate::ports::PaymentError;
    use std::time::Duration;

    fn tenant() -> TenantKey {
        TenantKey::new("acme").unwrap()
    }

    fn policy() -> ReconcilePolicy {
        ReconcilePolicy {
            max_write_attempts: 5,
            retry_backoff: Duration::from_millis(1),
            provider_timeout: Duration::from_millis(50),
        }
    }

    async fn active_tenant() -> (
        UpdateSubscriptionHandler,
        Arc<InMemorySubscriptionStore>,
        MockPaymentProvider,
    ) {
        let store = Arc::new(InMemorySubscriptionStore::new());
        let provider = MockPaymentProvider::new();
        CreateSubscriptionHandler::new(store.clone(), Arc::new(provider.clone()))
            .with_policy(policy())
            .handle(CreateSubscriptionCommand {
                tenant_key: tenant(),
                plan: Plan::Basic,
                billing_cycle: BillingCycle::Monthly,
                payment_method_ref: "pm_1".into(),
            })
            .await
            .unwrap();
        let handler = UpdateSubscriptionHandler::new(store.clone(), Arc::new(provider.clone()))
            .with_policy(policy());
        (handler, store, provider)
    }

    fn update(plan: Plan, billing_cycle: BillingCycle) -> UpdateSubscriptionCommand {
        UpdateSubscriptionCommand {
            tenant_key: tenant(),
            plan,
            billing_cycle,
        }
    }

    #[tokio::test]
    async fn upgrade_replaces_plan_and_logs_change() {
        let (handler, _, provider) = active_tenant().await;

        let result = handler.handle(update(Plan::Pro, BillingCycle::Monthly)).await.unwrap();

        assert!(result.changed);
        assert_eq!(result.record.plan, Plan::Pro);
        assert_eq!(result.record.status, SubscriptionStatus::Active);
        assert_eq!(result.record.last_change().unwrap().action, ChangeAction::PlanChanged);
        assert_eq!(provider.call_count("update_subscription"), 1);
    }

    #[tokio::test]
    async fn cycle_change_takes_new_period_end_from_provider() {
        let (handler, _, provider) = active_tenant().await;

        let result = handler
            .handle(update(Plan::Basic, BillingCycle::Yearly))
            .await
            .unwrap();

        let sub_ref = result.record.provider_subscription_ref.clone().unwrap();
        assert_eq!(
            result.record.next_billing_time,
            provider.subscription(&sub_ref).unwrap().period_end()
        );
        assert_eq!(result.record.billing_cycle, BillingCycle::Yearly);
    }

    #[tokio::test]
    async fn same_plan_is_a_no_op() {
        let (handler, store, provider) = active_tenant().await;
        let writes = store.write_count();

        let result = handler
            .handle(update(Plan::Basic, BillingCycle::Monthly))
            .await
            .unwrap();

        assert!(!result.changed);
        assert!(!provider.was_called("update_subscription"));
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn free_plan_is_rejected() {
        let (handler, _, _) = active_tenant().await;

        let err = handler
            .handle(update(Plan::Free, BillingCycle::Monthly))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::InvalidPlan(_)));
    }

    #[tokio::test]
    async fn provider_failure_leaves_plan_unchanged() {
        let (handler, store, provider) = active_tenant().await;
        provider.set_method_error("update_subscription", PaymentError::network("reset"));

        let err = handler
            .handle(update(Plan::Enterprise, BillingCycle::Monthly))
            .await
            .unwrap_err();

        assert!(matches!(err, BillingError::ProviderUnavailable(_)));
        assert_eq!(store.get(&tenant()).await.unwrap().unwrap().plan, Plan::Basic);
    }

    #[tokio::test]
    async fn timed_out_update_is_confirmed_by_requery() {
        let (handler, _, provider) = active_tenant().await;
        provider.delay_next_call("update_subscription", Duration::from_millis(200));

        let result = handler.handle(update(Plan::Pro, BillingCycle::Monthly)).await.unwrap();

        assert_eq!(result.record.plan, Plan::Pro);
        assert_eq!(provider.call_count("update_subscription"), 1);
        assert_eq!(provider.call_count("retrieve_subscription"), 1);
    }

    #[tokio::test]
    async fn concurrent_changes_are_both_audited() {
        let (handler, store, _) = active_tenant().await;
        let handler = Arc::new(handler);

        let (a, b) = tokio::join!(
            handler.handle(update(Plan::Pro, BillingCycle::Monthly)),
            handler.handle(update(Plan::Enterprise, BillingCycle::Monthly)),
        );
        a.unwrap();
        b.unwrap();

        let record = store.get(&tenant()).await.unwrap().unwrap();
        let changes: Vec<Plan> = record
            .change_log
            .iter()
            .filter(|c| c.action == ChangeAction::PlanChanged)
            .map(|c| c.plan)
            .collect();
        assert_eq!(changes.len(), 2);
        assert!(changes.contains(&Plan::Pro));
        assert!(changes.contains(&Plan::Enterprise));
        assert_eq!(record.plan, *changes.last().unwrap());
    }

    #[tokio::test]
    async fn commit_after_expiry_only_audits_the_change() {
        let (handler, store, provider) = active_tenant().await;
        let mut record = store.get(&tenant()).await.unwrap().unwrap();
        let confirmed = provider
            .update_subscription(UpdateSubscriptionRequest {
                subscription_ref: record.provider_subscription_ref.clone().unwrap(),
                plan: Plan::Pro,
                billing_cycle: BillingCycle::Monthly,
            })
            .await
            .unwrap();
        record.status = SubscriptionStatus::Expired;
        store.seed(record).await;

        let result = commit(&handler.reconciler, &update(Plan::Pro, BillingCycle::Monthly), &confirmed)
            .await
            .unwrap();

        assert!(!result.changed);
        assert_eq!(result.record.lifecycle(), LifecycleState::Expired);
        assert_eq!(result.record.plan, Plan::Basic);
        let last = result.record.last_change().unwrap();
        assert_eq!(last.action, ChangeAction::PlanChanged);
        assert_eq!(last.plan, Plan::Pro);
    }
}
