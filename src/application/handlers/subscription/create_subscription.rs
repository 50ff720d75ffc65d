//! CreateSubscriptionHandler - moves a tenant from the free plan (or an
//! expired subscription) to a paid one.

use std::sync::Arc;

use crate::domain::billing::{BillingCycle, BillingError, Plan, SubscriptionRecord};
use crate::domain::foundation::{TenantKey, Timestamp};
use crate::ports::{
    CreateCustomerRequest, CreateSubscriptionRequest, PaymentProvider, ProviderSubscription,
    SubscriptionStore,
};

use super::reconcile::{ReconcilePolicy, Reconciler};

const MONTH_SECS: i64 = 30 * 24 * 60 * 60;
const YEAR_SECS: i64 = 365 * 24 * 60 * 60;

/// Command to start a paid subscription.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionCommand {
    pub tenant_key: TenantKey,
    pub plan: Plan,
    pub billing_cycle: BillingCycle,
    pub payment_method_ref: String,
}

/// Result of a successful create.
#[derive(Debug, Clone)]
pub struct CreateSubscriptionResult {
    pub record: SubscriptionRecord,
    pub subscription: ProviderSubscription,
}

/// Handler for creating paid subscriptions.
///
/// The provider customer is reused when the record already has one that
/// still exists at the provider. Both provider creates carry idempotency keys
/// derived from the tenant and the record version the command started from,
/// so a caller retrying after a timeout lands on the same subscription.
pub struct CreateSubscriptionHandler {
    reconciler: Reconciler,
}

impl CreateSubscriptionHandler {
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
        cmd: CreateSubscriptionCommand,
    ) -> Result<CreateSubscriptionResult, BillingError> {
        // 1. Only paid plans go through the provider
        if !cmd.plan.is_paid() {
            return Err(BillingError::InvalidPlan(format!(
                "{} cannot be subscribed to",
                cmd.plan
            )));
        }
        if cmd.payment_method_ref.trim().is_empty() {
            return Err(BillingError::validation(
                "payment_method_ref",
                "Payment method is required",
            ));
        }

        // 2. Check the lifecycle allows a fresh subscription
        let current = self
            .reconciler
            .store()
            .get(&cmd.tenant_key)
            .await?
            .unwrap_or_else(|| SubscriptionRecord::free(cmd.tenant_key.clone()));
        let lifecycle = current.lifecycle();
        if !lifecycle.accepts_new_subscription() {
            return Err(BillingError::invalid_state(lifecycle, "create subscription"));
        }

        // 3. Provider mutations and commit run to completion
        let reconciler = self.reconciler.clone();
        self.reconciler
            .run_detached(async move { create_and_commit(reconciler, cmd, current).await })
            .await
    }
}

async fn create_and_commit(
    reconciler: Reconciler,
    cmd: CreateSubscriptionCommand,
    current: SubscriptionRecord,
) -> Result<CreateSubscriptionResult, BillingError> {
    // 3a. Ensure a provider customer
    let customer_ref = ensure_customer(&reconciler, &cmd, &current).await?;

    // 3b. Create the subscription
    let request = CreateSubscriptionRequest {
        customer_ref: customer_ref.clone(),
        plan: cmd.plan,
        billing_cycle: cmd.billing_cycle,
        idempotency_key: Some(format!("create-sub-{}-{}", cmd.tenant_key, current.version)),
    };
    let subscription = match reconciler
        .call_provider(
            "create_subscription",
            reconciler.provider().create_subscription(request.clone()),
        )
        .await
    {
        Err(err) if err.is_ambiguous() => {
            // Same idempotency key: returns the first subscription if it was created
            tracing::info!(
                tenant_key = %cmd.tenant_key,
                "create_subscription timed out; re-issuing with the same idempotency key"
            );
            reconciler
                .call_provider(
                    "create_subscription",
                    reconciler.provider().create_subscription(request),
                )
                .await?
        }
        other => other?,
    };

    // 3c. Commit
    let next_billing_time = subscription.period_end().unwrap_or_else(|| {
        tracing::warn!(
            tenant_key = %cmd.tenant_key,
            subscription_ref = %subscription.id,
            "Provider returned no period end; estimating from the billing cycle"
        );
        Timestamp::now().plus_secs(match cmd.billing_cycle {
            BillingCycle::Monthly => MONTH_SECS,
            BillingCycle::Yearly => YEAR_SECS,
        })
    });

    let record = reconciler
        .modify(&cmd.tenant_key, |record| {
            if record.provider_subscription_ref.as_deref() == Some(subscription.id.as_str()) {
                return Ok(false);
            }
            let lifecycle = record.lifecycle();
            if !lifecycle.accepts_new_subscription() {
                tracing::error!(
                    tenant_key = %cmd.tenant_key,
                    orphaned_subscription_ref = %subscription.id,
                    current_subscription_ref = ?record.provider_subscription_ref,
                    "Concurrent create committed first; provider subscription left orphaned"
                );
                return Err(BillingError::invalid_state(lifecycle, "create subscription"));
            }
            record.activate(
                cmd.plan,
                cmd.billing_cycle,
                customer_ref.clone(),
                subscription.id.clone(),
                next_billing_time,
            );
            // The first invoice may still be open or declined
            record.status = subscription.local_status();
            Ok(true)
        })
        .await?;

    tracing::info!(
        tenant_key = %cmd.tenant_key,
        plan = %cmd.plan,
        billing_cycle = %cmd.billing_cycle,
        subscription_ref = %subscription.id,
        lifecycle = %record.lifecycle(),
        "Subscription created"
    );

    Ok(CreateSubscriptionResult {
        record,
        subscription,
    })
}

/// Returns a usable customer ref, reusing the record's when it still exists.
async fn ensure_customer(
    reconciler: &Reconciler,
    cmd: &CreateSubscriptionCommand,
    current: &SubscriptionRecord,
) -> Result<String, BillingError> {
    let provider = reconciler.provider();

    if let Some(existing) = current.provider_customer_ref.as_deref() {
        let found = reconciler
            .call_provider("retrieve_customer", provider.retrieve_customer(existing))
            .await?;
        if let Some(customer) = found {
            reconciler
                .call_provider(
                    "attach_payment_method",
                    provider.attach_payment_method(&customer.id, &cmd.payment_method_ref),
                )
                .await?;
            reconciler
                .call_provider(
                    "set_default_payment_method",
                    provider.set_default_payment_method(&customer.id, &cmd.payment_method_ref),
                )
                .await?;
            return Ok(customer.id);
        }
        tracing::info!(
            tenant_key = %cmd.tenant_key,
            customer_ref = existing,
            "Provider customer was deleted; creating a new one"
        );
    }

    let request = CreateCustomerRequest {
        tenant_key: cmd.tenant_key.clone(),
        payment_method_ref: Some(cmd.payment_method_ref.clone()),
        idempotency_key: Some(format!("create-cus-{}-{}", cmd.tenant_key, current.version)),
    };
    let customer = match reconciler
        .call_provider("create_customer", provider.create_customer(request.clone()))
        .await
    {
        Err(err) if err.is_ambiguous() => {
            reconciler
                .call_provider("create_customer", provider.create_customer(request))
                .await?
        }
        other => other?,
    };
    Ok(customer.id)
}
