//! Payment method handlers - replace or remove the tenant's card on file.

use std::sync::Arc;

use crate::domain::billing::BillingError;
use crate::domain::foundation::TenantKey;
use crate::ports::{PaymentProvider, SubscriptionStore};

use super::reconcile::{ReconcilePolicy, Reconciler};

/// Command to make a payment method the tenant's invoice default.
#[derive(Debug, Clone)]
pub struct UpdatePaymentMethodCommand {
    pub tenant_key: TenantKey,
    pub payment_method_ref: String,
}

/// Command to detach a payment method from the tenant's customer.
#[derive(Debug, Clone)]
pub struct RemovePaymentMethodCommand {
    pub tenant_key: TenantKey,
    pub payment_method_ref: String,
}

/// Handler for payment method changes.
///
/// Payment methods live only at the provider; the record is read to find
/// the customer and never written.
pub struct ManagePaymentMethodHandler {
    reconciler: Reconciler,
}

impl ManagePaymentMethodHandler {
    pub fn new(store: Arc<dyn SubscriptionStore>, provider: Arc<dyn PaymentProvider>) -> Self {
        Self {
            reconciler: Reconciler::new(store, provider, ReconcilePolicy::default()),
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.reconciler = self.reconciler.with_policy(policy);
        self
    }

    pub async fn update(&self, cmd: UpdatePaymentMethodCommand) -> Result<(), BillingError> {
        // 1. Validate and find the customer
        let payment_method_ref = non_empty(&cmd.payment_method_ref)?;
        let customer_ref = self.customer_ref(&cmd.tenant_key).await?;
        let provider = self.reconciler.provider();

        // 2. Attach, then make default
        self.reconciler
            .call_provider(
                "attach_payment_method",
                provider.attach_payment_method(&customer_ref, payment_method_ref),
            )
            .await?;
        self.reconciler
            .call_provider(
                "set_default_payment_method",
                provider.set_default_payment_method(&customer_ref, payment_method_ref),
            )
            .await?;

        tracing::info!(tenant_key = %cmd.tenant_key, "Default payment method updated");
        Ok(())
    }

    pub async fn remove(&self, cmd: RemovePaymentMethodCommand) -> Result<(), BillingError> {
        let payment_method_ref = non_empty(&cmd.payment_method_ref)?;
        // Only tenants with a customer can own payment methods
        self.customer_ref(&cmd.tenant_key).await?;

        self.reconciler
            .call_provider(
                "detach_payment_method",
                self.reconciler
                    .provider()
                    .detach_payment_method(payment_method_ref),
            )
            .await?;

        tracing::info!(tenant_key = %cmd.tenant_key, "Payment method detached");
        Ok(())
    }

    async fn customer_ref(&self, tenant_key: &TenantKey) -> Result<String, BillingError> {
        self.reconciler
            .load(tenant_key)
            .await?
            .provider_customer_ref
            .ok_or_else(|| BillingError::NotFound(tenant_key.clone()))
    }
}

fn non_empty(payment_method_ref: &str) -> Result<&str, BillingError> {
    let trimmed = payment_method_ref.trim();
    if trimmed.is_empty() {
        return Err(BillingError::validation(
            "payment_method_ref",
            "Payment method is required",
        ));
    }
    Ok(trimmed)
}
