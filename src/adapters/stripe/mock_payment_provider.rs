//! Mock payment provider for testing.
//!
//! A stateful in-process fake of the provider, used by unit and integration
//! tests. Supports:
//! - Customers, subscriptions and invoices that behave like the real API
//!   (generated ids, idempotency keys, cancel-at-period-end)
//! - Error injection, persistent or one-shot, per method
//! - Artificial latency per method, applied *after* the state change so a
//!   caller-side timeout observes an ambiguous outcome
//! - Call tracking
//!
//! Webhook verification runs the real Stripe verifier, so tests sign their
//! payloads with [`sign_payload`](super::sign_payload).

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::domain::billing::{BillingCycle, ProviderEvent, ProviderSubscriptionStatus};
use crate::ports::{
    CreateCustomerRequest, CreateSubscriptionRequest, Customer, PaymentError, PaymentProvider,
    ProviderInvoice, ProviderSubscription, UpdateSubscriptionRequest,
};

use super::{StripePriceMap, StripeWebhookVerifier};

const MONTH_SECS: i64 = 30 * 24 * 60 * 60;
const YEAR_SECS: i64 = 365 * 24 * 60 * 60;

/// Mock payment provider for testing.
///
/// # Example
///
/// ```ignore
/// let mock = MockPaymentProvider::new();
/// mock.set_method_error("cancel_at_period_end", PaymentError::network("reset"));
/// mock.delay_next_call("create_subscription", Duration::from_millis(200));
/// ```
#[derive(Clone)]
pub struct MockPaymentProvider {
    /// Inner state (shared between clones).
    inner: Arc<Mutex<MockState>>,
    verifier: StripeWebhookVerifier,
}

#[derive(Default)]
struct MockState {
    next_id: u32,
    customers: HashMap<String, MockCustomer>,
    subscriptions: HashMap<String, ProviderSubscription>,
    invoices: Vec<ProviderInvoice>,
    /// Status given to new subscriptions; `active` when unset.
    initial_status: Option<ProviderSubscriptionStatus>,
    /// Idempotency key -> id of the object the first call created.
    idempotency_keys: HashMap<String, String>,
    method_errors: HashMap<String, PaymentError>,
    next_errors: HashMap<String, PaymentError>,
    method_delays: HashMap<String, Duration>,
    next_delays: HashMap<String, Duration>,
    call_log: Vec<MethodCall>,
}

struct MockCustomer {
    customer: Customer,
    payment_methods: Vec<String>,
    deleted: bool,
}

/// Recorded method call for assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    pub method: String,
    pub args: Vec<String>,
}

impl Default for MockPaymentProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPaymentProvider {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockState::default())),
            verifier: StripeWebhookVerifier::new(StripePriceMap::conventional()),
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Provider-side state
    // ════════════════════════════════════════════════════════════════════════════

    /// Current provider view of a subscription.
    pub fn subscription(&self, subscription_ref: &str) -> Option<ProviderSubscription> {
        self.state().subscriptions.get(subscription_ref).cloned()
    }

    /// Insert or replace a subscription.
    pub fn set_subscription(&self, subscription: ProviderSubscription) {
        self.state()
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }

    /// Status new subscriptions start in, e.g. `incomplete` for a declined
    /// first payment.
    pub fn set_initial_status(&self, status: ProviderSubscriptionStatus) {
        self.state().initial_status = Some(status);
    }

    /// Number of subscriptions that exist at the provider.
    pub fn subscription_count(&self) -> usize {
        self.state().subscriptions.len()
    }

    /// Register an existing customer.
    pub fn add_customer(&self, customer_ref: &str) {
        self.state().customers.insert(
            customer_ref.to_string(),
            MockCustomer {
                customer: Customer {
                    id: customer_ref.to_string(),
                    default_payment_method: None,
                    created_at: chrono::Utc::now().timestamp(),
                },
                payment_methods: Vec::new(),
                deleted: false,
            },
        );
    }

    /// Mark a customer as deleted at the provider.
    pub fn delete_customer(&self, customer_ref: &str) {
        if let Some(customer) = self.state().customers.get_mut(customer_ref) {
            customer.deleted = true;
        }
    }

    /// Payment methods attached to a customer.
    pub fn payment_methods(&self, customer_ref: &str) -> Vec<String> {
        self.state()
            .customers
            .get(customer_ref)
            .map(|c| c.payment_methods.clone())
            .unwrap_or_default()
    }

    pub fn add_invoice(&self, invoice: ProviderInvoice) {
        self.state().invoices.push(invoice);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Fault injection
    // ════════════════════════════════════════════════════════════════════════════

    /// Fail every call to `method` with `error` until cleared.
    pub fn set_method_error(&self, method: &str, error: PaymentError) {
        self.state().method_errors.insert(method.to_string(), error);
    }

    /// Fail only the next call to `method`.
    pub fn fail_next_call(&self, method: &str, error: PaymentError) {
        self.state().next_errors.insert(method.to_string(), error);
    }

    /// Delay every call to `method` after applying its effect.
    pub fn set_method_delay(&self, method: &str, delay: Duration) {
        self.state().method_delays.insert(method.to_string(), delay);
    }

    /// Delay only the next call to `method` after applying its effect.
    pub fn delay_next_call(&self, method: &str, delay: Duration) {
        self.state().next_delays.insert(method.to_string(), delay);
    }

    pub fn clear_errors(&self) {
        let mut state = self.state();
        state.method_errors.clear();
        state.next_errors.clear();
        state.method_delays.clear();
        state.next_delays.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Call Tracking
    // ════════════════════════════════════════════════════════════════════════════

    pub fn calls(&self) -> Vec<MethodCall> {
        self.state().call_log.clone()
    }

    pub fn was_called(&self, method: &str) -> bool {
        self.state().call_log.iter().any(|c| c.method == method)
    }

    pub fn call_count(&self, method: &str) -> usize {
        self.state()
            .call_log
            .iter()
            .filter(|c| c.method == method)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state().call_log.clear();
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Internal Helpers
    // ════════════════════════════════════════════════════════════════════════════

    /// Records the call and returns any injected error.
    fn begin(&self, method: &str, args: Vec<String>) -> Result<(), PaymentError> {
        let mut state = self.state();
        state.call_log.push(MethodCall {
            method: method.to_string(),
            args,
        });
        if let Some(error) = state.next_errors.remove(method) {
            return Err(error);
        }
        if let Some(error) = state.method_errors.get(method) {
            return Err(error.clone());
        }
        Ok(())
    }

    /// Sleeps for any configured latency of `method`.
    async fn finish(&self, method: &str) {
        let delay = {
            let mut state = self.state();
            state
                .next_delays
                .remove(method)
                .or_else(|| state.method_delays.get(method).copied())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn next_id(state: &mut MockState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{}_{}", prefix, state.next_id)
    }

    fn period_secs(cycle: BillingCycle) -> i64 {
        match cycle {
            BillingCycle::Monthly => MONTH_SECS,
            BillingCycle::Yearly => YEAR_SECS,
        }
    }
}

#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, PaymentError> {
        self.begin("create_customer", vec![request.tenant_key.to_string()])?;

        let customer = {
            let mut state = self.state();
            let existing = request
                .idempotency_key
                .as_ref()
                .and_then(|key| state.idempotency_keys.get(key).cloned())
                .and_then(|id| state.customers.get(&id).map(|c| c.customer.clone()));

            match existing {
                Some(customer) => customer,
                None => {
                    let id = Self::next_id(&mut state, "cus");
                    let customer = Customer {
                        id: id.clone(),
                        default_payment_method: request.payment_method_ref.clone(),
                        created_at: chrono::Utc::now().timestamp(),
                    };
                    state.customers.insert(
                        id.clone(),
                        MockCustomer {
                            customer: customer.clone(),
                            payment_methods: request.payment_method_ref.iter().cloned().collect(),
                            deleted: false,
                        },
                    );
                    if let Some(key) = request.idempotency_key {
                        state.idempotency_keys.insert(key, id);
                    }
                    customer
                }
            }
        };

        self.finish("create_customer").await;
        Ok(customer)
    }

    async fn retrieve_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<Customer>, PaymentError> {
        self.begin("retrieve_customer", vec![customer_ref.to_string()])?;
        let customer = self
            .state()
            .customers
            .get(customer_ref)
            .filter(|c| !c.deleted)
            .map(|c| c.customer.clone());
        self.finish("retrieve_customer").await;
        Ok(customer)
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, PaymentError> {
        self.begin(
            "create_subscription",
            vec![
                request.customer_ref.clone(),
                request.plan.as_str().to_string(),
                request.billing_cycle.as_str().to_string(),
            ],
        )?;
        if !request.plan.is_paid() {
            return Err(PaymentError::invalid_request("Free plan has no price"));
        }

        let subscription = {
            let mut state = self.state();
            if !state.customers.contains_key(&request.customer_ref) {
                return Err(PaymentError::not_found("Customer"));
            }

            let existing = request
                .idempotency_key
                .as_ref()
                .and_then(|key| state.idempotency_keys.get(key).cloned())
                .and_then(|id| state.subscriptions.get(&id).cloned());

            match existing {
                Some(subscription) => subscription,
                None => {
                    let now = chrono::Utc::now().timestamp();
                    let id = Self::next_id(&mut state, "sub");
                    let subscription = ProviderSubscription {
                        id: id.clone(),
                        customer_id: request.customer_ref.clone(),
                        status: state
                            .initial_status
                            .unwrap_or(ProviderSubscriptionStatus::Active),
                        current_period_start: now,
                        current_period_end: now + Self::period_secs(request.billing_cycle),
                        cancel_at_period_end: false,
                        cancel_at: None,
                        canceled_at: None,
                        plan: Some((request.plan, request.billing_cycle)),
                    };
                    state.subscriptions.insert(id.clone(), subscription.clone());
                    if let Some(key) = request.idempotency_key {
                        state.idempotency_keys.insert(key, id);
                    }
                    subscription
                }
            }
        };

        self.finish("create_subscription").await;
        Ok(subscription)
    }

    async fn update_subscription(
        &self,
        request: UpdateSubscriptionRequest,
    ) -> Result<ProviderSubscription, PaymentError> {
        self.begin(
            "update_subscription",
            vec![
                request.subscription_ref.clone(),
                request.plan.as_str().to_string(),
                request.billing_cycle.as_str().to_string(),
            ],
        )?;

        let subscription = {
            let mut state = self.state();
            let sub = state
                .subscriptions
                .get_mut(&request.subscription_ref)
                .ok_or_else(|| PaymentError::not_found("Subscription"))?;

            let cycle_changed = sub
                .plan
                .map_or(true, |(_, cycle)| cycle != request.billing_cycle);
            if cycle_changed {
                let now = chrono::Utc::now().timestamp();
                sub.current_period_start = now;
                sub.current_period_end = now + Self::period_secs(request.billing_cycle);
            }
            sub.plan = Some((request.plan, request.billing_cycle));
            sub.clone()
        };

        self.finish("update_subscription").await;
        Ok(subscription)
    }

    async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<ProviderSubscription>, PaymentError> {
        self.begin("retrieve_subscription", vec![subscription_ref.to_string()])?;
        let subscription = self.subscription(subscription_ref);
        self.finish("retrieve_subscription").await;
        Ok(subscription)
    }

    async fn cancel_at_period_end(
        &self,
        subscription_ref: &str,
    ) -> Result<ProviderSubscription, PaymentError> {
        self.begin("cancel_at_period_end", vec![subscription_ref.to_string()])?;

        let subscription = {
            let mut state = self.state();
            let sub = state
                .subscriptions
                .get_mut(subscription_ref)
                .ok_or_else(|| PaymentError::not_found("Subscription"))?;
            sub.cancel_at_period_end = true;
            sub.cancel_at = Some(sub.current_period_end);
            sub.canceled_at = Some(chrono::Utc::now().timestamp());
            sub.clone()
        };

        self.finish("cancel_at_period_end").await;
        Ok(subscription)
    }

    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
    ) -> Result<(), PaymentError> {
        self.begin(
            "attach_payment_method",
            vec![customer_ref.to_string(), payment_method_ref.to_string()],
        )?;
        {
            let mut state = self.state();
            let customer = state
                .customers
                .get_mut(customer_ref)
                .ok_or_else(|| PaymentError::not_found("Customer"))?;
            if !customer.payment_methods.iter().any(|pm| pm == payment_method_ref) {
                customer.payment_methods.push(payment_method_ref.to_string());
            }
        }
        self.finish("attach_payment_method").await;
        Ok(())
    }

    async fn set_default_payment_method(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
    ) -> Result<(), PaymentError> {
        self.begin(
            "set_default_payment_method",
            vec![customer_ref.to_string(), payment_method_ref.to_string()],
        )?;
        {
            let mut state = self.state();
            let customer = state
                .customers
                .get_mut(customer_ref)
                .ok_or_else(|| PaymentError::not_found("Customer"))?;
            if !customer.payment_methods.iter().any(|pm| pm == payment_method_ref) {
                return Err(PaymentError::invalid_request(
                    "Payment method is not attached to this customer",
                ));
            }
            customer.customer.default_payment_method = Some(payment_method_ref.to_string());
        }
        self.finish("set_default_payment_method").await;
        Ok(())
    }

    async fn detach_payment_method(&self, payment_method_ref: &str) -> Result<(), PaymentError> {
        self.begin("detach_payment_method", vec![payment_method_ref.to_string()])?;
        {
            let mut state = self.state();
            let owner = state
                .customers
                .values_mut()
                .find(|c| c.payment_methods.iter().any(|pm| pm == payment_method_ref))
                .ok_or_else(|| PaymentError::not_found("Payment method"))?;
            owner.payment_methods.retain(|pm| pm != payment_method_ref);
            if owner.customer.default_payment_method.as_deref() == Some(payment_method_ref) {
                owner.customer.default_payment_method = None;
            }
        }
        self.finish("detach_payment_method").await;
        Ok(())
    }

    async fn list_invoices(
        &self,
        customer_ref: &str,
        limit: u8,
    ) -> Result<Vec<ProviderInvoice>, PaymentError> {
        self.begin("list_invoices", vec![customer_ref.to_string(), limit.to_string()])?;
        let mut invoices: Vec<ProviderInvoice> = self
            .state()
            .invoices
            .iter()
            .filter(|invoice| invoice.customer_id == customer_ref)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| b.created.cmp(&a.created));
        invoices.truncate(limit as usize);
        self.finish("list_invoices").await;
        Ok(invoices)
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<ProviderEvent, PaymentError> {
        self.begin("verify_webhook_signature", vec![])?;
        self.verifier.verify(payload, signature, secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::Plan;
    use crate::domain::foundation::TenantKey;
    use crate::ports::PaymentErrorCode;

    fn customer_request(key: Option<&str>) -> CreateCustomerRequest {
        CreateCustomerRequest {
            tenant_key: TenantKey::new("acme").unwrap(),
            payment_method_ref: Some("pm_1".to_string()),
            idempotency_key: key.map(str::to_string),
        }
    }

    fn subscription_request(customer_ref: &str, key: Option<&str>) -> CreateSubscriptionRequest {
        CreateSubscriptionRequest {
            customer_ref: customer_ref.to_string(),
            plan: Plan::Basic,
            billing_cycle: BillingCycle::Monthly,
            idempotency_key: key.map(str::to_string),
        }
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Basic Operation Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn create_customer_sets_default_payment_method() {
        let mock = MockPaymentProvider::new();

        let customer = mock.create_customer(customer_request(None)).await.unwrap();

        assert!(customer.id.starts_with("cus_"));
        assert_eq!(customer.default_payment_method.as_deref(), Some("pm_1"));
        assert_eq!(mock.payment_methods(&customer.id), vec!["pm_1".to_string()]);
    }

    #[tokio::test]
    async fn deleted_customers_are_not_retrievable() {
        let mock = MockPaymentProvider::new();
        let customer = mock.create_customer(customer_request(None)).await.unwrap();

        mock.delete_customer(&customer.id);

        assert!(mock.retrieve_customer(&customer.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn create_subscription_sets_period_and_plan() {
        let mock = MockPaymentProvider::new();
        let customer = mock.create_customer(customer_request(None)).await.unwrap();

        let sub = mock
            .create_subscription(subscription_request(&customer.id, None))
            .await
            .unwrap();

        assert!(sub.id.starts_with("sub_"));
        assert_eq!(sub.current_period_end - sub.current_period_start, MONTH_SECS);
        assert!(sub.is_on(Plan::Basic, BillingCycle::Monthly));
    }

    #[tokio::test]
    async fn idempotency_key_returns_first_subscription() {
        let mock = MockPaymentProvider::new();
        let customer = mock.create_customer(customer_request(None)).await.unwrap();

        let first = mock
            .create_subscription(subscription_request(&customer.id, Some("k1")))
            .await
            .unwrap();
        let second = mock
            .create_subscription(subscription_request(&customer.id, Some("k1")))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(mock.subscription_count(), 1);
    }

    #[tokio::test]
    async fn cancel_at_period_end_sets_cancel_at() {
        let mock = MockPaymentProvider::new();
        let customer = mock.create_customer(customer_request(None)).await.unwrap();
        let sub = mock
            .create_subscription(subscription_request(&customer.id, None))
            .await
            .unwrap();

        let canceled = mock.cancel_at_period_end(&sub.id).await.unwrap();

        assert!(canceled.cancel_at_period_end);
        assert_eq!(canceled.cancel_at, Some(sub.current_period_end));
    }

    #[tokio::test]
    async fn update_keeps_period_when_cycle_is_unchanged() {
        let mock = MockPaymentProvider::new();
        let customer = mock.create_customer(customer_request(None)).await.unwrap();
        let sub = mock
            .create_subscription(subscription_request(&customer.id, None))
            .await
            .unwrap();

        let updated = mock
            .update_subscription(UpdateSubscriptionRequest {
                subscription_ref: sub.id.clone(),
                plan: Plan::Pro,
                billing_cycle: BillingCycle::Monthly,
            })
            .await
            .unwrap();

        assert_eq!(updated.current_period_end, sub.current_period_end);
        assert!(updated.is_on(Plan::Pro, BillingCycle::Monthly));
    }

    #[tokio::test]
    async fn set_default_requires_attached_method() {
        let mock = MockPaymentProvider::new();
        mock.add_customer("cus_x");

        let err = mock.set_default_payment_method("cus_x", "pm_9").await.unwrap_err();
        assert_eq!(err.code, PaymentErrorCode::InvalidRequest);

        mock.attach_payment_method("cus_x", "pm_9").await.unwrap();
        mock.set_default_payment_method("cus_x", "pm_9").await.unwrap();
        mock.detach_payment_method("pm_9").await.unwrap();
        assert!(mock.payment_methods("cus_x").is_empty());
    }

    #[tokio::test]
    async fn list_invoices_is_newest_first_and_limited() {
        let mock = MockPaymentProvider::new();
        for (i, created) in [100, 300, 200].into_iter().enumerate() {
            mock.add_invoice(ProviderInvoice {
                id: format!("in_{}", i),
                customer_id: "cus_1".into(),
                subscription_id: None,
                status: "paid".into(),
                amount_paid: 100,
                amount_due: 100,
                created,
            });
        }

        let invoices = mock.list_invoices("cus_1", 2).await.unwrap();

        assert_eq!(invoices.iter().map(|i| i.created).collect::<Vec<_>>(), vec![300, 200]);
    }

    // ════════════════════════════════════════════════════════════════════════════
    // Fault Injection Tests
    // ════════════════════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn one_shot_error_is_consumed() {
        let mock = MockPaymentProvider::new();
        mock.fail_next_call("create_customer", PaymentError::network("reset"));

        assert!(mock.create_customer(customer_request(None)).await.is_err());
        assert!(mock.create_customer(customer_request(None)).await.is_ok());
        assert_eq!(mock.call_count("create_customer"), 2);
    }

    #[tokio::test]
    async fn persistent_error_applies_until_cleared() {
        let mock = MockPaymentProvider::new();
        mock.set_method_error("retrieve_customer", PaymentError::network("down"));

        assert!(mock.retrieve_customer("cus_1").await.is_err());
        assert!(mock.retrieve_customer("cus_1").await.is_err());

        mock.clear_errors();
        assert!(mock.retrieve_customer("cus_1").await.is_ok());
    }

    #[tokio::test]
    async fn delayed_call_still_applies_its_effect() {
        let mock = MockPaymentProvider::new();
        let customer = mock.create_customer(customer_request(None)).await.unwrap();
        mock.delay_next_call("create_subscription", Duration::from_millis(200));

        let result = tokio::time::timeout(
            Duration::from_millis(20),
            mock.create_subscription(subscription_request(&customer.id, None)),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(mock.subscription_count(), 1);
    }

    #[test]
    fn clones_share_state() {
        let mock = MockPaymentProvider::new();
        let clone = mock.clone();
        clone.add_customer("cus_shared");
        assert!(mock.payment_methods("cus_shared").is_empty());
        assert!(mock.state().customers.contains_key("cus_shared"));
    }
}
