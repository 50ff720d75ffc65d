//! Stripe payment provider adapter.
//!
//! Implements the `PaymentProvider` port against the Stripe REST API using
//! form-encoded requests authenticated with the secret key.
//!
//! Each method is one HTTP call (price swaps read the subscription first to
//! find the item to replace). Nothing here retries: the reconciliation engine
//! owns timeouts and re-queries.
//!
//! # Configuration
//!
//! ```ignore
//! let prices = StripePriceMap::new().with_price(Plan::Basic, BillingCycle::Monthly, "price_...");
//! let adapter = StripePaymentAdapter::new(StripeConfig::new(api_key, prices));
//! ```

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::domain::billing::{BillingCycle, Plan, ProviderEvent};
use crate::ports::{
    CreateCustomerRequest, CreateSubscriptionRequest, Customer, PaymentError, PaymentErrorCode,
    PaymentProvider, ProviderInvoice, ProviderSubscription, UpdateSubscriptionRequest,
};

use super::webhook_types::{
    StripeCustomer, StripeErrorEnvelope, StripeInvoice, StripeList, StripeSubscription,
};
use super::webhook_verifier::DEFAULT_SIGNATURE_TOLERANCE_SECS;
use super::{StripePriceMap, StripeWebhookVerifier};

const DEFAULT_API_BASE_URL: &str = "https://api.stripe.com";

/// Stripe API configuration.
#[derive(Clone)]
pub struct StripeConfig {
    /// Stripe secret API key (sk_live_... or sk_test_...).
    api_key: SecretString,

    /// Base URL for Stripe API (default: https://api.stripe.com).
    api_base_url: String,

    /// Price ids per plan and billing cycle.
    prices: StripePriceMap,

    /// Replay window for webhook signatures.
    signature_tolerance_secs: i64,
}

impl StripeConfig {
    pub fn new(api_key: SecretString, prices: StripePriceMap) -> Self {
        Self {
            api_key,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            prices,
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }

    /// Set a custom API base URL (for stripe-mock or a recording proxy).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_signature_tolerance_secs(mut self, secs: i64) -> Self {
        self.signature_tolerance_secs = secs;
        self
    }
}

/// Stripe payment provider adapter.
pub struct StripePaymentAdapter {
    config: StripeConfig,
    verifier: StripeWebhookVerifier,
    http_client: reqwest::Client,
}

impl StripePaymentAdapter {
    pub fn new(config: StripeConfig) -> Self {
        let verifier = StripeWebhookVerifier::new(config.prices.clone())
            .with_tolerance_secs(config.signature_tolerance_secs);
        Self {
            config,
            verifier,
            http_client: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.config.api_base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http_client
            .get(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http_client
            .post(self.url(path))
            .basic_auth(self.config.api_key.expose_secret(), Option::<&str>::None)
    }

    fn price_id(&self, plan: Plan, cycle: BillingCycle) -> Result<String, PaymentError> {
        self.config
            .prices
            .price_for(plan, cycle)
            .map(str::to_string)
            .ok_or_else(|| {
                PaymentError::invalid_request(format!(
                    "No Stripe price configured for {} {}",
                    plan.as_str(),
                    cycle.as_str()
                ))
            })
    }

    /// Sends a request and decodes a successful JSON body.
    async fn send<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> Result<T, PaymentError> {
        let response = request
            .send()
            .await
            .map_err(|e| PaymentError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let error = error_from_response(status, &body);
            tracing::error!(
                operation,
                status = status.as_u16(),
                code = %error.code,
                "Stripe API call failed"
            );
            return Err(error);
        }

        response.json().await.map_err(|e| {
            PaymentError::new(
                PaymentErrorCode::ProviderError,
                format!("Failed to parse Stripe response: {}", e),
            )
        })
    }

    /// Like `send`, but a 404 is `Ok(None)`.
    async fn send_optional<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        operation: &str,
    ) -> Result<Option<T>, PaymentError> {
        match self.send(request, operation).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.code == PaymentErrorCode::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    async fn fetch_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<StripeSubscription>, PaymentError> {
        self.send_optional(
            self.get(&format!("subscriptions/{}", subscription_ref)),
            "retrieve_subscription",
        )
        .await
    }
}

/// Maps a non-2xx Stripe response to a `PaymentError`.
fn error_from_response(status: StatusCode, body: &str) -> PaymentError {
    let api_error = serde_json::from_str::<StripeErrorEnvelope>(body)
        .ok()
        .map(|envelope| envelope.error);
    let message = api_error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| format!("Stripe API error ({})", status.as_u16()));
    let is_card_error = api_error
        .as_ref()
        .and_then(|e| e.error_type.as_deref())
        .is_some_and(|t| t == "card_error");

    let code = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PaymentErrorCode::AuthenticationError,
        StatusCode::PAYMENT_REQUIRED => PaymentErrorCode::CardDeclined,
        _ if is_card_error => PaymentErrorCode::CardDeclined,
        StatusCode::NOT_FOUND => PaymentErrorCode::NotFound,
        StatusCode::TOO_MANY_REQUESTS => PaymentErrorCode::RateLimitExceeded,
        s if s.is_client_error() => PaymentErrorCode::InvalidRequest,
        _ => PaymentErrorCode::ProviderError,
    };

    let mut error = PaymentError::new(code, message);
    if let Some(provider_code) = api_error.and_then(|e| e.decline_code.or(e.code)) {
        error = error.with_provider_code(provider_code);
    }
    error
}

#[async_trait]
impl PaymentProvider for StripePaymentAdapter {
    async fn create_customer(
        &self,
        request: CreateCustomerRequest,
    ) -> Result<Customer, PaymentError> {
        let mut params = vec![("metadata[tenant_key]", request.tenant_key.to_string())];
        if let Some(payment_method) = &request.payment_method_ref {
            params.push(("payment_method", payment_method.clone()));
            params.push(("invoice_settings[default_payment_method]", payment_method.clone()));
        }

        let mut builder = self.post("customers").form(&params);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let customer: StripeCustomer = self.send(builder, "create_customer").await?;
        tracing::info!(customer_ref = %customer.id, tenant_key = %request.tenant_key, "Stripe customer created");
        Ok(customer.into())
    }

    async fn retrieve_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<Customer>, PaymentError> {
        let customer: Option<StripeCustomer> = self
            .send_optional(self.get(&format!("customers/{}", customer_ref)), "retrieve_customer")
            .await?;
        Ok(customer.filter(|c| !c.deleted).map(Customer::from))
    }

    async fn create_subscription(
        &self,
        request: CreateSubscriptionRequest,
    ) -> Result<ProviderSubscription, PaymentError> {
        let price_id = self.price_id(request.plan, request.billing_cycle)?;
        let params = [
            ("customer", request.customer_ref.clone()),
            ("items[0][price]", price_id),
            ("metadata[plan]", request.plan.as_str().to_string()),
            ("metadata[billing_cycle]", request.billing_cycle.as_str().to_string()),
        ];

        let mut builder = self.post("subscriptions").form(&params);
        if let Some(key) = &request.idempotency_key {
            builder = builder.header("Idempotency-Key", key);
        }

        let sub: StripeSubscription = self.send(builder, "create_subscription").await?;
        Ok(sub.to_provider_subscription(&self.config.prices))
    }

    async fn update_subscription(
        &self,
        request: UpdateSubscriptionRequest,
    ) -> Result<ProviderSubscription, PaymentError> {
        let price_id = self.price_id(request.plan, request.billing_cycle)?;
        let current = self
            .fetch_subscription(&request.subscription_ref)
            .await?
            .ok_or_else(|| PaymentError::not_found("Subscription"))?;
        let item_id = current
            .primary_item_id()
            .ok_or_else(|| PaymentError::invalid_request("Subscription has no items"))?
            .to_string();

        let params = [
            ("items[0][id]", item_id),
            ("items[0][price]", price_id),
            ("proration_behavior", "always_invoice".to_string()),
        ];
        let sub: StripeSubscription = self
            .send(
                self.post(&format!("subscriptions/{}", request.subscription_ref))
                    .form(&params),
                "update_subscription",
            )
            .await?;
        Ok(sub.to_provider_subscription(&self.config.prices))
    }

    async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<ProviderSubscription>, PaymentError> {
        Ok(self
            .fetch_subscription(subscription_ref)
            .await?
            .map(|sub| sub.to_provider_subscription(&self.config.prices)))
    }

    async fn cancel_at_period_end(
        &self,
        subscription_ref: &str,
    ) -> Result<ProviderSubscription, PaymentError> {
        let sub: StripeSubscription = self
            .send(
                self.post(&format!("subscriptions/{}", subscription_ref))
                    .form(&[("cancel_at_period_end", "true")]),
                "cancel_at_period_end",
            )
            .await?;
        Ok(sub.to_provider_subscription(&self.config.prices))
    }

    async fn attach_payment_method(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
    ) -> Result<(), PaymentError> {
        let _: serde_json::Value = self
            .send(
                self.post(&format!("payment_methods/{}/attach", payment_method_ref))
                    .form(&[("customer", customer_ref)]),
                "attach_payment_method",
            )
            .await?;
        Ok(())
    }

    async fn set_default_payment_method(
        &self,
        customer_ref: &str,
        payment_method_ref: &str,
    ) -> Result<(), PaymentError> {
        let _: StripeCustomer = self
            .send(
                self.post(&format!("customers/{}", customer_ref))
                    .form(&[("invoice_settings[default_payment_method]", payment_method_ref)]),
                "set_default_payment_method",
            )
            .await?;
        Ok(())
    }

    async fn detach_payment_method(&self, payment_method_ref: &str) -> Result<(), PaymentError> {
        let _: serde_json::Value = self
            .send(
                self.post(&format!("payment_methods/{}/detach", payment_method_ref)),
                "detach_payment_method",
            )
            .await?;
        Ok(())
    }

    async fn list_invoices(
        &self,
        customer_ref: &str,
        limit: u8,
    ) -> Result<Vec<ProviderInvoice>, PaymentError> {
        let list: StripeList<StripeInvoice> = self
            .send(
                self.get("invoices").query(&[
                    ("customer", customer_ref.to_string()),
                    ("limit", limit.clamp(1, 100).to_string()),
                ]),
                "list_invoices",
            )
            .await?;
        Ok(list.data.into_iter().map(ProviderInvoice::from).collect())
    }

    fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature: &str,
        secret: &SecretString,
    ) -> Result<ProviderEvent, PaymentError> {
        self.verifier.verify(payload, signature, secret)
    }
}
