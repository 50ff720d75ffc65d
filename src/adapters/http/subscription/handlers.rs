//! HTTP handlers for subscription endpoints.
//!
//! These handlers connect Axum routes to the reconciliation engine's
//! command and query handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Json, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use secrecy::SecretString;

use crate::application::{
    CancelSubscriptionCommand, CancelSubscriptionHandler, CreateSubscriptionCommand,
    CreateSubscriptionHandler, GetSubscriptionStatusHandler, GetSubscriptionStatusQuery,
    HandleProviderWebhookCommand, HandleProviderWebhookHandler, ListInvoicesHandler,
    ListInvoicesQuery, ListPlansHandler, ManagePaymentMethodHandler, ReconcilePolicy,
    RemovePaymentMethodCommand, UpdatePaymentMethodCommand, UpdateSubscriptionCommand,
    UpdateSubscriptionHandler,
};
use crate::domain::billing::{BillingError, WebhookError};
use crate::domain::foundation::TenantKey;
use crate::ports::{PaymentProvider, SubscriptionStore, WebhookEventRepository};

use super::dto::{
    CreateSubscriptionRequest, ErrorResponse, InvoiceListResponse, InvoiceResponse,
    PaymentMethodRequest, PlanListResponse, PlanResponse, SubscriptionResponse,
    UpdateSubscriptionRequest, WebhookAck,
};

/// Header carrying the caller's tenant key.
pub const TENANT_KEY_HEADER: &str = "X-Tenant-Key";

/// Header carrying the provider's webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

// ════════════════════════════════════════════════════════════════════════════════
// Application State
// ════════════════════════════════════════════════════════════════════════════════

/// Shared application state containing all billing dependencies.
///
/// Cloned for each request; handlers are built on demand from it.
#[derive(Clone)]
pub struct BillingAppState {
    pub store: Arc<dyn SubscriptionStore>,
    pub webhook_events: Arc<dyn WebhookEventRepository>,
    pub payment_provider: Arc<dyn PaymentProvider>,
    pub webhook_secret: SecretString,
    pub policy: ReconcilePolicy,
    /// How long an unfinished webhook claim blocks redeliveries.
    pub pending_lease: Duration,
}

impl BillingAppState {
    pub fn new(
        store: Arc<dyn SubscriptionStore>,
        webhook_events: Arc<dyn WebhookEventRepository>,
        payment_provider: Arc<dyn PaymentProvider>,
        webhook_secret: SecretString,
    ) -> Self {
        Self {
            store,
            webhook_events,
            payment_provider,
            webhook_secret,
            policy: ReconcilePolicy::default(),
            pending_lease: Duration::from_secs(300),
        }
    }

    pub fn with_policy(mut self, policy: ReconcilePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_pending_lease(mut self, lease: Duration) -> Self {
        self.pending_lease = lease;
        self
    }

    pub fn create_subscription_handler(&self) -> CreateSubscriptionHandler {
        CreateSubscriptionHandler::new(self.store.clone(), self.payment_provider.clone())
            .with_policy(self.policy)
    }

    pub fn cancel_subscription_handler(&self) -> CancelSubscriptionHandler {
        CancelSubscriptionHandler::new(self.store.clone(), self.payment_provider.clone())
            .with_policy(self.policy)
    }

    pub fn update_subscription_handler(&self) -> UpdateSubscriptionHandler {
        UpdateSubscriptionHandler::new(self.store.clone(), self.payment_provider.clone())
            .with_policy(self.policy)
    }

    pub fn status_handler(&self) -> GetSubscriptionStatusHandler {
        GetSubscriptionStatusHandler::new(self.store.clone(), self.payment_provider.clone())
            .with_policy(self.policy)
    }

    pub fn payment_method_handler(&self) -> ManagePaymentMethodHandler {
        ManagePaymentMethodHandler::new(self.store.clone(), self.payment_provider.clone())
            .with_policy(self.policy)
    }

    pub fn invoices_handler(&self) -> ListInvoicesHandler {
        ListInvoicesHandler::new(self.store.clone(), self.payment_provider.clone())
            .with_policy(self.policy)
    }

    pub fn webhook_handler(&self) -> HandleProviderWebhookHandler {
        HandleProviderWebhookHandler::with_policy(
            self.payment_provider.clone(),
            self.store.clone(),
            self.webhook_events.clone(),
            self.webhook_secret.clone(),
            self.policy,
        )
        .with_pending_lease(self.pending_lease)
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Tenant Context (set by the gateway in front of this service)
// ════════════════════════════════════════════════════════════════════════════════

/// Tenant the request acts for, taken from the `X-Tenant-Key` header.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub tenant_key: TenantKey,
}

/// Rejection type for TenantContext extraction.
pub struct TenantRequired;

impl IntoResponse for TenantRequired {
    fn into_response(self) -> axum::response::Response {
        let error = ErrorResponse::new(
            "TENANT_REQUIRED",
            format!("A valid {} header is required", TENANT_KEY_HEADER),
        );
        (StatusCode::UNAUTHORIZED, Json(error)).into_response()
    }
}

#[axum::async_trait]
impl<S> axum::extract::FromRequestParts<S> for TenantContext
where
    S: Send + Sync,
{
    type Rejection = TenantRequired;

    async fn from_request_parts(
        parts: &mut axum::http::request::Parts,
        _state: &S,
    ) -> Result<Self, Self::Rejection> {
        let tenant_key = parts
            .headers
            .get(TENANT_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| TenantKey::new(s).ok())
            .ok_or(TenantRequired)?;

        Ok(TenantContext { tenant_key })
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Query Handlers (GET endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/subscriptions - Current subscription status
pub async fn get_subscription(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.status_handler();
    let query = GetSubscriptionStatusQuery {
        tenant_key: tenant.tenant_key,
    };

    let view = handler.handle(query).await?;

    Ok(Json(SubscriptionResponse::from(view)))
}

/// GET /api/subscriptions/plans - Plan catalog
pub async fn list_plans() -> impl IntoResponse {
    let plans = ListPlansHandler::new()
        .handle()
        .into_iter()
        .map(PlanResponse::from)
        .collect();

    Json(PlanListResponse { plans })
}

/// GET /api/invoices - Invoice history, newest first
pub async fn list_invoices(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.invoices_handler();
    let query = ListInvoicesQuery {
        tenant_key: tenant.tenant_key,
    };

    let invoices = handler.handle(query).await?;

    Ok(Json(InvoiceListResponse {
        invoices: invoices.into_iter().map(InvoiceResponse::from).collect(),
    }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Command Handlers (POST/PUT/DELETE endpoints)
// ════════════════════════════════════════════════════════════════════════════════

/// POST /api/subscriptions - Start a paid subscription
pub async fn create_subscription(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
    Json(request): Json<CreateSubscriptionRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.create_subscription_handler();
    let cmd = CreateSubscriptionCommand {
        tenant_key: tenant.tenant_key,
        plan: request.plan,
        billing_cycle: request.billing_cycle,
        payment_method_ref: request.payment_method_ref,
    };

    let result = handler.handle(cmd).await?;

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionResponse::from(&result.record)),
    ))
}

/// PUT /api/subscriptions - Change plan or billing cycle
pub async fn update_subscription(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
    Json(request): Json<UpdateSubscriptionRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.update_subscription_handler();
    let cmd = UpdateSubscriptionCommand {
        tenant_key: tenant.tenant_key,
        plan: request.plan,
        billing_cycle: request.billing_cycle,
    };

    let result = handler.handle(cmd).await?;

    Ok(Json(SubscriptionResponse::from(&result.record)))
}

/// POST /api/subscriptions/cancel - Cancel at the end of the current period
pub async fn cancel_subscription(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.cancel_subscription_handler();
    let cmd = CancelSubscriptionCommand {
        tenant_key: tenant.tenant_key,
    };

    let result = handler.handle(cmd).await?;

    let response =
        SubscriptionResponse::from(&result.record).with_cancel_effective_at(result.cancel_effective_at);
    Ok(Json(response))
}

/// PUT /api/payment-method - Replace the default payment method
pub async fn update_payment_method(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
    Json(request): Json<PaymentMethodRequest>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.payment_method_handler();
    let cmd = UpdatePaymentMethodCommand {
        tenant_key: tenant.tenant_key,
        payment_method_ref: request.payment_method_ref,
    };

    handler.update(cmd).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// DELETE /api/payment-method/:payment_method_ref - Detach a payment method
pub async fn remove_payment_method(
    State(state): State<BillingAppState>,
    tenant: TenantContext,
    Path(payment_method_ref): Path<String>,
) -> Result<impl IntoResponse, BillingApiError> {
    let handler = state.payment_method_handler();
    let cmd = RemovePaymentMethodCommand {
        tenant_key: tenant.tenant_key,
        payment_method_ref,
    };

    handler.remove(cmd).await?;

    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/webhooks/stripe - Provider webhook deliveries
///
/// Unknown tenants and unhandled event types are acknowledged with 200 so
/// the provider stops redelivering them.
pub async fn handle_stripe_webhook(
    State(state): State<BillingAppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> axum::response::Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let handler = state.webhook_handler();
    let cmd = HandleProviderWebhookCommand {
        payload: body.to_vec(),
        signature,
    };

    match handler.handle(cmd).await {
        Ok(_) => (StatusCode::OK, Json(WebhookAck::received())).into_response(),
        Err(err) => WebhookApiError(err).into_response(),
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts billing errors to HTTP responses.
#[derive(Debug)]
pub struct BillingApiError(pub BillingError);

impl From<BillingError> for BillingApiError {
    fn from(err: BillingError) -> Self {
        Self(err)
    }
}

impl BillingApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            BillingError::NotFound(_) | BillingError::UnknownTenant(_) => StatusCode::NOT_FOUND,
            BillingError::InvalidState { .. } | BillingError::ReconciliationConflict { .. } => {
                StatusCode::CONFLICT
            }
            BillingError::InvalidPlan(_)
            | BillingError::ValidationFailed { .. }
            | BillingError::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
            BillingError::ProviderRejected { .. } => StatusCode::PAYMENT_REQUIRED,
            BillingError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BillingError::Storage(_) | BillingError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for BillingApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = %self.0.code(), "Billing request failed");
        }

        let body = ErrorResponse::new(self.0.code().to_string(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

/// Webhook error wrapper; the status code drives provider redelivery.
struct WebhookApiError(WebhookError);

impl WebhookApiError {
    fn code(&self) -> &'static str {
        match &self.0 {
            WebhookError::MissingSignature => "MISSING_SIGNATURE",
            WebhookError::InvalidSignature(_) => "SIGNATURE_INVALID",
            WebhookError::ParseError(_) => "INVALID_PAYLOAD",
            WebhookError::UnknownTenant(_) => "UNKNOWN_TENANT",
            WebhookError::Ignored(_) => "IGNORED",
            WebhookError::InProgress(_) => "IN_PROGRESS",
            WebhookError::Conflict(_) => "RECONCILIATION_CONFLICT",
            WebhookError::Storage(_) => "DATABASE_ERROR",
            WebhookError::Handler(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for WebhookApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.0.status_code();
        if status.is_success() {
            return (status, Json(WebhookAck::received())).into_response();
        }

        let body = ErrorResponse::new(self.code(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::LifecycleState;

    fn status_of(err: BillingError) -> StatusCode {
        BillingApiError(err).into_response().status()
    }

    fn tenant() -> TenantKey {
        TenantKey::new("acme").unwrap()
    }

    // ══════════════════════════════════════════════════════════════
    // Error mapping
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(status_of(BillingError::NotFound(tenant())), StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_state_maps_to_409() {
        let err = BillingError::invalid_state(LifecycleState::Expired, "cancel");
        assert_eq!(status_of(err), StatusCode::CONFLICT);
    }

    #[test]
    fn exhausted_retries_map_to_409() {
        let err = BillingError::ReconciliationConflict {
            tenant_key: tenant(),
            attempts: 5,
        };
        assert_eq!(status_of(err), StatusCode::CONFLICT);
    }

    #[test]
    fn rejection_maps_to_402() {
        let err = BillingError::provider_rejected("card_declined");
        assert_eq!(status_of(err), StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn outage_maps_to_503() {
        let err = BillingError::ProviderUnavailable("timeout".to_string());
        assert_eq!(status_of(err), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn invalid_plan_maps_to_400() {
        let err = BillingError::InvalidPlan("free".to_string());
        assert_eq!(status_of(err), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn storage_maps_to_500() {
        let err = BillingError::Storage("down".to_string());
        assert_eq!(status_of(err), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ══════════════════════════════════════════════════════════════
    // Webhook responses
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn unknown_tenant_webhook_is_acknowledged() {
        let response =
            WebhookApiError(WebhookError::UnknownTenant("cus_x".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn bad_signature_webhook_is_400() {
        let response =
            WebhookApiError(WebhookError::InvalidSignature("mismatch".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn in_progress_webhook_asks_for_redelivery() {
        let response =
            WebhookApiError(WebhookError::InProgress("evt_1".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ══════════════════════════════════════════════════════════════
    // Tenant extraction
    // ══════════════════════════════════════════════════════════════

    #[tokio::test]
    async fn tenant_context_reads_header() {
        use axum::extract::FromRequestParts;

        let request = axum::http::Request::builder()
            .header(TENANT_KEY_HEADER, "acme")
            .body(())
            .unwrap();
        let (mut parts, _) = request.into_parts();

        let ctx = TenantContext::from_request_parts(&mut parts, &()).await.ok().unwrap();
        assert_eq!(ctx.tenant_key.as_str(), "acme");
    }

    #[tokio::test]
    async fn missing_tenant_header_is_rejected() {
        use axum::extract::FromRequestParts;

        let request = axum::http::Request::builder().body(()).unwrap();
        let (mut parts, _) = request.into_parts();

        let rejection = TenantContext::from_request_parts(&mut parts, &()).await.err().unwrap();
        assert_eq!(rejection.into_response().status(), StatusCode::UNAUTHORIZED);
    }
}
