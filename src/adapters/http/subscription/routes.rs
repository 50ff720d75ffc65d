//! Axum router configuration for billing endpoints.

use axum::{
    routing::{delete, get, post, put},
    Router,
};

use super::handlers::{
    cancel_subscription, create_subscription, get_subscription, handle_stripe_webhook,
    list_invoices, list_plans, remove_payment_method, update_payment_method, update_subscription,
    BillingAppState,
};

/// Create the subscription API router.
///
/// # Routes (tenant identified by `X-Tenant-Key`)
/// - `GET /` - Current subscription status
/// - `POST /` - Start a paid subscription
/// - `PUT /` - Change plan or billing cycle
/// - `POST /cancel` - Cancel at the end of the current period
/// - `GET /plans` - Plan catalog
pub fn subscription_routes() -> Router<BillingAppState> {
    Router::new()
        .route(
            "/",
            get(get_subscription)
                .post(create_subscription)
                .put(update_subscription),
        )
        .route("/cancel", post(cancel_subscription))
        .route("/plans", get(list_plans))
}

/// Create the payment method router.
///
/// # Routes
/// - `PUT /` - Replace the default payment method
/// - `DELETE /:payment_method_ref` - Detach a payment method
pub fn payment_method_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/", put(update_payment_method))
        .route("/:payment_method_ref", delete(remove_payment_method))
}

/// Create the provider webhook router.
///
/// Separate from the tenant routes because deliveries carry no tenant
/// header; they are authenticated by signature.
///
/// # Routes
/// - `POST /stripe` - Provider webhook deliveries
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/stripe", post(handle_stripe_webhook))
}

/// Create the complete billing router, suitable for mounting at `/api`.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .nest("/subscriptions", subscription_routes())
        .nest("/payment-method", payment_method_routes())
        .route("/invoices", get(list_invoices))
        .nest("/webhooks", webhook_routes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::adapters::memory::{InMemorySubscriptionStore, InMemoryWebhookEventRepository};
    use crate::adapters::stripe::MockPaymentProvider;
    use crate::adapters::http::subscription::handlers::TENANT_KEY_HEADER;

    fn test_state() -> BillingAppState {
        BillingAppState::new(
            Arc::new(InMemorySubscriptionStore::new()),
            Arc::new(InMemoryWebhookEventRepository::new()),
            Arc::new(MockPaymentProvider::new()),
            SecretString::new("whsec_test".to_string()),
        )
    }

    fn app() -> Router {
        Router::new().nest("/api", billing_router()).with_state(test_state())
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn routers_accept_state() {
        let _: Router<()> = subscription_routes().with_state(test_state());
        let _: Router<()> = payment_method_routes().with_state(test_state());
        let _: Router<()> = webhook_routes().with_state(test_state());
        let _: Router<()> = billing_router().with_state(test_state());
    }

    #[tokio::test]
    async fn plans_are_public() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/subscriptions/plans")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["plans"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn status_requires_tenant_header() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/subscriptions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn new_tenant_sees_free_plan() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/api/subscriptions")
                    .header(TENANT_KEY_HEADER, "acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["plan"], "free");
        assert_eq!(json["lifecycle"], "none");
    }

    #[tokio::test]
    async fn create_then_cancel_round_trip() {
        let app = app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/subscriptions")
                    .header(TENANT_KEY_HEADER, "acme")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"plan": "pro", "billing_cycle": "monthly", "payment_method_ref": "pm_card"})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = body_json(response).await;
        assert_eq!(created["plan"], "pro");
        assert_eq!(created["lifecycle"], "active");

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/subscriptions/cancel")
                    .header(TENANT_KEY_HEADER, "acme")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let canceled = body_json(response).await;
        assert_eq!(canceled["lifecycle"], "cancel_pending");
        assert!(canceled["cancel_effective_at"].is_string());
    }

    #[tokio::test]
    async fn free_plan_create_is_bad_request() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/subscriptions")
                    .header(TENANT_KEY_HEADER, "acme")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        json!({"plan": "free", "payment_method_ref": "pm_card"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["code"], "INVALID_PLAN");
    }

    #[tokio::test]
    async fn cancel_without_subscription_is_not_found() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/subscriptions/cancel")
                    .header(TENANT_KEY_HEADER, "ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn webhook_without_signature_is_rejected() {
        let response = app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/webhooks/stripe")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = body_json(response).await;
        assert_eq!(json["code"], "MISSING_SIGNATURE");
    }
}
