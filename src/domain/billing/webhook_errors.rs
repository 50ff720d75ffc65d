//! Webhook error types for provider webhook handling.
//!
//! Defines all error conditions that can occur during webhook processing,
//! with HTTP status code mapping and retryability semantics.

use axum::http::StatusCode;
use thiserror::Error;

use super::BillingError;
use crate::ports::StoreError;

/// Errors that occur during webhook processing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WebhookError {
    /// No signature header on the request.
    #[error("Missing signature header")]
    MissingSignature,

    /// Signature verification failed.
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    /// Payload or envelope could not be decoded.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// No record matches the event's provider refs.
    #[error("Unknown tenant for {0}")]
    UnknownTenant(String),

    /// Event was intentionally ignored (not an error condition).
    #[error("Event ignored: {0}")]
    Ignored(String),

    /// Another delivery of the same event holds a live claim.
    #[error("Event {0} is being processed by another delivery")]
    InProgress(String),

    /// Concurrent writers exhausted the write attempts.
    #[error("Reconciliation conflict: {0}")]
    Conflict(String),

    /// Dedup or record store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Handler failed for another reason.
    #[error("Handler failed: {0}")]
    Handler(String),
}

impl WebhookError {
    /// Returns true if the provider should redeliver this event.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WebhookError::InProgress(_)
                | WebhookError::Conflict(_)
                | WebhookError::Storage(_)
                | WebhookError::Handler(_)
        )
    }

    /// Maps the error to an HTTP status code.
    ///
    /// Status codes determine the provider's redelivery behavior:
    /// - 2xx: Event acknowledged, no retry
    /// - 4xx: Unauthenticated or unparsable, no retry
    /// - 5xx: Server error, will retry
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::MissingSignature
            | WebhookError::InvalidSignature(_)
            | WebhookError::ParseError(_) => StatusCode::BAD_REQUEST,

            // Acknowledged so the provider stops redelivering
            WebhookError::UnknownTenant(_) | WebhookError::Ignored(_) => StatusCode::OK,

            WebhookError::InProgress(_)
            | WebhookError::Conflict(_)
            | WebhookError::Storage(_)
            | WebhookError::Handler(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for WebhookError {
    fn from(err: StoreError) -> Self {
        WebhookError::Storage(err.to_string())
    }
}

impl From<BillingError> for WebhookError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::UnknownTenant(reference) => WebhookError::UnknownTenant(reference),
            BillingError::SignatureInvalid(msg) => WebhookError::InvalidSignature(msg),
            BillingError::ReconciliationConflict { .. } => WebhookError::Conflict(err.to_string()),
            BillingError::Storage(msg) => WebhookError::Storage(msg),
            other => WebhookError::Handler(other.to_string()),
        }
    }
}
