//! Billing error taxonomy.
//!
//! # HTTP Status Mapping
//!
//! | Error | HTTP Status |
//! |-------|-------------|
//! | NotFound | 404 |
//! | InvalidState | 409 |
//! | ReconciliationConflict | 409 |
//! | InvalidPlan | 400 |
//! | ValidationFailed | 400 |
//! | ProviderRejected | 402 |
//! | SignatureInvalid | 400 |
//! | UnknownTenant | 200 (webhook acknowledged) |
//! | ProviderUnavailable | 503 |
//! | Storage | 500 |
//! | Internal | 500 |

use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, TenantKey, ValidationError};

use super::LifecycleState;

/// Errors surfaced by the reconciliation engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    /// Provider could not be reached or timed out; the caller may retry.
    #[error("Payment provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider refused the request; retrying will not help.
    #[error("Payment provider rejected the request: {reason}")]
    ProviderRejected { reason: String },

    #[error("Webhook signature invalid: {0}")]
    SignatureInvalid(String),

    /// Concurrent writers kept winning the versioned write.
    #[error("Could not reconcile subscription for {tenant_key} after {attempts} attempts")]
    ReconciliationConflict { tenant_key: TenantKey, attempts: u32 },

    /// No record matches the provider refs of an inbound event.
    #[error("No tenant matches provider reference {0}")]
    UnknownTenant(String),

    /// The tenant has no subscription history.
    #[error("No subscription found for tenant {0}")]
    NotFound(TenantKey),

    #[error("Cannot {attempted} while subscription is {current}")]
    InvalidState {
        current: LifecycleState,
        attempted: String,
    },

    #[error("Invalid plan: {0}")]
    InvalidPlan(String),

    #[error("Validation failed for '{field}': {message}")]
    ValidationFailed { field: String, message: String },

    /// The record store is unreachable.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A reconciliation task died before reporting its outcome.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    pub fn provider_rejected(reason: impl Into<String>) -> Self {
        BillingError::ProviderRejected {
            reason: reason.into(),
        }
    }

    pub fn invalid_state(current: LifecycleState, attempted: impl Into<String>) -> Self {
        BillingError::InvalidState {
            current,
            attempted: attempted.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        BillingError::ValidationFailed {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable reason code for callers.
    pub fn code(&self) -> ErrorCode {
        match self {
            BillingError::ProviderUnavailable(_) => ErrorCode::ProviderUnavailable,
            BillingError::ProviderRejected { .. } => ErrorCode::ProviderRejected,
            BillingError::SignatureInvalid(_) => ErrorCode::SignatureInvalid,
            BillingError::ReconciliationConflict { .. } => ErrorCode::ReconciliationConflict,
            BillingError::UnknownTenant(_) => ErrorCode::UnknownTenant,
            BillingError::NotFound(_) => ErrorCode::TenantNotFound,
            BillingError::InvalidState { .. } => ErrorCode::InvalidStateTransition,
            BillingError::InvalidPlan(_) => ErrorCode::InvalidPlan,
            BillingError::ValidationFailed { .. } => ErrorCode::ValidationFailed,
            BillingError::Storage(_) => ErrorCode::DatabaseError,
            BillingError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Returns true if the whole command may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::ProviderUnavailable(_)
                | BillingError::ReconciliationConflict { .. }
                | BillingError::Storage(_)
        )
    }
}

impl From<ValidationError> for BillingError {
    fn from(err: ValidationError) -> Self {
        BillingError::ValidationFailed {
            field: err.field().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<BillingError> for DomainError {
    fn from(err: BillingError) -> Self {
        DomainError::new(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> TenantKey {
        TenantKey::new("acme").unwrap()
    }

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            BillingError::NotFound(tenant()).code().to_string(),
            "TENANT_NOT_FOUND"
        );
        assert_eq!(
            BillingError::provider_rejected("no such price").code().to_string(),
            "PROVIDER_REJECTED"
        );
        assert_eq!(
            BillingError::ReconciliationConflict {
                tenant_key: tenant(),
                attempts: 5
            }
            .code()
            .to_string(),
            "RECONCILIATION_CONFLICT"
        );
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(BillingError::ProviderUnavailable("timeout".into()).is_retryable());
        assert!(BillingError::Storage("down".into()).is_retryable());
        assert!(!BillingError::provider_rejected("card declined").is_retryable());
        assert!(!BillingError::SignatureInvalid("bad".into()).is_retryable());
    }

    #[test]
    fn invalid_state_message_names_state() {
        let err = BillingError::invalid_state(LifecycleState::Expired, "cancel subscription");
        assert_eq!(err.to_string(), "Cannot cancel subscription while subscription is expired");
    }

    #[test]
    fn validation_error_converts_with_field() {
        let err: BillingError = ValidationError::empty_field("tenant_key").into();
        assert!(matches!(err, BillingError::ValidationFailed { ref field, .. } if field == "tenant_key"));
    }

    #[test]
    fn converts_to_domain_error() {
        let err: DomainError = BillingError::InvalidPlan("free".into()).into();
        assert_eq!(err.code, ErrorCode::InvalidPlan);
    }
}
