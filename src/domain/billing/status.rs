//! Local subscription status and the lifecycle state machine.
//!
//! The record stores a simplified `SubscriptionStatus`. The lifecycle state
//! is derived from it together with the provider subscription ref and the
//! next billing time:
//!
//! ```text
//! NONE ──create──▶ ACTIVE ──cancel──▶ CANCEL_PENDING ──period end──▶ EXPIRED
//!                    │  ▲                                             │
//!                    │  └──────────────fresh create / payment─────────┘
//!                    └──failed renewal──▶ EXPIRED
//! any ──subscription deleted──▶ NONE
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::foundation::StateMachine;

/// Simplified subscription status kept on the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    /// Cancellation requested; access continues until `next_billing_time`.
    Canceled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    /// Parses the stored lowercase form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(SubscriptionStatus::Active),
            "canceled" => Some(SubscriptionStatus::Canceled),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a tenant's paid subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No paid subscription (free plan).
    None,
    Active,
    /// `status = canceled` with `next_billing_time` still set.
    CancelPending,
    Expired,
}

impl LifecycleState {
    /// Derives the lifecycle state from the stored fields.
    pub fn derive(
        status: SubscriptionStatus,
        has_subscription_ref: bool,
        has_next_billing_time: bool,
    ) -> Self {
        if !has_subscription_ref {
            return LifecycleState::None;
        }
        match status {
            SubscriptionStatus::Active => LifecycleState::Active,
            SubscriptionStatus::Canceled if has_next_billing_time => LifecycleState::CancelPending,
            SubscriptionStatus::Canceled | SubscriptionStatus::Expired => LifecycleState::Expired,
        }
    }

    /// Returns true if paid features are available in this state.
    pub fn grants_paid_access(&self) -> bool {
        matches!(self, LifecycleState::Active | LifecycleState::CancelPending)
    }

    /// Returns true if a fresh subscription may be created from this state.
    pub fn accepts_new_subscription(&self) -> bool {
        matches!(self, LifecycleState::None | LifecycleState::Expired)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::None => "none",
            LifecycleState::Active => "active",
            LifecycleState::CancelPending => "cancel_pending",
            LifecycleState::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

impl StateMachine for LifecycleState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use LifecycleState::*;
        matches!(
            (self, target),
            // Subscription deleted at the provider
            (_, None)
            // From NONE
                | (None, Active)
            // From ACTIVE
                | (Active, Active) // Plan change or renewal
                | (Active, CancelPending)
                | (Active, Expired) // Failed renewal
            // From CANCEL_PENDING
                | (CancelPending, CancelPending)
                | (CancelPending, Active) // Payment succeeded or cancellation withdrawn
                | (CancelPending, Expired)
            // From EXPIRED
                | (Expired, Active) // Fresh create or recovered payment
                | (Expired, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use LifecycleState::*;
        match self {
            None => vec![None, Active],
            Active => vec![Active, CancelPending, Expired, None],
            CancelPending => vec![CancelPending, Active, Expired, None],
            Expired => vec![Active, Expired, None],
        }
    }
}
