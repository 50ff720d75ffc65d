//! State machine trait for status enums.
//!
//! Provides a consistent interface for validating and performing state transitions
//! across lifecycle enums.

use super::ValidationError;

/// Trait for status enums that represent state machines.
///
/// Implementors define valid state transitions and get validated
/// transition methods for free.
///
/// # Example
///
/// ```ignore
/// impl StateMachine for LifecycleState {
///     fn can_transition_to(&self, target: &Self) -> bool {
///         matches!(
///             (self, target),
///             (None, Active) |
///             (Active, CancelPending) |
///             // ... etc
///         )
///     }
///
///     fn valid_transitions(&self) -> Vec<Self> {
///         match self {
///             None => vec![Active],
///             Active => vec![Active, CancelPending, Expired, None],
///             // ... etc
///         }
///     }
/// }
///
/// // Usage:
/// let next = current.transition_to(LifecycleState::CancelPending)?;
/// ```
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Returns true if transition from self to target is valid.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all valid target states from current state.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Performs transition with validation, returning error if invalid.
    ///
    /// This is the preferred way to change state, as it ensures
    /// the transition is valid according to the state machine rules.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Checks if current state is terminal (no valid outgoing transitions).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Door {
        Open,
        Closed,
        Locked,
        Removed,
    }

    impl StateMachine for Door {
        fn can_transition_to(&self, target: &Self) -> bool {
            self.valid_transitions().contains(target)
        }

        fn valid_transitions(&self) -> Vec<Self> {
            match self {
                Door::Open => vec![Door::Closed, Door::Removed],
                Door::Closed => vec![Door::Open, Door::Locked],
                Door::Locked => vec![Door::Closed],
                Door::Removed => vec![],
            }
        }
    }

    #[test]
    fn transition_to_returns_target_when_allowed() {
        assert_eq!(Door::Closed.transition_to(Door::Locked), Ok(Door::Locked));
    }

    #[test]
    fn transition_to_reports_both_states_when_rejected() {
        let err = Door::Open.transition_to(Door::Locked).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Open"));
        assert!(message.contains("Locked"));
    }

    #[test]
    fn is_terminal_only_for_states_without_exits() {
        assert!(Door::Removed.is_terminal());
        assert!(!Door::Locked.is_terminal());
    }
}
