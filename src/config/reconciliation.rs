//! Reconciliation engine tuning

use serde::Deserialize;
use std::time::Duration;

use crate::application::ReconcilePolicy;

use super::error::ValidationError;

/// Retry, timeout and dedup-window settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Versioned-write attempts before a command gives up
    #[serde(default = "default_max_write_attempts")]
    pub max_write_attempts: u32,

    /// Linear backoff step between write attempts
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Per-call deadline for provider requests
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// How long applied webhook event refs are remembered
    #[serde(default = "default_dedup_window_hours")]
    pub dedup_window_hours: u32,

    /// How long an unfinished claim blocks redeliveries
    #[serde(default = "default_pending_lease_secs")]
    pub pending_lease_secs: u64,

    /// Accepted age of a webhook signature timestamp
    #[serde(default = "default_signature_tolerance_secs")]
    pub signature_tolerance_secs: i64,
}

impl ReconciliationConfig {
    pub fn policy(&self) -> ReconcilePolicy {
        ReconcilePolicy {
            max_write_attempts: self.max_write_attempts,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
            provider_timeout: Duration::from_secs(self.provider_timeout_secs),
        }
    }

    pub fn pending_lease(&self) -> Duration {
        Duration::from_secs(self.pending_lease_secs)
    }

    pub fn dedup_window_secs(&self) -> i64 {
        i64::from(self.dedup_window_hours) * 60 * 60
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_write_attempts == 0 || self.max_write_attempts > 50 {
            return Err(ValidationError::OutOfRange("max_write_attempts"));
        }
        if self.provider_timeout_secs == 0 || self.provider_timeout_secs > 120 {
            return Err(ValidationError::OutOfRange("provider_timeout_secs"));
        }
        if self.dedup_window_hours == 0 {
            return Err(ValidationError::OutOfRange("dedup_window_hours"));
        }
        if self.pending_lease_secs == 0 {
            return Err(ValidationError::OutOfRange("pending_lease_secs"));
        }
        if self.signature_tolerance_secs <= 0 {
            return Err(ValidationError::OutOfRange("signature_tolerance_secs"));
        }
        Ok(())
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            max_write_attempts: default_max_write_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            provider_timeout_secs: default_provider_timeout_secs(),
            dedup_window_hours: default_dedup_window_hours(),
            pending_lease_secs: default_pending_lease_secs(),
            signature_tolerance_secs: default_signature_tolerance_secs(),
        }
    }
}

fn default_max_write_attempts() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    25
}

fn default_provider_timeout_secs() -> u64 {
    10
}

fn default_dedup_window_hours() -> u32 {
    24
}

fn default_pending_lease_secs() -> u64 {
    300
}

fn default_signature_tolerance_secs() -> i64 {
    300
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_engine_defaults() {
        let config = ReconciliationConfig::default();
        let policy = config.policy();
        let engine = ReconcilePolicy::default();

        assert_eq!(policy.max_write_attempts, engine.max_write_attempts);
        assert_eq!(policy.retry_backoff, engine.retry_backoff);
        assert_eq!(policy.provider_timeout, engine.provider_timeout);
        assert_eq!(config.dedup_window_secs(), 86_400);
        assert_eq!(config.pending_lease(), Duration::from_secs(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_write_attempts_is_rejected() {
        let config = ReconciliationConfig {
            max_write_attempts: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::OutOfRange("max_write_attempts"))
        );
    }

    #[test]
    fn zero_dedup_window_is_rejected() {
        let config = ReconciliationConfig {
            dedup_window_hours: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
