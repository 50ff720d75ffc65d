//! Strongly-typed identifier value objects.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::ValidationError;

/// Maximum accepted length of a tenant key.
const MAX_TENANT_KEY_LEN: usize = 128;

/// Identity of the billing-owning tenant.
///
/// Opaque to this crate: the tenant-facing layer decides what the key is
/// (an organisation slug, a UUID, ...). It is immutable for the lifetime of
/// a subscription record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantKey(String);

impl TenantKey {
    /// Creates a new TenantKey, returning error if empty or malformed.
    pub fn new(key: impl Into<String>) -> Result<Self, ValidationError> {
        let key = key.into();
        let trimmed = key.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::empty_field("tenant_key"));
        }
        if trimmed.len() > MAX_TENANT_KEY_LEN {
            return Err(ValidationError::invalid_format(
                "tenant_key",
                format!("must be at most {} characters", MAX_TENANT_KEY_LEN),
            ));
        }
        if trimmed.chars().any(char::is_control) {
            return Err(ValidationError::invalid_format(
                "tenant_key",
                "must not contain control characters",
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TenantKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for TenantKey {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TenantKey> for String {
    fn from(key: TenantKey) -> Self {
        key.0
    }
}
