//! Errors shared by the record store and the dedup store.

use thiserror::Error;

use crate::domain::billing::BillingError;

/// Failure of a store operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The stored version no longer matches the expected version.
    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// A first-time insert raced with another insert for the same key.
    #[error("Record already exists for {0}")]
    AlreadyExists(String),

    /// The referenced record does not exist.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Backend unreachable or failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    /// Returns true if re-reading and retrying the write may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::VersionConflict { .. } | StoreError::AlreadyExists(_)
        )
    }
}

impl From<StoreError> for BillingError {
    fn from(err: StoreError) -> Self {
        BillingError::Storage(err.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row".to_string()),
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                StoreError::Corrupt(err.to_string())
            }
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}
