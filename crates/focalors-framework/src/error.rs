//! Error types for the framework layer.

use focalors_core::{BackendError, ClientError};
use focalors_store::StoreError;
use thiserror::Error;

/// Errors that can occur while deciding or managing access.
///
/// These are never mapped to "allowed" or "denied"; callers must propagate
/// them.
#[derive(Debug, Clone, Error)]
pub enum AccessError {
    /// The allow-list store failed.
    #[error("access store error: {0}")]
    Store(#[from] StoreError),

    /// Listing contacts from the backend failed.
    #[error("access backend error: {0}")]
    Backend(#[from] BackendError),
}

impl From<AccessError> for ClientError {
    fn from(err: AccessError) -> Self {
        ClientError::Access(err.to_string())
    }
}

/// Result type for access control operations.
pub type AccessResult<T> = Result<T, AccessError>;
