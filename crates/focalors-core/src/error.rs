//! Error types shared by the bridge core.
//!
//! Backend failures ([`BackendError`]) and handler failures ([`ClientError`])
//! live here because both sides of the dispatcher speak them. Access control
//! errors are defined in `focalors-framework` and convert into
//! [`ClientError`].

use focalors_store::StoreError;
use thiserror::Error;

// =============================================================================
// Protocol Errors
// =============================================================================

/// Errors raised while building protocol values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A group target was built without a group id.
    #[error("invalid target: {reason}")]
    InvalidTarget {
        /// Why the target was rejected.
        reason: String,
    },
}

// =============================================================================
// Backend Errors
// =============================================================================

/// Errors that can occur while talking to a chat backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend has not been started yet, so its identity is unknown.
    #[error("backend is not started")]
    NotStarted,

    /// The connection to the chat platform is down.
    #[error("backend is not connected")]
    NotConnected,

    /// An API call did not complete in time.
    #[error("backend call timed out")]
    Timeout,

    /// The platform answered with a failure status.
    #[error("backend API error ({retcode}): {message}")]
    Api {
        /// Platform return code.
        retcode: i64,
        /// Platform message.
        message: String,
    },

    /// A request or response could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The underlying transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend does not implement the requested operation.
    #[error("operation '{0}' is not supported by this backend")]
    Unsupported(&'static str),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Client Errors
// =============================================================================

/// Errors that can occur inside a feature handler.
///
/// Upstream failures are normally turned into a chat reply by the handler;
/// the variants here are what escapes to the dispatcher.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A required configuration value is absent. Fatal at `start`.
    #[error("missing configuration: {field}")]
    MissingConfig {
        /// Dotted path of the missing field.
        field: &'static str,
    },

    /// The shared store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A backend call failed.
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Access control could not decide.
    #[error("access check failed: {0}")]
    Access(String),

    /// An external provider failed.
    #[error("upstream error: {0}")]
    Upstream(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for protocol value construction.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for backend calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type for handler operations.
pub type ClientResult<T> = Result<T, ClientError>;
