//! Runtime error types.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur while building or running a Focalors process.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The key-value store could not be reached.
    #[error("Store error: {0}")]
    Store(#[from] focalors_store::StoreError),

    #[error("Backend error: {0}")]
    Backend(#[from] focalors_core::BackendError),

    /// A handler could not be constructed.
    #[error("Client '{name}' could not be created: {source}")]
    Client {
        name: String,
        #[source]
        source: focalors_core::ClientError,
    },

    /// The backend did not come up in time.
    #[error("Backend did not become ready within {0:?}")]
    StartupTimeout(Duration),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
