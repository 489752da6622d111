//! Error types for store operations.

use thiserror::Error;

/// Errors that can occur while talking to a key-value store.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store has not been started or the connection was lost.
    #[error("store is unavailable: {0}")]
    Unavailable(String),

    /// A value could not be encoded to or decoded from JSON.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The key holds a value of a different kind (e.g. a set used as a list).
    #[error("wrong kind of value stored at '{key}'")]
    WrongType {
        /// The offending key.
        key: String,
    },

    /// The remote store reported an error.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_connection_dropped() || err.is_connection_refusal() || err.is_timeout() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Backend(err.to_string())
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
