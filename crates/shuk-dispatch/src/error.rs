//! Error types for dispatch operations.

use std::time::Duration;
use thiserror::Error;

/// Dispatch error types.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Target could not accept the invocation; worth retrying
    #[error("Target {target} unavailable: {message}")]
    Unavailable {
        /// Target name
        target: String,
        /// Error message
        message: String,
    },

    /// Target refused the invocation; retrying will not help
    #[error("Target {target} rejected dispatch ({status}): {message}")]
    Rejected {
        /// Target name
        target: String,
        /// HTTP status or equivalent code
        status: u16,
        /// Error message
        message: String,
    },

    /// Source event is older than the allowed age
    #[error("Stale dispatch: event is {age:?} old, limit is {max_age:?}")]
    Stale {
        /// Age of the source event at dispatch time
        age: Duration,
        /// Configured maximum age
        max_age: Duration,
    },

    /// Invalid dispatch configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl DispatchError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Unavailable { .. })
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
