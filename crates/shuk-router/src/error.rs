//! Routing configuration errors

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Missing required environment variable.
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },

    /// Routing document could not be parsed.
    #[error("Failed to parse routing config: {0}")]
    Parse(String),

    /// Two routes share a name.
    #[error("Duplicate route name: {0}")]
    DuplicateRoute(String),

    /// A dispatch route shares keys with another route of the same bucket.
    #[error("Routes '{first}' and '{second}' overlap in bucket '{scope}'")]
    OverlappingRules {
        scope: String,
        first: String,
        second: String,
    },

    /// A route names a topic or dispatcher the pipeline does not have.
    #[error("Route '{route}' targets unknown {kind} '{target}'")]
    UnknownTarget {
        route: String,
        kind: &'static str,
        target: String,
    },
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err.to_string())
    }
}

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;
