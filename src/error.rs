//! Error types for vid-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error variants (extractor, relay, config, etc.)
//! - Conversions from the underlying I/O and HTTP errors
//! - Human-readable messages suitable for surfacing to API clients

use thiserror::Error;

/// Result type alias for vid-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vid-dl
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "relay.endpoint")
        key: Option<String>,
    },

    /// Invalid or missing source URL
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// The extraction tool failed or is unavailable
    #[error("extractor error: {0}")]
    Extractor(String),

    /// The relay conversion service failed or returned an unusable response
    #[error("relay error: {0}")]
    Relay(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Task or artifact not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Shutdown in progress - not accepting new tasks
    #[error("shutdown in progress: not accepting new tasks")]
    ShuttingDown,

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// API server error
    #[error("API server error: {0}")]
    ApiServerError(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error without an associated key
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: None,
        }
    }

    /// Build a configuration error for a specific configuration key
    pub fn config_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_displays_message() {
        let err = Error::config_key("endpoint must be set", "relay.endpoint");
        assert_eq!(err.to_string(), "configuration error: endpoint must be set");
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn extractor_error_is_verbatim() {
        let err = Error::Extractor("ERROR: Video unavailable".to_string());
        assert_eq!(err.to_string(), "extractor error: ERROR: Video unavailable");
    }
}
