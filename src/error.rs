//! Error types for the Turnstile service.

use thiserror::Error;

/// Errors surfaced by a counter store.
///
/// The admission guard absorbs both kinds and lets the request through.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store could not be reached, refused our credentials, dropped the
    /// connection, or timed out.
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something other than the expected reply.
    #[error("counter store protocol error: {0}")]
    Protocol(String),
}

/// Main error type for Turnstile operations.
#[derive(Error, Debug)]
pub enum TurnstileError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for TurnstileError {
    fn from(err: config::ConfigError) -> Self {
        TurnstileError::Config(err.to_string())
    }
}

/// Result type alias for Turnstile operations.
pub type Result<T> = std::result::Result<T, TurnstileError>;
