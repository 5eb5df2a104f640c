//! Error types for the Windowguard service.

use thiserror::Error;

/// Main error type for Windowguard operations.
#[derive(Error, Debug)]
pub enum WindowGuardError {
    /// Limiter constructed with an unusable window or limit
    #[error("Invalid rate limiter configuration: {0}")]
    InvalidConfiguration(String),

    /// Empty rate limit key
    #[error("Invalid key: rate limit keys must be non-empty")]
    InvalidKey,

    /// Timestamp that cannot be ordered against the window (NaN or infinite)
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(f64),

    /// The rate limit backend failed or timed out
    #[error("Rate limit backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Service configuration loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Windowguard operations.
pub type Result<T> = std::result::Result<T, WindowGuardError>;
