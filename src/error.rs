//! Error types for provider authentication

use std::io;

use thiserror::Error;

/// Result type alias for provider authentication
pub type Result<T> = std::result::Result<T, Error>;

/// Provider authentication errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error (malformed or contradictory settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Certificate could not be parsed or encoded
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Remote fetch failed (after retries, where applicable)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// CA certificates were configured but none could be loaded
    #[error("Certificate loader initialization failed: {0}")]
    LoaderInitialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether a failed fetch attempt is worth repeating.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Fetch(_) | Self::Http(_) | Self::Io(_))
    }
}
