//! Error types shared by the advisor crates.

use thiserror::Error;

/// Result alias used across the advisor workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Advisor errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input failed validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Malformed ingestion input, rejected at the store boundary
    #[error("Invalid sample: {0}")]
    InvalidSample(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML configuration parse error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP transport error talking to an upstream collaborator
    #[error("HTTP error: {0}")]
    Http(String),

    /// Upstream collaborator answered with an error
    #[error("Upstream {source_name} returned {status}: {message}")]
    Upstream {
        source_name: String,
        status: u16,
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid-sample error
    pub fn invalid_sample(msg: impl Into<String>) -> Self {
        Self::InvalidSample(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an upstream error
    pub fn upstream(source_name: &str, status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            source_name: source_name.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Whether the caller sent bad input (as opposed to an internal failure)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidSample(_))
    }
}
