//! Error types for cfddns.

use thiserror::Error;

/// Result type alias for cfddns.
pub type Result<T> = std::result::Result<T, DdnsError>;

/// DDNS error types.
#[derive(Error, Debug)]
pub enum DdnsError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Current address could not be determined.
    #[error("Address probe failed: {0}")]
    AddressProbe(String),

    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider rejected or failed a request.
    #[error("Cloudflare {operation} failed: {message}")]
    Provider { operation: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl DdnsError {
    pub(crate) fn provider(operation: impl Into<String>, message: impl Into<String>) -> Self {
        DdnsError::Provider {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for DdnsError {
    fn from(e: reqwest::Error) -> Self {
        DdnsError::Network(e.to_string())
    }
}

impl From<toml::de::Error> for DdnsError {
    fn from(e: toml::de::Error) -> Self {
        DdnsError::Config(e.to_string())
    }
}

impl From<toml::ser::Error> for DdnsError {
    fn from(e: toml::ser::Error) -> Self {
        DdnsError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for DdnsError {
    fn from(e: serde_json::Error) -> Self {
        DdnsError::Serialization(e.to_string())
    }
}
