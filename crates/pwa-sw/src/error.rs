//! Error types for the offline worker.

use pwa_net::NetError;
use thiserror::Error;

/// Result type alias for worker operations.
pub type Result<T> = std::result::Result<T, ServiceWorkerError>;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ServiceWorkerError {
    /// Create a cache error.
    pub fn cache(msg: impl Into<String>) -> Self {
        Self::Cache(msg.into())
    }

    /// Create a manifest error.
    pub fn manifest(msg: impl Into<String>) -> Self {
        Self::Manifest(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the failure came from the network and may succeed later.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
