use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during a cover lookup
///
/// Cloneable so one failed lookup can be handed to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum ArtworkError {
    /// HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    Client(Arc<reqwest::Error>),

    /// HTTP request failed (transport, timeout, body read)
    #[error("HTTP request failed: {0}")]
    Request(Arc<reqwest::Error>),

    /// Service answered with an unexpected status
    #[error("{service} returned status {status}")]
    Status { service: &'static str, status: u16 },

    /// Service answered with a body we could not decode
    #[error("Failed to parse {service} response: {message}")]
    Parse {
        service: &'static str,
        message: String,
    },

    /// Cover bytes could not be written
    #[error("Failed to write cover file {path}: {source}")]
    Write {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },

    /// Lookup task panicked or was aborted
    #[error("Cover lookup task failed: {0}")]
    Task(String),
}

impl From<reqwest::Error> for ArtworkError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(Arc::new(err))
    }
}

/// Result type for artwork operations
pub type Result<T> = std::result::Result<T, ArtworkError>;
