/// Daemon error types
use crate::supervisor::DaemonState;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Daemon already running with PID {pid} (marker {})", path.display())]
    AlreadyRunning { pid: i32, path: PathBuf },

    #[error("Failed to write PID file {}: {source}", path.display())]
    PidFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot {action} while {state:?}")]
    InvalidTransition {
        state: DaemonState,
        action: &'static str,
    },

    #[error("Failed to install signal handlers: {0}")]
    Signal(std::io::Error),

    #[error("Import error: {0}")]
    Import(#[from] librato_importer::ImportError),

    #[error("State error: {0}")]
    State(#[from] librato_state::StateError),

    #[error("Artwork error: {0}")]
    Artwork(#[from] librato_artwork::ArtworkError),
}

impl From<config::ConfigError> for DaemonError {
    fn from(err: config::ConfigError) -> Self {
        DaemonError::Config(err.to_string())
    }
}
