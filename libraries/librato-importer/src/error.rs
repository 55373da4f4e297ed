//! Error types for the importer

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Watch root {0} does not exist or is not a directory")]
    WatchRootMissing(PathBuf),

    #[error("Watcher has been stopped")]
    WatcherStopped,

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("No metadata found in file {0}")]
    NoMetadata(PathBuf),

    #[error("No sibling music files for {0}")]
    NoSiblingMusic(PathBuf),

    #[error("File not ready: {path}: {reason}")]
    NotReady { path: PathBuf, reason: String },

    #[error("Failed to move {from} to {to}: {source}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid file path: {0}")]
    InvalidPath(String),

    #[error("Background task failed: {0}")]
    Task(String),
}
