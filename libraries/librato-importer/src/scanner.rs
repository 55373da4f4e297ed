//! File scanning for audio files

use crate::{ImportError, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Supported audio file extensions
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "aac", "m4a", "opus", "aif", "aiff", "wv", "ape",
];

/// Scanner for files in directory trees
#[derive(Debug, Default)]
pub struct FileScanner {
    /// Whether to follow symbolic links
    follow_links: bool,

    /// Maximum depth to traverse
    max_depth: Option<usize>,
}

impl FileScanner {
    /// Create a new file scanner
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether to follow symbolic links
    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    /// Set maximum directory depth to traverse
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    /// Every regular file under `path`, sorted
    pub fn scan_files(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if !path.is_dir() {
            return Err(ImportError::InvalidPath(format!(
                "{} is not a directory",
                path.display()
            )));
        }

        let mut walker = WalkDir::new(path)
            .follow_links(self.follow_links)
            .sort_by_file_name();

        if let Some(depth) = self.max_depth {
            walker = walker.max_depth(depth);
        }

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
                Ok(_) => {}
                Err(e) => tracing::warn!("Skipping unreadable entry under {}: {}", path.display(), e),
            }
        }

        Ok(files)
    }

    /// Audio files under `path`, sorted
    pub fn scan_directory(&self, path: &Path) -> Result<Vec<PathBuf>> {
        Ok(self
            .scan_files(path)?
            .into_iter()
            .filter(|file| is_audio_file(file))
            .collect())
    }
}

/// Check if a file is a supported audio file
pub fn is_audio_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}
