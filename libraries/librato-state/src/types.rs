//! Ledger record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of processing one file with a given content hash
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedRecord {
    /// Path the file was picked up from
    pub path: PathBuf,

    /// Hex-encoded SHA-256 of the file contents at processing time
    pub content_hash: String,

    /// When processing completed
    pub processed_at: DateTime<Utc>,

    /// Where the file ended up, if it was moved
    pub target_path: Option<PathBuf>,

    /// Whether processing succeeded
    pub success: bool,
}

impl ProcessedRecord {
    /// Record a successful run, stamped with the current time
    pub fn success(
        path: impl AsRef<Path>,
        content_hash: impl Into<String>,
        target_path: Option<PathBuf>,
    ) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            content_hash: content_hash.into(),
            processed_at: Utc::now(),
            target_path,
            success: true,
        }
    }

    /// Record a failed run, stamped with the current time
    pub fn failure(path: impl AsRef<Path>, content_hash: impl Into<String>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            content_hash: content_hash.into(),
            processed_at: Utc::now(),
            target_path: None,
            success: false,
        }
    }

    /// Override the completion timestamp
    pub fn with_processed_at(mut self, processed_at: DateTime<Utc>) -> Self {
        self.processed_at = processed_at;
        self
    }
}

/// Running counters kept alongside the records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingStats {
    pub total_processed: u64,
    pub total_success: u64,
    pub total_failed: u64,
    /// When this ledger was first created
    pub started_at: DateTime<Utc>,
}

impl Default for ProcessingStats {
    fn default() -> Self {
        Self {
            total_processed: 0,
            total_success: 0,
            total_failed: 0,
            started_at: Utc::now(),
        }
    }
}

impl ProcessingStats {
    pub(crate) fn record(&mut self, success: bool) {
        self.total_processed += 1;
        if success {
            self.total_success += 1;
        } else {
            self.total_failed += 1;
        }
    }
}
