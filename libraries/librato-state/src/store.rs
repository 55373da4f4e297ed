//! Concurrency-safe ledger with crash-safe persistence

use crate::{ProcessedRecord, ProcessingStats, Result, StateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// In-memory ledger contents
#[derive(Debug)]
struct Ledger {
    records: HashMap<PathBuf, ProcessedRecord>,
    stats: ProcessingStats,
    last_run: DateTime<Utc>,
}

impl Ledger {
    fn fresh() -> Self {
        Self {
            records: HashMap::new(),
            stats: ProcessingStats::default(),
            last_run: Utc::now(),
        }
    }
}

/// On-disk snapshot layout
#[derive(Debug, Deserialize)]
struct Snapshot {
    records: Vec<ProcessedRecord>,
    stats: ProcessingStats,
    last_run: DateTime<Utc>,
}

/// Borrowed view of the ledger used for serialization
#[derive(Serialize)]
struct SnapshotRef<'a> {
    records: Vec<&'a ProcessedRecord>,
    stats: &'a ProcessingStats,
    last_run: &'a DateTime<Utc>,
}

/// Ledger of processed files backed by a JSON state file
///
/// The record map and the counters live behind one `RwLock`, so lookups run
/// concurrently and updates are serialized. A separate save lock orders
/// writers of the state file; it never guards the records themselves.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    ledger: RwLock<Ledger>,
    save_lock: Mutex<()>,
}

impl StateStore {
    /// Create an empty ledger that will persist to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ledger: RwLock::new(Ledger::fresh()),
            save_lock: Mutex::new(()),
        }
    }

    /// Load the ledger from `path`
    ///
    /// Never fails: a missing file starts an empty ledger, and an unreadable or
    /// corrupt file starts an empty ledger with a warning.
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(
                    "No existing state file at {}, starting with fresh state",
                    path.display()
                );
                return Self::new(path);
            }
            Err(e) => {
                warn!(
                    "Unreadable state file at {}, starting with fresh state: {}",
                    path.display(),
                    e
                );
                return Self::new(path);
            }
        };

        let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    "Corrupted state file at {}, starting with fresh state: {}",
                    path.display(),
                    e
                );
                return Self::new(path);
            }
        };

        let records: HashMap<PathBuf, ProcessedRecord> = snapshot
            .records
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();

        info!(
            "Loaded state from {} ({} processed files, last run {})",
            path.display(),
            records.len(),
            snapshot.last_run
        );

        Self {
            path,
            ledger: RwLock::new(Ledger {
                records,
                stats: snapshot.stats,
                last_run: Utc::now(),
            }),
            save_lock: Mutex::new(()),
        }
    }

    /// Path of the backing state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True only if `path` was recorded with exactly this content hash
    pub async fn is_processed(&self, path: &Path, content_hash: &str) -> bool {
        self.ledger
            .read()
            .await
            .records
            .get(path)
            .is_some_and(|record| record.content_hash == content_hash)
    }

    /// True if any record exists for `path`, whatever its hash
    pub async fn is_known(&self, path: &Path) -> bool {
        self.ledger.read().await.records.contains_key(path)
    }

    /// Get the record for `path`
    pub async fn get(&self, path: &Path) -> Option<ProcessedRecord> {
        self.ledger.read().await.records.get(path).cloned()
    }

    /// Insert or overwrite the record for `record.path` and bump the counters
    pub async fn mark_processed(&self, record: ProcessedRecord) {
        let mut ledger = self.ledger.write().await;
        ledger.stats.record(record.success);
        ledger.records.insert(record.path.clone(), record);
    }

    /// Drop records processed more than `max_age` ago
    ///
    /// Returns the number of removed records.
    pub async fn cleanup(&self, max_age: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(max_age)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };

        let mut ledger = self.ledger.write().await;
        let before = ledger.records.len();
        ledger
            .records
            .retain(|_, record| record.processed_at >= cutoff);
        let removed = before - ledger.records.len();

        if removed > 0 {
            info!(
                "Cleaned up {} old entries from state (older than {:?})",
                removed, max_age
            );
        }

        removed
    }

    /// Current counters
    pub async fn stats(&self) -> ProcessingStats {
        self.ledger.read().await.stats
    }

    /// Number of records currently held
    pub async fn record_count(&self) -> usize {
        self.ledger.read().await.records.len()
    }

    /// Persist the full ledger
    ///
    /// The snapshot is written to a temporary file next to the state file and
    /// renamed over it, so the state file is always either the previous or the
    /// new complete snapshot. On failure the temporary file is removed.
    pub async fn save(&self) -> Result<()> {
        let _guard = self.save_lock.lock().await;

        let bytes = {
            let ledger = self.ledger.read().await;
            let mut records: Vec<&ProcessedRecord> = ledger.records.values().collect();
            records.sort_by(|a, b| a.path.cmp(&b.path));
            serde_json::to_vec_pretty(&SnapshotRef {
                records,
                stats: &ledger.stats,
                last_run: &ledger.last_run,
            })?
        };

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &bytes))
            .await
            .map_err(|e| StateError::Task(e.to_string()))??;

        debug!("Saved state to {}", self.path.display());
        Ok(())
    }
}

/// Write `bytes` to `path` through a temp file in the same directory
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    std::fs::create_dir_all(&dir).map_err(|source| StateError::CreateDir {
        path: dir.clone(),
        source,
    })?;

    let prefix = path
        .file_name()
        .map(|name| format!(".{}.", name.to_string_lossy()))
        .unwrap_or_else(|| ".state.".to_string());

    // Dropping the temp file on any early return removes it
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(&dir)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| StateError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;

    Ok(())
}
