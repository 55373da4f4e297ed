//! Per-file processing fired by the watcher
//!
//! readiness check -> hash -> ledger lookup -> organize -> record -> persist
//! -> cover fetch

use crate::metadata::calculate_file_hash;
use crate::organizer::{FileOrganizer, OrganizeOptions, OrganizeOutcome};
use crate::watcher::FileHandler;
use crate::{ImportError, Result};
use async_trait::async_trait;
use librato_artwork::CoverFetcher;
use librato_state::{ProcessedRecord, StateStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, info, warn};

/// Where a file ended up in the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Vanished, not a regular file, or unreadable
    NotReady,
    /// Could not be hashed
    Unhashable,
    /// Same path and content already in the ledger
    AlreadyProcessed,
    /// Another run holds the path; it will make one more pass afterwards
    InProgress,
    /// Organized (or failed to) and recorded
    Recorded(ProcessedRecord),
}

/// Production [`FileHandler`]: organizes a file and records it in the ledger
pub struct LibraryPipeline {
    organizer: Arc<dyn FileOrganizer>,
    state: Arc<StateStore>,
    covers: Option<CoverFetcher>,
    options: OrganizeOptions,
    in_flight: InFlight,
}

impl LibraryPipeline {
    pub fn new(
        organizer: Arc<dyn FileOrganizer>,
        state: Arc<StateStore>,
        options: OrganizeOptions,
    ) -> Self {
        Self {
            organizer,
            state,
            covers: None,
            options,
            in_flight: InFlight::default(),
        }
    }

    /// Fetch missing covers for albums that receive files
    pub fn with_cover_fetcher(mut self, covers: CoverFetcher) -> Self {
        self.covers = Some(covers);
        self
    }

    /// Run one file through the pipeline
    ///
    /// Runs for one path never overlap. A trigger that arrives while the path
    /// is being processed returns [`PipelineOutcome::InProgress`] and the
    /// running call makes one more pass when it finishes. The returned outcome
    /// is the last pass that recorded something, else the first pass.
    pub async fn process(&self, path: &Path) -> PipelineOutcome {
        let Some(mut claim) = self.in_flight.claim(path) else {
            debug!("{} is already being processed, queued a rerun", path.display());
            return PipelineOutcome::InProgress;
        };

        let mut outcome = self.process_once(path).await;
        while claim.finish_or_rerun() {
            debug!("{} was triggered again while processing", path.display());
            let rerun = self.process_once(path).await;
            if matches!(rerun, PipelineOutcome::Recorded(_)) {
                outcome = rerun;
            }
        }
        outcome
    }

    async fn process_once(&self, path: &Path) -> PipelineOutcome {
        info!("Processing file: {}", path.display());

        if let Err(e) = verify_file_ready(path).await {
            warn!("File not ready, skipping: {}", e);
            return PipelineOutcome::NotReady;
        }

        let hash = match blocking(path, calculate_file_hash).await {
            Ok(hash) => hash,
            Err(e) => {
                error!("Failed to compute hash for {}: {}", path.display(), e);
                return PipelineOutcome::Unhashable;
            }
        };

        if self.state.is_processed(path, &hash).await {
            info!("File {} already processed, skipping", path.display());
            return PipelineOutcome::AlreadyProcessed;
        }

        let organizer = Arc::clone(&self.organizer);
        let options = self.options.clone();
        let outcome = blocking(path, move |path| organizer.process_file(path, &options)).await;

        let record = match &outcome {
            Ok(result) => {
                info!("Successfully processed {}", path.display());
                ProcessedRecord::success(path, hash, Some(result.target().to_path_buf()))
            }
            Err(e) => {
                error!("Failed to process {}: {}", path.display(), e);
                ProcessedRecord::failure(path, hash)
            }
        };

        self.state.mark_processed(record.clone()).await;
        if let Err(e) = self.state.save().await {
            error!("Failed to save state: {}", e);
        }

        if let Ok(outcome) = &outcome {
            self.fetch_cover(outcome).await;
        }

        PipelineOutcome::Recorded(record)
    }

    async fn fetch_cover(&self, outcome: &OrganizeOutcome) {
        let Some(covers) = &self.covers else {
            return;
        };
        let Some((album_dir, album)) = outcome.cover_request() else {
            return;
        };

        if let Err(e) = covers
            .fetch_cover(album_dir, &album.artist, &album.album)
            .await
        {
            warn!("Failed to fetch cover for {}: {}", album_dir.display(), e);
        }
    }
}

/// Paths being processed, each with a "run again" flag
#[derive(Default)]
struct InFlight {
    paths: Arc<Mutex<HashMap<PathBuf, bool>>>,
}

impl InFlight {
    /// Claim `path`, or flag the current holder to rerun and return `None`
    fn claim(&self, path: &Path) -> Option<Claim> {
        let mut paths = lock(&self.paths);
        if let Some(rerun) = paths.get_mut(path) {
            *rerun = true;
            return None;
        }
        paths.insert(path.to_path_buf(), false);
        Some(Claim {
            paths: Arc::clone(&self.paths),
            path: path.to_path_buf(),
            released: false,
        })
    }
}

struct Claim {
    paths: Arc<Mutex<HashMap<PathBuf, bool>>>,
    path: PathBuf,
    released: bool,
}

impl Claim {
    /// Consume a pending rerun flag, or release the path when there is none
    fn finish_or_rerun(&mut self) -> bool {
        let mut paths = lock(&self.paths);
        if let Some(rerun) = paths.get_mut(&self.path) {
            if *rerun {
                *rerun = false;
                return true;
            }
        }
        paths.remove(&self.path);
        self.released = true;
        false
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.released {
            lock(&self.paths).remove(&self.path);
        }
    }
}

fn lock(paths: &Mutex<HashMap<PathBuf, bool>>) -> MutexGuard<'_, HashMap<PathBuf, bool>> {
    paths.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl FileHandler for LibraryPipeline {
    async fn handle(&self, path: PathBuf) {
        self.process(&path).await;
    }
}

/// The file must exist, be a regular file and open for reading
pub async fn verify_file_ready(path: &Path) -> Result<()> {
    let not_ready = |reason: String| ImportError::NotReady {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| not_ready(format!("file does not exist: {}", e)))?;

    if !metadata.is_file() {
        return Err(not_ready("not a regular file".to_string()));
    }

    tokio::fs::File::open(path)
        .await
        .map_err(|e| not_ready(format!("cannot open file: {}", e)))?;

    Ok(())
}

/// Run filesystem-heavy work off the async workers
async fn blocking<T, F>(path: &Path, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&Path) -> Result<T> + Send + 'static,
{
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || work(&path))
        .await
        .map_err(|e| ImportError::Task(e.to_string()))?
}
