//! Filesystem watcher for the inbox directory
//!
//! Watches every directory of the tree individually (non-recursive watches,
//! added as new directories appear) and turns bursts of create/write events
//! into a single processing trigger per file once the file has been quiet for
//! the configured debounce period.
//!
//! # Platform Support
//!
//! - Windows: `ReadDirectoryChangesW`
//! - macOS: `FSEvents`
//! - Linux: `inotify`

use crate::scanner::FileScanner;
use crate::{ImportError, Result};
use async_trait::async_trait;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Default quiet period before a file is processed
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Configuration for the library watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// How long a file must go without events before it is processed
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// Kind of filesystem change the watcher reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    /// A file or directory was created
    Created,
    /// A file was written or moved into the tree
    Modified,
}

/// Filesystem change for one path
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub kind: WatchEventKind,
    pub timestamp: Instant,
}

/// Receives files that are ready to be processed
#[async_trait]
pub trait FileHandler: Send + Sync + 'static {
    async fn handle(&self, path: PathBuf);
}

struct PendingEntry {
    last_seen: Instant,
    generation: u64,
    abort: AbortHandle,
}

struct WatchRegistry {
    watcher: Option<RecommendedWatcher>,
    dirs: HashSet<PathBuf>,
}

struct Shared {
    root: PathBuf,
    config: WatcherConfig,
    handler: Arc<dyn FileHandler>,
    pending: RwLock<HashMap<PathBuf, PendingEntry>>,
    registry: Mutex<WatchRegistry>,
    next_generation: AtomicU64,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

#[derive(Default)]
struct Lifecycle {
    started: bool,
    stopped: bool,
    event_loop: Option<JoinHandle<()>>,
}

/// Watches a directory tree and hands settled files to a [`FileHandler`]
pub struct LibraryWatcher {
    shared: Arc<Shared>,
    lifecycle: Mutex<Lifecycle>,
}

impl LibraryWatcher {
    /// Create a watcher for `root`; nothing is watched until [`start`](Self::start)
    pub fn new(
        root: impl Into<PathBuf>,
        config: WatcherConfig,
        handler: Arc<dyn FileHandler>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                root: root.into(),
                config,
                handler,
                pending: RwLock::new(HashMap::new()),
                registry: Mutex::new(WatchRegistry {
                    watcher: None,
                    dirs: HashSet::new(),
                }),
                next_generation: AtomicU64::new(0),
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    /// Watch the root and every directory below it, then start consuming events
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.stopped {
            return Err(ImportError::WatcherStopped);
        }
        if lifecycle.started {
            return Ok(());
        }

        let root = self.shared.root.clone();
        if !tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir()) {
            return Err(ImportError::WatchRootMissing(root));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Receiver is gone only after shutdown
            let _ = tx.send(res);
        })?;
        self.shared.registry.lock().await.watcher = Some(watcher);

        self.shared.add_watch(&root).await?;
        let subdirs = tokio::task::spawn_blocking(move || existing_subdirs(&root))
            .await
            .map_err(|e| ImportError::Task(e.to_string()))?;
        for dir in subdirs {
            if let Err(e) = self.shared.add_watch(&dir).await {
                warn!("Failed to watch {}: {}", dir.display(), e);
            }
        }

        lifecycle.event_loop = Some(tokio::spawn(run_event_loop(Arc::clone(&self.shared), rx)));
        lifecycle.started = true;

        info!(
            "Watching {} ({} directories, debounce {:?})",
            self.shared.root.display(),
            self.shared.registry.lock().await.dirs.len(),
            self.shared.config.debounce
        );
        Ok(())
    }

    /// Process every file already under the root, one at a time, without debounce
    ///
    /// Returns the number of files handed to the handler.
    pub async fn scan_existing(&self) -> Result<usize> {
        let root = self.shared.root.clone();
        if !tokio::fs::metadata(&root).await.is_ok_and(|m| m.is_dir()) {
            return Err(ImportError::WatchRootMissing(root));
        }

        info!("Scanning existing files in {}", root.display());
        let files = tokio::task::spawn_blocking(move || FileScanner::new().scan_files(&root))
            .await
            .map_err(|e| ImportError::Task(e.to_string()))??;

        let count = files.len();
        for file in files {
            if self.shared.shutdown.is_cancelled() {
                break;
            }
            self.shared.handler.handle(file).await;
        }

        info!("Scanned {} existing files", count);
        Ok(count)
    }

    /// Stop watching
    ///
    /// Files still inside their quiet period are dropped. Returns once the
    /// event loop has exited and every already-fired handler has finished.
    /// Calling it again is a no-op.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.stopped {
            return;
        }
        lifecycle.stopped = true;
        info!("Stopping watcher");

        self.shared.shutdown.cancel();
        if let Some(event_loop) = lifecycle.event_loop.take() {
            if let Err(e) = event_loop.await {
                warn!("Watcher event loop ended abnormally: {}", e);
            }
        }

        let dropped = {
            let mut pending = self.shared.pending.write().await;
            let dropped = pending.len();
            for (_, entry) in pending.drain() {
                entry.abort.abort();
            }
            dropped
        };

        {
            let mut registry = self.shared.registry.lock().await;
            registry.watcher = None;
            registry.dirs.clear();
        }

        self.shared.tracker.close();
        self.shared.tracker.wait().await;

        info!("Watcher stopped ({} pending files dropped)", dropped);
    }

    /// Number of files waiting out their quiet period
    pub async fn pending_count(&self) -> usize {
        self.shared.pending.read().await.len()
    }

    pub async fn is_pending(&self, path: &Path) -> bool {
        self.shared.pending.read().await.contains_key(path)
    }

    pub async fn is_watching(&self, dir: &Path) -> bool {
        self.shared.registry.lock().await.dirs.contains(dir)
    }

    /// Watched directories, sorted
    pub async fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .shared
            .registry
            .lock()
            .await
            .dirs
            .iter()
            .cloned()
            .collect();
        dirs.sort();
        dirs
    }
}

impl Shared {
    /// Register `dir` with the watch primitive
    ///
    /// Returns `false` if it was already registered or the watcher is gone.
    async fn add_watch(&self, dir: &Path) -> Result<bool> {
        let mut registry = self.registry.lock().await;
        if registry.dirs.contains(dir) {
            return Ok(false);
        }
        let Some(watcher) = registry.watcher.as_mut() else {
            return Ok(false);
        };

        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        registry.dirs.insert(dir.to_path_buf());
        debug!("Watching directory {}", dir.display());
        Ok(true)
    }

    async fn handle_event(self: &Arc<Self>, event: WatchEvent) {
        debug!("{:?} {}", event.kind, event.path.display());

        let metadata = match tokio::fs::metadata(&event.path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                debug!("Skipping {}: {}", event.path.display(), e);
                return;
            }
        };

        if metadata.is_dir() {
            self.watch_new_tree(event.path).await;
        } else if metadata.is_file() {
            self.schedule(event.path).await;
        }
    }

    /// Watch a directory that appeared while running, and everything in it
    ///
    /// Files already inside are processed right away: their create events
    /// happened before the watch existed.
    async fn watch_new_tree(self: &Arc<Self>, dir: PathBuf) {
        let mut queue = vec![dir];

        while let Some(dir) = queue.pop() {
            match self.add_watch(&dir).await {
                Ok(true) => info!("Watching new directory {}", dir.display()),
                Ok(false) => continue,
                Err(e) => {
                    warn!("Failed to watch {}: {}", dir.display(), e);
                    continue;
                }
            }

            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("Failed to scan {}: {}", dir.display(), e);
                    continue;
                }
            };

            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to scan {}: {}", dir.display(), e);
                        break;
                    }
                };
                match entry.file_type().await {
                    Ok(kind) if kind.is_dir() => queue.push(entry.path()),
                    Ok(kind) if kind.is_file() => self.fire_now(entry.path()),
                    Ok(_) => {}
                    Err(e) => debug!("Skipping {}: {}", entry.path().display(), e),
                }
            }
        }
    }

    fn fire_now(self: &Arc<Self>, path: PathBuf) {
        if self.shutdown.is_cancelled() {
            return;
        }
        let handler = Arc::clone(&self.handler);
        self.tracker.spawn(async move { handler.handle(path).await });
    }

    /// Start or restart the quiet period for `path`
    async fn schedule(self: &Arc<Self>, path: PathBuf) {
        if self.shutdown.is_cancelled() {
            return;
        }

        // Abort and replace happen under the write lock, so a timer can never
        // observe a half-updated entry
        let mut pending = self.pending.write().await;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        if let Some(previous) = pending.get(&path) {
            previous.abort.abort();
            debug!(
                "Reset debounce for {} (last event {:?} ago)",
                path.display(),
                previous.last_seen.elapsed()
            );
        }

        let shared = Arc::clone(self);
        let key = path.clone();
        let timer = self.tracker.spawn(async move {
            tokio::time::sleep(shared.config.debounce).await;
            shared.fire_pending(key, generation).await;
        });

        pending.insert(
            path,
            PendingEntry {
                last_seen: Instant::now(),
                generation,
                abort: timer.abort_handle(),
            },
        );
    }

    async fn fire_pending(&self, path: PathBuf, generation: u64) {
        {
            let mut pending = self.pending.write().await;
            match pending.get(&path) {
                Some(entry) if entry.generation == generation => {
                    pending.remove(&path);
                }
                // Superseded by a newer event or dropped by stop
                _ => return,
            }
        }

        if self.shutdown.is_cancelled() {
            return;
        }

        self.handler.handle(path).await;
    }
}

async fn run_event_loop(
    shared: Arc<Shared>,
    mut events: mpsc::UnboundedReceiver<notify::Result<Event>>,
) {
    loop {
        tokio::select! {
            biased;
            () = shared.shutdown.cancelled() => break,
            received = events.recv() => match received {
                Some(Ok(event)) => {
                    for event in classify(&event) {
                        shared.handle_event(event).await;
                    }
                }
                Some(Err(e)) => warn!("Watcher error: {}", e),
                None => break,
            },
        }
    }
    debug!("Watcher event loop exited");
}

/// Convert a notify event into the events the watcher reacts to
fn classify(event: &Event) -> Vec<WatchEvent> {
    let (kind, paths): (WatchEventKind, &[PathBuf]) = match &event.kind {
        EventKind::Create(_) => (WatchEventKind::Created, event.paths.as_slice()),
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => {
            (WatchEventKind::Modified, event.paths.as_slice())
        }
        // A rename pair carries [from, to]; only the destination matters
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => (
            WatchEventKind::Modified,
            event.paths.last().map(std::slice::from_ref).unwrap_or_default(),
        ),
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Any)) => {
            (WatchEventKind::Modified, event.paths.as_slice())
        }
        _ => return Vec::new(),
    };

    let timestamp = Instant::now();
    paths
        .iter()
        .map(|path| WatchEvent {
            path: path.clone(),
            kind,
            timestamp,
        })
        .collect()
}

fn existing_subdirs(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        Event {
            kind,
            paths: paths.iter().map(PathBuf::from).collect(),
            attrs: Default::default(),
        }
    }

    #[test]
    fn test_watcher_config_default() {
        assert_eq!(WatcherConfig::default().debounce, Duration::from_secs(2));
    }

    #[test]
    fn test_classify_create_and_write() {
        let created = classify(&event(
            EventKind::Create(CreateKind::File),
            &["/in/a.flac"],
        ));
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].kind, WatchEventKind::Created);

        let written = classify(&event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/in/a.flac"],
        ));
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].kind, WatchEventKind::Modified);
    }

    #[test]
    fn test_classify_rename_uses_destination() {
        let renamed = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/elsewhere/a.flac", "/in/a.flac"],
        ));
        assert_eq!(renamed.len(), 1);
        assert_eq!(renamed[0].path, PathBuf::from("/in/a.flac"));

        let moved_in = classify(&event(
            EventKind::Modify(ModifyKind::Name(RenameMode::To)),
            &["/in/b.flac"],
        ));
        assert_eq!(moved_in.len(), 1);
    }

    #[test]
    fn test_classify_ignores_other_events() {
        for kind in [
            EventKind::Remove(RemoveKind::File),
            EventKind::Access(AccessKind::Any),
            EventKind::Modify(ModifyKind::Metadata(MetadataKind::Permissions)),
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
        ] {
            assert!(classify(&event(kind, &["/in/a.flac"])).is_empty());
        }
    }

    #[test]
    fn test_existing_subdirs() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();
        std::fs::create_dir(temp.path().join("c")).unwrap();
        std::fs::write(temp.path().join("a/file.mp3"), b"x").unwrap();

        let mut dirs = existing_subdirs(temp.path());
        dirs.sort();

        assert_eq!(
            dirs,
            vec![
                temp.path().join("a"),
                temp.path().join("a/b"),
                temp.path().join("c"),
            ]
        );
    }
}
