//! Librato importer
//!
//! Everything between a file landing in the inbox and the file sitting in the
//! library: watching, debouncing, tag reading, path templating, moving, and
//! recording the result in the ledger.
//!
//! # Architecture
//!
//! - `watcher`: recursive inbox watcher with per-file debounce
//! - `pipeline`: per-file processing step fired by the watcher
//! - `organizer`: tag-driven moves, quarantine and companion files
//! - `path_template`: `{AlbumArtist}/{Album}/...` path resolution
//! - `metadata`: tag reading and content hashing
//! - `scanner`: filesystem walks
//! - `mover`: non-clobbering moves and empty-directory cleanup

mod error;

pub mod metadata;
pub mod mover;
pub mod organizer;
pub mod path_template;
pub mod pipeline;
pub mod scanner;
pub mod watcher;

pub use error::ImportError;
pub use organizer::{
    AlbumInfo, BatchSummary, FileOrganizer, LibraryOrganizer, OrganizeOptions, OrganizeOutcome,
};
pub use path_template::PathTemplate;
pub use pipeline::{LibraryPipeline, PipelineOutcome};
pub use watcher::{FileHandler, LibraryWatcher, WatchEvent, WatchEventKind, WatcherConfig};

/// Re-export commonly used types
pub type Result<T> = std::result::Result<T, ImportError>;
