//! Librato processed-file ledger
//!
//! Remembers which files the daemon has already handled, keyed by path and
//! content hash, so unchanged files are never organized twice.
//!
//! # Features
//!
//! - Concurrency-safe lookups and updates from many processing tasks
//! - Crash-safe persistence (temp file in the target directory + atomic rename)
//! - Lenient loading: a missing or corrupt state file yields an empty ledger
//! - Retention pruning for long-running daemons
//!
//! # Example
//!
//! ```no_run
//! use librato_state::{ProcessedRecord, StateStore};
//!
//! # async fn run() -> librato_state::Result<()> {
//! let store = StateStore::load("/var/lib/librato/state.json").await;
//! if !store.is_processed("/inbox/track.flac".as_ref(), "abc123").await {
//!     store
//!         .mark_processed(ProcessedRecord::success("/inbox/track.flac", "abc123", None))
//!         .await;
//!     store.save().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod store;
mod types;

pub use error::StateError;
pub use store::StateStore;
pub use types::{ProcessedRecord, ProcessingStats};

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, StateError>;
