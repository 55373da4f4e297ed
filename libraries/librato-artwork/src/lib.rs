//! Librato Artwork - album cover fetching
//!
//! Looks up a release on MusicBrainz by artist and album, downloads its front
//! cover from the Cover Art Archive and stores it next to the album's tracks.
//!
//! # Features
//!
//! - Skips directories that already have a `cover.jpg`, `cover.jpeg` or `cover.png`
//! - Concurrent requests for one directory share a single lookup
//! - Covers are written atomically, never left half-downloaded
//!
//! # Example
//!
//! ```no_run
//! use librato_artwork::{ArtworkConfig, CoverFetcher, CoverOutcome};
//! use std::path::Path;
//!
//! # async fn example() -> librato_artwork::Result<()> {
//! let fetcher = CoverFetcher::new(ArtworkConfig::default())?;
//! match fetcher
//!     .fetch_cover(Path::new("/music/Artist/Album"), "Artist", "Album")
//!     .await?
//! {
//!     CoverOutcome::Saved(path) => println!("Saved {}", path.display()),
//!     other => println!("Nothing saved: {:?}", other),
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod fetcher;
mod types;

// Re-export public API
pub use error::{ArtworkError, Result};
pub use fetcher::CoverFetcher;
pub use types::{ArtworkConfig, CoverOutcome, COVER_FILENAMES};
