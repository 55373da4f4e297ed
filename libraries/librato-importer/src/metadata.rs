//! Tag reading and content hashing

use crate::{ImportError, Result};
use lofty::{Accessor, ItemKey, Probe, TaggedFileExt};
use std::path::Path;

/// Tags read from an audio file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractedMetadata {
    /// Track title
    pub title: Option<String>,

    /// Artist name
    pub artist: Option<String>,

    /// Album title
    pub album: Option<String>,

    /// Album artist (may differ from track artist)
    pub album_artist: Option<String>,

    /// Track number
    pub track_number: Option<u32>,

    /// Disc number
    pub disc_number: Option<u32>,

    /// Total discs in the release
    pub total_discs: Option<u32>,

    /// Year
    pub year: Option<u32>,

    /// Genres (can be multiple)
    pub genres: Vec<String>,
}

impl ExtractedMetadata {
    /// True when none of the identifying tags are set
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.artist.is_none()
            && self.album.is_none()
            && self.album_artist.is_none()
    }

    /// Album artist, falling back to the track artist
    pub fn album_artist_or_artist(&self) -> Option<&str> {
        self.album_artist.as_deref().or(self.artist.as_deref())
    }

    /// True when the tags say the release spans several discs
    pub fn is_multi_disc(&self) -> bool {
        match self.total_discs {
            Some(total) => total > 1,
            None => self.disc_number.is_some_and(|disc| disc > 1),
        }
    }
}

fn non_empty(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Read tags from an audio file
///
/// Returns `Ok(None)` when the file cannot be parsed as audio or carries no
/// identifying tags. Fails only when the file cannot be opened.
pub fn read_tags(path: &Path) -> Result<Option<ExtractedMetadata>> {
    let probe = Probe::open(path)
        .map_err(|e| ImportError::Metadata(format!("Failed to open {}: {}", path.display(), e)))?;

    let tagged_file = match probe.read() {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!("Unreadable tags in {}: {}", path.display(), e);
            return Ok(None);
        }
    };

    let Some(tag) = tagged_file.primary_tag().or(tagged_file.first_tag()) else {
        return Ok(None);
    };

    // Genres may be packed into one field with various delimiters
    let genres: Vec<String> = tag
        .genre()
        .map(|g| {
            g.split(&[',', ';', '/'][..])
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let metadata = ExtractedMetadata {
        title: non_empty(tag.title()),
        artist: non_empty(tag.artist()),
        album: non_empty(tag.album()),
        album_artist: tag
            .get_string(&ItemKey::AlbumArtist)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        track_number: tag.track(),
        disc_number: tag.disk(),
        total_discs: tag.disk_total(),
        year: tag.year(),
        genres,
    };

    if metadata.is_empty() {
        return Ok(None);
    }

    Ok(Some(metadata))
}

/// Calculate the hex SHA-256 of a file's contents
pub fn calculate_file_hash(path: &Path) -> Result<String> {
    use sha2::{Digest, Sha256};
    use std::fs::File;
    use std::io::Read;

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
