//! Moving inbox files into the templated library layout

use crate::metadata::{read_tags, ExtractedMetadata};
use crate::mover::{move_file, remove_dir_if_empty};
use crate::path_template::PathTemplate;
use crate::scanner::{is_audio_file, FileScanner};
use crate::{ImportError, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-call knobs for [`FileOrganizer::process_file`]
#[derive(Debug, Clone, Default)]
pub struct OrganizeOptions {
    /// Where untagged files go; `None` makes them an error
    pub quarantine_dir: Option<PathBuf>,
    /// Remove the source directory once it is empty
    pub cleanup_empty_dirs: bool,
    /// Never removed by the empty-directory cleanup
    pub watch_root: Option<PathBuf>,
}

/// Artist and album used for cover lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumInfo {
    pub artist: String,
    pub album: String,
}

impl AlbumInfo {
    /// Album artist (or artist) and album, when both are tagged
    pub fn from_metadata(metadata: &ExtractedMetadata) -> Option<Self> {
        Some(Self {
            artist: metadata.album_artist_or_artist()?.to_string(),
            album: metadata.album.clone()?,
        })
    }
}

/// What happened to a single file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeOutcome {
    /// Moved into the library
    Moved {
        target: PathBuf,
        album: Option<AlbumInfo>,
    },
    /// Already at its computed location
    AlreadyInPlace {
        target: PathBuf,
        album: Option<AlbumInfo>,
    },
    /// Dry run: where the file would go
    Planned { target: PathBuf },
    /// No usable tags, moved to quarantine
    Quarantined { target: PathBuf },
}

impl OrganizeOutcome {
    /// Final (or planned) location of the file
    pub fn target(&self) -> &Path {
        match self {
            Self::Moved { target, .. }
            | Self::AlreadyInPlace { target, .. }
            | Self::Planned { target }
            | Self::Quarantined { target } => target,
        }
    }

    /// Album directory and tags worth a cover lookup
    pub fn cover_request(&self) -> Option<(&Path, &AlbumInfo)> {
        match self {
            Self::Moved {
                target,
                album: Some(album),
            }
            | Self::AlreadyInPlace {
                target,
                album: Some(album),
            } => target.parent().map(|dir| (dir, album)),
            _ => None,
        }
    }
}

/// Totals from a one-shot directory run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub moved: usize,
    pub already_in_place: usize,
    pub planned: usize,
    pub companions_moved: usize,
    /// Audio files without usable tags, left where they were
    pub untagged: usize,
    pub failed: usize,
    /// Album directories in the library, for cover fetching
    pub albums: BTreeMap<PathBuf, AlbumInfo>,
}

/// Decides where a file belongs and puts it there
pub trait FileOrganizer: Send + Sync {
    /// Organize one file picked up by the watcher
    fn process_file(&self, path: &Path, options: &OrganizeOptions) -> Result<OrganizeOutcome>;

    /// Organize every audio file under `path`, moving companion files along
    fn process_directory(&self, path: &Path) -> Result<BatchSummary>;
}

/// [`FileOrganizer`] driven by audio tags and a [`PathTemplate`]
#[derive(Debug, Clone)]
pub struct LibraryOrganizer {
    library_root: PathBuf,
    template: PathTemplate,
    dry_run: bool,
}

impl LibraryOrganizer {
    pub fn new(library_root: impl Into<PathBuf>, template: PathTemplate) -> Self {
        Self {
            library_root: library_root.into(),
            template,
            dry_run: false,
        }
    }

    /// Compute targets without touching the filesystem
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Absolute library path for a tagged file
    pub fn target_for(&self, path: &Path, metadata: &ExtractedMetadata) -> PathBuf {
        self.library_root.join(self.template.resolve(metadata, path))
    }

    fn organize_audio(&self, path: &Path, options: &OrganizeOptions) -> Result<OrganizeOutcome> {
        let Some(metadata) = read_tags(path)? else {
            return match &options.quarantine_dir {
                Some(dir) => self.quarantine(path, dir, options),
                None => Err(ImportError::NoMetadata(path.to_path_buf())),
            };
        };

        let target = self.target_for(path, &metadata);
        let album = AlbumInfo::from_metadata(&metadata);
        self.relocate(path, target, album, options)
    }

    /// Non-audio files follow the first tagged audio file next to them
    fn organize_companion(&self, path: &Path, options: &OrganizeOptions) -> Result<OrganizeOutcome> {
        let Some(album_dir) = self.sibling_album_dir(path)? else {
            return match &options.quarantine_dir {
                Some(dir) => self.quarantine(path, dir, options),
                None => Err(ImportError::NoSiblingMusic(path.to_path_buf())),
            };
        };

        let file_name = path
            .file_name()
            .ok_or_else(|| ImportError::InvalidPath(path.display().to_string()))?;
        self.relocate(path, album_dir.join(file_name), None, options)
    }

    fn sibling_album_dir(&self, path: &Path) -> Result<Option<PathBuf>> {
        let Some(dir) = path.parent() else {
            return Ok(None);
        };

        let mut siblings: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|sibling| sibling.is_file() && is_audio_file(sibling))
            .collect();
        siblings.sort();

        for sibling in siblings {
            match read_tags(&sibling) {
                Ok(Some(metadata)) => {
                    return Ok(self
                        .target_for(&sibling, &metadata)
                        .parent()
                        .map(Path::to_path_buf));
                }
                Ok(None) => {}
                Err(e) => debug!("Skipping sibling {}: {}", sibling.display(), e),
            }
        }

        Ok(None)
    }

    fn relocate(
        &self,
        path: &Path,
        target: PathBuf,
        album: Option<AlbumInfo>,
        options: &OrganizeOptions,
    ) -> Result<OrganizeOutcome> {
        if path == target {
            debug!("File {} already in correct location", path.display());
            return Ok(OrganizeOutcome::AlreadyInPlace { target, album });
        }

        info!("Processing {} -> {}", path.display(), target.display());

        if self.dry_run {
            return Ok(OrganizeOutcome::Planned { target });
        }

        let target = move_file(path, &target)?;
        self.cleanup_source(path, options);
        Ok(OrganizeOutcome::Moved { target, album })
    }

    fn quarantine(
        &self,
        path: &Path,
        quarantine_dir: &Path,
        options: &OrganizeOptions,
    ) -> Result<OrganizeOutcome> {
        let name = path
            .file_name()
            .ok_or_else(|| ImportError::InvalidPath(path.display().to_string()))?;
        let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
        let target = quarantine_dir.join(format!("{}_{}", timestamp, name.to_string_lossy()));

        warn!(
            "No usable metadata, quarantining {} -> {}",
            path.display(),
            target.display()
        );

        if self.dry_run {
            return Ok(OrganizeOutcome::Planned { target });
        }

        let target = move_file(path, &target)?;
        self.cleanup_source(path, options);
        Ok(OrganizeOutcome::Quarantined { target })
    }

    fn cleanup_source(&self, path: &Path, options: &OrganizeOptions) {
        if !options.cleanup_empty_dirs {
            return;
        }
        let Some(dir) = path.parent() else {
            return;
        };
        if let Err(e) = remove_dir_if_empty(dir, options.watch_root.as_deref()) {
            warn!("Failed to clean up directory {}: {}", dir.display(), e);
        }
    }
}

impl FileOrganizer for LibraryOrganizer {
    fn process_file(&self, path: &Path, options: &OrganizeOptions) -> Result<OrganizeOutcome> {
        if is_audio_file(path) {
            self.organize_audio(path, options)
        } else {
            self.organize_companion(path, options)
        }
    }

    fn process_directory(&self, path: &Path) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();

        // Tagged audio files grouped by the directory they sit in
        let mut by_dir: BTreeMap<PathBuf, Vec<(PathBuf, ExtractedMetadata)>> = BTreeMap::new();
        for file in FileScanner::new().scan_directory(path)? {
            match read_tags(&file) {
                Ok(Some(metadata)) => {
                    let dir = file.parent().map(Path::to_path_buf).unwrap_or_default();
                    by_dir.entry(dir).or_default().push((file, metadata));
                }
                Ok(None) => {
                    debug!("No usable tags in {}, leaving it", file.display());
                    summary.untagged += 1;
                }
                Err(e) => {
                    warn!("Failed to read {}: {}", file.display(), e);
                    summary.failed += 1;
                }
            }
        }

        let options = OrganizeOptions::default();
        for (source_dir, tracks) in by_dir {
            let mut album_dir = None;

            for (file, metadata) in &tracks {
                let target = self.target_for(file, metadata);
                album_dir = target.parent().map(Path::to_path_buf);

                match self.relocate(file, target, None, &options) {
                    Ok(OrganizeOutcome::Moved { .. }) => summary.moved += 1,
                    Ok(OrganizeOutcome::AlreadyInPlace { .. }) => summary.already_in_place += 1,
                    Ok(_) => summary.planned += 1,
                    Err(e) => {
                        warn!("Failed to move {}: {}", file.display(), e);
                        summary.failed += 1;
                    }
                }
            }

            let Some(album_dir) = album_dir else {
                continue;
            };

            if album_dir != source_dir {
                summary.companions_moved += self.move_companions(&source_dir, &album_dir);
            }

            if let Some(album) = tracks
                .first()
                .and_then(|(_, metadata)| AlbumInfo::from_metadata(metadata))
            {
                summary.albums.insert(album_dir, album);
            }
        }

        info!(
            "Organized {}: {} moved, {} in place, {} companions, {} untagged, {} failed",
            path.display(),
            summary.moved,
            summary.already_in_place,
            summary.companions_moved,
            summary.untagged,
            summary.failed
        );

        Ok(summary)
    }
}

impl LibraryOrganizer {
    /// Move the non-audio files of `source_dir` into `album_dir`
    fn move_companions(&self, source_dir: &Path, album_dir: &Path) -> usize {
        let entries = match fs::read_dir(source_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Failed to list {}: {}", source_dir.display(), e);
                return 0;
            }
        };

        let mut moved = 0;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_file() || is_audio_file(&path) {
                continue;
            }
            let target = album_dir.join(entry.file_name());
            info!("Processing {} -> {}", path.display(), target.display());
            if self.dry_run {
                continue;
            }
            match move_file(&path, &target) {
                Ok(_) => moved += 1,
                Err(e) => warn!("Failed to move {}: {}", path.display(), e),
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_album_info_requires_artist_and_album() {
        let mut metadata = ExtractedMetadata {
            artist: Some("Artist".to_string()),
            ..Default::default()
        };
        assert!(AlbumInfo::from_metadata(&metadata).is_none());

        metadata.album = Some("Album".to_string());
        assert_eq!(
            AlbumInfo::from_metadata(&metadata),
            Some(AlbumInfo {
                artist: "Artist".to_string(),
                album: "Album".to_string(),
            })
        );
    }

    #[test]
    fn test_cover_request_uses_target_dir() {
        let album = AlbumInfo {
            artist: "A".to_string(),
            album: "B".to_string(),
        };
        let outcome = OrganizeOutcome::Moved {
            target: PathBuf::from("/lib/A/B/01 - x.flac"),
            album: Some(album.clone()),
        };

        assert_eq!(
            outcome.cover_request(),
            Some((Path::new("/lib/A/B"), &album))
        );
        assert!(OrganizeOutcome::Quarantined {
            target: PathBuf::from("/q/x.flac")
        }
        .cover_request()
        .is_none());
    }

    #[test]
    fn test_target_for_joins_library_root() {
        let organizer = LibraryOrganizer::new("/lib", PathTemplate::default());
        let metadata = ExtractedMetadata {
            title: Some("Song".to_string()),
            artist: Some("Artist".to_string()),
            album: Some("Album".to_string()),
            track_number: Some(3),
            ..Default::default()
        };

        assert_eq!(
            organizer.target_for(Path::new("/inbox/x.mp3"), &metadata),
            PathBuf::from("/lib/Artist/Album/03 - Song.mp3")
        );
    }
}
