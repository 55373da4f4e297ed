//! Moving files into the library without clobbering existing ones

use crate::{ImportError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Move `source_path` to `dest_path`, never overwriting an existing file
///
/// On a name clash a counter is appended: "song.mp3" -> "song-1.mp3".
/// Rename is tried first; across filesystems the file is copied and the
/// source removed. Returns the final destination.
pub fn move_file(source_path: &Path, dest_path: &Path) -> Result<PathBuf> {
    let dest_dir = dest_path
        .parent()
        .ok_or_else(|| ImportError::InvalidPath(format!("{} has no parent", dest_path.display())))?;
    fs::create_dir_all(dest_dir)?;

    let dest_path = if dest_path.exists() {
        resolve_filename_conflict(dest_path)?
    } else {
        dest_path.to_path_buf()
    };

    let move_err = |source| ImportError::Move {
        from: source_path.to_path_buf(),
        to: dest_path.clone(),
        source,
    };

    if let Err(rename_err) = fs::rename(source_path, &dest_path) {
        debug!(
            "Rename {} -> {} failed ({}), falling back to copy",
            source_path.display(),
            dest_path.display(),
            rename_err
        );
        if let Err(e) = fs::copy(source_path, &dest_path) {
            // Don't leave a truncated copy behind
            let _ = fs::remove_file(&dest_path);
            return Err(move_err(e));
        }
        fs::remove_file(source_path).map_err(move_err)?;
    }

    Ok(dest_path)
}

/// First free "stem-N.ext" next to `path`
fn resolve_filename_conflict(path: &Path) -> Result<PathBuf> {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ImportError::InvalidPath(format!("Invalid filename: {}", path.display())))?;
    let extension = path.extension().and_then(|ext| ext.to_str());

    for counter in 1..1000 {
        let candidate = match extension {
            Some(ext) => path.with_file_name(format!("{}-{}.{}", stem, counter, ext)),
            None => path.with_file_name(format!("{}-{}", stem, counter)),
        };
        if !candidate.exists() {
            return Ok(candidate);
        }
    }

    Err(ImportError::InvalidPath(format!(
        "Could not resolve filename conflict for {} after 1000 attempts",
        path.display()
    )))
}

/// Remove `dir` if it is empty and is not `keep`
///
/// Returns whether the directory was removed.
pub fn remove_dir_if_empty(dir: &Path, keep: Option<&Path>) -> Result<bool> {
    if keep.is_some_and(|keep| same_path(dir, keep)) {
        return Ok(false);
    }

    if fs::read_dir(dir)?.next().is_some() {
        return Ok(false);
    }

    debug!("Removing empty directory {}", dir.display());
    fs::remove_dir(dir)?;
    Ok(true)
}

fn same_path(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
