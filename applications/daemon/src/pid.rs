//! Single-instance PID marker

use crate::error::{DaemonError, Result};
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// PID file held for the lifetime of a running daemon
///
/// Acquired with [`PidLock::acquire`] and given back with
/// [`PidLock::release`]. Dropping an unreleased lock removes the marker
/// best-effort.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    pid: u32,
    released: bool,
}

impl PidLock {
    /// Claim the marker at `path` for the current process
    ///
    /// Fails with [`DaemonError::AlreadyRunning`] if the marker names a live
    /// process. A marker naming a dead process, or holding garbage, is
    /// replaced. The marker is written to a temp file and linked into place
    /// without clobbering, so two instances starting together cannot both
    /// succeed and nobody ever reads a half-written PID.
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let pid = std::process::id();
        let pid_err = |source| DaemonError::PidFile {
            path: path.clone(),
            source,
        };

        let dir = match path.parent().filter(|p| !p.as_os_str().is_empty()) {
            Some(parent) => {
                fs::create_dir_all(parent).map_err(pid_err)?;
                parent.to_path_buf()
            }
            None => PathBuf::from("."),
        };

        let mut marker = tempfile::Builder::new()
            .prefix(".librato.pid.")
            .tempfile_in(&dir)
            .map_err(pid_err)?;
        writeln!(marker, "{}", pid).map_err(pid_err)?;
        marker.as_file().sync_all().map_err(pid_err)?;

        // A stale marker is cleared once; finding one again means another
        // instance claimed the path in between
        let mut cleared_stale = false;
        loop {
            match marker.persist_noclobber(&path) {
                Ok(_) => break,
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists && !cleared_stale => {
                    marker = e.file;
                    clear_stale_marker(&path)?;
                    cleared_stale = true;
                }
                Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                    check_existing_marker(&path)?;
                    return Err(pid_err(e.error));
                }
                Err(e) => return Err(pid_err(e.error)),
            }
        }

        info!("Wrote PID {} to {}", pid, path.display());
        Ok(Self {
            path,
            pid,
            released: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Remove the marker
    pub fn release(mut self) -> Result<()> {
        self.released = true;
        remove_marker(&self.path).map_err(|source| DaemonError::PidFile {
            path: self.path.clone(),
            source,
        })
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = remove_marker(&self.path) {
            warn!("Failed to remove PID file {}: {}", self.path.display(), e);
        }
    }
}

/// Fail if the marker at `path` names a live process
///
/// Returns the marker contents otherwise; a marker that vanished reads as
/// empty.
fn check_existing_marker(path: &Path) -> Result<String> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(String::new()),
        Err(e) => {
            return Err(DaemonError::PidFile {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    if let Some(pid) = parse_pid(&contents) {
        if is_process_alive(pid) {
            return Err(DaemonError::AlreadyRunning {
                pid,
                path: path.to_path_buf(),
            });
        }
    }
    Ok(contents)
}

/// Remove a marker left behind by a process that is gone
fn clear_stale_marker(path: &Path) -> Result<()> {
    let contents = check_existing_marker(path)?;
    match parse_pid(&contents) {
        Some(pid) => warn!(
            "Removing stale PID file {} (process {} is not running)",
            path.display(),
            pid
        ),
        None => warn!(
            "Removing stale PID file {} (unreadable contents {:?})",
            path.display(),
            contents.trim()
        ),
    }

    remove_marker(path).map_err(|source| DaemonError::PidFile {
        path: path.to_path_buf(),
        source,
    })
}

fn remove_marker(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed PID file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Positive decimal process id, surrounding whitespace allowed
fn parse_pid(contents: &str) -> Option<i32> {
    contents.trim().parse::<i32>().ok().filter(|pid| *pid > 0)
}

/// Probe `pid` with the null signal
///
/// `EPERM` means the process exists but belongs to someone else.
pub fn is_process_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    match kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}
