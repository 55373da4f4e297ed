/// Daemon configuration
use crate::error::{DaemonError, Result};
use crate::supervisor::DaemonOptions;
use librato_artwork::ArtworkConfig;
use librato_importer::{OrganizeOptions, PathTemplate, WatcherConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read when `--config` is not given
pub const DEFAULT_CONFIG_PATH: &str = "/etc/librato/config.toml";

const SECS_PER_DAY: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibratoConfig {
    /// Library root; required
    #[serde(default)]
    pub library: Option<PathBuf>,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_template")]
    pub template: String,

    #[serde(default)]
    pub lowercase: bool,

    /// Put multi-disc releases in `Disc N` subfolders
    #[serde(default = "default_true")]
    pub disc_folders: bool,

    /// Substring replacements applied to every path component
    #[serde(default)]
    pub replacements: BTreeMap<String, String>,

    #[serde(default)]
    pub artwork: ArtworkSettings,

    #[serde(default)]
    pub daemon: DaemonSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ArtworkSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_musicbrainz_url")]
    pub musicbrainz_url: String,

    #[serde(default = "default_cover_art_url")]
    pub cover_art_url: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DaemonSettings {
    /// Inbox to watch; required for `daemon`
    #[serde(default)]
    pub watch_dir: Option<PathBuf>,

    /// Where untagged files go; required for `daemon`
    #[serde(default)]
    pub quarantine_dir: Option<PathBuf>,

    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    #[serde(default = "default_pid_file")]
    pub pid_file: PathBuf,

    #[serde(default = "default_true")]
    pub scan_on_startup: bool,

    #[serde(default = "default_true")]
    pub cleanup_empty_dirs: bool,

    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
}

impl LibratoConfig {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(
        path: Option<&Path>,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };

        // LIBRATO_LOG_LEVEL, LIBRATO_DAEMON__WATCH_DIR, ...
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("LIBRATO")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check the settings every command needs
    pub fn validate(&self) -> Result<()> {
        self.library()?;

        if self.template.trim().is_empty() {
            return Err(DaemonError::Config("template must not be empty".to_string()));
        }

        if self.artwork.enabled && self.artwork.timeout_secs == 0 {
            return Err(DaemonError::Config(
                "artwork.timeout_secs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Check the settings the long-running daemon needs on top of [`validate`](Self::validate)
    pub fn validate_daemon(&self) -> Result<()> {
        self.validate()?;
        self.watch_dir()?;
        self.quarantine_dir()?;

        if self.daemon.debounce_ms == 0 {
            return Err(DaemonError::Config(
                "daemon.debounce_ms must be greater than zero".to_string(),
            ));
        }
        self.retention()?;

        Ok(())
    }

    /// Ledger retention window, rejecting day counts too large to represent
    pub fn retention(&self) -> Result<Duration> {
        self.daemon
            .retention_days
            .checked_mul(SECS_PER_DAY)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                DaemonError::Config(format!(
                    "daemon.retention_days {} is too large",
                    self.daemon.retention_days
                ))
            })
    }

    pub fn library(&self) -> Result<&Path> {
        required(self.library.as_deref(), "library", "LIBRATO_LIBRARY")
    }

    pub fn watch_dir(&self) -> Result<&Path> {
        required(
            self.daemon.watch_dir.as_deref(),
            "daemon.watch_dir",
            "LIBRATO_DAEMON__WATCH_DIR",
        )
    }

    pub fn quarantine_dir(&self) -> Result<&Path> {
        required(
            self.daemon.quarantine_dir.as_deref(),
            "daemon.quarantine_dir",
            "LIBRATO_DAEMON__QUARANTINE_DIR",
        )
    }

    pub fn path_template(&self) -> PathTemplate {
        PathTemplate::new(self.template.clone())
            .with_disc_folder(self.disc_folders)
            .with_replacements(self.replacements.clone())
            .with_lowercase(self.lowercase)
    }

    pub fn artwork_config(&self) -> ArtworkConfig {
        ArtworkConfig {
            musicbrainz_url: self.artwork.musicbrainz_url.clone(),
            cover_art_url: self.artwork.cover_art_url.clone(),
            timeout: Duration::from_secs(self.artwork.timeout_secs),
            ..ArtworkConfig::default()
        }
    }

    /// Options for files picked up by the watcher
    pub fn organize_options(&self) -> Result<OrganizeOptions> {
        Ok(OrganizeOptions {
            quarantine_dir: Some(self.quarantine_dir()?.to_path_buf()),
            cleanup_empty_dirs: self.daemon.cleanup_empty_dirs,
            watch_root: Some(self.watch_dir()?.to_path_buf()),
        })
    }

    pub fn daemon_options(&self) -> Result<DaemonOptions> {
        let mut options = DaemonOptions::new(self.watch_dir()?, &self.daemon.pid_file);
        options.watcher = WatcherConfig {
            debounce: Duration::from_millis(self.daemon.debounce_ms),
        };
        options.scan_on_startup = self.daemon.scan_on_startup;
        options.retention = self.retention()?;
        Ok(options)
    }
}

fn required<'a>(value: Option<&'a Path>, key: &str, env: &str) -> Result<&'a Path> {
    match value {
        Some(path) if !path.as_os_str().is_empty() => Ok(path),
        _ => Err(DaemonError::Config(format!(
            "{} is required (set it in the config file or {})",
            key, env
        ))),
    }
}

// Default values
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_template() -> String {
    librato_importer::path_template::DEFAULT_TEMPLATE.to_string()
}

fn default_musicbrainz_url() -> String {
    "https://musicbrainz.org/ws/2".to_string()
}

fn default_cover_art_url() -> String {
    "https://coverartarchive.org".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/var/lib/librato/state.json")
}

fn default_pid_file() -> PathBuf {
    PathBuf::from("/var/run/librato.pid")
}

fn default_retention_days() -> u64 {
    30
}

impl Default for ArtworkSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            musicbrainz_url: default_musicbrainz_url(),
            cover_art_url: default_cover_art_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            watch_dir: None,
            quarantine_dir: None,
            debounce_ms: default_debounce_ms(),
            state_file: default_state_file(),
            pid_file: default_pid_file(),
            scan_on_startup: default_true(),
            cleanup_empty_dirs: default_true(),
            retention_days: default_retention_days(),
        }
    }
}

impl Default for LibratoConfig {
    fn default() -> Self {
        Self {
            library: None,
            log_level: default_log_level(),
            template: default_template(),
            lowercase: false,
            disc_folders: default_true(),
            replacements: BTreeMap::new(),
            artwork: ArtworkSettings::default(),
            daemon: DaemonSettings::default(),
        }
    }
}
