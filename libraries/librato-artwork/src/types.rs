use std::path::PathBuf;
use std::time::Duration;

/// File names recognized as an existing album cover
pub const COVER_FILENAMES: [&str; 3] = ["cover.jpg", "cover.jpeg", "cover.png"];

/// Result of a cover lookup that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverOutcome {
    /// Directory already had a cover, nothing was requested
    AlreadyPresent(PathBuf),
    /// Artist or album was empty
    MissingMetadata,
    /// MusicBrainz had no matching release
    NoMatch,
    /// Release matched but the archive has no front cover
    NotAvailable,
    /// Cover downloaded and written to this path
    Saved(PathBuf),
}

impl CoverOutcome {
    /// Path of the cover now present in the directory, if any
    pub fn cover_path(&self) -> Option<&PathBuf> {
        match self {
            Self::AlreadyPresent(path) | Self::Saved(path) => Some(path),
            _ => None,
        }
    }
}

/// Endpoints and HTTP settings for cover lookups
#[derive(Debug, Clone)]
pub struct ArtworkConfig {
    /// MusicBrainz web service root, e.g. `https://musicbrainz.org/ws/2`
    pub musicbrainz_url: String,
    /// Cover Art Archive root
    pub cover_art_url: String,
    /// Total time allowed per request
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// MusicBrainz rejects anonymous clients
    pub user_agent: String,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            musicbrainz_url: "https://musicbrainz.org/ws/2".to_string(),
            cover_art_url: "https://coverartarchive.org".to_string(),
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: format!(
                "librato/{} (https://github.com/yourusername/librato)",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cover_path() {
        let saved = CoverOutcome::Saved(PathBuf::from("/lib/a/cover.jpg"));
        assert_eq!(saved.cover_path(), Some(&PathBuf::from("/lib/a/cover.jpg")));
        assert_eq!(CoverOutcome::NoMatch.cover_path(), None);
    }

    #[test]
    fn test_default_user_agent_is_descriptive() {
        let config = ArtworkConfig::default();
        assert!(config.user_agent.starts_with("librato/"));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }
}
