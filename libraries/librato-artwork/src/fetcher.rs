//! Cover lookups with per-directory single-flight

use crate::error::{ArtworkError, Result};
use crate::types::{ArtworkConfig, CoverOutcome, COVER_FILENAMES};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

type SharedLookup = Shared<BoxFuture<'static, Result<CoverOutcome>>>;

/// Release search response, only the fields we use
#[derive(Debug, Deserialize)]
struct ReleaseSearch {
    #[serde(default)]
    releases: Vec<ReleaseMatch>,
}

#[derive(Debug, Deserialize)]
struct ReleaseMatch {
    id: String,
    #[serde(default)]
    score: u32,
}

/// Downloads missing album covers
///
/// Cheap to clone; clones share the HTTP client and the in-flight registry.
/// Concurrent [`fetch_cover`](Self::fetch_cover) calls for the same directory
/// are served by a single lookup whose outcome every caller receives.
#[derive(Clone)]
pub struct CoverFetcher {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    musicbrainz_url: String,
    cover_art_url: String,
    in_flight: Mutex<HashMap<PathBuf, SharedLookup>>,
}

impl CoverFetcher {
    /// Create a fetcher with the given endpoints and timeouts
    pub fn new(config: ArtworkConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()
            .map_err(|e| ArtworkError::Client(Arc::new(e)))?;

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                musicbrainz_url: config.musicbrainz_url.trim_end_matches('/').to_string(),
                cover_art_url: config.cover_art_url.trim_end_matches('/').to_string(),
                in_flight: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Make sure `target_dir` has a cover for `artist` - `album`
    ///
    /// Returns without any request when a cover already exists or metadata is
    /// missing. Otherwise joins the lookup already running for `target_dir`,
    /// or starts one. The lookup runs in its own task, so dropping this future
    /// never cancels it for other waiters.
    pub async fn fetch_cover(
        &self,
        target_dir: &Path,
        artist: &str,
        album: &str,
    ) -> Result<CoverOutcome> {
        if let Some(existing) = existing_cover(target_dir).await {
            debug!("Cover already exists in {}, skipping", target_dir.display());
            return Ok(CoverOutcome::AlreadyPresent(existing));
        }

        if artist.trim().is_empty() || album.trim().is_empty() {
            debug!(
                "Missing artist or album for {}, skipping cover fetch",
                target_dir.display()
            );
            return Ok(CoverOutcome::MissingMetadata);
        }

        let lookup = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(running) = in_flight.get(target_dir) {
                debug!("Joining in-flight cover lookup for {}", target_dir.display());
                running.clone()
            } else if let Some(existing) = existing_cover(target_dir).await {
                // A lookup may have finished between the first check and the lock
                debug!("Cover appeared in {}, skipping", target_dir.display());
                return Ok(CoverOutcome::AlreadyPresent(existing));
            } else {
                let lookup = self.spawn_lookup(target_dir, artist, album);
                in_flight.insert(target_dir.to_path_buf(), lookup.clone());
                lookup
            }
        };

        lookup.await
    }

    /// Number of directories with a lookup currently running
    pub async fn in_flight_count(&self) -> usize {
        self.inner.in_flight.lock().await.len()
    }

    fn spawn_lookup(&self, target_dir: &Path, artist: &str, album: &str) -> SharedLookup {
        let inner = Arc::clone(&self.inner);
        let key = target_dir.to_path_buf();
        let artist = artist.to_string();
        let album = album.to_string();

        // Callers can only reach the registry once we release its lock, and
        // the task takes that same lock to unregister, so removal always
        // follows insertion.
        let handle = tokio::spawn(async move {
            let result = inner.lookup(&key, &artist, &album).await;
            inner.in_flight.lock().await.remove(&key);
            result
        });

        async move {
            handle
                .await
                .unwrap_or_else(|e| Err(ArtworkError::Task(e.to_string())))
        }
        .boxed()
        .shared()
    }
}

impl Inner {
    async fn lookup(&self, target_dir: &Path, artist: &str, album: &str) -> Result<CoverOutcome> {
        info!("Searching for cover art: {} - {}", artist, album);

        let Some(mbid) = self.search_release(artist, album).await? else {
            debug!("No MusicBrainz release found for {} - {}", artist, album);
            return Ok(CoverOutcome::NoMatch);
        };
        debug!(mbid = %mbid, "Found MusicBrainz release");

        let Some((bytes, content_type)) = self.fetch_front_cover(&mbid).await? else {
            debug!("No cover art available for release {}", mbid);
            return Ok(CoverOutcome::NotAvailable);
        };

        let path = target_dir.join(cover_filename(content_type.as_deref()));
        let write_path = path.clone();
        tokio::task::spawn_blocking(move || write_cover(&write_path, &bytes))
            .await
            .map_err(|e| ArtworkError::Task(e.to_string()))??;

        info!("Saved cover art to {}", path.display());
        Ok(CoverOutcome::Saved(path))
    }

    /// Best-scored release id, `None` when nothing matched
    async fn search_release(&self, artist: &str, album: &str) -> Result<Option<String>> {
        let url = format!("{}/release", self.musicbrainz_url);
        let query = format!(
            "artist:\"{}\" AND release:\"{}\"",
            escape_query(artist),
            escape_query(album)
        );

        let response = self
            .http
            .get(&url)
            .query(&[("query", query.as_str()), ("fmt", "json"), ("limit", "5")])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtworkError::Status {
                service: "MusicBrainz",
                status: status.as_u16(),
            });
        }

        let search: ReleaseSearch = response.json().await.map_err(|e| ArtworkError::Parse {
            service: "MusicBrainz",
            message: e.to_string(),
        })?;

        // max_by_key keeps the last of equal scores; reversing keeps the first
        Ok(search
            .releases
            .into_iter()
            .rev()
            .max_by_key(|release| release.score)
            .map(|release| release.id))
    }

    /// Front cover bytes and content type, `None` on 404
    async fn fetch_front_cover(&self, mbid: &str) -> Result<Option<(Vec<u8>, Option<String>)>> {
        let url = format!("{}/release/{}/front", self.cover_art_url, mbid);
        let response = self.http.get(&url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ArtworkError::Status {
                service: "Cover Art Archive",
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());
        let bytes = response.bytes().await?;

        Ok(Some((bytes.to_vec(), content_type)))
    }
}

/// First recognized cover file in `dir`
async fn existing_cover(dir: &Path) -> Option<PathBuf> {
    for name in COVER_FILENAMES {
        let candidate = dir.join(name);
        if tokio::fs::metadata(&candidate)
            .await
            .is_ok_and(|meta| meta.is_file())
        {
            return Some(candidate);
        }
    }
    None
}

fn cover_filename(content_type: Option<&str>) -> &'static str {
    let mime = content_type
        .and_then(|value| value.split(';').next())
        .map(str::trim);

    match mime {
        Some(mime) if mime.eq_ignore_ascii_case("image/png") => "cover.png",
        _ => "cover.jpg",
    }
}

// Lucene phrase syntax: quotes and backslashes must be escaped
fn escape_query(term: &str) -> String {
    term.replace('\\', "\\\\").replace('"', "\\\"")
}

fn write_cover(path: &Path, bytes: &[u8]) -> Result<()> {
    let write_err = |source: std::io::Error| ArtworkError::Write {
        path: path.to_path_buf(),
        source: Arc::new(source),
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = tempfile::Builder::new()
        .prefix(".cover.")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(write_err)?;
    temp.write_all(bytes).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;

    Ok(())
}
