//! Path template parser and resolver for library organization
//!
//! Supports templates like `{AlbumArtist}/{Album}/{TrackNo} - {Title}` with
//! fallbacks, configurable replacements and sanitization for filesystem safety.
//!
//! # Available Placeholders
//!
//! | Placeholder | Description | Fallback |
//! |-------------|-------------|----------|
//! | `{Artist}` | Track artist | "Unknown Artist" |
//! | `{AlbumArtist}` | Album artist | Falls back to `{Artist}` |
//! | `{Album}` | Album title | "Unknown Album" |
//! | `{Title}` | Track title | Filename without extension |
//! | `{TrackNo}` | Track number (zero-padded) | "00" |
//! | `{DiscNo}` | Disc number | "1" |
//! | `{Year}` | Release year | "0000" |
//! | `{Genre}` | Primary genre | "Unknown" |
//!
//! Unknown placeholders are kept verbatim.

use crate::metadata::ExtractedMetadata;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default path template
pub const DEFAULT_TEMPLATE: &str = "{AlbumArtist}/{Album}/{TrackNo} - {Title}";

/// Path template resolver
#[derive(Debug, Clone)]
pub struct PathTemplate {
    /// The template string with placeholders
    template: String,
    /// Whether to add disc subfolder for multi-disc albums
    add_disc_folder: bool,
    /// Substring replacements applied to every path component
    replacements: BTreeMap<String, String>,
    /// Whether to lower-case the resolved path
    lowercase: bool,
}

impl Default for PathTemplate {
    fn default() -> Self {
        Self::new(DEFAULT_TEMPLATE)
    }
}

impl PathTemplate {
    /// Create a new path template
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            add_disc_folder: true,
            replacements: BTreeMap::new(),
            lowercase: false,
        }
    }

    /// Set whether to add disc subfolder for multi-disc albums
    pub fn with_disc_folder(mut self, add_disc_folder: bool) -> Self {
        self.add_disc_folder = add_disc_folder;
        self
    }

    /// Set substring replacements, applied in key order
    pub fn with_replacements(mut self, replacements: BTreeMap<String, String>) -> Self {
        self.replacements = replacements;
        self
    }

    /// Set whether the resolved path is lower-cased
    pub fn with_lowercase(mut self, lowercase: bool) -> Self {
        self.lowercase = lowercase;
        self
    }

    /// Get the template string
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Resolve the template to a path relative to the library root
    ///
    /// `source_path` supplies the extension and the title fallback.
    pub fn resolve(&self, metadata: &ExtractedMetadata, source_path: &Path) -> PathBuf {
        let mut components: Vec<String> = self
            .template
            .split('/')
            .filter(|part| !part.is_empty())
            .map(|part| render(part, |name| placeholder_value(name, metadata, source_path)))
            .collect();

        if components.is_empty() {
            components.push(title_or_stem(metadata, source_path));
        }

        if self.add_disc_folder && metadata.is_multi_disc() {
            let disc = format!("Disc {}", metadata.disc_number.unwrap_or(1));
            components.insert(components.len() - 1, disc);
        }

        if let Some(ext) = source_path.extension().and_then(|ext| ext.to_str()) {
            if let Some(file) = components.last_mut() {
                file.push('.');
                file.push_str(ext);
            }
        }

        components
            .iter()
            .map(|component| {
                let mut value = component.clone();
                for (from, to) in &self.replacements {
                    if !from.is_empty() {
                        value = value.replace(from.as_str(), to);
                    }
                }
                if self.lowercase {
                    value = value.to_lowercase();
                }
                sanitize_path_component(&value)
            })
            .collect()
    }
}

/// Replace `{Name}` placeholders in one template component
fn render<F>(part: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(part.len());
    let mut rest = part;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(name);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);

    out
}

fn placeholder_value(name: &str, metadata: &ExtractedMetadata, source_path: &Path) -> Option<String> {
    let value = match name {
        "Artist" => metadata
            .artist
            .clone()
            .unwrap_or_else(|| "Unknown Artist".to_string()),
        "AlbumArtist" => metadata
            .album_artist_or_artist()
            .unwrap_or("Unknown Artist")
            .to_string(),
        "Album" => metadata
            .album
            .clone()
            .unwrap_or_else(|| "Unknown Album".to_string()),
        "Title" => title_or_stem(metadata, source_path),
        "TrackNo" => metadata
            .track_number
            .map_or_else(|| "00".to_string(), |n| format!("{:02}", n)),
        "DiscNo" => metadata.disc_number.unwrap_or(1).to_string(),
        "Year" => metadata
            .year
            .map_or_else(|| "0000".to_string(), |y| y.to_string()),
        "Genre" => metadata
            .genres
            .first()
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string()),
        _ => return None,
    };
    Some(value)
}

fn title_or_stem(metadata: &ExtractedMetadata, source_path: &Path) -> String {
    metadata.title.clone().unwrap_or_else(|| {
        source_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("Unknown")
            .to_string()
    })
}

/// Sanitize a single path component for filesystem safety
///
/// Removes/replaces characters that are invalid on common filesystems
pub fn sanitize_path_component(s: &str) -> String {
    let sanitized: String = s
        .chars()
        .map(|c| match c {
            // Invalid on Windows: < > : " / \ | ? *
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // Trim whitespace and dots (Windows doesn't like trailing dots)
    let trimmed = sanitized.trim().trim_end_matches('.');

    let reserved = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];

    let upper = trimmed.to_uppercase();
    if reserved.contains(&upper.as_str()) {
        format!("_{}", trimmed)
    } else if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}
