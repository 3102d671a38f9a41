//! Downloadable media references extracted from thread metadata.

use std::fmt;
use std::sync::Arc;

use crate::target::Target;

/// Default host for the read-only JSON API.
pub const DEFAULT_API_BASE: &str = "https://a.4cdn.org";

/// Default host serving original, full-quality media files.
pub const DEFAULT_CDN_BASE: &str = "https://i.4cdn.org";

/// Extensions classified as video. Video files land in the `WEBM/` subfolder.
const VIDEO_EXTENSIONS: &[&str] = &[".webm", ".mp4", ".mov", ".avi", ".mkv"];

/// Extensions classified as still images.
const IMAGE_EXTENSIONS: &[&str] = &[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp"];

/// Coarse media classification derived from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Image,
    Document,
}

impl MediaKind {
    /// Classifies a file extension (with or without leading dot, any case).
    ///
    /// ```
    /// use chanfetch_core::MediaKind;
    ///
    /// assert_eq!(MediaKind::from_extension(".WEBM"), MediaKind::Video);
    /// assert_eq!(MediaKind::from_extension("png"), MediaKind::Image);
    /// assert_eq!(MediaKind::from_extension(".pdf"), MediaKind::Document);
    /// ```
    #[must_use]
    pub fn from_extension(extension: &str) -> Self {
        let normalized = format!(".{}", extension.trim_start_matches('.').to_ascii_lowercase());
        if VIDEO_EXTENSIONS.contains(&normalized.as_str()) {
            Self::Video
        } else if IMAGE_EXTENSIONS.contains(&normalized.as_str()) {
            Self::Image
        } else {
            Self::Document
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Image => write!(f, "image"),
            Self::Document => write!(f, "document"),
        }
    }
}

/// Base URLs of the metadata API and the media CDN.
///
/// Configurable so tests can point the engine at a local mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaUrls {
    api_base: String,
    cdn_base: String,
}

impl Default for MediaUrls {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE, DEFAULT_CDN_BASE)
    }
}

impl MediaUrls {
    /// Creates a URL set; trailing slashes are ignored.
    #[must_use]
    pub fn new(api_base: impl Into<String>, cdn_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            cdn_base: cdn_base.into().trim_end_matches('/').to_string(),
        }
    }

    /// `<api>/<board>/thread/<id>.json`
    #[must_use]
    pub fn thread_url(&self, board: &str, id: u64) -> String {
        format!("{}/{board}/thread/{id}.json", self.api_base)
    }

    /// `<api>/<board>/catalog.json`
    #[must_use]
    pub fn catalog_url(&self, board: &str) -> String {
        format!("{}/{board}/catalog.json", self.api_base)
    }

    /// `<cdn>/<board>/<tim><ext>`
    #[must_use]
    pub fn media_url(&self, board: &str, file_id: u64, extension: &str) -> String {
        format!("{}/{board}/{file_id}{extension}", self.cdn_base)
    }
}

/// One downloadable asset.
///
/// Items are immutable. `index` is 1-based, assigned per target in post
/// order, and drives collision-free naming in the path planner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    /// Full CDN URL of the original file.
    pub remote_url: String,
    /// Planned file name before disambiguation: `<index><extension>`.
    pub suggested_filename: String,
    /// Uploader's original file name, kept for logs.
    pub original_filename: Option<String>,
    /// Per-target sequential index (1-based).
    pub index: usize,
    /// Lowercase extension including the leading dot.
    pub extension: String,
    /// Size reported by the API, when present.
    pub expected_size: Option<u64>,
    /// Upstream digest reported by the API (base64 MD5), when present.
    pub upstream_digest: Option<String>,
    pub kind: MediaKind,
    pub target: Arc<Target>,
}
