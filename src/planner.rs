//! Deterministic output paths for media items.
//!
//! Layout: `<root>/<target folder>/[WEBM/]<index><ext>`. Every segment is
//! sanitized by substitution and never truncated, so the same item always
//! maps to the same relative path. [`PathPlanner::resolve`] adds a `_N`
//! suffix when the planned final file already exists on disk.

use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::media::{MediaItem, MediaKind};

/// Subfolder receiving video files.
const VIDEO_SUBFOLDER: &str = "WEBM";

/// Suffix appended to in-progress downloads.
const PARTIAL_SUFFIX: &str = ".part";

/// Device names Windows refuses as file stems, in any case and with any extension.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Plans where each media item lands under an output root.
#[derive(Debug, Clone)]
pub struct PathPlanner {
    root: PathBuf,
}

impl PathPlanner {
    /// Creates a planner for `root`, made absolute against the working directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = std::path::absolute(&root).unwrap_or(root);
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative path for `item`: `<folder>/[WEBM/]<index><ext>`.
    ///
    /// ```
    /// # use std::sync::Arc;
    /// # use chanfetch_core::{MediaItem, MediaKind, PathPlanner, Target};
    /// let item = MediaItem {
    ///     remote_url: "https://i.4cdn.org/g/1700000000001.webm".into(),
    ///     suggested_filename: "3.webm".into(),
    ///     original_filename: None,
    ///     index: 3,
    ///     extension: ".webm".into(),
    ///     expected_size: None,
    ///     upstream_digest: None,
    ///     kind: MediaKind::Video,
    ///     target: Arc::new(Target::thread("g", 12345678)),
    /// };
    /// let planned = PathPlanner::plan(&item);
    /// assert_eq!(planned, std::path::Path::new("g-12345678/WEBM/3.webm"));
    /// ```
    #[must_use]
    pub fn plan(item: &MediaItem) -> PathBuf {
        let mut path = PathBuf::from(sanitize_segment(&item.target.folder_name()));
        if item.kind == MediaKind::Video {
            path.push(VIDEO_SUBFOLDER);
        }
        path.push(sanitize_segment(&format!("{}{}", item.index, item.extension)));
        path
    }

    /// `plan(item)` under the root, without disambiguation.
    #[must_use]
    pub fn planned_path(&self, item: &MediaItem) -> PathBuf {
        self.root.join(Self::plan(item))
    }

    /// Absolute final path for `item`, disambiguated against existing files.
    ///
    /// If the planned file exists, `_2`, `_3`, ... is inserted before the
    /// extension until a free name is found. A `.part` sibling does not
    /// count as existing; it is resumed instead.
    #[must_use]
    pub fn resolve(&self, item: &MediaItem) -> PathBuf {
        let planned = self.planned_path(item);
        if !planned.exists() {
            return planned;
        }

        let dir = planned.parent().map(Path::to_path_buf).unwrap_or_default();
        let file_name = planned
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let (stem, ext) = match file_name.rfind('.') {
            Some(pos) if pos > 0 => (&file_name[..pos], &file_name[pos..]),
            _ => (file_name.as_str(), ""),
        };

        let mut suffix = 2usize;
        loop {
            let candidate = dir.join(format!("{stem}_{suffix}{ext}"));
            if !candidate.exists() {
                debug!(planned = %planned.display(), resolved = %candidate.display(), "planned path taken");
                return candidate;
            }
            suffix += 1;
        }
    }

    /// `<path>.part`
    #[must_use]
    pub fn partial_path(path: &Path) -> PathBuf {
        let mut name = path.as_os_str().to_owned();
        name.push(PARTIAL_SUFFIX);
        PathBuf::from(name)
    }
}

/// Makes one path segment safe on common filesystems.
///
/// Replaces `/ \ : * ? " < > |` and control characters with `_`, prefixes
/// Windows device names with `_`, and maps empty or dot-only segments to
/// underscores. Never shortens the input.
#[must_use]
pub fn sanitize_segment(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if sanitized.is_empty() {
        return "_".to_string();
    }

    if !is_normal_segment(&sanitized) {
        return sanitized.replace('.', "_");
    }

    let stem = sanitized.split('.').next().unwrap_or_default();
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(stem))
    {
        return format!("_{sanitized}");
    }

    sanitized
}

fn is_normal_segment(name: &str) -> bool {
    Path::new(name)
        .components()
        .all(|component| matches!(component, Component::Normal(_)))
}
