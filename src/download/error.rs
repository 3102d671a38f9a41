//! Error types for the download module.
//!
//! [`DownloadError`] carries the context of a single failed attempt (URL,
//! path, status). [`FailureKind`] is the coarse, cloneable classification
//! that ends up in a job's terminal [`JobOutcome`](super::JobOutcome).

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while downloading one media file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset mid-body, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429 responses).
        retry_after: Option<String>,
    },

    /// HTTP 416 on a ranged request: the range starts at or past the end.
    #[error("HTTP 416 downloading {url}")]
    RangeNotSatisfiable {
        url: String,
        /// Resource length from `Content-Range: bytes */N`, when sent.
        total: Option<u64>,
    },

    /// File system error during download (create file, write, rename, etc.)
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Not enough free space on the output volume to start the job.
    #[error("insufficient disk space in {path}: {available_mb} MiB free, {required_mb} MiB required")]
    InsufficientSpace {
        /// Directory that was checked.
        path: PathBuf,
        /// Free space found, in MiB.
        available_mb: u64,
        /// Configured minimum, in MiB.
        required_mb: u64,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// The received content failed verification (size mismatch, empty body).
    #[error("corrupt download {path}: {reason}")]
    Corrupt {
        /// The partial file that failed verification.
        path: PathBuf,
        /// What did not match.
        reason: String,
    },

    /// The run was cancelled while the job was in flight.
    #[error("download of {url} cancelled")]
    Cancelled {
        /// The URL being fetched.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a 416 error carrying the length the server reported.
    pub fn range_not_satisfiable(url: impl Into<String>, total: Option<u64>) -> Self {
        Self::RangeNotSatisfiable {
            url: url.into(),
            total,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a verification failure.
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Maps this error onto the terminal failure classification.
    #[must_use]
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Network { .. } | Self::Timeout { .. } => FailureKind::Transient,
            Self::HttpStatus { status: 429, .. } => FailureKind::RateLimited,
            Self::HttpStatus {
                status: 404 | 410, ..
            } => FailureKind::NotFound,
            Self::HttpStatus { status, .. } if *status >= 500 || *status == 408 => {
                FailureKind::Transient
            }
            Self::HttpStatus { status, .. } => FailureKind::Http(*status),
            Self::RangeNotSatisfiable { .. } => FailureKind::Http(416),
            Self::Io { .. } | Self::InsufficientSpace { .. } => FailureKind::Filesystem,
            Self::InvalidUrl { .. } => FailureKind::Http(0),
            Self::Corrupt { .. } => FailureKind::Corrupt,
            Self::Cancelled { .. } => FailureKind::Cancelled,
        }
    }
}

/// Why a job ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network, timeout or 5xx; retries were exhausted.
    Transient,
    /// HTTP 429 kept coming back; the rate-limit budget was exhausted.
    RateLimited,
    /// HTTP 404 or 410; the file was deleted upstream.
    NotFound,
    /// Local I/O failure or not enough free space.
    Filesystem,
    /// Content failed verification after the one allowed restart.
    Corrupt,
    /// The run was cancelled before the job finished.
    Cancelled,
    /// Any other HTTP status (0 for an unusable URL).
    Http(u16),
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => write!(f, "transient network failure"),
            Self::RateLimited => write!(f, "rate limited"),
            Self::NotFound => write!(f, "not found"),
            Self::Filesystem => write!(f, "filesystem error"),
            Self::Corrupt => write!(f, "corrupt content"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Http(0) => write!(f, "invalid URL"),
            Self::Http(status) => write!(f, "HTTP {status}"),
        }
    }
}

// No `From<reqwest::Error>` / `From<std::io::Error>`: every variant needs a
// URL or path the source error does not carry. Use the helper constructors.

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_download_error_timeout_display() {
        let error = DownloadError::timeout("https://i.4cdn.org/g/1.jpg");
        assert!(error.to_string().contains("timeout"));
        assert!(error.to_string().contains("https://i.4cdn.org/g/1.jpg"));
    }

    #[test]
    fn test_download_error_http_status_display() {
        let error = DownloadError::http_status("https://i.4cdn.org/g/1.jpg", 404);
        let msg = error.to_string();
        assert!(msg.contains("404"), "Expected '404' in: {msg}");
        assert!(msg.contains("https://i.4cdn.org/g/1.jpg"));
    }

    #[test]
    fn test_download_error_io_display() {
        let error = DownloadError::io(
            "/tmp/g-1/1.jpg.part",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(error.to_string().contains("/tmp/g-1/1.jpg.part"));
    }

    #[test]
    fn test_download_error_corrupt_display() {
        let error = DownloadError::corrupt("/tmp/1.webm.part", "expected 10 bytes, got 7");
        let msg = error.to_string();
        assert!(msg.contains("corrupt"));
        assert!(msg.contains("expected 10 bytes, got 7"));
    }

    #[test]
    fn test_failure_kind_mapping_http() {
        let url = "https://i.4cdn.org/g/1.jpg";
        assert_eq!(
            DownloadError::http_status(url, 404).failure_kind(),
            FailureKind::NotFound
        );
        assert_eq!(
            DownloadError::http_status(url, 410).failure_kind(),
            FailureKind::NotFound
        );
        assert_eq!(
            DownloadError::http_status(url, 429).failure_kind(),
            FailureKind::RateLimited
        );
        assert_eq!(
            DownloadError::http_status(url, 503).failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            DownloadError::http_status(url, 403).failure_kind(),
            FailureKind::Http(403)
        );
    }

    #[test]
    fn test_failure_kind_mapping_local() {
        assert_eq!(
            DownloadError::timeout("u").failure_kind(),
            FailureKind::Transient
        );
        assert_eq!(
            DownloadError::cancelled("u").failure_kind(),
            FailureKind::Cancelled
        );
        assert_eq!(
            DownloadError::corrupt("p", "empty body").failure_kind(),
            FailureKind::Corrupt
        );
        let space = DownloadError::InsufficientSpace {
            path: PathBuf::from("/out"),
            available_mb: 5,
            required_mb: 100,
        };
        assert_eq!(space.failure_kind(), FailureKind::Filesystem);
    }

    #[test]
    fn test_failure_kind_display() {
        assert_eq!(FailureKind::Http(403).to_string(), "HTTP 403");
        assert_eq!(FailureKind::NotFound.to_string(), "not found");
    }
}
