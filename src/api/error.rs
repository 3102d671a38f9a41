//! Error types for the metadata API.

use thiserror::Error;

/// Errors from fetching or interpreting board API documents.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Network failures, timeouts or 5xx responses outlasted the retry budget.
    #[error("API unavailable for {url} after {attempts} attempts: {message}")]
    Transient {
        url: String,
        attempts: u32,
        message: String,
    },

    /// The server kept answering 429 until the rate-limit budget ran out.
    #[error("rate limited by API at {url} ({attempts} attempts)")]
    RateLimited { url: String, attempts: u32 },

    /// 404 or 410: the thread or board no longer exists.
    #[error("not found: {url}")]
    NotFound { url: String },

    /// The document could not be parsed or has an unexpected shape.
    #[error("malformed API response: {reason}")]
    Malformed { reason: String },

    /// Any other HTTP error status. Not retried.
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },
}

impl ApiError {
    /// Creates a `Malformed` error.
    #[must_use]
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }

    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound { url: url.into() }
    }

    /// Returns `true` for 404/410.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::Transient {
            url: "https://a.4cdn.org/g/thread/1.json".to_string(),
            attempts: 3,
            message: "HTTP 503".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "API unavailable for https://a.4cdn.org/g/thread/1.json after 3 attempts: HTTP 503"
        );
        assert_eq!(
            ApiError::malformed("missing posts").to_string(),
            "malformed API response: missing posts"
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(ApiError::not_found("u").is_not_found());
        assert!(!ApiError::malformed("x").is_not_found());
    }
}
