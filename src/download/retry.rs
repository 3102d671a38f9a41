//! Retry budgets and failure classification for media and API requests.
//!
//! This module provides [`RetryPolicy`], [`AttemptBudget`] and
//! [`FailureType`] for deciding whether a failed request is worth repeating.
//!
//! # Overview
//!
//! When a request fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - network errors, timeouts, 5xx
//! - [`FailureType::RateLimited`] - HTTP 429
//! - [`FailureType::Permanent`] - 404/410, other 4xx, local errors
//!
//! Transient failures and rate-limit responses draw from separate budgets,
//! so a burst of 429s does not eat the attempts reserved for flaky networks.
//! No delay is computed here: pacing belongs to the shared
//! [`RateLimiter`](super::RateLimiter), which every retry goes back through.
//!
//! # Example
//!
//! ```
//! use chanfetch_core::download::{
//!     DownloadError, RetryPolicy, RetryDecision, classify_error
//! };
//!
//! let policy = RetryPolicy::default();
//! let mut budget = policy.budget();
//! let error = DownloadError::http_status("https://i.4cdn.org/g/1.jpg", 503);
//!
//! match budget.on_failure(classify_error(&error)) {
//!     RetryDecision::Retry { attempt } => println!("starting attempt {attempt}"),
//!     RetryDecision::DoNotRetry { reason } => println!("giving up: {reason}"),
//! }
//! ```

use std::time::Duration;

use tracing::{debug, instrument};

use super::rate_limiter::parse_retry_after;
use super::{DownloadError, RequestOutcome};

/// Default maximum attempts for transient failures (initial attempt included).
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default number of 429 responses tolerated per request.
pub const DEFAULT_MAX_RATE_LIMITED_ATTEMPTS: u32 = 5;

/// Classification of request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: network timeout, 5xx server errors, connection reset.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, 410 Gone, invalid URL, disk errors.
    Permanent,

    /// Server rate limiting (HTTP 429).
    RateLimited,
}

/// Decision on whether to retry a failed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again.
    Retry {
        /// Which attempt number this will be (1-indexed, so the first retry is attempt 2).
        attempt: u32,
    },

    /// Give up.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Attempt limits for one request.
///
/// # Default Values
///
/// - `max_attempts`: 3
/// - `max_rate_limited_attempts`: 5
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts for transient failures (including the initial attempt).
    max_attempts: u32,

    /// Maximum number of 429 responses before giving up.
    max_rate_limited_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            max_rate_limited_attempts: DEFAULT_MAX_RATE_LIMITED_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. Both limits are clamped to at least 1.
    #[must_use]
    pub fn new(max_attempts: u32, max_rate_limited_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            max_rate_limited_attempts: max_rate_limited_attempts.max(1),
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for the rest.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn max_rate_limited_attempts(&self) -> u32 {
        self.max_rate_limited_attempts
    }

    /// Starts a fresh budget for one request.
    #[must_use]
    pub fn budget(&self) -> AttemptBudget {
        AttemptBudget {
            policy: *self,
            attempt: 1,
            transient_failures: 0,
            rate_limited_failures: 0,
        }
    }
}

/// Per-request attempt counter drawn against a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct AttemptBudget {
    policy: RetryPolicy,
    attempt: u32,
    transient_failures: u32,
    rate_limited_failures: u32,
}

impl AttemptBudget {
    /// The attempt currently in progress (1-indexed).
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Records a failure of the current attempt and decides what happens next.
    #[instrument(level = "debug", skip(self), fields(attempt = self.attempt))]
    pub fn on_failure(&mut self, failure_type: FailureType) -> RetryDecision {
        match failure_type {
            FailureType::Permanent => {
                return RetryDecision::DoNotRetry {
                    reason: "permanent failure - retry would not help".to_string(),
                };
            }
            FailureType::Transient => {
                self.transient_failures += 1;
                if self.transient_failures >= self.policy.max_attempts {
                    debug!(max = self.policy.max_attempts, "max attempts reached");
                    return RetryDecision::DoNotRetry {
                        reason: format!("max attempts ({}) exhausted", self.policy.max_attempts),
                    };
                }
            }
            FailureType::RateLimited => {
                self.rate_limited_failures += 1;
                if self.rate_limited_failures >= self.policy.max_rate_limited_attempts {
                    debug!(
                        max = self.policy.max_rate_limited_attempts,
                        "rate limit budget exhausted"
                    );
                    return RetryDecision::DoNotRetry {
                        reason: format!(
                            "rate limited {} times - budget exhausted",
                            self.rate_limited_failures
                        ),
                    };
                }
            }
        }

        self.attempt += 1;
        debug!(next_attempt = self.attempt, "will retry");
        RetryDecision::Retry {
            attempt: self.attempt,
        }
    }
}

/// Classifies a download error into a failure type for retry decisions.
///
/// # HTTP Status Code Classification
///
/// | Status | Type | Rationale |
/// |--------|------|-----------|
/// | 404 | Permanent | Not found - file deleted upstream |
/// | 408 | Transient | Request timeout - may succeed |
/// | 410 | Permanent | Gone - permanently removed |
/// | 429 | RateLimited | Rate limited - retry through the limiter |
/// | other 4xx | Permanent | Won't succeed on retry |
/// | 5xx | Transient | Server error - may be temporary |
///
/// # Non-HTTP Errors
///
/// | Error | Type | Rationale |
/// |-------|------|-----------|
/// | Timeout | Transient | Network may recover |
/// | Network (most) | Transient | Server may come back |
/// | Network (TLS) | Permanent | Certificate/config issue |
/// | IO, InsufficientSpace | Permanent | Local file system issue |
/// | InvalidUrl | Permanent | Won't succeed |
/// | RangeNotSatisfiable | Permanent | The runner decides what the partial is worth |
/// | Corrupt | Permanent | Restart is handled by the runner itself |
/// | Cancelled | Permanent | The run is shutting down |
#[instrument]
pub fn classify_error(error: &DownloadError) -> FailureType {
    match error {
        DownloadError::HttpStatus { status, .. } => classify_http_status(*status),

        DownloadError::Timeout { .. } => FailureType::Transient,

        DownloadError::Network { source, .. } => {
            if is_tls_error(source) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }

        DownloadError::RangeNotSatisfiable { .. }
        | DownloadError::Io { .. }
        | DownloadError::InsufficientSpace { .. }
        | DownloadError::InvalidUrl { .. }
        | DownloadError::Corrupt { .. }
        | DownloadError::Cancelled { .. } => FailureType::Permanent,
    }
}

/// Classifies an HTTP status code into a failure type.
///
/// Explicit match arms are used for each status code for documentation purposes,
/// even though some return the same value.
#[allow(clippy::match_same_arms)]
pub(crate) fn classify_http_status(status: u16) -> FailureType {
    match status {
        404 => FailureType::Permanent,   // Not Found
        408 => FailureType::Transient,   // Request Timeout
        410 => FailureType::Permanent,   // Gone
        429 => FailureType::RateLimited, // Too Many Requests

        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,

        // Anything else is unexpected, treat as permanent
        _ => FailureType::Permanent,
    }
}

/// Maps a failed attempt onto the outcome reported to the rate limiter.
///
/// Only upstream pushback counts. Local failures and plain 4xx say nothing
/// about server load and return `None`.
#[must_use]
pub fn limiter_outcome(error: &DownloadError) -> Option<RequestOutcome> {
    match error {
        DownloadError::HttpStatus { status: 429, .. } => Some(RequestOutcome::RateLimited),
        DownloadError::HttpStatus { status, .. } if *status >= 500 => {
            Some(RequestOutcome::ServerError)
        }
        DownloadError::Timeout { .. } | DownloadError::Network { .. } => {
            Some(RequestOutcome::ServerError)
        }
        _ => None,
    }
}

/// Server-mandated wait carried by a 429 response, if any.
///
/// This is waited in addition to the limiter's own escalated interval.
#[must_use]
pub fn retry_after_delay(error: &DownloadError) -> Option<Duration> {
    let DownloadError::HttpStatus {
        status: 429,
        retry_after: Some(header),
        ..
    } = error
    else {
        return None;
    };
    let delay = parse_retry_after(header)?;
    debug!(retry_after = %header, delay_ms = delay.as_millis(), "server sent Retry-After");
    Some(delay)
}

/// Checks if a reqwest error is a TLS/certificate error.
fn is_tls_error(error: &reqwest::Error) -> bool {
    let error_string = error.to_string().to_lowercase();
    error_string.contains("certificate")
        || error_string.contains("tls")
        || error_string.contains("ssl")
        || error_string.contains("handshake")
}
