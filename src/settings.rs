//! Session configuration.
//!
//! [`Settings`] is a plain struct with defaults. The CLI maps its flags onto
//! it; library users build it directly.

use std::path::PathBuf;
use std::time::Duration;

use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_DECAY_STREAK, DEFAULT_MAX_DELAY, DEFAULT_MIN_DELAY,
    DEFAULT_MIN_FREE_SPACE_MB, DEFAULT_SERVER_ERROR_THRESHOLD, READ_TIMEOUT_SECS,
};
use crate::download::rate_limiter::RateLimiterConfig;
use crate::download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RATE_LIMITED_ATTEMPTS, DEFAULT_MAX_RETRIES, RetryPolicy,
};
use crate::media::{DEFAULT_API_BASE, DEFAULT_CDN_BASE, MediaUrls};
use crate::target::TargetKind;

/// Threads fetched when expanding a catalog target.
pub const DEFAULT_CATALOG_THREAD_LIMIT: usize = 10;

/// Threads fetched when expanding a board target.
pub const DEFAULT_BOARD_THREAD_LIMIT: usize = 5;

/// Ledger location relative to the output directory.
const LEDGER_RELATIVE_PATH: &str = ".chanfetch/ledger.db";

/// Everything a session needs to know before it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Root of the archive.
    pub output_dir: PathBuf,
    /// Ledger database; `None` means `<output_dir>/.chanfetch/ledger.db`.
    pub ledger_path: Option<PathBuf>,
    /// Concurrent download workers (1..=100).
    pub concurrency: usize,
    /// Attempts per request for transient failures.
    pub max_attempts: u32,
    /// 429 responses tolerated per request.
    pub max_rate_limited_attempts: u32,
    /// Minimum interval between any two requests. Zero disables pacing.
    pub min_delay: Duration,
    /// Cap for the escalated interval.
    pub max_delay: Duration,
    /// Successes needed to step the interval back down.
    pub decay_streak: u32,
    /// Threads fetched when expanding a catalog or board; `None` uses the
    /// per-kind default, `Some(0)` disables expansion.
    pub catalog_thread_limit: Option<usize>,
    /// Free space required on the output volume before each job, in MiB.
    pub min_free_space_mb: u64,
    pub api_base: String,
    pub cdn_base: String,
    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("downloads"),
            ledger_path: None,
            concurrency: DEFAULT_CONCURRENCY,
            max_attempts: DEFAULT_MAX_RETRIES,
            max_rate_limited_attempts: DEFAULT_MAX_RATE_LIMITED_ATTEMPTS,
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            decay_streak: DEFAULT_DECAY_STREAK,
            catalog_thread_limit: None,
            min_free_space_mb: DEFAULT_MIN_FREE_SPACE_MB,
            api_base: DEFAULT_API_BASE.to_string(),
            cdn_base: DEFAULT_CDN_BASE.to_string(),
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
        }
    }
}

impl Settings {
    /// Settings writing into `output_dir`, defaults elsewhere.
    #[must_use]
    pub fn with_output_dir(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }

    /// Effective ledger path.
    #[must_use]
    pub fn ledger_path(&self) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| self.output_dir.join(LEDGER_RELATIVE_PATH))
    }

    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.max_rate_limited_attempts)
    }

    #[must_use]
    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        RateLimiterConfig {
            min_delay: self.min_delay,
            max_delay: self.max_delay.max(self.min_delay),
            decay_streak: self.decay_streak.max(1),
            server_error_threshold: DEFAULT_SERVER_ERROR_THRESHOLD,
        }
    }

    #[must_use]
    pub fn media_urls(&self) -> MediaUrls {
        MediaUrls::new(&self.api_base, &self.cdn_base)
    }

    /// Threads to expand for a target of `kind`. Always 0 for threads.
    #[must_use]
    pub fn thread_limit_for(&self, kind: TargetKind) -> usize {
        match kind {
            TargetKind::Thread => 0,
            TargetKind::Catalog => self
                .catalog_thread_limit
                .unwrap_or(DEFAULT_CATALOG_THREAD_LIMIT),
            TargetKind::Board => self.catalog_thread_limit.unwrap_or(DEFAULT_BOARD_THREAD_LIMIT),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.concurrency, 5);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.max_rate_limited_attempts, 5);
        assert_eq!(settings.min_delay, Duration::from_secs(1));
        assert_eq!(settings.max_delay, Duration::from_secs(60));
        assert_eq!(settings.min_free_space_mb, 100);
    }

    #[test]
    fn test_ledger_path_defaults_under_output_dir() {
        let settings = Settings::with_output_dir("/archive");
        assert_eq!(
            settings.ledger_path(),
            PathBuf::from("/archive/.chanfetch/ledger.db")
        );

        let custom = Settings {
            ledger_path: Some(PathBuf::from("/var/ledger.db")),
            ..settings
        };
        assert_eq!(custom.ledger_path(), PathBuf::from("/var/ledger.db"));
    }

    #[test]
    fn test_thread_limits_per_kind() {
        let settings = Settings::default();
        assert_eq!(settings.thread_limit_for(TargetKind::Catalog), 10);
        assert_eq!(settings.thread_limit_for(TargetKind::Board), 5);
        assert_eq!(settings.thread_limit_for(TargetKind::Thread), 0);

        let disabled = Settings {
            catalog_thread_limit: Some(0),
            ..Settings::default()
        };
        assert_eq!(disabled.thread_limit_for(TargetKind::Board), 0);
    }

    #[test]
    fn test_rate_limiter_config_keeps_max_above_min() {
        let settings = Settings {
            min_delay: Duration::from_secs(90),
            ..Settings::default()
        };
        let config = settings.rate_limiter_config();
        assert_eq!(config.max_delay, Duration::from_secs(90));
    }
}
