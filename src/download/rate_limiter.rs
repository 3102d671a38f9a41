//! Process-wide adaptive rate limiting for API and media requests.
//!
//! This module provides the [`RateLimiter`] struct which serializes every
//! outbound request of the process through one gate and enforces a minimum
//! interval between any two granted requests, across all workers.
//!
//! # Overview
//!
//! The interval starts at `D_min`. Rate-limit responses (HTTP 429) and
//! repeated server errors escalate it by doubling, capped at `D_max`. A
//! streak of successes decays it one step back toward `D_min`. The current
//! interval is always `min(D_min * 2^level, D_max)`, see
//! [`RateLimiter::backoff_delay`].
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chanfetch_core::download::{RateLimiter, RequestOutcome};
//!
//! # async fn example() {
//! let limiter = Arc::new(RateLimiter::new(Duration::from_secs(1)));
//!
//! // First request proceeds immediately
//! limiter.acquire().await;
//! limiter.report_outcome(RequestOutcome::RateLimited);
//!
//! // Next request waits for the doubled interval
//! limiter.acquire().await;
//! assert_eq!(limiter.current_delay(), Duration::from_secs(2));
//! # }
//! ```

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::constants::{
    CUMULATIVE_DELAY_WARNING_THRESHOLD, DEFAULT_DECAY_STREAK, DEFAULT_MAX_DELAY,
    DEFAULT_MIN_DELAY, DEFAULT_SERVER_ERROR_THRESHOLD, MAX_RETRY_AFTER,
};

/// Escalation levels beyond this are always capped at `max_delay`.
const MAX_LEVEL: u32 = 32;

/// Outcome of one request, as reported back to the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The server answered normally.
    Success,
    /// The server answered HTTP 429.
    RateLimited,
    /// 5xx, timeout or connection failure.
    ServerError,
}

/// Tuning knobs for [`RateLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Baseline interval between grants (`D_min`).
    pub min_delay: Duration,
    /// Cap for the escalated interval (`D_max`).
    pub max_delay: Duration,
    /// Successes in a row needed to decay by one step.
    pub decay_streak: u32,
    /// Server errors in a row needed to escalate by one step.
    pub server_error_threshold: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            min_delay: DEFAULT_MIN_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            decay_streak: DEFAULT_DECAY_STREAK,
            server_error_threshold: DEFAULT_SERVER_ERROR_THRESHOLD,
        }
    }
}

/// Process-wide request gate with adaptive backoff.
///
/// Designed to be wrapped in `Arc` and shared by the API client and every
/// download worker. [`acquire`](Self::acquire) holds an async mutex across
/// its sleep, so callers are granted one at a time and the effective request
/// cadence of the whole process respects the interval.
///
/// The limiter never fails; it only delays.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimiterConfig,

    /// Whether sleeping is disabled (for `--rate-limit 0` and tests).
    /// Outcome bookkeeping still happens so backoff stays observable.
    disabled: bool,

    /// Time of the last granted request. `None` until the first grant.
    /// Held across the sleep in `acquire`, which serializes all callers.
    gate: tokio::sync::Mutex<Option<Instant>>,

    /// Backoff state, updated by `report_outcome` without waiting on the gate.
    state: Mutex<BackoffState>,
}

#[derive(Debug, Default)]
struct BackoffState {
    /// Escalation level; the interval is `min(D_min * 2^level, D_max)`.
    level: u32,
    /// Failures since the last success.
    consecutive_failures: u32,
    /// Server errors since the last success or escalation.
    server_error_streak: u32,
    /// Successes since the last failure or decay step.
    success_streak: u32,
    /// Total time spent sleeping in `acquire`.
    cumulative_delay: Duration,
}

impl RateLimiter {
    /// Creates a limiter with the given `D_min` and default remaining knobs.
    #[must_use]
    #[instrument(skip_all, fields(delay_ms = min_delay.as_millis()))]
    pub fn new(min_delay: Duration) -> Self {
        Self::with_config(RateLimiterConfig {
            min_delay,
            max_delay: DEFAULT_MAX_DELAY.max(min_delay),
            ..RateLimiterConfig::default()
        })
    }

    /// Creates a limiter from an explicit configuration.
    #[must_use]
    pub fn with_config(config: RateLimiterConfig) -> Self {
        debug!(
            min_ms = config.min_delay.as_millis(),
            max_ms = config.max_delay.as_millis(),
            "creating rate limiter"
        );
        Self {
            config,
            disabled: false,
            gate: tokio::sync::Mutex::new(None),
            state: Mutex::new(BackoffState::default()),
        }
    }

    /// Creates a limiter that never sleeps but still tracks backoff state.
    #[must_use]
    pub fn disabled() -> Self {
        debug!("creating disabled rate limiter");
        Self {
            disabled: true,
            ..Self::with_config(RateLimiterConfig::default())
        }
    }

    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    /// Baseline interval (`D_min`).
    #[must_use]
    pub fn min_delay(&self) -> Duration {
        self.config.min_delay
    }

    /// Cap for the interval (`D_max`).
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        self.config.max_delay
    }

    /// Interval currently enforced between grants.
    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.backoff_delay(self.lock_state().level)
    }

    /// Failures reported since the last success.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.lock_state().consecutive_failures
    }

    /// Computes `min(D_min * 2^failures, D_max)`.
    ///
    /// ```
    /// use std::time::Duration;
    /// use chanfetch_core::download::RateLimiter;
    ///
    /// let limiter = RateLimiter::new(Duration::from_secs(1));
    /// assert_eq!(limiter.backoff_delay(0), Duration::from_secs(1));
    /// assert_eq!(limiter.backoff_delay(3), Duration::from_secs(8));
    /// assert_eq!(limiter.backoff_delay(40), limiter.max_delay());
    /// ```
    #[must_use]
    pub fn backoff_delay(&self, failures: u32) -> Duration {
        2u32.checked_pow(failures)
            .and_then(|factor| self.config.min_delay.checked_mul(factor))
            .map_or(self.config.max_delay, |delay| delay.min(self.config.max_delay))
    }

    /// Waits until the current interval has elapsed since the last grant,
    /// then records this grant.
    ///
    /// The first request proceeds immediately. If the interval grows while a
    /// caller is waiting, the caller keeps waiting for the larger interval.
    /// Returns the interval in force when the grant was made (zero when
    /// disabled).
    #[instrument(level = "trace", skip(self))]
    pub async fn acquire(&self) -> Duration {
        let mut last_grant = self.gate.lock().await;

        if self.disabled {
            *last_grant = Some(Instant::now());
            return Duration::ZERO;
        }

        let mut enforced = self.current_delay();
        if let Some(last) = *last_grant {
            loop {
                let required = self.current_delay();
                let elapsed = last.elapsed();
                if elapsed >= required {
                    enforced = required;
                    break;
                }
                let wait = required.saturating_sub(elapsed);
                let cumulative = self.add_cumulative_delay(wait);
                debug!(
                    delay_ms = wait.as_millis(),
                    cumulative_ms = cumulative.as_millis(),
                    "applying rate limit delay"
                );
                if cumulative >= CUMULATIVE_DELAY_WARNING_THRESHOLD
                    && cumulative.saturating_sub(wait) < CUMULATIVE_DELAY_WARNING_THRESHOLD
                {
                    warn!(
                        cumulative_delay_secs = cumulative.as_secs(),
                        "excessive rate limiting - upstream is throttling this client"
                    );
                }
                tokio::time::sleep(wait).await;
            }
        } else {
            debug!("first request - no delay");
        }

        *last_grant = Some(Instant::now());
        enforced
    }

    /// Adjusts the interval based on the outcome of a granted request.
    #[instrument(level = "debug", skip(self))]
    pub fn report_outcome(&self, outcome: RequestOutcome) {
        let mut state = self.lock_state();
        let before = state.level;
        match outcome {
            RequestOutcome::Success => {
                state.consecutive_failures = 0;
                state.server_error_streak = 0;
                state.success_streak += 1;
                if state.level > 0 && state.success_streak >= self.config.decay_streak {
                    state.level -= 1;
                    state.success_streak = 0;
                }
            }
            RequestOutcome::RateLimited => {
                state.consecutive_failures += 1;
                state.success_streak = 0;
                state.server_error_streak = 0;
                state.level = (state.level + 1).min(MAX_LEVEL);
            }
            RequestOutcome::ServerError => {
                state.consecutive_failures += 1;
                state.success_streak = 0;
                state.server_error_streak += 1;
                if state.server_error_streak >= self.config.server_error_threshold {
                    state.server_error_streak = 0;
                    state.level = (state.level + 1).min(MAX_LEVEL);
                }
            }
        }

        if state.level != before {
            let delay = self.backoff_delay(state.level);
            if state.level > before {
                warn!(
                    delay_ms = delay.as_millis(),
                    consecutive_failures = state.consecutive_failures,
                    "upstream pushback - increasing request delay"
                );
            } else {
                debug!(delay_ms = delay.as_millis(), "decaying request delay");
            }
        }
    }

    fn add_cumulative_delay(&self, delay: Duration) -> Duration {
        let mut state = self.lock_state();
        state.cumulative_delay = state.cumulative_delay.saturating_add(delay);
        state.cumulative_delay
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BackoffState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Parses a Retry-After header value into a Duration.
///
/// Supports two formats as per RFC 7231:
/// - Integer seconds: `Retry-After: 120`
/// - HTTP-date: `Retry-After: Wed, 21 Oct 2025 07:28:00 GMT`
///
/// Returns `None` if the value cannot be parsed. Caps excessive values at 1 hour.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use chanfetch_core::download::rate_limiter::parse_retry_after;
///
/// assert_eq!(parse_retry_after("120"), Some(Duration::from_secs(120)));
/// assert_eq!(parse_retry_after("invalid"), None);
/// ```
#[must_use]
#[instrument]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            debug!(seconds, "negative Retry-After value, ignoring");
            return None;
        }

        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        if duration > MAX_RETRY_AFTER {
            warn!(
                seconds,
                max_seconds = MAX_RETRY_AFTER.as_secs(),
                "Retry-After exceeds maximum, capping at 1 hour"
            );
            return Some(MAX_RETRY_AFTER);
        }
        return Some(duration);
    }

    if let Ok(datetime) = httpdate::parse_http_date(header_value) {
        match datetime.duration_since(std::time::SystemTime::now()) {
            Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
            // Date is in the past
            Err(_) => Some(Duration::ZERO),
        }
    } else {
        debug!(header_value, "unparseable Retry-After value");
        None
    }
}
