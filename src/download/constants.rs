//! Constants for the download module (timeouts, rate limiting).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large videos).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Default minimum delay between any two requests (`D_min`).
pub const DEFAULT_MIN_DELAY: Duration = Duration::from_secs(1);

/// Default cap for the escalated delay (`D_max`).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Consecutive successes needed to decay the delay by one step.
pub const DEFAULT_DECAY_STREAK: u32 = 3;

/// Consecutive server errors needed before the delay escalates.
pub const DEFAULT_SERVER_ERROR_THRESHOLD: u32 = 2;

/// Warning threshold for cumulative rate limit delay (30 seconds).
pub const CUMULATIVE_DELAY_WARNING_THRESHOLD: Duration = Duration::from_secs(30);

/// Maximum Retry-After header value (1 hour) to prevent excessive delays.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Default free space (MiB) required on the output volume before a job starts.
pub const DEFAULT_MIN_FREE_SPACE_MB: u64 = 100;
