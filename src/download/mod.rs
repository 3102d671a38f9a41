//! Media download pipeline.
//!
//! This module turns [`MediaItem`](crate::MediaItem)s into files on disk:
//!
//! - [`RateLimiter`] paces every request the session makes and adapts the
//!   interval to 429 and repeated 5xx responses
//! - [`RetryPolicy`] keeps separate budgets for transient and rate-limited
//!   failures
//! - [`HttpJobRunner`] streams one file into `<final>.part`, resumes with
//!   `Range`, hashes the bytes and consults the [`HashLedger`](crate::HashLedger)
//! - [`DownloadEngine`] runs jobs on a bounded worker pool
//!
//! # Example
//!
//! ```no_run
//! use chanfetch_core::download::HttpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new();
//! let response = client.get("https://i.4cdn.org/g/1700000000000.jpg", None).await?;
//! println!("status: {}", response.status());
//! # Ok(())
//! # }
//! ```

mod client;
pub(crate) mod constants;
mod engine;
mod error;
mod hash;
mod job;
pub mod rate_limiter;
mod retry;
mod runner;

pub use client::HttpClient;
pub use engine::{DEFAULT_CONCURRENCY, DownloadEngine, DownloadStats, EngineError, JobEvent};
pub use error::{DownloadError, FailureKind};
pub use hash::{hash_file, hasher_from_prefix, to_hex};
pub use job::{DownloadJob, JobFailure, JobOutcome, JobState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig, RequestOutcome, parse_retry_after};
pub use retry::{
    AttemptBudget, DEFAULT_MAX_RATE_LIMITED_ATTEMPTS, DEFAULT_MAX_RETRIES, FailureType,
    RetryDecision, RetryPolicy, classify_error, limiter_outcome, retry_after_delay,
};
pub use runner::{HttpJobRunner, JobRunner};

// Note: we do NOT define module-local Result aliases here.
// Use `Result<T, DownloadError>` explicitly in function signatures.
