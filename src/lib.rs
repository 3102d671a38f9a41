//! Chanfetch Core Library
//!
//! This library archives media from image board threads, catalogs and
//! boards. It fetches thread metadata from the board's JSON API, extracts
//! file references, downloads them with resumable transfers and
//! deduplicates content by SHA-256 across sessions.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`target`] - Normalized work descriptors and board URL parsing
//! - [`api`] - Metadata client for the board JSON API
//! - [`extract`] - Conversion of API documents into [`MediaItem`]s
//! - [`planner`] - Deterministic output path planning
//! - [`db`] / [`ledger`] - Persistent content-hash ledger
//! - [`download`] - Rate limiting, retry policy and the download worker pool
//! - [`orchestrator`] - Per-target pipeline and the presentation boundary

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod context;
pub mod control;
pub mod db;
pub mod download;
pub mod extract;
pub mod ledger;
pub mod media;
pub mod orchestrator;
pub mod planner;
pub mod settings;
pub mod target;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use api::{ApiClient, ApiError};
pub use context::{ContextError, SessionContext};
pub use control::RunControl;
pub use db::{Database, DbError};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadEngine, DownloadError, DownloadJob,
    DownloadStats, EngineError, FailureKind, HttpClient, HttpJobRunner, JobEvent, JobFailure,
    JobOutcome, JobRunner, JobState, RateLimiter, RequestOutcome, RetryPolicy,
};
pub use extract::extract;
pub use ledger::{HashLedger, HashRecord, LedgerDecision, LedgerError};
pub use media::{MediaItem, MediaKind, MediaUrls};
pub use orchestrator::{Orchestrator, RunEvent, TargetSummary};
pub use planner::PathPlanner;
pub use settings::Settings;
pub use target::{Target, TargetKind, TargetParseError, parse_target};
