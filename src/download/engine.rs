//! Bounded worker pool driving download jobs to a terminal outcome.
//!
//! Jobs are submitted in order into a FIFO queue. [`DownloadEngine::run`]
//! spawns `concurrency` workers that pop jobs one at a time and hand them
//! to a [`JobRunner`]. Every job produces exactly one
//! [`JobEvent::Finished`], including jobs that never started because the
//! run was cancelled.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use chanfetch_core::{
//!     Database, DownloadEngine, HashLedger, HttpClient, HttpJobRunner, PathPlanner,
//!     RateLimiter, RunControl,
//! };
//!
//! # async fn example(items: Vec<chanfetch_core::MediaItem>) -> Result<(), Box<dyn std::error::Error>> {
//! let db = Database::new_in_memory().await?;
//! let runner = HttpJobRunner::new(
//!     HttpClient::new(),
//!     Arc::new(RateLimiter::disabled()),
//!     HashLedger::open(&db),
//!     PathPlanner::new("./archive"),
//! );
//! let engine = DownloadEngine::new(5, Arc::new(runner))?;
//! for item in items {
//!     engine.submit(item).await;
//! }
//! let (events, _rx) = tokio::sync::mpsc::unbounded_channel();
//! let stats = engine.run(&RunControl::new(), events).await;
//! println!("Completed: {}, Skipped: {}, Failed: {}", stats.completed(), stats.skipped(), stats.failed());
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, instrument, warn};

use super::FailureKind;
use super::job::{DownloadJob, JobOutcome};
use super::runner::JobRunner;
use crate::control::RunControl;
use crate::media::MediaItem;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Error type for download engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Per-job notifications emitted while the engine runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker picked up a job. `index` is 0-based in submission order.
    Started {
        index: usize,
        total: usize,
        filename: String,
    },
    /// A job reached its terminal outcome. Sent exactly once per job.
    Finished { job_index: usize, outcome: JobOutcome },
}

/// Statistics from one engine run.
///
/// Uses atomic counters for thread-safe updates from concurrent workers.
#[derive(Debug, Default)]
pub struct DownloadStats {
    completed: AtomicUsize,
    skipped: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
}

impl DownloadStats {
    /// Creates a new stats tracker with zero counts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of files written to their final path.
    #[must_use]
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Returns the number of jobs discarded as content duplicates.
    #[must_use]
    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::SeqCst)
    }

    /// Returns the number of failed jobs, cancelled ones included.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::SeqCst)
    }

    /// Returns the total number of jobs that reached a terminal outcome.
    #[must_use]
    pub fn total(&self) -> usize {
        self.completed() + self.skipped() + self.failed()
    }

    /// Returns the number of extra requests issued beyond each job's first.
    #[must_use]
    pub fn retried(&self) -> usize {
        self.retried.load(Ordering::SeqCst)
    }

    fn record(&self, outcome: &JobOutcome) {
        let counter = match outcome {
            JobOutcome::Completed { .. } => &self.completed,
            JobOutcome::SkippedDuplicate { .. } => &self.skipped,
            JobOutcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn add_retries(&self, attempts: u32) {
        let extra = attempts.saturating_sub(1) as usize;
        if extra > 0 {
            self.retried.fetch_add(extra, Ordering::SeqCst);
        }
    }
}

/// Download engine with a fixed-size worker pool.
///
/// # Concurrency Model
///
/// - `concurrency` workers are spawned per run, each a Tokio task
/// - Workers pop jobs from a shared FIFO queue, so jobs start in order
/// - Each job runs in its own task, so a panicking job cannot take its
///   worker down
/// - Completion order is unordered
pub struct DownloadEngine {
    concurrency: usize,
    runner: Arc<dyn JobRunner>,
    queue: Mutex<VecDeque<DownloadJob>>,
    submitted: AtomicUsize,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("concurrency", &self.concurrency)
            .field("submitted", &self.submitted.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates a new engine with the specified concurrency limit and runner.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(runner))]
    pub fn new(concurrency: usize, runner: Arc<dyn JobRunner>) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }
        debug!(concurrency, "creating download engine");

        Ok(Self {
            concurrency,
            runner,
            queue: Mutex::new(VecDeque::new()),
            submitted: AtomicUsize::new(0),
        })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Queues `item` as a pending job and returns its index.
    pub async fn submit(&self, item: MediaItem) -> usize {
        let mut queue = self.queue.lock().await;
        let index = self.submitted.fetch_add(1, Ordering::SeqCst);
        queue.push_back(DownloadJob::new(index, item));
        index
    }

    /// Number of jobs waiting to start.
    pub async fn pending(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Runs every queued job to completion.
    ///
    /// Individual job failures never fail the run; they are counted in the
    /// returned stats and reported through `events`. A closed event
    /// receiver is tolerated.
    #[instrument(skip(self, control, events), fields(concurrency = self.concurrency))]
    pub async fn run(&self, control: &RunControl, events: UnboundedSender<JobEvent>) -> DownloadStats {
        let queue = {
            let mut pending = self.queue.lock().await;
            Arc::new(Mutex::new(std::mem::take(&mut *pending)))
        };
        let total = queue.lock().await.len();
        let stats = Arc::new(DownloadStats::new());
        info!(total, "starting download run");

        let workers = self.concurrency.min(total.max(1));
        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let worker_ctx = Worker {
                id: worker,
                total,
                queue: Arc::clone(&queue),
                runner: Arc::clone(&self.runner),
                control: control.clone(),
                events: events.clone(),
                stats: Arc::clone(&stats),
            };
            handles.push(tokio::spawn(worker_ctx.run()));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "download worker panicked");
            }
        }

        // Anything still queued lost its worker; never leave a job unreported
        let leftover: Vec<DownloadJob> = queue.lock().await.drain(..).collect();
        for mut job in leftover {
            let outcome = JobOutcome::failed(FailureKind::Cancelled, "run ended before job started");
            finish(&mut job, outcome, &stats, &events);
        }

        let stats = Arc::try_unwrap(stats).unwrap_or_else(|shared| DownloadStats {
            completed: AtomicUsize::new(shared.completed()),
            skipped: AtomicUsize::new(shared.skipped()),
            failed: AtomicUsize::new(shared.failed()),
            retried: AtomicUsize::new(shared.retried()),
        });
        info!(
            completed = stats.completed(),
            skipped = stats.skipped(),
            failed = stats.failed(),
            retried = stats.retried(),
            "download run finished"
        );
        stats
    }
}

struct Worker {
    id: usize,
    total: usize,
    queue: Arc<Mutex<VecDeque<DownloadJob>>>,
    runner: Arc<dyn JobRunner>,
    control: RunControl,
    events: UnboundedSender<JobEvent>,
    stats: Arc<DownloadStats>,
}

impl Worker {
    async fn run(self) {
        loop {
            let proceed = self.control.wait_while_paused().await;
            let Some(mut job) = self.queue.lock().await.pop_front() else {
                break;
            };

            if !proceed {
                let outcome = JobOutcome::failed(FailureKind::Cancelled, "run cancelled");
                finish(&mut job, outcome, &self.stats, &self.events);
                continue;
            }

            let index = job.index;
            debug!(worker = self.id, job = index, "job started");
            let _ = self.events.send(JobEvent::Started {
                index,
                total: self.total,
                filename: job.item.suggested_filename.clone(),
            });

            let runner = Arc::clone(&self.runner);
            let control = self.control.clone();
            let fallback = job.clone();
            let handle = tokio::spawn(async move {
                let outcome = runner.run(&mut job, &control).await;
                (job, outcome)
            });

            let (mut job, outcome) = match handle.await {
                Ok(done) => done,
                Err(e) => {
                    warn!(job = index, error = %e, "download job panicked");
                    let outcome = JobOutcome::failed(FailureKind::Http(0), format!("job panicked: {e}"));
                    (fallback, outcome)
                }
            };
            self.stats.add_retries(job.attempts);
            finish(&mut job, outcome, &self.stats, &self.events);
        }
        debug!(worker = self.id, "worker finished");
    }
}

fn finish(
    job: &mut DownloadJob,
    outcome: JobOutcome,
    stats: &DownloadStats,
    events: &UnboundedSender<JobEvent>,
) {
    job.finish(&outcome);
    stats.record(&outcome);
    match &outcome {
        JobOutcome::Failed(failure) => {
            warn!(job = job.index, url = %job.item.remote_url, %failure, "download failed");
        }
        other => debug!(job = job.index, outcome = %other, "job finished"),
    }
    let _ = events.send(JobEvent::Finished {
        job_index: job.index,
        outcome,
    });
}
