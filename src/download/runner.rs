//! Job runners: the contract the worker pool drives, and the HTTP implementation.
//!
//! The pool only knows [`JobRunner`]: "given a job and a run control,
//! produce a terminal outcome". [`HttpJobRunner`] is the production runner.
//! It downloads into `<final>.part`, resumes with `Range` when a partial is
//! present, hashes the whole byte stream, asks the ledger whether the
//! content is new and only then moves the file into place.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs::OpenOptions;
use tokio::io::BufWriter;
use tracing::{debug, info, instrument, warn};

use super::client::{stream_to_file, total_content_length};
use super::constants::DEFAULT_MIN_FREE_SPACE_MB;
use super::hash::{hash_file, hasher_from_prefix, to_hex};
use super::job::{DownloadJob, JobOutcome, JobState};
use super::rate_limiter::{RateLimiter, RequestOutcome};
use super::retry::{RetryDecision, RetryPolicy, classify_error, limiter_outcome, retry_after_delay};
use super::{DownloadError, FailureKind, HttpClient};
use crate::control::RunControl;
use crate::ledger::{HashLedger, LedgerDecision};
use crate::media::MediaItem;
use crate::planner::PathPlanner;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Turns one job into a terminal outcome.
///
/// Implementations must not panic on expected failures; every failure is
/// expressed as [`JobOutcome::Failed`].
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, job: &mut DownloadJob, control: &RunControl) -> JobOutcome;
}

/// Bytes of one finished transfer, ready to be verified and placed.
struct Transfer {
    hasher: Sha256,
    total: u64,
}

/// Production runner streaming media over HTTP.
#[derive(Debug, Clone)]
pub struct HttpJobRunner {
    client: HttpClient,
    rate_limiter: Arc<RateLimiter>,
    ledger: HashLedger,
    planner: PathPlanner,
    retry_policy: RetryPolicy,
    min_free_space_mb: u64,
}

impl HttpJobRunner {
    #[must_use]
    pub fn new(
        client: HttpClient,
        rate_limiter: Arc<RateLimiter>,
        ledger: HashLedger,
        planner: PathPlanner,
    ) -> Self {
        Self {
            client,
            rate_limiter,
            ledger,
            planner,
            retry_policy: RetryPolicy::default(),
            min_free_space_mb: DEFAULT_MIN_FREE_SPACE_MB,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Free space (MiB) required before a job starts. 0 disables the check.
    #[must_use]
    pub fn with_min_free_space_mb(mut self, min_free_space_mb: u64) -> Self {
        self.min_free_space_mb = min_free_space_mb;
        self
    }

    /// Fails with [`DownloadError::InsufficientSpace`] when `dir` is nearly full.
    fn check_free_space(&self, dir: &Path) -> Result<(), DownloadError> {
        if self.min_free_space_mb == 0 {
            return Ok(());
        }
        match fs2::available_space(dir) {
            Ok(bytes) => {
                let available_mb = bytes / BYTES_PER_MB;
                if available_mb < self.min_free_space_mb {
                    return Err(DownloadError::InsufficientSpace {
                        path: dir.to_path_buf(),
                        available_mb,
                        required_mb: self.min_free_space_mb,
                    });
                }
                Ok(())
            }
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "cannot determine free space, continuing");
                Ok(())
            }
        }
    }

    /// One request: resume or start the partial file and stream the body.
    async fn attempt(
        &self,
        job: &mut DownloadJob,
        partial: &Path,
        control: &RunControl,
    ) -> Result<Transfer, DownloadError> {
        let url = job.item.remote_url.clone();
        let existing = partial_len(partial).await?;
        job.bytes_written = existing;
        if existing > 0 {
            job.transition(JobState::Resuming);
            debug!(offset = existing, "resuming from partial file");
        }

        self.rate_limiter.acquire().await;
        if control.is_cancelled() {
            return Err(DownloadError::cancelled(&url));
        }
        job.attempts += 1;

        let range = (existing > 0).then_some(existing);
        let response = match self.client.get(&url, range).await {
            Ok(response) => response,
            Err(DownloadError::RangeNotSatisfiable { total, .. }) if existing > 0 => {
                self.rate_limiter.report_outcome(RequestOutcome::Success);
                job.transition(JobState::Downloading);
                check_partial_is_whole(partial, existing, total, job.item.expected_size)?;
                let hasher = hasher_from_prefix(partial, existing).await?;
                return Ok(Transfer {
                    hasher,
                    total: existing,
                });
            }
            Err(e) => return Err(e),
        };
        self.rate_limiter.report_outcome(RequestOutcome::Success);
        job.transition(JobState::Downloading);

        let resumed = existing > 0 && response.status().as_u16() == 206;
        let (mut hasher, offset) = if resumed {
            (hasher_from_prefix(partial, existing).await?, existing)
        } else {
            if existing > 0 {
                debug!("server ignored range request, restarting from zero");
            }
            (Sha256::new(), 0)
        };
        let announced_total = total_content_length(&response, offset);

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(resumed)
            .truncate(!resumed)
            .open(partial)
            .await
            .map_err(|e| DownloadError::io(partial, e))?;
        let mut writer = BufWriter::new(file);

        let streamed = stream_to_file(
            &mut writer,
            response,
            &mut hasher,
            &url,
            partial,
            control.token(),
        )
        .await;
        let written = match streamed {
            Ok(written) => written,
            Err(e) => {
                job.bytes_written = partial_len(partial).await.unwrap_or(offset);
                return Err(e);
            }
        };
        let total = offset + written;
        job.bytes_written = total;

        if let Some(announced) = announced_total
            && announced != total
        {
            return Err(DownloadError::corrupt(
                partial,
                format!("server announced {announced} bytes, received {total}"),
            ));
        }

        Ok(Transfer { hasher, total })
    }

    /// Checks the finished transfer against what the API promised.
    fn verify(job: &DownloadJob, partial: &Path, transfer: &Transfer) -> Result<(), DownloadError> {
        if transfer.total == 0 {
            return Err(DownloadError::corrupt(partial, "empty body"));
        }
        if let Some(expected) = job.item.expected_size
            && expected != transfer.total
        {
            return Err(DownloadError::corrupt(
                partial,
                format!("expected {expected} bytes, got {}", transfer.total),
            ));
        }
        Ok(())
    }

    /// Records the digest and moves the partial file into place.
    async fn finalize(&self, transfer: Transfer, partial: &Path, final_path: &Path) -> JobOutcome {
        let sha256 = to_hex(transfer.hasher);

        let decision = match self.ledger.check_and_record(&sha256, final_path).await {
            Ok(decision) => decision,
            Err(e) => {
                return JobOutcome::failed(FailureKind::Filesystem, format!("ledger: {e}"));
            }
        };

        match decision {
            LedgerDecision::Duplicate { existing } => {
                if let Err(e) = tokio::fs::remove_file(partial).await {
                    warn!(path = %partial.display(), error = %e, "failed to discard duplicate download");
                }
                debug!(existing = %existing.display(), "discarded duplicate content");
                JobOutcome::SkippedDuplicate { existing }
            }
            LedgerDecision::Recorded => {
                if let Err(e) = tokio::fs::rename(partial, final_path).await {
                    if let Err(forget_err) = self.ledger.forget(&sha256).await {
                        warn!(error = %forget_err, "failed to roll back ledger record");
                    }
                    return JobOutcome::failed(
                        FailureKind::Filesystem,
                        DownloadError::io(final_path, e).to_string(),
                    );
                }
                JobOutcome::Completed {
                    path: final_path.to_path_buf(),
                    sha256,
                }
            }
        }
    }

    /// The planned file from an earlier session, when the ledger records
    /// its content at exactly that path.
    ///
    /// A size that disagrees with the API means the index now belongs to
    /// another post, so the file is not trusted.
    async fn already_archived(&self, item: &MediaItem) -> Option<PathBuf> {
        let planned = self.planner.planned_path(item);
        let metadata = tokio::fs::metadata(&planned).await.ok()?;
        if !metadata.is_file() || metadata.len() == 0 {
            return None;
        }
        if item.expected_size.is_some_and(|size| size != metadata.len()) {
            return None;
        }

        let sha256 = match hash_file(&planned).await {
            Ok(sha256) => sha256,
            Err(e) => {
                warn!(error = %e, "cannot hash existing file, downloading again");
                return None;
            }
        };
        match self.ledger.lookup(&sha256).await {
            Ok(Some(record)) if record.path() == planned => Some(planned),
            Ok(_) => None,
            Err(e) => {
                warn!(error = %e, "ledger lookup failed, downloading again");
                None
            }
        }
    }

    async fn prepare(&self, job: &mut DownloadJob) -> Result<(PathBuf, PathBuf), DownloadError> {
        let final_path = self.planner.resolve(&job.item);
        job.local_path = Some(final_path.clone());

        if let Some(dir) = final_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| DownloadError::io(dir, e))?;
            self.check_free_space(dir)?;
        }
        let partial = PathPlanner::partial_path(&final_path);
        Ok((final_path, partial))
    }
}

#[async_trait]
impl JobRunner for HttpJobRunner {
    #[instrument(skip(self, job, control), fields(job = job.index, url = %job.item.remote_url))]
    async fn run(&self, job: &mut DownloadJob, control: &RunControl) -> JobOutcome {
        if let Some(existing) = self.already_archived(&job.item).await {
            debug!(existing = %existing.display(), "already archived, no request needed");
            job.local_path = Some(existing.clone());
            return JobOutcome::SkippedDuplicate { existing };
        }

        let (final_path, partial) = match self.prepare(job).await {
            Ok(paths) => paths,
            Err(e) => return JobOutcome::failed(e.failure_kind(), e.to_string()),
        };
        job.transition(JobState::Downloading);

        let mut budget = self.retry_policy.budget();
        let mut restarted = false;

        loop {
            let error = match self.attempt(job, &partial, control).await {
                Ok(transfer) => match Self::verify(job, &partial, &transfer) {
                    Ok(()) => return self.finalize(transfer, &partial, &final_path).await,
                    Err(e) => e,
                },
                Err(e) => e,
            };

            if let DownloadError::Corrupt { .. } = error {
                discard_partial(&partial).await;
                job.bytes_written = 0;
                if !restarted {
                    restarted = true;
                    warn!(error = %error, "content failed verification, restarting from zero");
                    continue;
                }
                return JobOutcome::failed(FailureKind::Corrupt, error.to_string());
            }

            if let Some(outcome) = limiter_outcome(&error) {
                self.rate_limiter.report_outcome(outcome);
            }

            match budget.on_failure(classify_error(&error)) {
                RetryDecision::Retry { attempt } => {
                    info!(attempt, error = %error, "retrying download");
                    if let Some(wait) = retry_after_delay(&error) {
                        tokio::select! {
                            () = control.token().cancelled() => {}
                            () = tokio::time::sleep(wait) => {}
                        }
                    }
                    if control.is_cancelled() {
                        return JobOutcome::failed(FailureKind::Cancelled, "run cancelled");
                    }
                    if job.bytes_written > 0 && job.state() == JobState::Downloading {
                        job.transition(JobState::Resuming);
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(%reason, "not retrying download");
                    return JobOutcome::failed(error.failure_kind(), error.to_string());
                }
            }
        }
    }
}

/// A 416 reply only means the partial is finished when its length matches
/// what the server reports and what the API announced.
fn check_partial_is_whole(
    partial: &Path,
    existing: u64,
    reported: Option<u64>,
    expected: Option<u64>,
) -> Result<(), DownloadError> {
    if let Some(total) = reported
        && total != existing
    {
        return Err(DownloadError::corrupt(
            partial,
            format!("partial holds {existing} bytes, server reports {total}"),
        ));
    }
    match (reported, expected) {
        (_, Some(size)) if size != existing => Err(DownloadError::corrupt(
            partial,
            format!("partial holds {existing} bytes, expected {size}"),
        )),
        (None, None) => Err(DownloadError::corrupt(
            partial,
            "416 without a length to check the partial against",
        )),
        _ => Ok(()),
    }
}

/// Size of the partial file, 0 if absent.
async fn partial_len(partial: &Path) -> Result<u64, DownloadError> {
    match tokio::fs::metadata(partial).await {
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(DownloadError::io(partial, e)),
    }
}

async fn discard_partial(partial: &Path) {
    if let Err(e) = tokio::fs::remove_file(partial).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %partial.display(), error = %e, "failed to delete partial file");
    }
}
