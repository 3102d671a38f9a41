//! Download job types and state definitions.

use std::fmt;
use std::path::PathBuf;

use tracing::warn;

use super::FailureKind;
use crate::media::MediaItem;

/// Lifecycle state of a download job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobState {
    /// Queued, not yet picked up by a worker.
    Pending,
    /// Bytes are being transferred.
    Downloading,
    /// Continuing from a partial file after an interruption.
    Resuming,
    /// Written to its final path and recorded in the ledger.
    Completed,
    /// Content already known to the ledger; nothing kept.
    SkippedDuplicate,
    /// Gave up.
    Failed,
}

impl JobState {
    /// Returns the string representation used in logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Resuming => "resuming",
            Self::Completed => "completed",
            Self::SkippedDuplicate => "skipped_duplicate",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::SkippedDuplicate | Self::Failed)
    }

    /// Whether moving from `self` to `next` is allowed.
    ///
    /// Jobs only move forward, except for `Downloading -> Resuming -> Downloading`.
    /// A pending job may fail without ever downloading (cancellation, free
    /// space guard), or be skipped when an earlier session already archived
    /// its file.
    #[must_use]
    pub fn can_transition_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Downloading | Self::SkippedDuplicate | Self::Failed)
                | (Self::Downloading, Self::Resuming)
                | (Self::Resuming, Self::Downloading | Self::Failed)
                | (
                    Self::Downloading,
                    Self::Completed | Self::SkippedDuplicate | Self::Failed
                )
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal failure of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind: FailureKind,
    /// Human-readable detail, surfaced verbatim to the user.
    pub message: String,
}

impl JobFailure {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Terminal outcome reported exactly once per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// File written to `path`; `sha256` is its lowercase hex digest.
    Completed { path: PathBuf, sha256: String },
    /// Content was already archived at `existing`.
    SkippedDuplicate { existing: PathBuf },
    Failed(JobFailure),
}

impl JobOutcome {
    /// Shorthand for a failed outcome.
    #[must_use]
    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self::Failed(JobFailure::new(kind, message))
    }

    /// The job state matching this outcome.
    #[must_use]
    pub fn state(&self) -> JobState {
        match self {
            Self::Completed { .. } => JobState::Completed,
            Self::SkippedDuplicate { .. } => JobState::SkippedDuplicate,
            Self::Failed(_) => JobState::Failed,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed { path, .. } => write!(f, "saved {}", path.display()),
            Self::SkippedDuplicate { existing } => {
                write!(f, "duplicate of {}", existing.display())
            }
            Self::Failed(failure) => write!(f, "failed ({failure})"),
        }
    }
}

/// One media item on its way to disk, owned by the engine for its lifetime.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Position in submission order (0-based).
    pub index: usize,
    pub item: MediaItem,
    /// Final path once planned; `None` until the runner resolves it.
    pub local_path: Option<PathBuf>,
    state: JobState,
    /// Bytes present in the partial file.
    pub bytes_written: u64,
    /// Requests issued for this job so far.
    pub attempts: u32,
}

impl DownloadJob {
    #[must_use]
    pub fn new(index: usize, item: MediaItem) -> Self {
        Self {
            index,
            item,
            local_path: None,
            state: JobState::Pending,
            bytes_written: 0,
            attempts: 0,
        }
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    /// Moves the job to `next` if the transition is permitted.
    ///
    /// Returns `false` and leaves the state unchanged otherwise. Staying in
    /// the current state is a no-op that succeeds.
    pub fn transition(&mut self, next: JobState) -> bool {
        if self.state == next {
            return true;
        }
        if self.state.can_transition_to(next) {
            self.state = next;
            true
        } else {
            warn!(
                job = self.index,
                from = %self.state,
                to = %next,
                "rejected job state transition"
            );
            false
        }
    }

    /// Records the terminal outcome in the job state.
    ///
    /// A failure from a non-downloading state is always accepted, so a job
    /// that was pending or resuming can still end as `Failed`.
    pub fn finish(&mut self, outcome: &JobOutcome) {
        let next = outcome.state();
        if !self.transition(next) && next == JobState::Failed {
            self.state = JobState::Failed;
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::media::MediaKind;
    use crate::target::Target;

    fn item() -> MediaItem {
        MediaItem {
            remote_url: "https://i.4cdn.org/g/1.jpg".to_string(),
            suggested_filename: "1.jpg".to_string(),
            original_filename: None,
            index: 1,
            extension: ".jpg".to_string(),
            expected_size: None,
            upstream_digest: None,
            kind: MediaKind::Image,
            target: Arc::new(Target::thread("g", 1)),
        }
    }

    #[test]
    fn test_forward_transitions_allowed() {
        assert!(JobState::Pending.can_transition_to(JobState::Downloading));
        assert!(JobState::Downloading.can_transition_to(JobState::Completed));
        assert!(JobState::Downloading.can_transition_to(JobState::SkippedDuplicate));
        assert!(JobState::Downloading.can_transition_to(JobState::Failed));
        assert!(JobState::Pending.can_transition_to(JobState::Failed));
        assert!(JobState::Pending.can_transition_to(JobState::SkippedDuplicate));
        assert!(!JobState::Pending.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_resume_cycle_is_the_only_regression() {
        assert!(JobState::Downloading.can_transition_to(JobState::Resuming));
        assert!(JobState::Resuming.can_transition_to(JobState::Downloading));
        assert!(!JobState::Downloading.can_transition_to(JobState::Pending));
        assert!(!JobState::Completed.can_transition_to(JobState::Downloading));
        assert!(!JobState::Failed.can_transition_to(JobState::Pending));
        assert!(!JobState::Pending.can_transition_to(JobState::Resuming));
        assert!(!JobState::Resuming.can_transition_to(JobState::Completed));
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::SkippedDuplicate.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Resuming.is_terminal());
    }

    #[test]
    fn test_job_rejects_illegal_transition() {
        let mut job = DownloadJob::new(0, item());
        assert_eq!(job.state(), JobState::Pending);
        assert!(!job.transition(JobState::Completed));
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.transition(JobState::Downloading));
        assert!(job.transition(JobState::Resuming));
        assert!(job.transition(JobState::Downloading));
        assert!(job.transition(JobState::Completed));
        assert!(!job.transition(JobState::Downloading));
    }

    #[test]
    fn test_finish_failed_from_resuming() {
        let mut job = DownloadJob::new(0, item());
        job.transition(JobState::Downloading);
        job.transition(JobState::Resuming);
        job.finish(&JobOutcome::failed(FailureKind::Cancelled, "stopped"));
        assert_eq!(job.state(), JobState::Failed);
    }

    #[test]
    fn test_outcome_display() {
        let outcome = JobOutcome::failed(FailureKind::NotFound, "HTTP 404");
        assert_eq!(outcome.to_string(), "failed (not found: HTTP 404)");
        assert_eq!(outcome.state(), JobState::Failed);
    }
}
