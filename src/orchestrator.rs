//! Per-target pipeline and the boundary to the presentation layer.
//!
//! [`Orchestrator::process`] runs one target end to end:
//!
//! 1. fetch the thread or catalog document
//! 2. for catalogs and boards, expand into per-thread fetches
//! 3. extract media items
//! 4. submit them to the [`DownloadEngine`] and run it
//! 5. aggregate job outcomes into a [`TargetSummary`]
//!
//! Progress leaves through an optional [`RunEvent`] channel; control comes
//! in through [`RunControl`]. Nothing here renders anything.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiClient, ApiError};
use crate::context::SessionContext;
use crate::control::RunControl;
use crate::download::{DownloadEngine, EngineError, HttpJobRunner, JobEvent, JobOutcome};
use crate::extract::{extract, extract_into, thread_numbers, thread_title};
use crate::media::MediaItem;
use crate::planner::PathPlanner;
use crate::settings::Settings;
use crate::target::{Target, TargetKind};

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunEvent {
    /// A job of `target` started. `index` is 0-based.
    Progress {
        target: Arc<Target>,
        index: usize,
        total: usize,
        filename: String,
    },
    /// A job of `target` reached its terminal outcome.
    Outcome {
        target: Arc<Target>,
        job_index: usize,
        outcome: JobOutcome,
    },
    /// `target` is done.
    Summary(TargetSummary),
}

/// Aggregated result of processing one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSummary {
    pub target: Target,
    /// Thread title, for thread targets that have one.
    pub title: Option<String>,
    /// Media items extracted.
    pub fetched: usize,
    /// Files written to their final path.
    pub downloaded: usize,
    /// Items discarded as content duplicates.
    pub skipped: usize,
    /// Items that failed, cancelled ones included.
    pub failed: usize,
    /// Set when the metadata fetch failed for a reason other than 404/410.
    pub fetch_error: Option<String>,
}

impl TargetSummary {
    fn empty(target: &Target) -> Self {
        Self {
            target: target.clone(),
            title: None,
            fetched: 0,
            downloaded: 0,
            skipped: 0,
            failed: 0,
            fetch_error: None,
        }
    }

    /// No fetch error and no failed item.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.fetch_error.is_none() && self.failed == 0
    }
}

impl fmt::Display for TargetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(error) = &self.fetch_error {
            return write!(f, "{}: fetch failed ({error})", self.target);
        }
        write!(
            f,
            "{}: {} found, {} downloaded, {} duplicates, {} failed",
            self.target, self.fetched, self.downloaded, self.skipped, self.failed
        )
    }
}

/// Drives targets through fetch, extraction and download.
///
/// Targets are processed one at a time; concurrent calls to
/// [`process`](Self::process) queue behind each other.
pub struct Orchestrator {
    ctx: SessionContext,
    settings: Settings,
    api: ApiClient,
    engine: DownloadEngine,
    run_lock: Mutex<()>,
    reconciled: AtomicBool,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("output_dir", &self.settings.output_dir)
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Wires the session's shared handles into an API client and a download engine.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `settings.concurrency`
    /// is outside 1..=100.
    pub fn new(ctx: SessionContext, settings: Settings) -> Result<Self, EngineError> {
        let runner = HttpJobRunner::new(
            ctx.http.clone(),
            Arc::clone(&ctx.rate_limiter),
            ctx.ledger.clone(),
            PathPlanner::new(&settings.output_dir),
        )
        .with_retry_policy(settings.retry_policy())
        .with_min_free_space_mb(settings.min_free_space_mb);
        let engine = DownloadEngine::new(settings.concurrency, Arc::new(runner))?;
        let api = ctx.api_client(&settings);

        Ok(Self {
            ctx,
            settings,
            api,
            engine,
            run_lock: Mutex::new(()),
            reconciled: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    #[must_use]
    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    /// Processes `targets` one after another.
    ///
    /// Stops before the next target once `control` is cancelled, so the
    /// result may be shorter than `targets`.
    pub async fn process_all(
        &self,
        targets: &[Target],
        control: &RunControl,
        events: Option<UnboundedSender<RunEvent>>,
    ) -> Vec<TargetSummary> {
        let mut summaries = Vec::with_capacity(targets.len());
        for (position, target) in targets.iter().enumerate() {
            if control.is_cancelled() {
                info!(remaining = targets.len() - position, "run cancelled, skipping remaining targets");
                break;
            }
            summaries.push(self.process(target, control, events.clone()).await);
        }
        summaries
    }

    /// Runs one target end to end.
    ///
    /// A missing thread or board yields an empty summary; any other fetch
    /// failure is reported in [`TargetSummary::fetch_error`]. In both cases
    /// no job is created.
    #[instrument(skip(self, control, events), fields(target = %target))]
    pub async fn process(
        &self,
        target: &Target,
        control: &RunControl,
        events: Option<UnboundedSender<RunEvent>>,
    ) -> TargetSummary {
        let _run = self.run_lock.lock().await;
        self.reconcile_once().await;

        let shared = Arc::new(target.clone());
        let mut summary = TargetSummary::empty(target);

        let items = match self.collect_items(&shared, control, &mut summary).await {
            Ok(items) => items,
            Err(ApiError::NotFound { url }) => {
                info!(%url, "target not found");
                return finish(summary, events.as_ref());
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch target metadata");
                summary.fetch_error = Some(e.to_string());
                return finish(summary, events.as_ref());
            }
        };
        summary.fetched = items.len();
        if let Some(title) = &summary.title {
            info!(%title, items = items.len(), "extracted media");
        } else {
            info!(items = items.len(), "extracted media");
        }

        let mut submitted = 0usize;
        for item in items {
            if control.is_cancelled() {
                break;
            }
            self.engine.submit(item).await;
            submitted += 1;
        }
        if submitted < summary.fetched {
            let unsubmitted = summary.fetched - submitted;
            info!(unsubmitted, "run cancelled during submission");
            summary.failed += unsubmitted;
        }

        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (stats, ()) = tokio::join!(
            self.engine.run(control, job_tx),
            forward(job_rx, &shared, events.as_ref()),
        );

        summary.downloaded = stats.completed();
        summary.skipped = stats.skipped();
        summary.failed += stats.failed();
        finish(summary, events.as_ref())
    }

    /// Closes the session's ledger.
    pub async fn close(self) {
        self.ctx.close().await;
    }

    async fn reconcile_once(&self) {
        if self.reconciled.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.ctx.ledger.reconcile().await {
            Ok(pruned) => debug!(pruned, "ledger reconciled at session start"),
            Err(e) => warn!(error = %e, "ledger reconciliation failed"),
        }
    }

    async fn collect_items(
        &self,
        target: &Arc<Target>,
        control: &RunControl,
        summary: &mut TargetSummary,
    ) -> Result<Vec<MediaItem>, ApiError> {
        let doc = self.api.fetch_metadata(target).await?;
        let urls = self.api.urls();

        if target.kind() == TargetKind::Thread {
            summary.title = thread_title(&doc);
            return extract(&doc, target, urls);
        }

        let limit = self.settings.thread_limit_for(target.kind());
        if limit == 0 {
            return extract(&doc, target, urls);
        }

        let threads = thread_numbers(&doc);
        if threads.is_empty() {
            // Not a catalog: surface the shape error
            return extract(&doc, target, urls);
        }

        let mut items = Vec::new();
        for id in threads.into_iter().take(limit) {
            if control.is_cancelled() {
                break;
            }
            let thread = match self.api.fetch_thread(target.board_code(), id).await {
                Ok(thread) => thread,
                Err(e) => {
                    warn!(thread = id, error = %e, "skipping thread");
                    continue;
                }
            };
            match extract_into(&mut items, &thread, target, urls) {
                Ok(added) => debug!(
                    thread = id,
                    title = thread_title(&thread).as_deref().unwrap_or(""),
                    added,
                    "expanded thread"
                ),
                Err(e) => warn!(thread = id, error = %e, "skipping malformed thread"),
            }
        }
        Ok(items)
    }
}

async fn forward(
    mut jobs: UnboundedReceiver<JobEvent>,
    target: &Arc<Target>,
    events: Option<&UnboundedSender<RunEvent>>,
) {
    while let Some(event) = jobs.recv().await {
        let Some(events) = events else {
            continue;
        };
        let event = match event {
            JobEvent::Started {
                index,
                total,
                filename,
            } => RunEvent::Progress {
                target: Arc::clone(target),
                index,
                total,
                filename,
            },
            JobEvent::Finished { job_index, outcome } => RunEvent::Outcome {
                target: Arc::clone(target),
                job_index,
                outcome,
            },
        };
        let _ = events.send(event);
    }
}

fn finish(summary: TargetSummary, events: Option<&UnboundedSender<RunEvent>>) -> TargetSummary {
    info!(summary = %summary, "target finished");
    if let Some(events) = events {
        let _ = events.send(RunEvent::Summary(summary.clone()));
    }
    summary
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::db::Database;
    use crate::test_support::socket_guard::start_mock_server_or_skip;

    async fn orchestrator(server: &MockServer, dir: &TempDir, settings: Settings) -> Orchestrator {
        let settings = Settings {
            output_dir: dir.path().to_path_buf(),
            api_base: server.uri(),
            cdn_base: format!("{}/cdn", server.uri()),
            min_delay: Duration::ZERO,
            min_free_space_mb: 0,
            ..settings
        };
        let db = Database::new_in_memory().await.unwrap();
        let ctx = SessionContext::with_database(&settings, db);
        Orchestrator::new(ctx, settings).unwrap()
    }

    async fn mount_file(server: &MockServer, name: &str, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(format!("/cdn/g/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.to_vec()))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_rejects_invalid_concurrency() {
        let db = Database::new_in_memory().await.unwrap();
        let settings = Settings {
            concurrency: 0,
            ..Settings::default()
        };
        let ctx = SessionContext::with_database(&settings, db);
        assert!(Orchestrator::new(ctx, settings).is_err());
    }

    #[tokio::test]
    async fn test_fetch_error_is_reported_without_jobs() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&server, &dir, Settings::default()).await;

        let summary = orch
            .process(&Target::thread("g", 1), &RunControl::new(), None)
            .await;
        assert_eq!(summary.fetched, 0);
        assert!(summary.fetch_error.is_some());
        assert!(!summary.is_clean());
    }

    #[tokio::test]
    async fn test_catalog_expansion_respects_thread_limit() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/g/catalog.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"page": 1, "threads": [{"no": 1}, {"no": 2}, {"no": 3}]}
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/g/thread/1.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"posts": [
                {"no": 1, "tim": 11, "ext": ".jpg"}
            ]})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/g/thread/2.json"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/g/thread/3.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"posts": []})))
            .expect(0)
            .mount(&server)
            .await;
        mount_file(&server, "11.jpg", b"eleven").await;

        let dir = TempDir::new().unwrap();
        let settings = Settings {
            catalog_thread_limit: Some(2),
            ..Settings::default()
        };
        let orch = orchestrator(&server, &dir, settings).await;
        let summary = orch
            .process(&Target::catalog("g"), &RunControl::new(), None)
            .await;

        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.downloaded, 1);
        assert!(dir.path().join("g-catalog").join("1.jpg").exists());
    }

    #[tokio::test]
    async fn test_disabled_expansion_uses_catalog_files() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/g/catalog.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"page": 1, "threads": [{"no": 1, "tim": 21, "ext": ".png"}]}
            ])))
            .mount(&server)
            .await;
        mount_file(&server, "21.png", b"png").await;

        let dir = TempDir::new().unwrap();
        let settings = Settings {
            catalog_thread_limit: Some(0),
            ..Settings::default()
        };
        let orch = orchestrator(&server, &dir, settings).await;
        let summary = orch
            .process(&Target::board("g"), &RunControl::new(), None)
            .await;
        assert_eq!(summary.downloaded, 1);
        assert!(dir.path().join("g").join("1.png").exists());
    }

    #[tokio::test]
    async fn test_events_reach_the_sink() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        Mock::given(method("GET"))
            .and(path("/g/thread/5.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"posts": [
                {"no": 5, "sub": "Wallpapers", "tim": 31, "ext": ".jpg"}
            ]})))
            .mount(&server)
            .await;
        mount_file(&server, "31.jpg", b"wall").await;

        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&server, &dir, Settings::default()).await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = orch
            .process(&Target::thread("g", 5), &RunControl::new(), Some(tx))
            .await;
        assert_eq!(summary.title.as_deref(), Some("Wallpapers"));

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert!(matches!(events[0], RunEvent::Progress { index: 0, total: 1, .. }));
        assert!(matches!(
            events[1],
            RunEvent::Outcome {
                outcome: JobOutcome::Completed { .. },
                ..
            }
        ));
        assert_eq!(events[2], RunEvent::Summary(summary));
    }

    #[tokio::test]
    async fn test_process_all_stops_after_cancellation() {
        let Some(server) = start_mock_server_or_skip().await else {
            return;
        };
        let dir = TempDir::new().unwrap();
        let orch = orchestrator(&server, &dir, Settings::default()).await;
        let control = RunControl::new();
        control.cancel();

        let summaries = orch
            .process_all(&[Target::thread("g", 1), Target::thread("g", 2)], &control, None)
            .await;
        assert!(summaries.is_empty());
    }
}
