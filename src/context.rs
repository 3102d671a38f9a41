//! Long-lived session resources.
//!
//! A [`SessionContext`] owns the handles every target of a session shares:
//! the HTTP client, the single process-wide [`RateLimiter`] and the
//! [`HashLedger`]. Open it once, hand it to the
//! [`Orchestrator`](crate::Orchestrator), close it when done.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::api::ApiClient;
use crate::db::{Database, DbError};
use crate::download::{HttpClient, RateLimiter};
use crate::ledger::HashLedger;
use crate::media::MediaUrls;
use crate::settings::Settings;

/// Errors from opening a session.
#[derive(Debug, Error)]
pub enum ContextError {
    /// The ledger directory could not be created.
    #[error("cannot create ledger directory {path}: {source}")]
    LedgerDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ledger database could not be opened or migrated.
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Shared handles for one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub http: HttpClient,
    pub rate_limiter: Arc<RateLimiter>,
    pub ledger: HashLedger,
    pub urls: MediaUrls,
    db: Database,
}

impl SessionContext {
    /// Opens the ledger named by `settings` and builds the shared handles.
    ///
    /// A zero `min_delay` disables pacing entirely.
    ///
    /// # Errors
    ///
    /// Returns [`ContextError`] if the ledger directory or database cannot
    /// be opened.
    #[instrument(skip(settings), fields(ledger = %settings.ledger_path().display()))]
    pub async fn open(settings: &Settings) -> Result<Self, ContextError> {
        let ledger_path = settings.ledger_path();
        if let Some(dir) = ledger_path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| ContextError::LedgerDirectory {
                    path: dir.to_path_buf(),
                    source,
                })?;
        }

        let db = Database::new(&ledger_path).await?;
        let ctx = Self::with_database(settings, db);
        info!(
            rate_limit_ms = ctx.rate_limiter.min_delay().as_millis(),
            rate_limit_disabled = ctx.rate_limiter.is_disabled(),
            "session opened"
        );
        Ok(ctx)
    }

    /// Builds a session around an already open database.
    #[must_use]
    pub fn with_database(settings: &Settings, db: Database) -> Self {
        let rate_limiter = if settings.min_delay.is_zero() {
            RateLimiter::disabled()
        } else {
            RateLimiter::with_config(settings.rate_limiter_config())
        };
        debug!(min_delay = ?settings.min_delay, max_delay = ?settings.max_delay, "rate limiter configured");

        Self {
            http: HttpClient::new_with_timeouts(
                settings.connect_timeout_secs,
                settings.read_timeout_secs,
            ),
            rate_limiter: Arc::new(rate_limiter),
            ledger: HashLedger::open(&db),
            urls: settings.media_urls(),
            db,
        }
    }

    /// Metadata client sharing this session's HTTP client and limiter.
    #[must_use]
    pub fn api_client(&self, settings: &Settings) -> ApiClient {
        ApiClient::new(
            self.http.clone(),
            Arc::clone(&self.rate_limiter),
            self.urls.clone(),
        )
        .with_retry_policy(settings.retry_policy())
    }

    /// Closes the ledger database.
    pub async fn close(self) {
        self.db.close().await;
    }
}
