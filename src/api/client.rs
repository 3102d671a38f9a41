//! Board JSON API client.
//!
//! [`ApiClient`] fetches thread and catalog documents. Every request goes
//! through the session's [`RateLimiter`] and reports its outcome back, so
//! metadata and media traffic share one cadence.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::ApiError;
use crate::download::{
    DownloadError, FailureType, HttpClient, RateLimiter, RequestOutcome, RetryDecision,
    RetryPolicy, classify_error, limiter_outcome, retry_after_delay,
};
use crate::media::MediaUrls;
use crate::target::{Target, TargetKind};

/// Per-request timeout for metadata documents.
pub const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client for the read-only board API.
#[derive(Clone)]
pub struct ApiClient {
    http: HttpClient,
    rate_limiter: Arc<RateLimiter>,
    urls: MediaUrls,
    retry_policy: RetryPolicy,
    timeout: Duration,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("urls", &self.urls)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    #[must_use]
    pub fn new(http: HttpClient, rate_limiter: Arc<RateLimiter>, urls: MediaUrls) -> Self {
        Self {
            http,
            rate_limiter,
            urls,
            retry_policy: RetryPolicy::default(),
            timeout: API_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn urls(&self) -> &MediaUrls {
        &self.urls
    }

    /// Fetches the document describing `target`.
    ///
    /// Threads map to `/<board>/thread/<id>.json`; catalogs and boards to
    /// `/<board>/catalog.json`.
    ///
    /// # Errors
    ///
    /// - [`ApiError::NotFound`] on 404/410, without retrying
    /// - [`ApiError::RateLimited`] once the 429 budget is spent
    /// - [`ApiError::Transient`] once the transient budget is spent
    /// - [`ApiError::Http`] for other error statuses
    /// - [`ApiError::Malformed`] if the body is not JSON
    #[instrument(skip(self), fields(target = %target))]
    pub async fn fetch_metadata(&self, target: &Target) -> Result<Value, ApiError> {
        let url = match (target.kind(), target.id()) {
            (TargetKind::Thread, Some(id)) => self.urls.thread_url(target.board_code(), id),
            _ => self.urls.catalog_url(target.board_code()),
        };
        self.fetch_json(&url).await
    }

    /// Fetches one thread document by number.
    ///
    /// # Errors
    ///
    /// Same as [`fetch_metadata`](Self::fetch_metadata).
    #[instrument(skip(self))]
    pub async fn fetch_thread(&self, board: &str, id: u64) -> Result<Value, ApiError> {
        let url = self.urls.thread_url(board, id);
        self.fetch_json(&url).await
    }

    async fn fetch_json(&self, url: &str) -> Result<Value, ApiError> {
        let mut budget = self.retry_policy.budget();

        loop {
            self.rate_limiter.acquire().await;
            debug!(url, attempt = budget.attempt(), "requesting API document");

            let error = match self.request(url).await {
                Ok(bytes) => {
                    self.rate_limiter.report_outcome(RequestOutcome::Success);
                    return serde_json::from_slice(&bytes)
                        .map_err(|e| ApiError::malformed(format!("{url}: {e}")));
                }
                Err(e) => e,
            };

            if let DownloadError::HttpStatus {
                status: 404 | 410, ..
            } = error
            {
                info!(url, "API document not found");
                return Err(ApiError::not_found(url));
            }

            if let Some(outcome) = limiter_outcome(&error) {
                self.rate_limiter.report_outcome(outcome);
            }

            let failure_type = classify_error(&error);
            match budget.on_failure(failure_type) {
                RetryDecision::Retry { attempt } => {
                    warn!(url, attempt, error = %error, "API request failed, retrying");
                    if let Some(wait) = retry_after_delay(&error) {
                        tokio::time::sleep(wait).await;
                    }
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url, %reason, "giving up on API request");
                    return Err(into_api_error(url, &error, failure_type, budget.attempt()));
                }
            }
        }
    }

    /// One GET, returning the body of a successful response.
    async fn request(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let response = self
            .http
            .inner()
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        response
            .bytes()
            .await
            .map(|body| body.to_vec())
            .map_err(|e| map_reqwest_error(url, e))
    }
}

fn map_reqwest_error(url: &str, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url)
    } else {
        DownloadError::network(url, error)
    }
}

fn into_api_error(
    url: &str,
    error: &DownloadError,
    failure_type: FailureType,
    attempts: u32,
) -> ApiError {
    match (failure_type, error) {
        (FailureType::RateLimited, _) => ApiError::RateLimited {
            url: url.to_string(),
            attempts,
        },
        (FailureType::Permanent, DownloadError::HttpStatus { status, .. }) => ApiError::Http {
            url: url.to_string(),
            status: *status,
        },
        _ => ApiError::Transient {
            url: url.to_string(),
            attempts,
            message: error.to_string(),
        },
    }
}
