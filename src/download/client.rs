//! The one HTTP client of a session.
//!
//! Both the metadata client and the media runner send through
//! [`HttpClient`]; non-2xx replies are turned into [`DownloadError`]s here
//! so retry classification sees a single error shape. Media bodies are
//! streamed to disk and hashed in the same pass.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE, RETRY_AFTER};
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::user_agent;

/// Pooled reqwest client carrying the chanfetch User-Agent.
///
/// Cloning is cheap and shares the pool.
///
/// # Example
///
/// ```no_run
/// use chanfetch_core::download::HttpClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpClient::new();
/// let response = client.get("https://a.4cdn.org/g/catalog.json", None).await?;
/// println!("status: {}", response.status());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Client with the session defaults: 30 s to connect, 5 min per
    /// request so long videos can finish.
    ///
    /// # Panics
    ///
    /// Only if reqwest rejects the static builder configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Client with explicit connect and whole-request timeouts.
    ///
    /// # Panics
    ///
    /// Only if reqwest rejects the builder configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .gzip(true)
            .user_agent(user_agent::default_user_agent())
            .build()
            .expect("reqwest client configuration is static");
        Self { client }
    }

    /// Sends a GET request, optionally asking for the bytes from `range_start` on.
    ///
    /// Success statuses (including 206 Partial Content) return the response.
    /// 416 becomes [`DownloadError::RangeNotSatisfiable`] with the length
    /// from `Content-Range`. Everything else becomes
    /// [`DownloadError::HttpStatus`] with the Retry-After header attached
    /// when present.
    ///
    /// # Errors
    ///
    /// [`DownloadError::InvalidUrl`], [`DownloadError::Timeout`],
    /// [`DownloadError::Network`] or [`DownloadError::HttpStatus`].
    #[instrument(level = "debug", skip(self), fields(url = %url))]
    pub async fn get(
        &self,
        url: &str,
        range_start: Option<u64>,
    ) -> Result<reqwest::Response, DownloadError> {
        if url::Url::parse(url).is_err() {
            return Err(DownloadError::invalid_url(url));
        }

        let mut request = self.client.get(url);
        if let Some(start) = range_start {
            request = request.header(RANGE, format!("bytes={start}-"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                DownloadError::timeout(url)
            } else {
                DownloadError::network(url, e)
            }
        })?;

        let status = response.status();
        if status.as_u16() == 416 {
            let total = response
                .headers()
                .get(CONTENT_RANGE)
                .and_then(|v| v.to_str().ok())
                .and_then(unsatisfied_range_total);
            debug!(?total, "range not satisfiable");
            return Err(DownloadError::range_not_satisfiable(url, total));
        }
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            debug!(status = status.as_u16(), ?retry_after, "error status");
            return Err(DownloadError::http_status_with_retry_after(
                url,
                status.as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }

    /// Raw client, for requests that need per-request options.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Length from an unsatisfied-range header, `bytes */N`.
fn unsatisfied_range_total(value: &str) -> Option<u64> {
    value.trim().strip_prefix("bytes */")?.trim().parse().ok()
}

/// Total size of the resource, accounting for partial responses.
///
/// For 206 the Content-Length covers only the remaining bytes, so the
/// bytes already on disk are added back.
pub(crate) fn total_content_length(response: &reqwest::Response, existing_bytes: u64) -> Option<u64> {
    let current = response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    if response.status().as_u16() == 206 {
        current.map(|remaining| existing_bytes.saturating_add(remaining))
    } else {
        current
    }
}

/// Streams a response body into `writer`, feeding every chunk to `hasher`.
///
/// Cancellation is checked between chunks. On cancellation the bytes
/// received so far are flushed, so the partial file stays resumable, and
/// [`DownloadError::Cancelled`] is returned.
pub(crate) async fn stream_to_file(
    writer: &mut BufWriter<File>,
    response: reqwest::Response,
    hasher: &mut Sha256,
    url: &str,
    file_path: &Path,
    cancel: &CancellationToken,
) -> Result<u64, DownloadError> {
    let mut stream = response.bytes_stream();
    let mut bytes_written: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            chunk = stream.next() => Some(chunk),
        };

        let Some(chunk) = next else {
            flush(writer, file_path).await?;
            debug!(bytes_written, "stream interrupted by cancellation");
            return Err(DownloadError::cancelled(url));
        };
        let Some(chunk_result) = chunk else {
            break;
        };

        let chunk = match chunk_result {
            Ok(chunk) => chunk,
            Err(e) => {
                // Keep what arrived so the next attempt can resume from it
                flush(writer, file_path).await?;
                return Err(if e.is_timeout() {
                    DownloadError::timeout(url)
                } else {
                    DownloadError::network(url, e)
                });
            }
        };

        writer
            .write_all(&chunk)
            .await
            .map_err(|e| DownloadError::io(file_path, e))?;
        hasher.update(&chunk);
        bytes_written += chunk.len() as u64;
    }

    flush(writer, file_path).await?;
    Ok(bytes_written)
}

async fn flush(writer: &mut BufWriter<File>, file_path: &Path) -> Result<(), DownloadError> {
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(file_path, e))
}
