//! Concurrent segment downloading
//!
//! Downloads every segment of one occurrence into a scratch directory with
//! full fan-out parallelism (bounded only by segment count) and per-file
//! error isolation: a failing download does not stop its siblings, and all
//! failures are reported together in one aggregated error. The caller owns
//! cleanup of the scratch directory.

use futures::future::join_all;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, RecordError, Result};
use crate::retry::{RetryPolicy, retry_with_policy};

/// Per-request retry policy for transient network failures
const DOWNLOAD_RETRY: RetryPolicy = RetryPolicy::backoff(4, Duration::from_millis(500), 2.0);

/// Downloads segment URLs into a destination directory
#[derive(Clone)]
pub struct SegmentFetcher {
    client: reqwest::Client,
}

impl SegmentFetcher {
    /// Create a fetcher using the given HTTP client
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Download all segment URLs into `dest`, one file per URL
    ///
    /// Files are named by the URL's final path component. All downloads run
    /// to completion best-effort; if any failed, the indices and causes are
    /// aggregated into a single [`RecordError::SegmentDownload`].
    pub async fn fetch_all(&self, urls: &[String], dest: &Path) -> Result<()> {
        tracing::debug!(count = urls.len(), dest = %dest.display(), "starting segment downloads");

        let downloads = urls
            .iter()
            .enumerate()
            .map(|(i, url)| async move { (i, self.fetch_one(url, dest).await) });

        let mut failures: Vec<(usize, String)> = join_all(downloads)
            .await
            .into_iter()
            .filter_map(|(i, result)| result.err().map(|e| (i, e.to_string())))
            .collect();
        failures.sort_by_key(|(i, _)| *i);

        if failures.is_empty() {
            tracing::debug!(count = urls.len(), "all segments downloaded");
            Ok(())
        } else {
            Err(RecordError::SegmentDownload { failures }.into())
        }
    }

    /// Download one URL, retrying transient network failures
    async fn fetch_one(&self, url: &str, dest: &Path) -> Result<()> {
        let file_name = segment_file_name(url)?;
        let target = dest.join(&file_name);

        retry_with_policy(&DOWNLOAD_RETRY, "segment download", || {
            let target = target.clone();
            async move {
                let response = self.client.get(url).send().await?.error_for_status()?;
                let body = response.bytes().await?;
                tokio::fs::write(&target, &body).await?;
                Ok::<_, Error>(())
            }
        })
        .await
    }
}

/// Final path component of a segment URL, used as the local file name
fn segment_file_name(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| Error::Other(format!("invalid segment URL {url}: {e}")))?;
    parsed
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .map(str::to_string)
        .ok_or_else(|| Error::Other(format!("segment URL has no file name: {url}")))
}
