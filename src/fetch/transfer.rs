// src/fetch/transfer.rs

//! A single download
//!
//! Lifecycle: `Created -> Active -> Finalizing -> Completed | Failed`.
//!
//! While active, the response body is streamed into the destination file and
//! throttled progress is handed to the caller. Finalization runs either the
//! caller's finalizer or the default validation (status, size, checksum).
//! A failed transfer leaves its destination on disk; it is never valid.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, trace};

use super::progress::ProgressUpdate;
use super::transport::{TransferRequest, Transport};
use crate::error::{Error, Result, ValidationError};
use crate::hash::{Hash, verify_file};

/// Minimum time between two progress updates of one transfer
///
/// The update sent once the body is complete is not throttled, so it may
/// follow the previous one sooner.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(150);

/// Replaces default validation when set
pub type Finalizer = Arc<dyn Fn(&Transfer) -> Result<()> + Send + Sync>;

/// Transfer lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Created,
    Active,
    Finalizing,
    Completed,
    Failed,
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Active => "active",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// One URL downloaded to one destination file
pub struct Transfer {
    name: String,
    url: String,
    destination: PathBuf,
    expected_size: Option<u64>,
    expected_checksum: Option<Hash>,
    cached_etag: Option<String>,
    cached_last_modified: Option<String>,
    extra_headers: Vec<(String, String)>,
    finalizer: Option<Finalizer>,

    state: TransferState,
    started: Option<Instant>,
    http_status: u16,
    final_url: Option<String>,
    downloaded_size: u64,
    etag: Option<String>,
    last_modified: Option<String>,
    cache_control: Option<String>,
    error: Option<Error>,
}

impl Transfer {
    pub fn new(name: impl Into<String>, url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            destination: destination.into(),
            expected_size: None,
            expected_checksum: None,
            cached_etag: None,
            cached_last_modified: None,
            extra_headers: Vec::new(),
            finalizer: None,
            state: TransferState::Created,
            started: None,
            http_status: 0,
            final_url: None,
            downloaded_size: 0,
            etag: None,
            last_modified: None,
            cache_control: None,
            error: None,
        }
    }

    pub fn with_expected_size(mut self, size: u64) -> Self {
        self.expected_size = Some(size);
        self
    }

    pub fn with_checksum(mut self, checksum: Hash) -> Self {
        self.expected_checksum = Some(checksum);
        self
    }

    /// Revalidation state from a previous response
    pub fn with_cache_headers(mut self, etag: Option<String>, last_modified: Option<String>) -> Self {
        self.cached_etag = etag.filter(|s| !s.is_empty());
        self.cached_last_modified = last_modified.filter(|s| !s.is_empty());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_finalizer(mut self, finalizer: Finalizer) -> Self {
        self.finalizer = Some(finalizer);
        self
    }

    /// A fresh `Created` transfer with the same request and expectations
    pub fn resubmit(&self) -> Self {
        Self {
            name: self.name.clone(),
            url: self.url.clone(),
            destination: self.destination.clone(),
            expected_size: self.expected_size,
            expected_checksum: self.expected_checksum.clone(),
            cached_etag: self.cached_etag.clone(),
            cached_last_modified: self.cached_last_modified.clone(),
            extra_headers: self.extra_headers.clone(),
            finalizer: self.finalizer.clone(),
            ..Self::new(String::new(), String::new(), PathBuf::new())
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub fn expected_checksum(&self) -> Option<&Hash> {
        self.expected_checksum.as_ref()
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn is_completed(&self) -> bool {
        self.state == TransferState::Completed
    }

    pub fn is_failed(&self) -> bool {
        self.state == TransferState::Failed
    }

    /// Response status (0 before a response arrived)
    pub fn http_status(&self) -> u16 {
        self.http_status
    }

    /// Effective URL after redirects, falling back to the requested URL
    pub fn final_url(&self) -> &str {
        self.final_url.as_deref().unwrap_or(&self.url)
    }

    pub fn downloaded_size(&self) -> u64 {
        self.downloaded_size
    }

    /// `ETag` of the response
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// `Last-Modified` of the response
    pub fn last_modified(&self) -> Option<&str> {
        self.last_modified.as_deref()
    }

    /// `Cache-Control` of the response
    pub fn cache_control(&self) -> Option<&str> {
        self.cache_control.as_deref()
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// Whether the request carries revalidation headers
    pub fn is_conditional(&self) -> bool {
        self.cached_etag.is_some() || self.cached_last_modified.is_some()
    }

    /// Whether the server answered "not modified" to a conditional request
    pub fn is_not_modified(&self) -> bool {
        self.http_status == 304 && self.is_conditional()
    }

    /// The request this transfer sends
    pub fn request(&self) -> TransferRequest {
        let mut headers = Vec::new();
        if let Some(etag) = &self.cached_etag {
            headers.push(("If-None-Match".to_string(), etag.clone()));
        }
        if let Some(modified) = &self.cached_last_modified {
            headers.push(("If-Modified-Since".to_string(), modified.clone()));
        }
        if self.url.ends_with(".json") {
            headers.push((
                "Accept-Encoding".to_string(),
                "gzip, deflate, compress, identity".to_string(),
            ));
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        headers.extend(self.extra_headers.iter().cloned());

        TransferRequest {
            url: self.url.clone(),
            headers,
        }
    }

    fn progress(&self, total: Option<u64>) -> ProgressUpdate {
        let elapsed = self
            .started
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or_default();
        let bytes_per_sec = if elapsed > 0.0 {
            self.downloaded_size as f64 / elapsed
        } else {
            0.0
        };
        ProgressUpdate {
            downloaded: self.downloaded_size,
            total,
            bytes_per_sec,
        }
    }

    /// Run the network part of the transfer
    ///
    /// On return the destination is flushed and closed. Network errors move
    /// the transfer to `Failed`; everything else waits for [`finalize`].
    ///
    /// [`finalize`]: Transfer::finalize
    pub async fn run(
        &mut self,
        transport: &dyn Transport,
        on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
    ) {
        let activity = AtomicU64::new(0);
        self.run_observed(transport, on_progress, &activity).await;
    }

    /// [`run`](Transfer::run), bumping `activity` for every received chunk
    pub async fn run_observed(
        &mut self,
        transport: &dyn Transport,
        on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
        activity: &AtomicU64,
    ) {
        self.state = TransferState::Active;
        self.started = Some(Instant::now());

        if let Err(e) = self.download(transport, on_progress, activity).await {
            debug!("Transfer {} failed: {}", self.name, e);
            self.fail(e);
        }
    }

    async fn download(
        &mut self,
        transport: &dyn Transport,
        on_progress: &mut (dyn FnMut(ProgressUpdate) + Send),
        activity: &AtomicU64,
    ) -> Result<()> {
        let request = self.request();
        let mut response = transport.start(&request).await?;

        // Headers precede the body
        self.http_status = response.status();
        self.final_url = Some(response.final_url().to_string());
        self.etag = response.header("ETag");
        self.last_modified = response.header("Last-Modified");
        self.cache_control = response.header("Cache-Control");
        trace!("{} answered {}", self.final_url(), self.http_status);

        if self.http_status == 304 {
            return Ok(());
        }

        let total = response.content_length().or(self.expected_size);
        let file = tokio::fs::File::create(&self.destination).await.map_err(|e| {
            Error::IoError(format!("Failed to create {}: {e}", self.destination.display()))
        })?;
        let mut writer = BufWriter::new(file);

        let mut last_emit: Option<Instant> = None;
        while let Some(chunk) = response.next_chunk().await? {
            activity.fetch_add(1, Ordering::Relaxed);
            writer.write_all(&chunk).await.map_err(|e| {
                Error::IoError(format!("Failed to write {}: {e}", self.destination.display()))
            })?;
            self.downloaded_size += chunk.len() as u64;

            let now = Instant::now();
            if last_emit.is_none_or(|t| now.duration_since(t) >= PROGRESS_INTERVAL) {
                on_progress(self.progress(total));
                last_emit = Some(now);
            }
        }

        writer.flush().await.map_err(|e| {
            Error::IoError(format!("Failed to flush {}: {e}", self.destination.display()))
        })?;
        let file = writer.into_inner();
        file.sync_all().await.map_err(|e| {
            Error::IoError(format!("Failed to sync {}: {e}", self.destination.display()))
        })?;
        drop(file);

        on_progress(self.progress(total));
        Ok(())
    }

    /// Validate the finished transfer and settle its final state
    ///
    /// A custom finalizer replaces the default checks entirely. Transfers
    /// that already failed stay failed.
    pub fn finalize(&mut self) {
        if self.state == TransferState::Failed {
            return;
        }
        self.state = TransferState::Finalizing;

        let result = match self.finalizer.clone() {
            Some(finalizer) => finalizer(self),
            None => self.validate(),
        };

        match result {
            Ok(()) => self.state = TransferState::Completed,
            Err(e) => self.fail(e),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.http_status >= 400 {
            return Err(Error::HttpStatus {
                url: self.final_url().to_string(),
                status: self.http_status,
            });
        }

        if self.http_status == 304 {
            if self.is_conditional() {
                return Ok(());
            }
            // Nothing was written and nothing was cached
            return Err(Error::HttpStatus {
                url: self.final_url().to_string(),
                status: self.http_status,
            });
        }

        if let Some(expected) = self.expected_size {
            if expected != self.downloaded_size {
                return Err(ValidationError::SizeMismatch {
                    name: self.name.clone(),
                    expected,
                    actual: self.downloaded_size,
                }
                .into());
            }
        }

        if let Some(expected) = &self.expected_checksum {
            verify_file(&self.destination, expected).map_err(|e| ValidationError::ChecksumMismatch {
                name: self.name.clone(),
                algorithm: e.algorithm.to_string(),
                expected: e.expected,
                actual: e.actual,
            })?;
        }

        Ok(())
    }

    fn fail(&mut self, error: Error) {
        self.state = TransferState::Failed;
        self.error = Some(error);
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("name", &self.name)
            .field("url", &self.url)
            .field("destination", &self.destination)
            .field("state", &self.state)
            .field("http_status", &self.http_status)
            .field("downloaded_size", &self.downloaded_size)
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}
