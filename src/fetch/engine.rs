// src/fetch/engine.rs

//! Concurrent download engine
//!
//! All transfers of a batch are multiplexed on the calling task: at most
//! `max_parallel` transfer futures live in a `FuturesUnordered`, and the
//! loop waits for completions with a bounded timeout so the interrupt flag
//! is observed at least once per poll interval.

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, trace, warn};

use super::progress::{ProgressSink, SilentProgress, TransferId};
use super::retry::RetryPolicy;
use super::transfer::Transfer;
use super::transport::Transport;
use crate::config::Config;
use crate::error::{Error, Result};

/// Shared cancellation flag, checked once per engine iteration
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scheduling parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum simultaneously active transfers
    pub max_parallel: usize,
    /// Longest wait for a completion before re-checking the interrupt flag
    pub poll_interval: Duration,
    /// Pause after repeated waits during which no transfer received data
    pub idle_backoff: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            poll_interval: Duration::from_millis(400),
            idle_backoff: Duration::from_millis(100),
        }
    }
}

impl EngineOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_parallel: config.max_parallel_downloads.max(1),
            ..Self::default()
        }
    }
}

/// Outcome of a drained batch, transfers in submission order
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub transfers: Vec<Transfer>,
}

impl DownloadReport {
    pub fn completed(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.iter().filter(|t| t.is_completed())
    }

    pub fn failed(&self) -> impl Iterator<Item = &Transfer> {
        self.transfers.iter().filter(|t| t.is_failed())
    }

    pub fn is_success(&self) -> bool {
        self.transfers.iter().all(Transfer::is_completed)
    }

    /// Bytes written by completed transfers
    pub fn total_bytes(&self) -> u64 {
        self.completed().map(Transfer::downloaded_size).sum()
    }

    /// All transfers if every one completed, otherwise [`Error::BatchFailed`]
    pub fn into_result(self) -> Result<Vec<Transfer>> {
        let total = self.transfers.len();
        let details: Vec<String> = self
            .failed()
            .map(|t| match t.error() {
                Some(e) => format!("  {}: {}", t.name(), e),
                None => format!("  {}: failed", t.name()),
            })
            .collect();

        if details.is_empty() {
            Ok(self.transfers)
        } else {
            Err(Error::BatchFailed {
                failed: details.len(),
                total,
                details: details.join("\n"),
            })
        }
    }
}

type Running<'a> = BoxFuture<'a, (TransferId, Transfer)>;

/// Runs batches of transfers under a global parallelism limit
pub struct DownloadEngine {
    transport: Arc<dyn Transport>,
    progress: Arc<dyn ProgressSink>,
    options: EngineOptions,
    interrupt: InterruptFlag,
}

impl DownloadEngine {
    pub fn new(transport: Arc<dyn Transport>, options: EngineOptions) -> Self {
        Self {
            transport,
            progress: Arc::new(SilentProgress::new()),
            options,
            interrupt: InterruptFlag::new(),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn interrupt_flag(&self) -> &InterruptFlag {
        &self.interrupt
    }

    fn start<'a>(&'a self, id: TransferId, mut transfer: Transfer, activity: &'a AtomicU64) -> Running<'a> {
        let transport = self.transport.as_ref();
        let progress = self.progress.as_ref();
        progress.add_transfer(id, transfer.name(), transfer.expected_size());

        async move {
            let mut report = |update| progress.update(id, update);
            transfer.run_observed(transport, &mut report, activity).await;
            (id, transfer)
        }
        .boxed()
    }

    fn settle(&self, id: TransferId, transfer: &mut Transfer) {
        transfer.finalize();
        if transfer.is_completed() {
            self.progress.finish(id, transfer.downloaded_size());
        } else {
            let message = transfer
                .error()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "failed".to_string());
            self.progress.fail(id, &message);
        }
    }

    /// Run a batch to completion
    ///
    /// Returns `Err(Error::Interrupted)` as soon as the interrupt flag is
    /// seen, abandoning active transfers. With `fail_fast`, the first failed
    /// transfer's error is returned and nothing further is scheduled.
    /// Otherwise every transfer is drained and the report is returned;
    /// see [`DownloadReport::into_result`].
    ///
    /// Two transfers of one batch may not share a destination; such a batch
    /// is rejected with [`Error::ConfigError`] before anything is scheduled.
    pub async fn run(&self, transfers: Vec<Transfer>, fail_fast: bool) -> Result<DownloadReport> {
        self.run_batch(transfers, &|_| fail_fast).await
    }

    async fn run_batch(
        &self,
        transfers: Vec<Transfer>,
        stop_on: &(dyn Fn(&Error) -> bool + Sync),
    ) -> Result<DownloadReport> {
        check_destinations(&transfers)?;

        let total = transfers.len();
        let mut pending: VecDeque<(TransferId, Transfer)> = transfers.into_iter().enumerate().collect();
        let mut done: Vec<Option<Transfer>> = std::iter::repeat_with(|| None).take(total).collect();
        // Bumped for every received chunk
        let activity = AtomicU64::new(0);
        let mut active: FuturesUnordered<Running<'_>> = FuturesUnordered::new();
        let mut seen_activity = 0u64;
        let mut empty_waits = 0u32;

        info!(
            "Downloading {} files (max {} concurrent)",
            total, self.options.max_parallel
        );

        loop {
            if self.interrupt.is_raised() {
                warn!(
                    "Download interrupted with {} active and {} pending transfers",
                    active.len(),
                    pending.len()
                );
                return Err(Error::Interrupted);
            }

            while active.len() < self.options.max_parallel {
                let Some((id, transfer)) = pending.pop_front() else {
                    break;
                };
                active.push(self.start(id, transfer, &activity));
            }

            if active.is_empty() {
                break;
            }

            let mut finished = match tokio::time::timeout(self.options.poll_interval, active.next()).await {
                Ok(Some(first)) => vec![first],
                Ok(None) => Vec::new(),
                Err(_) => {
                    let current = activity.load(Ordering::Relaxed);
                    if current != seen_activity {
                        seen_activity = current;
                        empty_waits = 0;
                        continue;
                    }
                    empty_waits += 1;
                    if empty_waits > 1 {
                        trace!("No transfer activity, backing off {:?}", self.options.idle_backoff);
                        tokio::time::sleep(self.options.idle_backoff).await;
                    }
                    continue;
                }
            };
            empty_waits = 0;

            // Drain whatever else is ready without waiting
            while let Some(Some(next)) = active.next().now_or_never() {
                finished.push(next);
            }

            for (id, mut transfer) in finished {
                self.settle(id, &mut transfer);
                if transfer.error().is_some_and(|e| stop_on(e)) {
                    let error = transfer.take_error().unwrap_or_else(|| {
                        Error::transfer(transfer.final_url(), "transfer failed")
                    });
                    warn!("Stopping batch after failure of {}: {}", transfer.name(), error);
                    return Err(error);
                }
                done[id] = Some(transfer);
            }
        }

        let report = DownloadReport {
            transfers: done.into_iter().flatten().collect(),
        };
        debug!(
            "Batch finished: {} completed, {} failed",
            report.completed().count(),
            report.failed().count()
        );
        Ok(report)
    }

    /// Run a batch, re-submitting retryable failures
    ///
    /// Failed transfers whose error is retryable are replaced by fresh
    /// transfers after `policy.delay(attempt)`, up to `policy.max_retries`
    /// times. With `fail_fast`, the first failure that will not be retried is
    /// returned as the error and stops scheduling of the current round.
    pub async fn run_with_retry(
        &self,
        transfers: Vec<Transfer>,
        policy: &RetryPolicy,
        fail_fast: bool,
    ) -> Result<DownloadReport> {
        let mut slots: Vec<Option<Transfer>> = Vec::with_capacity(transfers.len());
        let mut batch = Vec::with_capacity(transfers.len());
        let mut positions = Vec::with_capacity(transfers.len());
        for (i, transfer) in transfers.into_iter().enumerate() {
            slots.push(None);
            positions.push(i);
            batch.push(transfer);
        }

        let mut attempt = 0u32;
        loop {
            let round = attempt;
            let report = self
                .run_batch(batch, &|e| fail_fast && !policy.should_retry(round, e))
                .await?;

            let mut retry_batch = Vec::new();
            let mut retry_positions = Vec::new();
            for (position, mut transfer) in positions.into_iter().zip(report.transfers) {
                let retry = transfer
                    .error()
                    .is_some_and(|e| policy.should_retry(attempt, e));
                if retry {
                    retry_batch.push(transfer.resubmit());
                    retry_positions.push(position);
                } else if fail_fast && transfer.is_failed() {
                    return Err(transfer
                        .take_error()
                        .unwrap_or_else(|| Error::transfer(transfer.final_url(), "transfer failed")));
                }
                slots[position] = Some(transfer);
            }

            if retry_batch.is_empty() {
                break;
            }

            let delay = policy.delay(attempt);
            info!(
                "Retrying {} failed downloads in {:?} (attempt {}/{})",
                retry_batch.len(),
                delay,
                attempt + 1,
                policy.max_retries
            );
            tokio::time::sleep(delay).await;

            attempt += 1;
            batch = retry_batch;
            positions = retry_positions;
        }

        Ok(DownloadReport {
            transfers: slots.into_iter().flatten().collect(),
        })
    }
}

fn check_destinations(transfers: &[Transfer]) -> Result<()> {
    let mut seen = HashSet::with_capacity(transfers.len());
    for transfer in transfers {
        if !seen.insert(transfer.destination()) {
            return Err(Error::ConfigError(format!(
                "Multiple downloads target {}",
                transfer.destination().display()
            )));
        }
    }
    Ok(())
}
