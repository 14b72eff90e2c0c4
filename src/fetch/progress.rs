// src/fetch/progress.rs

//! Download progress reporting
//!
//! The engine owns one [`ProgressSink`] and is the only caller of it;
//! transfers hand their (already throttled) updates to the engine. Output
//! modes:
//! - `CliProgress`: one indicatif bar per transfer
//! - `LogProgress`: start/finish/failure lines via tracing
//! - `SilentProgress`: counts only, for quiet mode and tests

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Position of a transfer in its batch
pub type TransferId = usize;

/// Progress of a single transfer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    /// Bytes written so far
    pub downloaded: u64,
    /// Content length if announced, else the expected size
    pub total: Option<u64>,
    /// Average throughput since the transfer started
    pub bytes_per_sec: f64,
}

/// Receiver of transfer progress
pub trait ProgressSink: Send + Sync {
    /// A transfer was scheduled
    fn add_transfer(&self, id: TransferId, name: &str, expected_size: Option<u64>);

    /// Bytes arrived for a transfer
    fn update(&self, id: TransferId, update: ProgressUpdate);

    /// A transfer completed and passed validation
    fn finish(&self, id: TransferId, downloaded: u64);

    /// A transfer failed
    fn fail(&self, id: TransferId, error: &str);
}

/// Format a byte count for humans (`1.5 MB`)
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// No output; keeps totals
#[derive(Debug, Default)]
pub struct SilentProgress {
    started: AtomicUsize,
    finished: AtomicUsize,
    failed: AtomicUsize,
    bytes: AtomicU64,
}

impl SilentProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> usize {
        self.failed.load(Ordering::Relaxed)
    }

    /// Bytes of all finished transfers
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }
}

impl ProgressSink for SilentProgress {
    fn add_transfer(&self, _id: TransferId, _name: &str, _expected_size: Option<u64>) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn update(&self, _id: TransferId, _update: ProgressUpdate) {}

    fn finish(&self, _id: TransferId, downloaded: u64) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(downloaded, Ordering::Relaxed);
    }

    fn fail(&self, _id: TransferId, _error: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Logs transfer lifecycle events to tracing
///
/// Per-chunk updates go to debug level only.
#[derive(Debug, Default)]
pub struct LogProgress {
    names: Mutex<HashMap<TransferId, String>>,
}

impl LogProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn name(&self, id: TransferId) -> String {
        self.names
            .lock()
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{id}"))
    }
}

impl ProgressSink for LogProgress {
    fn add_transfer(&self, id: TransferId, name: &str, expected_size: Option<u64>) {
        match expected_size {
            Some(size) => debug!("Starting download of {} ({})", name, format_bytes(size)),
            None => debug!("Starting download of {}", name),
        }
        self.names.lock().insert(id, name.to_string());
    }

    fn update(&self, id: TransferId, update: ProgressUpdate) {
        debug!(
            "{}: {} of {} ({}/s)",
            self.name(id),
            format_bytes(update.downloaded),
            update.total.map(format_bytes).unwrap_or_else(|| "?".to_string()),
            format_bytes(update.bytes_per_sec as u64)
        );
    }

    fn finish(&self, id: TransferId, downloaded: u64) {
        let name = self.names.lock().remove(&id).unwrap_or_else(|| format!("#{id}"));
        info!("Downloaded {} ({})", name, format_bytes(downloaded));
    }

    fn fail(&self, id: TransferId, error: &str) {
        let name = self.names.lock().remove(&id).unwrap_or_else(|| format!("#{id}"));
        warn!("Download of {} failed: {}", name, error);
    }
}

/// Terminal progress bars for concurrent downloads
///
/// All bar bookkeeping sits behind one lock since the terminal is shared.
pub struct CliProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<TransferId, (String, ProgressBar)>>,
}

impl CliProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn create_bar(name: &str, total: Option<u64>) -> ProgressBar {
        let bar = match total {
            Some(size) => {
                let bar = ProgressBar::new(size);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
                {
                    bar.set_style(style.progress_chars("#>-"));
                }
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                if let Ok(style) = ProgressStyle::default_spinner()
                    .template("{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}")
                {
                    bar.set_style(style);
                }
                bar
            }
        };
        bar.set_message(name.to_string());
        bar
    }
}

impl Default for CliProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for CliProgress {
    fn add_transfer(&self, id: TransferId, name: &str, expected_size: Option<u64>) {
        let bar = self.multi.add(Self::create_bar(name, expected_size));
        self.bars.lock().insert(id, (name.to_string(), bar));
    }

    fn update(&self, id: TransferId, update: ProgressUpdate) {
        let bars = self.bars.lock();
        if let Some((_, bar)) = bars.get(&id) {
            if let Some(total) = update.total {
                if bar.length() != Some(total) {
                    bar.set_length(total);
                }
            }
            bar.set_position(update.downloaded);
        }
    }

    fn finish(&self, id: TransferId, downloaded: u64) {
        if let Some((name, bar)) = self.bars.lock().remove(&id) {
            bar.set_position(downloaded);
            bar.finish_with_message(format!("{} [done]", name));
        }
    }

    fn fail(&self, id: TransferId, error: &str) {
        if let Some((name, bar)) = self.bars.lock().remove(&id) {
            bar.abandon_with_message(format!("{} [FAILED: {}]", name, error));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_silent_progress_counts() {
        let progress = SilentProgress::new();
        progress.add_transfer(0, "a", Some(10));
        progress.add_transfer(1, "b", None);
        progress.update(0, ProgressUpdate { downloaded: 5, total: Some(10), bytes_per_sec: 1.0 });
        progress.finish(0, 10);
        progress.fail(1, "boom");

        assert_eq!(progress.started(), 2);
        assert_eq!(progress.finished(), 1);
        assert_eq!(progress.failed(), 1);
        assert_eq!(progress.bytes(), 10);
    }

    #[test]
    fn test_log_progress_forgets_finished() {
        let progress = LogProgress::new();
        progress.add_transfer(3, "repodata.json", None);
        assert_eq!(progress.name(3), "repodata.json");
        progress.finish(3, 100);
        assert_eq!(progress.name(3), "#3");
    }

    #[test]
    fn test_cli_progress_lifecycle() {
        let progress = CliProgress::new();
        progress.add_transfer(0, "pkg", Some(100));
        progress.update(0, ProgressUpdate { downloaded: 50, total: Some(120), bytes_per_sec: 10.0 });
        assert_eq!(progress.bars.lock()[&0].1.length(), Some(120));
        progress.finish(0, 120);
        assert!(progress.bars.lock().is_empty());
    }
}
