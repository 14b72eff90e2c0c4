// src/fetch/mod.rs

//! Concurrent artifact downloads
//!
//! - [`Transfer`]: one URL to one file, with validation
//! - [`DownloadEngine`]: runs batches under a parallelism limit
//! - [`Transport`]: pluggable HTTP / `file://` backends
//! - [`ProgressSink`]: progress output owned by the engine
//! - [`RetryPolicy`]: re-submission of transient failures

mod engine;
mod progress;
mod retry;
mod transfer;
mod transport;

pub use engine::{DownloadEngine, DownloadReport, EngineOptions, InterruptFlag};
pub use progress::{
    CliProgress, LogProgress, ProgressSink, ProgressUpdate, SilentProgress, TransferId,
    format_bytes,
};
pub use retry::RetryPolicy;
pub use transfer::{Finalizer, PROGRESS_INTERVAL, Transfer, TransferState};
pub use transport::{
    FileTransport, HttpTransport, HttpTransportOptions, ResponseStream, SchemeTransport,
    TransferRequest, Transport, http_date,
};
