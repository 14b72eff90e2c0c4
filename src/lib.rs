// src/lib.rs

//! Condafetch
//!
//! Conda channel resolution and concurrent package acquisition.
//!
//! # Architecture
//!
//! - Explicit context: channel settings live in a [`ChannelContext`] built
//!   from [`Config`], never in process-wide state
//! - Resolution: channel specs (names, URLs, paths, package files) become
//!   [`Channel`] values with eagerly computed canonical names
//! - Acquisition: a [`DownloadEngine`] multiplexes [`Transfer`]s over a
//!   pluggable [`Transport`] under a parallelism limit
//! - Repodata: conditional revalidation of cached `repodata.json` files

pub mod channel;
pub mod config;
mod error;
pub mod fetch;
pub mod hash;
pub mod platform;
pub mod repodata;
pub mod url;

pub use channel::{Channel, ChannelContext, ChannelResolver};
pub use config::Config;
pub use error::{Error, Result, ValidationError};
pub use fetch::{
    DownloadEngine, DownloadReport, EngineOptions, InterruptFlag, ProgressSink, RetryPolicy,
    Transfer, TransferState, Transport,
};
pub use hash::{Hash, HashAlgorithm, Hasher};
pub use repodata::{RepodataStatus, RepodataTarget, update_repodata};
