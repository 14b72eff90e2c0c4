// src/error.rs

//! Error types for channel resolution and package acquisition
//!
//! Resolution and whitelist errors abort a batch before any network
//! activity starts. Transfer and validation errors are per-transfer and
//! are either returned immediately (fail-fast) or collected into
//! [`Error::BatchFailed`]. [`Error::Interrupted`] is kept distinct so callers
//! never mistake a cancelled batch for an integrity problem.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Post-download validation failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Downloaded byte count differs from the expected size
    #[error("Download of {name} does not have expected size: expected {expected} bytes, got {actual}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Recomputed checksum differs from the expected one
    #[error("Checksum mismatch for {name}: expected {algorithm}:{expected}, got {actual}")]
    ChecksumMismatch {
        name: String,
        algorithm: String,
        expected: String,
        actual: String,
    },
}

/// Errors produced by the library
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or unrecognized channel specification
    #[error("Cannot resolve channel '{spec}': {reason}")]
    ResolutionError { spec: String, reason: String },

    /// Resolved channel is not part of the configured whitelist
    #[error("Channel {0} not allowed")]
    ChannelNotAllowed(String),

    /// Network-level failure (connection, timeout, protocol)
    #[error("Download error [{url}]: {message}")]
    TransferError { url: String, message: String },

    /// Server answered with a status the transfer treats as fatal
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// Size or checksum mismatch after the transfer completed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The engine stopped because the interrupt flag was raised
    #[error("Download interrupted")]
    Interrupted,

    /// One or more transfers of a drained batch failed
    #[error("{failed} of {total} downloads failed:\n{details}")]
    BatchFailed {
        failed: usize,
        total: usize,
        details: String,
    },

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Component failed to initialize (HTTP client, progress display, ...)
    #[error("Initialization error: {0}")]
    InitError(String),

    /// Filesystem failure with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Raw I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Repodata cache state could not be (de)serialized
    #[error("Invalid cache state: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether re-submitting a fresh transfer may succeed
    ///
    /// Only network failures and transient server statuses qualify.
    /// Whitelist violations, validation mismatches and interrupts never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::TransferError { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Whether this error was caused by the interrupt flag
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }

    pub(crate) fn resolution(spec: &str, reason: impl Into<String>) -> Self {
        Self::ResolutionError {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transfer(url: &str, message: impl std::fmt::Display) -> Self {
        Self::TransferError {
            url: url.to_string(),
            message: message.to_string(),
        }
    }
}
