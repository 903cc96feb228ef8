//! Error types for the Watchpoint library
//!
//! Two layers of errors exist. [`WatchpointError`] is the structural error
//! type returned by operations the caller must react to (watch creation,
//! serialization, revert I/O). [`ReadError`] is the file reader's
//! taxonomy; the change processor branches on its kinds and absorbs every
//! one of them at the component boundary, so `ReadError` never crosses the
//! public API.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Watchpoint library
pub type Result<T> = std::result::Result<T, WatchpointError>;

/// Main error type for all Watchpoint operations
#[derive(Debug, Error)]
pub enum WatchpointError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the underlying OS watch backend
    #[error("Watch error: {0}")]
    Notify(#[from] notify::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// OS watch could not be established for a root
    #[error("Failed to start watch on {path:?}: {reason}")]
    WatchStartFailure {
        /// Root that could not be watched
        path: PathBuf,
        /// Backend-reported reason
        reason: String,
    },

    /// Session id not present in the registry
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WatchpointError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        WatchpointError::Internal(msg.into())
    }

    /// Create a watch-start failure for a root
    pub fn watch_start(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        WatchpointError::WatchStartFailure {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// File reader error taxonomy
///
/// The change processor depends on the `NotFound` / other distinction to
/// infer deletions, and the monitor counts `TooLarge`, `Binary` and `Io`
/// in its error statistics. None of these are surfaced to callers.
#[derive(Debug, Error)]
pub enum ReadError {
    /// The file does not exist (or a path component is gone)
    #[error("file not found")]
    NotFound,

    /// Stat-reported size exceeds the configured ceiling
    #[error("file too large: {size} bytes exceeds limit of {limit} bytes")]
    TooLarge {
        /// Actual file size
        size: u64,
        /// Configured size limit
        limit: u64,
    },

    /// A null byte was found in the leading window
    #[error("binary content")]
    Binary,

    /// Any other I/O failure (including non-regular files)
    #[error("IO error: {0}")]
    Io(#[source] std::io::Error),
}

impl ReadError {
    /// Whether this error should be counted in session error statistics.
    /// `NotFound` is a signal (deletion inference), not a failure.
    pub fn is_counted(&self) -> bool {
        !matches!(self, ReadError::NotFound)
    }
}
