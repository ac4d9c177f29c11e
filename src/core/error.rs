//! Defines the custom error type for the `core` module.

use std::path::{Path, PathBuf, StripPrefixError};
use thiserror::Error;

/// The primary error type for the `core` module.
///
/// This enum encapsulates all failure classes that core operations
/// (scanning, classification, content aggregation) can produce. Most
/// per-file conditions are converted into accumulated diagnostics by the
/// callers instead of being propagated; only scan-level failures such as
/// [`CoreError::OutsideAllowedRoot`] or [`CoreError::Cancelled`] abort an
/// operation outright.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The requested scan root lies outside the configured allowed base
    /// directory. This aborts the scan with no partial results.
    #[error("security violation: {path} is outside the allowed root {allowed}")]
    OutsideAllowedRoot { path: PathBuf, allowed: PathBuf },

    /// A file vanished between selection and read.
    #[error("file not found: {0}")]
    NotFound(PathBuf),

    /// The operating system denied access to a path.
    #[error("permission denied: {0}")]
    PermissionDenied(PathBuf),

    /// A file's bytes could not be interpreted as text.
    #[error("not valid UTF-8 text: {0}")]
    Decode(PathBuf),

    /// The scan target exists but is not a directory.
    #[error("the provided path is not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Represents an I/O error, typically from file system operations.
    #[error("I/O error for path {1}: {0}")]
    Io(#[source] std::io::Error, PathBuf),

    /// Represents an error during the parsing or building of a glob pattern.
    #[error("invalid glob pattern: {0}")]
    GlobPattern(#[from] globset::Error),

    /// Represents an error that occurred when a Tokio task was joined.
    /// This is often due to a task panicking or being cancelled.
    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Represents a failure to strip a path prefix.
    #[error("failed to strip prefix from path: {0}")]
    PathStrip(#[from] StripPrefixError),

    /// Represents a user-initiated cancellation of an operation.
    #[error("operation was cancelled by the user")]
    Cancelled,
}

impl CoreError {
    /// Classifies a raw I/O error for `path` into the matching variant.
    ///
    /// `NotFound` and `PermissionDenied` get their own variants because the
    /// aggregation batch treats them differently from generic read errors.
    pub fn from_io(err: std::io::Error, path: &Path) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ => Self::Io(err, path.to_path_buf()),
        }
    }
}
