//! Error types for the atomic file store.

use std::path::PathBuf;

/// Result type for file store operations.
pub type Result<T> = std::result::Result<T, FileStoreError>;

/// Errors that can occur while writing files or taking locks.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// I/O operation failed (write, rename, stream copy, lock file removal)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Lock could not be obtained before the wait budget ran out
    #[error("Getting lock on {path:?} timed out")]
    LockTimeout { path: PathBuf },

    /// Directory creation failed
    #[error("Failed to create directory: {path:?} - {source}")]
    DirectoryCreation {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Destination has no file name to name the temp file after
    #[error("Invalid destination: {path:?} has no file name")]
    InvalidDestination { path: PathBuf },
}

impl FileStoreError {
    /// True when this error is a lock acquisition timeout.
    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, FileStoreError::LockTimeout { .. })
    }
}
