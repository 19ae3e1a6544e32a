//! Error taxonomy for the box store.
//!
//! Errors fall into two families: programmer errors that surface
//! immediately and are never recovered from (`Config`, `Validation`,
//! `IllegalState`), and operational errors that are isolated to the
//! offending box or operation (`File`, `NotFound`, `Closed`).

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur in box store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Invalid construction parameters. Never recovered.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Malformed persisted metadata.
    #[error("invalid metadata: {0}")]
    Validation(String),

    /// File open/read/write/close failure, carrying the offending path.
    #[error("file error on {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Read of a box id that was never written. Usable as a cache-miss signal.
    #[error("box {0} has never been written to the backend")]
    NotFound(u64),

    /// Programmer error: an operation was attempted in a state that
    /// cannot support it. Fail fast, never silently swallowed.
    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The file backend is closed; reopen before further operations.
    #[error("file backend is closed")]
    Closed,

    /// The backing implementation does not provide this operation.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// A bulk operation observed its cancellation flag between boxes.
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn file(path: impl AsRef<Path>, source: io::Error) -> Self {
        StoreError::File {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Result type for box store operations
pub type StoreResult<T> = Result<T, StoreError>;
