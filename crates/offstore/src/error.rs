//! Error types for offstore

use std::io;

use thiserror::Error;

/// Result type alias for offstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for store operations
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Store file is malformed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Response body too large (max 64 MB)
    #[error("Value too large: {0} bytes (max 64 MB)")]
    ValueTooLarge(usize),

    /// Store file full (max 1 GB)
    #[error("Store full: {0} bytes (max 1 GB)")]
    StoreFull(u64),

    /// The same request appears twice in one batch
    #[error("Duplicate request in batch: {0}")]
    DuplicateKey(String),

    /// Only GET requests can be stored
    #[error("Unsupported request method: {0}")]
    UnsupportedMethod(String),

    /// Store name is empty or contains characters outside `[A-Za-z0-9._-]`
    #[error("Invalid store name: {0:?}")]
    InvalidName(String),

    /// Store is closed
    #[error("Store is closed")]
    Closed,

    /// A batch write failed and the file could not be restored
    #[error("{error}; rollback failed: {rollback}")]
    RollbackFailed {
        /// The write error
        error: Box<Error>,
        /// The error restoring the committed length
        rollback: io::Error,
    },
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        Error::Parse(format!("{:?}", err.map_input(|input| input.len())))
    }
}
