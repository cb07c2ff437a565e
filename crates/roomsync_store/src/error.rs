//! Error types for store operations.

use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while persisting or loading cached state.
///
/// Every variant is a storage fault: callers on the sync path treat any of
/// them as fatal for the loop.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// Persisted data is inconsistent beyond what tail truncation can repair.
    #[error("store corrupted: {0}")]
    Corrupted(String),

    /// A record could not be encoded.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A record could not be decoded.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The account cache is already opened by another session.
    #[error("account store is locked by another session: {0}")]
    Locked(String),

    /// The store has been closed.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted(message.into())
    }
}
