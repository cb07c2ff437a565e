//! Error types for the client.

use roomsync_store::StoreError;
use thiserror::Error;

/// Result type for client operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while talking to the homeserver or applying what it
/// returned.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The homeserver answered with a non-success status.
    #[error("homeserver returned {status} {errcode}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Protocol error code, `M_UNKNOWN` when the body carried none.
        errcode: String,
        /// Human-readable message.
        message: String,
    },

    /// A response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// The local cache failed. Fatal for the sync loop.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Something the caller asked for does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller passed an unusable argument.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is not valid in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if repeating the request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { retryable, .. } => *retryable,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => true,
            _ => false,
        }
    }

    /// Returns true if the local cache failed.
    #[must_use]
    pub fn is_storage_fault(&self) -> bool {
        matches!(self, Self::Storage(_))
    }

    /// Returns true if the operation was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true for a local or remote not-found condition.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Http { status: 404, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad url").is_retryable());
        assert!(SyncError::Decode("eof".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());

        let http = |status| SyncError::Http {
            status,
            errcode: "M_UNKNOWN".into(),
            message: String::new(),
        };
        assert!(http(502).is_retryable());
        assert!(http(429).is_retryable());
        assert!(!http(403).is_retryable());
        assert!(http(404).is_not_found());
    }

    #[test]
    fn storage_faults() {
        let err = SyncError::from(StoreError::Closed);
        assert!(err.is_storage_fault());
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "storage error: store is closed");
    }
}
