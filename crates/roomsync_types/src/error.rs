//! Error types for typed content parsing.

use thiserror::Error;

/// Result type for content parsing.
pub type ContentResult<T> = Result<T, ContentError>;

/// Errors raised while interpreting an event's content.
#[derive(Debug, Error)]
pub enum ContentError {
    /// The event is not of the expected type.
    #[error("unexpected event type: expected {expected}, got {actual}")]
    UnexpectedType {
        /// The expected event type.
        expected: &'static str,
        /// The type actually found.
        actual: String,
    },

    /// A required field is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// The content did not match the expected shape.
    #[error("malformed content: {0}")]
    Malformed(#[from] serde_json::Error),
}
