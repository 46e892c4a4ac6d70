//! Error types for Edis
//!
//! One variant per failure category. The `NotFound` and `Found` variants are
//! internal control signals between handlers and never reach a client reply;
//! callers translate them before responding.

use thiserror::Error;

/// Main error type for Edis operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EdisError {
    /// Operation expected a different stored value type.
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,

    /// String value cannot be parsed as a signed integer, or the result
    /// would not fit the integer range.
    #[error("value is not an integer or out of range")]
    NotInteger,

    /// String value cannot be parsed as a float.
    #[error("value is not a valid float")]
    NotFloat,

    /// Explicitly reported by commands such as `LSET` and `RENAME` when the
    /// source key does not exist.
    #[error("no such key")]
    NoSuchKey,

    /// Index or bit offset outside the allowed bounds.
    #[error("index out of range")]
    OutOfRange,

    /// Internal: a non-blocking try inside a blocking command found nothing.
    #[error("not found")]
    NotFound,

    /// Internal: a cross-shard receive hit an already-occupied destination.
    #[error("destination key already exists")]
    Found,

    /// `KEYS` pattern failed to compile.
    #[error("invalid pattern: {0}")]
    BadPattern(String),

    /// Propagated from the underlying key-value store.
    #[error("storage error: {0}")]
    Storage(String),

    /// Unknown or malformed command; fatal to the request, not the actor.
    #[error("unexpected request: {0}")]
    Unexpected(String),

    /// Client-side reply wait exceeded.
    #[error("operation timed out")]
    Timeout,

    /// The external notification bus rejected the command.
    #[error("notification bus rejected the command")]
    NotifyFailed,

    /// Configuration could not be read or validated.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for EdisError {
    fn from(err: std::io::Error) -> Self {
        EdisError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for EdisError {
    fn from(err: serde_json::Error) -> Self {
        EdisError::Storage(err.to_string())
    }
}
