// src/error.rs
//
// Copyright, 2025.  Signal65 / Futurum Group.
//
// Error types shared by the driver and its transports.

use std::fmt;

use thiserror::Error;

/// Lifecycle of a chunked writer. Once a terminal state is reached the writer
/// refuses every further call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    Writable,
    Closed,
    Committed,
    Cancelled,
}

impl WriterState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WriterState::Writable)
    }
}

impl fmt::Display for WriterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriterState::Writable => "writable",
            WriterState::Closed => "closed",
            WriterState::Committed => "committed",
            WriterState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Failures reported by an [`ObjectClient`](crate::transport::ObjectClient).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no such key: {0}")]
    NoSuchKey(String),

    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    /// Ranged read starting at or past the end of the object.
    #[error("requested range not satisfiable")]
    InvalidRange,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Error type returned by every driver operation.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("path not found: {path}")]
    NotFound { path: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("writer already {0}")]
    AlreadyTerminal(WriterState),

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl DriverError {
    pub fn not_found(path: impl Into<String>) -> Self {
        DriverError::NotFound { path: path.into() }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DriverError::NotFound { .. })
    }

    /// Maps a missing key onto `NotFound` for the logical `path`; everything
    /// else passes through untouched.
    pub(crate) fn from_transport(path: &str, err: TransportError) -> Self {
        match err {
            TransportError::NoSuchKey(_) => DriverError::not_found(path),
            other => DriverError::Transport(other),
        }
    }
}

impl From<anyhow::Error> for DriverError {
    fn from(e: anyhow::Error) -> Self {
        DriverError::Transport(TransportError::Other(e))
    }
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;

pub type TransportResult<T> = std::result::Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_becomes_not_found() {
        let err = DriverError::from_transport("/a/b", TransportError::NoSuchKey("a/b".into()));
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "path not found: /a/b");
    }

    #[test]
    fn test_other_transport_errors_pass_through() {
        let err = DriverError::from_transport("/x", TransportError::InvalidRange);
        assert!(matches!(err, DriverError::Transport(TransportError::InvalidRange)));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!WriterState::Writable.is_terminal());
        assert!(WriterState::Closed.is_terminal());
        assert!(WriterState::Committed.is_terminal());
        assert!(WriterState::Cancelled.is_terminal());
        assert_eq!(
            DriverError::AlreadyTerminal(WriterState::Committed).to_string(),
            "writer already committed"
        );
    }
}
