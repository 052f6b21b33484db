//! Error types and handling infrastructure for logtail.
//!
//! This module provides a centralized error handling system using `thiserror` for
//! custom error types. The binary layers `anyhow` on top for context.
//!
//! Failures are always scoped: a file that cannot be read fails that file only,
//! an invalid pattern rejects that one change, and a closed session fails the
//! query that reached it. Nothing here aborts the process.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for logtail operations.
#[derive(Error, Debug)]
pub enum LogtailError {
    /// Missing or unreadable file. Fatal for that file, the session keeps going.
    #[error("Cannot access {path}: {message}")]
    FileAccess {
        path: PathBuf,
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// I/O failure that is not tied to a particular path
    #[error("File operation failed: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// A find or filter pattern failed to compile. The previous state is kept.
    #[error("Invalid pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Invalid caller-supplied argument (unknown level name, empty file list, ...)
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Global line number past the end of the merged index
    #[error("Line {line} is out of range (index holds {len} lines)")]
    LineOutOfRange { line: u64, len: u64 },

    /// Tail mode requested on a session opened without tailing
    #[error("Can't tail this file")]
    TailUnavailable,

    /// Any query issued after `close()`
    #[error("Session is closed")]
    SessionClosed,

    /// Configuration related errors
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Generic error for cases not covered by specific variants
    #[error("Operation failed: {message}")]
    Other { message: String },
}

/// Standard Result type for logtail operations.
pub type Result<T> = std::result::Result<T, LogtailError>;

impl LogtailError {
    /// Create a FileAccess error for `path` from an io::Error
    pub fn file_access(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::FileAccess {
            path: path.into(),
            message: message.into(),
            source,
        }
    }

    /// Create an Io error with additional context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create an InvalidPattern error
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }

    /// Create an InvalidArgument error with a descriptive message
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a ConfigError with a descriptive message
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a generic Other error with a descriptive message
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether this error is scoped to a single file rather than the operation
    pub fn is_file_access(&self) -> bool {
        matches!(self, Self::FileAccess { .. })
    }
}

// Automatic conversion from io::Error to LogtailError
impl From<std::io::Error> for LogtailError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::Io {
                message: "File not found".to_string(),
                source: err,
            },
            std::io::ErrorKind::PermissionDenied => Self::Io {
                message: "Permission denied".to_string(),
                source: err,
            },
            _ => Self::Io {
                message: "IO operation failed".to_string(),
                source: err,
            },
        }
    }
}
