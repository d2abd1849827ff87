//! Error types for the HLPC server.
//!
//! Session-level errors (framing, I/O on a client socket) are terminal to a
//! single connection. Startup and shutdown errors are fatal to the invoking
//! process and map to a non-zero exit status.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for the HLPC server.
#[derive(Debug, Error)]
pub enum HlpcError {
    // Network errors
    #[error("Attempt to bind to {addr} failed with error: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    // Protocol errors
    #[error("Framing error: {message}")]
    Framing { message: String },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Lifecycle errors
    #[error("Precondition failed: {message}")]
    Precondition { message: String },

    #[error("Server did not stop within {waited:?}, manual intervention required")]
    Timeout { waited: Duration },
}

/// Result type alias for HLPC operations.
pub type Result<T> = std::result::Result<T, HlpcError>;

impl From<std::io::Error> for HlpcError {
    fn from(err: std::io::Error) -> Self {
        HlpcError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl HlpcError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        HlpcError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a framing error.
    pub fn framing(message: impl Into<String>) -> Self {
        HlpcError::Framing {
            message: message.into(),
        }
    }
}
