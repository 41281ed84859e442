//! Server error types.

use thiserror::Error;

/// Errors from starting the HTTP/WebSocket server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Other socket I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ServerError>;
