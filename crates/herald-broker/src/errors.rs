//! Broker error types.

use thiserror::Error;

/// Errors raised by broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Could not reach the broker.
    #[error("failed to connect to broker at {addr}: {source}")]
    Connect {
        /// Target address.
        addr: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// I/O failure on an established connection.
    #[error("broker I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The broker sent something unexpected or reported an error.
    #[error("broker protocol error: {0}")]
    Protocol(String),
    /// The connection has been drained or lost.
    #[error("broker connection closed")]
    Closed,
    /// Subject contains characters the protocol cannot carry.
    #[error("invalid subject: {0:?}")]
    InvalidSubject(String),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_names_address() {
        let err = BrokerError::Connect {
            addr: "127.0.0.1:4222".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        };
        let text = err.to_string();
        assert!(text.contains("127.0.0.1:4222"));
        assert!(text.contains("refused"));
    }

    #[test]
    fn io_from_conversion() {
        let err: BrokerError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert!(matches!(err, BrokerError::Io(_)));
    }

    #[test]
    fn closed_display() {
        assert_eq!(BrokerError::Closed.to_string(), "broker connection closed");
    }
}
