//! Transport error taxonomy

use thiserror::Error;

/// Connection-level and server-surfaced transport failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to open connection: {0}")]
    Connect(String),

    #[error("invalid transport url: {0}")]
    InvalidUrl(String),

    #[error("token acquisition failed: {0}")]
    Token(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("server error {code}: {message}")]
    Server { code: String, message: String },
}

/// Failure of a single subscription attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscribeError {
    #[error("server rejected subscription ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("subscription cancelled by disconnect")]
    Cancelled,

    #[error("transport is not running")]
    TransportClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TransportError::Server {
            code: "RATE_LIMIT_EXCEEDED".to_string(),
            message: "slow down".to_string(),
        };
        assert_eq!(err.to_string(), "server error RATE_LIMIT_EXCEEDED: slow down");

        let err = SubscribeError::Cancelled;
        assert_eq!(err.to_string(), "subscription cancelled by disconnect");
    }
}
