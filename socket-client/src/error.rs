//! Socket error types
//!
//! Client-facing errors. `SocketError` is `Clone` because concurrent
//! `connect()` callers all observe the result of one shared attempt.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SocketError {
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Authentication rejected: {0}")]
    Authentication(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Gave up waiting for a pending connect after {0:?}")]
    WaitTimeout(Duration),

    #[error("Connect cancelled by disconnect")]
    Cancelled,

    #[error("Client has been cleaned up")]
    Disposed,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

impl SocketError {
    /// Short machine-readable label, used in `connect_error` notifications.
    pub fn kind(&self) -> &'static str {
        match self {
            SocketError::InvalidCredential(_) => "invalid_credential",
            SocketError::Authentication(_) => "authentication",
            SocketError::Timeout(_) => "timeout",
            SocketError::Transport(_) => "transport",
            SocketError::WaitTimeout(_) => "wait_timeout",
            SocketError::Cancelled => "cancelled",
            SocketError::Disposed => "disposed",
            SocketError::Config(_) => "config",
            SocketError::Tls(_) => "tls",
        }
    }

    /// Errors after which retrying with the same credential cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SocketError::InvalidCredential(_)
                | SocketError::Authentication(_)
                | SocketError::Disposed
                | SocketError::Config(_)
                | SocketError::Tls(_)
        )
    }
}

/// Transport failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Authentication,
    Timeout,
    Network,
}

/// Error reported by a `Transport` implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

const AUTH_MARKERS: &[&str] = &[
    "authentication",
    "unauthorized",
    "unauthorised",
    "invalid token",
    "jwt",
    "forbidden",
];

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Timeout, message)
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Authentication, message)
    }

    /// Classify a raw server/transport message. The server rejects bad
    /// tokens from its handshake middleware with a plain error string.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::authentication(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::timeout(message)
        } else {
            Self::network(message)
        }
    }

    pub fn is_authentication(&self) -> bool {
        self.kind == TransportErrorKind::Authentication
    }
}

impl From<TransportError> for SocketError {
    fn from(err: TransportError) -> Self {
        match err.kind {
            TransportErrorKind::Authentication => SocketError::Authentication(err.message),
            TransportErrorKind::Timeout => SocketError::Transport(format!("timeout: {}", err.message)),
            TransportErrorKind::Network => SocketError::Transport(err.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_auth_messages() {
        assert!(TransportError::classify("Authentication error").is_authentication());
        assert!(TransportError::classify("jwt expired").is_authentication());
        assert!(TransportError::classify("401 Unauthorized").is_authentication());
        assert!(!TransportError::classify("connection refused").is_authentication());
    }

    #[test]
    fn test_classify_timeout() {
        let err = TransportError::classify("handshake timed out");
        assert_eq!(err.kind, TransportErrorKind::Timeout);
    }

    #[test]
    fn test_conversion_keeps_auth_terminal() {
        let err: SocketError = TransportError::authentication("bad token").into();
        assert_eq!(err, SocketError::Authentication("bad token".into()));
        assert!(err.is_terminal());

        let err: SocketError = TransportError::network("reset").into();
        assert!(!err.is_terminal());
        assert_eq!(err.kind(), "transport");
    }
}
