//! Error types for FormStream
//!
//! This module defines all error types used throughout the session
//! pipeline, using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for FormStream operations
///
/// This enum encompasses all possible errors that can occur while
/// opening session streams, reconciling events, validating fields,
/// and talking to the session REST collaborators.
#[derive(Error, Debug)]
pub enum FormStreamError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level errors (connect failure, drop mid-stream)
    #[error("Transport error: {0}")]
    Transport(String),

    /// The runtime cannot open a bidirectional connection at all
    ///
    /// This is a capability signal, not a retryable failure: the stream
    /// transport reacts by switching to the unidirectional fallback.
    #[error("Bidirectional transport unsupported: {0}")]
    BidirectionalUnsupported(String),

    /// Reconnection attempts exhausted for a session stream
    #[error("Reconnect attempts exhausted: session={session_id}, attempts={attempts}")]
    ReconnectExhausted {
        /// The session whose stream could not be recovered
        session_id: String,
        /// How many attempts were made before giving up
        attempts: u32,
    },

    /// Attempted to send while the stream is closed or degraded
    #[error("Send rejected: {0}")]
    SendRejected(String),

    /// Malformed frame received over the stream
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Session REST collaborator errors (fetch, create, restart, complete)
    #[error("Session API error: {0}")]
    Api(String),

    /// Illegal session status transition
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStatusTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for FormStream operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = FormStreamError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_transport_error_display() {
        let error = FormStreamError::Transport("connection refused".to_string());
        assert_eq!(error.to_string(), "Transport error: connection refused");
    }

    #[test]
    fn test_reconnect_exhausted_display() {
        let error = FormStreamError::ReconnectExhausted {
            session_id: "sess-1".to_string(),
            attempts: 5,
        };
        let s = error.to_string();
        assert!(s.contains("sess-1"));
        assert!(s.contains("attempts=5"));
    }

    #[test]
    fn test_send_rejected_display() {
        let error = FormStreamError::SendRejected("stream is degraded".to_string());
        assert_eq!(error.to_string(), "Send rejected: stream is degraded");
    }

    #[test]
    fn test_protocol_error_display() {
        let error = FormStreamError::Protocol("not a JSON object".to_string());
        assert_eq!(error.to_string(), "Protocol error: not a JSON object");
    }

    #[test]
    fn test_invalid_status_transition_display() {
        let error = FormStreamError::InvalidStatusTransition {
            from: "completed".to_string(),
            to: "abandoned".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid status transition: completed -> abandoned"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: FormStreamError = io_error.into();
        assert!(matches!(error, FormStreamError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_str = "{invalid json}";
        let json_error = serde_json::from_str::<serde_json::Value>(json_str).unwrap_err();
        let error: FormStreamError = json_error.into();
        assert!(matches!(error, FormStreamError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_str = "invalid: : yaml";
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>(yaml_str).unwrap_err();
        let error: FormStreamError = yaml_error.into();
        assert!(matches!(error, FormStreamError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FormStreamError>();
    }
}
