//! # Error Handling
//!
//! A single crate-wide error type, categorized by the subsystem the failure
//! originates from. Peer sessions capture and log their own errors; errors
//! never cross peer boundaries. Engine-level failures (rendezvous join,
//! tunnel startup, port binding) propagate to the caller.

use thiserror::Error;

/// Result type alias for QuickShare Core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for QuickShare Core.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Filesystem
    // ========================================================================
    /// Filesystem read/write/open failure. The affected transfer fails but
    /// the session continues for remaining files when possible.
    #[error("I/O error: {0}")]
    Io(String),

    /// A peer-supplied filename escaped the save directory. The file is
    /// skipped; the session continues.
    #[error("Unsafe path rejected: {0}")]
    UnsafePath(String),

    // ========================================================================
    // Network
    // ========================================================================
    /// Transport failure on an HTTP endpoint. Retried with back-off where
    /// the protocol allows.
    #[error("Network error: {0}")]
    Network(String),

    /// The rendezvous relay could not be reached or rejected the join.
    #[error("Signaling unavailable: {0}")]
    SignalingUnavailable(String),

    /// WebRTC peer connection or data channel failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// An operation exceeded its deadline.
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ========================================================================
    // Protocol
    // ========================================================================
    /// Malformed frame or unexpected message. Aborts the current peer
    /// session with status `Failed`.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Bad or missing password. Terminal for the peer session.
    #[error("Authentication failed: {0}")]
    Auth(String),

    // ========================================================================
    // Lifecycle
    // ========================================================================
    /// A share is already active; at most one per engine.
    #[error("A share session is already active")]
    ShareActive,

    /// No share or receive session is active.
    #[error("No active session")]
    NoActiveSession,

    /// The tunnel child exited early, the binary was not found, or no
    /// public URL was observed within the startup timeout.
    #[error("Tunnel failed to start: {0}")]
    TunnelStartFailed(String),

    /// User-requested stop. Not a failure, but surfaced as a distinct
    /// outcome.
    #[error("Operation cancelled")]
    Cancelled,

    // ========================================================================
    // Serialization
    // ========================================================================
    /// JSON encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether retrying the operation could plausibly succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network(_)
                | Error::SignalingUnavailable(_)
                | Error::Timeout(_)
                | Error::Transport(_)
        )
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Network(err.to_string())
    }
}

impl From<webrtc::Error> for Error {
    fn from(err: webrtc::Error) -> Self {
        Error::Transport(err.to_string())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_errors() {
        assert!(Error::Network("reset".into()).is_recoverable());
        assert!(Error::Timeout("poll".into()).is_recoverable());
        assert!(Error::SignalingUnavailable("503".into()).is_recoverable());
        assert!(!Error::Auth("bad password".into()).is_recoverable());
        assert!(!Error::UnsafePath("../etc".into()).is_recoverable());
        assert!(!Error::Cancelled.is_recoverable());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_json_conversion() {
        let parse = serde_json::from_str::<serde_json::Value>("{oops");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}
