//! Error types for donkey-rl

use std::time::Duration;
use thiserror::Error;

/// Result type for donkey-rl operations
pub type Result<T> = std::result::Result<T, DonkeyError>;

/// donkey-rl error types
#[derive(Debug, Error)]
pub enum DonkeyError {
    /// Simulator executable missing or could not be spawned
    #[error("Failed to launch simulator {path}: {reason}")]
    ProcessLaunchFailure { path: String, reason: String },

    /// Socket connect/handshake failure
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Scene-loaded signal never arrived
    #[error("Scene did not load within {0:?}")]
    LoadTimeout(Duration),

    /// Socket failed mid-session
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Undecodable telemetry message
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Configuration rejected by validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// Operation called in the wrong session state
    #[error("Session not ready: {0}")]
    NotReady(String),

    /// Simulator stopped producing telemetry
    #[error("No telemetry received for {0:?}")]
    TelemetryStalled(Duration),

    /// Session was closed
    #[error("Session closed")]
    SessionClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DonkeyError {
    /// Whether this error ends the session.
    ///
    /// Frame-level decode failures are absorbed by the receive loop and
    /// config/precondition errors leave the session untouched.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DonkeyError::ProcessLaunchFailure { .. }
                | DonkeyError::ConnectionError(_)
                | DonkeyError::LoadTimeout(_)
                | DonkeyError::ConnectionLost(_)
                | DonkeyError::TelemetryStalled(_)
                | DonkeyError::Io(_)
        )
    }
}

impl From<serde_json::Error> for DonkeyError {
    fn from(err: serde_json::Error) -> Self {
        DonkeyError::SerializationError(err.to_string())
    }
}
