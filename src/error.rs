//! Error types for Motion Party

use thiserror::Error;

/// Errors raised by detectors, the session, the wire protocol and the transport
#[derive(Debug, Error)]
pub enum PartyError {
    #[error("Failed to parse message: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Sensor unavailable: {0}")]
    SensorUnavailable(String),

    #[error("Sensor permission denied: {0}")]
    PermissionDenied(String),

    #[error("Calibration timed out after {0} ms")]
    CalibrationTimedOut(u64),

    #[error("Role already taken: {0}")]
    RoleTaken(String),

    #[error("Role reserved for a disconnected player: {0}")]
    RoleReserved(String),

    #[error("Game already in progress: {0}")]
    GameInProgress(String),

    #[error("Unknown role: {0}")]
    UnknownRole(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    /// The server answered the join with an error instead of a token
    #[error("Join refused: {0}")]
    JoinRefused(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PartyError {
    /// Whether the error ends the local detector session (no retry makes sense).
    pub fn is_fatal_for_detector(&self) -> bool {
        matches!(
            self,
            PartyError::SensorUnavailable(_) | PartyError::PermissionDenied(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_errors_are_fatal() {
        assert!(PartyError::SensorUnavailable("no accelerometer".into()).is_fatal_for_detector());
        assert!(PartyError::PermissionDenied("motion".into()).is_fatal_for_detector());
        assert!(!PartyError::Transport("closed".into()).is_fatal_for_detector());
    }

    #[test]
    fn test_json_error_converts() {
        let err: PartyError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("Invalid JSON"));
    }
}
