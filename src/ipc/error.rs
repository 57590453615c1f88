//! Per-call failures reported across the IPC boundary.

use super::signature::InvalidType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IpcError {
    #[error("Unknown object {0}")]
    UnknownObject(String),

    #[error("Unknown interface {interface} on {node}")]
    UnknownInterface { node: String, interface: String },

    #[error("Unknown method {0}")]
    UnknownMethod(String),

    #[error("Unknown property {0}")]
    UnknownProperty(String),

    #[error("Unknown signal {0}")]
    UnknownSignal(String),

    #[error("Expected {expected} arguments, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    InvalidType(#[from] InvalidType),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Broadcast failed: {0}")]
    BroadcastFailed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection lost")]
    ConnectionLost,

    #[error("{interface} is already registered on {node}")]
    AlreadyRegistered { node: String, interface: String },
}

impl IpcError {
    /// Stable error name sent to remote callers.
    pub fn error_name(&self) -> &'static str {
        match self {
            IpcError::UnknownObject(_) => "org.freedesktop.DBus.Error.UnknownObject",
            IpcError::UnknownInterface { .. } => "org.freedesktop.DBus.Error.UnknownInterface",
            IpcError::UnknownMethod(_) | IpcError::UnknownSignal(_) => {
                "org.freedesktop.DBus.Error.UnknownMethod"
            }
            IpcError::UnknownProperty(_) => "org.freedesktop.DBus.Error.UnknownProperty",
            IpcError::ArityMismatch { .. }
            | IpcError::InvalidType(_)
            | IpcError::InvalidArguments(_) => "org.freedesktop.DBus.Error.InvalidArgs",
            IpcError::AccessDenied(_) => "org.freedesktop.DBus.Error.AccessDenied",
            IpcError::Internal(_)
            | IpcError::BroadcastFailed(_)
            | IpcError::Transport(_)
            | IpcError::AlreadyRegistered { .. } => "org.freedesktop.DBus.Error.Failed",
            IpcError::ConnectionLost => "org.freedesktop.DBus.Error.Disconnected",
        }
    }
}

/// An error as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub name: String,
    pub message: String,
}

impl From<&IpcError> for WireError {
    fn from(err: &IpcError) -> Self {
        Self {
            name: err.error_name().to_string(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_names() {
        assert_eq!(
            IpcError::UnknownObject("/x".into()).error_name(),
            "org.freedesktop.DBus.Error.UnknownObject"
        );
        assert_eq!(
            IpcError::InvalidArguments("x".into()).error_name(),
            "org.freedesktop.DBus.Error.InvalidArgs"
        );
        assert_eq!(
            IpcError::from(InvalidType("q".into())).error_name(),
            "org.freedesktop.DBus.Error.InvalidArgs"
        );
        assert_eq!(
            IpcError::Internal("boom".into()).error_name(),
            "org.freedesktop.DBus.Error.Failed"
        );
    }

    #[test]
    fn test_wire_error_keeps_message() {
        let wire = WireError::from(&IpcError::AccessDenied("name".into()));
        assert_eq!(wire.name, "org.freedesktop.DBus.Error.AccessDenied");
        assert_eq!(wire.message, "Access denied: name");
    }
}
