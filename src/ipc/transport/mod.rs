//! The external message bus, seen from the server.
//!
//! A transport owns the connection. The server registers object metadata
//! with it, pulls inbound requests from it on the dispatch thread, and
//! hands it outbound signals. Two transports ship with the crate:
//! [`SocketTransport`] for the daemon and [`MemoryTransport`] for
//! embedding and tests.

use super::error::IpcError;
use super::introspect::InterfaceInfo;
use super::wire::WireValue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

mod memory;
#[cfg(unix)]
mod unix_socket;

pub use memory::{MemoryClient, MemoryTransport, RecordedSignal};
#[cfg(unix)]
pub use unix_socket::{SocketClient, SocketTransport};

/// Transport-side handle for one registered interface.
pub type RegistrationId = u64;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind {path}: {reason}")]
    BindFailed { path: String, reason: String },

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Daemon not running")]
    NotRunning,

    #[error("Registration rejected: {0}")]
    Rejected(String),

    #[error("Broadcast rejected: {0}")]
    BroadcastRejected(String),

    #[error("Connection closed")]
    Disconnected,

    #[error("Remote error {name}: {message}")]
    Remote { name: String, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        TransportError::Serialization(err.to_string())
    }
}

/// An inbound request addressed to one interface.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Call {
        node: String,
        interface: String,
        method: String,
        args: Vec<WireValue>,
    },
    GetProperty {
        node: String,
        interface: String,
        property: String,
    },
    SetProperty {
        node: String,
        interface: String,
        property: String,
        value: WireValue,
    },
}

impl Request {
    pub fn node(&self) -> &str {
        match self {
            Request::Call { node, .. }
            | Request::GetProperty { node, .. }
            | Request::SetProperty { node, .. } => node,
        }
    }
}

/// Outcome of a request: response values (one for a property read, none
/// for a write) or a typed failure.
pub type Reply = Result<Vec<WireValue>, IpcError>;

pub type Responder = Box<dyn FnOnce(Reply) + Send>;

pub struct Incoming {
    pub request: Request,
    pub responder: Responder,
}

impl std::fmt::Debug for Incoming {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Incoming")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

pub trait Transport: Send + Sync {
    /// Short description for logs.
    fn describe(&self) -> String;

    /// Make an interface reachable at `node`.
    fn register_object(
        &self,
        node: &str,
        info: Arc<InterfaceInfo>,
    ) -> Result<RegistrationId, TransportError>;

    fn unregister_object(&self, id: RegistrationId);

    fn emit_signal(
        &self,
        node: &str,
        interface: &str,
        signal: &str,
        args: Vec<WireValue>,
    ) -> Result<(), TransportError>;

    /// Wait up to `timeout` for inbound requests.
    ///
    /// `Err(TransportError::Disconnected)` means the connection is gone
    /// and no further requests will arrive.
    fn poll(&self, timeout: Duration) -> Result<Vec<Incoming>, TransportError>;
}
