//! Socket protocol messages.
//!
//! Every message is one JSON object per line. Clients send
//! [`IpcMessage::Request`]; the daemon answers with
//! [`IpcMessage::Response`] carrying the same id, and pushes
//! [`IpcMessage::Signal`] to clients that subscribed.

use super::error::{IpcError, WireError};
use super::introspect::ObjectInfo;
use super::transport::Request;
use super::wire::WireValue;
use serde::{Deserialize, Serialize};

/// Operations a client can ask for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Invoke a method.
    Call {
        node: String,
        interface: String,
        method: String,
        #[serde(default)]
        args: Vec<WireValue>,
    },

    /// Read a property.
    Get {
        node: String,
        interface: String,
        property: String,
    },

    /// Write a property.
    Set {
        node: String,
        interface: String,
        property: String,
        value: WireValue,
    },

    /// Describe registered objects (all of them when `node` is absent).
    Introspect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },

    /// Receive signals on this connection from now on.
    Subscribe,

    /// Connection health check.
    Ping,
}

impl ClientRequest {
    /// The part routed to the server, if this is not answered by the
    /// transport itself.
    pub fn into_request(self) -> Option<Request> {
        match self {
            ClientRequest::Call {
                node,
                interface,
                method,
                args,
            } => Some(Request::Call {
                node,
                interface,
                method,
                args,
            }),
            ClientRequest::Get {
                node,
                interface,
                property,
            } => Some(Request::GetProperty {
                node,
                interface,
                property,
            }),
            ClientRequest::Set {
                node,
                interface,
                property,
                value,
            } => Some(Request::SetProperty {
                node,
                interface,
                property,
                value,
            }),
            ClientRequest::Introspect { .. } | ClientRequest::Subscribe | ClientRequest::Ping => {
                None
            }
        }
    }
}

/// Response from daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpcResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ResponseData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Values { values: Vec<WireValue> },
    Objects { objects: Vec<ObjectInfo> },
    Pong { timestamp: u64 },
    Empty {},
}

impl IpcResponse {
    pub fn ok() -> Self {
        Self {
            ok: true,
            data: Some(ResponseData::Empty {}),
            error: None,
        }
    }

    pub fn values(values: Vec<WireValue>) -> Self {
        Self {
            ok: true,
            data: Some(ResponseData::Values { values }),
            error: None,
        }
    }

    pub fn objects(objects: Vec<ObjectInfo>) -> Self {
        Self {
            ok: true,
            data: Some(ResponseData::Objects { objects }),
            error: None,
        }
    }

    pub fn pong() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        Self {
            ok: true,
            data: Some(ResponseData::Pong { timestamp }),
            error: None,
        }
    }

    pub fn error(err: &IpcError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(WireError::from(err)),
        }
    }

    pub fn from_reply(reply: Result<Vec<WireValue>, IpcError>) -> Self {
        match reply {
            Ok(values) => Self::values(values),
            Err(err) => Self::error(&err),
        }
    }
}

/// A signal as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalMessage {
    pub node: String,
    pub interface: String,
    pub signal: String,
    #[serde(default)]
    pub args: Vec<WireValue>,
}

/// Envelope for everything on the socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcMessage {
    /// Request from client to daemon.
    Request { id: u64, request: ClientRequest },
    /// Response from daemon to client.
    Response { id: u64, response: IpcResponse },
    /// Signal pushed from daemon (no id, not a response).
    Signal { signal: SignalMessage },
}
