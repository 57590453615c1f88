//! Typed object/interface layer exposed to external clients.
//!
//! Values are [`Variant`]s checked against [`TypeSignature`]s. Features
//! publish [`Interface`]s on the process-wide [`Server`], which routes
//! inbound calls from a [`Transport`](transport::Transport) and converts
//! values to and from the wire format at the boundary.

mod error;
mod interface;
mod introspect;
mod server;
mod signature;
pub mod transport;
mod types;
mod variant;
mod wire;

pub use error::{IpcError, WireError};
pub use interface::{Function, HandlerError, Interface, InterfaceBuilder, Property};
pub use introspect::{ArgInfo, InterfaceInfo, MethodInfo, ObjectInfo, PropertyInfo, SignalInfo};
pub use server::{FallbackFactory, Server, ServerHandle};
pub use signature::{InvalidType, Kind, Primitive, TypeSignature, MAX_DEPTH, MAX_SIGNATURE_LEN};
pub use types::{ClientRequest, IpcMessage, IpcResponse, ResponseData, SignalMessage};
pub use variant::{is_object_path, Variant, VariantDict};
pub use wire::{from_wire, from_wire_as, to_wire, WireValue};

/// Object path under which every node lives.
pub const OBJECT_ROOT: &str = "/io/hwconfd";

/// Reverse-domain prefix of every interface name.
pub const NAME_PREFIX: &str = "io.hwconfd";

/// Node for a logical id; the empty id is the root itself.
pub fn object_node(id: &str) -> String {
    if id.is_empty() {
        OBJECT_ROOT.to_string()
    } else {
        format!("{}/{}", OBJECT_ROOT, id)
    }
}

/// Interface name for a logical id; the empty id is the bare prefix.
pub fn interface_name(id: &str) -> String {
    if id.is_empty() {
        NAME_PREFIX.to_string()
    } else {
        format!("{}.{}", NAME_PREFIX, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_naming_collapses_empty_id() {
        assert_eq!(object_node(""), "/io/hwconfd");
        assert_eq!(object_node("device/3"), "/io/hwconfd/device/3");
        assert_eq!(interface_name(""), "io.hwconfd");
        assert_eq!(interface_name("DPI"), "io.hwconfd.DPI");
        assert!(is_object_path(&object_node("device/3/dpi")));
    }
}
