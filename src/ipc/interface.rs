//! Named, path-scoped bundles of functions, properties and signals.
//!
//! An [`Interface`] is built once through [`InterfaceBuilder`] and shared
//! as an `Arc`. Its function and signal tables never change after
//! construction; property values sit behind per-property locks so a
//! background thread can update device state while the dispatch thread
//! reads it.

use super::error::IpcError;
use super::introspect::{ArgInfo, InterfaceInfo, MethodInfo, PropertyInfo, SignalInfo};
use super::server::{ServerHandle, ServerInner};
use super::signature::{InvalidType, TypeSignature};
use super::variant::Variant;
use super::{interface_name, object_node};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use thiserror::Error;
use tracing::{debug, warn};

/// Failure raised by a function handler. The message is passed to the
/// remote caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<InvalidType> for HandlerError {
    fn from(err: InvalidType) -> Self {
        Self(err.to_string())
    }
}

impl From<IpcError> for HandlerError {
    fn from(err: IpcError) -> Self {
        Self(err.to_string())
    }
}

type Handler = dyn Fn(&[Variant]) -> Result<Vec<Variant>, HandlerError> + Send + Sync;

/// A remotely invokable function.
///
/// The handler receives arguments already checked against `args` and
/// must return values matching `response`.
pub struct Function {
    args: Vec<ArgInfo>,
    response: Vec<ArgInfo>,
    handler: Box<Handler>,
}

impl Function {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&[Variant]) -> Result<Vec<Variant>, HandlerError> + Send + Sync + 'static,
    {
        Self {
            args: Vec::new(),
            response: Vec::new(),
            handler: Box::new(handler),
        }
    }

    pub fn arg(mut self, name: &str, signature: impl Into<TypeSignature>) -> Self {
        self.args.push(ArgInfo::new(name, signature));
        self
    }

    pub fn response(mut self, name: &str, signature: impl Into<TypeSignature>) -> Self {
        self.response.push(ArgInfo::new(name, signature));
        self
    }

    pub fn args(&self) -> &[ArgInfo] {
        &self.args
    }

    pub fn response_args(&self) -> &[ArgInfo] {
        &self.response
    }

    pub fn invoke(&self, args: &[Variant]) -> Result<Vec<Variant>, HandlerError> {
        (self.handler)(args)
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("args", &self.args)
            .field("response", &self.response)
            .finish_non_exhaustive()
    }
}

/// Initial value and access flags of a property. The value's signature
/// becomes the property's declared type.
#[derive(Debug, Clone)]
pub struct Property {
    value: Variant,
    readable: bool,
    writable: bool,
}

impl Property {
    pub fn new(value: Variant, readable: bool, writable: bool) -> Self {
        Self {
            value,
            readable,
            writable,
        }
    }

    pub fn read_only(value: Variant) -> Self {
        Self::new(value, true, false)
    }

    pub fn read_write(value: Variant) -> Self {
        Self::new(value, true, true)
    }
}

#[derive(Debug)]
struct PropertySlot {
    signature: TypeSignature,
    readable: bool,
    writable: bool,
    value: RwLock<Variant>,
}

pub struct InterfaceBuilder {
    node: String,
    name: String,
    functions: BTreeMap<String, Function>,
    properties: BTreeMap<String, PropertySlot>,
    signals: BTreeMap<String, Vec<ArgInfo>>,
}

impl InterfaceBuilder {
    pub fn function(mut self, name: &str, function: Function) -> Self {
        self.functions.insert(name.to_string(), function);
        self
    }

    pub fn property(mut self, name: &str, property: Property) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertySlot {
                signature: property.value.signature().clone(),
                readable: property.readable,
                writable: property.writable,
                value: RwLock::new(property.value),
            },
        );
        self
    }

    pub fn signal(mut self, name: &str, args: Vec<ArgInfo>) -> Self {
        self.signals.insert(name.to_string(), args);
        self
    }

    pub fn build(self) -> Arc<Interface> {
        Arc::new(Interface {
            node: self.node,
            name: self.name,
            functions: self.functions,
            properties: self.properties,
            signals: self.signals,
            server: Mutex::new(None),
        })
    }
}

pub struct Interface {
    node: String,
    name: String,
    functions: BTreeMap<String, Function>,
    properties: BTreeMap<String, PropertySlot>,
    signals: BTreeMap<String, Vec<ArgInfo>>,
    server: Mutex<Option<Weak<ServerInner>>>,
}

impl Interface {
    /// Start an interface at `object_node(node_id)` named
    /// `interface_name(name_id)`.
    pub fn builder(node_id: &str, name_id: &str) -> InterfaceBuilder {
        InterfaceBuilder {
            node: object_node(node_id),
            name: interface_name(name_id),
            functions: BTreeMap::new(),
            properties: BTreeMap::new(),
            signals: BTreeMap::new(),
        }
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    /// Publish this interface on `server`.
    ///
    /// Registering an interface that is already registered is an error.
    pub fn register_interface(self: &Arc<Self>, server: &ServerHandle) -> Result<(), IpcError> {
        server.register(Arc::clone(self))?;
        debug!("Registered {} on {}", self.name, self.node);
        Ok(())
    }

    /// Withdraw this interface from its server. No-op when unregistered.
    pub fn unregister_interface(&self) {
        let server = self.slot().take();
        if let Some(inner) = server.and_then(|weak| weak.upgrade()) {
            inner.unregister(self);
            debug!("Unregistered {} on {}", self.name, self.node);
        }
    }

    pub fn is_registered(&self) -> bool {
        self.slot()
            .as_ref()
            .is_some_and(|weak| weak.strong_count() > 0)
    }

    /// Called by the server while it holds the registry write lock.
    pub(crate) fn bind(&self, server: Weak<ServerInner>) {
        *self.slot() = Some(server);
    }

    /// Called by the server when it drops the registration on its own.
    pub(crate) fn detach(&self) {
        self.slot().take();
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Weak<ServerInner>>> {
        self.server.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn property_slot(&self, name: &str) -> Result<&PropertySlot, IpcError> {
        self.properties
            .get(name)
            .ok_or_else(|| IpcError::UnknownProperty(name.to_string()))
    }

    /// Declared type and `(readable, writable)` flags of a property.
    pub fn property_access(&self, name: &str) -> Result<(&TypeSignature, bool, bool), IpcError> {
        let slot = self.property_slot(name)?;
        Ok((&slot.signature, slot.readable, slot.writable))
    }

    /// Replace a property's value. Does not emit any signal.
    pub fn set_property(&self, name: &str, value: Variant) -> Result<(), IpcError> {
        let slot = self.property_slot(name)?;
        if *value.signature() != slot.signature {
            return Err(InvalidType(value.signature().to_string()).into());
        }
        *slot.value.write().unwrap_or_else(PoisonError::into_inner) = value;
        Ok(())
    }

    /// Copy of a property's current value.
    pub fn get_property(&self, name: &str) -> Result<Variant, IpcError> {
        let slot = self.property_slot(name)?;
        let value = slot.value.read().unwrap_or_else(PoisonError::into_inner);
        Ok(value.clone())
    }

    /// Read-modify-write a property under its lock and return the new
    /// value. If `update` fails or changes the type, the old value stays.
    pub fn update_property<F>(&self, name: &str, update: F) -> Result<Variant, IpcError>
    where
        F: FnOnce(&mut Variant) -> Result<(), InvalidType>,
    {
        let slot = self.property_slot(name)?;
        let mut guard = slot.value.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        update(&mut next)?;
        if *next.signature() != slot.signature {
            return Err(InvalidType(next.signature().to_string()).into());
        }
        *guard = next.clone();
        Ok(next)
    }

    /// Broadcast a declared signal.
    ///
    /// Arguments are checked even when unregistered; emission itself is a
    /// no-op then. Transport rejections are logged and dropped.
    pub fn emit_signal(&self, signal: &str, args: &[Variant]) -> Result<(), IpcError> {
        let declared = self
            .signals
            .get(signal)
            .ok_or_else(|| IpcError::UnknownSignal(signal.to_string()))?;
        if declared.len() != args.len() {
            return Err(IpcError::ArityMismatch {
                expected: declared.len(),
                actual: args.len(),
            });
        }
        if let Some(bad) = args
            .iter()
            .zip(declared)
            .find(|(value, decl)| *value.signature() != decl.signature)
        {
            return Err(InvalidType(bad.0.signature().to_string()).into());
        }

        let server = self.slot().as_ref().and_then(Weak::upgrade);
        let Some(server) = server else {
            debug!("{}.{} not emitted, interface unregistered", self.name, signal);
            return Ok(());
        };
        match server.emit_signal(&self.node, &self.name, signal, args) {
            Err(IpcError::BroadcastFailed(reason)) => {
                warn!(
                    node = %self.node,
                    interface = %self.name,
                    signal,
                    "Signal broadcast failed: {}",
                    reason
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Structural description used for introspection.
    pub fn info(&self) -> InterfaceInfo {
        InterfaceInfo {
            name: self.name.clone(),
            methods: self
                .functions
                .iter()
                .map(|(name, f)| MethodInfo {
                    name: name.clone(),
                    args: f.args.clone(),
                    response: f.response.clone(),
                })
                .collect(),
            properties: self
                .properties
                .iter()
                .map(|(name, p)| PropertyInfo {
                    name: name.clone(),
                    signature: p.signature.clone(),
                    readable: p.readable,
                    writable: p.writable,
                })
                .collect(),
            signals: self
                .signals
                .iter()
                .map(|(name, args)| SignalInfo {
                    name: name.clone(),
                    args: args.clone(),
                })
                .collect(),
        }
    }
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("node", &self.node)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::signature::Primitive;

    fn sample() -> Arc<Interface> {
        Interface::builder("device/1", "Device")
            .property("name", Property::read_only(Variant::from("Mouse")))
            .property("pid", Property::read_write(Variant::from(0x4082u16)))
            .signal("sleep", vec![])
            .signal("renamed", vec![ArgInfo::new("name", Primitive::String)])
            .function(
                "echo",
                Function::new(|args| Ok(args.to_vec()))
                    .arg("value", Primitive::UInt32)
                    .response("value", Primitive::UInt32),
            )
            .build()
    }

    #[test]
    fn test_naming() {
        let iface = sample();
        assert_eq!(iface.node(), "/io/hwconfd/device/1");
        assert_eq!(iface.name(), "io.hwconfd.Device");

        let root = Interface::builder("", "").build();
        assert_eq!(root.node(), "/io/hwconfd");
        assert_eq!(root.name(), "io.hwconfd");
    }

    #[test]
    fn test_set_and_get_property() {
        let iface = sample();
        iface.set_property("pid", Variant::from(0x4083u16)).unwrap();
        assert_eq!(iface.get_property("pid").unwrap().as_uint16().unwrap(), 0x4083);

        assert_eq!(
            iface.set_property("missing", Variant::from(1u16)).unwrap_err(),
            IpcError::UnknownProperty("missing".to_string())
        );
        assert!(matches!(
            iface.set_property("pid", Variant::from(1u32)),
            Err(IpcError::InvalidType(_))
        ));
        assert!(iface.get_property("missing").is_err());
    }

    #[test]
    fn test_update_property_keeps_type() {
        let iface = sample();
        let next = iface
            .update_property("pid", |v| v.set_uint16(v.as_uint16()? + 1))
            .unwrap();
        assert_eq!(next.as_uint16().unwrap(), 0x4083);

        let err = iface.update_property("pid", |v| {
            *v = Variant::from("nope");
            Ok(())
        });
        assert!(err.is_err());
        assert_eq!(iface.get_property("pid").unwrap().as_uint16().unwrap(), 0x4083);
    }

    #[test]
    fn test_emit_signal_validates_when_unregistered() {
        let iface = sample();
        assert!(!iface.is_registered());
        iface.emit_signal("sleep", &[]).unwrap();
        iface
            .emit_signal("renamed", &[Variant::from("Keyboard")])
            .unwrap();

        assert_eq!(
            iface.emit_signal("wake", &[]).unwrap_err(),
            IpcError::UnknownSignal("wake".to_string())
        );
        assert_eq!(
            iface.emit_signal("renamed", &[]).unwrap_err(),
            IpcError::ArityMismatch {
                expected: 1,
                actual: 0
            }
        );
        assert!(matches!(
            iface.emit_signal("renamed", &[Variant::from(1u8)]),
            Err(IpcError::InvalidType(_))
        ));
    }

    #[test]
    fn test_unregister_when_not_registered_is_noop() {
        let iface = sample();
        iface.unregister_interface();
        assert!(!iface.is_registered());
    }

    #[test]
    fn test_info_lists_everything() {
        let info = sample().info();
        assert_eq!(info.name, "io.hwconfd.Device");
        let echo = info.method("echo").unwrap();
        assert_eq!(echo.args[0].signature.as_str(), "u");
        let pid = info.property("pid").unwrap();
        assert!(pid.readable && pid.writable);
        assert!(!info.property("name").unwrap().writable);
        assert_eq!(info.signals.len(), 2);
    }
}
