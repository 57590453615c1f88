//! Registry of published interfaces and the dispatch loop that serves them.
//!
//! One [`Server`] exists per process. Collaborators receive a cloneable
//! [`ServerHandle`] and may register or unregister interfaces from any
//! thread while [`ServerHandle::listen`] routes requests on the dispatch
//! thread.
//!
//! All registry access goes through one `RwLock`. Registration inserts an
//! entry only after the transport accepted it, under the write lock, so
//! dispatch sees either a complete entry or none. Dispatch clones the
//! interface out of the registry and releases the lock before running any
//! handler code.

use super::error::IpcError;
use super::interface::Interface;
use super::introspect::{InterfaceInfo, ObjectInfo};
use super::transport::{Incoming, RegistrationId, Reply, Request, Transport, TransportError};
use super::variant::Variant;
use super::wire::{from_wire_as, to_wire, WireValue};
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Builds a replacement transport once the primary connection is lost.
pub type FallbackFactory = Box<dyn FnOnce() -> Result<Arc<dyn Transport>, TransportError> + Send>;

struct Registration {
    interface: Arc<Interface>,
    handle: RegistrationId,
    info: Arc<InterfaceInfo>,
}

struct State {
    nodes: HashMap<String, HashMap<String, Registration>>,
    transport: Arc<dyn Transport>,
    /// Set once by teardown; no registration is accepted afterwards.
    closed: bool,
}

pub(crate) struct ServerInner {
    state: RwLock<State>,
    stopped: AtomicBool,
    fallback: Mutex<Option<FallbackFactory>>,
    poll_interval: Duration,
}

/// Cloneable access to the process-wide server.
#[derive(Clone)]
pub struct ServerHandle {
    inner: Arc<ServerInner>,
}

/// Owner of the registry. Dropping it force-unregisters every interface.
pub struct Server {
    handle: ServerHandle,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

impl Server {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_poll_interval(transport, Duration::from_millis(10))
    }

    pub fn with_poll_interval(transport: Arc<dyn Transport>, poll_interval: Duration) -> Self {
        info!("IPC server using {}", transport.describe());
        Self {
            handle: ServerHandle {
                inner: Arc::new(ServerInner {
                    state: RwLock::new(State {
                        nodes: HashMap::new(),
                        transport,
                        closed: false,
                    }),
                    stopped: AtomicBool::new(false),
                    fallback: Mutex::new(None),
                    poll_interval,
                }),
            },
        }
    }

    pub fn handle(&self) -> ServerHandle {
        self.handle.clone()
    }

    /// Install the transport used if the current one disconnects.
    pub fn set_fallback<F>(&self, factory: F)
    where
        F: FnOnce() -> Result<Arc<dyn Transport>, TransportError> + Send + 'static,
    {
        *self
            .handle
            .inner
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Box::new(factory));
    }
}

impl std::ops::Deref for Server {
    type Target = ServerHandle;

    fn deref(&self) -> &ServerHandle {
        &self.handle
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.inner.shutdown();
    }
}

impl ServerInner {
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.read().transport)
    }

    /// Insert `interface` and bind it to `owner` in one write-locked step, so
    /// a lookup that sees the entry also sees a bound interface.
    fn register(
        &self,
        interface: Arc<Interface>,
        owner: Weak<ServerInner>,
    ) -> Result<(), IpcError> {
        let mut state = self.write();
        if state.closed {
            return Err(IpcError::ConnectionLost);
        }
        let node = interface.node().to_string();
        let name = interface.name().to_string();
        if interface.is_registered() {
            return Err(IpcError::AlreadyRegistered {
                node,
                interface: name,
            });
        }
        if state
            .nodes
            .get(&node)
            .is_some_and(|names| names.contains_key(&name))
        {
            return Err(IpcError::AlreadyRegistered {
                node,
                interface: name,
            });
        }

        let info = Arc::new(interface.info());
        let handle = state
            .transport
            .register_object(&node, Arc::clone(&info))
            .map_err(|e| IpcError::Transport(e.to_string()))?;
        interface.bind(owner);
        state.nodes.entry(node).or_default().insert(
            name,
            Registration {
                interface,
                handle,
                info,
            },
        );
        Ok(())
    }

    /// Remove whatever is registered at `(node, name)` and detach it.
    fn remove(&self, node: &str, name: &str) -> bool {
        let mut state = self.write();
        let State {
            nodes, transport, ..
        } = &mut *state;
        let Some(names) = nodes.get_mut(node) else {
            return false;
        };
        let Some(reg) = names.remove(name) else {
            return false;
        };
        transport.unregister_object(reg.handle);
        reg.interface.detach();
        if names.is_empty() {
            nodes.remove(node);
        }
        true
    }

    pub(crate) fn unregister(&self, interface: &Interface) {
        let mut state = self.write();
        let State {
            nodes, transport, ..
        } = &mut *state;
        let Some(names) = nodes.get_mut(interface.node()) else {
            return;
        };
        // Only the registered instance may remove its entry.
        let owned = names
            .get(interface.name())
            .is_some_and(|reg| std::ptr::eq(Arc::as_ptr(&reg.interface), interface));
        if !owned {
            return;
        }
        if let Some(reg) = names.remove(interface.name()) {
            transport.unregister_object(reg.handle);
        }
        if names.is_empty() {
            nodes.remove(interface.node());
        }
    }

    fn lookup(&self, node: &str, name: &str) -> Result<Arc<Interface>, IpcError> {
        let state = self.read();
        let names = state
            .nodes
            .get(node)
            .ok_or_else(|| IpcError::UnknownObject(node.to_string()))?;
        let reg = names.get(name).ok_or_else(|| IpcError::UnknownInterface {
            node: node.to_string(),
            interface: name.to_string(),
        })?;
        Ok(Arc::clone(&reg.interface))
    }

    pub(crate) fn emit_signal(
        &self,
        node: &str,
        interface: &str,
        signal: &str,
        args: &[Variant],
    ) -> Result<(), IpcError> {
        let wire = args.iter().map(to_wire).collect();
        self.transport()
            .emit_signal(node, interface, signal, wire)
            .map_err(|e| IpcError::BroadcastFailed(e.to_string()))
    }

    fn shutdown(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let mut state = self.write();
        state.closed = true;
        let nodes = std::mem::take(&mut state.nodes);
        let mut count = 0;
        for reg in nodes.into_values().flat_map(HashMap::into_values) {
            state.transport.unregister_object(reg.handle);
            reg.interface.detach();
            count += 1;
        }
        if count > 0 {
            info!("IPC server shut down, {} interfaces unregistered", count);
        }
    }
}

impl ServerHandle {
    pub(crate) fn register(&self, interface: Arc<Interface>) -> Result<(), IpcError> {
        self.inner.register(interface, Arc::downgrade(&self.inner))
    }

    /// Remove whatever is registered at `(node, name)`. No-op if absent.
    pub fn unregister_interface(&self, node: &str, name: &str) {
        if self.inner.remove(node, name) {
            debug!("Unregistered {} on {}", name, node);
        }
    }

    pub fn is_registered(&self, node: &str, name: &str) -> bool {
        self.inner.lookup(node, name).is_ok()
    }

    /// Invoke a method with wire arguments, returning wire responses.
    pub fn call_method(
        &self,
        node: &str,
        name: &str,
        method: &str,
        args: &[WireValue],
    ) -> Result<Vec<WireValue>, IpcError> {
        let interface = self.inner.lookup(node, name)?;
        let function = interface
            .function(method)
            .ok_or_else(|| IpcError::UnknownMethod(method.to_string()))?;

        let declared = function.args();
        if declared.len() != args.len() {
            return Err(IpcError::InvalidArguments(format!(
                "{} expects {} arguments, got {}",
                method,
                declared.len(),
                args.len()
            )));
        }
        let values = args
            .iter()
            .zip(declared)
            .map(|(wire, arg)| {
                from_wire_as(wire, &arg.signature).map_err(|e| {
                    IpcError::InvalidArguments(format!(
                        "argument {} must be {}: {}",
                        arg.name, arg.signature, e
                    ))
                })
            })
            .collect::<Result<Vec<Variant>, IpcError>>()?;

        let outcome = catch_unwind(AssertUnwindSafe(|| function.invoke(&values)));
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(node, interface = name, method, "Handler failed: {}", e);
                return Err(IpcError::Internal(e.0));
            }
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(node, interface = name, method, "Handler panicked: {}", message);
                return Err(IpcError::Internal(message));
            }
        };

        let expected = function.response_args();
        let matches = response.len() == expected.len()
            && response
                .iter()
                .zip(expected)
                .all(|(value, arg)| *value.signature() == arg.signature);
        if !matches {
            let got: Vec<String> = response.iter().map(|v| v.signature().to_string()).collect();
            error!(
                node,
                interface = name,
                method,
                "Handler returned ({}) instead of the declared response",
                got.join(", ")
            );
            return Err(IpcError::Internal(format!(
                "{} returned a malformed response",
                method
            )));
        }

        Ok(response.iter().map(to_wire).collect())
    }

    pub fn get_property(
        &self,
        node: &str,
        name: &str,
        property: &str,
    ) -> Result<WireValue, IpcError> {
        let interface = self.inner.lookup(node, name)?;
        let (_, readable, _) = interface.property_access(property)?;
        if !readable {
            return Err(IpcError::AccessDenied(property.to_string()));
        }
        Ok(to_wire(&interface.get_property(property)?))
    }

    pub fn set_property(
        &self,
        node: &str,
        name: &str,
        property: &str,
        value: &WireValue,
    ) -> Result<(), IpcError> {
        let interface = self.inner.lookup(node, name)?;
        let (signature, _, writable) = interface.property_access(property)?;
        let value = from_wire_as(value, signature).map_err(|e| {
            IpcError::InvalidArguments(format!("{} must be {}: {}", property, signature, e))
        })?;
        if !writable {
            return Err(IpcError::AccessDenied(property.to_string()));
        }
        interface.set_property(property, value)
    }

    /// Route one inbound request.
    pub fn dispatch(&self, request: &Request) -> Reply {
        match request {
            Request::Call {
                node,
                interface,
                method,
                args,
            } => self.call_method(node, interface, method, args),
            Request::GetProperty {
                node,
                interface,
                property,
            } => self
                .get_property(node, interface, property)
                .map(|value| vec![value]),
            Request::SetProperty {
                node,
                interface,
                property,
                value,
            } => self
                .set_property(node, interface, property, value)
                .map(|()| Vec::new()),
        }
    }

    /// Broadcast a signal under `(node, name)`.
    pub fn emit_signal(
        &self,
        node: &str,
        name: &str,
        signal: &str,
        args: &[Variant],
    ) -> Result<(), IpcError> {
        self.inner.emit_signal(node, name, signal, args)
    }

    /// Snapshot of everything registered, sorted by node and name.
    pub fn introspect(&self) -> Vec<ObjectInfo> {
        let state = self.inner.read();
        let sorted: BTreeMap<&String, BTreeMap<&String, &Registration>> = state
            .nodes
            .iter()
            .map(|(node, names)| (node, names.iter().collect()))
            .collect();
        sorted
            .into_iter()
            .map(|(node, names)| ObjectInfo {
                node: node.clone(),
                interfaces: names.values().map(|reg| reg.info.as_ref().clone()).collect(),
            })
            .collect()
    }

    pub fn registration_count(&self) -> usize {
        self.inner.read().nodes.values().map(HashMap::len).sum()
    }

    pub fn transport_description(&self) -> String {
        self.inner.transport().describe()
    }

    /// Switch to the fallback transport and re-register everything on it.
    ///
    /// Registrations the new transport refuses are dropped and logged.
    pub fn migrate_transport(&self) -> Result<(), IpcError> {
        let factory = self
            .inner
            .fallback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(IpcError::ConnectionLost)?;
        let transport = factory().map_err(|e| {
            error!("Fallback transport failed: {}", e);
            IpcError::ConnectionLost
        })?;

        let mut state = self.inner.write();
        let mut dropped = Vec::new();
        for (node, names) in state.nodes.iter_mut() {
            for (name, reg) in names.iter_mut() {
                let info = Arc::new(reg.interface.info());
                match transport.register_object(node, Arc::clone(&info)) {
                    Ok(handle) => {
                        reg.handle = handle;
                        reg.info = info;
                    }
                    Err(e) => {
                        error!("Could not re-register {} on {}: {}", name, node, e);
                        dropped.push((node.clone(), name.clone()));
                    }
                }
            }
        }
        for (node, name) in dropped {
            if let Some(names) = state.nodes.get_mut(&node) {
                if let Some(reg) = names.remove(&name) {
                    reg.interface.detach();
                }
                if names.is_empty() {
                    state.nodes.remove(&node);
                }
            }
        }
        warn!("IPC moved to {}", transport.describe());
        state.transport = transport;
        Ok(())
    }

    fn serve(&self, incoming: Incoming) {
        let Incoming { request, responder } = incoming;
        debug!("Dispatching {:?}", request);
        let reply = self.dispatch(&request);
        if let Err(ref e) = reply {
            debug!("Request on {} failed: {}", request.node(), e);
        }
        responder(reply);
    }

    /// Run the dispatch loop on this thread until [`stop`](Self::stop) is
    /// called. Returns `ConnectionLost` if the transport drops and no
    /// fallback is available.
    pub fn listen(&self) -> Result<(), IpcError> {
        info!("IPC dispatch loop started");
        while !self.inner.stopped.load(Ordering::SeqCst) {
            let transport = self.inner.transport();
            match transport.poll(self.inner.poll_interval) {
                Ok(batch) => {
                    for incoming in batch {
                        self.serve(incoming);
                    }
                }
                Err(TransportError::Disconnected) => {
                    warn!("Lost connection on {}", transport.describe());
                    self.migrate_transport()?;
                }
                Err(e) => warn!("IPC poll error: {}", e),
            }
        }
        info!("IPC dispatch loop stopped");
        Ok(())
    }

    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
    }
}
