//! In-process transport.
//!
//! Requests enter through a [`MemoryClient`] and are delivered to the
//! dispatch thread over a channel. Signals are recorded instead of sent.
//! Switches let a caller reject registrations or broadcasts and simulate
//! a dropped connection.

use super::{Incoming, Reply, Request, RegistrationId, Transport, TransportError};
use crate::ipc::error::IpcError;
use crate::ipc::introspect::{InterfaceInfo, ObjectInfo};
use crate::ipc::wire::WireValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// A signal seen by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSignal {
    pub node: String,
    pub interface: String,
    pub signal: String,
    pub args: Vec<WireValue>,
}

#[derive(Default)]
struct Switches {
    reject_registrations: AtomicBool,
    reject_broadcasts: AtomicBool,
    disconnected: AtomicBool,
}

pub struct MemoryTransport {
    label: String,
    requests: Mutex<Receiver<Incoming>>,
    objects: Mutex<HashMap<RegistrationId, (String, Arc<InterfaceInfo>)>>,
    signals: Mutex<Vec<RecordedSignal>>,
    next_id: AtomicU64,
    switches: Switches,
}

/// Caller side of a [`MemoryTransport`].
#[derive(Clone)]
pub struct MemoryClient {
    requests: Sender<Incoming>,
    timeout: Duration,
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryTransport {
    pub fn new(label: &str) -> (Arc<Self>, MemoryClient) {
        let (tx, rx) = mpsc::channel();
        let transport = Arc::new(Self {
            label: label.to_string(),
            requests: Mutex::new(rx),
            objects: Mutex::new(HashMap::new()),
            signals: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            switches: Switches::default(),
        });
        let client = MemoryClient {
            requests: tx,
            timeout: Duration::from_secs(5),
        };
        (transport, client)
    }

    pub fn reject_registrations(&self, reject: bool) {
        self.switches
            .reject_registrations
            .store(reject, Ordering::SeqCst);
    }

    pub fn reject_broadcasts(&self, reject: bool) {
        self.switches.reject_broadcasts.store(reject, Ordering::SeqCst);
    }

    /// Make the next poll report a lost connection.
    pub fn disconnect(&self) {
        self.switches.disconnected.store(true, Ordering::SeqCst);
    }

    pub fn signals(&self) -> Vec<RecordedSignal> {
        lock(&self.signals).clone()
    }

    pub fn registration_count(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Objects currently registered, grouped by node.
    pub fn objects(&self) -> Vec<ObjectInfo> {
        let mut nodes: BTreeMap<String, Vec<InterfaceInfo>> = BTreeMap::new();
        for (node, info) in lock(&self.objects).values() {
            nodes.entry(node.clone()).or_default().push(info.as_ref().clone());
        }
        nodes
            .into_iter()
            .map(|(node, mut interfaces)| {
                interfaces.sort_by(|a, b| a.name.cmp(&b.name));
                ObjectInfo { node, interfaces }
            })
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn describe(&self) -> String {
        format!("memory:{}", self.label)
    }

    fn register_object(
        &self,
        node: &str,
        info: Arc<InterfaceInfo>,
    ) -> Result<RegistrationId, TransportError> {
        if self.switches.reject_registrations.load(Ordering::SeqCst) {
            return Err(TransportError::Rejected(format!("{} on {}", info.name, node)));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.objects).insert(id, (node.to_string(), info));
        Ok(id)
    }

    fn unregister_object(&self, id: RegistrationId) {
        lock(&self.objects).remove(&id);
    }

    fn emit_signal(
        &self,
        node: &str,
        interface: &str,
        signal: &str,
        args: Vec<WireValue>,
    ) -> Result<(), TransportError> {
        if self.switches.reject_broadcasts.load(Ordering::SeqCst) {
            return Err(TransportError::BroadcastRejected(signal.to_string()));
        }
        lock(&self.signals).push(RecordedSignal {
            node: node.to_string(),
            interface: interface.to_string(),
            signal: signal.to_string(),
            args,
        });
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<Incoming>, TransportError> {
        if self.switches.disconnected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        let requests = lock(&self.requests);
        let mut batch = match requests.recv_timeout(timeout) {
            Ok(first) => vec![first],
            Err(RecvTimeoutError::Timeout) => return Ok(Vec::new()),
            Err(RecvTimeoutError::Disconnected) => return Err(TransportError::Disconnected),
        };
        batch.extend(requests.try_iter());
        Ok(batch)
    }
}

impl MemoryClient {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send a request and wait for its reply.
    pub fn request(&self, request: Request) -> Reply {
        let (tx, rx) = mpsc::channel();
        let incoming = Incoming {
            request,
            responder: Box::new(move |reply| {
                let _ = tx.send(reply);
            }),
        };
        self.requests
            .send(incoming)
            .map_err(|_| IpcError::ConnectionLost)?;
        rx.recv_timeout(self.timeout)
            .map_err(|_| IpcError::ConnectionLost)?
    }

    pub fn call(&self, node: &str, interface: &str, method: &str, args: Vec<WireValue>) -> Reply {
        self.request(Request::Call {
            node: node.to_string(),
            interface: interface.to_string(),
            method: method.to_string(),
            args,
        })
    }

    pub fn get(&self, node: &str, interface: &str, property: &str) -> Result<WireValue, IpcError> {
        let mut values = self.request(Request::GetProperty {
            node: node.to_string(),
            interface: interface.to_string(),
            property: property.to_string(),
        })?;
        values.pop().ok_or_else(|| IpcError::Internal("empty property reply".to_string()))
    }

    pub fn set(
        &self,
        node: &str,
        interface: &str,
        property: &str,
        value: WireValue,
    ) -> Result<(), IpcError> {
        self.request(Request::SetProperty {
            node: node.to_string(),
            interface: interface.to_string(),
            property: property.to_string(),
            value,
        })
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn info(name: &str) -> Arc<InterfaceInfo> {
        Arc::new(InterfaceInfo {
            name: name.to_string(),
            methods: vec![],
            properties: vec![],
            signals: vec![],
        })
    }

    #[test]
    fn test_register_and_unregister() {
        let (transport, _client) = MemoryTransport::new("test");
        let id = transport.register_object("/io/hwconfd", info("io.hwconfd.A")).unwrap();
        transport.register_object("/io/hwconfd", info("io.hwconfd.B")).unwrap();
        let objects = transport.objects();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].interfaces.len(), 2);

        transport.unregister_object(id);
        assert_eq!(transport.registration_count(), 1);
    }

    #[test]
    fn test_switches() {
        let (transport, _client) = MemoryTransport::new("test");
        transport.reject_registrations(true);
        assert!(transport.register_object("/", info("x")).is_err());

        transport.reject_broadcasts(true);
        assert!(transport.emit_signal("/", "x", "s", vec![]).is_err());
        assert!(transport.signals().is_empty());

        transport.disconnect();
        assert!(matches!(
            transport.poll(Duration::from_millis(1)),
            Err(TransportError::Disconnected)
        ));
    }

    #[test]
    fn test_request_reply() {
        let (transport, client) = MemoryTransport::new("test");
        let worker = thread::spawn(move || {
            let batch = transport.poll(Duration::from_secs(5)).unwrap();
            for incoming in batch {
                (incoming.responder)(Ok(vec![WireValue::Boolean(true)]));
            }
        });
        let reply = client.call("/io/hwconfd", "io.hwconfd", "ping", vec![]).unwrap();
        assert_eq!(reply, vec![WireValue::Boolean(true)]);
        worker.join().unwrap();
    }

    #[test]
    fn test_poll_times_out_empty() {
        let (transport, _client) = MemoryTransport::new("test");
        assert!(transport.poll(Duration::from_millis(5)).unwrap().is_empty());
    }
}
