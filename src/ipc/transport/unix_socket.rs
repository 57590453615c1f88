//! Unix domain socket transport (works on Linux and macOS).

use super::{Incoming, RegistrationId, Transport, TransportError};
use crate::ipc::error::WireError;
use crate::ipc::introspect::{InterfaceInfo, ObjectInfo};
use crate::ipc::types::{ClientRequest, IpcMessage, IpcResponse, ResponseData, SignalMessage};
use crate::ipc::wire::WireValue;
use std::collections::{BTreeMap, HashMap};
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest request line accepted from a client.
const MAX_LINE: usize = 1024 * 1024;

/// Write half of a client, shared with in-flight responders so that replies
/// and signals never interleave within a line.
type SharedWriter = Arc<Mutex<UnixStream>>;

struct ClientConnection {
    stream: UnixStream,
    writer: SharedWriter,
    buffer: Vec<u8>,
    subscribed: bool,
}

type ObjectTable = HashMap<RegistrationId, (String, Arc<InterfaceInfo>)>;

/// Listening side: accepts clients, reads JSON-line requests and writes
/// responses and signals back.
pub struct SocketTransport {
    path: PathBuf,
    listener: UnixListener,
    clients: Mutex<HashMap<u64, ClientConnection>>,
    next_client_id: AtomicU64,
    objects: Mutex<ObjectTable>,
    next_registration: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write one line, waiting out a full socket buffer on non-blocking streams.
fn write_line(stream: &mut UnixStream, line: &str) -> std::io::Result<()> {
    let mut data = Vec::with_capacity(line.len() + 1);
    data.extend_from_slice(line.as_bytes());
    data.push(b'\n');

    let mut written = 0;
    let mut stalls = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => return Err(ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == ErrorKind::WouldBlock && stalls < 500 => {
                stalls += 1;
                thread::sleep(Duration::from_millis(2));
            }
            Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    stream.flush()
}

fn send_message(stream: &mut UnixStream, msg: &IpcMessage) -> Result<(), TransportError> {
    let json = serde_json::to_string(msg)?;
    write_line(stream, &json)?;
    Ok(())
}

fn send_shared(writer: &Mutex<UnixStream>, msg: &IpcMessage) -> Result<(), TransportError> {
    let json = serde_json::to_string(msg)?;
    write_line(&mut lock(writer), &json)?;
    Ok(())
}

impl SocketTransport {
    /// Bind at `path`, replacing a stale socket file.
    pub fn bind(path: &Path) -> Result<Self, TransportError> {
        let bind_failed = |reason: String| TransportError::BindFailed {
            path: path.display().to_string(),
            reason,
        };

        if path.exists() {
            if UnixStream::connect(path).is_ok() {
                return Err(bind_failed("another daemon is listening".to_string()));
            }
            std::fs::remove_file(path).ok();
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| bind_failed(e.to_string()))?;
        }

        let listener = UnixListener::bind(path).map_err(|e| bind_failed(e.to_string()))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| bind_failed(e.to_string()))?;

        info!("IPC listening on {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            listener,
            clients: Mutex::new(HashMap::new()),
            next_client_id: AtomicU64::new(1),
            objects: Mutex::new(HashMap::new()),
            next_registration: AtomicU64::new(1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn accept_pending(&self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("IPC client rejected: {}", e);
                        continue;
                    }
                    let writer = match stream.try_clone() {
                        Ok(w) => Arc::new(Mutex::new(w)),
                        Err(e) => {
                            warn!("IPC client rejected: {}", e);
                            continue;
                        }
                    };
                    let client_id = self.next_client_id.fetch_add(1, Ordering::SeqCst);
                    debug!("IPC client {} connected", client_id);
                    lock(&self.clients).insert(
                        client_id,
                        ClientConnection {
                            stream,
                            writer,
                            buffer: Vec::new(),
                            subscribed: false,
                        },
                    );
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("IPC accept error: {}", e);
                    break;
                }
            }
        }
    }

    fn introspect(&self, node: Option<&str>) -> Vec<ObjectInfo> {
        let mut nodes: BTreeMap<String, Vec<InterfaceInfo>> = BTreeMap::new();
        for (object_node, info) in lock(&self.objects).values() {
            if node.is_some_and(|n| n != object_node) {
                continue;
            }
            nodes
                .entry(object_node.clone())
                .or_default()
                .push(info.as_ref().clone());
        }
        nodes
            .into_iter()
            .map(|(node, mut interfaces)| {
                interfaces.sort_by(|a, b| a.name.cmp(&b.name));
                ObjectInfo { node, interfaces }
            })
            .collect()
    }

    /// Handle one request line. Returns work for the server, if any.
    fn handle_line(
        &self,
        client_id: u64,
        conn: &mut ClientConnection,
        line: &[u8],
    ) -> Result<Option<Incoming>, TransportError> {
        let (id, request) = match serde_json::from_slice::<IpcMessage>(line) {
            Ok(IpcMessage::Request { id, request }) => (id, request),
            Ok(_) => {
                warn!("Unexpected message type from client {}", client_id);
                return Ok(None);
            }
            Err(e) => {
                warn!("IPC parse error from client {}: {}", client_id, e);
                return Ok(None);
            }
        };
        debug!("IPC request {} from client {}: {:?}", id, client_id, request);

        let local = match request {
            ClientRequest::Introspect { ref node } => {
                Some(IpcResponse::objects(self.introspect(node.as_deref())))
            }
            ClientRequest::Subscribe => {
                conn.subscribed = true;
                debug!("IPC client {} subscribed to signals", client_id);
                Some(IpcResponse::ok())
            }
            ClientRequest::Ping => Some(IpcResponse::pong()),
            _ => None,
        };
        if let Some(response) = local {
            send_shared(&conn.writer, &IpcMessage::Response { id, response })?;
            return Ok(None);
        }

        let Some(request) = request.into_request() else {
            return Ok(None);
        };
        let writer = Arc::clone(&conn.writer);
        Ok(Some(Incoming {
            request,
            responder: Box::new(move |reply| {
                let msg = IpcMessage::Response {
                    id,
                    response: IpcResponse::from_reply(reply),
                };
                if let Err(e) = send_shared(&writer, &msg) {
                    debug!("IPC response {} not delivered: {}", id, e);
                }
            }),
        }))
    }

    fn read_clients(&self) -> Vec<Incoming> {
        let mut incoming = Vec::new();
        let mut clients = lock(&self.clients);
        let mut to_remove = Vec::new();
        let mut chunk = [0u8; 4096];

        for (&client_id, conn) in clients.iter_mut() {
            let mut closed = false;
            loop {
                match conn.stream.read(&mut chunk) {
                    Ok(0) => {
                        debug!("IPC client {} disconnected", client_id);
                        closed = true;
                        break;
                    }
                    Ok(n) => conn.buffer.extend_from_slice(&chunk[..n]),
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => {
                        debug!("IPC read error from client {}: {}", client_id, e);
                        closed = true;
                        break;
                    }
                }
            }

            while let Some(pos) = conn.buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = conn.buffer.drain(..=pos).collect();
                match self.handle_line(client_id, conn, &line) {
                    Ok(Some(work)) => incoming.push(work),
                    Ok(None) => {}
                    Err(e) => {
                        debug!("IPC client {} dropped: {}", client_id, e);
                        closed = true;
                        break;
                    }
                }
            }

            if conn.buffer.len() > MAX_LINE {
                warn!("IPC client {} sent an oversized request", client_id);
                closed = true;
            }
            if closed {
                to_remove.push(client_id);
            }
        }

        for client_id in to_remove {
            clients.remove(&client_id);
        }
        incoming
    }
}

impl Transport for SocketTransport {
    fn describe(&self) -> String {
        format!("unix:{}", self.path.display())
    }

    fn register_object(
        &self,
        node: &str,
        info: Arc<InterfaceInfo>,
    ) -> Result<RegistrationId, TransportError> {
        let id = self.next_registration.fetch_add(1, Ordering::SeqCst);
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
        let msg = IpcMessage::Signal {
            signal: SignalMessage {
                node: node.to_string(),
                interface: interface.to_string(),
                signal: signal.to_string(),
                args,
            },
        };
        let json = serde_json::to_string(&msg)?;

        let mut clients = lock(&self.clients);
        let mut to_remove = Vec::new();
        for (&client_id, conn) in clients.iter_mut() {
            if !conn.subscribed {
                continue;
            }
            if let Err(e) = write_line(&mut lock(&conn.writer), &json) {
                debug!("Failed to send signal to client {}: {}", client_id, e);
                to_remove.push(client_id);
            }
        }
        for client_id in to_remove {
            clients.remove(&client_id);
        }
        Ok(())
    }

    fn poll(&self, timeout: Duration) -> Result<Vec<Incoming>, TransportError> {
        if !self.path.exists() {
            warn!("IPC socket {} disappeared", self.path.display());
            return Err(TransportError::Disconnected);
        }
        self.accept_pending();
        let incoming = self.read_clients();
        if incoming.is_empty() {
            thread::sleep(timeout);
        }
        Ok(incoming)
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
        info!("IPC socket {} closed", self.path.display());
    }
}

/// Client for talking to a running daemon.
pub struct SocketClient {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
    next_id: u64,
}

impl SocketClient {
    pub fn connect(path: &Path) -> Result<Self, TransportError> {
        if !path.exists() {
            return Err(TransportError::NotRunning);
        }

        let stream = UnixStream::connect(path).map_err(|e| {
            if e.kind() == ErrorKind::ConnectionRefused {
                TransportError::NotRunning
            } else {
                TransportError::ConnectFailed(e.to_string())
            }
        })?;

        stream.set_read_timeout(Some(Duration::from_secs(5))).ok();
        stream.set_write_timeout(Some(Duration::from_secs(5))).ok();

        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            stream,
            reader,
            next_id: 1,
        })
    }

    fn read_message(&mut self) -> Result<IpcMessage, TransportError> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Err(TransportError::Disconnected);
        }
        Ok(serde_json::from_str(&line)?)
    }

    /// Send a request and wait for its response, skipping any signals.
    pub fn send(&mut self, request: ClientRequest) -> Result<IpcResponse, TransportError> {
        let id = self.next_id;
        self.next_id += 1;
        send_message(&mut self.stream, &IpcMessage::Request { id, request })?;

        loop {
            match self.read_message()? {
                IpcMessage::Response {
                    id: reply_id,
                    response,
                } if reply_id == id => return Ok(response),
                other => debug!("Skipping {:?}", other),
            }
        }
    }

    fn values(&mut self, request: ClientRequest) -> Result<Vec<WireValue>, TransportError> {
        let response = check(self.send(request)?)?;
        match response.data {
            Some(ResponseData::Values { values }) => Ok(values),
            _ => Ok(Vec::new()),
        }
    }

    pub fn call(
        &mut self,
        node: &str,
        interface: &str,
        method: &str,
        args: Vec<WireValue>,
    ) -> Result<Vec<WireValue>, TransportError> {
        self.values(ClientRequest::Call {
            node: node.to_string(),
            interface: interface.to_string(),
            method: method.to_string(),
            args,
        })
    }

    pub fn get(
        &mut self,
        node: &str,
        interface: &str,
        property: &str,
    ) -> Result<WireValue, TransportError> {
        let mut values = self.values(ClientRequest::Get {
            node: node.to_string(),
            interface: interface.to_string(),
            property: property.to_string(),
        })?;
        values
            .pop()
            .ok_or_else(|| TransportError::Serialization("empty property reply".to_string()))
    }

    pub fn set(
        &mut self,
        node: &str,
        interface: &str,
        property: &str,
        value: WireValue,
    ) -> Result<(), TransportError> {
        self.values(ClientRequest::Set {
            node: node.to_string(),
            interface: interface.to_string(),
            property: property.to_string(),
            value,
        })
        .map(|_| ())
    }

    pub fn introspect(&mut self, node: Option<&str>) -> Result<Vec<ObjectInfo>, TransportError> {
        let response = check(self.send(ClientRequest::Introspect {
            node: node.map(str::to_string),
        })?)?;
        match response.data {
            Some(ResponseData::Objects { objects }) => Ok(objects),
            _ => Ok(Vec::new()),
        }
    }

    /// Ask for signals; read them with [`SocketClient::next_signal`].
    pub fn subscribe(&mut self) -> Result<(), TransportError> {
        check(self.send(ClientRequest::Subscribe)?)?;
        self.stream.set_read_timeout(None).ok();
        Ok(())
    }

    /// Block until the next signal arrives.
    pub fn next_signal(&mut self) -> Result<SignalMessage, TransportError> {
        loop {
            if let IpcMessage::Signal { signal } = self.read_message()? {
                return Ok(signal);
            }
        }
    }

    pub fn set_read_timeout(&mut self, timeout: Option<Duration>) {
        self.stream.set_read_timeout(timeout).ok();
    }
}

fn check(response: IpcResponse) -> Result<IpcResponse, TransportError> {
    if response.ok {
        return Ok(response);
    }
    let WireError { name, message } = response.error.unwrap_or(WireError {
        name: "org.freedesktop.DBus.Error.Failed".to_string(),
        message: "request failed".to_string(),
    });
    Err(TransportError::Remote { name, message })
}
