//! Daemon-side server and client talking over a real Unix socket.
#![cfg(unix)]

use hwconfd::ipc::transport::{SocketClient, SocketTransport, Transport, TransportError};
use hwconfd::ipc::{Server, ServerHandle, WireValue};
use hwconfd::services::{DeviceManagerService, SimulatedHardware};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tempfile::{tempdir, TempDir};

struct Fixture {
    _dir: TempDir,
    path: std::path::PathBuf,
    server: Server,
    listener: Option<JoinHandle<Result<(), hwconfd::ipc::IpcError>>>,
    _manager: DeviceManagerService,
    hardware: SimulatedHardware,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let path = dir.path().join("hwconfd.sock");
        let transport: Arc<dyn Transport> = Arc::new(SocketTransport::bind(&path).unwrap());
        let server = Server::with_poll_interval(transport, Duration::from_millis(5));
        let handle = server.handle();
        let manager = DeviceManagerService::register(&handle).unwrap();
        let hardware = SimulatedHardware::register(&handle, &manager).unwrap();

        let dispatch: ServerHandle = server.handle();
        let listener = thread::spawn(move || dispatch.listen());
        Self {
            _dir: dir,
            path,
            server,
            listener: Some(listener),
            _manager: manager,
            hardware,
        }
    }

    fn client(&self) -> SocketClient {
        SocketClient::connect(&self.path).unwrap()
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.server.stop();
        if let Some(listener) = self.listener.take() {
            listener.join().ok();
        }
    }
}

const DPI_NODE: &str = "/io/hwconfd/device/1/dpi";

#[test]
fn test_call_get_set_over_socket() {
    let fixture = Fixture::new();
    let mut client = fixture.client();

    client
        .call(
            DPI_NODE,
            "io.hwconfd.DPI",
            "setDPI",
            vec![WireValue::Byte(0), WireValue::UInt16(800)],
        )
        .unwrap();
    assert_eq!(
        client
            .call(DPI_NODE, "io.hwconfd.DPI", "getDPI", vec![WireValue::Byte(0)])
            .unwrap(),
        vec![WireValue::UInt16(800)]
    );

    assert_eq!(
        client
            .get(DPI_NODE, "io.hwconfd.DPI", "sensorCount")
            .unwrap(),
        WireValue::Byte(1)
    );

    let err = client
        .call(DPI_NODE, "io.hwconfd.DPI", "getDPI", vec![])
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Remote { ref name, .. } if name == "org.freedesktop.DBus.Error.InvalidArgs"
    ));

    let err = client
        .set(
            "/io/hwconfd/device/1",
            "io.hwconfd.Device",
            "name",
            WireValue::String("x".into()),
        )
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Remote { ref name, .. } if name == "org.freedesktop.DBus.Error.AccessDenied"
    ));

    let err = client
        .call("/io/hwconfd/nowhere", "io.hwconfd.DPI", "getDPI", vec![])
        .unwrap_err();
    assert!(matches!(
        err,
        TransportError::Remote { ref name, .. } if name == "org.freedesktop.DBus.Error.UnknownObject"
    ));
}

#[test]
fn test_introspect_over_socket() {
    let fixture = Fixture::new();
    let mut client = fixture.client();

    let objects = client.introspect(None).unwrap();
    let nodes: Vec<&str> = objects.iter().map(|o| o.node.as_str()).collect();
    assert!(nodes.contains(&"/io/hwconfd"));
    assert!(nodes.contains(&"/io/hwconfd/receiver/1"));
    assert!(nodes.contains(&DPI_NODE));

    let dpi = client.introspect(Some(DPI_NODE)).unwrap();
    assert_eq!(dpi.len(), 1);
    let info = &dpi[0].interfaces[0];
    assert_eq!(info.name, "io.hwconfd.DPI");
    assert!(info.method("setDPI").is_some());
    assert_eq!(
        info.property("supportedDPIs").map(|p| p.signature.as_str()),
        Some("a(aqb)")
    );
}

#[test]
fn test_signals_reach_subscribers() {
    let fixture = Fixture::new();
    let mut listener = fixture.client();
    listener.subscribe().unwrap();
    listener.set_read_timeout(Some(Duration::from_secs(5)));

    fixture.hardware.device.sleep().unwrap();
    let signal = listener.next_signal().unwrap();
    assert_eq!(signal.node, "/io/hwconfd/device/1");
    assert_eq!(signal.interface, "io.hwconfd.Device");
    assert_eq!(signal.signal, "sleep");
    assert!(signal.args.is_empty());

    fixture
        .hardware
        .receiver
        .pairing_status(false, Some("timeout"))
        .unwrap();
    let signal = listener.next_signal().unwrap();
    assert_eq!(signal.signal, "pairingStatus");
    assert_eq!(
        signal.args,
        vec![
            WireValue::Boolean(false),
            WireValue::Boolean(true),
            WireValue::String("timeout".to_string()),
        ]
    );
}

#[test]
fn test_second_bind_refused_while_running() {
    let fixture = Fixture::new();
    assert!(matches!(
        SocketTransport::bind(&fixture.path),
        Err(TransportError::BindFailed { .. })
    ));
}
