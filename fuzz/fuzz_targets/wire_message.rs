//! Fuzz target for IPC message decoding.
//!
//! Malformed lines from a socket client must never panic, and decoded
//! values must survive a trip back to the wire.

#![no_main]

use hwconfd::ipc::{from_wire, to_wire, ClientRequest, IpcMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(IpcMessage::Request { request, .. }) = serde_json::from_slice::<IpcMessage>(data) else {
        return;
    };
    let values = match request {
        ClientRequest::Call { args, .. } => args,
        ClientRequest::Set { value, .. } => vec![value],
        _ => return,
    };
    for wire in &values {
        if let Ok(variant) = from_wire(wire) {
            let back = to_wire(&variant);
            assert_eq!(from_wire(&back).as_ref(), Ok(&variant));
        }
    }
});
