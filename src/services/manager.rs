//! Process-wide device and receiver listing.

use crate::ipc::{
    ArgInfo, Interface, IpcError, Primitive, Property, ServerHandle, TypeSignature, Variant,
};
use std::sync::Arc;
use tracing::info;

const DEVICES: &str = "devices";
const RECEIVERS: &str = "receivers";

/// `io.hwconfd.DeviceManager` on the root node.
pub struct DeviceManagerService {
    interface: Arc<Interface>,
}

fn string_list() -> Variant {
    Variant::empty(&TypeSignature::array(Primitive::String.into()))
}

impl DeviceManagerService {
    pub fn register(server: &ServerHandle) -> Result<Self, IpcError> {
        let interface = Interface::builder("", "DeviceManager")
            .property(DEVICES, Property::read_only(string_list()))
            .property(RECEIVERS, Property::read_only(string_list()))
            .signal("deviceAdded", vec![ArgInfo::new("device", Primitive::String)])
            .signal("deviceRemoved", vec![ArgInfo::new("device", Primitive::String)])
            .signal("receiverAdded", vec![ArgInfo::new("receiver", Primitive::String)])
            .signal("receiverRemoved", vec![ArgInfo::new("receiver", Primitive::String)])
            .build();
        interface.register_interface(server)?;
        Ok(Self { interface })
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub fn add_device(&self, node: &str) -> Result<(), IpcError> {
        self.add(DEVICES, "deviceAdded", node)
    }

    pub fn remove_device(&self, node: &str) -> Result<(), IpcError> {
        self.remove(DEVICES, "deviceRemoved", node)
    }

    pub fn add_receiver(&self, node: &str) -> Result<(), IpcError> {
        self.add(RECEIVERS, "receiverAdded", node)
    }

    pub fn remove_receiver(&self, node: &str) -> Result<(), IpcError> {
        self.remove(RECEIVERS, "receiverRemoved", node)
    }

    fn add(&self, property: &str, signal: &str, node: &str) -> Result<(), IpcError> {
        self.interface
            .update_property(property, |list| list.push(Variant::from(node)))?;
        info!("{} {}", signal, node);
        self.interface.emit_signal(signal, &[Variant::from(node)])
    }

    fn remove(&self, property: &str, signal: &str, node: &str) -> Result<(), IpcError> {
        let target = Variant::from(node);
        let mut found = false;
        self.interface.update_property(property, |list| {
            let before = list.as_array()?.len();
            let kept: Vec<Variant> = list
                .as_array()?
                .iter()
                .filter(|entry| **entry != target)
                .cloned()
                .collect();
            found = kept.len() != before;
            list.set_elements(kept)
        })?;
        if !found {
            return Ok(());
        }
        info!("{} {}", signal, node);
        self.interface.emit_signal(signal, &[target])
    }
}

impl Drop for DeviceManagerService {
    fn drop(&mut self) {
        self.interface.unregister_interface();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::transport::MemoryTransport;
    use crate::ipc::{Server, WireValue};

    #[test]
    fn test_add_and_remove_devices() {
        let (transport, _client) = MemoryTransport::new("test");
        let server = Server::new(transport.clone());
        let manager = DeviceManagerService::register(&server.handle()).unwrap();

        manager.add_device("/io/hwconfd/device/1").unwrap();
        manager.add_device("/io/hwconfd/device/2").unwrap();
        manager.remove_device("/io/hwconfd/device/1").unwrap();
        manager.remove_device("/io/hwconfd/device/9").unwrap();

        let devices = manager.interface().get_property(DEVICES).unwrap();
        assert_eq!(devices.as_array().unwrap().len(), 1);
        assert_eq!(devices.get(0).unwrap().as_str().unwrap(), "/io/hwconfd/device/2");

        let names: Vec<String> = transport.signals().into_iter().map(|s| s.signal).collect();
        assert_eq!(names, vec!["deviceAdded", "deviceAdded", "deviceRemoved"]);
        assert_eq!(
            transport.signals()[2].args,
            vec![WireValue::String("/io/hwconfd/device/1".to_string())]
        );
    }

    #[test]
    fn test_drop_unregisters() {
        let (transport, _client) = MemoryTransport::new("test");
        let server = Server::new(transport.clone());
        let manager = DeviceManagerService::register(&server.handle()).unwrap();
        manager.add_receiver("/io/hwconfd/receiver/1").unwrap();
        assert!(server.is_registered("/io/hwconfd", "io.hwconfd.DeviceManager"));

        drop(manager);
        assert!(!server.is_registered("/io/hwconfd", "io.hwconfd.DeviceManager"));
        assert_eq!(transport.registration_count(), 0);
    }
}
