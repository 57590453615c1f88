//! Per-device interface and its feature set.

use super::dpi::DpiFeature;
use super::smartshift::SmartShiftFeature;
use crate::ipc::{
    Function, HandlerError, Interface, IpcError, Primitive, Property, ServerHandle, TypeSignature,
    Variant,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::thread;
use tracing::{error, info};

/// The closed set of features a device can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureKind {
    Dpi,
    SmartShift,
}

impl FeatureKind {
    pub fn name(self) -> &'static str {
        match self {
            FeatureKind::Dpi => "dpi",
            FeatureKind::SmartShift => "smartshift",
        }
    }
}

impl fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub enum Feature {
    Dpi(DpiFeature),
    SmartShift(SmartShiftFeature),
}

impl Feature {
    pub fn kind(&self) -> FeatureKind {
        match self {
            Feature::Dpi(_) => FeatureKind::Dpi,
            Feature::SmartShift(_) => FeatureKind::SmartShift,
        }
    }

    pub fn interface(&self) -> &Arc<Interface> {
        match self {
            Feature::Dpi(f) => f.interface(),
            Feature::SmartShift(f) => f.interface(),
        }
    }

    pub fn as_dpi(&self) -> Option<&DpiFeature> {
        match self {
            Feature::Dpi(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_smartshift(&self) -> Option<&SmartShiftFeature> {
        match self {
            Feature::SmartShift(f) => Some(f),
            _ => None,
        }
    }

    fn register(&self, server: &ServerHandle) -> Result<(), IpcError> {
        match self {
            Feature::Dpi(f) => f.register(server),
            Feature::SmartShift(f) => f.register(server),
        }
    }
}

/// Static facts about a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Logical number, used in `device/<id>`.
    pub id: u32,
    pub name: String,
    pub pid: u16,
    /// Receiver node for wireless devices, empty when wired.
    pub receiver: String,
    pub raw_path: String,
    pub device_index: u8,
}

impl DeviceDescriptor {
    pub fn node_id(&self) -> String {
        format!("device/{}", self.id)
    }
}

type Reconfigure = dyn Fn() + Send + Sync;

/// `io.hwconfd.Device` on `device/<n>`, owning the device's features.
pub struct DeviceService {
    descriptor: DeviceDescriptor,
    server: ServerHandle,
    interface: Arc<Interface>,
    features: BTreeMap<FeatureKind, Feature>,
}

impl DeviceService {
    /// Publish a device. `reconfigure` runs on a worker thread whenever a
    /// client calls `reconfigure()`.
    pub fn register(
        server: &ServerHandle,
        descriptor: DeviceDescriptor,
        reconfigure: Arc<Reconfigure>,
    ) -> Result<Self, IpcError> {
        let node_id = descriptor.node_id();
        let worker_name = format!("reconfigure-{}", descriptor.id);
        let interface = Interface::builder(&node_id, "Device")
            .property("name", Property::read_only(Variant::from(descriptor.name.as_str())))
            .property("pid", Property::read_only(Variant::from(descriptor.pid)))
            .property("asleep", Property::read_only(Variant::from(false)))
            .property(
                "supportedFeatures",
                Property::read_only(Variant::empty(&TypeSignature::array(
                    Primitive::String.into(),
                ))),
            )
            .property(
                "receiver",
                Property::read_only(Variant::from(descriptor.receiver.as_str())),
            )
            .property(
                "rawPath",
                Property::read_only(Variant::from(descriptor.raw_path.as_str())),
            )
            .property(
                "deviceIndex",
                Property::read_only(Variant::from(descriptor.device_index)),
            )
            .signal("sleep", vec![])
            .signal("wakeup", vec![])
            .function(
                "reconfigure",
                Function::new(move |_| {
                    let task = Arc::clone(&reconfigure);
                    thread::Builder::new()
                        .name(worker_name.clone())
                        .spawn(move || task())
                        .map_err(|e| HandlerError(format!("reconfigure not started: {}", e)))?;
                    Ok(Vec::new())
                }),
            )
            .build();
        interface.register_interface(server)?;
        info!("Device {} registered at {}", descriptor.name, interface.node());

        Ok(Self {
            descriptor,
            server: server.clone(),
            interface,
            features: BTreeMap::new(),
        })
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub fn node(&self) -> &str {
        self.interface.node()
    }

    /// Publish a feature and list it in `supportedFeatures`. Replaces an
    /// existing feature of the same kind.
    pub fn add_feature(&mut self, feature: Feature) -> Result<(), IpcError> {
        let kind = feature.kind();
        self.features.remove(&kind);
        feature.register(&self.server)?;
        self.features.insert(kind, feature);
        self.sync_feature_list()
    }

    pub fn remove_feature(&mut self, kind: FeatureKind) -> Result<Option<Feature>, IpcError> {
        let removed = self.features.remove(&kind);
        if let Some(ref feature) = removed {
            feature.interface().unregister_interface();
            self.sync_feature_list()?;
        }
        Ok(removed)
    }

    pub fn feature(&self, kind: FeatureKind) -> Option<&Feature> {
        self.features.get(&kind)
    }

    pub fn features(&self) -> impl Iterator<Item = &Feature> {
        self.features.values()
    }

    fn sync_feature_list(&self) -> Result<(), IpcError> {
        let names: Vec<Variant> = self
            .features
            .keys()
            .map(|kind| Variant::from(kind.name()))
            .collect();
        self.interface
            .update_property("supportedFeatures", |list| list.set_elements(names))?;
        Ok(())
    }

    pub fn is_asleep(&self) -> bool {
        self.interface
            .get_property("asleep")
            .and_then(|v| Ok(v.as_bool()?))
            .unwrap_or(false)
    }

    pub fn sleep(&self) -> Result<(), IpcError> {
        self.set_asleep(true, "sleep")
    }

    pub fn wakeup(&self) -> Result<(), IpcError> {
        self.set_asleep(false, "wakeup")
    }

    fn set_asleep(&self, asleep: bool, signal: &str) -> Result<(), IpcError> {
        self.interface.set_property("asleep", Variant::from(asleep))?;
        if let Err(e) = self.interface.emit_signal(signal, &[]) {
            error!("{} on {}: {}", signal, self.node(), e);
            return Err(e);
        }
        Ok(())
    }
}

impl Drop for DeviceService {
    fn drop(&mut self) {
        self.features.clear();
        self.interface.unregister_interface();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::transport::MemoryTransport;
    use crate::ipc::Server;
    use crate::services::dpi::{DpiControl, DpiList};
    use crate::services::simulated::{SimulatedDpi, SimulatedSmartShift};
    use crate::services::smartshift::SmartShiftStatus;

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            id: 3,
            name: "Test Mouse".to_string(),
            pid: 0x4082,
            receiver: String::new(),
            raw_path: "/dev/hidraw3".to_string(),
            device_index: 0xff,
        }
    }

    fn dpi(node_id: &str, initial: u16) -> Feature {
        let lists = vec![DpiList::Discrete(vec![800, 1600])];
        let control = Arc::new(SimulatedDpi::new(lists, initial));
        Feature::Dpi(DpiFeature::new(node_id, control).unwrap())
    }

    fn smartshift(node_id: &str) -> Feature {
        let control = Arc::new(SimulatedSmartShift::new(SmartShiftStatus {
            active: true,
            threshold: 20,
            default_threshold: 20,
        }));
        Feature::SmartShift(SmartShiftFeature::new(node_id, control).unwrap())
    }

    fn supported(device: &DeviceService) -> Vec<String> {
        device
            .interface()
            .get_property("supportedFeatures")
            .unwrap()
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_add_and_remove_features() {
        let (transport, _client) = MemoryTransport::new("test");
        let server = Server::new(transport.clone());
        let mut device = DeviceService::register(&server.handle(), descriptor(), Arc::new(|| {}))
            .unwrap();
        let node_id = device.descriptor().node_id();
        assert!(supported(&device).is_empty());

        device.add_feature(smartshift(&node_id)).unwrap();
        device.add_feature(dpi(&node_id, 800)).unwrap();
        assert_eq!(supported(&device), vec!["dpi", "smartshift"]);
        assert_eq!(transport.registration_count(), 3);
        assert!(server.handle().is_registered("/io/hwconfd/device/3/dpi", "io.hwconfd.DPI"));

        let removed = device.remove_feature(FeatureKind::SmartShift).unwrap();
        assert_eq!(removed.map(|f| f.kind()), Some(FeatureKind::SmartShift));
        assert_eq!(supported(&device), vec!["dpi"]);
        assert!(!server
            .handle()
            .is_registered("/io/hwconfd/device/3/smartshift", "io.hwconfd.SmartShift"));

        // Absent kinds are a no-op.
        assert!(device.remove_feature(FeatureKind::SmartShift).unwrap().is_none());
        assert_eq!(supported(&device), vec!["dpi"]);
        assert_eq!(transport.registration_count(), 2);
    }

    #[test]
    fn test_add_feature_replaces_same_kind() {
        let (transport, _client) = MemoryTransport::new("test");
        let server = Server::new(transport.clone());
        let mut device = DeviceService::register(&server.handle(), descriptor(), Arc::new(|| {}))
            .unwrap();
        let node_id = device.descriptor().node_id();

        device.add_feature(dpi(&node_id, 800)).unwrap();
        device.add_feature(dpi(&node_id, 1600)).unwrap();
        assert_eq!(supported(&device), vec!["dpi"]);
        assert_eq!(device.features().count(), 1);
        assert_eq!(transport.registration_count(), 2);

        let current = device
            .feature(FeatureKind::Dpi)
            .and_then(Feature::as_dpi)
            .map(|f| f.control().dpi(0).unwrap());
        assert_eq!(current, Some(1600));
    }

    #[test]
    fn test_drop_unregisters_device_and_features() {
        let (transport, _client) = MemoryTransport::new("test");
        let server = Server::new(transport.clone());
        let mut device = DeviceService::register(&server.handle(), descriptor(), Arc::new(|| {}))
            .unwrap();
        let node_id = device.descriptor().node_id();
        device.add_feature(dpi(&node_id, 800)).unwrap();
        assert_eq!(transport.registration_count(), 2);

        drop(device);
        assert_eq!(transport.registration_count(), 0);
    }
}
