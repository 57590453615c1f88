//! Wireless receiver pairing.

use crate::ipc::{
    ArgInfo, Function, HandlerError, Interface, IpcError, Primitive, Property, ServerHandle,
    TypeSignature, Variant,
};
use std::sync::Arc;
use tracing::info;

/// Receiver slots addressable by `unpair`.
pub const PAIRING_SLOTS: std::ops::RangeInclusive<u8> = 1..=6;

pub trait ReceiverControl: Send + Sync {
    /// Open the pairing lock for `timeout` seconds.
    fn pair(&self, timeout: u8) -> Result<(), HandlerError>;
    fn stop_pairing(&self) -> Result<(), HandlerError>;
    fn unpair(&self, index: u8) -> Result<(), HandlerError>;
}

/// `io.hwconfd.Receiver` on `receiver/<n>`.
pub struct ReceiverService {
    interface: Arc<Interface>,
}

impl ReceiverService {
    pub fn register(
        server: &ServerHandle,
        id: u32,
        control: Arc<dyn ReceiverControl>,
    ) -> Result<Self, IpcError> {
        let node_id = format!("receiver/{}", id);
        let pair_control = Arc::clone(&control);
        let stop_control = Arc::clone(&control);
        let unpair_control = control;
        let pair_node = node_id.clone();
        let stop_node = node_id.clone();

        let interface = Interface::builder(&node_id, "Receiver")
            .property(
                "devices",
                Property::read_only(Variant::empty(&TypeSignature::array(
                    Primitive::String.into(),
                ))),
            )
            .signal("devicePaired", vec![ArgInfo::new("device", Primitive::String)])
            .signal("deviceUnpaired", vec![ArgInfo::new("device", Primitive::String)])
            .signal(
                "pairingStatus",
                vec![
                    ArgInfo::new("pairing", Primitive::Boolean),
                    ArgInfo::new("isError", Primitive::Boolean),
                    ArgInfo::new("error", Primitive::String),
                ],
            )
            .function(
                "pair",
                Function::new(move |args| {
                    let timeout = args[0].as_byte()?;
                    info!("Pairing on {} for {}s", pair_node, timeout);
                    pair_control.pair(timeout)?;
                    Ok(Vec::new())
                })
                .arg("timeout", Primitive::Byte),
            )
            .function(
                "stopPairing",
                Function::new(move |_| {
                    info!("Cancelling pair on {}", stop_node);
                    stop_control.stop_pairing()?;
                    Ok(Vec::new())
                }),
            )
            .function(
                "unpair",
                Function::new(move |args| {
                    let index = args[0].as_byte()?;
                    if !PAIRING_SLOTS.contains(&index) {
                        return Err(HandlerError(format!("index {} out of range", index)));
                    }
                    unpair_control.unpair(index)?;
                    Ok(Vec::new())
                })
                .arg("index", Primitive::Byte),
            )
            .build();
        interface.register_interface(server)?;
        Ok(Self { interface })
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub fn device_paired(&self, device: &str) -> Result<(), IpcError> {
        self.interface
            .update_property("devices", |list| list.push(Variant::from(device)))?;
        self.interface
            .emit_signal("devicePaired", &[Variant::from(device)])
    }

    pub fn device_unpaired(&self, device: &str) -> Result<(), IpcError> {
        let target = Variant::from(device);
        self.interface.update_property("devices", |list| {
            let kept: Vec<Variant> = list
                .as_array()?
                .iter()
                .filter(|entry| **entry != target)
                .cloned()
                .collect();
            list.set_elements(kept)
        })?;
        self.interface.emit_signal("deviceUnpaired", &[target])
    }

    pub fn pairing_status(&self, pairing: bool, error: Option<&str>) -> Result<(), IpcError> {
        self.interface.emit_signal(
            "pairingStatus",
            &[
                Variant::from(pairing),
                Variant::from(error.is_some()),
                Variant::from(error.unwrap_or_default()),
            ],
        )
    }
}

impl Drop for ReceiverService {
    fn drop(&mut self) {
        self.interface.unregister_interface();
    }
}
