//! Scroll-wheel ratchet switching.

use crate::ipc::{
    Function, HandlerError, Interface, IpcError, Primitive, ServerHandle, TypeSignature, Variant,
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartShiftStatus {
    pub active: bool,
    pub threshold: u8,
    pub default_threshold: u8,
}

/// Fields left as `None` are not changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmartShiftUpdate {
    pub active: Option<bool>,
    pub threshold: Option<u8>,
    pub default_threshold: Option<u8>,
}

impl SmartShiftUpdate {
    pub fn apply(&self, status: &mut SmartShiftStatus) {
        if let Some(active) = self.active {
            status.active = active;
        }
        if let Some(threshold) = self.threshold {
            status.threshold = threshold;
        }
        if let Some(default_threshold) = self.default_threshold {
            status.default_threshold = default_threshold;
        }
    }
}

pub trait SmartShiftControl: Send + Sync {
    fn status(&self) -> Result<SmartShiftStatus, HandlerError>;
    fn set_status(&self, update: SmartShiftUpdate) -> Result<(), HandlerError>;
}

/// `(b?)` pair: apply the second field only when the first is true.
fn optional_bool(pair: &Variant) -> Result<Option<bool>, HandlerError> {
    Ok(pair.get(0)?.as_bool()?.then_some(pair.get(1)?.as_bool()?))
}

fn optional_byte(pair: &Variant) -> Result<Option<u8>, HandlerError> {
    Ok(pair.get(0)?.as_bool()?.then_some(pair.get(1)?.as_byte()?))
}

/// `io.hwconfd.SmartShift` on `device/<n>/smartshift`.
pub struct SmartShiftFeature {
    control: Arc<dyn SmartShiftControl>,
    interface: Arc<Interface>,
}

impl SmartShiftFeature {
    pub fn new(device_id: &str, control: Arc<dyn SmartShiftControl>) -> Result<Self, IpcError> {
        let bool_pair = TypeSignature::parse("(bb)")?;
        let byte_pair = TypeSignature::parse("(by)")?;

        let get_control = Arc::clone(&control);
        let set_control = Arc::clone(&control);
        let interface = Interface::builder(&format!("{}/smartshift", device_id), "SmartShift")
            .function(
                "getStatus",
                Function::new(move |_| {
                    let status = get_control.status()?;
                    Ok(vec![
                        Variant::from(status.active),
                        Variant::from(status.threshold),
                        Variant::from(status.default_threshold),
                    ])
                })
                .response("active", Primitive::Boolean)
                .response("threshold", Primitive::Byte)
                .response("defaultThreshold", Primitive::Byte),
            )
            .function(
                "setStatus",
                Function::new(move |args| {
                    let update = SmartShiftUpdate {
                        active: optional_bool(&args[0])?,
                        threshold: optional_byte(&args[1])?,
                        default_threshold: optional_byte(&args[2])?,
                    };
                    set_control.set_status(update)?;
                    Ok(Vec::new())
                })
                .arg("active", bool_pair)
                .arg("threshold", byte_pair.clone())
                .arg("defaultThreshold", byte_pair),
            )
            .build();

        Ok(Self { control, interface })
    }

    pub fn control(&self) -> &Arc<dyn SmartShiftControl> {
        &self.control
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub(crate) fn register(&self, server: &ServerHandle) -> Result<(), IpcError> {
        self.interface.register_interface(server)
    }
}

impl Drop for SmartShiftFeature {
    fn drop(&mut self) {
        self.interface.unregister_interface();
    }
}
