//! In-memory hardware, for running the daemon without devices attached.

use super::device::{DeviceDescriptor, DeviceService, Feature};
use super::dpi::{DpiControl, DpiFeature, DpiList};
use super::manager::DeviceManagerService;
use super::receiver::{ReceiverControl, ReceiverService};
use super::smartshift::{SmartShiftControl, SmartShiftFeature, SmartShiftStatus, SmartShiftUpdate};
use crate::ipc::{HandlerError, IpcError, ServerHandle};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

pub struct SimulatedDpi {
    lists: Vec<DpiList>,
    current: Mutex<Vec<u16>>,
}

impl SimulatedDpi {
    pub fn new(lists: Vec<DpiList>, initial: u16) -> Self {
        let current = vec![initial; lists.len()];
        Self {
            lists,
            current: Mutex::new(current),
        }
    }
}

impl DpiControl for SimulatedDpi {
    fn sensor_count(&self) -> u8 {
        self.lists.len().min(usize::from(u8::MAX)) as u8
    }

    fn supported_dpis(&self, sensor: u8) -> Result<DpiList, HandlerError> {
        self.lists
            .get(usize::from(sensor))
            .cloned()
            .ok_or_else(|| HandlerError(format!("no sensor {}", sensor)))
    }

    fn dpi(&self, sensor: u8) -> Result<u16, HandlerError> {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        current
            .get(usize::from(sensor))
            .copied()
            .ok_or_else(|| HandlerError(format!("no sensor {}", sensor)))
    }

    fn set_dpi(&self, sensor: u8, dpi: u16) -> Result<(), HandlerError> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = current
            .get_mut(usize::from(sensor))
            .ok_or_else(|| HandlerError(format!("no sensor {}", sensor)))?;
        *slot = dpi;
        Ok(())
    }
}

pub struct SimulatedSmartShift {
    status: Mutex<SmartShiftStatus>,
}

impl SimulatedSmartShift {
    pub fn new(status: SmartShiftStatus) -> Self {
        Self {
            status: Mutex::new(status),
        }
    }
}

impl SmartShiftControl for SimulatedSmartShift {
    fn status(&self) -> Result<SmartShiftStatus, HandlerError> {
        Ok(*self.status.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn set_status(&self, update: SmartShiftUpdate) -> Result<(), HandlerError> {
        update.apply(&mut self.status.lock().unwrap_or_else(PoisonError::into_inner));
        Ok(())
    }
}

/// Accepts every pairing request and remembers occupied slots.
#[derive(Default)]
pub struct SimulatedReceiver {
    pairing: Mutex<bool>,
    slots: Mutex<[bool; 6]>,
}

impl SimulatedReceiver {
    pub fn is_pairing(&self) -> bool {
        *self.pairing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn occupy(&self, index: u8) {
        if let Some(slot) = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(usize::from(index).wrapping_sub(1))
        {
            *slot = true;
        }
    }
}

impl ReceiverControl for SimulatedReceiver {
    fn pair(&self, _timeout: u8) -> Result<(), HandlerError> {
        *self.pairing.lock().unwrap_or_else(PoisonError::into_inner) = true;
        Ok(())
    }

    fn stop_pairing(&self) -> Result<(), HandlerError> {
        *self.pairing.lock().unwrap_or_else(PoisonError::into_inner) = false;
        Ok(())
    }

    fn unpair(&self, index: u8) -> Result<(), HandlerError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(usize::from(index).wrapping_sub(1)) {
            Some(slot) if *slot => {
                *slot = false;
                Ok(())
            }
            _ => Err(HandlerError(format!("no device in slot {}", index))),
        }
    }
}

/// A receiver with one paired mouse that has DPI and SmartShift.
pub struct SimulatedHardware {
    pub receiver: ReceiverService,
    pub device: DeviceService,
}

impl SimulatedHardware {
    pub fn register(
        server: &ServerHandle,
        manager: &DeviceManagerService,
    ) -> Result<Self, IpcError> {
        let receiver_control = Arc::new(SimulatedReceiver::default());
        receiver_control.occupy(1);
        let receiver = ReceiverService::register(server, 1, receiver_control)?;
        manager.add_receiver(receiver.interface().node())?;

        let descriptor = DeviceDescriptor {
            id: 1,
            name: "Simulated Wireless Mouse".to_string(),
            pid: 0x4082,
            receiver: receiver.interface().node().to_string(),
            raw_path: "/dev/hidraw0".to_string(),
            device_index: 1,
        };
        let node_id = descriptor.node_id();
        let mut device = DeviceService::register(
            server,
            descriptor,
            Arc::new(|| info!("Simulated device reconfigured")),
        )?;

        let dpi = Arc::new(SimulatedDpi::new(
            vec![DpiList::Range {
                min: 200,
                max: 4000,
                step: 50,
            }],
            1000,
        ));
        device.add_feature(Feature::Dpi(DpiFeature::new(&node_id, dpi)?))?;

        let smartshift = Arc::new(SimulatedSmartShift::new(SmartShiftStatus {
            active: true,
            threshold: 30,
            default_threshold: 30,
        }));
        device.add_feature(Feature::SmartShift(SmartShiftFeature::new(
            &node_id, smartshift,
        )?))?;

        receiver.device_paired(device.node())?;
        manager.add_device(device.node())?;
        info!("Simulated hardware ready at {}", device.node());
        Ok(Self { receiver, device })
    }
}
