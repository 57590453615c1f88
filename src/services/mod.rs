//! Interfaces published by the daemon.
//!
//! Each service owns its [`Interface`](crate::ipc::Interface) handles and
//! withdraws them from the server when dropped.

mod configuration;
mod device;
mod dpi;
mod manager;
mod receiver;
mod simulated;
mod smartshift;

pub use configuration::ConfigurationService;
pub use device::{DeviceDescriptor, DeviceService, Feature, FeatureKind};
pub use dpi::{closest_dpi, DpiControl, DpiFeature, DpiList};
pub use manager::DeviceManagerService;
pub use receiver::{ReceiverControl, ReceiverService, PAIRING_SLOTS};
pub use simulated::{SimulatedDpi, SimulatedHardware, SimulatedReceiver, SimulatedSmartShift};
pub use smartshift::{SmartShiftControl, SmartShiftFeature, SmartShiftStatus, SmartShiftUpdate};
