//! Adjustable sensor resolution.

use crate::ipc::{
    Function, HandlerError, Interface, IpcError, Primitive, Property, ServerHandle, TypeSignature,
    Variant,
};
use std::sync::Arc;
use tracing::debug;

/// Resolutions a sensor accepts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DpiList {
    /// Every multiple of `step` from `min` to `max`.
    Range { min: u16, max: u16, step: u16 },
    /// Only these values.
    Discrete(Vec<u16>),
}

impl DpiList {
    /// Wire shape `(aqb)`: the values (`[min, max, step]` for a range)
    /// and whether they form a range.
    fn to_variant(&self) -> Result<Variant, IpcError> {
        let (values, is_range) = match self {
            DpiList::Range { min, max, step } => (vec![*min, *max, *step], true),
            DpiList::Discrete(values) => (values.clone(), false),
        };
        let values = Variant::array(
            values.into_iter().map(Variant::from).collect(),
            Primitive::UInt16.into(),
        )?;
        Ok(Variant::tuple_of(vec![values, Variant::from(is_range)])?)
    }
}

/// The supported value nearest to `dpi`, or `None` for an empty list.
pub fn closest_dpi(list: &DpiList, dpi: u16) -> Option<u16> {
    match list {
        DpiList::Range { min, max, step } => {
            let (min, max) = ((*min).min(*max), (*min).max(*max));
            if dpi <= min {
                return Some(min);
            }
            if dpi >= max {
                return Some(max);
            }
            if *step == 0 {
                return Some(dpi);
            }
            let step = u32::from(*step);
            let offset = u32::from(dpi - min);
            let snapped = u32::from(min) + ((offset + step / 2) / step) * step;
            Some(snapped.min(u32::from(max)) as u16)
        }
        DpiList::Discrete(values) => values
            .iter()
            .copied()
            .min_by_key(|v| (i32::from(*v) - i32::from(dpi)).abs()),
    }
}

/// Hardware access for one device's sensors.
pub trait DpiControl: Send + Sync {
    fn sensor_count(&self) -> u8;
    fn supported_dpis(&self, sensor: u8) -> Result<DpiList, HandlerError>;
    fn dpi(&self, sensor: u8) -> Result<u16, HandlerError>;
    fn set_dpi(&self, sensor: u8, dpi: u16) -> Result<(), HandlerError>;
}

fn check_sensor(control: &dyn DpiControl, sensor: u8) -> Result<(), HandlerError> {
    if sensor >= control.sensor_count() {
        return Err(HandlerError(format!("no sensor {}", sensor)));
    }
    Ok(())
}

/// `io.hwconfd.DPI` on `device/<n>/dpi`.
pub struct DpiFeature {
    control: Arc<dyn DpiControl>,
    interface: Arc<Interface>,
}

impl DpiFeature {
    pub fn new(device_id: &str, control: Arc<dyn DpiControl>) -> Result<Self, IpcError> {
        let sensors = control.sensor_count();
        let mut lists = Vec::with_capacity(usize::from(sensors));
        for sensor in 0..sensors {
            let list = control
                .supported_dpis(sensor)
                .map_err(|e| IpcError::Internal(e.0))?;
            lists.push(list.to_variant()?);
        }
        let supported = Variant::array(lists, TypeSignature::parse("(aqb)")?)?;

        let get_control = Arc::clone(&control);
        let set_control = Arc::clone(&control);
        let interface = Interface::builder(&format!("{}/dpi", device_id), "DPI")
            .function(
                "getDPI",
                Function::new(move |args| {
                    let sensor = args[0].as_byte()?;
                    check_sensor(get_control.as_ref(), sensor)?;
                    Ok(vec![Variant::from(get_control.dpi(sensor)?)])
                })
                .arg("sensor", Primitive::Byte)
                .response("dpi", Primitive::UInt16),
            )
            .function(
                "setDPI",
                Function::new(move |args| {
                    let sensor = args[0].as_byte()?;
                    let requested = args[1].as_uint16()?;
                    check_sensor(set_control.as_ref(), sensor)?;
                    let list = set_control.supported_dpis(sensor)?;
                    let dpi = closest_dpi(&list, requested)
                        .ok_or_else(|| HandlerError::new("sensor reports no resolutions"))?;
                    debug!("Sensor {} DPI {} (requested {})", sensor, dpi, requested);
                    set_control.set_dpi(sensor, dpi)?;
                    Ok(Vec::new())
                })
                .arg("sensor", Primitive::Byte)
                .arg("dpi", Primitive::UInt16),
            )
            .property("sensorCount", Property::read_only(Variant::from(sensors)))
            .property("supportedDPIs", Property::read_only(supported))
            .build();

        Ok(Self { control, interface })
    }

    pub fn control(&self) -> &Arc<dyn DpiControl> {
        &self.control
    }

    pub fn interface(&self) -> &Arc<Interface> {
        &self.interface
    }

    pub(crate) fn register(&self, server: &ServerHandle) -> Result<(), IpcError> {
        self.interface.register_interface(server)
    }
}

impl Drop for DpiFeature {
    fn drop(&mut self) {
        self.interface.unregister_interface();
    }
}
