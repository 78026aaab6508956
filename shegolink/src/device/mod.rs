//! Keyboard discovery and classification.
//!
//! Attached devices are enumerated over both backends: libusb for vendor bulk
//! interfaces and hidapi for report interfaces. A keyboard exposing both shows
//! up once per transport.

use crate::error::{Error, Result};
use crate::selector::DeviceTarget;
use crate::transport::TransportKind;

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Vendor ID shared by every Shego keyboard.
pub const SHEGO_VID: u16 = 0xDEAD;

/// Known keyboard models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceModel {
    /// Shego75, second revision.
    Shego75V2,
    /// Shego Mini.
    ShegoMini,
    /// Pre-production Shego75 boards.
    Shego75Prototype,
    /// Unknown device.
    Unknown,
}

/// Known VID/PID pairs.
const KNOWN_KEYBOARDS: &[(u16, u16, DeviceModel)] = &[
    (SHEGO_VID, 0x0444, DeviceModel::Shego75V2),
    (SHEGO_VID, 0x1616, DeviceModel::ShegoMini),
    (SHEGO_VID, 0xC0DE, DeviceModel::Shego75Prototype),
];

impl DeviceModel {
    /// Classify a VID/PID pair.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        KNOWN_KEYBOARDS
            .iter()
            .find(|(v, p, _)| *v == vid && *p == pid)
            .map_or(Self::Unknown, |(_, _, model)| *model)
    }

    /// Human-readable model name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Shego75V2 => "Shego75 v2",
            Self::ShegoMini => "Shego Mini",
            Self::Shego75Prototype => "Shego75 prototype",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known model.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// One discovered keyboard interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedDevice {
    /// Bus location or HID path.
    pub location: String,
    /// Interface type.
    pub transport: TransportKind,
    /// Classified model.
    pub model: DeviceModel,
    /// USB vendor ID.
    pub vid: u16,
    /// USB product ID.
    pub pid: u16,
    /// Interface number, if reported.
    pub interface: Option<i32>,
    /// HID usage page (report interfaces only).
    pub usage_page: Option<u16>,
    /// HID usage (report interfaces only).
    pub usage: Option<u16>,
    /// Manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedDevice {
    /// Acquisition target for this device.
    pub fn target(&self) -> DeviceTarget {
        let target = DeviceTarget::new(self.vid, self.pid);
        match (self.transport, self.interface) {
            (TransportKind::RawReport, Some(iface)) => target.with_interface(iface),
            _ => target,
        }
    }
}

/// Enumerate attached keyboards with a known VID/PID.
#[cfg(feature = "native")]
pub fn detect_devices() -> Vec<DetectedDevice> {
    let mut result = detect_bulk_interfaces();
    result.extend(detect_report_interfaces());
    result
}

/// Enumerate attached keyboards (no backends in this build).
#[cfg(not(feature = "native"))]
pub fn detect_devices() -> Vec<DetectedDevice> {
    Vec::new()
}

#[cfg(feature = "native")]
fn detect_bulk_interfaces() -> Vec<DetectedDevice> {
    use crate::transport::bulk::VENDOR_CLASS;

    let devices = match rusb::devices() {
        Ok(devices) => devices,
        Err(e) => {
            debug!("Failed to enumerate USB devices: {e}");
            return Vec::new();
        },
    };

    let mut result = Vec::new();
    for device in devices.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        let model = DeviceModel::from_vid_pid(desc.vendor_id(), desc.product_id());
        if !model.is_known() {
            continue;
        }
        let Ok(config) = device.active_config_descriptor() else {
            continue;
        };
        let vendor_iface = config
            .interfaces()
            .flat_map(|iface| iface.descriptors())
            .find(|d| d.class_code() == VENDOR_CLASS)
            .map(|d| i32::from(d.interface_number()));
        let Some(interface) = vendor_iface else {
            trace!("{} has no vendor interface", model.name());
            continue;
        };

        result.push(DetectedDevice {
            location: format!("usb:{:03}/{:03}", device.bus_number(), device.address()),
            transport: TransportKind::VendorBulk,
            model,
            vid: desc.vendor_id(),
            pid: desc.product_id(),
            interface: Some(interface),
            usage_page: None,
            usage: None,
            manufacturer: None,
            product: None,
            serial: None,
        });
    }
    result
}

#[cfg(feature = "native")]
fn detect_report_interfaces() -> Vec<DetectedDevice> {
    let api = match hidapi::HidApi::new() {
        Ok(api) => api,
        Err(e) => {
            debug!("Failed to enumerate HID devices: {e}");
            return Vec::new();
        },
    };

    api.device_list()
        .filter_map(|info| {
            let model = DeviceModel::from_vid_pid(info.vendor_id(), info.product_id());
            if !model.is_known() {
                return None;
            }
            trace!(
                "Found report interface {} (usage {:04X}/{:04X})",
                info.path().to_string_lossy(),
                info.usage_page(),
                info.usage()
            );
            Some(DetectedDevice {
                location: info.path().to_string_lossy().into_owned(),
                transport: TransportKind::RawReport,
                model,
                vid: info.vendor_id(),
                pid: info.product_id(),
                interface: Some(info.interface_number()),
                usage_page: Some(info.usage_page()),
                usage: Some(info.usage()),
                manufacturer: info.manufacturer_string().map(str::to_string),
                product: info.product_string().map(str::to_string),
                serial: info.serial_number().map(str::to_string),
            })
        })
        .collect()
}

/// Pick the keyboard to use when none was named.
///
/// Devices reachable over vendor bulk come first.
pub fn auto_detect_device() -> Result<DetectedDevice> {
    pick_device(detect_devices())
}

fn pick_device(devices: Vec<DetectedDevice>) -> Result<DetectedDevice> {
    let preferred = devices
        .iter()
        .position(|d| d.transport == TransportKind::VendorBulk)
        .unwrap_or(0);
    let device = devices
        .into_iter()
        .nth(preferred)
        .ok_or(Error::NoKnownDevice)?;

    #[cfg(feature = "native")]
    info!(
        "Auto-detected {} at {} ({})",
        device.model.name(),
        device.location,
        device.transport
    );
    Ok(device)
}

/// Format a list of detected devices for display.
pub fn format_device_list(devices: &[DetectedDevice]) -> Vec<String> {
    devices
        .iter()
        .map(|device| {
            let iface = device
                .interface
                .map(|i| format!(" if{i}"))
                .unwrap_or_default();
            let product = device
                .product
                .as_ref()
                .map(|p| format!(" - {p}"))
                .unwrap_or_default();
            format!(
                "{} [{}] {:04X}:{:04X} {}{iface}{product}",
                device.location,
                device.model.name(),
                device.vid,
                device.pid,
                device.transport.name(),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected(transport: TransportKind, location: &str) -> DetectedDevice {
        DetectedDevice {
            location: location.to_string(),
            transport,
            model: DeviceModel::Shego75V2,
            vid: SHEGO_VID,
            pid: 0x0444,
            interface: Some(1),
            usage_page: None,
            usage: None,
            manufacturer: None,
            product: Some("Shego75".to_string()),
            serial: None,
        }
    }

    #[test]
    fn test_model_from_vid_pid() {
        assert_eq!(DeviceModel::from_vid_pid(0xDEAD, 0x0444), DeviceModel::Shego75V2);
        assert_eq!(DeviceModel::from_vid_pid(0xDEAD, 0x1616), DeviceModel::ShegoMini);
        assert_eq!(
            DeviceModel::from_vid_pid(0xDEAD, 0xC0DE),
            DeviceModel::Shego75Prototype
        );
        assert_eq!(DeviceModel::from_vid_pid(0xDEAD, 0x0001), DeviceModel::Unknown);
        assert_eq!(DeviceModel::from_vid_pid(0x1A86, 0x0444), DeviceModel::Unknown);
    }

    #[test]
    fn test_pick_prefers_bulk() {
        let devices = vec![
            detected(TransportKind::RawReport, "/dev/hidraw3"),
            detected(TransportKind::VendorBulk, "usb:001/007"),
        ];
        assert_eq!(pick_device(devices).unwrap().location, "usb:001/007");
        assert!(matches!(pick_device(Vec::new()), Err(Error::NoKnownDevice)));
    }

    #[test]
    fn test_target_keeps_report_interface() {
        let report = detected(TransportKind::RawReport, "/dev/hidraw3");
        assert_eq!(report.target().interface, Some(1));
        let bulk = detected(TransportKind::VendorBulk, "usb:001/007");
        assert_eq!(bulk.target().interface, None);
    }

    #[test]
    fn test_format_device_list() {
        let formatted = format_device_list(&[detected(TransportKind::RawReport, "/dev/hidraw3")]);
        assert_eq!(
            formatted,
            vec!["/dev/hidraw3 [Shego75 v2] DEAD:0444 raw-report if1 - Shego75".to_string()]
        );
    }
}
