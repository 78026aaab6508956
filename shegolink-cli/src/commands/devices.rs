//! Device listing command implementation.

use anyhow::Result;
use console::style;
use shegolink::{DetectedDevice, detect_devices, format_device_list};

fn device_json(device: &DetectedDevice) -> serde_json::Value {
    serde_json::json!({
        "location": device.location,
        "transport": device.transport.name(),
        "model": device.model.name(),
        "vid": device.vid,
        "pid": device.pid,
        "interface": device.interface,
        "usage_page": device.usage_page,
        "usage": device.usage,
        "manufacturer": device.manufacturer,
        "product": device.product,
        "serial": device.serial,
    })
}

/// Render the JSON listing document.
pub(crate) fn devices_json(devices: &[DetectedDevice]) -> serde_json::Value {
    let list: Vec<serde_json::Value> = devices.iter().map(device_json).collect();
    serde_json::json!({
        "ok": true,
        "data": {
            "devices": list,
        }
    })
}

/// List devices command implementation.
pub(crate) fn cmd_list_devices(json: bool) -> Result<()> {
    let devices = detect_devices();

    if json {
        println!("{}", serde_json::to_string_pretty(&devices_json(&devices))?);
        return Ok(());
    }

    eprintln!("{}", style("Attached keyboards").bold().underlined());
    if devices.is_empty() {
        eprintln!("  {}", style("No known keyboard found").dim());
    } else {
        for line in format_device_list(&devices) {
            println!("  {line}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shegolink::{DeviceModel, TransportKind};

    #[test]
    fn test_devices_json_shape() {
        let device = DetectedDevice {
            location: "usb:001/007".to_string(),
            transport: TransportKind::VendorBulk,
            model: DeviceModel::Shego75V2,
            vid: 0xDEAD,
            pid: 0x0444,
            interface: Some(2),
            usage_page: None,
            usage: None,
            manufacturer: None,
            product: Some("Shego75".to_string()),
            serial: None,
        };
        let value = devices_json(&[device]);
        assert_eq!(value["ok"], true);
        let entry = &value["data"]["devices"][0];
        assert_eq!(entry["transport"], "vendor-bulk");
        assert_eq!(entry["model"], "Shego75 v2");
        assert_eq!(entry["vid"], 0xDEAD);
        assert_eq!(entry["interface"], 2);
        assert!(entry["serial"].is_null());
    }

    #[test]
    fn test_devices_json_empty() {
        let value = devices_json(&[]);
        assert!(value["data"]["devices"].as_array().unwrap().is_empty());
    }
}
