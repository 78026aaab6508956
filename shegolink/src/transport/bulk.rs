//! USB vendor bulk transport via libusb.

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use log::{debug, trace, warn};
use rusb::{Device, DeviceHandle, Direction, GlobalContext, TransferType};

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::selector::DeviceTarget;
use crate::transport::{FrameLayout, Transport, TransportKind};

/// USB interface class for vendor-specific interfaces.
pub const VENDOR_CLASS: u8 = 0xFF;

/// Endpoints resolved on the vendor interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Endpoints {
    interface: u8,
    out_ep: u8,
    in_ep: Option<u8>,
}

/// Claimed vendor bulk interface.
pub struct VendorBulkLink {
    handle: RwLock<Option<DeviceHandle<GlobalContext>>>,
    endpoints: Endpoints,
    reattach: bool,
    layout: FrameLayout,
    io_timeout: Duration,
    location: String,
}

impl VendorBulkLink {
    /// Find, open and claim the vendor interface of `target`.
    ///
    /// Everything partially acquired is released again if a later step fails.
    pub fn open(target: &DeviceTarget, config: &ProtocolConfig) -> Result<Self> {
        let device = find_device(target.vendor_id, target.product_id)?;
        let endpoints = find_vendor_interface(&device)?;
        let location = format!("usb:{:03}/{:03}", device.bus_number(), device.address());

        let handle = device.open().map_err(|e| Error::Usb(format!("open failed: {e}")))?;

        // Not supported on every platform; treat errors as "no driver bound".
        let reattach = handle
            .kernel_driver_active(endpoints.interface)
            .unwrap_or(false);
        if reattach {
            debug!(
                "Detaching kernel driver from interface {}",
                endpoints.interface
            );
            handle
                .detach_kernel_driver(endpoints.interface)
                .map_err(|e| Error::Usb(format!("kernel driver detach failed: {e}")))?;
        }

        if let Err(e) = handle.claim_interface(endpoints.interface) {
            if reattach {
                let _ = handle.attach_kernel_driver(endpoints.interface);
            }
            return Err(Error::Usb(format!(
                "claim of interface {} failed: {e}",
                endpoints.interface
            )));
        }

        debug!(
            "Claimed {location} interface {} (OUT 0x{:02X}, IN {})",
            endpoints.interface,
            endpoints.out_ep,
            endpoints
                .in_ep
                .map_or_else(|| "none".to_string(), |ep| format!("0x{ep:02X}"))
        );

        Ok(Self {
            handle: RwLock::new(Some(handle)),
            endpoints,
            reattach,
            layout: FrameLayout::vendor_bulk(config.bulk_size),
            io_timeout: config.timing.io_timeout,
            location,
        })
    }
}

fn find_device(vid: u16, pid: u16) -> Result<Device<GlobalContext>> {
    let devices = rusb::devices().map_err(|e| Error::Usb(format!("enumeration failed: {e}")))?;
    devices
        .iter()
        .find(|device| {
            device
                .device_descriptor()
                .is_ok_and(|desc| desc.vendor_id() == vid && desc.product_id() == pid)
        })
        .ok_or(Error::DeviceNotFound { vid, pid })
}

fn find_vendor_interface(device: &Device<GlobalContext>) -> Result<Endpoints> {
    let config = device
        .active_config_descriptor()
        .map_err(|e| Error::Usb(format!("config descriptor unavailable: {e}")))?;

    for interface in config.interfaces() {
        for desc in interface.descriptors() {
            if desc.class_code() != VENDOR_CLASS {
                continue;
            }
            let mut out_ep = None;
            let mut in_ep = None;
            for ep in desc.endpoint_descriptors() {
                if ep.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match ep.direction() {
                    Direction::Out if out_ep.is_none() => out_ep = Some(ep.address()),
                    Direction::In if in_ep.is_none() => in_ep = Some(ep.address()),
                    _ => {},
                }
            }
            if let Some(out_ep) = out_ep {
                return Ok(Endpoints {
                    interface: desc.interface_number(),
                    out_ep,
                    in_ep,
                });
            }
        }
    }

    Err(Error::Usb(
        "no vendor-class interface with a bulk OUT endpoint".to_string(),
    ))
}

impl Transport for VendorBulkLink {
    fn kind(&self) -> TransportKind {
        TransportKind::VendorBulk
    }

    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn send(&self, wire: &[u8]) -> Result<()> {
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let handle = guard.as_ref().ok_or(Error::SessionClosed)?;

        trace!("bulk TX {} bytes: {:02x?}", wire.len(), &wire[..wire.len().min(16)]);
        let written = handle
            .write_bulk(self.endpoints.out_ep, wire, self.io_timeout)
            .map_err(|e| match e {
                rusb::Error::Timeout => {
                    Error::Timeout(format!("bulk write to 0x{:02X}", self.endpoints.out_ep))
                },
                other => Error::Usb(format!("bulk write failed: {other}")),
            })?;

        if written != wire.len() {
            return Err(Error::Usb(format!(
                "short bulk write: {written} of {} bytes",
                wire.len()
            )));
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let Some(in_ep) = self.endpoints.in_ep else {
            return Ok(None);
        };
        let guard = self.handle.read().unwrap_or_else(PoisonError::into_inner);
        let handle = guard.as_ref().ok_or(Error::SessionClosed)?;

        let mut buf = vec![0u8; self.layout.wire_len()];
        match handle.read_bulk(in_ep, &mut buf, timeout) {
            Ok(n) => {
                buf.truncate(n);
                trace!("bulk RX {n} bytes: {:02x?}", &buf[..n.min(16)]);
                Ok(Some(buf))
            },
            Err(rusb::Error::Timeout) => Ok(None),
            Err(e) => Err(Error::Usb(format!("bulk read failed: {e}"))),
        }
    }

    fn has_inbound(&self) -> bool {
        self.endpoints.in_ep.is_some()
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.handle.write().unwrap_or_else(PoisonError::into_inner);
        let Some(handle) = guard.take() else {
            return Ok(());
        };

        let iface = self.endpoints.interface;
        let released = handle.release_interface(iface);
        if self.reattach {
            if let Err(e) = handle.attach_kernel_driver(iface) {
                warn!("Failed to reattach kernel driver to interface {iface}: {e}");
            }
        }
        debug!("Released {} interface {iface}", self.location);
        released.map_err(|e| Error::Usb(format!("release of interface {iface} failed: {e}")))
    }

    fn describe(&self) -> String {
        self.location.clone()
    }
}

impl Drop for VendorBulkLink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing {}: {e}", self.location);
        }
    }
}
