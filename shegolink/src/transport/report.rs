//! HID raw report transport via hidapi.

use std::ffi::CString;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use hidapi::{DeviceInfo, HidApi, HidDevice};
use log::{debug, trace};

use crate::config::{ProtocolConfig, RawHidUsage};
use crate::error::{Error, Result};
use crate::selector::DeviceTarget;
use crate::transport::{FrameLayout, Transport, TransportKind};

/// Longest time the device lock is held by one read.
const READ_SLICE_MS: i32 = 5;

/// Open raw report interface.
pub struct RawReportLink {
    device: Mutex<Option<HidDevice>>,
    layout: FrameLayout,
    path: String,
}

impl RawReportLink {
    /// Open the report interface of `target`.
    ///
    /// Paths are filtered by vendor/product id and, when set, the interface
    /// number. Among several matches the one carrying the raw HID usage
    /// page/usage wins, otherwise the first.
    pub fn open(target: &DeviceTarget, config: &ProtocolConfig) -> Result<Self> {
        let api = HidApi::new().map_err(|e| Error::Hid(format!("hidapi init failed: {e}")))?;

        let preferred = RawHidUsage {
            usage_page: target.usage_page.unwrap_or(config.raw_usage.usage_page),
            usage: target.usage.unwrap_or(config.raw_usage.usage),
        };
        let candidates: Vec<&DeviceInfo> = api
            .device_list()
            .filter(|info| {
                info.vendor_id() == target.vendor_id
                    && info.product_id() == target.product_id
                    && target
                        .interface
                        .is_none_or(|iface| info.interface_number() == iface)
            })
            .collect();

        let info = pick_path(&candidates, preferred).ok_or_else(|| {
            Error::Hid(match target.interface {
                Some(iface) => format!(
                    "no report path for {:04X}:{:04X} on interface {iface}",
                    target.vendor_id, target.product_id
                ),
                None => format!(
                    "no report path for {:04X}:{:04X}",
                    target.vendor_id, target.product_id
                ),
            })
        })?;

        let path: CString = info.path().to_owned();
        let device = api
            .open_path(&path)
            .map_err(|e| Error::Hid(format!("open failed: {e}")))?;
        let path = path.to_string_lossy().into_owned();

        debug!(
            "Opened report path {path} (interface {}, usage {:04X}/{:04X})",
            info.interface_number(),
            info.usage_page(),
            info.usage()
        );

        Ok(Self {
            device: Mutex::new(Some(device)),
            layout: FrameLayout::raw_report(config.report_size),
            path,
        })
    }
}

fn pick_path<'a>(candidates: &[&'a DeviceInfo], preferred: RawHidUsage) -> Option<&'a DeviceInfo> {
    candidates
        .iter()
        .find(|info| info.usage_page() == preferred.usage_page && info.usage() == preferred.usage)
        .or_else(|| candidates.first())
        .copied()
}

impl Transport for RawReportLink {
    fn kind(&self) -> TransportKind {
        TransportKind::RawReport
    }

    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn send(&self, wire: &[u8]) -> Result<()> {
        let guard = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        let device = guard.as_ref().ok_or(Error::SessionClosed)?;

        trace!("report TX {} bytes: {:02x?}", wire.len(), &wire[..wire.len().min(16)]);
        let written = device
            .write(wire)
            .map_err(|e| Error::Hid(format!("report write failed: {e}")))?;
        if written < wire.len() {
            return Err(Error::Hid(format!(
                "short report write: {written} of {} bytes",
                wire.len()
            )));
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + timeout;
        let mut buf = vec![0u8; self.layout.wire_len()];

        // Short slices keep the lock available to the writer.
        loop {
            let read = {
                let guard = self.device.lock().unwrap_or_else(PoisonError::into_inner);
                let device = guard.as_ref().ok_or(Error::SessionClosed)?;
                device
                    .read_timeout(&mut buf, READ_SLICE_MS)
                    .map_err(|e| Error::Hid(format!("report read failed: {e}")))?
            };

            if read > 0 {
                buf.truncate(read);
                trace!("report RX {read} bytes: {:02x?}", &buf[..read.min(16)]);
                return Ok(Some(buf));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            std::thread::yield_now();
        }
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.device.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            debug!("Closed report path {}", self.path);
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("hid:{}", self.path)
    }
}
