//! Transport selection.
//!
//! The vendor bulk interface is preferred. If it cannot be claimed (no such
//! interface, a driver conflict, the device is busy) the raw report interface
//! of the same device is tried. Only when both fail is acquisition an error,
//! and that error lists why each transport was rejected.

use std::fmt;
use std::sync::Arc;

use log::{debug, info};

use crate::config::ProtocolConfig;
use crate::error::{Error, Result, TransportAttempt};
use crate::session::{DeviceSession, SessionLease};
use crate::transport::{Transport, TransportKind};

/// Which device to open and how to narrow down its report interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTarget {
    /// USB vendor ID.
    pub vendor_id: u16,
    /// USB product ID.
    pub product_id: u16,
    /// Logical interface number of the report channel.
    pub interface: Option<i32>,
    /// Preferred report usage page, overriding the configured one.
    pub usage_page: Option<u16>,
    /// Preferred report usage, overriding the configured one.
    pub usage: Option<u16>,
}

impl DeviceTarget {
    /// Target a device by VID/PID with no report filters.
    pub fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
            interface: None,
            usage_page: None,
            usage: None,
        }
    }

    /// Restrict the report channel to one interface number.
    #[must_use]
    pub fn with_interface(mut self, interface: i32) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Prefer a specific report usage page/usage.
    #[must_use]
    pub fn with_usage(mut self, usage_page: u16, usage: u16) -> Self {
        self.usage_page = Some(usage_page);
        self.usage = Some(usage);
        self
    }
}

impl fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor_id, self.product_id)?;
        if let Some(iface) = self.interface {
            write!(f, " interface {iface}")?;
        }
        Ok(())
    }
}

/// Opens device sessions with bulk-first, report-fallback policy.
#[derive(Debug, Clone)]
pub struct TransportSelector {
    config: ProtocolConfig,
}

impl TransportSelector {
    /// Create a selector; the configuration is validated here.
    pub fn new(config: ProtocolConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration handed to every session.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Open `target` over the native USB/HID backends.
    #[cfg(feature = "native")]
    pub fn acquire(&self, target: &DeviceTarget) -> Result<DeviceSession> {
        use crate::transport::DeviceLink;
        use crate::transport::bulk::VendorBulkLink;
        use crate::transport::report::RawReportLink;

        self.acquire_with(
            target,
            |target, config| VendorBulkLink::open(target, config).map(DeviceLink::VendorBulk),
            |target, config| RawReportLink::open(target, config).map(DeviceLink::RawReport),
        )
    }

    /// Open `target` over the native USB/HID backends (unavailable in this build).
    #[cfg(not(feature = "native"))]
    pub fn acquire(&self, _target: &DeviceTarget) -> Result<DeviceSession> {
        Err(Error::Unsupported(
            "built without the `native` feature; no USB or HID backend".to_string(),
        ))
    }

    /// Run the selection policy with caller-supplied openers.
    ///
    /// `open_bulk` is tried first; its error is recorded and `open_report`
    /// tried next. A second session on a device this process already holds is
    /// refused with [`Error::DeviceBusy`] before either opener runs.
    pub fn acquire_with<T, B, R>(
        &self,
        target: &DeviceTarget,
        open_bulk: B,
        open_report: R,
    ) -> Result<DeviceSession>
    where
        T: Transport + 'static,
        B: FnOnce(&DeviceTarget, &ProtocolConfig) -> Result<T>,
        R: FnOnce(&DeviceTarget, &ProtocolConfig) -> Result<T>,
    {
        let lease = SessionLease::acquire(target.vendor_id, target.product_id)?;
        let mut attempts = Vec::with_capacity(2);

        let transport = match open_bulk(target, &self.config) {
            Ok(transport) => Some(transport),
            Err(e) => {
                debug!("Vendor bulk unavailable on {target}: {e}");
                attempts.push(TransportAttempt {
                    kind: TransportKind::VendorBulk,
                    reason: e.to_string(),
                });
                None
            },
        };

        let transport = match transport {
            Some(transport) => transport,
            None => match open_report(target, &self.config) {
                Ok(transport) => transport,
                Err(e) => {
                    debug!("Raw report unavailable on {target}: {e}");
                    attempts.push(TransportAttempt {
                        kind: TransportKind::RawReport,
                        reason: e.to_string(),
                    });
                    return Err(Error::NoTransport { attempts });
                },
            },
        };

        info!("Using {} transport for {target}", transport.kind());
        DeviceSession::start(Arc::new(transport), self.config.clone(), Some(lease))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FrameLayout;
    use crate::transport::loopback::LoopbackTransport;

    fn selector() -> TransportSelector {
        TransportSelector::new(ProtocolConfig::default()).unwrap()
    }

    #[test]
    fn test_bulk_preferred() {
        let target = DeviceTarget::new(0x1234, 0x0001);
        let session = selector()
            .acquire_with(
                &target,
                |_, c| Ok(LoopbackTransport::new(FrameLayout::vendor_bulk(c.bulk_size)).0),
                |_, _| -> Result<LoopbackTransport> { panic!("report opener must not run") },
            )
            .unwrap();
        assert_eq!(session.kind(), TransportKind::VendorBulk);
    }

    #[test]
    fn test_second_session_refused() {
        let target = DeviceTarget::new(0x1234, 0x0002);
        let open = |_: &DeviceTarget, c: &ProtocolConfig| -> Result<LoopbackTransport> {
            Ok(LoopbackTransport::new(FrameLayout::raw_report(c.report_size)).0)
        };
        let first = selector().acquire_with(&target, open, open).unwrap();
        let second = selector().acquire_with(&target, open, open);
        assert!(matches!(second, Err(Error::DeviceBusy { .. })));

        drop(first);
        assert!(selector().acquire_with(&target, open, open).is_ok());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ProtocolConfig::default();
        config.commands.data = config.commands.start;
        assert!(TransportSelector::new(config).is_err());
    }

    #[test]
    fn test_target_display() {
        assert_eq!(DeviceTarget::new(0xDEAD, 0x0444).to_string(), "DEAD:0444");
        assert_eq!(
            DeviceTarget::new(0xDEAD, 0x0444).with_interface(1).to_string(),
            "DEAD:0444 interface 1"
        );
    }
}
