//! Transport abstraction for keyboard communication.
//!
//! The keyboard exposes two incompatible raw channels:
//!
//! - **Vendor bulk**: a USB interface of class 0xFF with bulk OUT (and
//!   optionally IN) endpoints, driven through libusb (`rusb`).
//! - **Raw report**: a generic HID interface exchanging fixed-size reports,
//!   driven through `hidapi`.
//!
//! Both implement the [`Transport`] trait, so protocol code never branches on
//! which one is active.
//!
//! ```text
//! +----------------------------------------+
//! |  TransferOrchestrator / DeviceSession  |
//! +-------------------+--------------------+
//!                     |
//!                     v
//! +-------------------+--------------------+
//! |            Transport trait             |
//! +---------+--------------------+---------+
//!           |                    |
//!           v                    v
//! +---------+--------+  +--------+---------+
//! |  VendorBulkLink  |  |  RawReportLink   |
//! |     (rusb)       |  |    (hidapi)      |
//! +------------------+  +------------------+
//! ```

#[cfg(feature = "native")]
pub mod bulk;
pub mod loopback;
#[cfg(feature = "native")]
pub mod report;

use std::fmt;
use std::time::Duration;

use crate::config::ProtocolConfig;
use crate::error::Result;

/// Report id byte prepended to every outbound raw report.
pub const OUTBOUND_REPORT_ID: u8 = 0x00;

/// Bytes that precede chunk data inside a DATA payload (`u16` chunk index).
pub const DATA_INDEX_LEN: usize = 2;

/// Which physical channel a transport uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// USB vendor-specific bulk interface.
    VendorBulk,
    /// HID report channel.
    RawReport,
}

impl TransportKind {
    /// Short machine-friendly name.
    pub fn name(self) -> &'static str {
        match self {
            Self::VendorBulk => "vendor-bulk",
            Self::RawReport => "raw-report",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::VendorBulk => write!(f, "vendor bulk"),
            Self::RawReport => write!(f, "raw report"),
        }
    }
}

/// Fixed wire geometry of a transport.
///
/// `frame_size` counts the command byte and payload but not the report id, so
/// a 32-byte raw report goes out as 33 bytes on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    kind: TransportKind,
    frame_size: usize,
    report_id: Option<u8>,
}

impl FrameLayout {
    /// Layout for a HID report channel with the given report size.
    pub fn raw_report(report_size: usize) -> Self {
        Self {
            kind: TransportKind::RawReport,
            frame_size: report_size,
            report_id: Some(OUTBOUND_REPORT_ID),
        }
    }

    /// Layout for a vendor bulk channel with the given frame size.
    pub fn vendor_bulk(bulk_size: usize) -> Self {
        Self {
            kind: TransportKind::VendorBulk,
            frame_size: bulk_size,
            report_id: None,
        }
    }

    /// Layout for `kind` using the sizes from `config`.
    pub fn for_kind(kind: TransportKind, config: &ProtocolConfig) -> Self {
        match kind {
            TransportKind::VendorBulk => Self::vendor_bulk(config.bulk_size),
            TransportKind::RawReport => Self::raw_report(config.report_size),
        }
    }

    /// Transport kind this layout belongs to.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Report id prepended on the wire, if any.
    pub fn report_id(&self) -> Option<u8> {
        self.report_id
    }

    /// Frame size excluding the report id byte.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Number of report id bytes in front of the command byte.
    pub fn report_id_len(&self) -> usize {
        usize::from(self.report_id.is_some())
    }

    /// Bytes before the payload (report id, command).
    pub fn header_len(&self) -> usize {
        self.report_id_len() + 1
    }

    /// Largest command payload.
    pub fn max_payload(&self) -> usize {
        self.frame_size.saturating_sub(1)
    }

    /// Largest slice of transfer data one DATA frame carries.
    pub fn data_chunk_size(&self) -> usize {
        self.max_payload().saturating_sub(DATA_INDEX_LEN)
    }

    /// Total bytes written per frame.
    pub fn wire_len(&self) -> usize {
        self.report_id_len() + self.frame_size
    }

    /// Drop the report id byte from an encoded outbound frame.
    pub fn strip_report_id<'a>(&self, wire: &'a [u8]) -> &'a [u8] {
        wire.get(self.report_id_len()..).unwrap_or_default()
    }
}

/// Capability shared by every transport variant.
///
/// Opening is done by each variant's constructor; an instance is always open
/// until [`Transport::close`] runs. Methods take `&self` because the session's
/// reader thread receives while the caller sends.
pub trait Transport: Send + Sync {
    /// Which channel this is.
    fn kind(&self) -> TransportKind;

    /// Wire geometry.
    fn layout(&self) -> FrameLayout;

    /// Write one encoded frame.
    fn send(&self, wire: &[u8]) -> Result<()>;

    /// Wait up to `timeout` for one inbound frame.
    ///
    /// Returns `Ok(None)` when nothing arrived in time.
    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>>;

    /// Whether the transport has an inbound channel at all.
    fn has_inbound(&self) -> bool {
        true
    }

    /// Release the interface and close the handle. Idempotent.
    fn close(&self) -> Result<()>;

    /// Human-readable location (bus address or HID path).
    fn describe(&self) -> String;
}

/// The transport chosen for a native device session.
#[cfg(feature = "native")]
pub enum DeviceLink {
    /// USB vendor bulk interface.
    VendorBulk(bulk::VendorBulkLink),
    /// HID raw report interface.
    RawReport(report::RawReportLink),
}

#[cfg(feature = "native")]
impl DeviceLink {
    fn inner(&self) -> &dyn Transport {
        match self {
            Self::VendorBulk(link) => link,
            Self::RawReport(link) => link,
        }
    }
}

#[cfg(feature = "native")]
impl Transport for DeviceLink {
    fn kind(&self) -> TransportKind {
        self.inner().kind()
    }

    fn layout(&self) -> FrameLayout {
        self.inner().layout()
    }

    fn send(&self, wire: &[u8]) -> Result<()> {
        self.inner().send(wire)
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        self.inner().receive(timeout)
    }

    fn has_inbound(&self) -> bool {
        self.inner().has_inbound()
    }

    fn close(&self) -> Result<()> {
        self.inner().close()
    }

    fn describe(&self) -> String {
        self.inner().describe()
    }
}
