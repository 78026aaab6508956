//! # shegolink
//!
//! A library for talking to Shego75 keyboards.
//!
//! This crate moves payloads (images, settings) and single-shot commands to
//! the keyboard over whichever raw channel the device offers:
//!
//! - USB vendor bulk interface (preferred)
//! - HID raw report interface (fallback)
//!
//! It covers payload chunking, per-transport framing, inter-packet pacing,
//! inbound status decoding and suppression of writes the host stack reflects
//! back as input.
//!
//! ## Features
//!
//! - `native` (default): libusb and hidapi backends plus device discovery
//! - `serde`: Serialization support for configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use shegolink::{
//!     Destination, DeviceTarget, ProtocolConfig, StatusCode, TransferOrchestrator,
//!     TransportSelector,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = std::fs::read("logo.bin")?;
//!
//!     let selector = TransportSelector::new(ProtocolConfig::default())?;
//!     let mut session = selector.acquire(&DeviceTarget::new(0xDEAD, 0x0444))?;
//!
//!     TransferOrchestrator::new().transfer(&mut session, &image, Destination::Screen, |pct| {
//!         println!("{pct}%");
//!     })?;
//!     session.wait_for_status(StatusCode::TransferComplete, Duration::from_secs(5))?;
//!     session.close()?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod config;
pub mod device;
pub mod error;
pub mod protocol;
pub mod selector;
pub mod session;
pub mod transfer;
pub mod transport;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker consulted between frames.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications).
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::sync::atomic::{AtomicBool, Ordering};

    static TEST_INTERRUPT_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

    let flag = TEST_INTERRUPT_FLAG
        .get_or_init(|| {
            let shared = Arc::new(AtomicBool::new(false));
            let checker = Arc::clone(&shared);
            set_interrupt_checker(move || checker.load(Ordering::Relaxed));
            shared
        })
        .clone();

    flag.store(value, Ordering::Relaxed);
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use transport::{DeviceLink, bulk::VendorBulkLink, report::RawReportLink};
pub use {
    config::{
        CommandTable, DestinationTable, EchoConfig, ProtocolConfig, RawHidUsage, StatusTable,
        Timing,
    },
    device::{DetectedDevice, DeviceModel, auto_detect_device, detect_devices, format_device_list},
    error::{Error, Result, TransferStage, TransportAttempt},
    protocol::{
        ChunkPlan, Destination, DeviceEvent, EchoFilter, Frame, StatusCode, StatusDecoder,
        StatusEvent, threshold_from_mm,
    },
    selector::{DeviceTarget, TransportSelector},
    session::DeviceSession,
    transfer::{TransferOrchestrator, TransferReport},
    transport::{
        FrameLayout, Transport, TransportKind,
        loopback::{LoopbackHandle, LoopbackTransport},
    },
};
