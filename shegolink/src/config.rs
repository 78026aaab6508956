//! Protocol configuration.
//!
//! Command bytes, status codes, destination flags, frame sizes and pacing are
//! device-generation specific. They are grouped into a [`ProtocolConfig`] that
//! is validated once and injected when a session is acquired, so protocol
//! logic never depends on literals.

use std::collections::HashSet;
use std::time::Duration;

use crate::error::{Error, Result};

/// Outbound command bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CommandTable {
    /// Begin a transfer (`u16 size`, `u8 destination`).
    pub start: u8,
    /// One chunk of transfer data (`u16 index`, bytes).
    pub data: u8,
    /// Finish a transfer (`u8 destination`).
    pub end: u8,
    /// Toggle the LED transistor.
    pub led_toggle: u8,
    /// Set a key's actuation threshold (`u8 key`, `u8 value`).
    pub set_threshold: u8,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self {
            start: 0x10,
            data: 0x11,
            end: 0x12,
            led_toggle: 0x30,
            set_threshold: 0x31,
        }
    }
}

impl CommandTable {
    fn codes(&self) -> [u8; 5] {
        [
            self.start,
            self.data,
            self.end,
            self.led_toggle,
            self.set_threshold,
        ]
    }
}

/// Inbound status report id and code bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusTable {
    /// Leading byte that marks a frame as a status report.
    pub report_id: u8,
    /// Generic acknowledgement.
    pub ok: u8,
    /// A DATA chunk arrived.
    pub chunk_received: u8,
    /// START was accepted.
    pub transfer_started: u8,
    /// The device finished processing the transfer.
    pub transfer_complete: u8,
    /// The device rejected a frame.
    pub error_invalid: u8,
}

impl Default for StatusTable {
    fn default() -> Self {
        Self {
            report_id: 0x13,
            ok: 0x01,
            chunk_received: 0x02,
            transfer_started: 0x03,
            transfer_complete: 0x04,
            error_invalid: 0x05,
        }
    }
}

impl StatusTable {
    fn codes(&self) -> [u8; 5] {
        [
            self.ok,
            self.chunk_received,
            self.transfer_started,
            self.transfer_complete,
            self.error_invalid,
        ]
    }
}

/// Destination flag bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DestinationTable {
    /// Show on the keyboard display.
    pub screen: u8,
    /// Persist to the SD card.
    pub sd_card: u8,
}

impl Default for DestinationTable {
    fn default() -> Self {
        Self {
            screen: 0x01,
            sd_card: 0x02,
        }
    }
}

/// Pacing and I/O timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timing {
    /// Delay after every DATA frame.
    pub packet_delay: Duration,
    /// Delay after the START frame.
    pub start_delay: Duration,
    /// Upper bound for a single blocking write.
    pub io_timeout: Duration,
    /// How long one reader poll waits for inbound data.
    pub poll_interval: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            packet_delay: Duration::from_millis(10),
            start_delay: Duration::from_millis(50),
            io_timeout: Duration::from_millis(1000),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl Timing {
    /// Timing with no pacing delays, for loopback transports and tests.
    #[must_use]
    pub fn unpaced() -> Self {
        Self {
            packet_delay: Duration::ZERO,
            start_delay: Duration::ZERO,
            io_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Echo suppression parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EchoConfig {
    /// Maximum remembered outbound signatures.
    pub history_size: usize,
    /// Age after which a signature no longer matches.
    pub window: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            history_size: 50,
            window: Duration::from_millis(3000),
        }
    }
}

/// Raw HID interface preference used when several report paths match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RawHidUsage {
    /// Vendor-defined usage page.
    pub usage_page: u16,
    /// Usage within the page.
    pub usage: u16,
}

impl Default for RawHidUsage {
    fn default() -> Self {
        Self {
            usage_page: 0xFF60,
            usage: 0x61,
        }
    }
}

/// Complete protocol configuration for one device generation.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProtocolConfig {
    /// Outbound command bytes.
    pub commands: CommandTable,
    /// Inbound status bytes.
    pub status: StatusTable,
    /// Destination flags.
    pub destinations: DestinationTable,
    /// Pacing and timeouts.
    pub timing: Timing,
    /// Echo suppression.
    pub echo: EchoConfig,
    /// Preferred raw HID usage.
    pub raw_usage: RawHidUsage,
    /// HID report size in bytes, excluding the report id byte.
    pub report_size: usize,
    /// Vendor bulk frame size in bytes.
    pub bulk_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            commands: CommandTable::default(),
            status: StatusTable::default(),
            destinations: DestinationTable::default(),
            timing: Timing::default(),
            echo: EchoConfig::default(),
            raw_usage: RawHidUsage::default(),
            report_size: 32,
            bulk_size: 64,
        }
    }
}

/// Smallest frame that can carry a START command (command + u16 + u8).
pub const MIN_FRAME_SIZE: usize = 4;

impl ProtocolConfig {
    /// Check internal consistency.
    ///
    /// Rejects duplicate command bytes, a command byte equal to the status
    /// report id (its echo would decode as status), duplicate status codes or
    /// destination flags, undersized frames and an empty echo history.
    pub fn validate(&self) -> Result<()> {
        let commands = self.commands.codes();
        if !all_distinct(&commands) {
            return Err(Error::Config(format!(
                "command bytes must be distinct: {commands:02X?}"
            )));
        }
        if commands.contains(&self.status.report_id) {
            return Err(Error::Config(format!(
                "status report id 0x{:02X} collides with a command byte",
                self.status.report_id
            )));
        }

        let codes = self.status.codes();
        if !all_distinct(&codes) {
            return Err(Error::Config(format!(
                "status codes must be distinct: {codes:02X?}"
            )));
        }

        if self.destinations.screen == self.destinations.sd_card {
            return Err(Error::Config(format!(
                "destination flags must differ (both 0x{:02X})",
                self.destinations.screen
            )));
        }

        for (name, size) in [("report_size", self.report_size), ("bulk_size", self.bulk_size)] {
            if size < MIN_FRAME_SIZE {
                return Err(Error::Config(format!(
                    "{name} must be at least {MIN_FRAME_SIZE} bytes, got {size}"
                )));
            }
        }

        if self.echo.history_size == 0 {
            return Err(Error::Config("echo history_size must be non-zero".into()));
        }
        if self.timing.io_timeout.is_zero() || self.timing.poll_interval.is_zero() {
            return Err(Error::Config(
                "io_timeout and poll_interval must be non-zero".into(),
            ));
        }

        Ok(())
    }

    /// Builder-style helper returning a validated copy.
    pub fn validated(self) -> Result<Self> {
        self.validate()?;
        Ok(self)
    }
}

fn all_distinct(values: &[u8]) -> bool {
    let mut seen = HashSet::with_capacity(values.len());
    values.iter().all(|v| seen.insert(*v))
}
