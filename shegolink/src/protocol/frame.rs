//! Outbound frame construction and encoding.
//!
//! ## Frame Format
//!
//! ```text
//! Raw report (report_size + 1 bytes on the wire):
//! +-----------+---------+----------------------+---------+
//! | Report ID | Command |       Payload        | Padding |
//! +-----------+---------+----------------------+---------+
//! |   0x00    |  1 byte | <= report_size - 1   |  zeros  |
//! +-----------+---------+----------------------+---------+
//!
//! Vendor bulk (bulk_size bytes on the wire):
//! +---------+----------------------+---------+
//! | Command |       Payload        | Padding |
//! +---------+----------------------+---------+
//! |  1 byte | <= bulk_size - 1     |  zeros  |
//! +---------+----------------------+---------+
//! ```
//!
//! Multi-byte fields are little-endian.

use std::fmt;
use std::str::FromStr;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::config::{DestinationTable, ProtocolConfig};
use crate::error::{Error, Result};
use crate::transport::FrameLayout;

/// Largest travel distance accepted for an actuation threshold, in mm.
pub const MAX_THRESHOLD_MM: f32 = 4.0;

/// Where the device stores a transferred payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// Show on the keyboard's display.
    Screen,
    /// Persist to the SD card.
    SdCard,
}

impl Destination {
    /// Flag byte for this destination.
    pub fn flag(self, table: &DestinationTable) -> u8 {
        match self {
            Self::Screen => table.screen,
            Self::SdCard => table.sd_card,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Screen => write!(f, "screen"),
            Self::SdCard => write!(f, "sd-card"),
        }
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "screen" | "display" => Ok(Self::Screen),
            "sd" | "sd-card" | "sdcard" | "sd_card" => Ok(Self::SdCard),
            other => Err(Error::InvalidParam(format!(
                "unknown destination '{other}' (expected screen or sd-card)"
            ))),
        }
    }
}

/// One outbound command with its payload, before wire encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: u8,
    payload: Vec<u8>,
}

impl Frame {
    /// Frame with an arbitrary command byte and payload.
    pub fn raw(command: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// START: announce `total_size` bytes for `destination`.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn start(config: &ProtocolConfig, total_size: u16, destination: Destination) -> Self {
        let mut payload = Vec::with_capacity(3);
        payload.write_u16::<LittleEndian>(total_size).unwrap();
        payload.push(destination.flag(&config.destinations));
        Self::raw(config.commands.start, payload)
    }

    /// DATA: one chunk tagged with its index.
    #[allow(clippy::unwrap_used)] // Writing to Vec<u8> cannot fail
    pub fn data(config: &ProtocolConfig, index: u16, chunk: &[u8]) -> Self {
        let mut payload = Vec::with_capacity(2 + chunk.len());
        payload.write_u16::<LittleEndian>(index).unwrap();
        payload.extend_from_slice(chunk);
        Self::raw(config.commands.data, payload)
    }

    /// END: finish the transfer for `destination`.
    pub fn end(config: &ProtocolConfig, destination: Destination) -> Self {
        Self::raw(
            config.commands.end,
            vec![destination.flag(&config.destinations)],
        )
    }

    /// LED_TOGGLE.
    pub fn led_toggle(config: &ProtocolConfig) -> Self {
        Self::raw(config.commands.led_toggle, Vec::new())
    }

    /// SET_THRESHOLD for one key, `value` already scaled to 0..=255.
    pub fn set_threshold(config: &ProtocolConfig, key_index: u8, value: u8) -> Self {
        Self::raw(config.commands.set_threshold, vec![key_index, value])
    }

    /// Command byte.
    pub fn command(&self) -> u8 {
        self.command
    }

    /// Payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Serialize to a fixed-size wire block for `layout`.
    pub fn encode(&self, layout: &FrameLayout) -> Result<Vec<u8>> {
        if self.payload.len() > layout.max_payload() {
            return Err(Error::FrameOverflow {
                len: self.payload.len(),
                max: layout.max_payload(),
            });
        }

        let mut wire = Vec::with_capacity(layout.wire_len());
        if let Some(id) = layout.report_id() {
            wire.push(id);
        }
        wire.push(self.command);
        wire.extend_from_slice(&self.payload);
        wire.resize(layout.wire_len(), 0);
        Ok(wire)
    }
}

/// Scale an actuation distance in millimetres to the device's 0..=255 range.
///
/// `mm` must lie within `0.0..=4.0`.
pub fn threshold_from_mm(mm: f32) -> Result<u8> {
    if !mm.is_finite() || !(0.0..=MAX_THRESHOLD_MM).contains(&mm) {
        return Err(Error::InvalidParam(format!(
            "threshold {mm} mm outside 0.0..={MAX_THRESHOLD_MM}"
        )));
    }
    // Range checked above, so the result fits in u8.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let value = (mm / MAX_THRESHOLD_MM * 255.0).round() as u8;
    Ok(value)
}
