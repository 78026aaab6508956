//! Inbound frame classification.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use crate::config::StatusTable;

/// Decoded status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Generic acknowledgement.
    Ok,
    /// A DATA chunk was received.
    ChunkReceived,
    /// START was accepted.
    TransferStarted,
    /// The device finished processing a transfer.
    TransferComplete,
    /// The device rejected a frame.
    ErrorInvalid,
    /// Missing or unmapped code byte.
    Unknown,
}

impl StatusCode {
    /// Map a code byte through `table`.
    pub fn from_byte(table: &StatusTable, code: u8) -> Self {
        match code {
            c if c == table.ok => Self::Ok,
            c if c == table.chunk_received => Self::ChunkReceived,
            c if c == table.transfer_started => Self::TransferStarted,
            c if c == table.transfer_complete => Self::TransferComplete,
            c if c == table.error_invalid => Self::ErrorInvalid,
            _ => Self::Unknown,
        }
    }

    /// Whether this code reports a device-side failure.
    pub fn is_error(self) -> bool {
        self == Self::ErrorInvalid
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::ChunkReceived => "CHUNK_RECEIVED",
            Self::TransferStarted => "TRANSFER_STARTED",
            Self::TransferComplete => "TRANSFER_COMPLETE",
            Self::ErrorInvalid => "ERROR_INVALID",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(name)
    }
}

/// A status report from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    /// Decoded code.
    pub code: StatusCode,
    /// Code byte as received, if present.
    pub raw_code: Option<u8>,
    /// Chunk the report refers to, when the firmware includes one.
    pub chunk_index: Option<u16>,
    /// Whole inbound frame.
    pub raw: Vec<u8>,
}

/// Something the device sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Status report.
    Status(StatusEvent),
    /// Any other device-originated frame.
    Data(Vec<u8>),
}

impl DeviceEvent {
    /// Status payload, if this is a status event.
    pub fn as_status(&self) -> Option<&StatusEvent> {
        match self {
            Self::Status(status) => Some(status),
            Self::Data(_) => None,
        }
    }
}

/// Classifies inbound frames.
#[derive(Debug, Clone, Copy)]
pub struct StatusDecoder {
    table: StatusTable,
}

impl StatusDecoder {
    /// Decoder for the given status table.
    pub fn new(table: StatusTable) -> Self {
        Self { table }
    }

    /// Decode one inbound frame. Never fails.
    ///
    /// Frames starting with the status report id, optionally behind a 0x00
    /// report id byte, are status reports; everything else is data.
    pub fn decode(&self, inbound: &[u8]) -> DeviceEvent {
        let body = match inbound {
            [id, rest @ ..] if *id == self.table.report_id => rest,
            [0x00, id, rest @ ..] if *id == self.table.report_id => rest,
            _ => return DeviceEvent::Data(inbound.to_vec()),
        };

        let raw_code = body.first().copied();
        let code = raw_code.map_or(StatusCode::Unknown, |c| {
            StatusCode::from_byte(&self.table, c)
        });
        let chunk_index = body.get(1..3).map(LittleEndian::read_u16);

        DeviceEvent::Status(StatusEvent {
            code,
            raw_code,
            chunk_index,
            raw: inbound.to_vec(),
        })
    }
}
