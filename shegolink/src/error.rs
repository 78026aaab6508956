//! Error types for shegolink.

use std::fmt;
use std::io;
use thiserror::Error;

use crate::transport::TransportKind;

/// Result type for shegolink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for shegolink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, OS handles).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// libusb reported an error on the vendor bulk interface.
    #[error("USB error: {0}")]
    Usb(String),

    /// hidapi reported an error on the raw report interface.
    #[error("HID error: {0}")]
    Hid(String),

    /// No device with the requested VID/PID is attached.
    #[error("Device {vid:04X}:{pid:04X} not found")]
    DeviceNotFound {
        /// USB vendor ID.
        vid: u16,
        /// USB product ID.
        pid: u16,
    },

    /// Another session already holds the device.
    #[error("Device {vid:04X}:{pid:04X} is already held by another session")]
    DeviceBusy {
        /// USB vendor ID.
        vid: u16,
        /// USB product ID.
        pid: u16,
    },

    /// Every transport was tried and none could be opened.
    #[error("No usable transport: {}", format_attempts(attempts))]
    NoTransport {
        /// Each transport that was tried, in order, with the reason it failed.
        attempts: Vec<TransportAttempt>,
    },

    /// A transfer stopped partway; the session has been released.
    #[error("Transfer aborted at {stage}: {source}")]
    TransferAborted {
        /// Frame that was being sent when the failure happened.
        stage: TransferStage,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A frame payload does not fit the active transport.
    #[error("Frame payload of {len} bytes exceeds {max} byte limit")]
    FrameOverflow {
        /// Requested payload length.
        len: usize,
        /// Largest payload the layout can carry.
        max: usize,
    },

    /// Payload cannot be described by the 16-bit size and index fields.
    #[error("Payload of {len} bytes exceeds the {max} byte protocol limit")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
        /// Largest transferable payload.
        max: usize,
    },

    /// The device answered with an error status.
    #[error("Device rejected the request (status 0x{code:02X})")]
    DeviceRejected {
        /// Status code byte as received.
        code: u8,
    },

    /// No keyboard with a known VID/PID is attached.
    #[error("No known keyboard attached")]
    NoKnownDevice,

    /// The session was closed and can no longer be used.
    #[error("Session is closed")]
    SessionClosed,

    /// The operation was interrupted by the embedding application.
    #[error("Operation cancelled")]
    Cancelled,

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Invalid argument supplied by the caller.
    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    /// Unsupported operation on this build or platform.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Protocol configuration failed validation.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error means the device or an interface was never reached,
    /// as opposed to a failure on an already open link.
    pub fn is_acquisition(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound { .. }
                | Self::DeviceBusy { .. }
                | Self::NoTransport { .. }
                | Self::NoKnownDevice
        )
    }
}

/// One transport tried during acquisition and why it was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportAttempt {
    /// Transport that was tried.
    pub kind: TransportKind,
    /// Human-readable failure reason.
    pub reason: String,
}

impl fmt::Display for TransportAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

fn format_attempts(attempts: &[TransportAttempt]) -> String {
    if attempts.is_empty() {
        return "no transports attempted".to_string();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Position within a transfer where a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    /// The START frame.
    Start,
    /// A DATA frame with the given chunk index.
    Data(u16),
    /// The END frame.
    End,
    /// A standalone command frame.
    Command(u8),
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "START"),
            Self::Data(index) => write!(f, "DATA #{index}"),
            Self::End => write!(f, "END"),
            Self::Command(code) => write!(f, "command 0x{code:02X}"),
        }
    }
}
