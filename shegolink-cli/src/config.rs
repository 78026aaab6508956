//! Configuration file support for shegolink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (SHEGOLINK_*)
//! 3. Local config file (./shegolink.toml)
//! 4. Global config file (~/.config/shegolink/config.toml)
//!
//! ```toml
//! [device]
//! vid = 0xDEAD
//! pid = 0x0444
//! interface = 1
//!
//! [transfer]
//! destination = "sd-card"
//!
//! [protocol]
//! packet_delay_ms = 10
//!
//! [protocol.commands]
//! led_toggle = 0x30
//! ```

use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use shegolink::ProtocolConfig;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Local config file name.
pub const LOCAL_CONFIG_FILE: &str = "shegolink.toml";

/// Which keyboard to talk to.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    /// USB Vendor ID.
    pub vid: Option<u16>,
    /// USB Product ID.
    pub pid: Option<u16>,
    /// Report interface number.
    pub interface: Option<i32>,
}

/// Transfer defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferConfig {
    /// Default destination ("screen" or "sd-card").
    pub destination: Option<String>,
    /// Wait for TRANSFER_COMPLETE after every send.
    #[serde(default)]
    pub wait: bool,
}

/// Command byte overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandOverrides {
    /// START command byte.
    pub start: Option<u8>,
    /// DATA command byte.
    pub data: Option<u8>,
    /// END command byte.
    pub end: Option<u8>,
    /// LED_TOGGLE command byte.
    pub led_toggle: Option<u8>,
    /// SET_THRESHOLD command byte.
    pub set_threshold: Option<u8>,
}

/// Status byte overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusOverrides {
    /// Status report id.
    pub report_id: Option<u8>,
    /// OK code.
    pub ok: Option<u8>,
    /// CHUNK_RECEIVED code.
    pub chunk_received: Option<u8>,
    /// TRANSFER_STARTED code.
    pub transfer_started: Option<u8>,
    /// TRANSFER_COMPLETE code.
    pub transfer_complete: Option<u8>,
    /// ERROR_INVALID code.
    pub error_invalid: Option<u8>,
}

/// Protocol overrides; anything unset keeps the library default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolOverrides {
    /// HID report size, excluding the report id.
    pub report_size: Option<usize>,
    /// Vendor bulk frame size.
    pub bulk_size: Option<usize>,
    /// Delay after each DATA frame.
    pub packet_delay_ms: Option<u64>,
    /// Delay after START.
    pub start_delay_ms: Option<u64>,
    /// Write timeout.
    pub io_timeout_ms: Option<u64>,
    /// Echo history length.
    pub echo_history: Option<usize>,
    /// Echo match window.
    pub echo_window_ms: Option<u64>,
    /// Command bytes.
    #[serde(default)]
    pub commands: CommandOverrides,
    /// Status bytes.
    #[serde(default)]
    pub status: StatusOverrides,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Device selection.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Transfer defaults.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Protocol overrides.
    #[serde(default)]
    pub protocol: ProtocolOverrides,
}

/// Replace `target` when `value` is set.
fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

/// Keep `target` unless `other` is set.
fn prefer<T>(target: &mut Option<T>, other: Option<T>) {
    if other.is_some() {
        *target = other;
    }
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "shegolink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        prefer(&mut self.device.vid, other.device.vid);
        prefer(&mut self.device.pid, other.device.pid);
        prefer(&mut self.device.interface, other.device.interface);

        prefer(&mut self.transfer.destination, other.transfer.destination);
        if other.transfer.wait {
            self.transfer.wait = true;
        }

        let (mine, theirs) = (&mut self.protocol, other.protocol);
        prefer(&mut mine.report_size, theirs.report_size);
        prefer(&mut mine.bulk_size, theirs.bulk_size);
        prefer(&mut mine.packet_delay_ms, theirs.packet_delay_ms);
        prefer(&mut mine.start_delay_ms, theirs.start_delay_ms);
        prefer(&mut mine.io_timeout_ms, theirs.io_timeout_ms);
        prefer(&mut mine.echo_history, theirs.echo_history);
        prefer(&mut mine.echo_window_ms, theirs.echo_window_ms);

        let (c, o) = (&mut mine.commands, theirs.commands);
        prefer(&mut c.start, o.start);
        prefer(&mut c.data, o.data);
        prefer(&mut c.end, o.end);
        prefer(&mut c.led_toggle, o.led_toggle);
        prefer(&mut c.set_threshold, o.set_threshold);

        let (s, o) = (&mut mine.status, theirs.status);
        prefer(&mut s.report_id, o.report_id);
        prefer(&mut s.ok, o.ok);
        prefer(&mut s.chunk_received, o.chunk_received);
        prefer(&mut s.transfer_started, o.transfer_started);
        prefer(&mut s.transfer_complete, o.transfer_complete);
        prefer(&mut s.error_invalid, o.error_invalid);
    }

    /// Library protocol configuration with the overrides applied.
    ///
    /// The result is not validated here; the selector rejects inconsistent
    /// tables.
    pub fn protocol_config(&self) -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        let p = &self.protocol;

        set(&mut config.report_size, p.report_size);
        set(&mut config.bulk_size, p.bulk_size);
        set(
            &mut config.timing.packet_delay,
            p.packet_delay_ms.map(Duration::from_millis),
        );
        set(
            &mut config.timing.start_delay,
            p.start_delay_ms.map(Duration::from_millis),
        );
        set(
            &mut config.timing.io_timeout,
            p.io_timeout_ms.map(Duration::from_millis),
        );
        set(&mut config.echo.history_size, p.echo_history);
        set(
            &mut config.echo.window,
            p.echo_window_ms.map(Duration::from_millis),
        );

        let c = &p.commands;
        set(&mut config.commands.start, c.start);
        set(&mut config.commands.data, c.data);
        set(&mut config.commands.end, c.end);
        set(&mut config.commands.led_toggle, c.led_toggle);
        set(&mut config.commands.set_threshold, c.set_threshold);

        let s = &p.status;
        set(&mut config.status.report_id, s.report_id);
        set(&mut config.status.ok, s.ok);
        set(&mut config.status.chunk_received, s.chunk_received);
        set(&mut config.status.transfer_started, s.transfer_started);
        set(&mut config.status.transfer_complete, s.transfer_complete);
        set(&mut config.status.error_invalid, s.error_invalid);

        config
    }
}
