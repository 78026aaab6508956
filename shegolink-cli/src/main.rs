//! shegolink CLI - Command-line tool for Shego75 keyboards.
//!
//! ## Features
//!
//! - Send images and other payloads to the screen or SD card
//! - Toggle the LED and set key actuation thresholds
//! - Send raw single-frame commands
//! - Watch status reports from the keyboard
//! - Shell completion generation
//! - Environment variable support

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use shegolink::{Destination, DeviceSession, DeviceTarget, TransportSelector, auto_detect_device};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// shegolink - push images and settings to Shego75 keyboards.
///
/// Environment variables:
///   SHEGOLINK_VID         - Keyboard USB vendor ID (hex)
///   SHEGOLINK_PID         - Keyboard USB product ID (hex)
///   SHEGOLINK_INTERFACE   - Report interface number
#[derive(Parser)]
#[command(name = "shegolink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// USB vendor ID, e.g. DEAD or 0xDEAD (auto-detected if not specified).
    #[arg(long, global = true, env = "SHEGOLINK_VID", value_parser = parse_hex_u16)]
    vid: Option<u16>,

    /// USB product ID, e.g. 0444 or 0x0444.
    #[arg(long, global = true, env = "SHEGOLINK_PID", value_parser = parse_hex_u16)]
    pid: Option<u16>,

    /// Report interface number used when falling back to raw HID.
    #[arg(long, global = true, env = "SHEGOLINK_INTERFACE")]
    interface: Option<i32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub(crate) verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub(crate) quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Transfer destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub(crate) enum DestArg {
    /// Keyboard display.
    Screen,
    /// SD card.
    #[value(alias = "sd")]
    SdCard,
}

impl From<DestArg> for Destination {
    fn from(dest: DestArg) -> Self {
        match dest {
            DestArg::Screen => Destination::Screen,
            DestArg::SdCard => Destination::SdCard,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Send a file to the keyboard.
    Send {
        /// File to send.
        file: PathBuf,

        /// Where the keyboard should put it [default: screen].
        #[arg(short, long, value_enum)]
        dest: Option<DestArg>,

        /// Wait for the keyboard to confirm the transfer.
        #[arg(short, long)]
        wait: bool,

        /// Seconds to wait for confirmation.
        #[arg(long, default_value = "5", requires = "wait")]
        timeout: u64,
    },

    /// Toggle the LED.
    Led,

    /// Set the actuation threshold of one key.
    Threshold {
        /// Key index.
        key: u8,

        /// Actuation distance in millimetres (0.0 - 4.0).
        mm: f32,
    },

    /// Send a raw single-frame command.
    Raw {
        /// Command byte (hex).
        #[arg(value_parser = parse_hex_u8)]
        command: u8,

        /// Payload bytes (hex).
        #[arg(value_parser = parse_hex_u8)]
        bytes: Vec<u8>,
    },

    /// Print status reports and data sent by the keyboard.
    Monitor {
        /// Stop after this many seconds.
        #[arg(long)]
        duration: Option<u64>,
    },

    /// List attached keyboards.
    ListDevices {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Invalid input detected before touching the device.
    #[error("{0}")]
    Usage(String),
    /// Operation cancelled by the user.
    #[error("{0}")]
    Cancelled(String),
}

/// Parse a hex byte with optional `0x` prefix.
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|e| format!("invalid hex byte '{s}': {e}"))
}

/// Parse a hex u16 with optional `0x` prefix.
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u16::from_str_radix(digits, 16).map_err(|e| format!("invalid hex id '{s}': {e}"))
}

/// Map an error to the process exit code.
///
/// 2 usage, 3 configuration, 4 device not reachable, 130 cancelled, 1 otherwise.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    for cause in err.chain() {
        if let Some(lib_err) = cause.downcast_ref::<shegolink::Error>() {
            return match lib_err {
                shegolink::Error::Cancelled => 130,
                shegolink::Error::Config(_) => 3,
                shegolink::Error::InvalidParam(_)
                | shegolink::Error::PayloadTooLarge { .. }
                | shegolink::Error::FrameOverflow { .. } => 2,
                e if e.is_acquisition() => 4,
                _ => 1,
            };
        }
    }
    1
}

fn install_interrupt_handler() {
    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::SeqCst)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    shegolink::set_interrupt_checker(was_interrupted);
}

/// Resolve the device to open from CLI args, config, or auto-detection.
pub(crate) fn resolve_target(cli: &Cli, config: &Config) -> Result<DeviceTarget> {
    let vid = cli.vid.or(config.device.vid);
    let pid = cli.pid.or(config.device.pid);
    let interface = cli.interface.or(config.device.interface);

    let mut target = match (vid, pid) {
        (Some(vid), Some(pid)) => DeviceTarget::new(vid, pid),
        (None, None) => auto_detect_device()?.target(),
        _ => {
            return Err(CliError::Usage(
                "--vid and --pid must be given together".to_string(),
            )
            .into());
        },
    };
    if let Some(iface) = interface {
        target = target.with_interface(iface);
    }
    Ok(target)
}

/// Open a session on the resolved device.
pub(crate) fn open_session(cli: &Cli, config: &Config) -> Result<DeviceSession> {
    let selector = TransportSelector::new(config.protocol_config())?;
    let target = resolve_target(cli, config)?;
    let session = selector.acquire(&target)?;
    if !cli.quiet {
        eprintln!(
            "{} {} via {} ({})",
            style("🔌").cyan(),
            target,
            session.kind(),
            session.describe()
        );
    }
    Ok(session)
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Send {
            file,
            dest,
            wait,
            timeout,
        } => commands::send::cmd_send(cli, &config, file, *dest, *wait, *timeout),
        Commands::Led => commands::control::cmd_led(cli, &config),
        Commands::Threshold { key, mm } => {
            commands::control::cmd_threshold(cli, &config, *key, *mm)
        },
        Commands::Raw { command, bytes } => {
            commands::control::cmd_raw(cli, &config, *command, bytes)
        },
        Commands::Monitor { duration } => commands::monitor::cmd_monitor(cli, &config, *duration),
        Commands::ListDevices { json } => commands::devices::cmd_list_devices(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "shegolink v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    install_interrupt_handler();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(exit_code_for(&err))
        },
    }
}
