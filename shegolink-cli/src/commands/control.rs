//! Single-frame commands: LED, key threshold and raw frames.

use anyhow::Result;
use console::style;
use log::debug;
use shegolink::{Frame, FrameLayout, ProtocolConfig, TransferOrchestrator, threshold_from_mm};

use crate::config::Config;
use crate::{Cli, CliError, open_session};

/// Reject a frame the opened transport cannot carry.
fn check_fits(frame: &Frame, layout: FrameLayout) -> Result<()> {
    let max = layout.max_payload();
    if frame.payload().len() > max {
        return Err(CliError::Usage(format!(
            "payload of {} bytes exceeds {max} bytes on {}",
            frame.payload().len(),
            layout.kind()
        ))
        .into());
    }
    Ok(())
}

/// Open a session, send one frame and close it again.
fn send_single(
    cli: &Cli,
    config: &Config,
    build: impl FnOnce(&ProtocolConfig) -> Frame,
) -> Result<()> {
    let mut session = open_session(cli, config)?;
    let frame = build(session.config());
    check_fits(&frame, session.layout())?;
    debug!(
        "Sending command 0x{:02X} with {} payload bytes",
        frame.command(),
        frame.payload().len()
    );
    TransferOrchestrator::new().send_command(&mut session, &frame)?;
    session.close()?;
    Ok(())
}

/// LED toggle command implementation.
pub(crate) fn cmd_led(cli: &Cli, config: &Config) -> Result<()> {
    send_single(cli, config, Frame::led_toggle)?;
    if !cli.quiet {
        eprintln!("{} LED toggled", style("✓").green().bold());
    }
    Ok(())
}

/// Threshold command implementation.
pub(crate) fn cmd_threshold(cli: &Cli, config: &Config, key: u8, mm: f32) -> Result<()> {
    let value = threshold_from_mm(mm)?;
    send_single(cli, config, |protocol| Frame::set_threshold(protocol, key, value))?;
    if !cli.quiet {
        eprintln!(
            "{} Key {key} actuates at {mm:.2} mm (level {value})",
            style("✓").green().bold()
        );
    }
    Ok(())
}

/// Largest payload any transport could carry with this configuration.
///
/// Only a loose bound: the session's own layout is checked once it is open.
fn largest_payload(config: &Config) -> usize {
    let protocol = config.protocol_config();
    protocol.report_size.max(protocol.bulk_size).saturating_sub(1)
}

/// Raw command implementation.
pub(crate) fn cmd_raw(cli: &Cli, config: &Config, command: u8, bytes: &[u8]) -> Result<()> {
    let max = largest_payload(config);
    if bytes.len() > max {
        return Err(CliError::Usage(format!(
            "raw payload of {} bytes exceeds {max} bytes",
            bytes.len()
        ))
        .into());
    }
    send_single(cli, config, |_| Frame::raw(command, bytes.to_vec()))?;
    if !cli.quiet {
        eprintln!(
            "{} Sent command 0x{command:02X} ({} bytes)",
            style("✓").green().bold(),
            bytes.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_largest_payload_follows_config() {
        let mut config = Config::default();
        assert_eq!(largest_payload(&config), 63);

        config.protocol.bulk_size = Some(16);
        config.protocol.report_size = Some(32);
        assert_eq!(largest_payload(&config), 31);
    }

    #[test]
    fn test_check_fits_uses_session_layout() {
        let frame = Frame::raw(0x40, vec![0xAB; 40]);

        let err = check_fits(&frame, FrameLayout::raw_report(32)).unwrap_err();
        assert!(matches!(err.downcast_ref::<CliError>(), Some(CliError::Usage(_))));
        assert!(err.to_string().contains("raw report"));

        assert!(check_fits(&frame, FrameLayout::vendor_bulk(64)).is_ok());
        assert!(check_fits(&Frame::raw(0x40, vec![0; 31]), FrameLayout::raw_report(32)).is_ok());
    }
}
