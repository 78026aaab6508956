//! Inbound event monitor.
//!
//! Prints every status report and data frame the keyboard sends until Ctrl+C
//! or the optional duration elapses. Events go to stdout, status lines to
//! stderr.

use anyhow::Result;
use console::style;
use shegolink::{DeviceEvent, StatusEvent};
use std::fmt::Write as _;
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::{Cli, open_session, was_interrupted};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        let _ = write!(out, "{b:02X}");
    }
    out
}

fn format_status(status: &StatusEvent) -> String {
    let mut line = format!("status {}", status.code);
    if let Some(code) = status.raw_code {
        let _ = write!(line, " (0x{code:02X})");
    }
    if let Some(index) = status.chunk_index {
        let _ = write!(line, " chunk {index}");
    }
    line
}

/// Render one event as a single output line.
pub(crate) fn format_event(event: &DeviceEvent) -> String {
    match event {
        DeviceEvent::Status(status) => format_status(status),
        DeviceEvent::Data(bytes) => format!("data  [{}] {}", bytes.len(), hex(bytes)),
    }
}

/// Monitor command implementation.
pub(crate) fn cmd_monitor(cli: &Cli, config: &Config, duration: Option<u64>) -> Result<()> {
    let session = open_session(cli, config)?;
    let deadline = duration.map(|secs| Instant::now() + Duration::from_secs(secs));

    if !cli.quiet {
        eprintln!(
            "{} Listening on {} (Ctrl+C to stop)",
            style("👂").cyan(),
            session.describe()
        );
    }

    let mut count = 0usize;
    loop {
        if was_interrupted() || deadline.is_some_and(|d| Instant::now() >= d) {
            break;
        }
        if let Some(event) = session.recv_event(POLL_INTERVAL)? {
            count += 1;
            let line = format_event(&event);
            match &event {
                DeviceEvent::Status(status) if status.code.is_error() => {
                    println!("{}", style(line).red());
                },
                DeviceEvent::Status(_) => println!("{}", style(line).green()),
                DeviceEvent::Data(_) => println!("{line}"),
            }
        }
    }

    if !cli.quiet {
        eprintln!("{} {count} events received", style("✓").green());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shegolink::StatusCode;

    #[test]
    fn test_format_status_event() {
        let event = DeviceEvent::Status(StatusEvent {
            code: StatusCode::ChunkReceived,
            raw_code: Some(0x02),
            chunk_index: Some(7),
            raw: vec![0x13, 0x02, 0x07, 0x00],
        });
        assert_eq!(format_event(&event), "status CHUNK_RECEIVED (0x02) chunk 7");
    }

    #[test]
    fn test_format_data_event() {
        let event = DeviceEvent::Data(vec![0x07, 0xAA, 0x0B]);
        assert_eq!(format_event(&event), "data  [3] 07 AA 0B");
    }

    #[test]
    fn test_hex_empty() {
        assert_eq!(hex(&[]), "");
    }
}
