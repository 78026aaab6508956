//! Payload transfer command implementation.

use anyhow::{Context, Result};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use log::debug;
use shegolink::protocol::MAX_TRANSFER_SIZE;
use shegolink::{Destination, StatusCode, TransferOrchestrator};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::config::Config;
use crate::{Cli, CliError, DestArg, open_session, use_fancy_output};

/// Read and check the payload before any device is touched.
fn read_payload(file: &Path) -> Result<Vec<u8>> {
    let payload =
        fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    if payload.is_empty() {
        return Err(CliError::Usage(format!("{} is empty", file.display())).into());
    }
    if payload.len() > MAX_TRANSFER_SIZE {
        return Err(CliError::Usage(format!(
            "{} is {} bytes, the keyboard accepts at most {MAX_TRANSFER_SIZE}",
            file.display(),
            payload.len()
        ))
        .into());
    }
    Ok(payload)
}

/// Destination from the command line, else the config file, else the screen.
fn resolve_destination(arg: Option<DestArg>, config: &Config) -> Result<Destination> {
    if let Some(dest) = arg {
        return Ok(dest.into());
    }
    match config.transfer.destination.as_deref() {
        Some(name) => name
            .parse::<Destination>()
            .map_err(|e| shegolink::Error::Config(format!("transfer.destination: {e}")).into()),
        None => Ok(Destination::Screen),
    }
}

fn progress_bar(cli: &Cli, len: usize, dest: Destination) -> ProgressBar {
    if cli.quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.set_message(format!("{len} bytes to {dest}"));
    pb
}

/// Send command implementation.
pub(crate) fn cmd_send(
    cli: &Cli,
    config: &Config,
    file: &Path,
    dest: Option<DestArg>,
    wait: bool,
    timeout: u64,
) -> Result<()> {
    let payload = read_payload(file)?;
    let destination = resolve_destination(dest, config)?;
    let wait = wait || config.transfer.wait;
    debug!(
        "Sending {} ({} bytes) to {destination}",
        file.display(),
        payload.len()
    );

    let mut session = open_session(cli, config)?;

    let pb = progress_bar(cli, payload.len(), destination);
    let report = TransferOrchestrator::new()
        .transfer(&mut session, &payload, destination, |pct| {
            pb.set_position(u64::from(pct));
        })
        .inspect_err(|_| pb.abandon())?;
    pb.finish_with_message("sent");

    if wait {
        if !cli.quiet {
            eprintln!("{} Waiting for the keyboard to confirm...", style("⏳").cyan());
        }
        session
            .wait_for_status(StatusCode::TransferComplete, Duration::from_secs(timeout))
            .context("Keyboard did not confirm the transfer")?;
    }

    session.close()?;

    if !cli.quiet {
        eprintln!(
            "{} Sent {} bytes to {} in {} chunks ({:.2}s)",
            style("✓").green().bold(),
            report.total_bytes,
            report.destination,
            report.chunk_count,
            report.elapsed.as_secs_f64()
        );
    }
    Ok(())
}
