//! Chunked transfer orchestration.
//!
//! A transfer is `START`, one paced `DATA` frame per chunk in index order,
//! then `END`. There is no retry: the first failure closes the session and is
//! returned naming the frame that failed. The device may be left mid-transfer
//! since the protocol has no abort frame.

use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::config::Timing;
use crate::error::{Error, Result, TransferStage};
use crate::is_interrupted_requested;
use crate::protocol::{ChunkPlan, Destination, Frame};
use crate::session::DeviceSession;
use crate::transport::TransportKind;

/// Summary of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    /// Payload length.
    pub total_bytes: usize,
    /// DATA frames sent.
    pub chunk_count: usize,
    /// Bytes per full chunk.
    pub chunk_size: usize,
    /// Where the payload went.
    pub destination: Destination,
    /// Transport used.
    pub transport: TransportKind,
    /// Wall time from START to END.
    pub elapsed: Duration,
}

/// Drives transfers and single commands over a session.
#[derive(Debug, Clone, Default)]
pub struct TransferOrchestrator {
    timing: Option<Timing>,
}

impl TransferOrchestrator {
    /// Orchestrator using each session's configured timing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override pacing for every transfer.
    #[must_use]
    pub fn with_timing(mut self, timing: Timing) -> Self {
        self.timing = Some(timing);
        self
    }

    /// Deliver `payload` to `destination`.
    ///
    /// `progress` receives whole percentages, once per change; 100 is always
    /// the last value reported. Returns once END is written without waiting
    /// for the device to confirm; use
    /// [`DeviceSession::wait_for_status`] for that.
    pub fn transfer<F>(
        &self,
        session: &mut DeviceSession,
        payload: &[u8],
        destination: Destination,
        mut progress: F,
    ) -> Result<TransferReport>
    where
        F: FnMut(u8),
    {
        if session.is_closed() {
            return Err(Error::SessionClosed);
        }
        if payload.is_empty() {
            return Err(Error::InvalidParam("payload is empty".to_string()));
        }

        let layout = session.layout();
        let plan = ChunkPlan::new(payload.len(), layout.data_chunk_size())?;
        let config = session.config().clone();
        let timing = self.timing.unwrap_or(config.timing);
        let count = plan.chunk_count();

        info!(
            "Sending {} bytes to {destination} in {count} chunks over {}",
            plan.total_bytes(),
            layout.kind()
        );
        let started = Instant::now();

        let start = Frame::start(&config, plan.total_u16(), destination);
        Self::step(session, TransferStage::Start, &start)?;
        pause(timing.start_delay);

        let mut last_percent = None;
        for (index, chunk) in plan.chunks(payload) {
            let data = Frame::data(&config, index, chunk);
            Self::step(session, TransferStage::Data(index), &data)?;
            pause(timing.packet_delay);

            let percent = percent_done(usize::from(index) + 1, count);
            if last_percent != Some(percent) {
                progress(percent);
                last_percent = Some(percent);
            }
        }

        Self::step(session, TransferStage::End, &Frame::end(&config, destination))?;

        let elapsed = started.elapsed();
        debug!("Transfer finished in {elapsed:?}");

        Ok(TransferReport {
            total_bytes: plan.total_bytes(),
            chunk_count: count,
            chunk_size: plan.chunk_size(),
            destination,
            transport: layout.kind(),
            elapsed,
        })
    }

    /// Send one standalone command frame.
    pub fn send_command(&self, session: &mut DeviceSession, frame: &Frame) -> Result<()> {
        Self::step(session, TransferStage::Command(frame.command()), frame)
    }

    fn step(session: &mut DeviceSession, stage: TransferStage, frame: &Frame) -> Result<()> {
        if is_interrupted_requested() {
            debug!("Interrupted before {stage}");
            session.release();
            return Err(Error::Cancelled);
        }
        session.send_frame(frame).map_err(|source| {
            session.release();
            Error::TransferAborted {
                stage,
                source: Box::new(source),
            }
        })
    }
}

fn pause(delay: Duration) {
    if !delay.is_zero() {
        thread::sleep(delay);
    }
}

/// `round(done / total * 100)`.
fn percent_done(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = (done * 100 + total / 2) / total;
    u8::try_from(pct.min(100)).unwrap_or(100)
}
