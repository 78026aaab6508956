//! Open device session.
//!
//! A [`DeviceSession`] owns one open [`Transport`] together with the echo
//! history of everything sent through it. When the transport has an inbound
//! channel a reader thread polls it, drops echoes, decodes the
//! rest and forwards [`DeviceEvent`]s over a channel.
//!
//! The transport is released on [`DeviceSession::close`], after any send
//! failure, and on drop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::protocol::{
    DeviceEvent, EchoFilter, Frame, StatusCode, StatusDecoder, StatusEvent,
};
use crate::transport::{FrameLayout, Transport, TransportKind};

static OPEN_DEVICES: OnceLock<Mutex<HashSet<(u16, u16)>>> = OnceLock::new();

/// Process-wide claim on a (vid, pid) pair, released on drop.
#[derive(Debug)]
pub(crate) struct SessionLease {
    key: (u16, u16),
}

impl SessionLease {
    pub(crate) fn acquire(vid: u16, pid: u16) -> Result<Self> {
        let mut open = OPEN_DEVICES
            .get_or_init(Mutex::default)
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !open.insert((vid, pid)) {
            return Err(Error::DeviceBusy { vid, pid });
        }
        Ok(Self { key: (vid, pid) })
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        if let Some(open) = OPEN_DEVICES.get() {
            open.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.key);
        }
    }
}

/// One open transport and its inbound event stream.
pub struct DeviceSession {
    transport: Arc<dyn Transport>,
    config: ProtocolConfig,
    layout: FrameLayout,
    echo: Arc<EchoFilter>,
    events: Receiver<DeviceEvent>,
    // Held when there is no reader so `recv_event` times out instead of
    // reporting a disconnect.
    idle_tx: Option<Sender<DeviceEvent>>,
    running: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    lease: Option<SessionLease>,
    closed: bool,
}

impl DeviceSession {
    /// Wrap an already open transport without registering it process-wide.
    ///
    /// Sessions obtained through [`TransportSelector`](crate::TransportSelector)
    /// are additionally guarded against a second session on the same device.
    pub fn with_transport<T>(transport: T, config: ProtocolConfig) -> Result<Self>
    where
        T: Transport + 'static,
    {
        config.validate()?;
        Self::start(Arc::new(transport), config, None)
    }

    pub(crate) fn start(
        transport: Arc<dyn Transport>,
        config: ProtocolConfig,
        lease: Option<SessionLease>,
    ) -> Result<Self> {
        let layout = transport.layout();
        let echo = Arc::new(EchoFilter::new(config.echo));
        let running = Arc::new(AtomicBool::new(true));
        let (tx, events) = mpsc::channel();

        let (reader, idle_tx) = if transport.has_inbound() {
            let reader = Reader {
                transport: Arc::clone(&transport),
                echo: Arc::clone(&echo),
                decoder: StatusDecoder::new(config.status),
                running: Arc::clone(&running),
                poll: config.timing.poll_interval,
                tx,
            };
            let handle = thread::Builder::new()
                .name("shegolink-reader".to_string())
                .spawn(move || reader.run())?;
            (Some(handle), None)
        } else {
            debug!("{} has no inbound channel", transport.describe());
            (None, Some(tx))
        };

        info!("Session open on {} ({})", transport.describe(), layout.kind());

        Ok(Self {
            transport,
            config,
            layout,
            echo,
            events,
            idle_tx,
            running,
            reader,
            lease,
            closed: false,
        })
    }

    /// Active transport kind.
    pub fn kind(&self) -> TransportKind {
        self.layout.kind()
    }

    /// Wire geometry of the active transport.
    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    /// Configuration the session was opened with.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Where the transport is attached.
    pub fn describe(&self) -> String {
        self.transport.describe()
    }

    /// Whether the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Encode and write one frame.
    ///
    /// A transport failure closes the session before the error is returned.
    pub fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let wire = frame.encode(&self.layout)?;

        // Recorded before the write so a fast reflection is still matched.
        self.echo.record_sent(self.layout.strip_report_id(&wire));

        trace!(
            "TX command 0x{:02X} ({} payload bytes)",
            frame.command(),
            frame.payload().len()
        );
        if let Err(e) = self.transport.send(&wire) {
            warn!("Write to {} failed: {e}", self.transport.describe());
            self.release();
            return Err(e);
        }
        Ok(())
    }

    /// Wait up to `timeout` for the next inbound event.
    pub fn recv_event(&self, timeout: Duration) -> Result<Option<DeviceEvent>> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            // The reader exited after a transport failure.
            Err(RecvTimeoutError::Disconnected) => Err(Error::SessionClosed),
        }
    }

    /// Drain events until a status with `code` arrives.
    ///
    /// An `ERROR_INVALID` status ends the wait with [`Error::DeviceRejected`]
    /// unless that is the code being waited for.
    pub fn wait_for_status(&self, code: StatusCode, timeout: Duration) -> Result<StatusEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout(format!("no {code} status within {timeout:?}")));
            }
            match self.recv_event(remaining)? {
                Some(DeviceEvent::Status(status)) if status.code == code => return Ok(status),
                Some(DeviceEvent::Status(status)) if status.code.is_error() => {
                    return Err(Error::DeviceRejected {
                        code: status.raw_code.unwrap_or_default(),
                    });
                },
                Some(other) => trace!("Skipping {other:?} while waiting for {code}"),
                None => {},
            }
        }
    }

    /// Stop the reader and release the transport. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.running.store(false, Ordering::SeqCst);

        let result = self.transport.close();
        if let Some(reader) = self.reader.take() {
            if reader.join().is_err() {
                warn!("Reader thread panicked");
            }
        }
        self.idle_tx = None;
        self.lease = None;
        debug!("Session on {} closed", self.transport.describe());
        result
    }

    /// Close and log instead of returning the error.
    pub(crate) fn release(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error releasing {}: {e}", self.transport.describe());
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.release();
    }
}

struct Reader {
    transport: Arc<dyn Transport>,
    echo: Arc<EchoFilter>,
    decoder: StatusDecoder,
    running: Arc<AtomicBool>,
    poll: Duration,
    tx: Sender<DeviceEvent>,
}

impl Reader {
    fn run(self) {
        while self.running.load(Ordering::SeqCst) {
            let frame = match self.transport.receive(self.poll) {
                Ok(Some(frame)) => frame,
                Ok(None) => continue,
                Err(e) => {
                    if self.running.load(Ordering::SeqCst) {
                        warn!("Reader on {} stopped: {e}", self.transport.describe());
                    }
                    break;
                },
            };

            if self.echo.is_echo(&frame) {
                trace!("Suppressed echo {:02x?}", &frame[..frame.len().min(8)]);
                continue;
            }

            let event = self.decoder.decode(&frame);
            trace!("RX {event:?}");
            if self.tx.send(event).is_err() {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Destination;
    use crate::transport::loopback::LoopbackTransport;

    fn session(transport: LoopbackTransport) -> DeviceSession {
        let config = ProtocolConfig {
            timing: crate::config::Timing::unpaced(),
            ..ProtocolConfig::default()
        };
        DeviceSession::with_transport(transport, config).unwrap()
    }

    #[test]
    fn test_echoes_are_not_surfaced() {
        let (transport, handle) = LoopbackTransport::new(FrameLayout::raw_report(32));
        let mut session = session(transport.with_echo());

        session
            .send_frame(&Frame::start(session.config(), 10, Destination::Screen))
            .unwrap();
        handle.inject(&[0x13, 0x03]);

        let event = session.recv_event(Duration::from_secs(1)).unwrap();
        assert_eq!(
            event.and_then(|e| e.as_status().map(|s| s.code)),
            Some(StatusCode::TransferStarted)
        );
        assert_eq!(session.recv_event(Duration::from_millis(50)).unwrap(), None);
    }

    #[test]
    fn test_unsent_frames_surface_as_data() {
        let (transport, handle) = LoopbackTransport::new(FrameLayout::vendor_bulk(64));
        let session = session(transport);

        handle.inject(&[0xFF, 0x00, 0x00, 0x00]);
        handle.inject(&[0x42, 0x01]);
        assert_eq!(
            session.recv_event(Duration::from_secs(1)).unwrap(),
            Some(DeviceEvent::Data(vec![0xFF, 0x00, 0x00, 0x00]))
        );
        assert_eq!(
            session.recv_event(Duration::from_secs(1)).unwrap(),
            Some(DeviceEvent::Data(vec![0x42, 0x01]))
        );
    }

    #[test]
    fn test_send_failure_closes_session() {
        let (transport, handle) = LoopbackTransport::new(FrameLayout::vendor_bulk(64));
        let mut session = session(transport.fail_on_send(0));

        let result = session.send_frame(&Frame::led_toggle(session.config()));
        assert!(result.is_err());
        assert!(session.is_closed());
        assert!(handle.is_closed());
        assert!(matches!(
            session.send_frame(&Frame::led_toggle(session.config())),
            Err(Error::SessionClosed)
        ));
    }

    #[test]
    fn test_close_is_idempotent() {
        let (transport, handle) = LoopbackTransport::new(FrameLayout::vendor_bulk(64));
        let mut session = session(transport);
        session.close().unwrap();
        session.close().unwrap();
        drop(session);
        assert_eq!(handle.close_calls(), 1);
    }

    #[test]
    fn test_wait_for_status() {
        let (transport, handle) = LoopbackTransport::new(FrameLayout::vendor_bulk(64));
        let session = session(transport);

        handle.inject(&[0x13, 0x02, 0x00, 0x00]);
        handle.inject(&[0x13, 0x04]);
        let status = session
            .wait_for_status(StatusCode::TransferComplete, Duration::from_secs(1))
            .unwrap();
        assert_eq!(status.raw_code, Some(0x04));

        handle.inject(&[0x13, 0x05]);
        assert!(matches!(
            session.wait_for_status(StatusCode::TransferComplete, Duration::from_secs(1)),
            Err(Error::DeviceRejected { code: 0x05 })
        ));
        assert!(matches!(
            session.wait_for_status(StatusCode::Ok, Duration::from_millis(30)),
            Err(Error::Timeout(_))
        ));
    }

    #[test]
    fn test_no_inbound_times_out() {
        let (transport, _handle) = LoopbackTransport::new(FrameLayout::vendor_bulk(64));
        let session = session(transport.without_inbound());
        assert_eq!(session.recv_event(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_lease_is_exclusive() {
        let lease = SessionLease::acquire(0x1234, 0xFFF0).unwrap();
        assert!(matches!(
            SessionLease::acquire(0x1234, 0xFFF0),
            Err(Error::DeviceBusy { .. })
        ));
        drop(lease);
        assert!(SessionLease::acquire(0x1234, 0xFFF0).is_ok());
    }
}
