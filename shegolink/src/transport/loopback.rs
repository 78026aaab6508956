//! In-memory transport.
//!
//! Records every written frame and delivers injected inbound frames. It can
//! mirror writes back as input the way some host HID stacks do, and can be
//! told to fail a specific write, which makes it suitable for exercising
//! sessions and transfers without hardware.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};
use crate::transport::{FrameLayout, Transport, TransportKind};

struct Shared {
    sent: Mutex<Vec<(Instant, Vec<u8>)>>,
    inbound_tx: Mutex<Sender<Vec<u8>>>,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

/// Loopback transport; see the module docs.
pub struct LoopbackTransport {
    layout: FrameLayout,
    shared: Arc<Shared>,
    inbound_rx: Mutex<Receiver<Vec<u8>>>,
    echo_writes: bool,
    fail_on_send: Option<usize>,
    sends: AtomicUsize,
    inbound: bool,
}

/// Test-side handle to a [`LoopbackTransport`] that has been moved into a
/// session.
#[derive(Clone)]
pub struct LoopbackHandle {
    shared: Arc<Shared>,
}

impl LoopbackTransport {
    /// Create a transport with the given layout and a handle to drive it.
    pub fn new(layout: FrameLayout) -> (Self, LoopbackHandle) {
        let (tx, rx) = mpsc::channel();
        let shared = Arc::new(Shared {
            sent: Mutex::new(Vec::new()),
            inbound_tx: Mutex::new(tx),
            closed: AtomicBool::new(false),
            close_calls: AtomicUsize::new(0),
        });
        let handle = LoopbackHandle {
            shared: Arc::clone(&shared),
        };
        let transport = Self {
            layout,
            shared,
            inbound_rx: Mutex::new(rx),
            echo_writes: false,
            fail_on_send: None,
            sends: AtomicUsize::new(0),
            inbound: true,
        };
        (transport, handle)
    }

    /// Mirror every write back as an inbound frame, without its report id.
    #[must_use]
    pub fn with_echo(mut self) -> Self {
        self.echo_writes = true;
        self
    }

    /// Fail the write with the given zero-based sequence number.
    #[must_use]
    pub fn fail_on_send(mut self, nth: usize) -> Self {
        self.fail_on_send = Some(nth);
        self
    }

    /// Behave like a bulk interface without an IN endpoint.
    #[must_use]
    pub fn without_inbound(mut self) -> Self {
        self.inbound = false;
        self
    }
}

impl LoopbackHandle {
    /// Queue an inbound frame.
    pub fn inject(&self, frame: &[u8]) {
        let tx = self
            .shared
            .inbound_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        // The receiver lives as long as the transport; a send error only means
        // the transport was dropped.
        let _ = tx.send(frame.to_vec());
    }

    /// Every frame written so far, as it appeared on the wire.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent_timed().into_iter().map(|(_, frame)| frame).collect()
    }

    /// Written frames with the instant each write completed.
    pub fn sent_timed(&self) -> Vec<(Instant, Vec<u8>)> {
        self.shared
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// How many times `close` was called.
    pub fn close_calls(&self) -> usize {
        self.shared.close_calls.load(Ordering::SeqCst)
    }
}

impl Transport for LoopbackTransport {
    fn kind(&self) -> TransportKind {
        self.layout.kind()
    }

    fn layout(&self) -> FrameLayout {
        self.layout
    }

    fn send(&self, wire: &[u8]) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let seq = self.sends.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_send == Some(seq) {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                format!("loopback write #{seq} failed"),
            )));
        }

        trace!("loopback TX: {:02x?}", &wire[..wire.len().min(16)]);
        self.shared
            .sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((Instant::now(), wire.to_vec()));

        if self.echo_writes {
            let tx = self
                .shared
                .inbound_tx
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let _ = tx.send(self.layout.strip_report_id(wire).to_vec());
        }
        Ok(())
    }

    fn receive(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }
        let rx = self
            .inbound_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn has_inbound(&self) -> bool {
        self.inbound
    }

    fn close(&self) -> Result<()> {
        self.shared.close_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        format!("loopback ({})", self.layout.kind())
    }
}
