//! Suppression of outbound writes reflected back as input.
//!
//! Some host HID stacks hand every report we write straight back to the
//! reader. The filter remembers a short signature of each sent frame and drops
//! an inbound frame that starts with the same bytes shortly afterwards. A
//! signature matches at most once.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Instant;

use crate::config::EchoConfig;

/// Bytes of a sent frame kept for matching.
pub const SIGNATURE_LEN: usize = 8;

/// Marker some stacks put in front of reflected reports.
const REFLECTED_MARKER: u8 = 0xFF;

#[derive(Debug, Clone)]
struct SentSignature {
    bytes: Vec<u8>,
    sent_at: Instant,
}

/// Bounded history of recently sent frame signatures.
#[derive(Debug)]
pub struct EchoFilter {
    config: EchoConfig,
    history: Mutex<VecDeque<SentSignature>>,
}

impl EchoFilter {
    /// Create an empty filter.
    pub fn new(config: EchoConfig) -> Self {
        Self {
            config,
            history: Mutex::new(VecDeque::with_capacity(config.history_size)),
        }
    }

    /// Remember a sent frame. `frame` starts at the command byte.
    pub fn record_sent(&self, frame: &[u8]) {
        self.record_sent_at(frame, Instant::now());
    }

    /// [`record_sent`](Self::record_sent) with an explicit timestamp.
    pub fn record_sent_at(&self, frame: &[u8], sent_at: Instant) {
        let bytes = frame[..frame.len().min(SIGNATURE_LEN)].to_vec();
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        while history.len() >= self.config.history_size.max(1) {
            history.pop_front();
        }
        history.push_back(SentSignature { bytes, sent_at });
    }

    /// Whether `inbound` is a reflection of a recent write.
    ///
    /// A match consumes the signature it matched.
    pub fn is_echo(&self, inbound: &[u8]) -> bool {
        self.is_echo_at(inbound, Instant::now())
    }

    /// [`is_echo`](Self::is_echo) evaluated at `now`.
    pub fn is_echo_at(&self, inbound: &[u8], now: Instant) -> bool {
        let normalized = normalize(inbound);
        if normalized.is_empty() {
            return false;
        }
        let prefix = &normalized[..normalized.len().min(SIGNATURE_LEN)];

        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        let hit = history.iter().rposition(|sig| {
            now.saturating_duration_since(sig.sent_at) < self.config.window
                && sig.bytes.starts_with(prefix)
        });
        match hit {
            Some(pos) => {
                history.remove(pos);
                true
            },
            None => false,
        }
    }

    /// Number of remembered signatures.
    pub fn len(&self) -> usize {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no signatures are remembered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Strip a leading report id, then one reflection marker.
fn normalize(inbound: &[u8]) -> &[u8] {
    let frame = inbound.strip_prefix(&[0x00]).unwrap_or(inbound);
    frame.strip_prefix(&[REFLECTED_MARKER]).unwrap_or(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn filter() -> EchoFilter {
        EchoFilter::new(EchoConfig::default())
    }

    const DATA: [u8; 12] = [0x11, 0x00, 0x00, 1, 2, 3, 4, 5, 6, 7, 8, 9];

    #[test]
    fn test_echo_matches_exactly_once() {
        let filter = filter();
        let t0 = Instant::now();
        filter.record_sent_at(&DATA, t0);

        let later = t0 + Duration::from_millis(100);
        assert!(filter.is_echo_at(&DATA, later));
        assert!(!filter.is_echo_at(&DATA, later));
        assert!(filter.is_empty());
    }

    #[test]
    fn test_expired_signature_not_suppressed() {
        let filter = filter();
        let t0 = Instant::now();
        filter.record_sent_at(&DATA, t0);
        assert!(!filter.is_echo_at(&DATA, t0 + Duration::from_millis(3000)));
        assert!(!filter.is_echo_at(&DATA, t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_report_id_and_marker_stripped() {
        let filter = filter();
        let t0 = Instant::now();
        filter.record_sent_at(&DATA, t0);

        let mut reflected = vec![0x00, 0xFF];
        reflected.extend_from_slice(&DATA);
        assert!(filter.is_echo_at(&reflected, t0));
    }

    #[test]
    fn test_short_inbound_matches_prefix() {
        let filter = filter();
        let t0 = Instant::now();
        filter.record_sent_at(&DATA, t0);
        assert!(filter.is_echo_at(&DATA[..3], t0));
    }

    #[test]
    fn test_empty_is_never_echo() {
        let filter = filter();
        let t0 = Instant::now();
        filter.record_sent_at(&[], t0);
        assert!(!filter.is_echo_at(&[], t0));
        assert!(!filter.is_echo_at(&[0x00], t0));
        assert!(!filter.is_echo_at(&[0x00, 0xFF], t0));
    }

    #[test]
    fn test_status_frame_not_mistaken() {
        let filter = filter();
        let t0 = Instant::now();
        filter.record_sent_at(&DATA, t0);
        assert!(!filter.is_echo_at(&[0x13, 0x02, 0x00, 0x00], t0));
        assert_eq!(filter.len(), 1);
    }

    #[test]
    fn test_history_bounded_fifo() {
        let filter = EchoFilter::new(EchoConfig {
            history_size: 3,
            window: Duration::from_secs(3),
        });
        let t0 = Instant::now();
        for i in 0..5u8 {
            filter.record_sent_at(&[0x11, i, 0], t0);
        }
        assert_eq!(filter.len(), 3);
        assert!(!filter.is_echo_at(&[0x11, 0, 0], t0));
        assert!(filter.is_echo_at(&[0x11, 4, 0], t0));
    }

    #[test]
    fn test_each_record_suppresses_one_copy() {
        let filter = filter();
        let t0 = Instant::now();
        filter.record_sent_at(&DATA, t0);
        filter.record_sent_at(&DATA, t0 + Duration::from_millis(5));

        let later = t0 + Duration::from_millis(50);
        assert!(filter.is_echo_at(&DATA, later));
        assert!(filter.is_echo_at(&DATA, later));
        assert!(!filter.is_echo_at(&DATA, later));
    }

    #[test]
    fn test_concurrent_record_and_scan() {
        use std::sync::Arc;
        use std::thread;

        const FRAMES: u8 = 100;
        let filter = Arc::new(EchoFilter::new(EchoConfig {
            history_size: 256,
            window: Duration::from_secs(30),
        }));

        let writer = {
            let filter = Arc::clone(&filter);
            thread::spawn(move || {
                for i in 0..FRAMES {
                    filter.record_sent(&[0x11, i, 0]);
                }
            })
        };
        let reader = {
            let filter = Arc::clone(&filter);
            thread::spawn(move || {
                let mut seen = [false; FRAMES as usize];
                let deadline = Instant::now() + Duration::from_secs(5);
                while seen.iter().any(|s| !s) && Instant::now() < deadline {
                    for i in 0..FRAMES {
                        if !seen[usize::from(i)] && filter.is_echo(&[0x11, i, 0]) {
                            seen[usize::from(i)] = true;
                        }
                    }
                }
                seen.iter().filter(|s| **s).count()
            })
        };

        writer.join().unwrap();
        assert_eq!(reader.join().unwrap(), usize::from(FRAMES));
        assert!(filter.is_empty());
    }
}
