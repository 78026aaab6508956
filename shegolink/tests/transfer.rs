//! End-to-end transfer tests over the in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use shegolink::{
    Destination, DeviceEvent, DeviceSession, DeviceTarget, Error, Frame, FrameLayout,
    LoopbackHandle, LoopbackTransport, ProtocolConfig, StatusCode, Timing, TransferOrchestrator,
    TransferStage, TransportKind, TransportSelector, threshold_from_mm,
};

fn config() -> ProtocolConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    ProtocolConfig {
        timing: Timing::unpaced(),
        ..ProtocolConfig::default()
    }
}

fn raw_session() -> (DeviceSession, LoopbackHandle) {
    let (transport, handle) = LoopbackTransport::new(FrameLayout::raw_report(32));
    (
        DeviceSession::with_transport(transport, config()).unwrap(),
        handle,
    )
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

#[test]
fn raw_report_transfer_frames() {
    let (mut session, handle) = raw_session();
    let mut progress = Vec::new();

    let report = TransferOrchestrator::new()
        .transfer(&mut session, &payload(100), Destination::SdCard, |pct| {
            progress.push(pct);
        })
        .unwrap();

    assert_eq!(report.chunk_count, 4);
    assert_eq!(report.chunk_size, 29);
    assert_eq!(report.transport, TransportKind::RawReport);
    assert_eq!(progress, vec![25, 50, 75, 100]);

    let sent = handle.sent();
    assert_eq!(sent.len(), 6);
    assert!(sent.iter().all(|frame| frame.len() == 33));

    assert_eq!(&sent[0][..5], &[0x00, 0x10, 0x64, 0x00, 0x02]);
    for (i, frame) in sent[1..5].iter().enumerate() {
        assert_eq!(&frame[..4], &[0x00, 0x11, i as u8, 0x00]);
    }
    assert_eq!(&sent[4][4..17], &payload(100)[87..]);
    assert!(sent[4][17..].iter().all(|&b| b == 0));
    assert_eq!(&sent[5][..3], &[0x00, 0x12, 0x02]);

    let data: Vec<u8> = sent[1..5]
        .iter()
        .enumerate()
        .flat_map(|(i, frame)| {
            let len = if i == 3 { 13 } else { 29 };
            frame[4..4 + len].to_vec()
        })
        .collect();
    assert_eq!(data, payload(100));
}

#[test]
fn transfer_is_paced() {
    let timing = Timing {
        start_delay: Duration::from_millis(40),
        packet_delay: Duration::from_millis(10),
        ..Timing::unpaced()
    };
    let (transport, handle) = LoopbackTransport::new(FrameLayout::raw_report(32));
    let mut session = DeviceSession::with_transport(
        transport,
        ProtocolConfig {
            timing,
            ..config()
        },
    )
    .unwrap();

    TransferOrchestrator::new()
        .transfer(&mut session, &payload(100), Destination::Screen, |_| {})
        .unwrap();

    let sent = handle.sent_timed();
    assert_eq!(sent.len(), 6);

    let commands: Vec<u8> = sent.iter().map(|(_, frame)| frame[1]).collect();
    assert_eq!(commands, vec![0x10, 0x11, 0x11, 0x11, 0x11, 0x12]);
    for (i, (_, frame)) in sent[1..5].iter().enumerate() {
        assert_eq!(frame[2], i as u8);
    }

    let gaps: Vec<Duration> = sent.windows(2).map(|w| w[1].0 - w[0].0).collect();
    assert!(gaps[0] >= Duration::from_millis(40), "START gap {:?}", gaps[0]);
    for gap in &gaps[1..] {
        assert!(*gap >= Duration::from_millis(10), "DATA gap {gap:?}");
    }
}

#[test]
fn vendor_bulk_transfer_uses_full_frames() {
    let (transport, handle) = LoopbackTransport::new(FrameLayout::vendor_bulk(64));
    let mut session = DeviceSession::with_transport(transport, config()).unwrap();

    let report = TransferOrchestrator::new()
        .transfer(&mut session, &payload(200), Destination::Screen, |_| {})
        .unwrap();
    assert_eq!(report.chunk_size, 61);
    assert_eq!(report.chunk_count, 4);

    let sent = handle.sent();
    assert!(sent.iter().all(|frame| frame.len() == 64));
    assert_eq!(&sent[0][..4], &[0x10, 200, 0x00, 0x01]);
    assert_eq!(&sent[1][..3], &[0x11, 0x00, 0x00]);
    assert_eq!(&sent.last().unwrap()[..2], &[0x12, 0x01]);
}

#[test]
fn echoes_suppressed_during_transfer() {
    let (transport, handle) = LoopbackTransport::new(FrameLayout::raw_report(32));
    let mut session = DeviceSession::with_transport(transport.with_echo(), config()).unwrap();

    TransferOrchestrator::new()
        .transfer(&mut session, &payload(60), Destination::Screen, |_| {})
        .unwrap();
    handle.inject(&[0x13, 0x04]);

    let status = session
        .wait_for_status(StatusCode::TransferComplete, Duration::from_secs(2))
        .unwrap();
    assert_eq!(status.code, StatusCode::TransferComplete);

    // Every reflected write was consumed by the filter, none surfaced as data.
    assert_eq!(session.recv_event(Duration::from_millis(50)).unwrap(), None);
}

#[test]
fn device_data_is_forwarded() {
    let (session, handle) = raw_session();
    handle.inject(&[0x07, 0xAA, 0xBB]);
    assert_eq!(
        session.recv_event(Duration::from_secs(1)).unwrap(),
        Some(DeviceEvent::Data(vec![0x07, 0xAA, 0xBB]))
    );
}

#[test]
fn failure_mid_transfer_releases_session() {
    let selector = TransportSelector::new(config()).unwrap();
    let target = DeviceTarget::new(0x7E57, 0x0001);
    let handle_slot = Arc::new(Mutex::new(None));

    let slot = Arc::clone(&handle_slot);
    let mut session = selector
        .acquire_with(
            &target,
            move |_, c| {
                let (transport, handle) = LoopbackTransport::new(FrameLayout::vendor_bulk(c.bulk_size));
                *slot.lock().unwrap() = Some(handle);
                Ok(transport.fail_on_send(2))
            },
            |_, _| Err(Error::Hid("unused".into())),
        )
        .unwrap();

    let err = TransferOrchestrator::new()
        .transfer(&mut session, &payload(300), Destination::SdCard, |_| {})
        .unwrap_err();
    match err {
        Error::TransferAborted { stage, .. } => assert_eq!(stage, TransferStage::Data(1)),
        other => panic!("unexpected error: {other}"),
    }

    let handle = handle_slot.lock().unwrap().take().unwrap();
    assert!(session.is_closed());
    assert!(handle.is_closed());
    assert_eq!(handle.sent().len(), 2);

    // The device is free for a new session while the old value still exists.
    let again = selector.acquire_with(
        &target,
        |_, c| Ok(LoopbackTransport::new(FrameLayout::vendor_bulk(c.bulk_size)).0),
        |_, _| Err(Error::Hid("unused".into())),
    );
    assert!(again.is_ok());
}

#[test]
fn falls_back_to_raw_report() {
    let selector = TransportSelector::new(config()).unwrap();
    let target = DeviceTarget::new(0x7E57, 0x0002);

    let session = selector
        .acquire_with(
            &target,
            |_, _| -> shegolink::Result<LoopbackTransport> {
                Err(Error::Usb("claim of interface 1 failed: Busy".into()))
            },
            |_, c| Ok(LoopbackTransport::new(FrameLayout::raw_report(c.report_size)).0),
        )
        .unwrap();
    assert_eq!(session.kind(), TransportKind::RawReport);
    assert_eq!(session.layout().data_chunk_size(), 29);
}

#[test]
fn both_transports_failing_lists_reasons() {
    let selector = TransportSelector::new(config()).unwrap();
    let target = DeviceTarget::new(0x7E57, 0x0003);

    let err = selector
        .acquire_with(
            &target,
            |_, _| -> shegolink::Result<LoopbackTransport> {
                Err(Error::Usb("no vendor-class interface".into()))
            },
            |_, _| Err(Error::Hid("no report path".into())),
        )
        .err()
        .unwrap();

    match &err {
        Error::NoTransport { attempts } => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0].kind, TransportKind::VendorBulk);
            assert!(attempts[0].reason.contains("no vendor-class interface"));
            assert_eq!(attempts[1].kind, TransportKind::RawReport);
            assert!(attempts[1].reason.contains("no report path"));
        },
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.is_acquisition());

    // A failed acquisition does not keep the device reserved.
    assert!(
        selector
            .acquire_with(
                &target,
                |_, c| Ok(LoopbackTransport::new(FrameLayout::vendor_bulk(c.bulk_size)).0),
                |_, _| Err(Error::Hid("unused".into())),
            )
            .is_ok()
    );
}

#[test]
fn empty_payload_rejected_without_sending() {
    let (mut session, handle) = raw_session();
    let err = TransferOrchestrator::new()
        .transfer(&mut session, &[], Destination::Screen, |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::InvalidParam(_)));
    assert!(handle.sent().is_empty());
    assert!(!session.is_closed());
}

#[test]
fn oversized_payload_rejected_without_sending() {
    let (mut session, handle) = raw_session();
    let err = TransferOrchestrator::new()
        .transfer(&mut session, &payload(70_000), Destination::Screen, |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::PayloadTooLarge { .. }));
    assert!(handle.sent().is_empty());
}

#[test]
fn single_commands() {
    let (mut session, handle) = raw_session();
    let orchestrator = TransferOrchestrator::new();
    let config = session.config().clone();

    orchestrator
        .send_command(&mut session, &Frame::led_toggle(&config))
        .unwrap();
    let value = threshold_from_mm(2.0).unwrap();
    orchestrator
        .send_command(&mut session, &Frame::set_threshold(&config, 12, value))
        .unwrap();

    let sent = handle.sent();
    assert_eq!(&sent[0][..3], &[0x00, 0x30, 0x00]);
    assert_eq!(&sent[1][..4], &[0x00, 0x31, 12, 128]);
}

#[test]
fn closed_session_refuses_transfers() {
    let (mut session, handle) = raw_session();
    session.close().unwrap();
    let err = TransferOrchestrator::new()
        .transfer(&mut session, &payload(10), Destination::Screen, |_| {})
        .unwrap_err();
    assert!(matches!(err, Error::SessionClosed));
    assert!(handle.sent().is_empty());
}
