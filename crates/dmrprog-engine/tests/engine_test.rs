//! Engine behaviour against the simulated radio.

use std::thread;
use std::time::{Duration, Instant};

use dmrprog_engine::{
    CommitMode, DecodedRecord, EngineConfig, EngineError, EngineEvent, EngineHandle, EngineState,
    ProtocolEngine, RecordKind, Request, SimFaults, SimHandle, SimRequest, SimulatedRadio,
    StateError,
};
use dmrprog_protocol::ProtocolError;

const BASE: u32 = 0x0080_0000;

fn fast_config() -> EngineConfig {
    EngineConfig {
        handshake_timeout_ms: 300,
        program_mode_timeout_ms: 300,
        read_timeout_ms: 300,
        write_ack_timeout_ms: 300,
        erase_ack_timeout_ms: 300,
        commit_ack_timeout_ms: 150,
        poll_slice_ms: 10,
        ..EngineConfig::default()
    }
}

fn start(config: EngineConfig) -> (ProtocolEngine, EngineHandle, SimHandle) {
    let engine = ProtocolEngine::start(config).expect("engine starts");
    let handle = engine.handle();
    let radio = SimulatedRadio::new(handle.inbound_sender());
    let sim = radio.handle();
    handle.attach(radio).expect("attach");
    (engine, handle, sim)
}

fn writes(sim: &SimHandle) -> Vec<(u32, usize)> {
    sim.requests()
        .into_iter()
        .filter_map(|r| match r {
            SimRequest::Write { address, data } => Some((address, data.len())),
            _ => None,
        })
        .collect()
}

fn reads(sim: &SimHandle) -> Vec<(u32, usize)> {
    sim.requests()
        .into_iter()
        .filter_map(|r| match r {
            SimRequest::Read { address, len } => Some((address, len)),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Session
// ============================================================================

#[test]
fn test_handshake_and_program_mode_events() {
    let (_engine, handle, sim) = start(fast_config());
    let events = handle.subscribe();

    handle.handshake().unwrap();
    handle.enter_program_mode().unwrap();

    assert_eq!(
        events.recv_timeout(Duration::from_secs(1)).unwrap(),
        EngineEvent::Handshake {
            ok: true,
            message: "radio identified".into()
        }
    );
    match events.recv_timeout(Duration::from_secs(1)).unwrap() {
        EngineEvent::ProgramMode { ok, .. } => assert!(ok),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(sim.requests(), vec![SimRequest::Handshake, SimRequest::Program]);
    assert_eq!(sim.reopen_count(), 1);
}

#[test]
fn test_wrong_banner_fails_handshake() {
    let (_engine, handle, sim) = start(fast_config());
    let events = handle.subscribe();
    let mut banner = dmrprog_protocol::D878UV_BANNER.to_vec();
    banner[2] = b'9';
    sim.set_faults(SimFaults {
        banner: Some(banner.clone()),
        ..SimFaults::default()
    });

    assert_eq!(
        handle.handshake(),
        Err(EngineError::Protocol(ProtocolError::HandshakeFailed(banner)))
    );
    match events.recv_timeout(Duration::from_secs(1)).unwrap() {
        EngineEvent::Handshake { ok, .. } => assert!(!ok),
        other => panic!("unexpected event {:?}", other),
    }
    // Retry is allowed.
    assert!(handle.first_error().is_none());
}

#[test]
fn test_silent_program_mode_times_out() {
    let (_engine, handle, sim) = start(fast_config());
    sim.set_faults(SimFaults {
        silent_program: true,
        ..SimFaults::default()
    });
    assert!(matches!(
        handle.enter_program_mode(),
        Err(EngineError::Timeout {
            operation: "program mode",
            expected: 3,
            received: 0
        })
    ));
    assert!(handle.first_error().is_none());
    assert!(handle.wait_idle(Duration::from_secs(1)));
    assert_eq!(handle.state(), EngineState::Idle);
}

#[test]
fn test_no_transport_before_attach() {
    let engine = ProtocolEngine::start(fast_config()).unwrap();
    let handle = engine.handle();
    assert_eq!(
        handle.write_frame(BASE, &[1]),
        Err(StateError::NoTransport.into())
    );

    let radio = SimulatedRadio::new(handle.inbound_sender());
    let sim = radio.handle();
    handle.attach(radio).unwrap();
    assert_eq!(handle.write_frame(BASE, &[1]), Ok(true));
    assert_eq!(writes(&sim), vec![(BASE, 1)]);
}

// ============================================================================
// Memory operations
// ============================================================================

#[test]
fn test_write_bulk_splits_into_small_frames() {
    let (_engine, handle, sim) = start(fast_config());
    let data: Vec<u8> = (0..40).collect();
    handle.write_bulk(BASE, &data).unwrap();

    assert_eq!(
        writes(&sim),
        vec![(BASE, 16), (BASE + 16, 16), (BASE + 32, 8)]
    );
    assert_eq!(sim.peek(BASE, 40), data);
    assert_eq!(handle.write_bulk(BASE, &[]), Err(EngineError::EmptyInput));
}

#[test]
fn test_read_decode_groups_records() {
    let (_engine, handle, sim) = start(fast_config());
    let events = handle.subscribe();

    let count = handle
        .read_decode_bulk(BASE, 9, 64, RecordKind::Channel { first: 1 })
        .unwrap();
    assert_eq!(count, 9);
    assert_eq!(
        reads(&sim),
        vec![(BASE, 192), (BASE + 192, 192), (BASE + 384, 192)]
    );

    let progress: Vec<(u16, usize)> = events
        .try_iter()
        .filter_map(|e| match e {
            EngineEvent::Decoded {
                record: DecodedRecord::Channel { number, .. },
                so_far,
                expected,
            } => {
                assert_eq!(expected, 9);
                Some((number, so_far))
            }
            _ => None,
        })
        .collect();
    assert_eq!(progress, (1..=9).map(|n| (n as u16, n)).collect::<Vec<_>>());
}

#[test]
fn test_large_records_read_in_frame_sized_pieces() {
    let (_engine, handle, sim) = start(fast_config());
    handle
        .read_decode_bulk(
            0x0100_0000,
            1,
            512,
            RecordKind::ZoneChannels {
                first: 1,
                valid_channels: 4000,
            },
        )
        .unwrap();
    assert_eq!(
        reads(&sim),
        vec![(0x0100_0000, 255), (0x0100_00FF, 255), (0x0100_01FE, 2)]
    );
}

#[test]
fn test_strict_checksum() {
    let (_engine, handle, sim) = start(fast_config());
    sim.load(BASE, &[1, 2, 3, 4]);
    let mut faults = SimFaults::default();
    faults.bad_checksum_at.insert(BASE);
    sim.set_faults(faults.clone());
    assert!(matches!(
        handle.read_memory(BASE, 4),
        Err(EngineError::Protocol(ProtocolError::ChecksumMismatch { .. }))
    ));

    let lenient = EngineConfig {
        strict_checksum: false,
        ..fast_config()
    };
    let (_engine, handle, sim) = start(lenient);
    sim.load(BASE, &[1, 2, 3, 4]);
    sim.set_faults(faults);
    assert_eq!(handle.read_memory(BASE, 4), Ok(vec![1, 2, 3, 4]));
}

#[test]
fn test_erase_block() {
    let (_engine, handle, sim) = start(fast_config());
    sim.load(BASE, &[0u8; 64]);
    assert_eq!(handle.erase_block(BASE), Ok(true));
    assert_eq!(sim.peek(BASE, 64), vec![0xFF; 64]);
    assert!(sim
        .requests()
        .contains(&SimRequest::Erase { address: BASE, len: 64 }));
}

// ============================================================================
// Ordering and failure
// ============================================================================

#[test]
fn test_concurrent_submissions_run_in_id_order() {
    let (_engine, handle, sim) = start(fast_config());

    let workers: Vec<_> = (0..4u32)
        .map(|t| {
            let handle = handle.clone();
            thread::spawn(move || {
                (0..10u32)
                    .map(|i| {
                        let address = BASE + t * 0x1000 + i * 0x10;
                        let ticket = handle
                            .submit(Request::ReadMemory { address, len: 4 })
                            .unwrap();
                        (ticket.id(), address, ticket)
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut submitted = Vec::new();
    for worker in workers {
        for (id, address, ticket) in worker.join().unwrap() {
            ticket.wait().unwrap();
            submitted.push((id, address));
        }
    }
    submitted.sort();
    let expected: Vec<u32> = submitted.iter().map(|(_, a)| *a).collect();
    let executed: Vec<u32> = reads(&sim).into_iter().map(|(a, _)| a).collect();
    assert_eq!(executed, expected);
}

#[test]
fn test_first_failure_aborts_queue() {
    let (_engine, handle, sim) = start(fast_config());
    let events = handle.subscribe();
    let mut faults = SimFaults::default();
    faults.no_ack_at.insert(BASE + 16);
    sim.set_faults(faults);

    handle
        .submit_detached(Request::WriteBulk {
            base: BASE,
            data: vec![0x55; 48],
        })
        .unwrap();
    let queued: Vec<_> = (0..3)
        .map(|i| handle.submit(Request::ReadMemory {
            address: BASE + i * 64,
            len: 8,
        }))
        .collect();

    for result in queued {
        let outcome = result.and_then(|ticket| ticket.wait());
        assert!(
            matches!(outcome, Err(EngineError::PriorFailure(_))),
            "unexpected {:?}",
            outcome
        );
    }
    assert_eq!(
        handle.first_error(),
        Some(EngineError::NoAck { address: BASE + 16 })
    );

    let end = events
        .iter()
        .find(|e| matches!(e, EngineEvent::EndOfStream { .. }))
        .unwrap();
    assert_eq!(
        end,
        EngineEvent::EndOfStream {
            error: Some(EngineError::NoAck { address: BASE + 16 })
        }
    );
    // The frame after the unacknowledged one was never sent.
    assert_eq!(writes(&sim), vec![(BASE, 16), (BASE + 16, 16)]);
    assert!(reads(&sim).is_empty());

    handle.shutdown();
    assert_eq!(handle.state(), EngineState::Terminated);
    assert_eq!(handle.outstanding(), 0);
}

#[test]
fn test_finish_commits_pending_writes() {
    let (engine, handle, sim) = start(fast_config());
    handle
        .submit_detached(Request::WriteFrame {
            address: BASE,
            data: vec![1, 2, 3],
        })
        .unwrap();
    engine.finish(Duration::from_secs(2)).unwrap();

    assert_eq!(sim.requests().last(), Some(&SimRequest::End));
    assert_eq!(handle.state(), EngineState::Terminated);
    assert!(handle.handshake().is_err());
}

#[test]
fn test_finish_without_writes_sends_nothing() {
    let (engine, _handle, sim) = start(fast_config());
    engine.finish(Duration::from_secs(2)).unwrap();
    assert!(sim.requests().is_empty());
}

#[test]
fn test_finish_reports_first_error() {
    let (engine, handle, sim) = start(fast_config());
    sim.set_faults(SimFaults {
        no_commit_ack: true,
        ..SimFaults::default()
    });
    handle.write_frame(BASE, &[9]).unwrap();
    assert_eq!(
        engine.finish(Duration::from_secs(2)),
        Err(EngineError::CommitNotAcknowledged)
    );
}

#[test]
fn test_finish_drain_timeout() {
    let config = EngineConfig {
        read_timeout_ms: 5_000,
        ..fast_config()
    };
    let (engine, handle, sim) = start(config);
    let mut faults = SimFaults::default();
    faults.silent_read_at.insert(BASE);
    sim.set_faults(faults);

    let _ticket = handle
        .submit(Request::ReadMemory { address: BASE, len: 4 })
        .unwrap();
    let started = Instant::now();
    assert!(matches!(
        engine.finish(Duration::from_millis(50)),
        Err(EngineError::Timeout {
            operation: "drain",
            ..
        })
    ));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(handle.state(), EngineState::Terminated);
}

#[test]
fn test_cancel_interrupts_blocking_read() {
    let config = EngineConfig {
        read_timeout_ms: 5_000,
        ..fast_config()
    };
    let (_engine, handle, sim) = start(config);
    let mut faults = SimFaults::default();
    faults.silent_read_at.insert(BASE);
    sim.set_faults(faults);

    let ticket = handle
        .submit(Request::ReadMemory { address: BASE, len: 4 })
        .unwrap();
    let canceller = handle.clone();
    thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        canceller.cancel();
    });

    let started = Instant::now();
    assert_eq!(ticket.wait(), Err(EngineError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(handle.handshake().is_err());
}

#[test]
fn test_keepalive_commit_reports_missing_ack() {
    let (_engine, handle, sim) = start(fast_config());
    sim.set_faults(SimFaults {
        no_commit_ack: true,
        ..SimFaults::default()
    });
    assert_eq!(handle.commit(CommitMode::KeepAlive), Ok(false));
    assert!(handle.first_error().is_none());
}
