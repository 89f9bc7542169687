//! Whole-codeplug transfers against the simulated radio, using a small
//! memory map so every slot can be checked.

use std::time::Duration;

use dmrprog_codeplug::{Bank, Channel, MemoryMap, Power, Timeslot, Zone, ZoneLayout};
use dmrprog_engine::{
    BulkTransfer, EngineConfig, EngineError, ProtocolEngine, SimFaults, SimHandle, SimRequest,
    SimulatedRadio,
};

const TIMEOUT: Duration = Duration::from_secs(10);

fn small_map() -> MemoryMap {
    MemoryMap::new(
        vec![
            Bank::new(0x0080_0000, 0x200, 8, 1, 8),
            Bank::new(0x0084_0000, 0x100, 4, 9, 12),
        ],
        ZoneLayout {
            zone_count: 10,
            ..ZoneLayout::D878UV
        },
    )
    .expect("valid map")
}

fn setup() -> (ProtocolEngine, BulkTransfer, SimHandle) {
    let config = EngineConfig {
        read_timeout_ms: 300,
        write_ack_timeout_ms: 300,
        commit_ack_timeout_ms: 150,
        poll_slice_ms: 10,
        ..EngineConfig::default()
    };
    let engine = ProtocolEngine::start(config).unwrap();
    let handle = engine.handle();
    let radio = SimulatedRadio::new(handle.inbound_sender());
    let sim = radio.handle();
    handle.attach(radio).unwrap();
    handle.handshake().unwrap();
    handle.enter_program_mode().unwrap();
    sim.clear_requests();
    (engine, BulkTransfer::new(handle, small_map()), sim)
}

fn sample_channels() -> Vec<Channel> {
    vec![
        Channel {
            name: "Simplex".into(),
            rx_hz: 145_500_000,
            tx_hz: 145_500_000,
            power: Power::Low,
            ..Channel::default()
        },
        Channel {
            name: "DMR Rptr".into(),
            rx_hz: 438_000_000,
            tx_hz: 430_400_000,
            digital: true,
            color_code: 1,
            timeslot: Timeslot::One,
            contact_id: 91,
            power: Power::High,
            ..Channel::default()
        },
        Channel {
            name: "Local TG".into(),
            rx_hz: 439_100_000,
            tx_hz: 431_500_000,
            digital: true,
            color_code: 7,
            contact_id: 2_621_000,
            ..Channel::default()
        },
    ]
}

#[test]
fn test_channels_round_trip() {
    let (_engine, transfer, sim) = setup();
    let channels = sample_channels();
    transfer.write_all_channels(&channels).unwrap();

    // 12 records in groups of 3 (3, 3, 2 and 3, 1), 16-byte frames.
    let frames = sim
        .requests()
        .iter()
        .filter(|r| matches!(r, SimRequest::Write { .. }))
        .count();
    assert_eq!(frames, 12 * 64 / 16);
    assert_eq!(sim.requests().last(), Some(&SimRequest::End));

    sim.clear_requests();
    let codeplug = transfer.read_channels(TIMEOUT).unwrap();
    let read_sizes: Vec<usize> = sim
        .requests()
        .iter()
        .filter_map(|r| match r {
            SimRequest::Read { len, .. } => Some(*len),
            _ => None,
        })
        .collect();
    assert_eq!(read_sizes, vec![192, 192, 128, 192, 64]);

    assert_eq!(codeplug.channels.len(), 12);
    assert_eq!(&codeplug.channels[..3], &channels[..]);
    assert!(codeplug.channels[3..].iter().all(Channel::is_empty));
}

#[test]
fn test_write_channels_stops_at_missing_ack() {
    let (_engine, transfer, sim) = setup();
    let mut faults = SimFaults::default();
    faults.no_ack_at.insert(0x0084_0000);
    sim.set_faults(faults);

    assert_eq!(
        transfer.write_all_channels(&sample_channels()),
        Err(EngineError::NoAck {
            address: 0x0084_0000
        })
    );
    assert!(!sim.requests().contains(&SimRequest::End));
}

#[test]
fn test_zones_round_trip() {
    let (_engine, transfer, sim) = setup();
    let zones = vec![
        Zone::new("Repeaters", vec![2, 3]),
        // 13 is past the last channel of the map and is dropped on read.
        Zone::new("Simplex", vec![1, 13]),
    ];
    transfer.write_all_zones(&zones, None).unwrap();
    assert_eq!(sim.requests().last(), Some(&SimRequest::End));

    let codeplug = transfer.read_zones(TIMEOUT).unwrap();
    assert_eq!(codeplug.zones.len(), 10);
    assert_eq!(codeplug.zones[0], zones[0]);
    assert_eq!(codeplug.zones[1], Zone::new("Simplex", vec![1]));
    assert!(codeplug.zones[2..]
        .iter()
        .all(|z| z.name.is_empty() && z.channels.is_empty()));
}

#[test]
fn test_zone_snapshot_writes_only_changes() {
    let (_engine, transfer, sim) = setup();
    let before = vec![
        Zone::new("Repeaters", vec![2, 3]),
        Zone::new("Simplex", vec![1]),
    ];
    transfer.write_all_zones(&before, None).unwrap();
    sim.clear_requests();

    let mut after = before.clone();
    after[1].name = "Calling".into();
    transfer.write_all_zones(&after, Some(&before)).unwrap();

    let name_address = transfer.map().zone_name_address(2).unwrap();
    let written: Vec<u32> = sim
        .requests()
        .iter()
        .filter_map(|r| match r {
            SimRequest::Write { address, .. } => Some(*address),
            _ => None,
        })
        .collect();
    assert_eq!(written, vec![name_address, name_address + 16]);
    assert_eq!(sim.requests().last(), Some(&SimRequest::End));

    sim.clear_requests();
    transfer.write_all_zones(&after, Some(&after)).unwrap();
    assert!(sim.requests().is_empty());
}

#[test]
fn test_removed_zone_is_cleared() {
    let (_engine, transfer, sim) = setup();
    let before = vec![
        Zone::new("Keep", vec![1, 2]),
        Zone::new("Delete me", vec![3, 4]),
    ];
    transfer.write_all_zones(&before, None).unwrap();
    sim.clear_requests();

    let after = vec![before[0].clone()];
    transfer.write_all_zones(&after, Some(&before)).unwrap();

    let name_address = transfer.map().zone_name_address(2).unwrap();
    let members_address = transfer.map().zone_channels_address(2).unwrap();
    let written: Vec<u32> = sim
        .requests()
        .iter()
        .filter_map(|r| match r {
            SimRequest::Write { address, .. } => Some(*address),
            _ => None,
        })
        .collect();
    assert!(written.contains(&name_address));
    assert!(written.contains(&members_address));
    assert!(written
        .iter()
        .all(|&a| (name_address..name_address + 32).contains(&a)
            || (members_address..members_address + 0x200).contains(&a)));
    assert_eq!(sim.requests().last(), Some(&SimRequest::End));

    let codeplug = transfer.read_zones(TIMEOUT).unwrap();
    assert_eq!(codeplug.zones[0], before[0]);
    assert_eq!(codeplug.zones[1], Zone::default());
}

#[test]
fn test_read_failure_surfaces_through_collector() {
    let (_engine, transfer, sim) = setup();
    let mut faults = SimFaults::default();
    faults.silent_read_at.insert(0x0084_0000);
    sim.set_faults(faults);

    let result = transfer.read_channels(TIMEOUT);
    assert!(
        matches!(
            result,
            Err(EngineError::Timeout {
                operation: "read",
                ..
            })
        ),
        "unexpected {:?}",
        result
    );
    assert!(transfer.engine().first_error().is_some());
}
