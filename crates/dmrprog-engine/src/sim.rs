//! In-memory radio.
//!
//! [`SimulatedRadio`] answers the programming protocol from a sparse flash
//! image: unwritten bytes read as `0xFF`. It records every request it parses
//! and can be told to misbehave, which is what the engine tests drive.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dmrprog_protocol::*;
use parking_lot::Mutex;
use tracing::trace;

use crate::error::TransportError;
use crate::transport::SerialTransport;

/// Reply to `PROGRAM`.
pub const PROGRAM_MODE_REPLY: &[u8; 3] = b"QX\x06";

/// A request as parsed by the simulated radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimRequest {
    Handshake,
    Program,
    End,
    Read { address: u32, len: usize },
    Write { address: u32, data: Vec<u8> },
    Erase { address: u32, len: u8 },
}

/// Ways to make the simulated radio misbehave.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Answer the handshake with this instead of the D878UV banner.
    pub banner: Option<Vec<u8>>,
    /// Ignore the handshake request.
    pub silent_handshake: bool,
    /// Ignore `PROGRAM`.
    pub silent_program: bool,
    /// Do not ACK `END`.
    pub no_commit_ack: bool,
    /// Do not ACK writes whose frame starts at one of these addresses.
    pub no_ack_at: HashSet<u32>,
    /// Corrupt the checksum of reads at one of these addresses.
    pub bad_checksum_at: HashSet<u32>,
    /// Ignore reads at one of these addresses.
    pub silent_read_at: HashSet<u32>,
}

#[derive(Debug, Default)]
struct SimState {
    memory: HashMap<u32, u8>,
    pending: Vec<u8>,
    requests: Vec<SimRequest>,
    faults: SimFaults,
    reopen_count: usize,
    closed: bool,
}

/// Shared view of a [`SimulatedRadio`] that stays usable after the radio
/// has been moved into an engine.
#[derive(Debug, Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Every request parsed so far.
    pub fn requests(&self) -> Vec<SimRequest> {
        self.state.lock().requests.clone()
    }

    /// Forget recorded requests.
    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Replace the fault configuration.
    pub fn set_faults(&self, faults: SimFaults) {
        self.state.lock().faults = faults;
    }

    /// Store `data` at `address`.
    pub fn load(&self, address: u32, data: &[u8]) {
        let mut state = self.state.lock();
        for (i, b) in data.iter().enumerate() {
            state.memory.insert(address + i as u32, *b);
        }
    }

    /// Read `len` bytes at `address`.
    pub fn peek(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.state.lock();
        read_image(&state.memory, address, len)
    }

    /// How many times the link was reopened.
    pub fn reopen_count(&self) -> usize {
        self.state.lock().reopen_count
    }
}

fn read_image(memory: &HashMap<u32, u8>, address: u32, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| *memory.get(&(address + i as u32)).unwrap_or(&0xFF))
        .collect()
}

/// Simulated radio speaking the programming protocol.
pub struct SimulatedRadio {
    state: Arc<Mutex<SimState>>,
    inbound: InboundSender,
}

impl SimulatedRadio {
    /// Create a radio that answers into `inbound`.
    pub fn new(inbound: InboundSender) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            inbound,
        }
    }

    /// Inspection handle.
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: self.state.clone(),
        }
    }

    /// Parse as many complete requests as `pending` holds and answer them.
    fn process(&self, state: &mut SimState) {
        loop {
            let Some(&first) = state.pending.first() else {
                return;
            };
            let consumed = match first {
                HANDSHAKE_REQUEST => {
                    state.requests.push(SimRequest::Handshake);
                    if !state.faults.silent_handshake {
                        let banner = state
                            .faults
                            .banner
                            .clone()
                            .unwrap_or_else(|| D878UV_BANNER.to_vec());
                        self.inbound.push(&banner);
                    }
                    1
                }
                b'P' => {
                    if state.pending.len() < PROGRAM_MODE_REQUEST.len() {
                        return;
                    }
                    state.requests.push(SimRequest::Program);
                    if !state.faults.silent_program {
                        self.inbound.push(PROGRAM_MODE_REPLY);
                    }
                    PROGRAM_MODE_REQUEST.len()
                }
                _ if state.pending.starts_with(END_REQUEST) => {
                    state.requests.push(SimRequest::End);
                    if !state.faults.no_commit_ack {
                        self.inbound.push(&[ACK]);
                    }
                    END_REQUEST.len()
                }
                TAG_READ | TAG_ERASE => {
                    if state.pending.len() < FRAME_HEADER_LEN {
                        return;
                    }
                    let address = frame_address(&state.pending);
                    let len = state.pending[FRAME_LEN_OFFSET];
                    if first == TAG_READ {
                        self.answer_read(state, address, len as usize);
                    } else {
                        state.requests.push(SimRequest::Erase { address, len });
                        for i in 0..len as u32 {
                            state.memory.remove(&(address + i));
                        }
                        self.inbound.push(&[ACK]);
                    }
                    FRAME_HEADER_LEN
                }
                TAG_WRITE => {
                    if state.pending.len() < FRAME_HEADER_LEN {
                        return;
                    }
                    let len = state.pending[FRAME_LEN_OFFSET] as usize;
                    // Header, payload, checksum, trailing ACK marker.
                    let total = FRAME_DATA_OFFSET + len + 2;
                    if state.pending.len() < total {
                        return;
                    }
                    let address = frame_address(&state.pending);
                    let data = state.pending[FRAME_DATA_OFFSET..FRAME_DATA_OFFSET + len].to_vec();
                    for (i, b) in data.iter().enumerate() {
                        state.memory.insert(address + i as u32, *b);
                    }
                    state.requests.push(SimRequest::Write { address, data });
                    if !state.faults.no_ack_at.contains(&address) {
                        self.inbound.push(&[ACK]);
                    }
                    total
                }
                other => {
                    trace!("sim dropping stray byte 0x{:02X}", other);
                    1
                }
            };
            state.pending.drain(..consumed);
        }
    }

    fn answer_read(&self, state: &mut SimState, address: u32, len: usize) {
        state.requests.push(SimRequest::Read { address, len });
        if state.faults.silent_read_at.contains(&address) {
            return;
        }
        let data = read_image(&state.memory, address, len);
        let mut sum = checksum(address, len as u8, &data);
        if state.faults.bad_checksum_at.contains(&address) {
            sum = sum.wrapping_add(1);
        }
        let mut response = Vec::with_capacity(FrameCodec::read_response_len(len));
        response.push(TAG_WRITE);
        response.extend_from_slice(&address.to_be_bytes());
        response.push(len as u8);
        response.extend_from_slice(&data);
        response.push(sum);
        response.push(ACK);
        self.inbound.push(&response);
    }
}

fn frame_address(frame: &[u8]) -> u32 {
    u32::from_be_bytes([frame[1], frame[2], frame[3], frame[4]])
}

impl SerialTransport for SimulatedRadio {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        state.pending.extend_from_slice(bytes);
        self.process(&mut state);
        Ok(())
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.pending.clear();
        state.closed = false;
        state.reopen_count += 1;
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().closed = true;
    }

    fn name(&self) -> String {
        "simulated radio".to_string()
    }
}
