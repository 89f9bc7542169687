//! Engine notifications.

use crossbeam_channel::{Receiver, Sender};
use dmrprog_codeplug::{Channel, ZoneChannels};
use parking_lot::Mutex;

use crate::error::EngineError;

/// One record decoded by a bulk read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    Channel { number: u16, channel: Channel },
    ZoneName { zone: u16, name: String },
    ZoneChannels(ZoneChannels),
}

/// Notifications published by the engine worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A record was decoded. `so_far` counts records of the current bulk read.
    Decoded {
        record: DecodedRecord,
        so_far: usize,
        expected: usize,
    },
    /// Result of a handshake attempt.
    Handshake { ok: bool, message: String },
    /// Result of an attempt to enter programming mode.
    ProgramMode { ok: bool, message: String },
    /// The worker stopped. Carries the error that stopped it, if any.
    EndOfStream { error: Option<EngineError> },
}

/// Fan-out of events to any number of subscribers.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    subscribers: Mutex<Vec<Sender<EngineEvent>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber, dropping disconnected ones.
    pub fn publish(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}
