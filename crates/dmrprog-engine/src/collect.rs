//! Folding decoded-record events into a [`Codeplug`].

use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use dmrprog_codeplug::Codeplug;

use crate::error::{EngineError, EngineResult, StateError};
use crate::events::{DecodedRecord, EngineEvent};

/// Builds a [`Codeplug`] from the events of one or more bulk reads.
///
/// Subscribe before queueing the reads, otherwise early records are missed.
pub struct RecordCollector {
    events: Receiver<EngineEvent>,
    codeplug: Codeplug,
    received: usize,
}

impl RecordCollector {
    pub fn new(events: Receiver<EngineEvent>) -> Self {
        Self {
            events,
            codeplug: Codeplug::default(),
            received: 0,
        }
    }

    /// Collect until `expected` records arrived.
    pub fn collect(self, expected: usize, deadline: Instant) -> EngineResult<Codeplug> {
        self.collect_with(expected, deadline, |_, _| {})
    }

    /// Like [`collect`](Self::collect), calling `progress(received, expected)`
    /// after every record.
    ///
    /// Stops early with the engine's error if the worker ends the stream, and
    /// with [`EngineError::Timeout`] once `deadline` passes.
    pub fn collect_with<F>(
        mut self,
        expected: usize,
        deadline: Instant,
        mut progress: F,
    ) -> EngineResult<Codeplug>
    where
        F: FnMut(usize, usize),
    {
        while self.received < expected {
            let event = match self.events.recv_deadline(deadline) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => {
                    return Err(EngineError::Timeout {
                        operation: "collect",
                        expected,
                        received: self.received,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => return Err(StateError::WorkerGone.into()),
            };
            match event {
                EngineEvent::Decoded { record, .. } => {
                    self.apply(record);
                    self.received += 1;
                    progress(self.received, expected);
                }
                EngineEvent::EndOfStream { error } => {
                    return Err(error.unwrap_or(StateError::WorkerGone.into()));
                }
                EngineEvent::Handshake { .. } | EngineEvent::ProgramMode { .. } => {}
            }
        }
        Ok(self.codeplug)
    }

    fn apply(&mut self, record: DecodedRecord) {
        match record {
            DecodedRecord::Channel { number, channel } => {
                self.codeplug.set_channel(number, channel);
            }
            DecodedRecord::ZoneName { zone, name } => {
                if let Some(z) = self.codeplug.zone_mut(zone) {
                    z.name = name;
                }
            }
            DecodedRecord::ZoneChannels(members) => {
                if let Some(z) = self.codeplug.zone_mut(members.zone) {
                    z.channels = members.channels;
                }
            }
        }
    }
}
