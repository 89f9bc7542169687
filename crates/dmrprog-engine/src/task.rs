//! Task definitions.
//!
//! A task is created by a caller, queued FIFO, and consumed exactly once by
//! the engine worker. Its reply, if any, travels back on a one-shot channel.

use std::fmt;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use dmrprog_codeplug::{ChannelCodec, ZoneChannels, ZoneChannelsCodec, ZoneCodec};

use crate::error::{EngineError, EngineResult, StateError};
use crate::events::DecodedRecord;
use crate::transport::SerialTransport;

/// Sequence number assigned when a task is enqueued.
///
/// Ids are handed out under the submission lock, so id order is queue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a failed commit is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Missing ACK is returned as `false`.
    KeepAlive,
    /// Missing ACK is [`EngineError::CommitNotAcknowledged`].
    Terminal,
}

/// Which codec a bulk read decodes with, and the number of its first record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Channel records; `first` is the 1-based channel number of record 0.
    Channel { first: u16 },
    /// Zone name records; `first` is the 1-based zone number of record 0.
    ZoneName { first: u16 },
    /// Zone membership records. Channel numbers above `valid_channels` are dropped.
    ZoneChannels { first: u16, valid_channels: u16 },
}

impl RecordKind {
    /// Decode record `offset` of a run.
    pub fn decode(&self, offset: usize, raw: &[u8]) -> DecodedRecord {
        match *self {
            RecordKind::Channel { first } => DecodedRecord::Channel {
                number: first + offset as u16,
                channel: ChannelCodec::decode(raw),
            },
            RecordKind::ZoneName { first } => DecodedRecord::ZoneName {
                zone: first + offset as u16,
                name: ZoneCodec::decode_name(raw),
            },
            RecordKind::ZoneChannels {
                first,
                valid_channels,
            } => DecodedRecord::ZoneChannels(ZoneChannels {
                zone: first + offset as u16,
                channels: ZoneChannelsCodec::decode(raw, valid_channels),
            }),
        }
    }
}

/// A protocol operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Send `0x02` and check the identification banner.
    Handshake,
    /// Reopen the link and send `PROGRAM`.
    EnterProgramMode,
    /// Send `END` without waiting for a reply.
    ExitProgramMode,
    /// Send `END` and wait for an ACK.
    Commit(CommitMode),
    /// Erase the block at `address`.
    Erase { address: u32 },
    /// Read `len` (at most 255) bytes.
    ReadMemory { address: u32, len: usize },
    /// Write one frame of at most 255 bytes.
    WriteFrame { address: u32, data: Vec<u8> },
    /// Write any amount of data in small frames.
    WriteBulk { base: u32, data: Vec<u8> },
    /// Read `count` records of `size` bytes and publish each decoded record.
    ReadDecode {
        address: u32,
        count: usize,
        size: usize,
        kind: RecordKind,
    },
}

impl Request {
    /// Short name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Handshake => "handshake",
            Request::EnterProgramMode => "enter_program_mode",
            Request::ExitProgramMode => "exit_program_mode",
            Request::Commit(_) => "commit",
            Request::Erase { .. } => "erase",
            Request::ReadMemory { .. } => "read_memory",
            Request::WriteFrame { .. } => "write_frame",
            Request::WriteBulk { .. } => "write_bulk",
            Request::ReadDecode { .. } => "read_decode",
        }
    }
}

/// Successful result of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    /// Completed with nothing to report.
    Done,
    /// Whether an ACK arrived.
    Ack(bool),
    /// Bytes read.
    Bytes(Vec<u8>),
    /// Number of records published.
    Decoded(usize),
}

impl TaskOutput {
    /// Whether the output is a received ACK.
    pub fn acked(&self) -> bool {
        matches!(self, TaskOutput::Ack(true))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            TaskOutput::Bytes(bytes) => bytes,
            _ => Vec::new(),
        }
    }

    pub fn decoded(&self) -> usize {
        match self {
            TaskOutput::Decoded(n) => *n,
            _ => 0,
        }
    }
}

pub(crate) type Reply = Sender<EngineResult<TaskOutput>>;

pub(crate) enum TaskKind {
    Attach(Box<dyn SerialTransport>),
    Request(Request),
    /// Terminal commit if writes are pending, then exit.
    Finish,
    Terminate,
}

impl TaskKind {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            TaskKind::Attach(_) => "attach",
            TaskKind::Request(r) => r.name(),
            TaskKind::Finish => "finish",
            TaskKind::Terminate => "terminate",
        }
    }
}

pub(crate) struct Task {
    pub id: TaskId,
    pub kind: TaskKind,
    pub reply: Option<Reply>,
}

impl Task {
    pub(crate) fn respond(self, result: EngineResult<TaskOutput>) {
        if let Some(reply) = self.reply {
            // The caller may have stopped waiting.
            let _ = reply.send(result);
        }
    }
}

/// Handle to the pending result of a submitted task.
#[derive(Debug)]
pub struct Ticket {
    id: TaskId,
    rx: Receiver<EngineResult<TaskOutput>>,
}

impl Ticket {
    pub(crate) fn new(id: TaskId, rx: Receiver<EngineResult<TaskOutput>>) -> Self {
        Self { id, rx }
    }

    /// Queue position of the task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Block until the task completes.
    pub fn wait(self) -> EngineResult<TaskOutput> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(StateError::WorkerGone.into()))
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> EngineResult<TaskOutput> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(EngineError::Timeout {
                operation: "task reply",
                expected: 1,
                received: 0,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(StateError::WorkerGone.into()),
        }
    }
}
