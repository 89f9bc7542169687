//! The protocol engine.
//!
//! One worker thread owns the transport and the inbound buffer and executes
//! tasks strictly in submission order. Callers talk to it through
//! [`EngineHandle`], which is cheap to clone and safe to use from any thread.
//!
//! ## Lifecycle
//!
//! ```text
//! Idle <-> Executing -> Draining -> Terminated
//! ```
//!
//! The first failing task aborts the session: everything still queued fails
//! with [`EngineError::PriorFailure`], an [`EngineEvent::EndOfStream`] carrying
//! the error is published and the worker exits. Handshake and program-mode
//! failures are the exception; they are reported but leave the engine usable
//! so the user can retry.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use dmrprog_protocol::{
    inbound, CancelToken, FrameCodec, InboundBuffer, InboundError, InboundSender, ProtocolError,
    ACK, END_REQUEST, HANDSHAKE_REQUEST, MAX_FRAME_PAYLOAD, PROGRAM_MODE_REPLY_LEN,
    PROGRAM_MODE_REQUEST,
};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, StateError, TransportError};
use crate::events::{EngineEvent, EventBus};
use crate::task::{CommitMode, RecordKind, Reply, Request, Task, TaskId, TaskKind, TaskOutput, Ticket};
use crate::telemetry::metric_defs;
use crate::transport::SerialTransport;

/// Observable engine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Waiting for work.
    Idle,
    /// Running a task.
    Executing,
    /// No longer accepting work; queued tasks still run.
    Draining,
    /// The worker has exited.
    Terminated,
}

struct Gate {
    state: EngineState,
    accepting: bool,
    /// Tasks enqueued and not yet completed.
    outstanding: usize,
    next_id: u64,
    /// `None` once the worker has exited.
    tx: Option<Sender<Task>>,
}

struct Shared {
    gate: Mutex<Gate>,
    /// Signalled whenever `outstanding` drops to zero.
    idle: Condvar,
    first_error: Mutex<Option<EngineError>>,
    events: EventBus,
    cancel: CancelToken,
    inbound: InboundSender,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Owner of the engine worker. Dropping it shuts the worker down.
pub struct ProtocolEngine {
    handle: EngineHandle,
}

impl ProtocolEngine {
    /// Validate `config` and spawn the worker.
    pub fn start(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let banner = config.banner_bytes()?;
        let (inbound_tx, inbound_rx) = inbound::channel(config.poll_slice());
        let (tx, rx) = crossbeam_channel::unbounded();

        let shared = Arc::new(Shared {
            gate: Mutex::new(Gate {
                state: EngineState::Idle,
                accepting: true,
                outstanding: 0,
                next_id: 1,
                tx: Some(tx),
            }),
            idle: Condvar::new(),
            first_error: Mutex::new(None),
            events: EventBus::default(),
            cancel: CancelToken::new(),
            inbound: inbound_tx,
            worker: Mutex::new(None),
        });

        let worker = Worker {
            config,
            banner,
            shared: shared.clone(),
            inbound: inbound_rx,
            transport: None,
            uncommitted: false,
        };
        let join = thread::Builder::new()
            .name("dmrprog-engine".into())
            .spawn(move || worker.run(rx))
            .map_err(|e| StateError::Spawn(e.to_string()))?;
        *shared.worker.lock() = Some(join);

        debug!("protocol engine started");
        Ok(Self {
            handle: EngineHandle { shared },
        })
    }

    /// A handle for submitting work.
    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Drain, commit pending writes and stop. See [`EngineHandle::finish`].
    pub fn finish(self, timeout: Duration) -> EngineResult<()> {
        self.handle.finish(timeout)
    }
}

impl Drop for ProtocolEngine {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Cloneable submission handle.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
}

impl EngineHandle {
    fn enqueue(&self, kind: TaskKind, reply: Option<Reply>, bypass_gate: bool) -> EngineResult<TaskId> {
        let mut gate = self.shared.gate.lock();
        if !bypass_gate && !gate.accepting {
            return Err(self.rejection());
        }
        let Some(tx) = gate.tx.as_ref() else {
            return Err(StateError::WorkerGone.into());
        };
        let id = TaskId(gate.next_id);
        if tx.send(Task { id, kind, reply }).is_err() {
            return Err(StateError::WorkerGone.into());
        }
        gate.next_id += 1;
        gate.outstanding += 1;
        Ok(id)
    }

    /// Why a submission was refused.
    fn rejection(&self) -> EngineError {
        if let Some(err) = self.shared.first_error.lock().as_ref() {
            return EngineError::PriorFailure(err.to_string());
        }
        if self.shared.cancel.is_cancelled() {
            return EngineError::Cancelled;
        }
        StateError::NotAccepting.into()
    }

    fn call(&self, kind: TaskKind) -> EngineResult<TaskOutput> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = self.enqueue(kind, Some(tx), false)?;
        Ticket::new(id, rx).wait()
    }

    /// Queue `request` and return a ticket for its result.
    pub fn submit(&self, request: Request) -> EngineResult<Ticket> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let id = self.enqueue(TaskKind::Request(request), Some(tx), false)?;
        Ok(Ticket::new(id, rx))
    }

    /// Queue `request` without keeping a reply channel. Failures still abort
    /// the session and show up in [`first_error`](Self::first_error).
    pub fn submit_detached(&self, request: Request) -> EngineResult<TaskId> {
        self.enqueue(TaskKind::Request(request), None, false)
    }

    /// Hand a transport to the worker, replacing (and closing) any previous one.
    pub fn attach<T: SerialTransport + 'static>(&self, transport: T) -> EngineResult<()> {
        self.call(TaskKind::Attach(Box::new(transport))).map(|_| ())
    }

    /// Where transports push received bytes.
    pub fn inbound_sender(&self) -> InboundSender {
        self.shared.inbound.clone()
    }

    /// Send the identify byte and check the 16-byte banner.
    ///
    /// Publishes [`EngineEvent::Handshake`] either way. A wrong banner is
    /// [`ProtocolError::HandshakeFailed`]; it does not abort the session, so
    /// the caller may retry.
    pub fn handshake(&self) -> EngineResult<()> {
        self.call(TaskKind::Request(Request::Handshake)).map(|_| ())
    }

    /// Reopen the port, send `PROGRAM` and wait for the 3-byte reply.
    ///
    /// Publishes [`EngineEvent::ProgramMode`]. Failure leaves the session
    /// usable.
    pub fn enter_program_mode(&self) -> EngineResult<()> {
        self.call(TaskKind::Request(Request::EnterProgramMode))
            .map(|_| ())
    }

    /// Send `END` without waiting for a reply.
    pub fn exit_program_mode(&self) -> EngineResult<()> {
        self.call(TaskKind::Request(Request::ExitProgramMode))
            .map(|_| ())
    }

    /// Send `END` and report whether the radio acknowledged it.
    ///
    /// With [`CommitMode::Terminal`] a missing ACK is
    /// [`EngineError::CommitNotAcknowledged`] and aborts the session.
    pub fn commit(&self, mode: CommitMode) -> EngineResult<bool> {
        self.call(TaskKind::Request(Request::Commit(mode)))
            .map(|out| out.acked())
    }

    /// Erase the flash block at `address`. Returns whether the radio
    /// acknowledged within the erase timeout; a timeout is not an error.
    pub fn erase_block(&self, address: u32) -> EngineResult<bool> {
        self.call(TaskKind::Request(Request::Erase { address }))
            .map(|out| out.acked())
    }

    /// Read `len` bytes (at most 255) at `address`.
    ///
    /// A short reply or a malformed frame is an error. A checksum mismatch
    /// is an error when `strict_checksum` is set and a warning otherwise.
    pub fn read_memory(&self, address: u32, len: usize) -> EngineResult<Vec<u8>> {
        self.call(TaskKind::Request(Request::ReadMemory { address, len }))
            .map(TaskOutput::into_bytes)
    }

    /// Write one frame of at most 255 bytes and report whether it was
    /// acknowledged.
    pub fn write_frame(&self, address: u32, data: &[u8]) -> EngineResult<bool> {
        self.call(TaskKind::Request(Request::WriteFrame {
            address,
            data: data.to_vec(),
        }))
        .map(|out| out.acked())
    }

    /// Write `data` from `base` in frames of `write_chunk` bytes. The first
    /// unacknowledged frame fails with [`EngineError::NoAck`].
    pub fn write_bulk(&self, base: u32, data: &[u8]) -> EngineResult<()> {
        self.call(TaskKind::Request(Request::WriteBulk {
            base,
            data: data.to_vec(),
        }))
        .map(|_| ())
    }

    /// Queue a bulk read whose records arrive as [`EngineEvent::Decoded`].
    pub fn submit_read_decode(
        &self,
        address: u32,
        count: usize,
        size: usize,
        kind: RecordKind,
    ) -> EngineResult<TaskId> {
        self.submit_detached(Request::ReadDecode {
            address,
            count,
            size,
            kind,
        })
    }

    /// Bulk read that blocks until every record has been published.
    pub fn read_decode_bulk(
        &self,
        address: u32,
        count: usize,
        size: usize,
        kind: RecordKind,
    ) -> EngineResult<usize> {
        self.call(TaskKind::Request(Request::ReadDecode {
            address,
            count,
            size,
            kind,
        }))
        .map(|out| out.decoded())
    }

    /// Receive every event published from now on.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> EngineState {
        self.shared.gate.lock().state
    }

    /// The error that aborted the session, if any.
    pub fn first_error(&self) -> Option<EngineError> {
        self.shared.first_error.lock().clone()
    }

    /// Tasks queued or running.
    pub fn outstanding(&self) -> usize {
        self.shared.gate.lock().outstanding
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.shared.cancel.clone()
    }

    /// Stop accepting work and interrupt the running task at its next
    /// polling slice.
    pub fn cancel(&self) {
        info!("cancel requested");
        self.shared.cancel.cancel();
        self.shared.gate.lock().accepting = false;
    }

    /// Block until no task is queued or running. Returns `false` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut gate = self.shared.gate.lock();
        while gate.outstanding > 0 {
            if self.shared.idle.wait_until(&mut gate, deadline).timed_out() {
                return gate.outstanding == 0;
            }
        }
        true
    }

    /// Stop accepting work, wait up to `timeout` for the queue to drain,
    /// commit if writes are pending, and stop the worker.
    ///
    /// Returns the error that aborted the session, if any.
    pub fn finish(&self, timeout: Duration) -> EngineResult<()> {
        let deadline = Instant::now() + timeout;
        {
            let mut gate = self.shared.gate.lock();
            gate.accepting = false;
            if gate.state != EngineState::Terminated {
                gate.state = EngineState::Draining;
            }
            while gate.outstanding > 0 {
                if self.shared.idle.wait_until(&mut gate, deadline).timed_out()
                    && gate.outstanding > 0
                {
                    let pending = gate.outstanding;
                    drop(gate);
                    warn!(pending, "drain timed out, cancelling");
                    self.shared.cancel.cancel();
                    self.join_worker();
                    return Err(EngineError::Timeout {
                        operation: "drain",
                        expected: 0,
                        received: pending,
                    });
                }
            }
        }

        let result = match self.first_error() {
            Some(_) => Ok(()),
            None => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                self.enqueue(TaskKind::Finish, Some(tx), true)
                    .and_then(|id| Ticket::new(id, rx).wait())
                    .map(|_| ())
            }
        };
        self.join_worker();
        match self.first_error() {
            Some(err) => Err(err),
            None => result,
        }
    }

    /// Stop accepting work, let already queued tasks run, and stop the worker.
    pub fn shutdown(&self) {
        self.shared.gate.lock().accepting = false;
        // Fails only if the worker is already gone.
        let _ = self.enqueue(TaskKind::Terminate, None, true);
        self.join_worker();
    }

    fn join_worker(&self) {
        let handle = self.shared.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("engine worker panicked");
            }
        }
    }
}

// ============================================================================
// Worker
// ============================================================================

struct Worker {
    config: EngineConfig,
    banner: Vec<u8>,
    shared: Arc<Shared>,
    inbound: InboundBuffer,
    transport: Option<Box<dyn SerialTransport>>,
    /// Writes or erases not yet followed by an acknowledged commit.
    uncommitted: bool,
}

impl Worker {
    fn run(mut self, rx: Receiver<Task>) {
        debug!("engine worker running");
        let mut stop_error = None;

        while let Ok(task) = rx.recv() {
            let Task { id, kind, reply } = task;
            let name = kind.name();
            let retryable = matches!(
                kind,
                TaskKind::Request(Request::Handshake) | TaskKind::Request(Request::EnterProgramMode)
            );
            let last = matches!(kind, TaskKind::Finish | TaskKind::Terminate);

            self.set_state(EngineState::Executing);
            trace!(task = %id, name, "executing");
            let started = Instant::now();
            let result = self.execute(kind);
            metrics::histogram!(metric_defs::TASK_DURATION.name, "task" => name)
                .record(started.elapsed().as_secs_f64() * 1000.0);

            let fatal = match &result {
                Ok(_) => None,
                Err(err) => {
                    metrics::counter!(metric_defs::TASKS_FAILED.name, "task" => name).increment(1);
                    let no_transport = matches!(err, EngineError::State(StateError::NoTransport));
                    if retryable || no_transport {
                        warn!(task = %id, name, "{}", err);
                        None
                    } else {
                        error!(task = %id, name, "{}; aborting session", err);
                        Some(err.clone())
                    }
                }
            };
            if let Some(err) = &fatal {
                self.record_first_error(err.clone());
                self.shared.gate.lock().accepting = false;
            }
            if let Some(reply) = reply {
                // The caller may have stopped waiting.
                let _ = reply.send(result);
            }
            self.complete_one();

            if fatal.is_some() {
                stop_error = fatal;
                break;
            }
            if last {
                break;
            }
        }

        self.wind_down(&rx, stop_error);
    }

    fn execute(&mut self, kind: TaskKind) -> EngineResult<TaskOutput> {
        match kind {
            TaskKind::Attach(transport) => {
                info!(transport = %transport.name(), "transport attached");
                if let Some(mut old) = self.transport.replace(transport) {
                    old.close();
                }
                Ok(TaskOutput::Done)
            }
            TaskKind::Request(request) => self.run_request(request),
            TaskKind::Finish => {
                if self.uncommitted {
                    info!("committing pending writes");
                    self.commit(CommitMode::Terminal)?;
                }
                Ok(TaskOutput::Done)
            }
            TaskKind::Terminate => Ok(TaskOutput::Done),
        }
    }

    fn run_request(&mut self, request: Request) -> EngineResult<TaskOutput> {
        match request {
            Request::Handshake => self.handshake().map(|_| TaskOutput::Done),
            Request::EnterProgramMode => self.enter_program_mode().map(|_| TaskOutput::Done),
            Request::ExitProgramMode => {
                self.send(END_REQUEST)?;
                Ok(TaskOutput::Done)
            }
            Request::Commit(mode) => self.commit(mode).map(TaskOutput::Ack),
            Request::Erase { address } => self.erase(address).map(TaskOutput::Ack),
            Request::ReadMemory { address, len } => {
                self.read_memory(address, len).map(TaskOutput::Bytes)
            }
            Request::WriteFrame { address, data } => {
                self.write_frame(address, &data).map(TaskOutput::Ack)
            }
            Request::WriteBulk { base, data } => {
                self.write_bulk(base, &data).map(|_| TaskOutput::Done)
            }
            Request::ReadDecode {
                address,
                count,
                size,
                kind,
            } => self
                .read_decode(address, count, size, kind)
                .map(TaskOutput::Decoded),
        }
    }

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------

    fn handshake(&mut self) -> EngineResult<()> {
        let result = self.try_handshake();
        let message = match &result {
            Ok(()) => "radio identified".to_string(),
            Err(err) => err.to_string(),
        };
        self.shared.events.publish(EngineEvent::Handshake {
            ok: result.is_ok(),
            message,
        });
        result
    }

    fn try_handshake(&mut self) -> EngineResult<()> {
        self.inbound.flush();
        self.send(&[HANDSHAKE_REQUEST])?;
        let reply = self.read(self.banner.len(), self.config.handshake_timeout(), "handshake")?;
        if reply != self.banner {
            return Err(ProtocolError::HandshakeFailed(reply).into());
        }
        info!("radio identified");
        Ok(())
    }

    fn enter_program_mode(&mut self) -> EngineResult<()> {
        let result = self.try_enter_program_mode();
        let message = match &result {
            Ok(reply) => format!("programming mode entered ({})", hex::encode(reply)),
            Err(err) => err.to_string(),
        };
        self.shared.events.publish(EngineEvent::ProgramMode {
            ok: result.is_ok(),
            message,
        });
        result.map(|_| ())
    }

    fn try_enter_program_mode(&mut self) -> EngineResult<Vec<u8>> {
        let transport = self.transport.as_mut().ok_or(StateError::NoTransport)?;
        transport.reopen()?;
        self.inbound.flush();
        self.send(PROGRAM_MODE_REQUEST)?;
        self.read(
            PROGRAM_MODE_REPLY_LEN,
            self.config.program_mode_timeout(),
            "program mode",
        )
    }

    fn commit(&mut self, mode: CommitMode) -> EngineResult<bool> {
        self.inbound.flush();
        self.send(END_REQUEST)?;
        let acked = self.wait_ack(self.config.commit_ack_timeout(), "commit")?;
        if acked {
            self.uncommitted = false;
            debug!("commit acknowledged");
        } else if mode == CommitMode::Terminal {
            return Err(EngineError::CommitNotAcknowledged);
        } else {
            warn!("commit not acknowledged");
        }
        Ok(acked)
    }

    // ------------------------------------------------------------------
    // Memory
    // ------------------------------------------------------------------

    fn erase(&mut self, address: u32) -> EngineResult<bool> {
        let frame = FrameCodec::build_erase(address, self.config.erase_chunk);
        self.inbound.flush();
        self.send_frame(&frame)?;
        self.uncommitted = true;
        self.wait_ack(self.config.erase_ack_timeout(), "erase")
    }

    fn read_memory(&mut self, address: u32, len: usize) -> EngineResult<Vec<u8>> {
        let frame = FrameCodec::build_read(address, len)?;
        self.inbound.flush();
        self.send_frame(&frame)?;
        let raw = self.read(
            FrameCodec::read_response_len(len),
            self.config.read_timeout(),
            "read",
        )?;
        let response = FrameCodec::parse_response(address, len, &raw)?;
        if !response.checksum_ok() {
            metrics::counter!(metric_defs::CHECKSUM_FAILURES.name).increment(1);
            if self.config.strict_checksum {
                return Err(ProtocolError::ChecksumMismatch {
                    address,
                    received: response.checksum,
                    computed: response.computed,
                }
                .into());
            }
            warn!(
                "checksum mismatch at 0x{:08X} (0x{:02X} != 0x{:02X}), keeping data",
                address, response.checksum, response.computed
            );
        }
        Ok(response.payload)
    }

    fn write_frame(&mut self, address: u32, data: &[u8]) -> EngineResult<bool> {
        let frame = FrameCodec::build_write(address, data)?;
        self.inbound.flush();
        self.send_frame(&frame)?;
        self.uncommitted = true;
        self.wait_ack(self.config.write_ack_timeout(), "write")
    }

    fn write_bulk(&mut self, base: u32, data: &[u8]) -> EngineResult<()> {
        if data.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        let chunk = self.config.write_chunk;
        for (i, piece) in data.chunks(chunk).enumerate() {
            let address = base + (i * chunk) as u32;
            if !self.write_frame(address, piece)? {
                return Err(EngineError::NoAck { address });
            }
        }
        debug!("wrote {} bytes at 0x{:08X}", data.len(), base);
        Ok(())
    }

    /// Read `count` records of `size` bytes starting at `address`, as many
    /// whole records per request as fit in one frame, publishing each
    /// record as soon as its request completes.
    fn read_decode(
        &mut self,
        address: u32,
        count: usize,
        size: usize,
        kind: RecordKind,
    ) -> EngineResult<usize> {
        if count == 0 || size == 0 {
            return Ok(0);
        }
        let per_request = (MAX_FRAME_PAYLOAD / size).max(1);
        let mut done = 0;
        while done < count {
            let records = per_request.min(count - done);
            let start = address + (done * size) as u32;
            let total = records * size;

            // Records larger than a frame are read in frame-sized pieces.
            let mut slab = Vec::with_capacity(total);
            while slab.len() < total {
                let len = (total - slab.len()).min(MAX_FRAME_PAYLOAD);
                let piece = self.read_memory(start + slab.len() as u32, len)?;
                slab.extend_from_slice(&piece);
            }

            for (i, raw) in slab.chunks_exact(size).enumerate() {
                let record = kind.decode(done + i, raw);
                self.shared.events.publish(EngineEvent::Decoded {
                    record,
                    so_far: done + i + 1,
                    expected: count,
                });
            }
            metrics::counter!(metric_defs::RECORDS_DECODED.name).increment(records as u64);
            done += records;
        }
        Ok(count)
    }

    // ------------------------------------------------------------------
    // Wire
    // ------------------------------------------------------------------

    fn send(&mut self, bytes: &[u8]) -> EngineResult<()> {
        let transport = self.transport.as_mut().ok_or(StateError::NoTransport)?;
        trace!(tx = %hex::encode(bytes), "send");
        transport.write_all(bytes)?;
        metrics::counter!(metric_defs::BYTES_WRITTEN.name).increment(bytes.len() as u64);
        Ok(())
    }

    fn send_frame(&mut self, frame: &[u8]) -> EngineResult<()> {
        self.send(frame)?;
        let tag = frame.first().map(|t| (*t as char).to_string()).unwrap_or_default();
        metrics::counter!(metric_defs::FRAMES_SENT.name, "tag" => tag).increment(1);
        Ok(())
    }

    fn read(&mut self, n: usize, timeout: Duration, operation: &'static str) -> EngineResult<Vec<u8>> {
        match self.inbound.read_exact(n, timeout, &self.shared.cancel) {
            Ok(bytes) => {
                trace!(rx = %hex::encode(&bytes), "recv");
                metrics::counter!(metric_defs::BYTES_READ.name).increment(bytes.len() as u64);
                Ok(bytes)
            }
            Err(InboundError::Timeout { expected, collected }) => Err(EngineError::Timeout {
                operation,
                expected,
                received: collected.len(),
            }),
            Err(InboundError::Cancelled { .. }) => Err(EngineError::Cancelled),
            Err(InboundError::Disconnected) => Err(TransportError::Closed.into()),
        }
    }

    /// Wait for a single ACK byte. A timeout or any other byte is `false`.
    fn wait_ack(&mut self, timeout: Duration, operation: &'static str) -> EngineResult<bool> {
        let acked = match self.read(1, timeout, operation) {
            Ok(byte) => byte.first() == Some(&ACK),
            Err(EngineError::Timeout { .. }) => false,
            Err(err) => return Err(err),
        };
        if !acked {
            metrics::counter!(metric_defs::ACK_MISSING.name, "task" => operation).increment(1);
            debug!("no ACK for {}", operation);
        }
        Ok(acked)
    }

    // ------------------------------------------------------------------
    // Bookkeeping
    // ------------------------------------------------------------------

    fn set_state(&self, state: EngineState) {
        let mut gate = self.shared.gate.lock();
        if gate.state != EngineState::Terminated {
            gate.state = state;
        }
    }

    fn complete_one(&self) {
        let mut gate = self.shared.gate.lock();
        gate.outstanding = gate.outstanding.saturating_sub(1);
        if gate.state != EngineState::Terminated {
            gate.state = if gate.accepting {
                EngineState::Idle
            } else {
                EngineState::Draining
            };
        }
        if gate.outstanding == 0 {
            self.shared.idle.notify_all();
        }
    }

    fn record_first_error(&self, err: EngineError) {
        let mut slot = self.shared.first_error.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Fail whatever is still queued, close the link and announce the end.
    fn wind_down(&mut self, rx: &Receiver<Task>, error: Option<EngineError>) {
        {
            let mut gate = self.shared.gate.lock();
            gate.accepting = false;
            gate.tx = None;
        }
        let reason = error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "engine stopped".to_string());
        let mut dropped = 0;
        for task in rx.try_iter() {
            task.respond(Err(EngineError::PriorFailure(reason.clone())));
            self.complete_one();
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "queued tasks dropped");
        }

        if let Some(mut transport) = self.transport.take() {
            transport.close();
        }
        self.shared
            .events
            .publish(EngineEvent::EndOfStream { error });

        let mut gate = self.shared.gate.lock();
        gate.state = EngineState::Terminated;
        self.shared.idle.notify_all();
        debug!("engine worker stopped");
    }
}
