//! Programming engine for AnyTone-family DMR radios.
//!
//! The [`ProtocolEngine`] runs every wire operation on a single worker thread,
//! in the order it was submitted, over a [`SerialTransport`]. [`BulkTransfer`]
//! builds whole-codeplug reads and writes on top of it, and
//! [`RecordCollector`] folds the decoded records back into a
//! [`Codeplug`](dmrprog_codeplug::Codeplug).
//!
//! ```no_run
//! use std::time::Duration;
//! use dmrprog_codeplug::MemoryMap;
//! use dmrprog_engine::{BulkTransfer, EngineConfig, ProtocolEngine, SimulatedRadio};
//!
//! let engine = ProtocolEngine::start(EngineConfig::default())?;
//! let handle = engine.handle();
//! handle.attach(SimulatedRadio::new(handle.inbound_sender()))?;
//! handle.handshake()?;
//! handle.enter_program_mode()?;
//!
//! let transfer = BulkTransfer::new(handle.clone(), MemoryMap::default());
//! let codeplug = transfer.read_channels(Duration::from_secs(60))?;
//! println!("{} channels in use", codeplug.used_channels().count());
//! engine.finish(Duration::from_secs(10))?;
//! # Ok::<(), dmrprog_engine::EngineError>(())
//! ```

pub mod collect;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod sim;
pub mod task;
pub mod telemetry;
pub mod transfer;
pub mod transport;

pub use collect::RecordCollector;
pub use config::{EngineConfig, SerialConfig};
pub use engine::{EngineHandle, EngineState, ProtocolEngine};
pub use error::{EngineError, EngineResult, StateError, TransportError};
pub use events::{DecodedRecord, EngineEvent};
pub use sim::{SimFaults, SimHandle, SimRequest, SimulatedRadio};
pub use task::{CommitMode, RecordKind, Request, TaskId, TaskOutput, Ticket};
pub use telemetry::describe_metrics;
pub use transfer::BulkTransfer;
pub use transport::{PortSelector, SerialPortTransport, SerialTransport};
