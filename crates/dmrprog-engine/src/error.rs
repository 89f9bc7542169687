//! Error types for dmrprog-engine.

use dmrprog_protocol::ProtocolError;
use thiserror::Error;

/// Serial link failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No port matched the selector.
    #[error("no serial port matches '{0}'")]
    NotFound(String),

    /// The selector could not be parsed.
    #[error("invalid port selector '{0}'")]
    InvalidSelector(String),

    /// Opening the port failed.
    #[error("failed to open {port}: {message}")]
    Open {
        /// Port path.
        port: String,
        /// Driver message.
        message: String,
    },

    /// Writing to the port failed.
    #[error("write failed: {0}")]
    Write(String),

    /// The transport was closed.
    #[error("transport closed")]
    Closed,
}

/// Operations issued in the wrong engine state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// A wire operation ran before a transport was attached.
    #[error("no transport attached")]
    NoTransport,

    /// The engine is draining or terminated.
    #[error("engine is not accepting tasks")]
    NotAccepting,

    /// The worker thread exited without replying.
    #[error("engine worker is gone")]
    WorkerGone,

    /// The worker thread could not be started.
    #[error("failed to start engine worker: {0}")]
    Spawn(String),
}

/// Errors surfaced by the protocol engine and the transfer orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// A response did not arrive in time.
    #[error("timeout during {operation}: expected {expected}, got {received}")]
    Timeout {
        /// What the engine was waiting for.
        operation: &'static str,
        /// Bytes expected.
        expected: usize,
        /// Bytes received before the deadline.
        received: usize,
    },

    #[error("state error: {0}")]
    State(#[from] StateError),

    /// A bulk write was asked to write nothing.
    #[error("nothing to write")]
    EmptyInput,

    /// A write frame was not acknowledged.
    #[error("no ACK for write at 0x{address:08X}")]
    NoAck {
        /// Address of the unacknowledged frame.
        address: u32,
    },

    /// The radio did not acknowledge the final commit.
    #[error("commit not acknowledged")]
    CommitNotAcknowledged,

    /// The task was dropped because an earlier task failed.
    #[error("aborted after earlier failure: {0}")]
    PriorFailure(String),

    /// The task was interrupted by the cancel token.
    #[error("cancelled")]
    Cancelled,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::NoAck { address: 0x0080_0010 };
        assert_eq!(err.to_string(), "no ACK for write at 0x00800010");

        let err = EngineError::Timeout {
            operation: "read",
            expected: 72,
            received: 10,
        };
        assert!(err.to_string().contains("expected 72, got 10"));

        let err: EngineError = StateError::NoTransport.into();
        assert!(matches!(err, EngineError::State(StateError::NoTransport)));
    }
}
