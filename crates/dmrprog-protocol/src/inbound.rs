//! Inbound byte buffering.
//!
//! Transports deliver received bytes in arbitrary chunks from their own
//! context (a reader thread, a USB callback, a simulator). [`InboundSender`]
//! is the producer side and never blocks. [`InboundBuffer`] is the single
//! consumer, owned by the protocol worker, which needs "exactly N bytes
//! within T" semantics.

use std::time::{Duration, Instant};

use bytes::{Buf, Bytes};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use thiserror::Error;

use crate::cancel::CancelToken;
use crate::constants::POLL_SLICE_MS;

/// Errors returned by [`InboundBuffer::read_exact`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InboundError {
    /// Deadline passed before enough bytes arrived.
    #[error("timeout reading {expected} bytes; got {}", .collected.len())]
    Timeout {
        /// Number of bytes requested.
        expected: usize,
        /// Bytes received before the deadline.
        collected: Vec<u8>,
    },

    /// The cancel token fired while waiting.
    #[error("read cancelled after {} of {expected} bytes", .collected.len())]
    Cancelled {
        /// Number of bytes requested.
        expected: usize,
        /// Bytes received before cancellation.
        collected: Vec<u8>,
    },

    /// Every producer is gone and the queue is empty.
    #[error("inbound stream closed")]
    Disconnected,
}

/// Create a connected pair using the default polling slice.
pub fn default_channel() -> (InboundSender, InboundBuffer) {
    channel(Duration::from_millis(POLL_SLICE_MS))
}

/// Create a connected producer/consumer pair.
pub fn channel(poll_slice: Duration) -> (InboundSender, InboundBuffer) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (
        InboundSender { tx },
        InboundBuffer {
            rx,
            pending: Bytes::new(),
            poll_slice,
        },
    )
}

/// Producer handle given to transports.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: Sender<Bytes>,
}

impl InboundSender {
    /// Queue a received chunk. Empty chunks are ignored.
    ///
    /// Returns `false` once the consumer has been dropped.
    pub fn push(&self, chunk: &[u8]) -> bool {
        if chunk.is_empty() {
            return true;
        }
        self.tx.send(Bytes::copy_from_slice(chunk)).is_ok()
    }
}

/// Consumer side of the inbound queue.
#[derive(Debug)]
pub struct InboundBuffer {
    rx: Receiver<Bytes>,
    /// Partially consumed chunk from a previous read.
    pending: Bytes,
    poll_slice: Duration,
}

impl InboundBuffer {
    /// Read exactly `n` bytes, waiting at most `timeout`.
    ///
    /// Leftover bytes of the last chunk stay buffered for the next call.
    pub fn read_exact(
        &mut self,
        n: usize,
        timeout: Duration,
        cancel: &CancelToken,
    ) -> Result<Vec<u8>, InboundError> {
        let mut out = Vec::with_capacity(n);
        let deadline = Instant::now() + timeout;

        while out.len() < n {
            if !self.pending.is_empty() {
                let take = (n - out.len()).min(self.pending.len());
                out.extend_from_slice(&self.pending[..take]);
                self.pending.advance(take);
                continue;
            }

            if cancel.is_cancelled() {
                return Err(InboundError::Cancelled {
                    expected: n,
                    collected: out,
                });
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(InboundError::Timeout {
                    expected: n,
                    collected: out,
                });
            }

            let wait = self.poll_slice.min(deadline - now);
            match self.rx.recv_timeout(wait) {
                Ok(chunk) => self.pending = chunk,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    if out.is_empty() {
                        return Err(InboundError::Disconnected);
                    }
                    return Err(InboundError::Timeout {
                        expected: n,
                        collected: out,
                    });
                }
            }
        }

        Ok(out)
    }

    /// Discard everything buffered or queued. Returns the number of bytes dropped.
    pub fn flush(&mut self) -> usize {
        let mut dropped = self.pending.len();
        self.pending = Bytes::new();
        for chunk in self.rx.try_iter() {
            dropped += chunk.len();
        }
        if dropped > 0 {
            log::debug!("flushed {} buffered byte(s)", dropped);
        }
        dropped
    }
}
