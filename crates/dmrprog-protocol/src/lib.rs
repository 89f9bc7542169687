//! AnyTone Serial Programming Protocol
//!
//! This crate provides the wire-level pieces needed to talk to an AnyTone-family
//! DMR radio while it sits in programming mode. The radio exposes its flash
//! memory over a half-duplex serial link using small checksummed frames.
//!
//! # Protocol Overview
//!
//! All memory traffic uses the same frame layout:
//!
//! ```text
//! +-----+----------------+-----+-----------------+----------+---------+
//! | tag | address (BE32) | len | payload[0..len] | checksum | [ACK]   |
//! +-----+----------------+-----+-----------------+----------+---------+
//! ```
//!
//! - **Write** (`W`): host → radio, carries a payload and a trailing `0x06`
//! - **Read** (`R`): host → radio, no payload; the radio answers with a `W` frame
//! - **Erase** (`E`): host → radio, `len` is the erase chunk size
//!
//! Besides frames, a session uses a few raw literals: `PROGRAM` to enter
//! programming mode, `0x02` for the identification handshake, and `END` to
//! commit/leave.
//!
//! # Example
//!
//! ```rust
//! use dmrprog_protocol::FrameCodec;
//!
//! let frame = FrameCodec::build_write(0x0080_0000, &[1, 2, 3]).unwrap();
//! let parsed = FrameCodec::parse_response(0x0080_0000, 3, &frame).unwrap();
//! assert_eq!(parsed.payload, vec![1, 2, 3]);
//! assert!(parsed.checksum_ok());
//! ```

mod cancel;
mod constants;
mod error;
mod frame;
pub mod inbound;

pub use cancel::*;
pub use constants::*;
pub use error::*;
pub use frame::*;
pub use inbound::{InboundBuffer, InboundError, InboundSender};
