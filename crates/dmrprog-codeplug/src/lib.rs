//! Codeplug data model for AnyTone-family DMR radios.
//!
//! A radio's configuration (its "codeplug") lives in flash as fixed-size
//! records. This crate knows where those records are ([`MemoryMap`]) and how
//! to turn them into domain values and back:
//!
//! - [`ChannelCodec`]: 64-byte channel records
//! - [`ZoneCodec`]: 32-byte zone name records
//! - [`ZoneChannelsCodec`]: 512-byte zone membership records
//!
//! It performs no I/O against the radio. The [`csv`] module moves channels
//! and zones in and out of spreadsheet files.
//!
//! # Example
//!
//! ```rust
//! use dmrprog_codeplug::{Channel, ChannelCodec, MemoryMap};
//!
//! let map = MemoryMap::default();
//! assert_eq!(map.channel_index_to_address(1), Some(0x0080_0000));
//!
//! let ch = Channel { name: "Calling".into(), rx_hz: 145_500_000, tx_hz: 145_500_000, ..Default::default() };
//! let raw = ChannelCodec::encode(&ch);
//! assert_eq!(ChannelCodec::decode(&raw), ch);
//! ```

mod channel;
mod codeplug;
pub mod csv;
mod error;
mod memory_map;
mod zone;
mod zone_channels;

pub use channel::*;
pub use codeplug::Codeplug;
pub use error::*;
pub use memory_map::*;
pub use zone::*;
pub use zone_channels::*;
