//! Zone membership records.
//!
//! Each zone owns one record of little-endian `u16` entries. An entry holds
//! `channel - 1`; `0xFFFF` ends the list.

use serde::{Deserialize, Serialize};

use crate::memory_map::ZONE_CHANNELS_RECORD_SIZE;

/// List terminator.
pub const END_OF_LIST: u16 = 0xFFFF;

/// Channel list of one zone as stored in its membership record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ZoneChannels {
    /// 1-based zone number.
    pub zone: u16,
    /// 1-based channel numbers.
    pub channels: Vec<u16>,
}

/// Converts between membership records and channel number lists.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZoneChannelsCodec;

impl ZoneChannelsCodec {
    /// Decode a record. Entries naming channels outside `1..=valid_channels`
    /// are dropped; a trailing odd byte is ignored.
    pub fn decode(raw: &[u8], valid_channels: u16) -> Vec<u16> {
        let mut out = Vec::new();
        for pair in raw.chunks_exact(2) {
            let entry = u16::from_le_bytes([pair[0], pair[1]]);
            if entry == END_OF_LIST {
                break;
            }
            let channel = entry as u32 + 1;
            if channel <= valid_channels as u32 {
                out.push(channel as u16);
            } else {
                log::trace!("dropping out-of-range channel {} in zone list", channel);
            }
        }
        out
    }

    /// Encode `channels` into a record of `record_size` bytes.
    ///
    /// Channel 0 is skipped. At most `record_size / 2 - 1` entries are kept
    /// so a terminator always fits; unused bytes are `0xFF`.
    pub fn encode(channels: &[u16], record_size: usize) -> Vec<u8> {
        let mut raw = vec![0xFFu8; record_size];
        let slots = (record_size / 2).saturating_sub(1);
        let kept = channels.iter().filter(|&&c| c >= 1).take(slots);
        let mut pos = 0;
        for &channel in kept {
            raw[pos..pos + 2].copy_from_slice(&(channel - 1).to_le_bytes());
            pos += 2;
        }
        if pos + 2 <= record_size {
            raw[pos..pos + 2].copy_from_slice(&END_OF_LIST.to_le_bytes());
        }
        raw
    }

    /// Encode into a record of the default size.
    pub fn encode_default(channels: &[u16]) -> Vec<u8> {
        Self::encode(channels, ZONE_CHANNELS_RECORD_SIZE)
    }
}
