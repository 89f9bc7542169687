//! Radio memory map.
//!
//! Channel records live in a table of banks spread over the flash address
//! space. Zone names and zone membership lists live in two separate, evenly
//! strided regions.
//!
//! | Region          | Base         | Stride | Record | Count        |
//! |-----------------|--------------|--------|--------|--------------|
//! | channels        | bank table   | 64     | 64     | 4000         |
//! | zone channels   | `0x01000000` | 0x200  | 512    | 250          |
//! | zone names      | `0x02540000` | 32     | 32     | 250          |

use serde::{Deserialize, Serialize};

use crate::error::{CodeplugError, CodeplugResult};

/// Size of one channel record in bytes.
pub const CHANNEL_RECORD_SIZE: usize = 64;
/// Size of one zone name record in bytes.
pub const ZONE_NAME_RECORD_SIZE: usize = 32;
/// Size of one zone membership record in bytes.
pub const ZONE_CHANNELS_RECORD_SIZE: usize = 512;

/// A contiguous region of channel records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bank {
    /// Address of the first record.
    pub base: u32,
    /// Size of the region in bytes.
    pub size_bytes: u32,
    /// Number of records that hold channels.
    pub channels: u16,
    /// First channel number (1-based, inclusive).
    pub start_channel: u16,
    /// Last channel number (inclusive).
    pub end_channel: u16,
}

impl Bank {
    /// Create a bank.
    pub const fn new(
        base: u32,
        size_bytes: u32,
        channels: u16,
        start_channel: u16,
        end_channel: u16,
    ) -> Self {
        Bank {
            base,
            size_bytes,
            channels,
            start_channel,
            end_channel,
        }
    }

    /// Number of 64-byte records the region can hold.
    pub fn record_count(&self) -> usize {
        self.size_bytes as usize / CHANNEL_RECORD_SIZE
    }

    /// Address of record `index` (0-based) within the bank.
    pub fn address_of_record(&self, index: usize) -> Option<u32> {
        if index < self.record_count() {
            Some(self.base + (index * CHANNEL_RECORD_SIZE) as u32)
        } else {
            None
        }
    }

    /// Whether channel `number` is stored in this bank.
    pub fn contains_channel(&self, number: u16) -> bool {
        (self.start_channel..=self.end_channel).contains(&number)
    }

    /// First address past the region.
    pub fn end_address(&self) -> u32 {
        self.base + self.size_bytes
    }
}

const fn d878uv_banks() -> [Bank; 32] {
    let mut banks = [Bank::new(0, 0, 0, 0, 0); 32];
    let mut i = 0;
    while i < 31 {
        let start = (i * 128 + 1) as u16;
        banks[i] = Bank::new(0x0080_0000 + (i as u32) * 0x0004_0000, 0x2000, 128, start, start + 127);
        i += 1;
    }
    // The last bank is shorter than its region.
    banks[31] = Bank::new(0x00FC_0000, 0x0880, 32, 3969, 4000);
    banks
}

/// Channel bank table of the D878UV.
pub const D878UV_BANKS: [Bank; 32] = d878uv_banks();

/// Placement of the zone name and zone membership records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneLayout {
    /// Address of zone 1's name record.
    pub name_base: u32,
    /// Size of a zone name record.
    pub name_record_size: usize,
    /// Address of zone 1's membership record.
    pub channels_base: u32,
    /// Distance between consecutive membership records.
    pub channels_stride: u32,
    /// Size of a membership record.
    pub channels_record_size: usize,
    /// Number of zones.
    pub zone_count: u16,
}

impl ZoneLayout {
    /// Zone layout of the D878UV.
    pub const D878UV: ZoneLayout = ZoneLayout {
        name_base: 0x0254_0000,
        name_record_size: ZONE_NAME_RECORD_SIZE,
        channels_base: 0x0100_0000,
        channels_stride: 0x200,
        channels_record_size: ZONE_CHANNELS_RECORD_SIZE,
        zone_count: 250,
    };
}

impl Default for ZoneLayout {
    fn default() -> Self {
        ZoneLayout::D878UV
    }
}

/// Maps logical channel and zone numbers to flash addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMap {
    banks: Vec<Bank>,
    zones: ZoneLayout,
}

impl Default for MemoryMap {
    fn default() -> Self {
        MemoryMap {
            banks: D878UV_BANKS.to_vec(),
            zones: ZoneLayout::D878UV,
        }
    }
}

impl MemoryMap {
    /// Build a map from a bank table and zone layout.
    ///
    /// Banks must be in ascending address order, non-overlapping, number
    /// channels consecutively from 1, and fit their records in their region.
    /// The zone regions must not overlap the banks or each other.
    pub fn new(banks: Vec<Bank>, zones: ZoneLayout) -> CodeplugResult<Self> {
        if banks.is_empty() {
            return Err(CodeplugError::invalid_banks("no banks"));
        }

        let mut next_channel = 1u16;
        let mut prev_end: Option<u32> = None;
        for (i, bank) in banks.iter().enumerate() {
            if bank.channels == 0 {
                return Err(CodeplugError::invalid_banks(format!("bank {} is empty", i)));
            }
            if bank.start_channel != next_channel {
                return Err(CodeplugError::invalid_banks(format!(
                    "bank {} starts at channel {}, expected {}",
                    i, bank.start_channel, next_channel
                )));
            }
            if bank.end_channel as u32 + 1 - bank.start_channel as u32 != bank.channels as u32 {
                return Err(CodeplugError::invalid_banks(format!(
                    "bank {} range {}..={} does not hold {} channels",
                    i, bank.start_channel, bank.end_channel, bank.channels
                )));
            }
            if bank.channels as usize > bank.record_count() {
                return Err(CodeplugError::invalid_banks(format!(
                    "bank {} holds {} channels in {} bytes",
                    i, bank.channels, bank.size_bytes
                )));
            }
            if let Some(end) = prev_end {
                if bank.base < end {
                    return Err(CodeplugError::invalid_banks(format!(
                        "bank {} at 0x{:08X} overlaps previous bank",
                        i, bank.base
                    )));
                }
            }
            prev_end = Some(bank.end_address());
            next_channel = bank.end_channel.wrapping_add(1);
        }

        let map = MemoryMap { banks, zones };
        map.check_regions_disjoint()?;
        Ok(map)
    }

    fn check_regions_disjoint(&self) -> CodeplugResult<()> {
        let zones = &self.zones;
        let count = zones.zone_count as u32;
        let first_bank = self.banks[0].base;
        let last_bank = self.banks[self.banks.len() - 1].end_address();
        let regions = [
            ("channels", first_bank, last_bank),
            (
                "zone names",
                zones.name_base,
                zones.name_base + count * zones.name_record_size as u32,
            ),
            (
                "zone channels",
                zones.channels_base,
                zones.channels_base + count * zones.channels_stride,
            ),
        ];
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                if a.1 < b.2 && b.1 < a.2 {
                    return Err(CodeplugError::invalid_banks(format!(
                        "{} region overlaps {} region",
                        a.0, b.0
                    )));
                }
            }
        }
        Ok(())
    }

    /// Channel banks in address order.
    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    /// Zone record placement.
    pub fn zone_layout(&self) -> &ZoneLayout {
        &self.zones
    }

    /// Highest valid channel number.
    pub fn total_channels(&self) -> u16 {
        self.banks.iter().map(|b| b.channels).sum()
    }

    /// Number of zones.
    pub fn total_zones(&self) -> u16 {
        self.zones.zone_count
    }

    /// Address of the record for 1-based channel `number`.
    ///
    /// Returns `None` for 0 and for numbers past the last bank.
    pub fn channel_index_to_address(&self, number: u16) -> Option<u32> {
        if number == 0 {
            return None;
        }
        let idx = self.banks.partition_point(|b| b.end_channel < number);
        let bank = self.banks.get(idx)?;
        if !bank.contains_channel(number) {
            return None;
        }
        bank.address_of_record((number - bank.start_channel) as usize)
    }

    /// Channel number stored at `address`, if it is the start of a channel record.
    pub fn address_to_channel_index(&self, address: u32) -> Option<u16> {
        let idx = self.banks.partition_point(|b| b.end_address() <= address);
        let bank = self.banks.get(idx)?;
        if address < bank.base {
            return None;
        }
        let offset = (address - bank.base) as usize;
        if offset % CHANNEL_RECORD_SIZE != 0 {
            return None;
        }
        let record = offset / CHANNEL_RECORD_SIZE;
        if record >= bank.channels as usize {
            return None;
        }
        Some(bank.start_channel + record as u16)
    }

    /// Address of the name record for 1-based `zone`.
    pub fn zone_name_address(&self, zone: u16) -> Option<u32> {
        self.zone_offset(zone)
            .map(|i| self.zones.name_base + i * self.zones.name_record_size as u32)
    }

    /// Address of the membership record for 1-based `zone`.
    pub fn zone_channels_address(&self, zone: u16) -> Option<u32> {
        self.zone_offset(zone)
            .map(|i| self.zones.channels_base + i * self.zones.channels_stride)
    }

    fn zone_offset(&self, zone: u16) -> Option<u32> {
        if zone == 0 || zone > self.zones.zone_count {
            None
        } else {
            Some(zone as u32 - 1)
        }
    }
}
