//! Whole-codeplug transfers.
//!
//! [`BulkTransfer`] turns "read every channel" or "write these zones" into
//! the sequence of engine tasks that does it, laid out by a [`MemoryMap`].
//! Reads are queued without waiting; their records arrive as
//! [`EngineEvent::Decoded`](crate::EngineEvent::Decoded) events. Writes are
//! queued the same way and end with a terminal commit.

use std::time::{Duration, Instant};

use dmrprog_codeplug::{
    Channel, ChannelCodec, Codeplug, MemoryMap, Zone, ZoneChannelsCodec, ZoneCodec, ZoneDiff,
    CHANNEL_RECORD_SIZE,
};
use tracing::{debug, info, warn};

use crate::collect::RecordCollector;
use crate::engine::EngineHandle;
use crate::error::{EngineError, EngineResult};
use crate::task::{CommitMode, RecordKind, Request};

/// Channel records per read or write request.
pub const CHANNELS_PER_REQUEST: usize = 3;
/// Zone name records per read request.
pub const ZONE_NAMES_PER_REQUEST: usize = 7;

pub struct BulkTransfer {
    engine: EngineHandle,
    map: MemoryMap,
}

impl BulkTransfer {
    pub fn new(engine: EngineHandle, map: MemoryMap) -> Self {
        Self { engine, map }
    }

    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    /// Queue reads of every channel record. Returns the number of records
    /// that will be published.
    pub fn read_all_channels(&self) -> EngineResult<usize> {
        let mut expected = 0;
        for bank in self.map.banks() {
            let records = bank.channels as usize;
            let mut offset = 0;
            while offset < records {
                let count = CHANNELS_PER_REQUEST.min(records - offset);
                self.engine.submit_read_decode(
                    bank.base + (offset * CHANNEL_RECORD_SIZE) as u32,
                    count,
                    CHANNEL_RECORD_SIZE,
                    RecordKind::Channel {
                        first: bank.start_channel + offset as u16,
                    },
                )?;
                offset += count;
            }
            expected += records;
        }
        info!(expected, "channel read queued");
        Ok(expected)
    }

    /// Write `channels` (channel 1 first) to every channel slot, blanking
    /// slots past the end of the list, then commit.
    pub fn write_all_channels(&self, channels: &[Channel]) -> EngineResult<()> {
        if channels.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        let capacity = self.map.total_channels() as usize;
        if channels.len() > capacity {
            warn!(
                "{} channels given, radio holds {}; ignoring the rest",
                channels.len(),
                capacity
            );
        }

        let blank = Channel::default();
        for bank in self.map.banks() {
            let records = bank.channels as usize;
            let mut offset = 0;
            while offset < records {
                let count = CHANNELS_PER_REQUEST.min(records - offset);
                let mut data = Vec::with_capacity(count * CHANNEL_RECORD_SIZE);
                for k in 0..count {
                    let index = (bank.start_channel as usize - 1) + offset + k;
                    let channel = channels.get(index).unwrap_or(&blank);
                    data.extend_from_slice(&ChannelCodec::encode(channel));
                }
                self.queue_write(bank.base + (offset * CHANNEL_RECORD_SIZE) as u32, data)?;
                offset += count;
            }
        }
        info!(channels = channels.len().min(capacity), "channel write queued");
        self.commit()
    }

    /// Queue reads of every zone membership and zone name record. Returns
    /// the number of records that will be published.
    pub fn read_all_zones(&self) -> EngineResult<usize> {
        let layout = *self.map.zone_layout();
        let valid_channels = self.map.total_channels();

        for zone in 1..=layout.zone_count {
            let Some(address) = self.map.zone_channels_address(zone) else {
                continue;
            };
            self.engine.submit_read_decode(
                address,
                1,
                layout.channels_record_size,
                RecordKind::ZoneChannels {
                    first: zone,
                    valid_channels,
                },
            )?;
        }

        let zones = layout.zone_count as usize;
        let mut offset = 0;
        while offset < zones {
            let count = ZONE_NAMES_PER_REQUEST.min(zones - offset);
            let first = offset as u16 + 1;
            if let Some(address) = self.map.zone_name_address(first) {
                self.engine.submit_read_decode(
                    address,
                    count,
                    layout.name_record_size,
                    RecordKind::ZoneName { first },
                )?;
            }
            offset += count;
        }

        let expected = 2 * zones;
        info!(expected, "zone read queued");
        Ok(expected)
    }

    /// Write the zones that differ from `snapshot` (all of them without a
    /// snapshot), then commit. Zones in `snapshot` past the end of `zones`
    /// are cleared on the radio. Nothing is sent when no zone changed.
    pub fn write_all_zones(&self, zones: &[Zone], snapshot: Option<&[Zone]>) -> EngineResult<()> {
        if zones.is_empty() {
            return Err(EngineError::EmptyInput);
        }
        let layout = *self.map.zone_layout();
        let capacity = layout.zone_count as usize;
        if zones.len() > capacity {
            warn!(
                "{} zones given, radio holds {}; ignoring the rest",
                zones.len(),
                capacity
            );
        }

        let diff = ZoneDiff::between(snapshot, zones);
        if diff.is_empty() {
            info!("zones unchanged, nothing to write");
            return Ok(());
        }

        let blank = Zone::default();
        let slots = zones
            .len()
            .max(snapshot.map_or(0, <[Zone]>::len))
            .min(capacity);
        let mut written = 0;
        for i in 0..slots {
            let number = i as u16 + 1;
            let zone = zones.get(i).unwrap_or(&blank);
            if diff.name_dirty(number) {
                if let Some(address) = self.map.zone_name_address(number) {
                    let data = ZoneCodec::encode_name(&zone.name, layout.name_record_size);
                    self.queue_write(address, data)?;
                    written += 1;
                }
            }
            if diff.membership_dirty(number) {
                if let Some(address) = self.map.zone_channels_address(number) {
                    let data =
                        ZoneChannelsCodec::encode(&zone.channels, layout.channels_record_size);
                    self.queue_write(address, data)?;
                    written += 1;
                }
            }
        }
        info!(records = written, "zone write queued");
        self.commit()
    }

    /// Read every channel and wait for the result.
    pub fn read_channels(&self, timeout: Duration) -> EngineResult<Codeplug> {
        let events = self.engine.subscribe();
        let expected = self.read_all_channels()?;
        RecordCollector::new(events).collect(expected, Instant::now() + timeout)
    }

    /// Read every zone and wait for the result.
    pub fn read_zones(&self, timeout: Duration) -> EngineResult<Codeplug> {
        let events = self.engine.subscribe();
        let expected = self.read_all_zones()?;
        RecordCollector::new(events).collect(expected, Instant::now() + timeout)
    }

    fn queue_write(&self, base: u32, data: Vec<u8>) -> EngineResult<()> {
        debug!("queue {} bytes at 0x{:08X}", data.len(), base);
        self.engine
            .submit_detached(Request::WriteBulk { base, data })
            .map(|_| ())
            .map_err(|err| self.engine.first_error().unwrap_or(err))
    }

    /// Terminal commit. An earlier failure takes precedence over the
    /// commit's own result.
    fn commit(&self) -> EngineResult<()> {
        let result = self.engine.commit(CommitMode::Terminal);
        match self.engine.first_error() {
            Some(err) => Err(err),
            None => result.map(|_| ()),
        }
    }
}
