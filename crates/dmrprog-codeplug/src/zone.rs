//! Zone name records and zone change tracking.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::channel::{latin1_bytes, latin1_until_nul};
use crate::memory_map::ZONE_NAME_RECORD_SIZE;

/// A named group of channels.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Zone {
    pub name: String,
    /// 1-based channel numbers in display order. Duplicates are allowed.
    pub channels: Vec<u16>,
}

impl Zone {
    pub fn new(name: impl Into<String>, channels: Vec<u16>) -> Self {
        Zone {
            name: name.into(),
            channels,
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Zone{{name='{}', channels={:?}}}", self.name, self.channels)
    }
}

/// Converts between 32-byte zone name records and names.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZoneCodec;

impl ZoneCodec {
    /// Decode the name held in `raw`, up to the first NUL.
    ///
    /// Erased flash (leading `0xFF`) reads as an empty name.
    pub fn decode_name(raw: &[u8]) -> String {
        if raw.first() == Some(&0xFF) {
            return String::new();
        }
        latin1_until_nul(raw)
    }

    /// Encode `name` into a zero-padded record of `record_size` bytes.
    ///
    /// At most `record_size - 1` bytes of name are kept so the record is
    /// always terminated.
    pub fn encode_name(name: &str, record_size: usize) -> Vec<u8> {
        let mut raw = vec![0u8; record_size];
        let bytes = latin1_bytes(name, record_size.saturating_sub(1));
        raw[..bytes.len()].copy_from_slice(&bytes);
        raw
    }

    /// Encode into a record of the default size.
    pub fn encode(name: &str) -> Vec<u8> {
        Self::encode_name(name, ZONE_NAME_RECORD_SIZE)
    }
}

/// Which zones differ between a snapshot and the current list.
///
/// Zone numbers are 1-based positions in the list. A zone present on only
/// one side counts as changed in both name and membership; a zone dropped
/// from the current list is written back blank.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZoneDiff {
    /// Zones whose name changed.
    pub names: BTreeSet<u16>,
    /// Zones whose channel list changed.
    pub memberships: BTreeSet<u16>,
}

impl ZoneDiff {
    /// Compare `current` against `snapshot`. With no snapshot every zone in
    /// `current` is dirty.
    pub fn between(snapshot: Option<&[Zone]>, current: &[Zone]) -> Self {
        let mut diff = ZoneDiff::default();
        let snapshot = snapshot.unwrap_or(&[]);
        let count = snapshot.len().max(current.len()).min(u16::MAX as usize);

        for i in 0..count {
            let number = i as u16 + 1;
            match (snapshot.get(i), current.get(i)) {
                (Some(old), Some(new)) => {
                    if old.name != new.name {
                        diff.names.insert(number);
                    }
                    if old.channels != new.channels {
                        diff.memberships.insert(number);
                    }
                }
                _ => {
                    diff.names.insert(number);
                    diff.memberships.insert(number);
                }
            }
        }
        diff
    }

    /// Mark every zone in `1..=count` dirty.
    pub fn all(count: u16) -> Self {
        let all: BTreeSet<u16> = (1..=count).collect();
        ZoneDiff {
            names: all.clone(),
            memberships: all,
        }
    }

    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.memberships.is_empty()
    }

    /// Whether zone `number`'s name must be written.
    pub fn name_dirty(&self, number: u16) -> bool {
        self.names.contains(&number)
    }

    /// Whether zone `number`'s membership must be written.
    pub fn membership_dirty(&self, number: u16) -> bool {
        self.memberships.contains(&number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_round_trip() {
        let raw = ZoneCodec::encode("Local");
        assert_eq!(raw.len(), 32);
        assert_eq!(&raw[..5], b"Local");
        assert!(raw[5..].iter().all(|&b| b == 0));
        assert_eq!(ZoneCodec::decode_name(&raw), "Local");
    }

    #[test]
    fn test_name_truncated_to_record() {
        let long = "Z".repeat(40);
        let raw = ZoneCodec::encode(&long);
        assert_eq!(raw[31], 0);
        assert_eq!(ZoneCodec::decode_name(&raw), "Z".repeat(31));
    }

    #[test]
    fn test_erased_record_is_empty() {
        assert_eq!(ZoneCodec::decode_name(&[0xFF; 32]), "");
        assert_eq!(ZoneCodec::decode_name(&[0; 32]), "");
    }

    #[test]
    fn test_diff_without_snapshot_marks_everything() {
        let zones = vec![Zone::new("A", vec![1]), Zone::new("B", vec![2])];
        let diff = ZoneDiff::between(None, &zones);
        assert_eq!(diff, ZoneDiff::all(2));
    }

    #[test]
    fn test_diff_tracks_names_and_memberships_separately() {
        let before = vec![
            Zone::new("A", vec![1, 2]),
            Zone::new("B", vec![3]),
            Zone::new("C", vec![4]),
        ];
        let mut after = before.clone();
        after[0].name = "Alpha".to_string();
        after[2].channels.push(5);

        let diff = ZoneDiff::between(Some(&before), &after);
        assert!(diff.name_dirty(1));
        assert!(!diff.membership_dirty(1));
        assert!(!diff.name_dirty(2) && !diff.membership_dirty(2));
        assert!(!diff.name_dirty(3));
        assert!(diff.membership_dirty(3));
    }

    #[test]
    fn test_diff_new_zone_is_dirty() {
        let before = vec![Zone::new("A", vec![1])];
        let after = vec![Zone::new("A", vec![1]), Zone::new("B", vec![])];
        let diff = ZoneDiff::between(Some(&before), &after);
        assert_eq!(diff.names.iter().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(diff.memberships.iter().copied().collect::<Vec<_>>(), vec![2]);
        assert!(ZoneDiff::between(Some(&before), &before).is_empty());
    }

    #[test]
    fn test_diff_removed_zone_is_dirty() {
        let before = vec![Zone::new("Keep", vec![1]), Zone::new("Gone", vec![2, 3])];
        let after = vec![Zone::new("Keep", vec![1])];
        let diff = ZoneDiff::between(Some(&before), &after);
        assert_eq!(diff.names.iter().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(diff.memberships.iter().copied().collect::<Vec<_>>(), vec![2]);
    }
}
