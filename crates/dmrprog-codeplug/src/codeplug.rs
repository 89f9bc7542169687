//! The in-memory codeplug assembled from decoded records.

use serde::{Deserialize, Serialize};

use crate::channel::Channel;
use crate::zone::Zone;

/// Channels and zones gathered from one read of the radio.
///
/// `channels[i]` is channel number `i + 1`; `zones[i]` is zone `i + 1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codeplug {
    pub channels: Vec<Channel>,
    pub zones: Vec<Zone>,
}

impl Codeplug {
    /// Channel by 1-based number.
    pub fn channel(&self, number: u16) -> Option<&Channel> {
        number
            .checked_sub(1)
            .and_then(|i| self.channels.get(i as usize))
    }

    /// Non-empty channels with their numbers.
    pub fn used_channels(&self) -> impl Iterator<Item = (u16, &Channel)> {
        self.channels
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.is_empty())
            .map(|(i, c)| (i as u16 + 1, c))
    }

    /// Zones that have a name or members.
    pub fn used_zones(&self) -> impl Iterator<Item = (u16, &Zone)> {
        self.zones
            .iter()
            .enumerate()
            .filter(|(_, z)| !z.name.is_empty() || !z.channels.is_empty())
            .map(|(i, z)| (i as u16 + 1, z))
    }

    /// Store `channel` as number `number`, growing the list with empty
    /// channels as needed.
    pub fn set_channel(&mut self, number: u16, channel: Channel) {
        if number == 0 {
            return;
        }
        let i = number as usize - 1;
        if self.channels.len() <= i {
            self.channels.resize(i + 1, Channel::default());
        }
        self.channels[i] = channel;
    }

    /// Zone by 1-based number, created empty if missing.
    pub fn zone_mut(&mut self, number: u16) -> Option<&mut Zone> {
        let i = (number as usize).checked_sub(1)?;
        if self.zones.len() <= i {
            self.zones.resize(i + 1, Zone::default());
        }
        self.zones.get_mut(i)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Timeslot;

    #[test]
    fn test_set_channel_grows() {
        let mut cp = Codeplug::default();
        let ch = Channel {
            name: "Three".to_string(),
            rx_hz: 145_000_000,
            ..Channel::default()
        };
        cp.set_channel(3, ch.clone());
        cp.set_channel(0, ch.clone());
        assert_eq!(cp.channels.len(), 3);
        assert_eq!(cp.channel(3), Some(&ch));
        assert_eq!(cp.channel(0), None);
        assert_eq!(cp.used_channels().map(|(n, _)| n).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_zone_mut_creates() {
        let mut cp = Codeplug::default();
        cp.zone_mut(2).unwrap().name = "Two".to_string();
        assert!(cp.zone_mut(0).is_none());
        assert_eq!(cp.zones.len(), 2);
        assert_eq!(cp.used_zones().count(), 1);
    }

    #[test]
    fn test_json_fills_missing_fields() {
        let cp: Codeplug = serde_json::from_str(
            r#"{"channels":[{"name":"Calling","rx_hz":145500000}],"zones":[{"name":"Z","channels":[1]}]}"#,
        )
        .unwrap();
        let ch = cp.channel(1).unwrap();
        assert_eq!(ch.name, "Calling");
        assert_eq!(ch.tx_hz, 0);
        assert_eq!(ch.timeslot, Timeslot::Two);
        assert_eq!(cp.zones[0], Zone::new("Z", vec![1]));

        let text = serde_json::to_string(&cp).unwrap();
        let back: Codeplug = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cp);
    }
}
