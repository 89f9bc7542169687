//! Channel records.
//!
//! A channel occupies one 64-byte record:
//!
//! | Offset | Size | Field                                          |
//! |--------|------|------------------------------------------------|
//! | 0x00   | 4    | RX frequency, BCD, units of 10 Hz              |
//! | 0x04   | 4    | TX offset below RX, BCD, units of 10 Hz        |
//! | 0x08   | 1    | mode (bits 0-1: 0 analog, 1 digital)           |
//! | 0x11   | 1    | colour code (low nibble)                       |
//! | 0x18   | 3    | contact id, little-endian                      |
//! | 0x1D   | 1    | admit criterion                                |
//! | 0x1E   | 1    | bandwidth (1 = 25 kHz)                         |
//! | 0x1F   | 1    | radio-id index                                 |
//! | 0x20   | 1    | power level                                    |
//! | 0x23   | 17   | name, Latin-1, NUL-terminated                  |
//! | 0x34   | 1    | flags (bit 3 set = timeslot 1)                 |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::memory_map::CHANNEL_RECORD_SIZE;

const RX_OFFSET: usize = 0x00;
const SHIFT_OFFSET: usize = 0x04;
const MODE_OFFSET: usize = 0x08;
const COLOR_CODE_OFFSET: usize = 0x11;
const CONTACT_OFFSET: usize = 0x18;
const ADMIT_OFFSET: usize = 0x1D;
const BANDWIDTH_OFFSET: usize = 0x1E;
const RADIO_ID_OFFSET: usize = 0x1F;
const POWER_OFFSET: usize = 0x20;
const NAME_OFFSET: usize = 0x23;
const FLAGS_OFFSET: usize = 0x34;

const MODE_MASK: u8 = 0x03;
const MODE_DIGITAL: u8 = 0x01;
const FLAG_TIMESLOT_1: u8 = 0x08;

/// Longest name the codec writes, in bytes. The terminator takes the last
/// byte before the flags.
pub const MAX_NAME_LEN: usize = FLAGS_OFFSET - NAME_OFFSET - 1;

/// Largest frequency representable in 8 BCD digits of 10 Hz.
pub const MAX_FREQUENCY_HZ: u64 = 999_999_990;

/// DMR timeslot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Timeslot {
    /// Timeslot 1.
    One,
    /// Timeslot 2.
    #[default]
    Two,
}

impl Timeslot {
    /// Slot number, 1 or 2.
    pub fn number(self) -> u8 {
        match self {
            Timeslot::One => 1,
            Timeslot::Two => 2,
        }
    }

    /// Slot from its number. Anything but 1 is slot 2.
    pub fn from_number(n: u8) -> Self {
        if n == 1 {
            Timeslot::One
        } else {
            Timeslot::Two
        }
    }
}

/// Channel bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Bandwidth {
    /// 12.5 kHz.
    #[default]
    Narrow,
    /// 25 kHz.
    Wide,
}

impl Bandwidth {
    /// Bandwidth in kHz.
    pub fn khz(self) -> f64 {
        match self {
            Bandwidth::Narrow => 12.5,
            Bandwidth::Wide => 25.0,
        }
    }
}

/// Transmit admit criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Admit {
    /// Transmit regardless of channel state.
    #[default]
    Always,
    /// Transmit when no carrier with our colour code is present.
    ColorCodeFree,
    /// Transmit when the channel is idle.
    ChannelFree,
}

impl Admit {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Admit::ColorCodeFree,
            2 => Admit::ChannelFree,
            _ => Admit::Always,
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Admit::Always => 0,
            Admit::ColorCodeFree => 1,
            Admit::ChannelFree => 2,
        }
    }

    /// Label used in listings and CSV files.
    pub fn label(self) -> &'static str {
        match self {
            Admit::Always => "Always",
            Admit::ColorCodeFree => "CC Free",
            Admit::ChannelFree => "Channel Free",
        }
    }

    /// Parse a label, case-insensitively. Unknown labels are `Always`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        if label.eq_ignore_ascii_case("CC Free") {
            Admit::ColorCodeFree
        } else if label.eq_ignore_ascii_case("Channel Free") {
            Admit::ChannelFree
        } else {
            Admit::Always
        }
    }
}

/// Transmit power level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum Power {
    #[default]
    Low,
    Mid,
    High,
    Turbo,
}

impl Power {
    /// Level from its raw value, clamped to `Turbo`.
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Power::Low,
            1 => Power::Mid,
            2 => Power::High,
            _ => Power::Turbo,
        }
    }

    /// Raw value, 0..=3.
    pub fn to_raw(self) -> u8 {
        self as u8
    }

    /// Label used in listings and CSV files.
    pub fn label(self) -> &'static str {
        match self {
            Power::Low => "Low",
            Power::Mid => "Mid",
            Power::High => "High",
            Power::Turbo => "Turbo",
        }
    }

    /// Parse a label or a raw number. Unknown input is `Low`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Power::Low,
            "mid" | "med" | "medium" => Power::Mid,
            "high" => Power::High,
            "turbo" => Power::Turbo,
            other => other.parse::<u8>().map(Power::from_raw).unwrap_or_default(),
        }
    }
}

/// One radio channel.
///
/// `Channel::default()` is the canonical empty channel.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Channel {
    pub name: String,
    pub rx_hz: u64,
    /// Zero means simplex and reads back as `rx_hz`.
    pub tx_hz: u64,
    pub digital: bool,
    pub color_code: u8,
    pub timeslot: Timeslot,
    pub contact_id: u32,
    pub radio_id_index: u8,
    pub bandwidth: Bandwidth,
    pub admit: Admit,
    pub power: Power,
    /// Set by editors; never read from or written to the radio.
    pub edited: bool,
}

impl Channel {
    /// Whether this is the canonical empty channel.
    pub fn is_empty(&self) -> bool {
        self.name.is_empty() && self.rx_hz == 0
    }
}

fn fmt_mhz(hz: u64) -> String {
    if hz == 0 {
        "-".to_string()
    } else {
        format!("{:.5} MHz", hz as f64 / 1_000_000.0)
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (mode, cc, ts) = if self.digital {
            ("DMR", self.color_code.to_string(), self.timeslot.number().to_string())
        } else {
            ("Analog", "-".to_string(), "-".to_string())
        };
        write!(
            f,
            "Name: {}, Rx: {}, Tx: {}, Mode: {}, CC: {}, TS: {}, Contact ID: {}, \
             Radio ID Index: {}, Bandwidth: {:.1} kHz, Admit: {}, Power: {}",
            self.name,
            fmt_mhz(self.rx_hz),
            fmt_mhz(self.tx_hz),
            mode,
            cc,
            ts,
            self.contact_id,
            self.radio_id_index,
            self.bandwidth.khz(),
            self.admit.label(),
            self.power.label()
        )
    }
}

// ============================================================================
// BCD helpers
// ============================================================================

/// Decode 4 BCD bytes as Hz. Any nibble above 9 yields 0.
pub(crate) fn bcd4_to_hz(raw: &[u8]) -> u64 {
    let mut value = 0u64;
    for &b in &raw[..4] {
        let (hi, lo) = (b >> 4, b & 0x0F);
        if hi > 9 || lo > 9 {
            return 0;
        }
        value = value * 100 + (hi as u64) * 10 + lo as u64;
    }
    value * 10
}

/// Encode Hz as 4 BCD bytes, rounding down to 10 Hz.
pub(crate) fn hz_to_bcd4(hz: u64, out: &mut [u8]) {
    let mut value = hz.min(MAX_FREQUENCY_HZ) / 10;
    for slot in out[..4].iter_mut().rev() {
        let lo = (value % 10) as u8;
        value /= 10;
        let hi = (value % 10) as u8;
        value /= 10;
        *slot = (hi << 4) | lo;
    }
}

/// Latin-1 bytes up to the first NUL.
pub(crate) fn latin1_until_nul(raw: &[u8]) -> String {
    raw.iter().take_while(|&&b| b != 0).map(|&b| b as char).collect()
}

/// Latin-1 encoding of `s`, at most `max` bytes. Characters outside Latin-1
/// become `?`.
pub(crate) fn latin1_bytes(s: &str, max: usize) -> Vec<u8> {
    s.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .take(max)
        .collect()
}

fn is_blank_record(raw: &[u8]) -> bool {
    raw.iter().all(|&b| b == 0x00) || raw.iter().all(|&b| b == 0xFF)
}

// ============================================================================
// Codec
// ============================================================================

/// Converts between 64-byte records and [`Channel`]s.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelCodec;

impl ChannelCodec {
    /// Decode one record.
    ///
    /// Short, blank, and nameless zero-frequency records all decode to
    /// `Channel::default()`.
    pub fn decode(raw: &[u8]) -> Channel {
        if raw.len() < CHANNEL_RECORD_SIZE {
            return Channel::default();
        }
        let raw = &raw[..CHANNEL_RECORD_SIZE];
        if is_blank_record(raw) {
            return Channel::default();
        }

        let name = latin1_until_nul(&raw[NAME_OFFSET..FLAGS_OFFSET]);
        let rx_hz = bcd4_to_hz(&raw[RX_OFFSET..]);
        if name.is_empty() && rx_hz == 0 {
            return Channel::default();
        }

        let shift = bcd4_to_hz(&raw[SHIFT_OFFSET..]);
        let tx_hz = if shift > 0 { rx_hz.saturating_sub(shift) } else { rx_hz };

        Channel {
            name,
            rx_hz,
            tx_hz,
            digital: raw[MODE_OFFSET] & MODE_MASK == MODE_DIGITAL,
            color_code: raw[COLOR_CODE_OFFSET] & 0x0F,
            timeslot: if raw[FLAGS_OFFSET] & FLAG_TIMESLOT_1 != 0 {
                Timeslot::One
            } else {
                Timeslot::Two
            },
            contact_id: u32::from_le_bytes([
                raw[CONTACT_OFFSET],
                raw[CONTACT_OFFSET + 1],
                raw[CONTACT_OFFSET + 2],
                0,
            ]),
            radio_id_index: raw[RADIO_ID_OFFSET],
            bandwidth: if raw[BANDWIDTH_OFFSET] == 1 {
                Bandwidth::Wide
            } else {
                Bandwidth::Narrow
            },
            admit: Admit::from_raw(raw[ADMIT_OFFSET]),
            power: Power::from_raw(raw[POWER_OFFSET]),
            edited: false,
        }
    }

    /// Encode one channel into a fresh 64-byte record.
    ///
    /// Names are cut to [`MAX_NAME_LEN`] bytes. A TX frequency of zero or
    /// above RX is stored as no shift, so it decodes as `rx_hz`.
    pub fn encode(channel: &Channel) -> [u8; CHANNEL_RECORD_SIZE] {
        let mut raw = [0u8; CHANNEL_RECORD_SIZE];

        hz_to_bcd4(channel.rx_hz, &mut raw[RX_OFFSET..]);
        // TX above RX cannot be expressed as a shift.
        let shift = if channel.tx_hz != 0 && channel.tx_hz < channel.rx_hz {
            channel.rx_hz - channel.tx_hz
        } else {
            0
        };
        hz_to_bcd4(shift, &mut raw[SHIFT_OFFSET..]);

        raw[MODE_OFFSET] = if channel.digital { MODE_DIGITAL } else { 0 };
        raw[COLOR_CODE_OFFSET] = channel.color_code & 0x0F;
        raw[CONTACT_OFFSET..CONTACT_OFFSET + 3]
            .copy_from_slice(&(channel.contact_id & 0x00FF_FFFF).to_le_bytes()[..3]);
        raw[ADMIT_OFFSET] = channel.admit.to_raw();
        raw[BANDWIDTH_OFFSET] = match channel.bandwidth {
            Bandwidth::Wide => 1,
            Bandwidth::Narrow => 0,
        };
        raw[RADIO_ID_OFFSET] = channel.radio_id_index;
        raw[POWER_OFFSET] = channel.power.to_raw();

        let name = latin1_bytes(&channel.name, MAX_NAME_LEN);
        raw[NAME_OFFSET..NAME_OFFSET + name.len()].copy_from_slice(&name);
        raw[NAME_OFFSET + name.len()] = 0;

        if channel.timeslot == Timeslot::One {
            raw[FLAGS_OFFSET] |= FLAG_TIMESLOT_1;
        }

        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Channel {
        Channel {
            name: "Repeater".to_string(),
            rx_hz: 439_462_500,
            tx_hz: 431_862_500,
            digital: true,
            color_code: 1,
            timeslot: Timeslot::One,
            contact_id: 2_621_000,
            radio_id_index: 2,
            bandwidth: Bandwidth::Narrow,
            admit: Admit::ColorCodeFree,
            power: Power::High,
            edited: false,
        }
    }

    #[test]
    fn test_blank_records_decode_empty() {
        assert_eq!(ChannelCodec::decode(&[0u8; 64]), Channel::default());
        assert_eq!(ChannelCodec::decode(&[0xFFu8; 64]), Channel::default());
        assert_eq!(ChannelCodec::decode(&[0x12u8; 32]), Channel::default());

        // Nameless with zero RX but other bytes set.
        let mut raw = [0u8; 64];
        raw[POWER_OFFSET] = 2;
        raw[COLOR_CODE_OFFSET] = 7;
        assert_eq!(ChannelCodec::decode(&raw), Channel::default());
    }

    #[test]
    fn test_field_layout() {
        let raw = ChannelCodec::encode(&sample());
        assert_eq!(&raw[0..4], &[0x43, 0x94, 0x62, 0x50]);
        assert_eq!(&raw[4..8], &[0x00, 0x76, 0x00, 0x00]);
        assert_eq!(raw[MODE_OFFSET], 1);
        assert_eq!(raw[COLOR_CODE_OFFSET], 1);
        assert_eq!(&raw[0x18..0x1B], &[0x48, 0xFE, 0x27]);
        assert_eq!(raw[ADMIT_OFFSET], 1);
        assert_eq!(raw[BANDWIDTH_OFFSET], 0);
        assert_eq!(raw[RADIO_ID_OFFSET], 2);
        assert_eq!(raw[POWER_OFFSET], 2);
        assert_eq!(&raw[0x23..0x2B], b"Repeater");
        assert_eq!(raw[0x2B], 0);
        assert_eq!(raw[FLAGS_OFFSET] & FLAG_TIMESLOT_1, FLAG_TIMESLOT_1);
    }

    #[test]
    fn test_encode_decode_preserves_fields() {
        let ch = sample();
        assert_eq!(ChannelCodec::decode(&ChannelCodec::encode(&ch)), ch);

        let analog = Channel {
            name: "Simplex".to_string(),
            rx_hz: 145_500_000,
            tx_hz: 145_500_000,
            bandwidth: Bandwidth::Wide,
            ..Channel::default()
        };
        assert_eq!(ChannelCodec::decode(&ChannelCodec::encode(&analog)), analog);
    }

    #[test]
    fn test_tx_above_rx_clamps_shift() {
        let ch = Channel {
            name: "Up".to_string(),
            rx_hz: 430_000_000,
            tx_hz: 438_000_000,
            ..Channel::default()
        };
        let raw = ChannelCodec::encode(&ch);
        assert_eq!(&raw[4..8], &[0, 0, 0, 0]);
        assert_eq!(ChannelCodec::decode(&raw).tx_hz, 430_000_000);
    }

    #[test]
    fn test_encode_masks_and_rounds() {
        let ch = Channel {
            name: "Masked".to_string(),
            rx_hz: 446_006_255,
            color_code: 0x1F,
            contact_id: 0x0A12_3456,
            ..Channel::default()
        };
        let decoded = ChannelCodec::decode(&ChannelCodec::encode(&ch));
        assert_eq!(decoded.rx_hz, 446_006_250);
        assert_eq!(decoded.color_code, 0x0F);
        assert_eq!(decoded.contact_id, 0x12_3456);
    }

    #[test]
    fn test_power_clamps_on_decode() {
        let mut raw = ChannelCodec::encode(&sample());
        raw[POWER_OFFSET] = 9;
        assert_eq!(ChannelCodec::decode(&raw).power, Power::Turbo);
    }

    #[test]
    fn test_invalid_bcd_reads_zero() {
        let mut raw = ChannelCodec::encode(&sample());
        raw[1] = 0x9A;
        let ch = ChannelCodec::decode(&raw);
        assert_eq!(ch.rx_hz, 0);
        assert_eq!(ch.name, "Repeater");
    }

    #[test]
    fn test_long_name_truncated_with_terminator() {
        let ch = Channel {
            name: "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789".to_string(),
            rx_hz: 145_000_000,
            digital: true,
            timeslot: Timeslot::One,
            ..Channel::default()
        };
        let raw = ChannelCodec::encode(&ch);
        assert_eq!(MAX_NAME_LEN, 16);
        assert_eq!(raw[NAME_OFFSET + MAX_NAME_LEN], 0);
        assert_eq!(raw[FLAGS_OFFSET], FLAG_TIMESLOT_1);
        let decoded = ChannelCodec::decode(&raw);
        assert_eq!(decoded.name, &ch.name[..MAX_NAME_LEN]);
        assert_eq!(decoded.timeslot, Timeslot::One);
    }

    #[test]
    fn test_round_trip_every_name_length() {
        for len in 0..=MAX_NAME_LEN {
            for digital in [false, true] {
                for timeslot in [Timeslot::One, Timeslot::Two] {
                    let ch = Channel {
                        name: "N".repeat(len),
                        rx_hz: 438_500_000,
                        tx_hz: 431_100_000,
                        digital,
                        color_code: 3,
                        timeslot,
                        contact_id: 3_100,
                        ..Channel::default()
                    };
                    assert_eq!(
                        ChannelCodec::decode(&ChannelCodec::encode(&ch)),
                        ch,
                        "name length {}, digital {}, {:?}",
                        len,
                        digital,
                        timeslot
                    );
                }
            }
        }
    }

    #[test]
    fn test_round_trip_frequency_edges() {
        let cases = [
            (MAX_FREQUENCY_HZ, MAX_FREQUENCY_HZ),
            (MAX_FREQUENCY_HZ, 10),
            (10, 10),
            (145_500_000, 145_499_990),
            (440_000_000, 100_000_000),
        ];
        for (rx_hz, tx_hz) in cases {
            let ch = Channel {
                name: "Edge".to_string(),
                rx_hz,
                tx_hz,
                ..Channel::default()
            };
            assert_eq!(
                ChannelCodec::decode(&ChannelCodec::encode(&ch)),
                ch,
                "rx {} tx {}",
                rx_hz,
                tx_hz
            );
        }
    }

    #[test]
    fn test_zero_tx_reads_back_as_simplex() {
        let ch = Channel {
            name: "Listen".to_string(),
            rx_hz: 162_550_000,
            tx_hz: 0,
            ..Channel::default()
        };
        let raw = ChannelCodec::encode(&ch);
        assert_eq!(&raw[4..8], &[0, 0, 0, 0]);
        assert_eq!(ChannelCodec::decode(&raw).tx_hz, 162_550_000);
    }

    #[test]
    fn test_decode_stops_name_at_flags() {
        // A record written by other software with a name running into 0x34.
        let mut raw = ChannelCodec::encode(&sample());
        raw[NAME_OFFSET..FLAGS_OFFSET].copy_from_slice(&[b'X'; 17]);
        raw[FLAGS_OFFSET] = FLAG_TIMESLOT_1;
        raw[FLAGS_OFFSET + 1] = b'Y';
        let ch = ChannelCodec::decode(&raw);
        assert_eq!(ch.name, "X".repeat(17));
        assert_eq!(ch.timeslot, Timeslot::One);
    }

    #[test]
    fn test_latin1_name() {
        let ch = Channel {
            name: "Köln Ω".to_string(),
            rx_hz: 145_000_000,
            ..Channel::default()
        };
        let raw = ChannelCodec::encode(&ch);
        assert_eq!(&raw[0x23..0x29], &[b'K', 0xF6, b'l', b'n', b' ', b'?']);
        assert_eq!(ChannelCodec::decode(&raw).name, "Köln ?");
    }

    #[test]
    fn test_display() {
        let text = sample().to_string();
        assert!(text.starts_with("Name: Repeater, Rx: 439.46250 MHz, Tx: 431.86250 MHz, Mode: DMR"));
        assert!(text.contains("CC: 1, TS: 1"));
        assert!(text.ends_with("Bandwidth: 12.5 kHz, Admit: CC Free, Power: High"));

        let text = Channel::default().to_string();
        assert!(text.contains("Rx: -, Tx: -, Mode: Analog, CC: -, TS: -"));
    }
}
