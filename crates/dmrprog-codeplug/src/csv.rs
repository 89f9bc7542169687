//! CSV import and export of channels and zones.
//!
//! Channel files use the column names of the vendor programming software, so
//! its exports can be imported directly; columns are matched by header name
//! and unknown ones are ignored. Zone files are two columns:
//!
//! ```text
//! ZoneName,Channels
//! Local Repeaters,"1 2 3 4 10"
//! ```

use std::io::{BufRead, Write};

use crate::channel::{Admit, Bandwidth, Channel, Power, Timeslot};
use crate::error::{CodeplugError, CodeplugResult};
use crate::zone::Zone;

const COL_NUMBER: &str = "No.";
const COL_NAME: &str = "Channel Name";
const COL_RX: &str = "Receive Frequency";
const COL_TX: &str = "Transmit Frequency";
const COL_TYPE: &str = "Channel Type";
const COL_POWER: &str = "Transmit Power";
const COL_BANDWIDTH: &str = "Band Width";
const COL_CONTACT_ID: &str = "Contact ID";
const COL_RADIO_ID: &str = "Radio ID";
const COL_ADMIT: &str = "Busy Lock/TX Permit";
const COL_COLOR_CODE: &str = "RX Color Code";
const COL_SLOT: &str = "Slot";

const CHANNEL_COLUMNS: [&str; 12] = [
    COL_NUMBER,
    COL_NAME,
    COL_RX,
    COL_TX,
    COL_TYPE,
    COL_POWER,
    COL_BANDWIDTH,
    COL_CONTACT_ID,
    COL_RADIO_ID,
    COL_ADMIT,
    COL_COLOR_CODE,
    COL_SLOT,
];

const ZONE_HEADER: &str = "ZoneName,Channels";

// ============================================================================
// Field helpers
// ============================================================================

/// Split one CSV line, honouring double quotes and `""` escapes.
fn split_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn format_mhz(hz: u64) -> String {
    if hz == 0 {
        String::new()
    } else {
        format!("{:.5}", hz as f64 / 1_000_000.0)
    }
}

/// Parse a frequency in MHz (`"439.46250"`, `"439.4625 MHz"`) or in Hz.
fn parse_frequency(value: &str) -> Option<u64> {
    let value = value.trim().trim_end_matches("MHz").trim();
    if value.is_empty() {
        return Some(0);
    }
    if value.contains('.') {
        let mhz: f64 = value.parse().ok()?;
        if !(0.0..=10_000.0).contains(&mhz) {
            return None;
        }
        return Some((mhz * 1_000_000.0).round() as u64);
    }
    value.parse().ok()
}

fn parse_bandwidth(value: &str) -> Bandwidth {
    let value = value.trim().trim_end_matches(['K', 'k']);
    match value.parse::<f64>() {
        Ok(khz) if khz >= 25.0 => Bandwidth::Wide,
        _ => Bandwidth::Narrow,
    }
}

fn parse_number<T: std::str::FromStr + Default>(value: &str) -> T {
    value.trim().parse().unwrap_or_default()
}

struct Columns {
    index: Vec<Option<usize>>,
}

impl Columns {
    fn from_header(header: &[String]) -> Self {
        let index = CHANNEL_COLUMNS
            .iter()
            .map(|name| header.iter().position(|h| h.trim() == *name))
            .collect();
        Columns { index }
    }

    fn get<'a>(&self, row: &'a [String], name: &str) -> &'a str {
        CHANNEL_COLUMNS
            .iter()
            .position(|c| *c == name)
            .and_then(|i| self.index[i])
            .and_then(|i| row.get(i))
            .map(String::as_str)
            .unwrap_or("")
    }
}

// ============================================================================
// Channels
// ============================================================================

/// Write `channels` with a header row, numbering rows from 1.
pub fn write_channels<W: Write>(mut out: W, channels: &[Channel]) -> CodeplugResult<()> {
    let header: Vec<String> = CHANNEL_COLUMNS.iter().map(|c| quote(c)).collect();
    writeln!(out, "{}", header.join(","))?;

    for (i, ch) in channels.iter().enumerate() {
        let fields = [
            (i + 1).to_string(),
            ch.name.clone(),
            format_mhz(ch.rx_hz),
            format_mhz(ch.tx_hz),
            if ch.digital { "Digital" } else { "Analog" }.to_string(),
            ch.power.label().to_string(),
            match ch.bandwidth {
                Bandwidth::Narrow => "12.5K",
                Bandwidth::Wide => "25K",
            }
            .to_string(),
            ch.contact_id.to_string(),
            ch.radio_id_index.to_string(),
            ch.admit.label().to_string(),
            ch.color_code.to_string(),
            ch.timeslot.number().to_string(),
        ];
        let row: Vec<String> = fields.iter().map(|f| quote(f)).collect();
        writeln!(out, "{}", row.join(","))?;
    }
    Ok(())
}

/// Read channels. Blank lines are skipped; an empty input yields no channels.
pub fn read_channels<R: BufRead>(input: R) -> CodeplugResult<Vec<Channel>> {
    let mut lines = input.lines().enumerate();
    let columns = match lines.next() {
        Some((_, header)) => Columns::from_header(&split_line(&header?)),
        None => return Ok(Vec::new()),
    };

    let mut channels = Vec::new();
    for (i, line) in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = i + 1;
        let row = split_line(&line);

        let rx_hz = parse_frequency(columns.get(&row, COL_RX))
            .ok_or_else(|| CodeplugError::csv_at(line_no, "bad receive frequency"))?;
        let tx_hz = parse_frequency(columns.get(&row, COL_TX))
            .ok_or_else(|| CodeplugError::csv_at(line_no, "bad transmit frequency"))?;

        channels.push(Channel {
            name: columns.get(&row, COL_NAME).to_string(),
            rx_hz,
            tx_hz,
            digital: columns
                .get(&row, COL_TYPE)
                .trim()
                .to_ascii_lowercase()
                .starts_with("digi"),
            color_code: parse_number::<u8>(columns.get(&row, COL_COLOR_CODE)) & 0x0F,
            timeslot: Timeslot::from_number(parse_number(columns.get(&row, COL_SLOT))),
            contact_id: parse_number(columns.get(&row, COL_CONTACT_ID)),
            radio_id_index: parse_number(columns.get(&row, COL_RADIO_ID)),
            bandwidth: parse_bandwidth(columns.get(&row, COL_BANDWIDTH)),
            admit: Admit::from_label(columns.get(&row, COL_ADMIT)),
            power: Power::from_label(columns.get(&row, COL_POWER)),
            edited: false,
        });
    }
    Ok(channels)
}

// ============================================================================
// Zones
// ============================================================================

/// Write zones as `name,"n n n"` rows.
pub fn write_zones<W: Write>(mut out: W, zones: &[Zone]) -> CodeplugResult<()> {
    writeln!(out, "{}", ZONE_HEADER)?;
    for zone in zones {
        let channels: Vec<String> = zone.channels.iter().map(u16::to_string).collect();
        writeln!(out, "{},{}", quote(&zone.name), quote(&channels.join(" ")))?;
    }
    Ok(())
}

/// Read zones. Channel numbers may be separated by spaces, semicolons or
/// commas; numbers outside `1..=max_channels` are dropped.
pub fn read_zones<R: BufRead>(input: R, max_channels: u16) -> CodeplugResult<Vec<Zone>> {
    let mut zones = Vec::new();
    for (i, line) in input.lines().enumerate().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields = split_line(&line);
        if fields.len() < 2 {
            return Err(CodeplugError::csv_at(i + 1, "expected name and channel list"));
        }

        let mut channels = Vec::new();
        for token in fields[1..]
            .iter()
            .flat_map(|f| f.split([' ', ';', ',']))
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            let n: u32 = token.parse().map_err(|_| {
                CodeplugError::csv_at(i + 1, format!("bad channel number '{}'", token))
            })?;
            if (1..=max_channels as u32).contains(&n) {
                channels.push(n as u16);
            } else {
                log::debug!("line {}: dropping channel {} (max {})", i + 1, n, max_channels);
            }
        }
        zones.push(Zone::new(fields[0].trim(), channels));
    }
    Ok(zones)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_channels() -> Vec<Channel> {
        vec![
            Channel {
                name: "Rpt \"North\"".to_string(),
                rx_hz: 439_462_500,
                tx_hz: 431_862_500,
                digital: true,
                color_code: 3,
                timeslot: Timeslot::One,
                contact_id: 262,
                radio_id_index: 1,
                bandwidth: Bandwidth::Narrow,
                admit: Admit::ChannelFree,
                power: Power::Turbo,
                edited: false,
            },
            Channel {
                name: "Simplex, low".to_string(),
                rx_hz: 145_500_000,
                tx_hz: 145_500_000,
                bandwidth: Bandwidth::Wide,
                ..Channel::default()
            },
        ]
    }

    #[test]
    fn test_split_line_quotes() {
        assert_eq!(split_line(r#""a,b","c""d",e"#), vec!["a,b", "c\"d", "e"]);
        assert_eq!(split_line(""), vec![""]);
    }

    #[test]
    fn test_channels_write_then_read() {
        let mut buf = Vec::new();
        write_channels(&mut buf, &sample_channels()).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("\"No.\",\"Channel Name\""));
        assert!(text.contains("\"439.46250\""));

        let read = read_channels(buf.as_slice()).unwrap();
        assert_eq!(read, sample_channels());
    }

    #[test]
    fn test_read_channels_by_header_name() {
        let text = "\"Slot\",\"Channel Name\",\"Receive Frequency\",\"Other\",\"Transmit Power\"\n\
                    \"1\",\"Net\",\"446.00625 MHz\",\"x\",\"medium\"\n\
                    \n";
        let read = read_channels(text.as_bytes()).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].name, "Net");
        assert_eq!(read[0].rx_hz, 446_006_250);
        assert_eq!(read[0].tx_hz, 0);
        assert_eq!(read[0].timeslot, Timeslot::One);
        assert_eq!(read[0].power, Power::Mid);
    }

    #[test]
    fn test_read_channels_bad_frequency() {
        let text = "\"Channel Name\",\"Receive Frequency\"\n\"A\",\"145.5\"\n\"B\",\"abc\"\n";
        let err = read_channels(text.as_bytes()).unwrap_err();
        assert!(matches!(err, CodeplugError::Csv { line: 3, .. }));
    }

    #[test]
    fn test_read_channels_empty_input() {
        assert!(read_channels("".as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn test_zones_write_then_read() {
        let zones = vec![Zone::new("Local", vec![1, 2, 3]), Zone::new("Empty", vec![])];
        let mut buf = Vec::new();
        write_zones(&mut buf, &zones).unwrap();
        assert_eq!(
            String::from_utf8(buf.clone()).unwrap(),
            "ZoneName,Channels\n\"Local\",\"1 2 3\"\n\"Empty\",\"\"\n"
        );
        assert_eq!(read_zones(buf.as_slice(), 4000).unwrap(), zones);
    }

    #[test]
    fn test_read_zones_separators_and_range() {
        let text = "ZoneName,Channels\nMixed,\"4;5 6\",7\nBig,\"1 5000 0 2\"\n";
        let zones = read_zones(text.as_bytes(), 4000).unwrap();
        assert_eq!(zones[0], Zone::new("Mixed", vec![4, 5, 6, 7]));
        assert_eq!(zones[1], Zone::new("Big", vec![1, 2]));
    }

    #[test]
    fn test_read_zones_rejects_garbage() {
        let text = "ZoneName,Channels\nBad,\"1 two\"\n";
        assert!(matches!(
            read_zones(text.as_bytes(), 4000),
            Err(CodeplugError::Csv { line: 2, .. })
        ));
        let text = "ZoneName,Channels\nNoList\n";
        assert!(read_zones(text.as_bytes(), 4000).is_err());
    }
}
