//! Byte-stream transports.
//!
//! A transport only writes. Bytes it receives are pushed into the
//! [`InboundSender`] it was constructed with, from whatever context it
//! receives them on; the engine worker reads them from the paired
//! [`InboundBuffer`](dmrprog_protocol::InboundBuffer).

use std::io::{self, Read, Write};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use dmrprog_protocol::InboundSender;
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use tracing::{debug, info, warn};

use crate::error::TransportError;

/// Half-duplex byte stream to the radio.
pub trait SerialTransport: Send {
    /// Write all of `bytes`.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Close and reopen the link.
    fn reopen(&mut self) -> Result<(), TransportError>;

    /// Close the link. Further writes fail with [`TransportError::Closed`].
    fn close(&mut self);

    /// Human-readable name for logs.
    fn name(&self) -> String;
}

// ============================================================================
// Port selection
// ============================================================================

/// Which serial port to open.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PortSelector {
    /// The first port found.
    #[default]
    First,
    /// The N-th port found (0-based).
    Index(usize),
    /// The first USB port with this vendor and product id.
    Usb { vid: u16, pid: u16 },
    /// A device path such as `/dev/ttyACM0` or `COM3`.
    Path(String),
}

/// Parse a `vid:pid` pair of hex numbers.
fn parse_vid_pid(s: &str) -> Option<(u16, u16)> {
    let (vid, pid) = s.split_once(':')?;
    let vid = u16::from_str_radix(vid, 16).ok()?;
    let pid = u16::from_str_radix(pid, 16).ok()?;
    Some((vid, pid))
}

impl FromStr for PortSelector {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(PortSelector::First);
        }
        if let Some(index) = s.strip_prefix("index:") {
            return index
                .parse()
                .map(PortSelector::Index)
                .map_err(|_| TransportError::InvalidSelector(s.to_string()));
        }
        if let Some((vid, pid)) = parse_vid_pid(s) {
            return Ok(PortSelector::Usb { vid, pid });
        }
        Ok(PortSelector::Path(s.to_string()))
    }
}

impl PortSelector {
    /// Resolve to a port path using the system's port list.
    pub fn resolve(&self) -> Result<String, TransportError> {
        if let PortSelector::Path(path) = self {
            return Ok(path.clone());
        }
        let ports = serialport::available_ports()
            .map_err(|e| TransportError::NotFound(e.to_string()))?;
        self.select(&ports)
    }

    /// Pick a port path from `ports`.
    pub fn select(&self, ports: &[SerialPortInfo]) -> Result<String, TransportError> {
        let found = match self {
            PortSelector::First => ports.first(),
            PortSelector::Index(i) => ports.get(*i),
            PortSelector::Usb { vid, pid } => ports.iter().find(|p| {
                matches!(&p.port_type, SerialPortType::UsbPort(usb) if usb.vid == *vid && usb.pid == *pid)
            }),
            PortSelector::Path(path) => return Ok(path.clone()),
        };
        found
            .map(|p| p.port_name.clone())
            .ok_or_else(|| TransportError::NotFound(self.to_string()))
    }
}

impl std::fmt::Display for PortSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PortSelector::First => write!(f, "first port"),
            PortSelector::Index(i) => write!(f, "index:{}", i),
            PortSelector::Usb { vid, pid } => write!(f, "{:04x}:{:04x}", vid, pid),
            PortSelector::Path(p) => write!(f, "{}", p),
        }
    }
}

// ============================================================================
// serialport-backed transport
// ============================================================================

/// Read timeout of the reader thread; bounds how long `close` waits for it.
const READER_POLL: Duration = Duration::from_millis(50);

struct ReaderThread {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Transport over a local serial port (8N1, no flow control).
pub struct SerialPortTransport {
    path: String,
    baud_rate: u32,
    inbound: InboundSender,
    port: Option<Box<dyn SerialPort>>,
    reader: Option<ReaderThread>,
}

impl SerialPortTransport {
    /// Open the port chosen by `selector`.
    pub fn open(
        selector: &PortSelector,
        baud_rate: u32,
        inbound: InboundSender,
    ) -> Result<Self, TransportError> {
        let path = selector.resolve()?;
        let mut transport = Self {
            path,
            baud_rate,
            inbound,
            port: None,
            reader: None,
        };
        transport.connect()?;
        Ok(transport)
    }

    fn connect(&mut self) -> Result<(), TransportError> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(READER_POLL)
            .open()
            .map_err(|e| TransportError::Open {
                port: self.path.clone(),
                message: e.to_string(),
            })?;
        let reader = port.try_clone().map_err(|e| TransportError::Open {
            port: self.path.clone(),
            message: e.to_string(),
        })?;

        self.reader = Some(spawn_reader(&self.path, reader, self.inbound.clone())?);
        self.port = Some(port);
        info!(port = %self.path, baud = self.baud_rate, "serial port open");
        Ok(())
    }
}

fn spawn_reader(
    path: &str,
    mut port: Box<dyn SerialPort>,
    inbound: InboundSender,
) -> Result<ReaderThread, TransportError> {
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();
    let handle = thread::Builder::new()
        .name(format!("serial-rx-{}", path))
        .spawn(move || {
            let mut buf = [0u8; 512];
            while !stop_flag.load(Ordering::Relaxed) {
                match port.read(&mut buf) {
                    Ok(0) => {}
                    Ok(n) => {
                        if !inbound.push(&buf[..n]) {
                            break;
                        }
                    }
                    Err(e) if e.kind() == io::ErrorKind::TimedOut => {}
                    Err(e) => {
                        warn!("serial read failed: {}", e);
                        break;
                    }
                }
            }
            debug!("serial reader exiting");
        })
        .map_err(|e| TransportError::Open {
            port: path.to_string(),
            message: e.to_string(),
        })?;
    Ok(ReaderThread { stop, handle })
}

impl SerialTransport for SerialPortTransport {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| TransportError::Write(e.to_string()))
    }

    fn reopen(&mut self) -> Result<(), TransportError> {
        self.close();
        self.connect()
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.stop.store(true, Ordering::Relaxed);
            if reader.handle.join().is_err() {
                warn!("serial reader panicked");
            }
        }
        if self.port.take().is_some() {
            debug!(port = %self.path, "serial port closed");
        }
    }

    fn name(&self) -> String {
        self.path.clone()
    }
}

impl Drop for SerialPortTransport {
    fn drop(&mut self) {
        self.close();
    }
}
