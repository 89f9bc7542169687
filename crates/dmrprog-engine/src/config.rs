//! Engine configuration.
//!
//! Every field has a default matching the D878UV, so an empty YAML document
//! is a valid configuration:
//!
//! ```yaml
//! read_timeout_ms: 6000
//! strict_checksum: false
//! serial:
//!   port: "28e9:018a"
//! ```

use std::path::Path;
use std::time::Duration;

use dmrprog_protocol::*;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Port selector: `vid:pid`, `index:N`, a device path, or empty for the first port.
    pub port: String,
    /// Line speed.
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: 115_200,
        }
    }
}

/// Protocol engine settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub handshake_timeout_ms: u64,
    pub program_mode_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_ack_timeout_ms: u64,
    pub erase_ack_timeout_ms: u64,
    pub commit_ack_timeout_ms: u64,
    /// Longest single blocking wait; bounds cancel latency.
    pub poll_slice_ms: u64,
    /// How long `finish` waits for queued work to drain.
    pub drain_timeout_ms: u64,
    /// Sub-chunk size for bulk writes.
    pub write_chunk: usize,
    /// Length byte of erase frames.
    pub erase_chunk: u8,
    /// Expected handshake reply, hex encoded.
    pub banner: String,
    /// Fail reads whose checksum does not match instead of logging.
    pub strict_checksum: bool,
    pub serial: SerialConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: HANDSHAKE_TIMEOUT_MS,
            program_mode_timeout_ms: PROGRAM_MODE_TIMEOUT_MS,
            read_timeout_ms: READ_TIMEOUT_MS,
            write_ack_timeout_ms: WRITE_ACK_TIMEOUT_MS,
            erase_ack_timeout_ms: ERASE_ACK_TIMEOUT_MS,
            commit_ack_timeout_ms: COMMIT_ACK_TIMEOUT_MS,
            poll_slice_ms: POLL_SLICE_MS,
            drain_timeout_ms: 120_000,
            write_chunk: BULK_WRITE_CHUNK,
            erase_chunk: ERASE_CHUNK,
            banner: hex::encode(D878UV_BANNER),
            strict_checksum: true,
            serial: SerialConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> EngineResult<Self> {
        let config: EngineConfig = if yaml.trim().is_empty() {
            EngineConfig::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| EngineError::Config(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_yaml_str(&text)
    }

    /// Check value ranges.
    pub fn validate(&self) -> EngineResult<()> {
        if self.write_chunk == 0 || self.write_chunk > MAX_FRAME_PAYLOAD {
            return Err(EngineError::Config(format!(
                "write_chunk must be 1..={}, got {}",
                MAX_FRAME_PAYLOAD, self.write_chunk
            )));
        }
        if self.erase_chunk == 0 {
            return Err(EngineError::Config("erase_chunk must be non-zero".into()));
        }
        if self.poll_slice_ms == 0 {
            return Err(EngineError::Config("poll_slice_ms must be non-zero".into()));
        }
        self.banner_bytes()?;
        Ok(())
    }

    /// Decoded handshake banner.
    pub fn banner_bytes(&self) -> EngineResult<Vec<u8>> {
        let bytes = hex::decode(self.banner.trim())
            .map_err(|e| EngineError::Config(format!("banner: {}", e)))?;
        if bytes.is_empty() {
            return Err(EngineError::Config("banner is empty".into()));
        }
        Ok(bytes)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn program_mode_timeout(&self) -> Duration {
        Duration::from_millis(self.program_mode_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.write_ack_timeout_ms)
    }

    pub fn erase_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.erase_ack_timeout_ms)
    }

    pub fn commit_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_ack_timeout_ms)
    }

    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}
