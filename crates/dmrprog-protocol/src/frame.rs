//! Frame encoding/decoding utilities.
//!
//! Every memory operation is carried by a frame with a one-byte tag, a
//! big-endian 32-bit address and a one-byte length:
//!
//! ```text
//! +-----+----+----+----+----+-----+-------------------+-----+-------+
//! | tag | a3 | a2 | a1 | a0 | len | data[0..len]      | sum | [ACK] |
//! +-----+----+----+----+----+-----+-------------------+-----+-------+
//! ```
//!
//! `sum` is the 8-bit wrapping sum of the address bytes, the length byte and
//! the payload. Requests and responses use the same checksum function.

use bytes::BufMut;

use crate::constants::*;
use crate::error::{ProtocolError, ProtocolResult};

/// Compute the frame checksum over address, length and payload.
pub fn checksum(address: u32, len: u8, payload: &[u8]) -> u8 {
    address
        .to_be_bytes()
        .iter()
        .chain(std::iter::once(&len))
        .chain(payload.iter())
        .fold(0u8, |sum, b| sum.wrapping_add(*b))
}

/// A validated response frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Address carried by the frame.
    pub address: u32,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Checksum byte as received.
    pub checksum: u8,
    /// Checksum recomputed over the received content.
    pub computed: u8,
    /// Whether an ACK byte immediately follows the checksum.
    pub ack_present: bool,
}

impl ResponseFrame {
    /// Whether the received checksum matches the content.
    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.computed
    }

    /// Turn a checksum mismatch into an error.
    pub fn verified(self) -> ProtocolResult<Self> {
        if self.checksum_ok() {
            Ok(self)
        } else {
            Err(ProtocolError::ChecksumMismatch {
                address: self.address,
                received: self.checksum,
                computed: self.computed,
            })
        }
    }
}

/// Builds request frames and parses response frames.
///
/// The codec is stateless: reassembly of the byte stream is the job of
/// [`InboundBuffer`](crate::InboundBuffer), which hands over exactly as many
/// bytes as the pending request expects.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a write frame carrying `data`, followed by the ACK marker.
    pub fn build_write(address: u32, data: &[u8]) -> ProtocolResult<Vec<u8>> {
        let len = frame_len(data.len())?;
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + data.len() + 1);
        buf.put_u8(TAG_WRITE);
        buf.put_u32(address);
        buf.put_u8(len);
        buf.extend_from_slice(data);
        buf.put_u8(checksum(address, len, data));
        buf.put_u8(ACK);
        Ok(buf)
    }

    /// Encode a read request for `len` bytes at `address`.
    pub fn build_read(address: u32, len: usize) -> ProtocolResult<Vec<u8>> {
        let len = frame_len(len)?;
        Ok(Self::header_only(TAG_READ, address, len))
    }

    /// Encode an erase request for `chunk_len` bytes at `address`.
    pub fn build_erase(address: u32, chunk_len: u8) -> Vec<u8> {
        Self::header_only(TAG_ERASE, address, chunk_len)
    }

    fn header_only(tag: u8, address: u32, len: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN);
        buf.put_u8(tag);
        buf.put_u32(address);
        buf.put_u8(len);
        buf.put_u8(checksum(address, len, &[]));
        buf
    }

    /// Number of bytes the radio sends back for a read of `len` bytes
    /// (header, payload, checksum and trailing ACK).
    pub fn read_response_len(len: usize) -> usize {
        FRAME_HEADER_LEN + len + 1
    }

    /// Parse a response to a read of `expected_len` bytes at `expected_address`.
    ///
    /// Structural problems are errors. A checksum mismatch is not: it is
    /// reported through [`ResponseFrame::checksum_ok`] so the caller can decide
    /// whether to fail.
    pub fn parse_response(
        expected_address: u32,
        expected_len: usize,
        bytes: &[u8],
    ) -> ProtocolResult<ResponseFrame> {
        let Some(&tag) = bytes.first() else {
            return Err(ProtocolError::ShortFrame {
                expected: FRAME_HEADER_LEN,
                actual: 0,
            });
        };
        if tag != TAG_WRITE {
            return Err(ProtocolError::InvalidFrameTag(tag));
        }
        if bytes.len() < FRAME_HEADER_LEN {
            return Err(ProtocolError::ShortFrame {
                expected: FRAME_HEADER_LEN,
                actual: bytes.len(),
            });
        }

        let address = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        if address != expected_address {
            return Err(ProtocolError::AddressMismatch {
                expected: expected_address,
                actual: address,
            });
        }

        let size = bytes[FRAME_LEN_OFFSET];
        if size as usize != expected_len {
            return Err(ProtocolError::SizeMismatch {
                expected: expected_len,
                actual: size as usize,
            });
        }

        let data_end = FRAME_DATA_OFFSET + size as usize;
        if bytes.len() < data_end + 1 {
            return Err(ProtocolError::ShortFrame {
                expected: data_end + 1,
                actual: bytes.len(),
            });
        }

        let payload = bytes[FRAME_DATA_OFFSET..data_end].to_vec();
        let received = bytes[data_end];
        let computed = checksum(address, size, &payload);
        let ack_present = bytes.get(data_end + 1) == Some(&ACK);

        if received != computed {
            log::debug!(
                "checksum mismatch at 0x{:08X}: got 0x{:02X}, computed 0x{:02X}",
                address,
                received,
                computed
            );
        }

        Ok(ResponseFrame {
            address,
            payload,
            checksum: received,
            computed,
            ack_present,
        })
    }
}

fn frame_len(len: usize) -> ProtocolResult<u8> {
    u8::try_from(len).map_err(|_| ProtocolError::PayloadTooLarge {
        max: MAX_FRAME_PAYLOAD,
        actual: len,
    })
}
