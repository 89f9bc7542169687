//! Protocol error types.

use thiserror::Error;

/// Errors raised while building or validating protocol frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload does not fit in the one-byte length field.
    #[error("payload too large: maximum {max} bytes, got {actual}")]
    PayloadTooLarge {
        /// Maximum allowed length.
        max: usize,
        /// Actual length requested.
        actual: usize,
    },

    /// Response did not start with the expected tag.
    #[error("invalid frame tag: 0x{0:02X}")]
    InvalidFrameTag(u8),

    /// Frame is too short to hold its header or declared payload.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    ShortFrame {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Response is for a different address than requested.
    #[error("address mismatch: expected 0x{expected:08X}, got 0x{actual:08X}")]
    AddressMismatch {
        /// Requested address.
        expected: u32,
        /// Address carried by the response.
        actual: u32,
    },

    /// Response carries a different payload size than requested.
    #[error("size mismatch: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Requested size.
        expected: usize,
        /// Size carried by the response.
        actual: usize,
    },

    /// Response checksum does not match its content.
    #[error("checksum mismatch at 0x{address:08X}: frame carries 0x{received:02X}, computed 0x{computed:02X}")]
    ChecksumMismatch {
        /// Address of the frame.
        address: u32,
        /// Checksum byte carried by the frame.
        received: u8,
        /// Checksum computed over the frame content.
        computed: u8,
    },

    /// Radio answered the identification request with an unexpected banner.
    #[error("handshake failed: unexpected banner {0:02X?}")]
    HandshakeFailed(Vec<u8>),
}

/// Result type alias for frame operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
