//! Protocol constants
//!
//! Tag bytes, literals, size limits and default timings used by the AnyTone
//! programming protocol.

// ============================================================================
// Frame tags
// ============================================================================

/// Write frame tag. Also used by the radio for read responses.
pub const TAG_WRITE: u8 = b'W';
/// Read request tag.
pub const TAG_READ: u8 = b'R';
/// Erase request tag.
pub const TAG_ERASE: u8 = b'E';

/// Acknowledge byte.
pub const ACK: u8 = 0x06;

// ============================================================================
// Frame geometry
// ============================================================================

/// Tag + 4 address bytes + length + checksum.
pub const FRAME_HEADER_LEN: usize = 7;
/// Offset of the length byte within a frame.
pub const FRAME_LEN_OFFSET: usize = 5;
/// Offset of the first payload byte within a frame.
pub const FRAME_DATA_OFFSET: usize = 6;
/// Largest payload a single frame can carry.
pub const MAX_FRAME_PAYLOAD: usize = 0xFF;
/// Largest payload the radio accepts per write frame while programming.
pub const BULK_WRITE_CHUNK: usize = 16;
/// Chunk size announced in erase frames.
pub const ERASE_CHUNK: u8 = 64;

// ============================================================================
// Session literals
// ============================================================================

/// Identification request.
pub const HANDSHAKE_REQUEST: u8 = 0x02;
/// Enter programming mode.
pub const PROGRAM_MODE_REQUEST: &[u8] = b"PROGRAM";
/// Leave programming mode / commit pending writes.
pub const END_REQUEST: &[u8] = b"END";
/// Length of the reply to [`PROGRAM_MODE_REQUEST`].
pub const PROGRAM_MODE_REPLY_LEN: usize = 3;

/// Identification banner returned by a D878UV in response to
/// [`HANDSHAKE_REQUEST`]: `"ID878UV\0"`, `0x0E`, `"V101\0\0"`, ACK.
pub const D878UV_BANNER: [u8; 16] = [
    0x49, 0x44, 0x38, 0x37, 0x38, 0x55, 0x56, 0x00, 0x0E, 0x56, 0x31, 0x30, 0x31, 0x00, 0x00,
    0x06,
];

// ============================================================================
// Default timings (milliseconds)
// ============================================================================

/// Time allowed for the handshake banner.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 4000;
/// Time allowed for the programming-mode reply.
pub const PROGRAM_MODE_TIMEOUT_MS: u64 = 4000;
/// Time allowed for a complete read response.
pub const READ_TIMEOUT_MS: u64 = 4000;
/// Time allowed for the ACK after a write frame.
pub const WRITE_ACK_TIMEOUT_MS: u64 = 5000;
/// Time allowed for the ACK after an erase frame.
pub const ERASE_ACK_TIMEOUT_MS: u64 = 3000;
/// Time allowed for the ACK after a commit.
pub const COMMIT_ACK_TIMEOUT_MS: u64 = 1000;
/// Granularity of blocking waits on the inbound queue.
pub const POLL_SLICE_MS: u64 = 100;
