//! Umbrella binary header: the versioned fixed-layout sub-protocol.
//!
//! No reference byte layout shipped with this fragment's source pack, so
//! this crate defines its own bit-exact layout (documented here and
//! recorded as an open-question resolution):
//!
//! ```text
//! offset  size  field
//! 0       1     magic (0x81)
//! 1       1     version
//! 2       2     header_size, u16 big-endian
//! 4       4     body_size, u32 big-endian
//! 8       4     type_id, u32 big-endian
//! 12      8     request_id, u64 big-endian
//! 20      1     reply_flag (0 or 1)
//! 21..    ..    extension fields, skipped by this parser
//! ```

use byteorder::{BigEndian, ByteOrder};

use super::frame::{FrameDescriptor, ParseResult, MAX_FRAME_SIZE};

/// First byte identifying an Umbrella-framed connection.
pub const MAGIC: u8 = 0x81;
/// Current wire version this parser accepts.
pub const VERSION: u8 = 1;
/// Size of the fixed prefix described above; `header_size` must be at least
/// this large.
pub const MIN_HEADER_SIZE: u32 = 21;

/// Parses an Umbrella header out of `bytes`.
///
/// Pure: reads `bytes` only, performs no allocation and no mutation.
pub fn parse(bytes: &[u8]) -> ParseResult {
    if bytes.len() < MIN_HEADER_SIZE as usize {
        return ParseResult::NotEnoughData;
    }
    if bytes[0] != MAGIC {
        return ParseResult::Malformed;
    }
    if bytes[1] != VERSION {
        return ParseResult::Malformed;
    }

    let header_size = u32::from(BigEndian::read_u16(&bytes[2..4]));
    let body_size = BigEndian::read_u32(&bytes[4..8]);
    let type_id = BigEndian::read_u32(&bytes[8..12]);
    let request_id = BigEndian::read_u64(&bytes[12..20]);
    let reply_flag = match bytes[20] {
        0 => false,
        1 => true,
        _ => return ParseResult::Malformed,
    };

    if header_size < MIN_HEADER_SIZE {
        return ParseResult::Malformed;
    }
    match header_size.checked_add(body_size) {
        Some(total) if total <= MAX_FRAME_SIZE => {}
        _ => return ParseResult::Malformed,
    }
    if bytes.len() < header_size as usize {
        return ParseResult::NotEnoughData;
    }

    ParseResult::Ok(FrameDescriptor { header_size, body_size, type_id, request_id, reply_flag })
}
