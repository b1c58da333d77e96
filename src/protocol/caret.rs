//! Caret binary header: the compact, version-free fixed-layout sub-protocol.
//!
//! Also invented for this crate (see [`super::umbrella`]'s doc comment);
//! deliberately laid out differently from Umbrella — no version byte, and
//! `reply_flag` sits ahead of `type_id` — so the two binary parsers are not
//! interchangeable by accident:
//!
//! ```text
//! offset  size  field
//! 0       1     magic (0x1F)
//! 1       2     header_size, u16 big-endian
//! 3       4     body_size, u32 big-endian
//! 7       1     reply_flag (0 or 1)
//! 8       4     type_id, u32 big-endian
//! 12      8     request_id, u64 big-endian
//! 20..    ..    extension fields, skipped by this parser
//! ```

use byteorder::{BigEndian, ByteOrder};

use super::frame::{FrameDescriptor, ParseResult, MAX_FRAME_SIZE};

/// First byte identifying a Caret-framed connection.
pub const MAGIC: u8 = 0x1F;
/// Size of the fixed prefix described above.
pub const MIN_HEADER_SIZE: u32 = 20;

/// Parses a Caret header out of `bytes`.
///
/// Pure: reads `bytes` only, performs no allocation and no mutation.
pub fn parse(bytes: &[u8]) -> ParseResult {
    if bytes.len() < MIN_HEADER_SIZE as usize {
        return ParseResult::NotEnoughData;
    }
    if bytes[0] != MAGIC {
        return ParseResult::Malformed;
    }

    let header_size = u32::from(BigEndian::read_u16(&bytes[1..3]));
    let body_size = BigEndian::read_u32(&bytes[3..7]);
    let reply_flag = match bytes[7] {
        0 => false,
        1 => true,
        _ => return ParseResult::Malformed,
    };
    let type_id = BigEndian::read_u32(&bytes[8..12]);
    let request_id = BigEndian::read_u64(&bytes[12..20]);

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
