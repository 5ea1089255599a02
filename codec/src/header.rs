// Copyright (c) 2020 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::{FixedHeader, PacketType};
use crate::error::DecodeError;
use crate::var_int::{decode_remaining_length, encode_remaining_length};

/// Attempt to decode the fixed header (type+flags byte followed by the
/// Remaining Length variable-byte integer) from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete fixed header
/// (the caller should buffer more bytes), `Ok(Some((header, header_len)))`
/// on success, or `Err` for a malformed header that should close the
/// connection without DISCONNECT.
pub fn decode_fixed_header(buf: &[u8]) -> Result<Option<(FixedHeader, usize)>, DecodeError> {
    if buf.is_empty() {
        return Ok(None);
    }
    let first = buf[0];
    let packet_type = match PacketType::try_from(first >> 4) {
        Ok(t) => t,
        Err(e) => return Err(e),
    };
    let flags = first & 0x0f;

    let mut ba = crate::byte_array::ByteArray::new(&buf[1..]);
    let remaining_length = match decode_remaining_length(&mut ba) {
        Ok(v) => v,
        Err(DecodeError::Incomplete) => return Ok(None),
        Err(e) => return Err(e),
    };
    let header_len = 1 + ba.offset();

    let header = FixedHeader {
        packet_type,
        flags,
        remaining_length,
    };
    header.check_reserved_flags()?;
    Ok(Some((header, header_len)))
}

pub fn encode_fixed_header(
    buf: &mut Vec<u8>,
    packet_type: PacketType,
    flags: u8,
    remaining_length: usize,
) -> Result<(), crate::error::EncodeError> {
    buf.push(((packet_type as u8) << 4) | (flags & 0x0f));
    encode_remaining_length(buf, remaining_length)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn need_more_on_empty_buffer() {
        assert_eq!(decode_fixed_header(&[]), Ok(None));
    }

    #[test]
    fn need_more_on_truncated_remaining_length() {
        let buf = [0x30, 0xff];
        assert_eq!(decode_fixed_header(&buf), Ok(None));
    }

    #[test]
    fn decodes_a_simple_header() {
        let buf = [0x30, 0x02, b'h', b'i'];
        let (header, len) = decode_fixed_header(&buf).unwrap().unwrap();
        assert_eq!(header.packet_type, PacketType::Publish);
        assert_eq!(header.remaining_length, 2);
        assert_eq!(len, 2);
    }

    #[test]
    fn rejects_unknown_packet_type() {
        let buf = [0x00, 0x00];
        assert_eq!(decode_fixed_header(&buf), Err(DecodeError::InvalidPacketType));
    }

    #[test]
    fn rejects_reserved_flags_on_pubrel() {
        // PUBREL fixed flags must be 0b0010.
        let buf = [0x60, 0x02, 0x00, 0x01];
        assert_eq!(decode_fixed_header(&buf), Err(DecodeError::InvalidFixedHeaderFlags));
    }
}
