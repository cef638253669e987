//! IEX-TP transport segments.
//!
//! Every UDP datagram carries one segment: a fixed 40-byte header followed by
//! `message_count` length-prefixed messages filling exactly `payload_length`
//! bytes. A segment with an empty payload is a heartbeat.
use time::OffsetDateTime;

use crate::convert::{decode_timestamp, ByteReader};
use crate::error::FramingError;

/// Size of the fixed segment header.
pub const HEADER_LEN: usize = 40;

/// Size of the little-endian length prefix in front of each message.
pub const LENGTH_PREFIX_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    /// IEX-TP version (1).
    pub version: u8,
    /// Identifies the higher-layer protocol (DEEP, TOPS).
    pub message_protocol_id: u16,
    pub channel_id: u32,
    pub session_id: u32,
    pub payload_length: u16,
    pub message_count: u16,
    /// Byte offset of this payload within the channel's data stream.
    pub stream_offset: i64,
    pub first_message_sequence_number: i64,
    /// Send time in nanoseconds since the Unix epoch.
    pub send_time: i64,
}

impl SegmentHeader {
    /// Parse the fixed header from the front of `buf`.
    pub fn parse(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < HEADER_LEN {
            return Err(FramingError::HeaderTooShort { need: HEADER_LEN, got: buf.len() });
        }
        let mut r = ByteReader::new(buf);
        let version = r.u8()?;
        r.skip(1)?;
        Ok(Self {
            version,
            message_protocol_id: r.u16()?,
            channel_id: r.u32()?,
            session_id: r.u32()?,
            payload_length: r.u16()?,
            message_count: r.u16()?,
            stream_offset: r.i64()?,
            first_message_sequence_number: r.i64()?,
            send_time: r.i64()?,
        })
    }

    pub fn send_time(&self) -> OffsetDateTime {
        decode_timestamp(self.send_time)
    }

    pub fn is_heartbeat(&self) -> bool {
        self.payload_length == 0
    }
}

/// One message inside a segment payload, borrowed from the datagram.
///
/// Only [`decode_segment`] builds frames, and it splits the tag off each
/// message as it goes, so a frame always has a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    offset: usize,
    tag: u8,
    body: &'a [u8],
}

impl<'a> Frame<'a> {
    /// Offset of the message bytes (after the length prefix) in the datagram.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Message type tag (first byte of the message).
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Message bytes following the tag.
    pub fn body(&self) -> &'a [u8] {
        self.body
    }

    /// Message length on the wire, tag included.
    pub fn wire_len(&self) -> usize {
        1 + self.body.len()
    }
}

/// Split a datagram into its header and message frames.
///
pub fn decode_segment(buf: &[u8]) -> Result<(SegmentHeader, Vec<Frame<'_>>), FramingError> {
    let header = SegmentHeader::parse(buf)?;
    let declared = header.payload_length;
    if buf.len() != HEADER_LEN + usize::from(declared) {
        return Err(FramingError::LengthMismatch { declared, actual: buf.len() - HEADER_LEN });
    }
    if header.is_heartbeat() {
        return Ok((header, Vec::new()));
    }

    let limit = buf.len();
    let mut frames = Vec::with_capacity(usize::from(header.message_count));
    let mut offset = HEADER_LEN;
    for index in 0..header.message_count {
        if offset + LENGTH_PREFIX_LEN > limit {
            return Err(FramingError::FrameOverrun { index, offset, limit });
        }
        let len = usize::from(u16::from_le_bytes([buf[offset], buf[offset + 1]]));
        let start = offset + LENGTH_PREFIX_LEN;
        if start + len > limit {
            return Err(FramingError::FrameOverrun { index, offset, limit });
        }
        let Some((&tag, body)) = buf[start..start + len].split_first() else {
            return Err(FramingError::EmptyFrame { index, offset });
        };
        frames.push(Frame { offset: start, tag, body });
        offset = start + len;
    }
    if offset != limit {
        return Err(FramingError::TrailingBytes {
            count: header.message_count,
            offset,
            remaining: limit - offset,
        });
    }
    Ok((header, frames))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a datagram with the given messages (tag included in each).
    pub(crate) fn make_segment(messages: &[&[u8]]) -> Vec<u8> {
        let mut payload = Vec::new();
        for m in messages {
            payload.extend_from_slice(&(m.len() as u16).to_le_bytes());
            payload.extend_from_slice(m);
        }
        make_segment_raw(messages.len() as u16, &payload)
    }

    pub(crate) fn make_segment_raw(message_count: u16, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());
        buf.push(1); // version
        buf.push(0); // reserved
        buf.extend_from_slice(&0x8004u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&0x42u32.to_le_bytes());
        buf.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        buf.extend_from_slice(&message_count.to_le_bytes());
        buf.extend_from_slice(&1_024i64.to_le_bytes());
        buf.extend_from_slice(&77i64.to_le_bytes());
        buf.extend_from_slice(&1_000_000_000i64.to_le_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn header_fields_decode() {
        let buf = make_segment(&[]);
        let (h, frames) = decode_segment(&buf).unwrap();
        assert_eq!(h.version, 1);
        assert_eq!(h.message_protocol_id, 0x8004);
        assert_eq!(h.channel_id, 1);
        assert_eq!(h.session_id, 0x42);
        assert_eq!(h.stream_offset, 1_024);
        assert_eq!(h.first_message_sequence_number, 77);
        assert_eq!(h.send_time().unix_timestamp(), 1);
        assert!(h.is_heartbeat());
        assert!(frames.is_empty());
    }

    #[test]
    fn frames_consume_exact_payload() {
        let a: &[u8] = &[0x53, b'O', 0, 0, 0, 0, 0, 0, 0, 0];
        let b: &[u8] = &[0x45, 1, 2];
        let buf = make_segment(&[a, b]);
        let (h, frames) = decode_segment(&buf).unwrap();
        assert_eq!(h.message_count, 2);
        assert_eq!(h.payload_length as usize, 2 + a.len() + 2 + b.len());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].tag(), 0x53);
        assert_eq!(frames[0].offset(), HEADER_LEN + 2);
        assert_eq!(frames[0].wire_len(), a.len());
        assert_eq!(frames[1].tag(), 0x45);
        assert_eq!(frames[1].body(), &[1, 2]);
    }

    #[test]
    fn single_byte_message_has_a_tag_and_empty_body() {
        let buf = make_segment(&[&[0x45]]);
        let (_, frames) = decode_segment(&buf).unwrap();
        assert_eq!(frames[0].tag(), 0x45);
        assert!(frames[0].body().is_empty());
        assert_eq!(frames[0].wire_len(), 1);
        assert_eq!(frames[0].offset(), HEADER_LEN + 2);
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut buf = make_segment(&[&[0x53, 1]]);
        buf.push(0);
        assert_eq!(
            decode_segment(&buf),
            Err(FramingError::LengthMismatch { declared: 4, actual: 5 })
        );
        assert!(matches!(
            decode_segment(&buf[..10]),
            Err(FramingError::HeaderTooShort { need: HEADER_LEN, got: 10 })
        ));
    }

    #[test]
    fn message_count_beyond_payload_is_rejected() {
        // One real message, header claims two.
        let mut payload = Vec::new();
        payload.extend_from_slice(&2u16.to_le_bytes());
        payload.extend_from_slice(&[0x53, 1]);
        let buf = make_segment_raw(2, &payload);
        assert_eq!(
            decode_segment(&buf),
            Err(FramingError::FrameOverrun { index: 1, offset: HEADER_LEN + 4, limit: HEADER_LEN + 4 })
        );
    }

    #[test]
    fn frame_length_past_boundary_is_rejected() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&9u16.to_le_bytes());
        payload.extend_from_slice(&[0x53, 1, 2]);
        let buf = make_segment_raw(1, &payload);
        assert!(matches!(decode_segment(&buf), Err(FramingError::FrameOverrun { index: 0, .. })));
    }

    #[test]
    fn leftover_payload_is_rejected() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u16.to_le_bytes());
        payload.push(0x53);
        payload.extend_from_slice(&[0xAA, 0xBB]);
        let buf = make_segment_raw(1, &payload);
        assert_eq!(
            decode_segment(&buf),
            Err(FramingError::TrailingBytes { count: 1, offset: HEADER_LEN + 3, remaining: 2 })
        );
    }

    #[test]
    fn zero_length_frame_is_rejected() {
        let buf = make_segment_raw(1, &0u16.to_le_bytes());
        assert_eq!(decode_segment(&buf), Err(FramingError::EmptyFrame { index: 0, offset: HEADER_LEN }));
    }
}
