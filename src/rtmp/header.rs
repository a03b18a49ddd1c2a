// Chunk header codec: encode/decode of the four RTMP header formats, diffed
// against the last absolute header seen (or sent) on a channel.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::buffer::ByteBuffer;
use crate::error::RtmpError;

use super::constants::{
    RTMP_CHUNK_TYPE_0, RTMP_CHUNK_TYPE_1, RTMP_CHUNK_TYPE_2, RTMP_CHUNK_TYPE_3,
    RTMP_EXTENDED_TIMESTAMP_MARKER,
};

/// A fully-resolved absolute chunk header
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkHeader {
    pub channel_id: u32,
    pub timestamp: u32,
    pub body_length: u32,
    pub datatype: u8,
    pub stream_id: u32,
}

impl ChunkHeader {
    pub fn blank(channel_id: u32) -> ChunkHeader {
        ChunkHeader {
            channel_id,
            timestamp: 0,
            body_length: 0,
            datatype: 0,
            stream_id: 0,
        }
    }
}

/// Remembered header state for a channel, as used to diff the next header against
#[derive(Clone, Debug, Default)]
pub struct LastHeaderState {
    pub header: Option<ChunkHeader>,
    pub last_delta: u32,
}

/// Picks the smallest header format that represents `new` given `last`, and returns
/// the encoded bytes (basic header + message header + optional extended timestamp).
///
/// Returns the new `last_delta` the caller should remember for this channel.
pub fn encode_header(last: &LastHeaderState, new: &ChunkHeader) -> (Vec<u8>, u32) {
    let delta = match &last.header {
        Some(prev) => new.timestamp.wrapping_sub(prev.timestamp),
        None => new.timestamp,
    };

    let format = match &last.header {
        None => RTMP_CHUNK_TYPE_0,
        Some(prev) => {
            if prev.stream_id != new.stream_id {
                RTMP_CHUNK_TYPE_0
            } else if prev.datatype != new.datatype || prev.body_length != new.body_length {
                RTMP_CHUNK_TYPE_1
            } else if delta != last.last_delta {
                RTMP_CHUNK_TYPE_2
            } else {
                RTMP_CHUNK_TYPE_3
            }
        }
    };

    let mut out = encode_basic_header(format, new.channel_id);

    let timestamp_field = if format == RTMP_CHUNK_TYPE_0 {
        new.timestamp
    } else {
        delta
    };

    let use_extended_timestamp = format != RTMP_CHUNK_TYPE_3 && timestamp_field >= RTMP_EXTENDED_TIMESTAMP_MARKER;

    if format <= RTMP_CHUNK_TYPE_2 {
        out.extend(&u32_to_u24_be(if use_extended_timestamp {
            RTMP_EXTENDED_TIMESTAMP_MARKER
        } else {
            timestamp_field
        }));
    }

    if format <= RTMP_CHUNK_TYPE_1 {
        out.extend(&u32_to_u24_be(new.body_length));
        out.push(new.datatype);
    }

    if format == RTMP_CHUNK_TYPE_0 {
        let mut b = [0u8; 4];
        LittleEndian::write_u32(&mut b, new.stream_id);
        out.extend_from_slice(&b);
    }

    if use_extended_timestamp {
        let mut b = [0u8; 4];
        BigEndian::write_u32(&mut b, timestamp_field);
        out.extend_from_slice(&b);
    }

    (out, delta)
}

/// Decodes one chunk header from `buf`, resolving it against the last header
/// remembered for its channel via `lookup_last`. On short read, `buf`'s cursor is
/// left exactly where it was.
///
/// Returns the resolved absolute header, the delta applied (to remember as the new
/// `last_delta`), and the total number of header bytes consumed.
pub fn decode_header(
    buf: &mut ByteBuffer,
    lookup_last: impl Fn(u32) -> Option<LastHeaderState>,
) -> Result<(ChunkHeader, u32, usize), RtmpError> {
    let byte0 = buf.peek_at(0).map_err(|_| RtmpError::ShortRead)?;
    let format = byte0 >> 6;
    let cid_low = byte0 & 0x3f;

    let (channel_id, basic_len): (u32, usize) = match cid_low {
        0 => {
            let b1 = buf.peek_at(1).map_err(|_| RtmpError::ShortRead)?;
            (64 + b1 as u32, 2)
        }
        1 => {
            let b1 = buf.peek_at(1).map_err(|_| RtmpError::ShortRead)?;
            let b2 = buf.peek_at(2).map_err(|_| RtmpError::ShortRead)?;
            (64 + b1 as u32 + (b2 as u32) * 256, 3)
        }
        n => (n as u32, 1),
    };

    let message_header_len: usize = match format {
        0 => 11,
        1 => 7,
        2 => 3,
        _ => 0,
    };

    let total_before_ext = basic_len + message_header_len;
    let message_bytes = buf
        .peek(total_before_ext)
        .map_err(|_| RtmpError::ShortRead)?
        .to_vec();
    let mh = &message_bytes[basic_len..];

    let last_state = lookup_last(channel_id).unwrap_or_default();

    let (timestamp_field, body_length, datatype, stream_id) = match format {
        0 => {
            let ts = u24_be_to_u32(&mh[0..3]);
            let len = u24_be_to_u32(&mh[3..6]);
            let dt = mh[6];
            let sid = LittleEndian::read_u32(&mh[7..11]);
            (ts, len, dt, sid)
        }
        1 => {
            let delta = u24_be_to_u32(&mh[0..3]);
            let len = u24_be_to_u32(&mh[3..6]);
            let dt = mh[6];
            let sid = last_state
                .header
                .as_ref()
                .map(|h| h.stream_id)
                .unwrap_or(0);
            (delta, len, dt, sid)
        }
        2 => {
            let delta = u24_be_to_u32(&mh[0..3]);
            let (len, dt, sid) = match &last_state.header {
                Some(h) => (h.body_length, h.datatype, h.stream_id),
                None => (0, 0, 0),
            };
            (delta, len, dt, sid)
        }
        _ => {
            let (len, dt, sid) = match &last_state.header {
                Some(h) => (h.body_length, h.datatype, h.stream_id),
                None => (0, 0, 0),
            };
            (last_state.last_delta, len, dt, sid)
        }
    };

    let has_extended_timestamp = timestamp_field == RTMP_EXTENDED_TIMESTAMP_MARKER;
    let total_len = if has_extended_timestamp {
        total_before_ext + 4
    } else {
        total_before_ext
    };

    let ext_timestamp = if has_extended_timestamp {
        let b = buf.peek(total_len).map_err(|_| RtmpError::ShortRead)?;
        Some(BigEndian::read_u32(&b[total_before_ext..total_len]))
    } else {
        None
    };

    let resolved_timestamp_field = ext_timestamp.unwrap_or(timestamp_field);

    let (absolute_timestamp, delta) = match format {
        0 => (resolved_timestamp_field, resolved_timestamp_field),
        3 => (
            last_state
                .header
                .as_ref()
                .map(|h| h.timestamp.wrapping_add(last_state.last_delta))
                .unwrap_or(resolved_timestamp_field),
            last_state.last_delta,
        ),
        _ => (
            last_state
                .header
                .as_ref()
                .map(|h| h.timestamp.wrapping_add(resolved_timestamp_field))
                .unwrap_or(resolved_timestamp_field),
            resolved_timestamp_field,
        ),
    };

    buf.seek(total_len).map_err(|_| RtmpError::ShortRead)?;

    let header = ChunkHeader {
        channel_id,
        timestamp: absolute_timestamp,
        body_length,
        datatype,
        stream_id,
    };

    Ok((header, delta, total_len))
}

/// Encodes the basic header byte(s): format prefix + channel id
pub fn encode_basic_header(format: u8, channel_id: u32) -> Vec<u8> {
    if channel_id >= 64 + 255 {
        let extra = channel_id - 64;
        vec![(format << 6) | 1, extra as u8, (extra >> 8) as u8]
    } else if channel_id >= 64 {
        vec![format << 6, (channel_id - 64) as u8]
    } else {
        vec![(format << 6) | channel_id as u8]
    }
}

fn u32_to_u24_be(value: u32) -> [u8; 3] {
    let mut b = [0u8; 4];
    BigEndian::write_u32(&mut b, value);
    [b[1], b[2], b[3]]
}

fn u24_be_to_u32(b: &[u8]) -> u32 {
    ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | (b[2] as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup_none(_: u32) -> Option<LastHeaderState> {
        None
    }

    #[test]
    fn full_header_round_trips() {
        let h = ChunkHeader {
            channel_id: 5,
            timestamp: 1000,
            body_length: 256,
            datatype: 0x08,
            stream_id: 1,
        };

        let last = LastHeaderState::default();
        let (bytes, delta) = encode_header(&last, &h);
        assert_eq!(delta, 1000);

        let mut buf = ByteBuffer::new();
        buf.append(&bytes);

        let (decoded, _, consumed) = decode_header(&mut buf, lookup_none).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, h);
    }

    #[test]
    fn header_diff_picks_format_2_for_timestamp_only_change() {
        let first = ChunkHeader {
            channel_id: 5,
            timestamp: 1000,
            body_length: 256,
            datatype: 0x08,
            stream_id: 1,
        };

        let second = ChunkHeader {
            timestamp: 1040,
            ..first.clone()
        };

        let last = LastHeaderState {
            header: Some(first.clone()),
            last_delta: 1000,
        };

        let (bytes, delta) = encode_header(&last, &second);
        assert_eq!(delta, 40);

        // fmt is the top 2 bits of the basic header byte
        assert_eq!(bytes[0] >> 6, RTMP_CHUNK_TYPE_2);
        assert_eq!(bytes[1], 0x00);
        assert_eq!(bytes[2], 0x00);
        assert_eq!(bytes[3], 0x28);

        let lookup = |cid: u32| -> Option<LastHeaderState> {
            if cid == 5 {
                Some(last.clone())
            } else {
                None
            }
        };

        let mut buf = ByteBuffer::new();
        buf.append(&bytes);

        let (decoded, new_delta, _) = decode_header(&mut buf, lookup).unwrap();
        assert_eq!(decoded.timestamp, 1040);
        assert_eq!(new_delta, 40);
    }

    #[test]
    fn extended_timestamp_round_trips() {
        let h = ChunkHeader {
            channel_id: 4,
            timestamp: 65536,
            body_length: 10,
            datatype: 0x07,
            stream_id: 0,
        };

        let last = LastHeaderState::default();
        let (bytes, _) = encode_header(&last, &h);

        let mut buf = ByteBuffer::new();
        buf.append(&bytes);

        let (decoded, _, _) = decode_header(&mut buf, lookup_none).unwrap();
        assert_eq!(decoded.timestamp, 65536);
    }

    #[test]
    fn short_read_leaves_cursor_unchanged() {
        let h = ChunkHeader {
            channel_id: 5,
            timestamp: 1000,
            body_length: 256,
            datatype: 0x08,
            stream_id: 1,
        };

        let last = LastHeaderState::default();
        let (bytes, _) = encode_header(&last, &h);

        let mut buf = ByteBuffer::new();
        buf.append(&bytes[0..bytes.len() - 1]);

        assert!(decode_header(&mut buf, lookup_none).is_err());
        assert_eq!(buf.remaining(), bytes.len() - 1);
    }
}
