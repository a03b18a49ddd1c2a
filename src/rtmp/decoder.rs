// Decoder pump: turns received bytes into complete, demultiplexed messages

use byteorder::{BigEndian, ByteOrder};

use crate::buffer::ByteBuffer;
use crate::error::RtmpError;

use super::channel::ChannelTable;
use super::constants::{RTMP_DEFAULT_FRAME_SIZE, DATATYPE_FRAME_SIZE};
use super::header::{decode_header, ChunkHeader};

enum TickOutcome {
    Paused,
    Progressed(Option<(ChunkHeader, Vec<u8>)>),
}

/// Cooperative decoder: consumes as much of the byte buffer as it can on each call
/// to `decode`, and pauses (without blocking) when it runs out of bytes.
pub struct Decoder {
    buffer: ByteBuffer,
    channels: ChannelTable,
    frame_size: u32,

    /// Channel pinned mid-frame from a previous call that did not reach a frame
    /// boundary or the end of the body
    current_channel: Option<u32>,
}

impl Decoder {
    pub fn new() -> Decoder {
        Decoder {
            buffer: ByteBuffer::new(),
            channels: ChannelTable::new(),
            frame_size: RTMP_DEFAULT_FRAME_SIZE,
            current_channel: None,
        }
    }

    /// Appends newly received bytes. Resumes the pump on the next `decode` call.
    pub fn data_received(&mut self, bytes: &[u8]) {
        self.buffer.append(bytes);
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn set_frame_size(&mut self, size: u32) {
        self.frame_size = size;
    }

    /// Any bytes left over that have not yet been consumed
    pub fn pending_bytes(&self) -> usize {
        self.buffer.remaining()
    }

    /// Drains as many complete messages as the currently buffered bytes allow.
    ///
    /// A `FRAME_SIZE` message takes effect immediately, before the next header in
    /// the same buffer is decoded.
    pub fn decode(&mut self) -> Result<Vec<(ChunkHeader, Vec<u8>)>, RtmpError> {
        let mut out = Vec::new();

        loop {
            match self.tick()? {
                TickOutcome::Paused => break,
                TickOutcome::Progressed(Some(msg)) => {
                    self.apply_frame_size_if_present(&msg);
                    out.push(msg);
                }
                TickOutcome::Progressed(None) => {}
            }
        }

        Ok(out)
    }

    fn apply_frame_size_if_present(&mut self, msg: &(ChunkHeader, Vec<u8>)) {
        let (header, body) = msg;
        if header.datatype == DATATYPE_FRAME_SIZE && body.len() >= 4 {
            self.frame_size = BigEndian::read_u32(&body[0..4]);
        }
    }

    fn tick(&mut self) -> Result<TickOutcome, RtmpError> {
        if let Some(cid) = self.current_channel {
            return self.drain_pinned(cid);
        }

        let channels = &self.channels;
        let result = decode_header(&mut self.buffer, |cid| channels.last_header_state(cid));

        match result {
            Err(RtmpError::ShortRead) => Ok(TickOutcome::Paused),
            Err(e) => Err(e),
            Ok((header, delta, _consumed)) => {
                let cid = header.channel_id;
                let zero_length = header.body_length == 0;

                self.channels.begin_message(cid, header.clone(), delta);

                if zero_length {
                    Ok(TickOutcome::Progressed(Some((header, Vec::new()))))
                } else {
                    self.current_channel = Some(cid);
                    self.drain_pinned(cid)
                }
            }
        }
    }

    fn drain_pinned(&mut self, cid: u32) -> Result<TickOutcome, RtmpError> {
        let (body_remaining, body_received) = match self.channels.get(cid) {
            Some(c) => (c.body_remaining, c.body_received()),
            None => return Err(RtmpError::ProtocolViolation(format!(
                "draining unregistered channel {cid}"
            ))),
        };

        let frame_pos = body_received % self.frame_size;
        let frame_left = self.frame_size - frame_pos;
        let to_read = self
            .buffer
            .remaining()
            .min(body_remaining as usize)
            .min(frame_left as usize);

        if to_read == 0 {
            return Ok(TickOutcome::Paused);
        }

        let bytes = self.buffer.read(to_read).expect("bounds checked above").to_vec();
        let completed = self.channels.write(cid, &bytes);
        self.buffer.consume();

        let (now_remaining, now_received) = match self.channels.get(cid) {
            Some(c) => (c.body_remaining, c.body_received()),
            None => (0, 0),
        };

        if now_remaining == 0 || now_received % self.frame_size == 0 {
            self.current_channel = None;
        }

        Ok(TickOutcome::Progressed(completed))
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Decoder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::header::LastHeaderState;

    fn encode_full(header: &ChunkHeader) -> Vec<u8> {
        let (bytes, _) = super::super::header::encode_header(&LastHeaderState::default(), header);
        bytes
    }

    #[test]
    fn single_small_message() {
        let mut decoder = Decoder::new();

        let header = ChunkHeader {
            channel_id: 3,
            timestamp: 0,
            body_length: 4,
            datatype: 0x01,
            stream_id: 0,
        };

        let mut bytes = encode_full(&header);
        bytes.extend_from_slice(&[0x00, 0x00, 0x10, 0x00]);

        decoder.data_received(&bytes);
        let msgs = decoder.decode().unwrap();

        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].1, vec![0x00, 0x00, 0x10, 0x00]);
        assert_eq!(decoder.frame_size(), 4096);
    }

    #[test]
    fn interleaved_channels_assemble_intact() {
        let mut decoder = Decoder::new();
        decoder.set_frame_size(128);

        let ch3_body = vec![0xAAu8; 200];
        let ch4_body = vec![0xBBu8; 300];

        let ch3_header = ChunkHeader {
            channel_id: 3,
            timestamp: 0,
            body_length: 200,
            datatype: 0x08,
            stream_id: 1,
        };
        let ch4_header = ChunkHeader {
            channel_id: 4,
            timestamp: 0,
            body_length: 300,
            datatype: 0x07,
            stream_id: 1,
        };

        // Manually interleave frames the way a round-robin encoder would, using
        // continuation basic headers (fmt 3) for subsequent frames on a channel.
        let mut wire = Vec::new();
        wire.extend(encode_full(&ch3_header));
        wire.extend(&ch3_body[0..128]);

        wire.extend(encode_full(&ch4_header));
        wire.extend(&ch4_body[0..128]);

        wire.extend(super::super::header::encode_basic_header(3, 3));
        wire.extend(&ch3_body[128..200]);

        wire.extend(super::super::header::encode_basic_header(3, 4));
        wire.extend(&ch4_body[128..256]);

        wire.extend(super::super::header::encode_basic_header(3, 4));
        wire.extend(&ch4_body[256..300]);

        decoder.data_received(&wire);
        let msgs = decoder.decode().unwrap();

        assert_eq!(msgs.len(), 2);
        let ch3_msg = msgs.iter().find(|(h, _)| h.channel_id == 3).unwrap();
        let ch4_msg = msgs.iter().find(|(h, _)| h.channel_id == 4).unwrap();
        assert_eq!(ch3_msg.1, ch3_body);
        assert_eq!(ch4_msg.1, ch4_body);
    }

    #[test]
    fn pauses_on_short_read_and_resumes() {
        let mut decoder = Decoder::new();

        let header = ChunkHeader {
            channel_id: 3,
            timestamp: 0,
            body_length: 4,
            datatype: 0x01,
            stream_id: 0,
        };

        let bytes = encode_full(&header);

        decoder.data_received(&bytes[0..bytes.len() - 2]);
        let msgs = decoder.decode().unwrap();
        assert!(msgs.is_empty());

        decoder.data_received(&bytes[bytes.len() - 2..]);
        decoder.data_received(&[0x00, 0x00, 0x10, 0x00]);
        let msgs = decoder.decode().unwrap();
        assert_eq!(msgs.len(), 1);
    }
}
