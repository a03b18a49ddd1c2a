// Encoder pump: drains active channels through the scheduler, writing interleaved
// chunks to the output buffer

use std::collections::{HashMap, VecDeque};

use crate::error::RtmpError;

use super::constants::RTMP_DEFAULT_FRAME_SIZE;
use super::header::{encode_header, ChunkHeader, LastHeaderState};
use super::scheduler::Scheduler;

struct PendingMessage {
    header: ChunkHeader,
    body: Vec<u8>,
    offset: usize,
}

/// Per-channel encoding state: queued messages, the last header written (for
/// diffing), and whether the channel is currently registered with the scheduler.
#[derive(Default)]
struct EncodingContext {
    queue: VecDeque<PendingMessage>,
    header_state: LastHeaderState,
    active: bool,
}

/// Encoder: turns enqueued whole messages into an interleaved chunk stream.
pub struct Encoder {
    contexts: HashMap<u32, EncodingContext>,
    scheduler: Box<dyn Scheduler>,
    frame_size: u32,
}

impl Encoder {
    pub fn new(scheduler: Box<dyn Scheduler>) -> Encoder {
        Encoder {
            contexts: HashMap::new(),
            scheduler,
            frame_size: RTMP_DEFAULT_FRAME_SIZE,
        }
    }

    pub fn set_frame_size(&mut self, size: u32) {
        self.frame_size = size;
    }

    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    /// Queues a complete message for output on its channel, activating the channel
    /// with the scheduler if it was idle.
    pub fn enqueue(&mut self, header: ChunkHeader, body: Vec<u8>) {
        let channel_id = header.channel_id;
        let ctx = self.contexts.entry(channel_id).or_default();

        ctx.queue.push_back(PendingMessage {
            header,
            body,
            offset: 0,
        });

        if !ctx.active {
            ctx.active = true;
            self.scheduler.activate_channel(channel_id);
        }
    }

    /// Drains all currently ready output into a single byte stream.
    ///
    /// Each frame is a single ask-the-scheduler round: the scheduler's choice of
    /// channel for frame N+1 may differ from frame N even mid-message, which is how
    /// messages on different channels interleave on the wire.
    pub fn encode(&mut self) -> Result<Vec<u8>, RtmpError> {
        let mut out = Vec::new();

        loop {
            let Some(channel_id) = self.scheduler.get_next_channel() else {
                break;
            };

            let ctx = match self.contexts.get_mut(&channel_id) {
                Some(c) => c,
                None => {
                    self.scheduler.deactivate_channel(channel_id);
                    return Err(RtmpError::ProtocolViolation(format!(
                        "scheduler activated unknown channel {channel_id}"
                    )));
                }
            };

            let Some(msg) = ctx.queue.front_mut() else {
                ctx.active = false;
                self.scheduler.deactivate_channel(channel_id);
                continue;
            };

            let remaining = msg.body.len() - msg.offset;
            let take = remaining.min(self.frame_size as usize);

            let frame_header = msg.header.clone();
            let (header_bytes, delta) = encode_header(&ctx.header_state, &frame_header);
            ctx.header_state.header = Some(frame_header);
            ctx.header_state.last_delta = delta;

            out.extend(header_bytes);
            out.extend_from_slice(&msg.body[msg.offset..msg.offset + take]);
            msg.offset += take;

            if msg.offset >= msg.body.len() {
                ctx.queue.pop_front();
            }

            if ctx.queue.is_empty() {
                ctx.active = false;
                self.scheduler.deactivate_channel(channel_id);
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtmp::decoder::Decoder;
    use crate::rtmp::scheduler::RoundRobinScheduler;

    #[test]
    fn interleaves_two_channels_round_robin() {
        let mut encoder = Encoder::new(Box::new(RoundRobinScheduler::new()));
        encoder.set_frame_size(128);

        encoder.enqueue(
            ChunkHeader {
                channel_id: 3,
                timestamp: 0,
                body_length: 200,
                datatype: 0x08,
                stream_id: 1,
            },
            vec![0xAA; 200],
        );

        encoder.enqueue(
            ChunkHeader {
                channel_id: 4,
                timestamp: 0,
                body_length: 300,
                datatype: 0x07,
                stream_id: 1,
            },
            vec![0xBB; 300],
        );

        let wire = encoder.encode().unwrap();

        let mut decoder = Decoder::new();
        decoder.set_frame_size(128);
        decoder.data_received(&wire);

        let msgs = decoder.decode().unwrap();
        assert_eq!(msgs.len(), 2);

        let ch3 = msgs.iter().find(|(h, _)| h.channel_id == 3).unwrap();
        let ch4 = msgs.iter().find(|(h, _)| h.channel_id == 4).unwrap();
        assert_eq!(ch3.1, vec![0xAA; 200]);
        assert_eq!(ch4.1, vec![0xBB; 300]);
    }

    #[test]
    fn idle_encoder_produces_nothing() {
        let mut encoder = Encoder::new(Box::new(RoundRobinScheduler::new()));
        assert!(encoder.encode().unwrap().is_empty());
    }
}
