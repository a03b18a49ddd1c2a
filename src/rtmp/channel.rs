// Channel table: per-channelId assembly state for in-flight messages

use std::collections::HashMap;

use super::header::{ChunkHeader, LastHeaderState};

/// Assembly state for a single channel
pub struct ChannelAssembly {
    /// Header state remembered for diffing, shared by the header codec
    pub header_state: LastHeaderState,

    /// Bytes accumulated for the message currently in flight on this channel
    pub body_buffer: Vec<u8>,

    /// Bytes still needed to complete the current message
    pub body_remaining: u32,

    /// Complete frames (chunk fragments) assembled so far for the current message
    pub frames: u32,
}

impl ChannelAssembly {
    fn new() -> ChannelAssembly {
        ChannelAssembly {
            header_state: LastHeaderState::default(),
            body_buffer: Vec::new(),
            body_remaining: 0,
            frames: 0,
        }
    }

    /// Bytes already accumulated for the in-flight message
    pub fn body_received(&self) -> u32 {
        self.body_buffer.len() as u32
    }
}

/// Maps channel ids to their assembly state. Keyed by a flat table, not a graph: the
/// scheduler only ever refers to channels by id, never holds a reference into this table.
#[derive(Default)]
pub struct ChannelTable {
    channels: HashMap<u32, ChannelAssembly>,
}

impl ChannelTable {
    pub fn new() -> ChannelTable {
        ChannelTable::default()
    }

    /// Returns the entry for `channel_id`, creating it on first reference
    pub fn get_or_create(&mut self, channel_id: u32) -> &mut ChannelAssembly {
        self.channels
            .entry(channel_id)
            .or_insert_with(ChannelAssembly::new)
    }

    /// Returns the entry for `channel_id`, if it has ever been referenced
    pub fn get(&self, channel_id: u32) -> Option<&ChannelAssembly> {
        self.channels.get(&channel_id)
    }

    /// Snapshot of the last header state for a channel, for use as the header codec's
    /// diff baseline. Returns `None` for channels never referenced.
    pub fn last_header_state(&self, channel_id: u32) -> Option<LastHeaderState> {
        self.channels.get(&channel_id).map(|c| c.header_state.clone())
    }

    /// Begins a new message on `channel_id` with the given resolved absolute header
    /// and delta. Resets the body buffer and frame count.
    pub fn begin_message(&mut self, channel_id: u32, header: ChunkHeader, delta: u32) {
        let entry = self.get_or_create(channel_id);
        entry.body_remaining = header.body_length;
        entry.body_buffer = Vec::with_capacity(header.body_length as usize);
        entry.frames = 0;
        entry.header_state.header = Some(header);
        entry.header_state.last_delta = delta;
    }

    /// Appends a frame's worth of bytes to the channel's in-flight message.
    ///
    /// Returns the completed `(header, body)` once `bodyRemaining` reaches zero, at
    /// which point the body buffer is reset for the next message on this channel.
    pub fn write(&mut self, channel_id: u32, bytes: &[u8]) -> Option<(ChunkHeader, Vec<u8>)> {
        let entry = self.channels.get_mut(&channel_id)?;

        entry.body_buffer.extend_from_slice(bytes);
        entry.body_remaining = entry.body_remaining.saturating_sub(bytes.len() as u32);
        entry.frames += 1;

        if entry.body_remaining == 0 {
            let header = entry.header_state.header.clone()?;
            let body = std::mem::take(&mut entry.body_buffer);
            Some((header, body))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_body_across_frames() {
        let mut table = ChannelTable::new();

        let header = ChunkHeader {
            channel_id: 3,
            timestamp: 0,
            body_length: 6,
            datatype: 0x12,
            stream_id: 0,
        };

        table.begin_message(3, header.clone(), 0);

        assert!(table.write(3, &[1, 2, 3]).is_none());
        assert_eq!(table.get(3).unwrap().body_remaining, 3);

        let completed = table.write(3, &[4, 5, 6]);
        assert!(completed.is_some());

        let (done_header, body) = completed.unwrap();
        assert_eq!(done_header.body_length, 6);
        assert_eq!(body, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(table.get(3).unwrap().body_buffer.len(), 0);
    }
}
