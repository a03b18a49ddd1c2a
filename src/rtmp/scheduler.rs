// Channel scheduler: selects the next active channel for the encoder to drain

use std::collections::VecDeque;

/// Picks which active channel the encoder should service next.
///
/// Implementations hold only channel ids, never references into the channel table
/// or encoding contexts, so the scheduler and the channels it tracks cannot form a
/// reference cycle.
pub trait Scheduler: Send {
    fn activate_channel(&mut self, channel_id: u32);
    fn deactivate_channel(&mut self, channel_id: u32);
    fn get_next_channel(&mut self) -> Option<u32>;
}

/// Round-robin over active channels; the default policy.
#[derive(Default)]
pub struct RoundRobinScheduler {
    queue: VecDeque<u32>,
}

impl RoundRobinScheduler {
    pub fn new() -> RoundRobinScheduler {
        RoundRobinScheduler::default()
    }
}

impl Scheduler for RoundRobinScheduler {
    fn activate_channel(&mut self, channel_id: u32) {
        if !self.queue.contains(&channel_id) {
            self.queue.push_back(channel_id);
        }
    }

    fn deactivate_channel(&mut self, channel_id: u32) {
        self.queue.retain(|&c| c != channel_id);
    }

    fn get_next_channel(&mut self) -> Option<u32> {
        let channel_id = self.queue.pop_front()?;
        self.queue.push_back(channel_id);
        Some(channel_id)
    }
}

/// Services channels in ascending channel-id order, always preferring the
/// lowest-numbered active channel.
#[derive(Default)]
pub struct PriorityByChannelIdScheduler {
    active: Vec<u32>,
}

impl Scheduler for PriorityByChannelIdScheduler {
    fn activate_channel(&mut self, channel_id: u32) {
        if !self.active.contains(&channel_id) {
            self.active.push(channel_id);
            self.active.sort_unstable();
        }
    }

    fn deactivate_channel(&mut self, channel_id: u32) {
        self.active.retain(|&c| c != channel_id);
    }

    fn get_next_channel(&mut self) -> Option<u32> {
        self.active.first().copied()
    }
}

/// Services channels by a caller-supplied datatype priority, falling back to
/// round-robin among channels sharing the same priority.
pub struct PriorityByDatatypeScheduler {
    priorities: std::collections::HashMap<u32, u8>,
    round_robin: RoundRobinScheduler,
}

impl PriorityByDatatypeScheduler {
    pub fn new() -> PriorityByDatatypeScheduler {
        PriorityByDatatypeScheduler {
            priorities: std::collections::HashMap::new(),
            round_robin: RoundRobinScheduler::new(),
        }
    }

    /// Registers the datatype priority for a channel; lower values are serviced first.
    pub fn set_priority(&mut self, channel_id: u32, priority: u8) {
        self.priorities.insert(channel_id, priority);
    }
}

impl Default for PriorityByDatatypeScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for PriorityByDatatypeScheduler {
    fn activate_channel(&mut self, channel_id: u32) {
        self.round_robin.activate_channel(channel_id);
    }

    fn deactivate_channel(&mut self, channel_id: u32) {
        self.round_robin.deactivate_channel(channel_id);
    }

    fn get_next_channel(&mut self) -> Option<u32> {
        let priorities = &self.priorities;
        let best = self
            .round_robin
            .queue
            .iter()
            .min_by_key(|&&cid| priorities.get(&cid).copied().unwrap_or(u8::MAX))
            .copied()?;

        self.round_robin.queue.retain(|&c| c != best);
        self.round_robin.queue.push_back(best);

        Some(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_active_channels() {
        let mut s = RoundRobinScheduler::new();
        s.activate_channel(3);
        s.activate_channel(4);

        assert_eq!(s.get_next_channel(), Some(3));
        assert_eq!(s.get_next_channel(), Some(4));
        assert_eq!(s.get_next_channel(), Some(3));
    }

    #[test]
    fn deactivate_removes_channel_from_rotation() {
        let mut s = RoundRobinScheduler::new();
        s.activate_channel(3);
        s.activate_channel(4);
        s.deactivate_channel(3);

        assert_eq!(s.get_next_channel(), Some(4));
        assert_eq!(s.get_next_channel(), Some(4));
    }

    #[test]
    fn no_active_channels_returns_none() {
        let mut s = RoundRobinScheduler::new();
        assert_eq!(s.get_next_channel(), None);
    }
}
