// Named stream: application-level stream keyed by a string, with at most one
// publisher and a set of subscribers

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc::Sender, Mutex};

use crate::error::RtmpError;
use crate::log::Logger;

/// A frame fanned out from a publisher to its subscribers
#[derive(Clone, Debug)]
pub enum FanoutFrame {
    Audio { data: Vec<u8>, timestamp: u32 },
    Video { data: Vec<u8>, timestamp: u32 },
}

/// A registered subscriber: identified by its connection's session id, and reached
/// by posting to its own task queue rather than calling into it directly
#[derive(Clone)]
pub struct SubscriberHandle {
    pub session_id: u64,
    pub sender: Sender<FanoutFrame>,
}

/// One named stream: at most one publisher, any number of subscribers
pub struct NamedStream {
    name: String,
    publisher: Option<u64>,
    subscribers: Vec<SubscriberHandle>,
}

impl NamedStream {
    fn new(name: String) -> NamedStream {
        NamedStream {
            name,
            publisher: None,
            subscribers: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_publisher(&self) -> bool {
        self.publisher.is_some()
    }

    /// Claims the publisher slot for `session_id`. Fails if one is already set.
    pub fn set_publisher(&mut self, session_id: u64) -> Result<(), RtmpError> {
        if self.publisher.is_some() {
            return Err(RtmpError::PublishRejected(format!(
                "stream '{}' already has a publisher",
                self.name
            )));
        }

        self.publisher = Some(session_id);
        Ok(())
    }

    /// Clears the publisher slot if it is currently held by `session_id`
    pub fn clear_publisher(&mut self, session_id: u64) {
        if self.publisher == Some(session_id) {
            self.publisher = None;
        }
    }

    pub fn add_subscriber(&mut self, handle: SubscriberHandle) -> Result<(), RtmpError> {
        if self.subscribers.iter().any(|s| s.session_id == handle.session_id) {
            return Err(RtmpError::AlreadySubscribed);
        }

        self.subscribers.push(handle);
        Ok(())
    }

    pub fn remove_subscriber(&mut self, session_id: u64) -> Result<(), RtmpError> {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.session_id != session_id);

        if self.subscribers.len() == before {
            Err(RtmpError::NotSubscribed)
        } else {
            Ok(())
        }
    }

    /// Fans a frame out to every current subscriber, in insertion order.
    ///
    /// Takes a snapshot of the subscriber list before iterating so that a subscriber
    /// unsubscribing itself mid-fan-out cannot invalidate the traversal. Delivery is
    /// best-effort: a subscriber whose queue is closed or full is logged and skipped,
    /// never removed from the registration here.
    pub fn fan_out(&self, frame: FanoutFrame, logger: &Logger) {
        let snapshot: Vec<SubscriberHandle> = self.subscribers.clone();

        for subscriber in snapshot {
            if let Err(e) = subscriber.sender.try_send(frame.clone()) {
                logger.log_debug(&format!(
                    "dropping frame for subscriber {} on stream '{}': {}",
                    subscriber.session_id, self.name, e
                ));
            }
        }
    }
}

/// Registry of named streams for one application. Conceptually global to the
/// application but owned by the connection context, not a process-lifetime
/// singleton, so that multiple applications (or test harnesses) can each hold their
/// own registry.
#[derive(Default)]
pub struct NamedStreamRegistry {
    streams: Mutex<HashMap<String, Arc<Mutex<NamedStream>>>>,
}

impl NamedStreamRegistry {
    pub fn new() -> NamedStreamRegistry {
        NamedStreamRegistry::default()
    }

    /// Returns the named stream, creating it on first reference
    pub async fn get_or_create(&self, name: &str) -> Arc<Mutex<NamedStream>> {
        let mut streams = self.streams.lock().await;

        streams
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(NamedStream::new(name.to_string()))))
            .clone()
    }

    /// Returns the named stream if it has ever been referenced, without creating it
    pub async fn get(&self, name: &str) -> Option<Arc<Mutex<NamedStream>>> {
        let streams = self.streams.lock().await;
        streams.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_collision_then_recovery() {
        let registry = NamedStreamRegistry::new();
        let stream = registry.get_or_create("live").await;

        {
            let mut s = stream.lock().await;
            assert!(s.set_publisher(1).is_ok());
            assert!(s.set_publisher(2).is_err());
        }

        {
            let mut s = stream.lock().await;
            s.clear_publisher(1);
        }

        {
            let mut s = stream.lock().await;
            assert!(s.set_publisher(3).is_ok());
        }
    }

    #[tokio::test]
    async fn duplicate_subscribe_fails() {
        let registry = NamedStreamRegistry::new();
        let stream = registry.get_or_create("live").await;
        let (tx, _rx) = tokio::sync::mpsc::channel(4);

        let mut s = stream.lock().await;
        s.add_subscriber(SubscriberHandle {
            session_id: 7,
            sender: tx.clone(),
        })
        .unwrap();

        let err = s.add_subscriber(SubscriberHandle {
            session_id: 7,
            sender: tx,
        });
        assert!(matches!(err, Err(RtmpError::AlreadySubscribed)));
    }
}
