// Per-connection stream: one per `streamId`, routes invoke/notify/audio/video to the
// named-stream registry and builds the status replies the publish/play protocol
// requires

use std::collections::HashMap;

use tokio::sync::mpsc::Sender;

use crate::amf::AMF0Value;
use crate::error::RtmpError;
use crate::log::Logger;
use crate::rtmp::{Event, CONTROL_STREAM_BEGIN};

use super::application::Application;
use super::named_stream::{FanoutFrame, SubscriberHandle};

/// What a connection-scoped stream is currently doing
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StreamRole {
    #[default]
    Idle,
    Publisher {
        app: String,
        name: String,
    },
    Subscriber {
        app: String,
        name: String,
    },
}

/// A connection-scoped stream, keyed by `streamId`. Stream 0 is the control stream
/// and always exists implicitly.
pub struct Stream {
    pub stream_id: u32,
    pub timestamp: u32,
    pub role: StreamRole,
}

impl Stream {
    pub fn new(stream_id: u32) -> Stream {
        Stream {
            stream_id,
            timestamp: 0,
            role: StreamRole::Idle,
        }
    }
}

/// Table of connection-scoped streams, keyed by `streamId`
#[derive(Default)]
pub struct StreamTable {
    streams: HashMap<u32, Stream>,
}

impl StreamTable {
    pub fn new() -> StreamTable {
        let mut streams = HashMap::new();
        streams.insert(0, Stream::new(0));
        StreamTable { streams }
    }

    pub fn get_or_create(&mut self, stream_id: u32) -> &mut Stream {
        self.streams
            .entry(stream_id)
            .or_insert_with(|| Stream::new(stream_id))
    }

    pub fn get(&self, stream_id: u32) -> Option<&Stream> {
        self.streams.get(&stream_id)
    }

    pub fn get_mut(&mut self, stream_id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(&stream_id)
    }
}

/// Builds a status object as sent via `onStatus`/`_result`/`_error` invokes, e.g.
/// `NetStream.Publish.Start`.
pub fn build_status(level: &str, code: &str, description: &str) -> AMF0Value {
    let mut properties = HashMap::new();
    properties.insert(
        "level".to_string(),
        AMF0Value::String {
            value: level.to_string(),
        },
    );
    properties.insert(
        "code".to_string(),
        AMF0Value::String {
            value: code.to_string(),
        },
    );
    properties.insert(
        "description".to_string(),
        AMF0Value::String {
            value: description.to_string(),
        },
    );
    AMF0Value::Object { properties }
}

fn status_invoke(name: &str, status: AMF0Value) -> Event {
    Event::Invoke {
        name: name.to_string(),
        id: 0.0,
        argv: vec![AMF0Value::Null, status],
    }
}

/// A control event announcing "stream begin" for `stream_id`, sent on the control
/// channel before a publish's status reply.
pub fn stream_begin_event(stream_id: u32) -> Event {
    Event::Control {
        subtype: CONTROL_STREAM_BEGIN,
        value1: stream_id as i32,
        value2: -1,
        value3: -1,
    }
}

/// Runs the publish protocol: looks up or creates the named stream, enforces
/// at-most-one-publisher, consults the application hook, and returns the events to
/// send back (stream-begin + status, on either branch).
pub async fn handle_publish(
    stream: &mut Stream,
    session_id: u64,
    app_name: &str,
    app: &dyn Application,
    stream_name: &str,
    logger: &Logger,
) -> Vec<Event> {
    let named_stream = app.streams().get_or_create(stream_name).await;

    {
        let mut guard = named_stream.lock().await;

        if guard.has_publisher() {
            logger.log_debug(&format!(
                "publish rejected: '{stream_name}' already has a publisher"
            ));
            return vec![status_invoke(
                "onStatus",
                build_status(
                    "error",
                    "NetStream.Publish.BadName",
                    "Stream already has a publisher",
                ),
            )];
        }

        if !app.on_publish(session_id, stream_name) {
            return vec![status_invoke(
                "onStatus",
                build_status(
                    "error",
                    "NetStream.Publish.BadName",
                    "Publish rejected by application",
                ),
            )];
        }

        // Re-checked under the same lock acquisition as the has_publisher check
        // above; set_publisher can only fail here if a racing publish slipped in,
        // which the lock on `guard` rules out.
        let _ = guard.set_publisher(session_id);
    }

    stream.role = StreamRole::Publisher {
        app: app_name.to_string(),
        name: stream_name.to_string(),
    };

    vec![
        stream_begin_event(stream.stream_id),
        status_invoke(
            "onStatus",
            build_status("status", "NetStream.Publish.Start", "Publish started"),
        ),
    ]
}

/// Runs the play/subscribe protocol: registers `subscriber` against the named
/// stream, returning the start status on success.
pub async fn handle_play(
    stream: &mut Stream,
    session_id: u64,
    app_name: &str,
    app: &dyn Application,
    stream_name: &str,
    subscriber: Sender<FanoutFrame>,
) -> Result<Vec<Event>, RtmpError> {
    let named_stream = app.streams().get_or_create(stream_name).await;

    {
        let mut guard = named_stream.lock().await;
        guard.add_subscriber(SubscriberHandle {
            session_id,
            sender: subscriber,
        })?;
    }

    stream.role = StreamRole::Subscriber {
        app: app_name.to_string(),
        name: stream_name.to_string(),
    };

    Ok(vec![
        stream_begin_event(stream.stream_id),
        status_invoke(
            "onStatus",
            build_status("status", "NetStream.Play.Start", "Playback started"),
        ),
    ])
}

/// Tears down whatever role `stream` is currently playing: clears the publisher
/// slot or removes the subscription, notifies the application, and resets the
/// stream's timestamp. Idempotent — safe to call from both an explicit
/// `closeStream` and connection loss.
pub async fn close_stream(
    stream: &mut Stream,
    session_id: u64,
    app: &dyn Application,
) -> Option<Event> {
    let role = std::mem::replace(&mut stream.role, StreamRole::Idle);
    stream.timestamp = 0;

    match role {
        StreamRole::Publisher { name, .. } => {
            if let Some(named_stream) = app.streams().get(&name).await {
                let mut guard = named_stream.lock().await;
                guard.clear_publisher(session_id);
            }

            app.on_unpublish(session_id, &name);

            Some(status_invoke(
                "onStatus",
                build_status(
                    "status",
                    "NetStream.Unpublish.Success",
                    "Publish stopped",
                ),
            ))
        }
        StreamRole::Subscriber { name, .. } => {
            if let Some(named_stream) = app.streams().get(&name).await {
                let mut guard = named_stream.lock().await;
                let _ = guard.remove_subscriber(session_id);
            }

            None
        }
        StreamRole::Idle => None,
    }
}

/// Resolves an `invoke` by name against the small set of built-in commands this
/// engine implements directly. Unknown commands reply `_error` /
/// `NetStream.Failed`, matching the stream's command-table-miss behavior.
pub fn unknown_command_reply(name: &str) -> Event {
    status_invoke(
        "_error",
        build_status(
            "error",
            "NetStream.Failed",
            &format!("Unhandled command: {name}"),
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::application::OpenApplication;
    use crate::log::{LogConfig, Logger};

    fn silent_logger() -> Logger {
        Logger::new(LogConfig {
            prefix: "".to_string(),
            error_enabled: false,
            warning_enabled: false,
            info_enabled: false,
            debug_enabled: false,
            trace_enabled: false,
        })
    }

    #[tokio::test]
    async fn publish_collision_and_recovery() {
        let app = OpenApplication::new();
        let logger = silent_logger();

        let mut stream_a = Stream::new(1);
        let events_a = handle_publish(&mut stream_a, 1, "live", &app, "mystream", &logger).await;
        assert!(matches!(stream_a.role, StreamRole::Publisher { .. }));
        assert!(matches!(events_a[1], Event::Invoke { .. }));

        let mut stream_b = Stream::new(1);
        let events_b = handle_publish(&mut stream_b, 2, "live", &app, "mystream", &logger).await;
        assert_eq!(events_b.len(), 1);
        assert!(matches!(stream_b.role, StreamRole::Idle));

        close_stream(&mut stream_a, 1, &app).await;

        let mut stream_c = Stream::new(1);
        let events_c = handle_publish(&mut stream_c, 3, "live", &app, "mystream", &logger).await;
        assert_eq!(events_c.len(), 2);
        assert!(matches!(stream_c.role, StreamRole::Publisher { .. }));
    }
}
