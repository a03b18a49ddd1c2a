// Connection: wires the handshake, decoder, encoder, and per-connection stream
// table together into the thing a transport actually drives

use std::sync::Arc;

use tokio::sync::mpsc::{Receiver, Sender};

use crate::amf::AMF0Value;
use crate::buffer::ByteBuffer;
use crate::error::RtmpError;
use crate::log::Logger;
use crate::rtmp::{
    ChunkHeader, Decoder, Encoder, Event, Handshake, RoundRobinScheduler, CONTROL_PING,
    CONTROL_PONG, RTMP_CHANNEL_AUDIO, RTMP_CHANNEL_CONTROL, RTMP_CHANNEL_DATA,
    RTMP_CHANNEL_INVOKE, RTMP_CHANNEL_VIDEO,
};

use super::application::{Application, ApplicationRegistry};
use super::named_stream::FanoutFrame;
use super::stream::{
    close_stream, handle_play, handle_publish, unknown_command_reply, StreamRole, StreamTable,
};

/// Everything the connection needs from outside itself: the application registry
/// (shared across connections in the server) and a logger.
pub struct ConnectionContext {
    pub applications: Arc<ApplicationRegistry>,
    pub logger: Logger,
    /// Frame size advertised to the peer right after the handshake completes
    pub initial_frame_size: u32,
}

const FANOUT_QUEUE_SIZE: usize = 256;

/// One RTMP connection's worth of protocol state. Single-threaded and cooperative:
/// nothing here is ever touched from two tasks at once. Fan-out from other
/// connections arrives only through `fanout_receiver`.
pub struct Connection {
    session_id: u64,
    handshake: Option<Handshake>,
    buffer: ByteBuffer,
    decoder: Decoder,
    encoder: Encoder,
    streams: StreamTable,
    app: Option<Arc<dyn Application>>,
    app_name: Option<String>,
    subscription_stream_id: Option<u32>,
    fanout_sender: Sender<FanoutFrame>,
    fanout_receiver: Receiver<FanoutFrame>,
    ctx: ConnectionContext,
}

impl Connection {
    pub fn new_server(session_id: u64, ctx: ConnectionContext) -> Connection {
        let (fanout_sender, fanout_receiver) = tokio::sync::mpsc::channel(FANOUT_QUEUE_SIZE);

        Connection {
            session_id,
            handshake: Some(Handshake::new_server()),
            buffer: ByteBuffer::new(),
            decoder: Decoder::new(),
            encoder: Encoder::new(Box::new(RoundRobinScheduler::new())),
            streams: StreamTable::new(),
            app: None,
            app_name: None,
            subscription_stream_id: None,
            fanout_sender,
            fanout_receiver,
            ctx,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Bytes received from the peer. Returns everything that must be written back.
    pub async fn data_received(&mut self, bytes: &[u8]) -> Result<Vec<u8>, RtmpError> {
        self.buffer.append(bytes);
        let mut to_send = Vec::new();

        if let Some(handshake) = &mut self.handshake {
            let step = handshake.advance(&mut self.buffer)?;
            to_send.extend(step.to_send);

            if handshake.is_complete() {
                if let Some(trailing) = step.trailing {
                    self.decoder.data_received(&trailing);
                }
                self.handshake = None;

                let frame_size = self.ctx.initial_frame_size;
                self.encoder.set_frame_size(frame_size);
                self.enqueue_event(
                    RTMP_CHANNEL_CONTROL,
                    0,
                    Event::FrameSize { size: frame_size },
                )?;
            } else {
                return Ok(to_send);
            }
        } else {
            let remaining = self.buffer.remaining();
            if remaining > 0 {
                let bytes = self
                    .buffer
                    .read(remaining)
                    .expect("bounds checked")
                    .to_vec();
                self.decoder.data_received(&bytes);
                self.buffer.consume();
            }
        }

        let messages = self.decoder.decode()?;

        for (header, body) in messages {
            self.dispatch_message(header, body).await?;
        }

        self.drain_fanout()?;

        to_send.extend(self.encoder.encode()?);

        Ok(to_send)
    }

    async fn dispatch_message(
        &mut self,
        header: ChunkHeader,
        body: Vec<u8>,
    ) -> Result<(), RtmpError> {
        let event = Event::decode(header.datatype, &body)?;
        let stream_id = header.stream_id;

        self.streams.get_or_create(stream_id).timestamp = header.timestamp;

        match event {
            Event::FrameSize { size } => {
                self.decoder.set_frame_size(size);
                self.encoder.set_frame_size(size);
            }
            Event::BytesRead { .. } => {
                // Peer's report of its own received-byte count; nothing to act on.
            }
            Event::Control {
                subtype, value1, ..
            } => {
                if subtype == CONTROL_PING {
                    let pong = Event::Control {
                        subtype: CONTROL_PONG,
                        value1,
                        value2: -1,
                        value3: -1,
                    };
                    self.enqueue_event(RTMP_CHANNEL_CONTROL, 0, pong)?;
                }
            }
            Event::DownstreamBandwidth { .. } | Event::UpstreamBandwidth { .. } => {
                // Peer-advertised bandwidth; this core has no congestion control to
                // adjust beyond the frame size already negotiated.
            }
            Event::Notify { name, argv, .. } => {
                if name == "@setDataFrame" || name == "onMetaData" {
                    self.forward_metadata(stream_id, argv)?;
                }
            }
            Event::Invoke { name, id, argv } => {
                self.handle_invoke(stream_id, &name, id, argv).await?;
            }
            Event::AudioData { data } => {
                self.publish_frame(stream_id, data, header.timestamp, false)
                    .await?;
            }
            Event::VideoData { data } => {
                self.publish_frame(stream_id, data, header.timestamp, true)
                    .await?;
            }
        }

        Ok(())
    }

    async fn handle_invoke(
        &mut self,
        stream_id: u32,
        name: &str,
        id: f64,
        argv: Vec<AMF0Value>,
    ) -> Result<(), RtmpError> {
        match name {
            "connect" => {
                let app_name = argv
                    .first()
                    .and_then(|v| v.get_object_property("app"))
                    .map(|v| v.get_string().to_string())
                    .unwrap_or_default();

                let app = self.ctx.applications.get_application(&app_name).await;
                self.app_name = Some(app_name);
                self.app = Some(app);

                let result = Event::Invoke {
                    name: "_result".to_string(),
                    id,
                    argv: vec![AMF0Value::Null],
                };
                self.enqueue_event(RTMP_CHANNEL_INVOKE, stream_id, result)?;
            }
            "publish" => {
                let stream_name = argv
                    .first()
                    .map(|v| v.get_string().to_string())
                    .unwrap_or_default();

                let (app, app_name) = self.require_app()?;
                let stream = self.streams.get_or_create(stream_id);

                let events = handle_publish(
                    stream,
                    self.session_id,
                    &app_name,
                    app.as_ref(),
                    &stream_name,
                    &self.ctx.logger,
                )
                .await;

                for event in events {
                    let channel = channel_for_event(&event);
                    self.enqueue_event(channel, stream_id, event)?;
                }
            }
            "play" => {
                let stream_name = argv
                    .first()
                    .map(|v| v.get_string().to_string())
                    .unwrap_or_default();

                let (app, app_name) = self.require_app()?;
                let stream = self.streams.get_or_create(stream_id);

                let events = handle_play(
                    stream,
                    self.session_id,
                    &app_name,
                    app.as_ref(),
                    &stream_name,
                    self.fanout_sender.clone(),
                )
                .await?;

                self.subscription_stream_id = Some(stream_id);

                for event in events {
                    let channel = channel_for_event(&event);
                    self.enqueue_event(channel, stream_id, event)?;
                }
            }
            "closeStream" | "deleteStream" => {
                let app = self.app.clone();
                if let Some(app) = app {
                    if let Some(stream) = self.streams.get_mut(stream_id) {
                        if let Some(event) =
                            close_stream(stream, self.session_id, app.as_ref()).await
                        {
                            self.enqueue_event(RTMP_CHANNEL_INVOKE, stream_id, event)?;
                        }
                    }
                }

                if self.subscription_stream_id == Some(stream_id) {
                    self.subscription_stream_id = None;
                }
            }
            other => {
                let event = unknown_command_reply(other);
                self.enqueue_event(RTMP_CHANNEL_INVOKE, stream_id, event)?;
            }
        }

        Ok(())
    }

    async fn publish_frame(
        &mut self,
        stream_id: u32,
        data: Vec<u8>,
        timestamp: u32,
        is_video: bool,
    ) -> Result<(), RtmpError> {
        let name = match self.streams.get(stream_id).map(|s| s.role.clone()) {
            Some(StreamRole::Publisher { name, .. }) => name,
            _ => return Ok(()),
        };

        let (app, _) = self.require_app()?;
        if let Some(named_stream) = app.streams().get(&name).await {
            let guard = named_stream.lock().await;
            let frame = if is_video {
                FanoutFrame::Video { data, timestamp }
            } else {
                FanoutFrame::Audio { data, timestamp }
            };
            guard.fan_out(frame, &self.ctx.logger);
        }

        Ok(())
    }

    fn forward_metadata(&mut self, stream_id: u32, argv: Vec<AMF0Value>) -> Result<(), RtmpError> {
        let event = Event::Notify {
            name: "onMetaData".to_string(),
            id: 0.0,
            argv,
        };
        self.enqueue_event(RTMP_CHANNEL_DATA, stream_id, event)
    }

    fn require_app(&self) -> Result<(Arc<dyn Application>, String), RtmpError> {
        match (&self.app, &self.app_name) {
            (Some(app), Some(name)) => Ok((app.clone(), name.clone())),
            _ => Err(RtmpError::ProtocolViolation(
                "command issued before connect".to_string(),
            )),
        }
    }

    /// Drains whatever fan-out frames have arrived from other connections since the
    /// last call, enqueuing them on this connection's subscribed stream. A no-op if
    /// this connection is not currently subscribed to anything.
    fn drain_fanout(&mut self) -> Result<(), RtmpError> {
        let Some(stream_id) = self.subscription_stream_id else {
            // Drop anything that arrived before a subscription existed or after it
            // ended; there is nowhere for it to go.
            while self.fanout_receiver.try_recv().is_ok() {}
            return Ok(());
        };

        while let Ok(frame) = self.fanout_receiver.try_recv() {
            let (channel, event, timestamp) = match frame {
                FanoutFrame::Audio { data, timestamp } => {
                    (RTMP_CHANNEL_AUDIO, Event::AudioData { data }, timestamp)
                }
                FanoutFrame::Video { data, timestamp } => {
                    (RTMP_CHANNEL_VIDEO, Event::VideoData { data }, timestamp)
                }
            };

            self.enqueue_event_with_timestamp(channel, stream_id, event, timestamp)?;
        }

        Ok(())
    }

    fn enqueue_event(
        &mut self,
        channel_id: u32,
        stream_id: u32,
        event: Event,
    ) -> Result<(), RtmpError> {
        self.enqueue_event_with_timestamp(channel_id, stream_id, event, 0)
    }

    fn enqueue_event_with_timestamp(
        &mut self,
        channel_id: u32,
        stream_id: u32,
        event: Event,
        timestamp: u32,
    ) -> Result<(), RtmpError> {
        let datatype = event.datatype();
        let body = event.encode()?;

        let header = ChunkHeader {
            channel_id,
            timestamp,
            body_length: body.len() as u32,
            datatype,
            stream_id,
        };

        self.encoder.enqueue(header, body);
        Ok(())
    }
}

fn channel_for_event(event: &Event) -> u32 {
    match event {
        Event::Control { .. } => RTMP_CHANNEL_CONTROL,
        Event::AudioData { .. } => RTMP_CHANNEL_AUDIO,
        Event::VideoData { .. } => RTMP_CHANNEL_VIDEO,
        Event::Notify { .. } => RTMP_CHANNEL_DATA,
        _ => RTMP_CHANNEL_INVOKE,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use crate::log::{LogConfig, Logger};

    use super::*;

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

    fn new_connection(session_id: u64, applications: Arc<ApplicationRegistry>) -> Connection {
        Connection::new_server(
            session_id,
            ConnectionContext {
                applications,
                logger: silent_logger(),
                initial_frame_size: 128,
            },
        )
    }

    /// Drives the client half of the handshake against whatever the server wrote
    /// back, returning the bytes a real client would send next.
    fn client_handshake_reply(client: &mut Handshake, server_bytes: &[u8]) -> Vec<u8> {
        let mut buf = ByteBuffer::new();
        buf.append(server_bytes);
        client.advance(&mut buf).unwrap().to_send
    }

    fn invoke_bytes(channel_id: u32, stream_id: u32, event: Event) -> Vec<u8> {
        let mut encoder = Encoder::new(Box::new(RoundRobinScheduler::new()));
        let body = event.encode().unwrap();
        let header = ChunkHeader {
            channel_id,
            timestamp: 0,
            body_length: body.len() as u32,
            datatype: event.datatype(),
            stream_id,
        };
        encoder.enqueue(header, body);
        encoder.encode().unwrap()
    }

    fn connect_event() -> Event {
        let mut properties = HashMap::new();
        properties.insert(
            "app".to_string(),
            AMF0Value::String {
                value: "live".to_string(),
            },
        );
        Event::Invoke {
            name: "connect".to_string(),
            id: 1.0,
            argv: vec![AMF0Value::Object { properties }],
        }
    }

    async fn drive_handshake(connection: &mut Connection, client: &mut Handshake, c0_c1: Vec<u8>) {
        let server_reply = connection.data_received(&c0_c1).await.unwrap();
        let client_c2 = client_handshake_reply(client, &server_reply);
        let post_handshake = connection.data_received(&client_c2).await.unwrap();
        // The connection sends its own FrameSize event right after the handshake.
        assert!(!post_handshake.is_empty());
        assert!(client.is_complete());
    }

    #[tokio::test]
    async fn connect_publish_and_play_fan_out_across_connections() {
        let applications = Arc::new(ApplicationRegistry::new());

        let mut publisher = new_connection(1, applications.clone());
        let (mut pub_handshake, pub_c0c1) = Handshake::new_client();
        drive_handshake(&mut publisher, &mut pub_handshake, pub_c0c1).await;

        let mut subscriber = new_connection(2, applications.clone());
        let (mut sub_handshake, sub_c0c1) = Handshake::new_client();
        drive_handshake(&mut subscriber, &mut sub_handshake, sub_c0c1).await;

        // connect on both connections
        let connect_bytes = invoke_bytes(RTMP_CHANNEL_INVOKE, 0, connect_event());
        let reply = publisher.data_received(&connect_bytes).await.unwrap();
        assert!(!reply.is_empty());
        let reply = subscriber.data_received(&connect_bytes).await.unwrap();
        assert!(!reply.is_empty());

        // publisher publishes "mystream"
        let publish_event = Event::Invoke {
            name: "publish".to_string(),
            id: 2.0,
            argv: vec![AMF0Value::String {
                value: "mystream".to_string(),
            }],
        };
        let publish_bytes = invoke_bytes(RTMP_CHANNEL_INVOKE, 1, publish_event);
        let reply = publisher.data_received(&publish_bytes).await.unwrap();
        assert!(!reply.is_empty());

        // subscriber plays "mystream"
        let play_event = Event::Invoke {
            name: "play".to_string(),
            id: 2.0,
            argv: vec![AMF0Value::String {
                value: "mystream".to_string(),
            }],
        };
        let play_bytes = invoke_bytes(RTMP_CHANNEL_INVOKE, 1, play_event);
        let reply = subscriber.data_received(&play_bytes).await.unwrap();
        assert!(!reply.is_empty());
        assert_eq!(subscriber.subscription_stream_id, Some(1));

        // publisher sends a video frame; it must fan out to the subscriber's queue
        let video_event = Event::VideoData {
            data: vec![1, 2, 3, 4],
        };
        let video_bytes = invoke_bytes(RTMP_CHANNEL_VIDEO, 1, video_event);
        publisher.data_received(&video_bytes).await.unwrap();

        // give the fanout channel a tick to deliver, then let the subscriber drain it
        let reply = subscriber.data_received(&[]).await.unwrap();
        assert!(!reply.is_empty());
    }
}
