// Event codec: typed-event encode/decode over assembled message bodies

use byteorder::{BigEndian, ByteOrder};

use crate::amf::{AMF0Value, AMFDecodingCursor};
use crate::error::RtmpError;

use super::constants::{
    DATATYPE_AUDIO_DATA, DATATYPE_BYTES_READ, DATATYPE_CONTROL, DATATYPE_DOWNSTREAM_BANDWIDTH,
    DATATYPE_FRAME_SIZE, DATATYPE_INVOKE, DATATYPE_NOTIFY, DATATYPE_UPSTREAM_BANDWIDTH,
    DATATYPE_VIDEO_DATA,
};

pub const CONTROL_VALUE_UNDEFINED: i32 = -1;

/// A decoded application-level event, dispatched by `datatype`
#[derive(Clone, Debug)]
pub enum Event {
    FrameSize {
        size: u32,
    },
    BytesRead {
        bytes: u32,
    },
    Control {
        subtype: u16,
        value1: i32,
        value2: i32,
        value3: i32,
    },
    DownstreamBandwidth {
        bps: u32,
    },
    UpstreamBandwidth {
        bps: u32,
        limit_type: u8,
    },
    AudioData {
        data: Vec<u8>,
    },
    VideoData {
        data: Vec<u8>,
    },
    Notify {
        name: String,
        id: f64,
        argv: Vec<AMF0Value>,
    },
    Invoke {
        name: String,
        id: f64,
        argv: Vec<AMF0Value>,
    },
}

impl Event {
    /// The `datatype` byte this event would be carried under on the wire
    pub fn datatype(&self) -> u8 {
        match self {
            Event::FrameSize { .. } => DATATYPE_FRAME_SIZE,
            Event::BytesRead { .. } => DATATYPE_BYTES_READ,
            Event::Control { .. } => DATATYPE_CONTROL,
            Event::DownstreamBandwidth { .. } => DATATYPE_DOWNSTREAM_BANDWIDTH,
            Event::UpstreamBandwidth { .. } => DATATYPE_UPSTREAM_BANDWIDTH,
            Event::AudioData { .. } => DATATYPE_AUDIO_DATA,
            Event::VideoData { .. } => DATATYPE_VIDEO_DATA,
            Event::Notify { .. } => DATATYPE_NOTIFY,
            Event::Invoke { .. } => DATATYPE_INVOKE,
        }
    }

    /// Decodes a message body given its `datatype`. Fails with `UnknownDatatype` for
    /// anything not in the table, and `TrailingData` if bytes remain after decoding.
    pub fn decode(datatype: u8, body: &[u8]) -> Result<Event, RtmpError> {
        match datatype {
            DATATYPE_FRAME_SIZE => {
                require_len(body, 4)?;
                Ok(Event::FrameSize {
                    size: BigEndian::read_u32(&body[0..4]),
                })
            }
            DATATYPE_BYTES_READ => {
                require_len(body, 4)?;
                Ok(Event::BytesRead {
                    bytes: BigEndian::read_u32(&body[0..4]),
                })
            }
            DATATYPE_CONTROL => decode_control(body),
            DATATYPE_DOWNSTREAM_BANDWIDTH => {
                require_len(body, 4)?;
                Ok(Event::DownstreamBandwidth {
                    bps: BigEndian::read_u32(&body[0..4]),
                })
            }
            DATATYPE_UPSTREAM_BANDWIDTH => {
                require_len(body, 5)?;
                Ok(Event::UpstreamBandwidth {
                    bps: BigEndian::read_u32(&body[0..4]),
                    limit_type: body[4],
                })
            }
            DATATYPE_AUDIO_DATA => Ok(Event::AudioData {
                data: body.to_vec(),
            }),
            DATATYPE_VIDEO_DATA => Ok(Event::VideoData {
                data: body.to_vec(),
            }),
            DATATYPE_NOTIFY => {
                let (name, id, argv) = decode_command_body(body)?;
                Ok(Event::Notify { name, id, argv })
            }
            DATATYPE_INVOKE => {
                let (name, id, argv) = decode_command_body(body)?;
                Ok(Event::Invoke { name, id, argv })
            }
            other => Err(RtmpError::UnknownDatatype(other)),
        }
    }

    /// Encodes the event's message body. The datatype itself belongs in the chunk
    /// header and is not part of this output.
    pub fn encode(&self) -> Result<Vec<u8>, RtmpError> {
        match self {
            Event::FrameSize { size } => Ok(encode_u32(*size)),
            Event::BytesRead { bytes } => Ok(encode_u32(*bytes)),
            Event::Control {
                subtype,
                value1,
                value2,
                value3,
            } => {
                let mut buf = Vec::with_capacity(14);
                let mut b2 = [0u8; 2];
                BigEndian::write_u16(&mut b2, *subtype);
                buf.extend_from_slice(&b2);
                buf.extend_from_slice(&encode_i32(*value1));
                buf.extend_from_slice(&encode_i32(*value2));
                buf.extend_from_slice(&encode_i32(*value3));
                Ok(buf)
            }
            Event::DownstreamBandwidth { bps } => Ok(encode_u32(*bps)),
            Event::UpstreamBandwidth { bps, limit_type } => {
                let mut buf = encode_u32(*bps);
                buf.push(*limit_type);
                Ok(buf)
            }
            Event::AudioData { data } => Ok(data.clone()),
            Event::VideoData { data } => Ok(data.clone()),
            Event::Notify { name, id, argv } => encode_command_body(name, *id, argv),
            Event::Invoke { name, id, argv } => encode_command_body(name, *id, argv),
        }
    }
}

fn require_len(body: &[u8], n: usize) -> Result<(), RtmpError> {
    if body.len() < n {
        Err(RtmpError::EncodeError(format!(
            "event body too short: need {n}, got {}",
            body.len()
        )))
    } else if body.len() > n {
        Err(RtmpError::TrailingData)
    } else {
        Ok(())
    }
}

fn encode_u32(value: u32) -> Vec<u8> {
    let mut b = [0u8; 4];
    BigEndian::write_u32(&mut b, value);
    b.to_vec()
}

fn encode_i32(value: i32) -> [u8; 4] {
    let mut b = [0u8; 4];
    BigEndian::write_i32(&mut b, value);
    b
}

/// Control events are lenient on decode (a short body defaults trailing value2/value3
/// to `-1`) and strict on encode (always three values are written).
fn decode_control(body: &[u8]) -> Result<Event, RtmpError> {
    if body.len() < 2 {
        return Err(RtmpError::EncodeError(
            "control event missing subtype".to_string(),
        ));
    }

    let subtype = BigEndian::read_u16(&body[0..2]);

    let read_i32_or_default = |offset: usize| -> i32 {
        if body.len() >= offset + 4 {
            BigEndian::read_i32(&body[offset..offset + 4])
        } else {
            CONTROL_VALUE_UNDEFINED
        }
    };

    let value1 = read_i32_or_default(2);
    let value2 = read_i32_or_default(6);
    let value3 = read_i32_or_default(10);

    if body.len() > 14 {
        return Err(RtmpError::TrailingData);
    }

    Ok(Event::Control {
        subtype,
        value1,
        value2,
        value3,
    })
}

/// Decodes a NOTIFY/INVOKE body: `name` (string), `id` (number), then `argv` until
/// end of body, each read via the external AMF codec.
fn decode_command_body(body: &[u8]) -> Result<(String, f64, Vec<AMF0Value>), RtmpError> {
    let mut cursor = AMFDecodingCursor::new(body.len());

    let name_value = AMF0Value::read(&mut cursor, body)
        .map_err(|_| RtmpError::AmfDecodeError("could not read command name".to_string()))?;
    let id_value = AMF0Value::read(&mut cursor, body)
        .map_err(|_| RtmpError::AmfDecodeError("could not read command id".to_string()))?;

    let name = name_value.get_string().to_string();
    let id = id_value.get_float();

    let mut argv = Vec::new();
    while !cursor.ended() {
        let value = AMF0Value::read(&mut cursor, body)
            .map_err(|_| RtmpError::AmfDecodeError("could not read command argument".to_string()))?;
        argv.push(value);
    }

    Ok((name, id, argv))
}

fn encode_command_body(name: &str, id: f64, argv: &[AMF0Value]) -> Result<Vec<u8>, RtmpError> {
    let mut buf = AMF0Value::encode_string(name);
    buf.extend(AMF0Value::encode_number(id));

    for value in argv {
        buf.extend(value.encode());
    }

    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_size_round_trips() {
        let event = Event::FrameSize { size: 4096 };
        let body = event.encode().unwrap();
        assert_eq!(body, vec![0x00, 0x00, 0x10, 0x00]);

        let decoded = Event::decode(DATATYPE_FRAME_SIZE, &body).unwrap();
        match decoded {
            Event::FrameSize { size } => assert_eq!(size, 4096),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn control_event_decode_is_lenient_on_short_body() {
        let mut body = vec![0x00, 0x06]; // subtype PING
        body.extend_from_slice(&encode_i32(7));

        let decoded = Event::decode(DATATYPE_CONTROL, &body).unwrap();
        match decoded {
            Event::Control {
                subtype,
                value1,
                value2,
                value3,
            } => {
                assert_eq!(subtype, 6);
                assert_eq!(value1, 7);
                assert_eq!(value2, -1);
                assert_eq!(value3, -1);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn control_event_encode_always_writes_three_values() {
        let event = Event::Control {
            subtype: 6,
            value1: 7,
            value2: -1,
            value3: -1,
        };

        let body = event.encode().unwrap();
        assert_eq!(body.len(), 14);
    }

    #[test]
    fn trailing_bytes_fail_decode() {
        let mut body = vec![0x00, 0x00, 0x10, 0x00];
        body.push(0xFF);

        let result = Event::decode(DATATYPE_FRAME_SIZE, &body);
        assert!(matches!(result, Err(RtmpError::TrailingData)));
    }

    #[test]
    fn unknown_datatype_fails() {
        let result = Event::decode(0x42, &[]);
        assert!(matches!(result, Err(RtmpError::UnknownDatatype(0x42))));
    }

    #[test]
    fn notify_round_trips_name_id_and_argv() {
        let event = Event::Invoke {
            name: "connect".to_string(),
            id: 1.0,
            argv: vec![AMF0Value::Number { value: 42.0 }],
        };

        let body = event.encode().unwrap();
        let decoded = Event::decode(DATATYPE_INVOKE, &body).unwrap();

        match decoded {
            Event::Invoke { name, id, argv } => {
                assert_eq!(name, "connect");
                assert_eq!(id, 1.0);
                assert_eq!(argv.len(), 1);
                assert_eq!(argv[0].get_float(), 42.0);
            }
            _ => panic!("wrong variant"),
        }
    }
}
