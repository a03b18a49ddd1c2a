// RTMP wire-format constants

/// Default TCP port for RTMP
pub const RTMP_PORT_DEFAULT: u32 = 1935;

/// Default chunk (frame) size, in bytes, before any FRAME_SIZE event is exchanged
pub const RTMP_DEFAULT_FRAME_SIZE: u32 = 128;

pub const RTMP_MIN_CHUNK_SIZE: usize = 1;
pub const RTMP_MAX_CHUNK_SIZE: usize = 16777215;

// Chunk header formats (2-bit prefix of the basic header byte)
pub const RTMP_CHUNK_TYPE_0: u8 = 0; // Full absolute header
pub const RTMP_CHUNK_TYPE_1: u8 = 1; // Delta + bodyLength + datatype
pub const RTMP_CHUNK_TYPE_2: u8 = 2; // Delta only
pub const RTMP_CHUNK_TYPE_3: u8 = 3; // Nothing, all fields inherited

/// 24-bit timestamp field value that signals a following 32-bit extended timestamp
pub const RTMP_EXTENDED_TIMESTAMP_MARKER: u32 = 0xFFFFFF;

// Reserved / well-known channel ids
pub const RTMP_CHANNEL_CONTROL: u32 = 2;
pub const RTMP_CHANNEL_INVOKE: u32 = 3;
pub const RTMP_CHANNEL_AUDIO: u32 = 4;
pub const RTMP_CHANNEL_VIDEO: u32 = 5;
pub const RTMP_CHANNEL_DATA: u32 = 6;

/// Event datatypes, as carried in the chunk header's `datatype` field.
///
/// These match the wire values used by the reference implementation this engine
/// was modeled on, not the values some other RTMP write-ups use for audio/video.
pub const DATATYPE_FRAME_SIZE: u8 = 0x01;
pub const DATATYPE_BYTES_READ: u8 = 0x03;
pub const DATATYPE_CONTROL: u8 = 0x04;
pub const DATATYPE_DOWNSTREAM_BANDWIDTH: u8 = 0x05;
pub const DATATYPE_UPSTREAM_BANDWIDTH: u8 = 0x06;
pub const DATATYPE_AUDIO_DATA: u8 = 0x07;
pub const DATATYPE_VIDEO_DATA: u8 = 0x08;
pub const DATATYPE_NOTIFY: u8 = 0x12;
pub const DATATYPE_INVOKE: u8 = 0x14;

// Control event subtypes
pub const CONTROL_STREAM_BEGIN: u16 = 0x00;
pub const CONTROL_STREAM_EOF: u16 = 0x01;
pub const CONTROL_STREAM_DRY: u16 = 0x02;
pub const CONTROL_SET_BUFFER_LENGTH: u16 = 0x03;
pub const CONTROL_STREAM_IS_RECORDED: u16 = 0x04;
pub const CONTROL_PING: u16 = 0x06;
pub const CONTROL_PONG: u16 = 0x07;

/// Control stream id, created implicitly on every connection
pub const CONTROL_STREAM_ID: u32 = 0;

/// Size, in bytes, of the fixed handshake payload exchanged in each direction
pub const HANDSHAKE_PAYLOAD_SIZE: usize = 1536;

/// RTMP protocol version byte that leads the handshake
pub const RTMP_VERSION: u8 = 0x03;
