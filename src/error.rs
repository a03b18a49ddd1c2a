// Error taxonomy for the RTMP engine core

use thiserror::Error;

/// Errors produced while decoding, encoding, or dispatching RTMP traffic
#[derive(Error, Debug)]
pub enum RtmpError {
    /// The decoder needs more bytes before it can make progress. Non-fatal: triggers a pause,
    /// not a connection close.
    #[error("short read: need more bytes")]
    ShortRead,

    /// Bad version byte or echo mismatch during the handshake. Fatal.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The event codec received a `datatype` it does not know how to dispatch. Fatal.
    #[error("unknown event datatype: {0:#x}")]
    UnknownDatatype(u8),

    /// A decoded event left unconsumed bytes in its message body. Fatal.
    #[error("trailing data after decoding event body")]
    TrailingData,

    /// A required field was left unset, or held a value outside its domain, while encoding.
    /// Fatal for that event; logged; the connection continues unless the event was critical.
    #[error("encode error: {0}")]
    EncodeError(String),

    /// A decode error surfaced from the external AMF codec.
    #[error("AMF decode error: {0}")]
    AmfDecodeError(String),

    /// An encode error surfaced from the external AMF codec.
    #[error("AMF encode error: {0}")]
    AmfEncodeError(String),

    /// Writing to a channel that was never registered, or activating an unknown channel.
    /// Fatal, closes the connection with a diagnostic.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Attempted to register a subscriber that is already registered.
    #[error("already subscribed")]
    AlreadySubscribed,

    /// Attempted to unregister a subscriber that was never registered.
    #[error("not subscribed")]
    NotSubscribed,

    /// The application hook rejected a publish request. Surfaced to the client as
    /// `NetStream.Publish.BadName`; the connection continues.
    #[error("publish rejected: {0}")]
    PublishRejected(String),

    /// Transport-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RtmpError {
    /// Whether this error requires the connection to be closed
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RtmpError::HandshakeFailed(_)
                | RtmpError::UnknownDatatype(_)
                | RtmpError::TrailingData
                | RtmpError::ProtocolViolation(_)
                | RtmpError::Io(_)
        )
    }
}

/// Result alias used throughout the engine core
pub type RtmpResult<T> = Result<T, RtmpError>;
