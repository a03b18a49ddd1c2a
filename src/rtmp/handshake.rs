// Handshake FSM: the fixed 1 + 1536 + 1536 byte exchange that precedes all chunked
// traffic

use rand::{rngs::StdRng, RngCore, SeedableRng};

use crate::buffer::ByteBuffer;
use crate::error::RtmpError;

use super::constants::{HANDSHAKE_PAYLOAD_SIZE, RTMP_VERSION};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Client,
    Server,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HandshakeState {
    HandshakeStart,
    HandshakeAwaitingPeer,
    HandshakeAwaitingEcho,
    Stream,
    Closed,
}

/// Drives one side of the handshake. Reads from the shared connection byte buffer
/// the same way the decoder does: on short read it reports `ShortRead` and leaves
/// the buffer untouched, to be retried once more bytes arrive.
pub struct Handshake {
    role: Role,
    state: HandshakeState,
    my_payload: Vec<u8>,
    peer_payload: Vec<u8>,
}

/// Outcome of one `advance` call
pub struct HandshakeStep {
    /// Bytes that must be written to the peer as a result of this step
    pub to_send: Vec<u8>,
    /// Set once the handshake completes: any bytes past the handshake's own framing
    /// that had already arrived in the same buffer, to be handed to the decoder
    pub trailing: Option<Vec<u8>>,
}

impl Handshake {
    /// Starts a client-side handshake, generating `myHandshake` and returning the
    /// initial `0x03 ‖ myHandshake` to send immediately.
    pub fn new_client() -> (Handshake, Vec<u8>) {
        let my_payload = random_payload();

        let mut to_send = Vec::with_capacity(1 + HANDSHAKE_PAYLOAD_SIZE);
        to_send.push(RTMP_VERSION);
        to_send.extend_from_slice(&my_payload);

        (
            Handshake {
                role: Role::Client,
                state: HandshakeState::HandshakeAwaitingPeer,
                my_payload,
                peer_payload: Vec::new(),
            },
            to_send,
        )
    }

    /// Starts a server-side handshake. Nothing is sent until the client's first
    /// message has been read.
    pub fn new_server() -> Handshake {
        Handshake {
            role: Role::Server,
            state: HandshakeState::HandshakeStart,
            my_payload: random_payload(),
            peer_payload: Vec::new(),
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_complete(&self) -> bool {
        self.state == HandshakeState::Stream
    }

    /// Attempts to advance the handshake using bytes available in `buf`. On short
    /// read, `buf`'s cursor is left exactly where it was and `ShortRead` is returned
    /// so the caller can pause and retry once more bytes arrive.
    pub fn advance(&mut self, buf: &mut ByteBuffer) -> Result<HandshakeStep, RtmpError> {
        match (self.role, self.state) {
            (Role::Server, HandshakeState::HandshakeStart) => self.server_read_c0_c1(buf),
            (Role::Client, HandshakeState::HandshakeAwaitingPeer) => {
                self.client_read_s0_s1_s2(buf)
            }
            (Role::Server, HandshakeState::HandshakeAwaitingEcho) => self.server_read_echo(buf),
            (_, HandshakeState::Stream) => Ok(HandshakeStep {
                to_send: Vec::new(),
                trailing: None,
            }),
            (_, HandshakeState::Closed) => Err(RtmpError::HandshakeFailed(
                "advance called after handshake closed".to_string(),
            )),
            (Role::Client, HandshakeState::HandshakeAwaitingEcho)
            | (Role::Server, HandshakeState::HandshakeAwaitingPeer) => Err(
                RtmpError::HandshakeFailed("handshake in an unreachable state".to_string()),
            ),
        }
    }

    fn server_read_c0_c1(&mut self, buf: &mut ByteBuffer) -> Result<HandshakeStep, RtmpError> {
        let needed = 1 + HANDSHAKE_PAYLOAD_SIZE;
        let bytes = buf.peek(needed).map_err(|_| RtmpError::ShortRead)?;

        if bytes[0] != RTMP_VERSION {
            self.state = HandshakeState::Closed;
            return Err(RtmpError::HandshakeFailed(format!(
                "bad version byte: {:#x}",
                bytes[0]
            )));
        }

        let client_payload = bytes[1..needed].to_vec();
        buf.seek(needed).expect("bounds checked above");

        self.peer_payload = client_payload.clone();
        self.state = HandshakeState::HandshakeAwaitingEcho;

        let mut to_send = Vec::with_capacity(1 + 2 * HANDSHAKE_PAYLOAD_SIZE);
        to_send.push(RTMP_VERSION);
        to_send.extend_from_slice(&self.my_payload);
        to_send.extend_from_slice(&client_payload);

        Ok(HandshakeStep {
            to_send,
            trailing: None,
        })
    }

    fn server_read_echo(&mut self, buf: &mut ByteBuffer) -> Result<HandshakeStep, RtmpError> {
        let needed = HANDSHAKE_PAYLOAD_SIZE;
        let echo = buf.peek(needed).map_err(|_| RtmpError::ShortRead)?.to_vec();

        if echo != self.my_payload {
            self.state = HandshakeState::Closed;
            return Err(RtmpError::HandshakeFailed(
                "echo did not match server's handshake payload".to_string(),
            ));
        }

        buf.seek(needed).expect("bounds checked above");
        self.state = HandshakeState::Stream;

        let trailing = buf.remaining();
        let leftover = if trailing > 0 {
            Some(buf.read(trailing).expect("bounds checked above").to_vec())
        } else {
            None
        };

        Ok(HandshakeStep {
            to_send: Vec::new(),
            trailing: leftover,
        })
    }

    fn client_read_s0_s1_s2(&mut self, buf: &mut ByteBuffer) -> Result<HandshakeStep, RtmpError> {
        let needed = 1 + 2 * HANDSHAKE_PAYLOAD_SIZE;
        let bytes = buf.peek(needed).map_err(|_| RtmpError::ShortRead)?;

        if bytes[0] != RTMP_VERSION {
            self.state = HandshakeState::Closed;
            return Err(RtmpError::HandshakeFailed(format!(
                "bad version byte: {:#x}",
                bytes[0]
            )));
        }

        let peer_payload = bytes[1..1 + HANDSHAKE_PAYLOAD_SIZE].to_vec();
        let echo = &bytes[1 + HANDSHAKE_PAYLOAD_SIZE..needed];

        if echo != self.my_payload.as_slice() {
            self.state = HandshakeState::Closed;
            return Err(RtmpError::HandshakeFailed(
                "peer did not echo our handshake payload".to_string(),
            ));
        }

        buf.seek(needed).expect("bounds checked above");

        self.peer_payload = peer_payload.clone();
        self.state = HandshakeState::Stream;

        let trailing_len = buf.remaining();
        let leftover = if trailing_len > 0 {
            Some(
                buf.read(trailing_len)
                    .expect("bounds checked above")
                    .to_vec(),
            )
        } else {
            None
        };

        Ok(HandshakeStep {
            to_send: peer_payload,
            trailing: leftover,
        })
    }
}

fn random_payload() -> Vec<u8> {
    let mut bytes = vec![0u8; HANDSHAKE_PAYLOAD_SIZE];
    let mut rng = StdRng::from_os_rng();
    rng.fill_bytes(&mut bytes);
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_and_server_complete_handshake_and_agree_on_trailing_bytes() {
        let (mut client, c0_c1) = Handshake::new_client();
        let mut server = Handshake::new_server();

        let mut server_buf = ByteBuffer::new();
        server_buf.append(&c0_c1);

        let server_step = server.advance(&mut server_buf).unwrap();
        assert_eq!(server.state(), HandshakeState::HandshakeAwaitingEcho);

        let mut client_buf = ByteBuffer::new();
        client_buf.append(&server_step.to_send);
        // Simulate the next chunk header already having arrived in the same read
        client_buf.append(&[0xAB, 0xCD]);

        let client_step = client.advance(&mut client_buf).unwrap();
        assert!(client.is_complete());
        assert_eq!(client_step.trailing, Some(vec![0xAB, 0xCD]));

        let mut server_buf2 = ByteBuffer::new();
        server_buf2.append(&client_step.to_send);

        let server_step2 = server.advance(&mut server_buf2).unwrap();
        assert!(server.is_complete());
        assert_eq!(server_step2.trailing, None);
    }

    #[test]
    fn bad_version_byte_fails_handshake() {
        let mut server = Handshake::new_server();
        let mut buf = ByteBuffer::new();
        buf.push_garbage_version();

        let result = server.advance(&mut buf);
        assert!(result.is_err());
        assert_eq!(server.state(), HandshakeState::Closed);
    }

    #[test]
    fn echo_mismatch_fails_handshake() {
        let (mut client, _) = Handshake::new_client();

        let mut bogus = vec![RTMP_VERSION];
        bogus.extend(vec![0u8; HANDSHAKE_PAYLOAD_SIZE]); // peer payload
        bogus.extend(vec![0xFFu8; HANDSHAKE_PAYLOAD_SIZE]); // wrong echo

        let mut buf = ByteBuffer::new();
        buf.append(&bogus);

        let result = client.advance(&mut buf);
        assert!(result.is_err());
        assert_eq!(client.state(), HandshakeState::Closed);
    }

    trait TestBufExt {
        fn push_garbage_version(&mut self);
    }

    impl TestBufExt for ByteBuffer {
        fn push_garbage_version(&mut self) {
            let mut bytes = vec![0x99u8];
            bytes.extend(vec![0u8; HANDSHAKE_PAYLOAD_SIZE]);
            self.append(&bytes);
        }
    }
}
