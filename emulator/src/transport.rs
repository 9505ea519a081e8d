//! Request/response transport between the CPU and the memory service.
//!
//! Every exchange is a single fixed-size [`Message`]: the CPU writes a
//! request and blocks until the matching response is read back, so at most
//! one request is ever in flight.
//!
//! The wire format is 12 bytes, little-endian:
//!
//! ```text
//! 0       4       8     9     10        12
//! +-------+-------+-----+-----+---------+
//! |address| value |error| op  | reserved|
//! +-------+-------+-----+-----+---------+
//! ```

use std::io::{ErrorKind, Read, Write};

use parse_display::Display;
use thiserror::Error;
use tracing::trace;

use crate::constants as C;
use crate::memory::MemoryService;

/// Size of a message on the wire
pub const MESSAGE_SIZE: usize = 12;

/// Error codes carried in responses
pub mod code {
    /// The request was served
    pub const OK: u8 = 0;

    /// The address is outside of the memory
    pub const EFAULT: u8 = 14;

    /// The operation tag is unknown
    pub const ENOMSG: u8 = 42;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Op {
    #[display("R")]
    Read,
    #[display("W")]
    Write,
    #[display("?{0}")]
    Unknown(u8),
}

impl From<u8> for Op {
    fn from(tag: u8) -> Self {
        match tag {
            0 => Op::Read,
            1 => Op::Write,
            other => Op::Unknown(other),
        }
    }
}

impl From<Op> for u8 {
    fn from(op: Op) -> Self {
        match op {
            Op::Read => 0,
            Op::Write => 1,
            Op::Unknown(tag) => tag,
        }
    }
}

/// The unit of the transport protocol, used for both requests and responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub address: C::Address,
    pub value: C::Word,
    pub error: u8,
    pub op: Op,
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:08}:{:08}:{:02}",
            self.op, self.address, self.value, self.error
        )
    }
}

impl Message {
    #[must_use]
    pub const fn read(address: C::Address) -> Self {
        Self {
            address,
            value: 0,
            error: code::OK,
            op: Op::Read,
        }
    }

    #[must_use]
    pub const fn write(address: C::Address, value: C::Word) -> Self {
        Self {
            address,
            value,
            error: code::OK,
            op: Op::Write,
        }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error != code::OK
    }

    #[must_use]
    pub fn encode(&self) -> [u8; MESSAGE_SIZE] {
        let mut buf = [0; MESSAGE_SIZE];
        buf[0..4].copy_from_slice(&self.address.to_le_bytes());
        buf[4..8].copy_from_slice(&self.value.to_le_bytes());
        buf[8] = self.error;
        buf[9] = self.op.into();
        buf
    }

    #[must_use]
    pub fn decode(buf: &[u8; MESSAGE_SIZE]) -> Self {
        let [a0, a1, a2, a3, v0, v1, v2, v3, error, op, _, _] = *buf;
        Self {
            address: C::Address::from_le_bytes([a0, a1, a2, a3]),
            value: C::Word::from_le_bytes([v0, v1, v2, v3]),
            error,
            op: Op::from(op),
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed its end of the channel
    #[error("channel closed by peer")]
    Closed,

    #[error("no response pending on the channel")]
    NoResponse,

    #[error("transport I/O error")]
    Io(#[from] std::io::Error),
}

/// Errors of a single request, as seen by the requesting side
#[derive(Debug, Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The memory service answered with an error code
    #[error("request {request} rejected with error code {code}")]
    Rejected { request: Message, code: u8 },

    #[error("response {response} does not match request {request}")]
    Mismatch { request: Message, response: Message },
}

/// One end of a bidirectional channel carrying [`Message`]s
pub trait Link {
    /// Send a message to the peer
    ///
    /// # Errors
    ///
    /// Fails if the channel is broken.
    fn send(&mut self, message: &Message) -> Result<(), TransportError>;

    /// Block until a message arrives from the peer
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Closed`] once the peer is gone.
    fn receive(&mut self) -> Result<Message, TransportError>;

    /// Send a request and wait for its response
    ///
    /// # Errors
    ///
    /// Fails on transport errors, on error responses, and on responses that
    /// do not echo the request.
    fn exchange(&mut self, request: &Message) -> Result<Message, RequestError> {
        self.send(request)?;
        let response = self.receive()?;
        trace!(%request, %response, "exchange");

        if response.address != request.address || response.op != request.op {
            return Err(RequestError::Mismatch {
                request: *request,
                response,
            });
        }

        if response.is_error() {
            return Err(RequestError::Rejected {
                request: *request,
                code: response.error,
            });
        }

        Ok(response)
    }

    /// Load a word
    ///
    /// # Errors
    ///
    /// See [`Link::exchange`].
    fn read_word(&mut self, address: C::Address) -> Result<C::Word, RequestError> {
        self.exchange(&Message::read(address)).map(|r| r.value)
    }

    /// Store a word
    ///
    /// # Errors
    ///
    /// See [`Link::exchange`].
    fn write_word(&mut self, address: C::Address, value: C::Word) -> Result<(), RequestError> {
        self.exchange(&Message::write(address, value)).map(|_| ())
    }
}

/// A link over a pair of one-way byte streams
///
/// This is how the processes talk: the CPU and the memory service both use
/// their standard input and output, and the loader uses the pipes of the
/// child it spawned.
#[derive(Debug)]
pub struct StreamLink<R, W> {
    reader: R,
    writer: W,
}

impl<R: Read, W: Write> StreamLink<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self { reader, writer }
    }

    /// Give back the underlying streams
    pub fn into_inner(self) -> (R, W) {
        (self.reader, self.writer)
    }
}

impl<R: Read, W: Write> Link for StreamLink<R, W> {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        self.writer.write_all(&message.encode())?;
        self.writer.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Message, TransportError> {
        let mut buf = [0; MESSAGE_SIZE];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => Ok(Message::decode(&buf)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => Err(TransportError::Closed),
            Err(e) => Err(e.into()),
        }
    }
}

/// An in-process link to a memory service
///
/// Requests are served as soon as they are sent, and the response is kept
/// until the next call to [`Link::receive`].
#[derive(Debug, Default)]
pub struct LocalLink {
    service: MemoryService,
    pending: Option<Message>,
}

impl LocalLink {
    #[must_use]
    pub fn new(service: MemoryService) -> Self {
        Self {
            service,
            pending: None,
        }
    }

    #[must_use]
    pub fn service(&self) -> &MemoryService {
        &self.service
    }

    #[must_use]
    pub fn into_service(self) -> MemoryService {
        self.service
    }
}

impl Link for LocalLink {
    fn send(&mut self, message: &Message) -> Result<(), TransportError> {
        // The wire round-trip keeps the in-process path honest about the format
        let request = Message::decode(&message.encode());
        self.pending = Some(self.service.handle(&request));
        Ok(())
    }

    fn receive(&mut self) -> Result<Message, TransportError> {
        self.pending.take().ok_or(TransportError::NoResponse)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn encode_layout_test() {
        let message = Message {
            address: 1999,
            value: -2,
            error: code::EFAULT,
            op: Op::Write,
        };

        assert_eq!(
            message.encode(),
            [0xCF, 0x07, 0, 0, 0xFE, 0xFF, 0xFF, 0xFF, 14, 1, 0, 0]
        );
        assert_eq!(Message::decode(&message.encode()), message);
    }

    #[test]
    fn unknown_op_test() {
        let mut buf = Message::read(3).encode();
        buf[9] = 7;
        let message = Message::decode(&buf);
        assert_eq!(message.op, Op::Unknown(7));
        assert_eq!(message.encode(), buf);
    }

    #[test]
    fn stream_link_test() {
        // Pre-record the responses the peer would send
        let mut input = Vec::new();
        input.extend_from_slice(&Message::write(10, 42).encode());
        input.extend_from_slice(
            &Message {
                value: 42,
                ..Message::read(10)
            }
            .encode(),
        );

        let mut link = StreamLink::new(Cursor::new(input), Vec::new());
        link.write_word(10, 42).unwrap();
        assert_eq!(link.read_word(10).unwrap(), 42);

        // Once the recording is exhausted, the peer looks closed
        assert!(matches!(
            link.read_word(10),
            Err(RequestError::Transport(TransportError::Closed))
        ));

        let (_, output) = link.into_inner();
        assert_eq!(output.len(), 3 * MESSAGE_SIZE);
        assert_eq!(&output[..MESSAGE_SIZE], &Message::write(10, 42).encode());
    }

    #[test]
    fn mismatched_response_test() {
        let input = Message::read(11).encode().to_vec();
        let mut link = StreamLink::new(Cursor::new(input), Vec::new());
        assert!(matches!(
            link.read_word(10),
            Err(RequestError::Mismatch { .. })
        ));
    }

    #[test]
    fn local_link_test() {
        let mut link = LocalLink::default();
        link.write_word(5, 7).unwrap();
        assert_eq!(link.read_word(5).unwrap(), 7);
        assert!(matches!(
            link.write_word(2000, 1),
            Err(RequestError::Rejected {
                code: code::EFAULT,
                ..
            })
        ));
        assert!(matches!(link.receive(), Err(TransportError::NoResponse)));
    }
}
