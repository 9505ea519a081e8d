use thiserror::Error;
use tracing::{debug, info, warn};

use crate::constants::{Address, Word, NWORDS};
use crate::transport::{code, Link, Message, Op, TransportError};

/// Represents errors related to memory manipulations
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MemoryError {
    /// The given address was invalid
    #[error("invalid address {0}")]
    InvalidAddress(Address),
}

/// Holds the memory words of the computer.
///
/// It has [`NWORDS`] words, all zero on creation.
#[derive(Clone, PartialEq, Eq)]
pub struct Memory {
    inner: Box<[Word; NWORDS]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self {
            inner: Box::new([0; NWORDS]),
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Memory {{ nwords: {NWORDS}, .. }}")
    }
}

impl Memory {
    fn index(address: Address) -> Result<usize, MemoryError> {
        address
            .try_into()
            .ok()
            .filter(|&index: &usize| index < NWORDS)
            .ok_or(MemoryError::InvalidAddress(address))
    }

    /// Get the word at an address
    ///
    /// # Errors
    ///
    /// It fails if the address is out of bounds.
    pub fn get(&self, address: Address) -> Result<Word, MemoryError> {
        Ok(self.inner[Self::index(address)?])
    }

    /// Set the word at an address
    ///
    /// # Errors
    ///
    /// It fails if the address is out of bounds. The memory is left untouched.
    pub fn set(&mut self, address: Address, value: Word) -> Result<(), MemoryError> {
        self.inner[Self::index(address)?] = value;
        Ok(())
    }

    #[must_use]
    pub fn words(&self) -> &[Word; NWORDS] {
        &self.inner
    }

    pub fn words_mut(&mut self) -> &mut [Word; NWORDS] {
        &mut self.inner
    }

    /// A printable view of the memory, 10 words per line, all-zero lines
    /// left out
    #[must_use]
    pub fn dump(&self) -> MemoryDump<'_> {
        MemoryDump(self)
    }
}

pub struct MemoryDump<'a>(&'a Memory);

impl std::fmt::Display for MemoryDump<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const WORDS_PER_LINE: usize = 10;

        for (line, words) in self.0.inner.chunks(WORDS_PER_LINE).enumerate() {
            if words.iter().all(|&w| w == 0) {
                continue;
            }

            write!(f, "[{:04}]", line * WORDS_PER_LINE)?;
            for word in words {
                write!(f, " {word:04}")?;
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

/// The memory side of the transport
///
/// It owns the memory and serves load and store requests one at a time, in
/// arrival order.
#[derive(Debug, Default)]
pub struct MemoryService {
    memory: Memory,
    served: u64,
}

impl MemoryService {
    #[must_use]
    pub fn new(memory: Memory) -> Self {
        Self { memory, served: 0 }
    }

    #[must_use]
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    #[must_use]
    pub fn into_memory(self) -> Memory {
        self.memory
    }

    /// Number of requests answered so far
    #[must_use]
    pub fn served(&self) -> u64 {
        self.served
    }

    /// Answer a single request
    ///
    /// Invalid requests are answered with an error code; they never stop the
    /// service.
    pub fn handle(&mut self, request: &Message) -> Message {
        self.served += 1;

        let mut response = Message {
            error: code::OK,
            ..*request
        };

        match request.op {
            Op::Read => match self.memory.get(request.address) {
                Ok(value) => response.value = value,
                Err(e) => {
                    debug!(%request, error = %e, "Rejecting load");
                    response.error = code::EFAULT;
                }
            },

            Op::Write => {
                if let Err(e) = self.memory.set(request.address, request.value) {
                    debug!(%request, error = %e, "Rejecting store");
                    response.error = code::EFAULT;
                }
            }

            Op::Unknown(tag) => {
                warn!(%request, tag, "Unknown operation");
                response.error = code::ENOMSG;
            }
        }

        response
    }

    /// Serve requests until the peer closes the channel
    ///
    /// # Errors
    ///
    /// Any transport failure other than the peer closing its end is returned.
    #[tracing::instrument(skip_all)]
    pub fn serve<L: Link>(&mut self, link: &mut L) -> Result<(), TransportError> {
        info!("Serving memory requests");

        loop {
            let request = match link.receive() {
                Ok(request) => request,
                Err(TransportError::Closed) => {
                    info!(served = self.served, "Channel closed, stopping");
                    return Ok(());
                }
                Err(e) => return Err(e),
            };

            let response = self.handle(&request);
            link.send(&response)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::StreamLink;

    #[test]
    fn bounds_test() {
        let mut memory = Memory::default();
        assert_eq!(memory.get(0), Ok(0));
        assert_eq!(memory.set(1999, 5), Ok(()));
        assert_eq!(memory.get(1999), Ok(5));
        assert_eq!(memory.get(2000), Err(MemoryError::InvalidAddress(2000)));
        assert_eq!(memory.set(-1, 5), Err(MemoryError::InvalidAddress(-1)));
    }

    #[test]
    fn store_past_the_end_test() {
        let mut service = MemoryService::default();
        service.handle(&Message::write(1999, 77));

        let response = service.handle(&Message::write(2000, 5));
        assert_eq!(response.error, code::EFAULT);
        assert_eq!(response.address, 2000);
        assert_eq!(service.memory().get(1999), Ok(77));
    }

    #[test]
    fn load_test() {
        let mut memory = Memory::default();
        memory.set(42, -3).unwrap();
        let mut service = MemoryService::new(memory);

        let response = service.handle(&Message::read(42));
        assert_eq!(response, Message { value: -3, ..Message::read(42) });

        let response = service.handle(&Message::read(-7));
        assert_eq!(response.error, code::EFAULT);
        assert_eq!(service.served(), 2);
    }

    #[test]
    fn unknown_op_test() {
        let mut service = MemoryService::default();
        let request = Message {
            op: Op::Unknown(3),
            value: 9,
            ..Message::read(12)
        };

        let response = service.handle(&request);
        assert_eq!(response.error, code::ENOMSG);
        assert_eq!(response.address, 12);
        assert_eq!(response.op, Op::Unknown(3));
        assert_eq!(service.memory().get(12), Ok(0));
    }

    #[test]
    fn serve_test() {
        let mut input = Vec::new();
        input.extend_from_slice(&Message::write(3, 11).encode());
        input.extend_from_slice(&Message::read(3).encode());
        input.extend_from_slice(&Message::read(4000).encode());

        let mut service = MemoryService::default();
        let mut link = StreamLink::new(Cursor::new(input), Vec::new());
        service.serve(&mut link).unwrap();
        assert_eq!(service.served(), 3);

        let (_, output) = link.into_inner();
        let responses: Vec<Message> = output
            .chunks_exact(crate::transport::MESSAGE_SIZE)
            .map(|chunk| Message::decode(chunk.try_into().unwrap()))
            .collect();

        assert_eq!(
            responses,
            vec![
                Message::write(3, 11),
                Message { value: 11, ..Message::read(3) },
                Message { error: code::EFAULT, ..Message::read(4000) },
            ]
        );
    }

    #[test]
    fn dump_test() {
        let mut memory = Memory::default();
        memory.set(0, 1).unwrap();
        memory.set(1, 5).unwrap();
        memory.set(2, 10).unwrap();
        memory.set(3, 50).unwrap();
        memory.set(1005, 30).unwrap();

        assert_eq!(
            memory.dump().to_string(),
            indoc::indoc! {"
                [0000] 0001 0005 0010 0050 0000 0000 0000 0000 0000 0000
                [1000] 0000 0000 0000 0000 0000 0030 0000 0000 0000 0000
            "}
        );
    }
}
