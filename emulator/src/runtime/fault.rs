use parse_display::Display;
use thiserror::Error;

use crate::constants::{Address, Word};
use crate::isa::Operation;
use crate::transport::{code, RequestError};

use super::registers::{ErrorFlags, Mode};

/// Kind of memory access
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum Access {
    Load,
    Store,
}

impl Access {
    const fn flag(self) -> ErrorFlags {
        match self {
            Access::Load => ErrorFlags::LOAD,
            Access::Store => ErrorFlags::STORE,
        }
    }
}

/// Terminal error conditions of the processor
#[derive(Error, Debug)]
pub enum Fault {
    #[error("{access} of address {address} not allowed in {mode} mode")]
    Permission {
        access: Access,
        address: Address,
        mode: Mode,
    },

    #[error("could not load address {address}")]
    Load {
        address: Address,
        source: RequestError,
    },

    #[error("could not store to address {address}")]
    Store {
        address: Address,
        source: RequestError,
    },

    #[error("invalid opcode {opcode} at address {address}")]
    InvalidOpcode { address: Address, opcode: Word },

    #[error("invalid instruction {opcode} reached execution")]
    InvalidInstruction { opcode: Word },

    #[error("stack underflow (%sp = {sp})")]
    StackUnderflow { sp: Address },

    #[error("arithmetic overflow in {operation}")]
    Overflow { operation: Operation },

    #[error("invalid port {port}")]
    InvalidPort { port: Word },

    #[error("could not write to the console")]
    Console(#[from] std::io::Error),
}

/// Whether a failed request was rejected because of its address
fn out_of_range(source: &RequestError) -> bool {
    matches!(
        source,
        RequestError::Rejected {
            code: code::EFAULT,
            ..
        }
    )
}

impl Fault {
    /// Error flags raised by this fault, not counting the phase it occurred in
    #[must_use]
    pub fn flags(&self) -> ErrorFlags {
        match self {
            Fault::Permission { access, .. } => ErrorFlags::PERMISSION | access.flag(),
            Fault::Load { source, .. } if out_of_range(source) => {
                ErrorFlags::LOAD | ErrorFlags::RANGE
            }
            Fault::Load { .. } => ErrorFlags::LOAD,
            Fault::Store { source, .. } if out_of_range(source) => {
                ErrorFlags::STORE | ErrorFlags::RANGE
            }
            Fault::Store { .. } => ErrorFlags::STORE,
            Fault::InvalidOpcode { .. } => ErrorFlags::INVALID_OPCODE | ErrorFlags::RANGE,
            Fault::InvalidInstruction { .. } => ErrorFlags::INVALID_OPCODE,
            Fault::StackUnderflow { .. } => ErrorFlags::UNDERFLOW,
            Fault::Overflow { .. } => ErrorFlags::OVERFLOW,
            Fault::InvalidPort { .. } => ErrorFlags::RANGE,
            Fault::Console(_) => ErrorFlags::empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transport::{Message, TransportError};

    #[test]
    fn flags_test() {
        let fault = Fault::Permission {
            access: Access::Store,
            address: 1200,
            mode: Mode::User,
        };
        assert_eq!(fault.flags(), ErrorFlags::PERMISSION | ErrorFlags::STORE);
        assert_eq!(
            fault.to_string(),
            "store of address 1200 not allowed in user mode"
        );

        let fault = Fault::Load {
            address: -4,
            source: RequestError::Rejected {
                request: Message::read(-4),
                code: code::EFAULT,
            },
        };
        assert_eq!(fault.flags(), ErrorFlags::LOAD | ErrorFlags::RANGE);

        let fault = Fault::Load {
            address: 4,
            source: RequestError::Transport(TransportError::Closed),
        };
        assert_eq!(fault.flags(), ErrorFlags::LOAD);

        // The cause is only reachable through the source chain
        assert_eq!(fault.to_string(), "could not load address 4");
        let source = std::error::Error::source(&fault).unwrap();
        assert_eq!(source.to_string(), "channel closed by peer");
    }
}
