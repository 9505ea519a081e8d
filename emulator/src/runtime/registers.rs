use bitflags::bitflags;
use parse_display::{Display, FromStr};

use crate::constants as C;

/// Privilege level of the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, FromStr)]
#[display(style = "lowercase")]
pub enum Mode {
    #[default]
    User,
    System,
}

impl Mode {
    /// Top of the stack used in this mode
    #[must_use]
    pub const fn stack_base(self) -> C::Address {
        match self {
            Mode::User => C::USER_STACK_BASE,
            Mode::System => C::SYSTEM_STACK_BASE,
        }
    }

    /// The mode a piece of code located at `address` is meant to run in
    #[must_use]
    pub const fn for_address(address: C::Address) -> Self {
        if address <= C::USER_STACK_BASE {
            Mode::User
        } else {
            Mode::System
        }
    }
}

bitflags! {
    /// Error flags, set when a fault is raised and never cleared
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ErrorFlags: u16 {
        const FETCH          = 0b00_0000_0001;
        const DECODE         = 0b00_0000_0010;
        const EXECUTE        = 0b00_0000_0100;
        const LOAD           = 0b00_0000_1000;
        const STORE          = 0b00_0001_0000;
        const RANGE          = 0b00_0010_0000;
        const PERMISSION     = 0b00_0100_0000;
        const UNDERFLOW      = 0b00_1000_0000;
        const OVERFLOW       = 0b01_0000_0000;
        const INVALID_OPCODE = 0b10_0000_0000;
    }
}

impl std::fmt::Display for ErrorFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            write!(f, "none")
        } else {
            bitflags::parser::to_writer(self, f)
        }
    }
}

/// Control flags of the processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlFlags {
    pub mode: Mode,

    /// Timer and `Interrupt` traps are taken only when set
    pub interrupts: bool,

    /// Log a snapshot of the processor before each fetch
    pub debug: bool,

    /// A fault was raised
    pub fault: bool,

    /// The processor halted, either on `End` or on a fault
    pub stop: bool,

    /// Pause after every instruction
    pub step: bool,
}

impl Default for ControlFlags {
    fn default() -> Self {
        // On startup, the processor runs the user program with interrupts enabled
        Self {
            mode: Mode::User,
            interrupts: true,
            debug: false,
            fault: false,
            stop: false,
            step: false,
        }
    }
}

impl std::fmt::Display for ControlFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "mode = {} | ie = {} | debug = {} | fault = {} | stop = {} | step = {}",
            self.mode,
            u8::from(self.interrupts),
            u8::from(self.debug),
            u8::from(self.fault),
            u8::from(self.stop),
            u8::from(self.step),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    /// Instruction register
    pub ir: C::Word,

    /// Program counter
    pub pc: C::Address,

    /// Stack pointer
    pub sp: C::Address,

    /// Accumulator
    pub ac: C::Word,

    /// Index register
    pub x: C::Word,

    /// Index register
    pub y: C::Word,

    /// Number of instructions retired
    pub cycles: u64,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            ir: 0,
            pc: C::USER_PROGRAM_LOAD,
            sp: C::USER_STACK_BASE,
            ac: 0,
            x: 0,
            y: 0,
            cycles: 0,
        }
    }
}

impl std::fmt::Display for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "%ir = {} | %pc = {} | %sp = {} | %ac = {} | %x = {} | %y = {} | cycles = {}",
            self.ir, self.pc, self.sp, self.ac, self.x, self.y, self.cycles
        )
    }
}
