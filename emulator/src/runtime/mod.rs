//! The CPU engine.
//!
//! A [`Cpu`] runs the fetch, decode, execute loop over a [`Link`] to the
//! memory service. It never owns memory itself: every load and store is a
//! request on the link.

use std::io::Write;

use parse_display::{Display, FromStr};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, error, info};

use crate::constants as C;
use crate::isa::{self, Instruction};
use crate::transport::{Link, RequestError};

mod fault;
mod microcode;
mod registers;

pub use self::fault::{Access, Fault};
pub use self::registers::{ControlFlags, ErrorFlags, Mode, Registers};

/// What to do when AddX/AddY/SubX/SubY/IncX/DecX overflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, FromStr)]
#[display(style = "lowercase")]
pub enum OverflowPolicy {
    /// Raise an overflow fault
    #[default]
    Fault,

    /// Two's-complement wrap around
    Wrap,
}

/// Startup parameters of the CPU
#[derive(Debug, Clone, Default)]
pub struct CpuConfig {
    /// Take a timer trap every this many cycles. `0` disables the timer.
    pub timer_interval: u64,

    /// Log a snapshot before each fetch
    pub debug: bool,

    pub overflow: OverflowPolicy,

    /// Seed for `Get`. Taken from the OS if unset.
    pub seed: Option<u64>,
}

/// Where the processor is in the instruction cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum Phase {
    Fetch,
    Decode,
    Execute,
}

impl Phase {
    const fn flag(self) -> ErrorFlags {
        match self {
            Phase::Fetch => ErrorFlags::FETCH,
            Phase::Decode => ErrorFlags::DECODE,
            Phase::Execute => ErrorFlags::EXECUTE,
        }
    }
}

/// Why [`Cpu::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// `End` was executed
    Halted,

    /// The `step` control flag is set and one instruction was executed
    Paused,
}

/// The two kinds of traps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum Trap {
    Timer,
    Syscall,
}

impl Trap {
    /// Entry point of the handler
    #[must_use]
    pub const fn entry(self) -> C::Address {
        match self {
            Trap::Timer => C::TIMER_PROGRAM_LOAD,
            Trap::Syscall => C::INTERRUPT_PROGRAM_LOAD,
        }
    }
}

/// A one-line view of the processor state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub registers: Registers,
    pub flags: ControlFlags,
    pub errors: ErrorFlags,

    /// Words between `%sp` and the stack base, top first
    pub stack: Vec<C::Word>,
}

impl std::fmt::Display for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} | {} | errors = {} | stack = [",
            self.registers, self.flags, self.errors
        )?;
        for (i, word) in self.stack.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{word}")?;
        }
        write!(f, "]")
    }
}

/// Deepest part of the stack shown in a snapshot
const SNAPSHOT_STACK_DEPTH: C::Address = 32;

pub struct Cpu<L> {
    pub registers: Registers,
    pub flags: ControlFlags,
    pub errors: ErrorFlags,
    instruction: Option<Instruction>,
    phase: Phase,
    config: CpuConfig,
    link: L,
    console: Box<dyn Write>,
    rng: StdRng,
}

impl<L> std::fmt::Debug for Cpu<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cpu {{ registers: {:?}, flags: {:?}, errors: {:?}, .. }}",
            self.registers, self.flags, self.errors
        )
    }
}

impl<L: Link> Cpu<L> {
    /// Create a processor in its startup state, writing `Put` output to stderr
    pub fn new(link: L, config: CpuConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let flags = ControlFlags {
            debug: config.debug,
            ..ControlFlags::default()
        };

        Self {
            registers: Registers::default(),
            flags,
            errors: ErrorFlags::empty(),
            instruction: None,
            phase: Phase::Fetch,
            config,
            link,
            console: Box::new(std::io::stderr()),
            rng,
        }
    }

    /// Send `Put` output somewhere else
    #[must_use]
    pub fn with_console(mut self, console: Box<dyn Write>) -> Self {
        self.console = console;
        self
    }

    /// The instruction of the current cycle, once decoded
    #[must_use]
    pub fn instruction(&self) -> Option<&Instruction> {
        self.instruction.as_ref()
    }

    #[must_use]
    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn into_link(self) -> L {
        self.link
    }

    fn check_access(&self, address: C::Address, access: Access) -> Result<(), Fault> {
        if self.flags.mode == Mode::User && address > C::USER_STACK_BASE {
            Err(Fault::Permission {
                access,
                address,
                mode: self.flags.mode,
            })
        } else {
            Ok(())
        }
    }

    /// Load a word, checking the address against the current mode
    ///
    /// # Errors
    ///
    /// Fails on privilege violations and on rejected requests.
    pub fn load(&mut self, address: C::Address) -> Result<C::Word, Fault> {
        self.check_access(address, Access::Load)?;
        self.link
            .read_word(address)
            .map_err(|source| Fault::Load { address, source })
    }

    /// Store a word, checking the address against the current mode
    ///
    /// # Errors
    ///
    /// Fails on privilege violations and on rejected requests.
    pub fn store(&mut self, address: C::Address, value: C::Word) -> Result<(), Fault> {
        self.check_access(address, Access::Store)?;
        self.link
            .write_word(address, value)
            .map_err(|source| Fault::Store { address, source })
    }

    /// Read a word without privilege checks, for diagnostics
    pub fn peek(&mut self, address: C::Address) -> Option<C::Word> {
        self.link.read_word(address).ok()
    }

    /// Write a word without privilege checks, for diagnostics
    ///
    /// # Errors
    ///
    /// Fails if the memory service rejects the request.
    pub fn poke(&mut self, address: C::Address, value: C::Word) -> Result<(), RequestError> {
        self.link.write_word(address, value)
    }

    fn push(&mut self, value: C::Word) -> Result<(), Fault> {
        let sp = self.registers.sp.wrapping_sub(1);
        self.store(sp, value)?;
        self.registers.sp = sp;
        Ok(())
    }

    fn pop(&mut self) -> Result<C::Word, Fault> {
        let sp = self.registers.sp;
        if sp >= self.flags.mode.stack_base() {
            return Err(Fault::StackUnderflow { sp });
        }

        let value = self.load(sp)?;
        self.registers.sp = sp.wrapping_add(1);
        Ok(value)
    }

    fn random(&mut self) -> C::Word {
        self.rng.random_range(1..=100)
    }

    fn put(&mut self, port: C::Word, value: C::Word) -> Result<(), Fault> {
        match port {
            1 => write!(self.console, "{value}")?,
            2 => {
                let c = u32::try_from(value)
                    .ok()
                    .and_then(char::from_u32)
                    .unwrap_or(char::REPLACEMENT_CHARACTER);
                write!(self.console, "{c}")?;
            }
            port => return Err(Fault::InvalidPort { port }),
        }

        self.console.flush()?;
        debug!(port, value, "put");
        Ok(())
    }

    /// Whether a timer trap is due before the next fetch
    #[must_use]
    pub fn timer_due(&self) -> bool {
        let interval = self.config.timer_interval;
        self.flags.interrupts
            && self.registers.cycles != 0
            && interval != 0
            && self.registers.cycles % interval == 0
    }

    /// Enter a trap handler
    ///
    /// The current `%sp` and the return address are saved on the system
    /// stack, then the processor switches to system mode with interrupts
    /// disabled. Returns `false` without doing anything if interrupts are
    /// disabled.
    ///
    /// # Errors
    ///
    /// Fails if the registers can't be saved.
    #[tracing::instrument(skip(self))]
    pub fn trap(&mut self, trap: Trap) -> Result<bool, Fault> {
        if !self.flags.interrupts {
            debug!("Interrupts disabled, dropping trap");
            return Ok(false);
        }

        let sp = self.registers.sp;
        let pc = match trap {
            Trap::Timer => self.registers.pc,
            // Return right after the `Interrupt` instruction
            Trap::Syscall => self.registers.pc.wrapping_add(1),
        };

        self.flags.mode = Mode::System;
        self.flags.interrupts = false;
        self.registers.sp = C::SYSTEM_STACK_BASE;
        self.push(sp)?;
        self.push(pc)?;
        self.registers.pc = trap.entry();

        info!(pc, sp, entry = self.registers.pc, "Trap taken");
        Ok(true)
    }

    /// Read the live stack and the registers
    pub fn snapshot(&mut self) -> Snapshot {
        let base = self.flags.mode.stack_base();
        let sp = self.registers.sp;
        let stack = if (0..base).contains(&sp) {
            let end = base.min(sp.saturating_add(SNAPSHOT_STACK_DEPTH));
            (sp..end).filter_map(|address| self.peek(address)).collect()
        } else {
            Vec::new()
        };

        Snapshot {
            registers: self.registers,
            flags: self.flags,
            errors: self.errors,
            stack,
        }
    }

    fn fetch(&mut self) -> Result<Instruction, Fault> {
        self.phase = Phase::Fetch;
        self.instruction = None;

        if self.timer_due() {
            self.trap(Trap::Timer)?;
        }

        if self.flags.debug {
            let snapshot = self.snapshot();
            info!("{}", snapshot);
        }

        let address = self.registers.pc;
        let opcode = self.load(address)?;
        self.registers.ir = opcode;

        if !isa::is_valid_opcode(opcode) {
            return Err(Fault::InvalidOpcode { address, opcode });
        }

        Ok(Instruction::new(isa::descriptor(opcode), address))
    }

    fn decode(&mut self, mut instruction: Instruction) -> Result<Instruction, Fault> {
        self.phase = Phase::Decode;

        if instruction.has_operand() {
            let operand = self.load(instruction.address.wrapping_add(1))?;
            instruction.operand = Some(operand);
        }

        debug!("Decoded \"{}\"", instruction);
        self.instruction = Some(instruction.clone());
        Ok(instruction)
    }

    fn execute(&mut self, instruction: &Instruction) -> Result<(), Fault> {
        self.phase = Phase::Execute;

        microcode::execute(self, instruction)?;
        self.registers.cycles += 1;

        let operation = instruction.operation();
        if !operation.is_cti() && operation != isa::Operation::End {
            self.registers.pc = self.registers.pc.wrapping_add(instruction.width());
        }

        Ok(())
    }

    /// Record a fault: raise the error flags, stop, and dump the state
    fn raise(&mut self, fault: Fault) -> Fault {
        self.errors |= fault.flags() | self.phase.flag();
        self.flags.fault = true;
        self.flags.stop = true;

        let snapshot = self.snapshot();
        error!(
            phase = %self.phase,
            fault = &fault as &(dyn std::error::Error + 'static),
            instruction = self.instruction.as_ref().map(tracing::field::display),
            "{}",
            snapshot
        );
        fault
    }

    /// Run a single instruction cycle. Does nothing once the processor stopped.
    ///
    /// # Errors
    ///
    /// Returns the fault that stopped the processor.
    #[tracing::instrument(skip(self), fields(pc = self.registers.pc), level = "debug")]
    pub fn step(&mut self) -> Result<(), Fault> {
        if self.flags.stop {
            return Ok(());
        }

        let cycle = self
            .fetch()
            .and_then(|instruction| self.decode(instruction))
            .and_then(|instruction| self.execute(&instruction));

        cycle.map_err(|fault| self.raise(fault))
    }

    /// Run until `End`, a fault, or the end of a single step in step mode
    ///
    /// # Errors
    ///
    /// Returns the fault that stopped the processor.
    #[tracing::instrument(skip(self))]
    pub fn run(&mut self) -> Result<Status, Fault> {
        loop {
            if self.flags.stop {
                info!(cycles = self.registers.cycles, "Halted");
                return Ok(Status::Halted);
            }

            self.step()?;

            if self.flags.step && !self.flags.stop {
                return Ok(Status::Paused);
            }
        }
    }
}
