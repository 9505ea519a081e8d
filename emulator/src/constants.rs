pub type Address = i32;
pub type Word = i32;

/// Total size of the computer memory, in words
pub const NWORDS: usize = 2000;

/// Where the user program is loaded, and where execution starts
pub const USER_PROGRAM_LOAD: Address = 0;

/// Entry point of the timer interrupt handler
pub const TIMER_PROGRAM_LOAD: Address = 1000;

/// Entry point of the `Interrupt` (system call) handler
pub const INTERRUPT_PROGRAM_LOAD: Address = 1500;

/// Top of the user stack, and highest address reachable in user mode
pub const USER_STACK_BASE: Address = 999;

/// Top of the system stack, shared by the timer and interrupt handlers
pub const SYSTEM_STACK_BASE: Address = 1999;

/// First four bytes of every object image
pub const MAGIC: u32 = 0x2565_6A6F;

/// Number of entries in the instruction table
pub const NUM_OPCODES: usize = 51;
