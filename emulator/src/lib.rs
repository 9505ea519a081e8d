pub mod constants;
pub mod isa;
pub mod loader;
pub mod memory;
pub mod object;
pub mod runtime;
pub mod transport;

pub use self::loader::{boot, boot_local, BootConfig, LoadStrategy};
pub use self::runtime::{Cpu, CpuConfig, OverflowPolicy};
