mod completion;
mod cpu;
mod dump;
mod memory;
mod run;

#[derive(clap::Subcommand, Debug)]
pub enum Subcommand {
    /// Boot a machine from an object image and run it
    Run(self::run::RunOpt),

    /// Run the CPU, talking to a memory service over stdin and stdout
    Cpu(self::cpu::CpuOpt),

    /// Run the memory service, answering requests on stdin and stdout
    Memory(self::memory::MemoryOpt),

    /// Print the content of an object image
    Dump(self::dump::DumpOpt),

    /// Generate shell completions
    Completion(self::completion::CompletionOpt),
}

impl Subcommand {
    /// Run a subcommand
    pub fn exec(self) -> anyhow::Result<()> {
        match self {
            Self::Run(opt) => opt.exec(),
            Self::Cpu(opt) => opt.exec(),
            Self::Memory(opt) => opt.exec(),
            Self::Dump(opt) => opt.exec(),
            Self::Completion(opt) => opt.exec(),
        }
    }
}
