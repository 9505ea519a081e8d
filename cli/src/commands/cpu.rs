use clap::{ArgAction, Parser};
use simplecpu_emulator::runtime::{Cpu, CpuConfig, OverflowPolicy};
use simplecpu_emulator::transport::StreamLink;
use tracing::info;

#[derive(Parser, Debug)]
pub struct CpuOpt {
    /// Log the processor state before each instruction
    #[arg(short, long, action = ArgAction::SetTrue)]
    debug: bool,

    /// Timer interrupt interval, in cycles. 0 disables the timer
    #[arg(short = 't', long = "timer", default_value_t = 0)]
    timer_interval: u64,

    /// What to do on arithmetic overflow
    #[arg(long, default_value_t)]
    overflow: OverflowPolicy,

    /// Seed of the random number generator used by `Get`
    #[arg(long)]
    seed: Option<u64>,
}

impl CpuOpt {
    pub fn exec(self) -> anyhow::Result<()> {
        let config = CpuConfig {
            timer_interval: self.timer_interval,
            debug: self.debug,
            overflow: self.overflow,
            seed: self.seed,
        };

        // Requests go out on stdout, responses come back on stdin
        let link = StreamLink::new(std::io::stdin().lock(), std::io::stdout().lock());
        let mut cpu = Cpu::new(link, config);

        info!(timer = self.timer_interval, "Starting CPU");
        cpu.run()?;
        info!(registers = %cpu.registers, "End of program");

        Ok(())
    }
}
