use anyhow::{bail, Context};
use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, ValueHint};
use simplecpu_emulator::loader::{self, BootConfig, LoadStrategy};
use simplecpu_emulator::object;
use simplecpu_emulator::runtime::OverflowPolicy;
use tracing::info;

use crate::interactive::run_interactive;

#[derive(Parser, Debug)]
pub struct RunOpt {
    /// Object image to run
    #[arg(short = 'f', long = "file", value_hint = ValueHint::FilePath)]
    image: Utf8PathBuf,

    /// Save the final memory as an object image
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<Utf8PathBuf>,

    /// Log the processor state before each instruction
    #[arg(short, long, action = ArgAction::SetTrue)]
    debug: bool,

    /// Timer interrupt interval, in cycles. 0 disables the timer
    #[arg(short = 't', long = "timer", default_value_t = 0)]
    timer_interval: u64,

    /// How the image gets into the memory service
    #[arg(long, default_value_t)]
    strategy: LoadStrategy,

    /// What to do on arithmetic overflow
    #[arg(long, default_value_t)]
    overflow: OverflowPolicy,

    /// Executable to start the CPU and memory processes from
    #[arg(long, value_hint = ValueHint::ExecutablePath)]
    exe: Option<Utf8PathBuf>,

    /// Run the CPU and the memory in this process
    #[arg(long, action = ArgAction::SetTrue)]
    in_process: bool,

    /// Run the program in interactive mode. Implies `--in-process`
    #[arg(short, long, action = ArgAction::SetTrue)]
    interactive: bool,
}

impl RunOpt {
    fn boot_config(&self) -> BootConfig {
        BootConfig {
            image: self.image.clone(),
            output: self.output.clone(),
            timer_interval: self.timer_interval,
            debug: self.debug,
            strategy: self.strategy,
            overflow: self.overflow,
            executable: self.exe.clone(),
        }
    }

    fn exec_local(&self, config: &BootConfig) -> anyhow::Result<()> {
        let mut cpu = loader::boot_local(config)?;

        info!("Running program");
        let result = if self.interactive {
            run_interactive(&mut cpu)
        } else {
            cpu.run().map(|_| ()).map_err(anyhow::Error::from)
        };

        info!(registers = %cpu.registers, "End of program");

        if let Some(output) = &config.output {
            let memory = cpu.into_link().into_service().into_memory();
            object::save(output, &memory)
                .with_context(|| format!("could not save memory to {output}"))?;
        }

        result
    }

    pub fn exec(self) -> anyhow::Result<()> {
        let config = self.boot_config();

        if self.in_process || self.interactive {
            return self.exec_local(&config);
        }

        let machine = loader::boot(&config)?;
        let outcome = machine.wait()?;

        if !outcome.success() {
            bail!(
                "machine stopped with a failure (cpu: {}, memory: {})",
                outcome.cpu,
                outcome.memory
            );
        }

        info!("Machine halted");
        Ok(())
    }
}
