use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, ValueHint};
use simplecpu_emulator::memory::{Memory, MemoryService};
use simplecpu_emulator::object;
use simplecpu_emulator::transport::StreamLink;
use tracing::info;

#[derive(Parser, Debug)]
pub struct MemoryOpt {
    /// Object image to install before serving requests
    #[arg(long, value_hint = ValueHint::FilePath)]
    image: Option<Utf8PathBuf>,

    /// Save the final memory as an object image once the CPU is gone
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<Utf8PathBuf>,

    /// Log the final memory
    #[arg(short, long, action = ArgAction::SetTrue)]
    debug: bool,
}

impl MemoryOpt {
    pub fn exec(self) -> anyhow::Result<()> {
        let memory = match &self.image {
            Some(path) => object::load(path)
                .with_context(|| format!("could not load object image {path}"))?,
            None => Memory::default(),
        };

        let mut service = MemoryService::new(memory);
        let mut link = StreamLink::new(std::io::stdin().lock(), std::io::stdout().lock());
        service.serve(&mut link)?;

        if self.debug {
            info!("Final memory:\n{}", service.memory().dump());
        }

        if let Some(output) = &self.output {
            object::save(output, service.memory())
                .with_context(|| format!("could not save memory to {output}"))?;
        }

        Ok(())
    }
}
