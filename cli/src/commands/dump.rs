use camino::Utf8PathBuf;
use clap::{Parser, ValueHint};
use simplecpu_emulator::object;
use tracing::info;

#[derive(Parser, Debug)]
pub struct DumpOpt {
    /// Object image
    #[arg(value_hint = ValueHint::FilePath)]
    input: Utf8PathBuf,
}

impl DumpOpt {
    pub fn exec(self) -> anyhow::Result<()> {
        info!(path = %self.input, "Reading object image");
        let memory = object::load(&self.input)?;

        print!("{}", memory.dump());

        Ok(())
    }
}
