//! Boot a machine: validate the object image, then start the memory service
//! and the CPU as two processes wired to each other.
//!
//! ```text
//!            stdout ──────────▶ stdin
//!   memory                             cpu
//!            stdin  ◀────────── stdout
//! ```
//!
//! Both processes are the current executable started with the `memory` and
//! `cpu` subcommands. Their standard error is inherited.

use std::process::{Child, Command, ExitStatus, Stdio};

use camino::{Utf8Path, Utf8PathBuf};
use parse_display::{Display, FromStr};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::memory::{Memory, MemoryService};
use crate::object::{self, ObjectError};
use crate::runtime::{Cpu, CpuConfig, OverflowPolicy};
use crate::transport::{Link, LocalLink, RequestError, StreamLink};

/// How the object image gets into the memory service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, FromStr)]
#[display(style = "kebab-case")]
pub enum LoadStrategy {
    /// The memory service reads the image itself before serving
    Preload,

    /// The loader stores every word through the transport before the CPU starts
    #[default]
    Transport,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "lowercase")]
pub enum Role {
    Memory,
    Cpu,
}

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("invalid object image {path}")]
    Image { path: Utf8PathBuf, source: ObjectError },

    #[error("could not locate the emulator executable")]
    Executable(#[source] std::io::Error),

    #[error("could not start the {role} process")]
    Spawn {
        role: Role,
        source: std::io::Error,
    },

    #[error("the {role} process has no piped {stream}")]
    MissingPipe { role: Role, stream: &'static str },

    #[error("could not load the image through the memory service")]
    Preload(#[from] RequestError),

    #[error("could not wait for the {role} process")]
    Wait {
        role: Role,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct BootConfig {
    /// The object image to run
    pub image: Utf8PathBuf,

    /// Where the memory service saves the final memory
    pub output: Option<Utf8PathBuf>,

    pub timer_interval: u64,
    pub debug: bool,
    pub strategy: LoadStrategy,
    pub overflow: OverflowPolicy,

    /// The executable to start; defaults to the current one
    pub executable: Option<Utf8PathBuf>,
}

impl BootConfig {
    #[must_use]
    pub fn new(image: impl Into<Utf8PathBuf>) -> Self {
        Self {
            image: image.into(),
            output: None,
            timer_interval: 0,
            debug: false,
            strategy: LoadStrategy::default(),
            overflow: OverflowPolicy::default(),
            executable: None,
        }
    }

    /// Arguments of the memory service process
    #[must_use]
    pub fn memory_args(&self) -> Vec<String> {
        let mut args = vec!["memory".to_owned()];

        if self.strategy == LoadStrategy::Preload {
            args.push("--image".to_owned());
            args.push(self.image.to_string());
        }

        if let Some(output) = &self.output {
            args.push("-o".to_owned());
            args.push(output.to_string());
        }

        if self.debug {
            args.push("-d".to_owned());
        }

        args
    }

    /// Arguments of the CPU process
    #[must_use]
    pub fn cpu_args(&self) -> Vec<String> {
        let mut args = vec![
            "cpu".to_owned(),
            "-t".to_owned(),
            self.timer_interval.to_string(),
            "--overflow".to_owned(),
            self.overflow.to_string(),
        ];

        if self.debug {
            args.push("-d".to_owned());
        }

        args
    }

    #[must_use]
    pub fn cpu_config(&self) -> CpuConfig {
        CpuConfig {
            timer_interval: self.timer_interval,
            debug: self.debug,
            overflow: self.overflow,
            seed: None,
        }
    }
}

/// Store the whole memory through a link
///
/// # Errors
///
/// Fails on the first rejected store.
#[tracing::instrument(skip_all)]
pub fn preload<L: Link>(link: &mut L, memory: &Memory) -> Result<(), RequestError> {
    for (address, &word) in (0..).zip(memory.words().iter()) {
        link.write_word(address, word)?;
    }

    debug!("Image stored through the transport");
    Ok(())
}

fn load_image(config: &BootConfig) -> Result<Memory, LoaderError> {
    let memory = object::load(&config.image).map_err(|source| LoaderError::Image {
        path: config.image.clone(),
        source,
    })?;

    if config.debug {
        info!("Initial memory:\n{}", memory.dump());
    }

    Ok(memory)
}

fn executable(config: &BootConfig) -> Result<Utf8PathBuf, LoaderError> {
    if let Some(executable) = &config.executable {
        return Ok(executable.clone());
    }

    let path = std::env::current_exe().map_err(LoaderError::Executable)?;
    Utf8PathBuf::from_path_buf(path).map_err(|path| {
        LoaderError::Executable(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("path {} is not valid UTF-8", path.display()),
        ))
    })
}

fn spawn(
    executable: &Utf8Path,
    role: Role,
    args: &[String],
    stdin: Stdio,
    stdout: Stdio,
) -> Result<Child, LoaderError> {
    debug!(%executable, ?args, "Starting the {} process", role);
    Command::new(executable)
        .args(args)
        .stdin(stdin)
        .stdout(stdout)
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|source| LoaderError::Spawn { role, source })
}

/// Stop a child that won't be handed over to a [`Machine`]
fn abandon(mut child: Child, role: Role) {
    if let Err(e) = child.kill().and_then(|()| child.wait().map(|_| ())) {
        warn!(%role, error = %e, "Could not stop process");
    }
}

/// Validate the image, then start the memory service and the CPU
///
/// # Errors
///
/// Fails if the image is invalid, in which case no process is started, or
/// if a process can't be started or the image can't be transferred.
#[tracing::instrument(skip_all, fields(image = %config.image, strategy = %config.strategy))]
pub fn boot(config: &BootConfig) -> Result<Machine, LoaderError> {
    let memory = load_image(config)?;
    let executable = executable(config)?;

    let mut memory_child = spawn(
        &executable,
        Role::Memory,
        &config.memory_args(),
        Stdio::piped(),
        Stdio::piped(),
    )?;

    let pipes = memory_child.stdin.take().zip(memory_child.stdout.take());
    let Some((to_memory, from_memory)) = pipes else {
        abandon(memory_child, Role::Memory);
        return Err(LoaderError::MissingPipe {
            role: Role::Memory,
            stream: "stdio",
        });
    };

    let mut link = StreamLink::new(from_memory, to_memory);
    if config.strategy == LoadStrategy::Transport {
        if let Err(e) = preload(&mut link, &memory) {
            abandon(memory_child, Role::Memory);
            return Err(e.into());
        }
    }

    // The CPU takes over both ends of the channel
    let (from_memory, to_memory) = link.into_inner();
    let cpu_child = match spawn(
        &executable,
        Role::Cpu,
        &config.cpu_args(),
        Stdio::from(from_memory),
        Stdio::from(to_memory),
    ) {
        Ok(child) => child,
        Err(e) => {
            abandon(memory_child, Role::Memory);
            return Err(e);
        }
    };

    info!(
        memory = memory_child.id(),
        cpu = cpu_child.id(),
        "Machine started"
    );

    Ok(Machine {
        memory: memory_child,
        cpu: cpu_child,
    })
}

/// Build a machine running in the current process, over a [`LocalLink`]
///
/// # Errors
///
/// Fails if the image is invalid or can't be transferred.
#[tracing::instrument(skip_all, fields(image = %config.image, strategy = %config.strategy))]
pub fn boot_local(config: &BootConfig) -> Result<Cpu<LocalLink>, LoaderError> {
    let memory = load_image(config)?;

    let link = match config.strategy {
        LoadStrategy::Preload => LocalLink::new(MemoryService::new(memory)),
        LoadStrategy::Transport => {
            let mut link = LocalLink::default();
            preload(&mut link, &memory)?;
            link
        }
    };

    Ok(Cpu::new(link, config.cpu_config()))
}

/// The two running processes of a machine
#[derive(Debug)]
pub struct Machine {
    memory: Child,
    cpu: Child,
}

/// Exit statuses of both processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub cpu: ExitStatus,
    pub memory: ExitStatus,
}

impl Outcome {
    /// The run succeeded only if both processes did
    #[must_use]
    pub fn success(&self) -> bool {
        self.cpu.success() && self.memory.success()
    }
}

impl Machine {
    /// Wait for both processes to exit
    ///
    /// The memory service stops once the CPU exits and closes the channel.
    ///
    /// # Errors
    ///
    /// Fails if a process can't be waited on.
    pub fn wait(mut self) -> Result<Outcome, LoaderError> {
        let cpu = self.cpu.wait().map_err(|source| LoaderError::Wait {
            role: Role::Cpu,
            source,
        })?;
        debug!(%cpu, "CPU exited");

        let memory = self.memory.wait().map_err(|source| LoaderError::Wait {
            role: Role::Memory,
            source,
        })?;
        debug!(%memory, "Memory service exited");

        Ok(Outcome { cpu, memory })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::runtime::Status;

    fn image_path(name: &str) -> Utf8PathBuf {
        let dir = Utf8PathBuf::from_path_buf(std::env::temp_dir()).unwrap();
        dir.join(format!("simplecpu-loader-{}-{name}.obj", std::process::id()))
    }

    fn write_program(name: &str, words: &[i32]) -> Utf8PathBuf {
        let mut memory = Memory::default();
        for (address, &word) in (0..).zip(words) {
            memory.set(address, word).unwrap();
        }
        let path = image_path(name);
        object::save(&path, &memory).unwrap();
        path
    }

    #[test]
    fn args_test() {
        let mut config = BootConfig::new("prog.obj");
        assert_eq!(config.memory_args(), vec!["memory"]);
        assert_eq!(
            config.cpu_args(),
            vec!["cpu", "-t", "0", "--overflow", "fault"]
        );

        config.strategy = LoadStrategy::Preload;
        config.output = Some("out.obj".into());
        config.debug = true;
        config.timer_interval = 100;
        config.overflow = OverflowPolicy::Wrap;
        assert_eq!(
            config.memory_args(),
            vec!["memory", "--image", "prog.obj", "-o", "out.obj", "-d"]
        );
        assert_eq!(
            config.cpu_args(),
            vec!["cpu", "-t", "100", "--overflow", "wrap", "-d"]
        );
    }

    #[test]
    fn strategy_parse_test() {
        assert_eq!("preload".parse::<LoadStrategy>().unwrap(), LoadStrategy::Preload);
        assert_eq!(LoadStrategy::default().to_string(), "transport");
        assert!("pipe".parse::<LoadStrategy>().is_err());
    }

    #[test]
    fn preload_test() {
        let mut memory = Memory::default();
        memory.set(0, 1).unwrap();
        memory.set(1999, 30).unwrap();

        let mut link = LocalLink::default();
        preload(&mut link, &memory).unwrap();

        let service = link.into_service();
        assert_eq!(service.served(), 2000);
        assert_eq!(service.memory(), &memory);
    }

    #[test]
    fn boot_local_test() {
        // LoadV 5; AddX; End
        let path = write_program("local", &[1, 5, 10, 50]);

        for strategy in [LoadStrategy::Preload, LoadStrategy::Transport] {
            let config = BootConfig {
                strategy,
                ..BootConfig::new(path.clone())
            };

            let mut cpu = boot_local(&config).unwrap();
            cpu.registers.x = 3;
            assert_eq!(cpu.run().unwrap(), Status::Halted);
            assert_eq!(cpu.registers.ac, 8);
        }

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn invalid_image_test() {
        let path = image_path("invalid");
        std::fs::write(&path, [0x6F, 0x6A, 0x65, 0x25, 1, 0, 0, 0]).unwrap();

        // The image is rejected before anything is started
        let config = BootConfig {
            executable: Some("/nonexistent/simplecpu".into()),
            ..BootConfig::new(path.clone())
        };
        let err = boot(&config).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        // The object error is the cause, not part of the message
        assert_eq!(err.to_string(), format!("invalid object image {path}"));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "truncated image: got 1 words, expected 2000");

        assert!(matches!(
            err,
            LoaderError::Image {
                source: ObjectError::Truncated { words: 1 },
                ..
            }
        ));
    }

    #[test]
    fn spawn_failure_test() {
        let path = write_program("spawn", &[50]);
        let config = BootConfig {
            executable: Some("/nonexistent/simplecpu".into()),
            ..BootConfig::new(path.clone())
        };
        let err = boot(&config).unwrap_err();
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(
            err,
            LoaderError::Spawn {
                role: Role::Memory,
                ..
            }
        ));
    }
}
