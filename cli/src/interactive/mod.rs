//! Interactive stepper for an in-process machine.
//!
//! Lines are read with rustyline, split with shell-words, and parsed as a clap
//! command enum with no binary name.

use std::collections::BTreeSet;

use anyhow::bail;
use clap::Parser;
use rustyline::history::DefaultHistory;
use rustyline::{Behavior, CompletionType, Config, EditMode, Editor};
use simplecpu_emulator::constants as C;
use simplecpu_emulator::isa::{self, Instruction};
use simplecpu_emulator::runtime::{Cpu, Trap};
use simplecpu_emulator::transport::Link;
use tracing::{debug, info, warn};

mod helper;
use self::helper::RunHelper;

static HELP: &str = r#"
Run "help [command]" for command-specific help.
An empty line re-runs the last valid command."#;

#[derive(Parser, Clone, Debug)]
#[clap(
    help_template = "{about}\n\nCOMMANDS:\n{subcommands}\n{after-help}",
    after_help = HELP,
    disable_version_flag = true,
    infer_subcommands = true,
    no_binary_name = true,
    allow_negative_numbers = true,
)]
/// Interactive mode commands
enum Command {
    /// Execute the next instructions
    #[command(alias = "s")]
    Step {
        /// Number of steps to execute
        #[arg(default_value = "1")]
        number: u64,
    },

    /// Exit the emulator
    Exit,

    /// Show the state of registers
    Registers,

    /// Show the control and error flags
    Flags,

    /// Show the content of a block in memory
    Memory {
        /// The address to show
        address: C::Address,

        /// Number of memory words to show
        #[arg(default_value = "1")]
        number: u16,
    },

    /// Set a value in memory
    Set {
        /// The address to set
        address: C::Address,

        /// The value to set
        #[arg(allow_negative_numbers = true)]
        value: C::Word,
    },

    /// Take a timer trap now
    Interrupt,

    /// Show the next few instructions
    List {
        /// Number of instructions to show
        #[arg(default_value = "10")]
        number: u16,
    },

    /// Set a breakpoint
    Break {
        /// The address where to set the breakpoint
        address: C::Address,
    },

    /// Remove a breakpoint
    Unbreak {
        /// The address of the breakpoint to remove
        address: C::Address,
    },

    /// Continue the program until the next breakpoint or the end
    Continue,

    /// Show informations about the current debugging session
    Info {
        #[command(subcommand)]
        sub: Option<InfoCommand>,
    },
}

#[derive(Parser, Clone, Debug)]
enum InfoCommand {
    /// List active breakpoints
    Breakpoints,

    /// Show the number of CPU cycles used since the beginning of the program
    Cycles,
}

/// Holds informations about a interactive session
#[derive(Debug, Default)]
struct Session {
    /// List of active breakpoints
    breakpoints: BTreeSet<C::Address>,

    /// Current address for the `list` command
    list_address: Option<C::Address>,
}

/// Decode the instruction stored at an address, without privilege checks
fn disassemble<L: Link>(cpu: &mut Cpu<L>, address: C::Address) -> Option<Instruction> {
    let opcode = cpu.peek(address)?;
    if !isa::is_valid_opcode(opcode) {
        return None;
    }

    let mut instruction = Instruction::new(isa::descriptor(opcode), address);
    if instruction.has_operand() {
        instruction.operand = Some(cpu.peek(address.wrapping_add(1))?);
    }
    Some(instruction)
}

impl Session {
    /// Add a breakpoint
    fn add_breakpoint(&mut self, address: C::Address) {
        if self.breakpoints.insert(address) {
            info!(address, "Setting a breakpoint");
        } else {
            warn!(address, "A breakpoint was already set");
        }
    }

    /// Remove a breakpoint
    fn remove_breakpoint(&mut self, address: C::Address) {
        if self.breakpoints.remove(&address) {
            info!(address, "Removing breakpoint");
        } else {
            warn!(address, "No breakpoint was set here");
        }
    }

    /// Checks if the given address has a breakpoint
    fn has_breakpoint(&self, address: C::Address) -> bool {
        self.breakpoints.contains(&address)
    }

    /// Reset the `list` command (after running an instruction)
    fn reset_list(&mut self) {
        self.list_address = None;
    }

    /// Display the list of breakpoints
    fn display_breakpoints<L: Link>(&self, cpu: &mut Cpu<L>) {
        match self.breakpoints.len() {
            0 => info!("No breakpoints"),
            1 => info!("1 breakpoint:"),
            x => info!("{} breakpoints:", x),
        }

        for &address in &self.breakpoints {
            self.display_instruction(cpu, address);
        }
    }

    /// Display an instruction at specified address, returns its width
    fn display_instruction<L: Link>(&self, cpu: &mut Cpu<L>, address: C::Address) -> C::Word {
        // Compute what is supposed to show in the gutter
        let is_current_line = cpu.registers.pc == address;
        let has_breakpoint = self.has_breakpoint(address);

        let gutter = match (has_breakpoint, is_current_line) {
            (true, true) => "B>",
            (true, false) => "B ",
            (false, true) => " >",
            (false, false) => "  ",
        };

        // This will be `None` if the address is out of memory or if the word is not
        // a valid opcode
        if let Some(instruction) = disassemble(cpu, address) {
            info!("{:<2} {}", gutter, instruction);
            instruction.width()
        } else {
            let word = cpu.peek(address).map_or("–".to_owned(), |w| w.to_string());
            info!("{:<2} {:08} {}", gutter, address, word);
            1
        }
    }

    /// Display the number of CPU cycles used
    fn display_cycles<L>(cpu: &Cpu<L>) {
        info!("Cycles: {}", cpu.registers.cycles);
    }
}

#[allow(clippy::too_many_lines)]
pub(crate) fn run_interactive<L: Link>(cpu: &mut Cpu<L>) -> anyhow::Result<()> {
    info!("Running in interactive mode. Type \"help\" to list available commands.");
    let config = Config::builder()
        .history_ignore_space(true)
        .completion_type(CompletionType::List)
        .edit_mode(EditMode::Emacs)
        .behavior(Behavior::PreferTerm)
        .auto_add_history(true)
        .build();

    let mut session = Session::default();

    let h: RunHelper<Command> = RunHelper::new();
    let mut rl: Editor<RunHelper<Command>, DefaultHistory> = Editor::with_config(config)?;
    rl.set_helper(Some(h));

    let mut last_command: Option<Command> = None;

    'read: loop {
        // A macro to unwrap an error, log it and continue the loop
        macro_rules! warn_and_continue {
            ($e:expr) => {
                match $e {
                    Ok(o) => o,
                    Err(e) => {
                        tracing::warn!(error = &e as &(dyn std::error::Error + 'static));
                        continue 'read;
                    }
                }
            };
        }

        let Ok(readline) = rl.readline(">> ") else {
            info!("EOF, exitting");
            break;
        };

        let command = if readline.is_empty() {
            if let Some(command) = &last_command {
                command.clone()
            } else {
                info!("Type \"help\" to get the list of available commands");
                continue 'read;
            }
        } else {
            let Ok(words) = shell_words::split(readline.as_str()) else {
                warn!("Invalid input");
                continue 'read;
            };

            let command = warn_and_continue!(Command::try_parse_from(words));
            last_command = Some(command.clone());
            command
        };

        debug!("Executing command: {:?}", command);

        match (command, cpu.flags.stop) {
            (Command::Exit, _) => break,
            (Command::Step { number }, false) => {
                session.reset_list();

                for _ in 0..number {
                    warn_and_continue!(cpu.step());

                    if cpu.flags.stop {
                        info!("End of program");
                        break;
                    }
                }

                let pc = cpu.registers.pc;
                session.display_instruction(cpu, pc);
            }

            (Command::Registers, _) => {
                info!("Registers: {}", cpu.registers);
                if let Some(instruction) = cpu.instruction() {
                    info!("Last instruction: {}", instruction);
                }
            }

            (Command::Flags, _) => {
                info!("Control flags: {}", cpu.flags);
                info!("Error flags: {}", cpu.errors);
            }

            (Command::Memory { address, number }, _) => {
                for i in 0..C::Address::from(number) {
                    let address = address.wrapping_add(i);
                    let Some(value) = cpu.peek(address) else {
                        warn!(address, "Invalid address");
                        continue 'read;
                    };
                    info!(address, value);
                }
            }

            (Command::Set { address, value }, false) => {
                info!("Setting memory at address {address} to {value}");
                warn_and_continue!(cpu.poke(address, value));
            }

            (Command::Interrupt, false) => {
                if warn_and_continue!(cpu.trap(Trap::Timer)) {
                    session.reset_list();
                } else {
                    warn!("Interrupts are disabled");
                }
            }

            (Command::List { number }, _) => {
                let mut address = session.list_address.unwrap_or(cpu.registers.pc);
                for _ in 0..number {
                    let width = session.display_instruction(cpu, address);
                    address = address.wrapping_add(width);
                }
                session.list_address = Some(address);
            }

            (Command::Break { address }, false) => {
                session.add_breakpoint(address);
            }

            (Command::Unbreak { address }, false) => {
                session.remove_breakpoint(address);
            }

            (Command::Continue, false) => {
                session.reset_list();

                loop {
                    warn_and_continue!(cpu.step());

                    if cpu.flags.stop {
                        info!("End of program");
                        break;
                    }

                    if session.has_breakpoint(cpu.registers.pc) {
                        info!(address = cpu.registers.pc, "Stopped at a breakpoint");
                        break;
                    }
                }
            }

            (Command::Info { sub }, _) => match sub {
                Some(InfoCommand::Breakpoints) => {
                    session.display_breakpoints(cpu);
                }
                Some(InfoCommand::Cycles) => {
                    Session::display_cycles(cpu);
                }
                None => {
                    session.display_breakpoints(cpu);
                    info!("–");
                    Session::display_cycles(cpu);
                }
            },

            (_, true) => {
                // The processor stopped but the user asked to continue, we just warn
                warn!("Processor is halted. Use \"exit\" to quit");
            }
        }
    }

    if cpu.flags.fault {
        bail!("processor stopped on a fault ({})", cpu.errors);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use simplecpu_emulator::memory::{Memory, MemoryService};
    use simplecpu_emulator::runtime::CpuConfig;
    use simplecpu_emulator::transport::LocalLink;

    use super::*;

    #[test]
    fn command_tree_test() {
        Command::command().debug_assert();
    }

    #[test]
    fn parse_test() {
        let command = Command::try_parse_from(["s", "3"]).unwrap();
        assert!(matches!(command, Command::Step { number: 3 }));

        let command = Command::try_parse_from(["set", "10", "-4"]).unwrap();
        assert!(matches!(
            command,
            Command::Set {
                address: 10,
                value: -4
            }
        ));

        let command = Command::try_parse_from(["info", "cycles"]).unwrap();
        assert!(matches!(
            command,
            Command::Info {
                sub: Some(InfoCommand::Cycles)
            }
        ));
    }

    #[test]
    fn disassemble_test() {
        let mut memory = Memory::default();
        for (address, word) in [(0, 1), (1, 5), (2, 10), (3, 31)] {
            memory.set(address, word).unwrap();
        }
        let link = LocalLink::new(MemoryService::new(memory));
        let mut cpu = Cpu::new(link, CpuConfig::default());

        let load = disassemble(&mut cpu, 0).unwrap();
        assert_eq!(load.operand, Some(5));
        assert_eq!(load.width(), 2);
        assert_eq!(disassemble(&mut cpu, 2).unwrap().width(), 1);
        assert!(disassemble(&mut cpu, 3).is_none());
        assert!(disassemble(&mut cpu, 2000).is_none());
    }
}
