use tracing::debug;

use crate::constants as C;
use crate::isa::{Instruction, Operation};
use crate::transport::Link;

use super::{fault::Fault, Cpu, Mode, OverflowPolicy, Trap};

impl OverflowPolicy {
    /// Returns `None` if the addition overflows and overflows are faults
    #[must_use]
    pub fn add(self, a: C::Word, b: C::Word) -> Option<C::Word> {
        match self {
            OverflowPolicy::Fault => a.checked_add(b),
            OverflowPolicy::Wrap => Some(a.wrapping_add(b)),
        }
    }

    /// Returns `None` if the subtraction overflows and overflows are faults
    #[must_use]
    pub fn sub(self, a: C::Word, b: C::Word) -> Option<C::Word> {
        match self {
            OverflowPolicy::Fault => a.checked_sub(b),
            OverflowPolicy::Wrap => Some(a.wrapping_sub(b)),
        }
    }
}

/// Run the microcode of an instruction
///
/// Control-transfer instructions set `%pc` here; the engine advances it for
/// every other instruction.
#[tracing::instrument(skip(cpu, instruction), fields(%instruction))]
pub(super) fn execute<L: Link>(cpu: &mut Cpu<L>, instruction: &Instruction) -> Result<(), Fault> {
    use Operation::*;

    let overflow = cpu.config.overflow;
    let operation = instruction.operation();
    // Only read by two-word instructions, which always carry one
    let operand = instruction.operand.unwrap_or_default();
    let regs = cpu.registers;

    match operation {
        Invalid => {
            return Err(Fault::InvalidInstruction {
                opcode: instruction.opcode(),
            })
        }

        LoadValue => cpu.registers.ac = operand,

        LoadAddr => cpu.registers.ac = cpu.load(operand)?,

        LoadIndirect => {
            let address = cpu.load(operand)?;
            debug!("[{}] -> {}", operand, address);
            cpu.registers.ac = cpu.load(address)?;
        }

        LoadIndexX => cpu.registers.ac = cpu.load(operand.wrapping_add(regs.x))?,

        LoadIndexY => cpu.registers.ac = cpu.load(operand.wrapping_add(regs.y))?,

        LoadSpX => cpu.registers.ac = cpu.load(regs.sp.wrapping_add(regs.x))?,

        Store => cpu.store(operand, regs.ac)?,

        Get => {
            let value = cpu.random();
            debug!("get => {}", value);
            cpu.registers.ac = value;
        }

        Put => cpu.put(operand, regs.ac)?,

        AddX | AddY => {
            let b = if operation == AddX { regs.x } else { regs.y };
            let res = overflow
                .add(regs.ac, b)
                .ok_or(Fault::Overflow { operation })?;
            debug!("{} + {} = {}", regs.ac, b, res);
            cpu.registers.ac = res;
        }

        SubX | SubY => {
            let b = if operation == SubX { regs.x } else { regs.y };
            let res = overflow
                .sub(regs.ac, b)
                .ok_or(Fault::Overflow { operation })?;
            debug!("{} - {} = {}", regs.ac, b, res);
            cpu.registers.ac = res;
        }

        CopyToX => cpu.registers.x = regs.ac,
        CopyFromX => cpu.registers.ac = regs.x,
        CopyToY => cpu.registers.y = regs.ac,
        CopyFromY => cpu.registers.ac = regs.y,
        CopyToSp => cpu.registers.sp = regs.ac,
        CopyFromSp => cpu.registers.ac = regs.sp,

        Jump => {
            debug!("Jumping to address {}", operand);
            cpu.registers.pc = operand;
        }

        JumpEq | JumpNe => {
            let taken = (regs.ac == 0) == (operation == JumpEq);
            if taken {
                debug!("Jumping to address {}", operand);
                cpu.registers.pc = operand;
            } else {
                cpu.registers.pc = regs.pc.wrapping_add(instruction.width());
            }
        }

        Call => {
            cpu.push(regs.pc.wrapping_add(instruction.width()))?;
            debug!("Calling {}", operand);
            cpu.registers.pc = operand;
        }

        Return => {
            let ret = cpu.pop()?;
            debug!("Returning to {}", ret);
            cpu.registers.pc = ret;
        }

        IncX => {
            cpu.registers.x = overflow
                .add(regs.x, 1)
                .ok_or(Fault::Overflow { operation })?;
        }

        DecX => {
            cpu.registers.x = overflow
                .sub(regs.x, 1)
                .ok_or(Fault::Overflow { operation })?;
        }

        Push => cpu.push(regs.ac)?,

        Pop => {
            let val = cpu.pop()?;
            debug!("pop => {}", val);
            cpu.registers.ac = val;
        }

        Interrupt => {
            if !cpu.trap(Trap::Syscall)? {
                cpu.registers.pc = regs.pc.wrapping_add(instruction.width());
            }
        }

        IReturn => {
            let pc = cpu.pop()?;
            let sp = cpu.pop()?;
            debug!(pc, sp, "Returning from trap");
            cpu.registers.pc = pc;
            cpu.registers.sp = sp;
            cpu.flags.interrupts = true;
            cpu.flags.mode = Mode::User;
        }

        End => cpu.flags.stop = true,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_policy_test() {
        assert_eq!(OverflowPolicy::Fault.add(C::Word::MAX, 1), None);
        assert_eq!(OverflowPolicy::Fault.sub(C::Word::MIN, 1), None);
        assert_eq!(OverflowPolicy::Fault.add(3, 5), Some(8));
        assert_eq!(OverflowPolicy::Wrap.add(C::Word::MAX, 1), Some(C::Word::MIN));
        assert_eq!(OverflowPolicy::Wrap.sub(C::Word::MIN, 1), Some(C::Word::MAX));
        assert_eq!("wrap".parse::<OverflowPolicy>().unwrap(), OverflowPolicy::Wrap);
        assert_eq!(OverflowPolicy::default().to_string(), "fault");
    }
}
