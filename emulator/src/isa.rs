//! The instruction table.
//!
//! Every opcode maps to a [`Descriptor`] carrying its decode metadata and
//! the [`Operation`] the engine dispatches on. The table is fixed at
//! compile time and has [`C::NUM_OPCODES`] entries: opcode 0 and 31 to 49
//! are invalid, 1 to 30 are the machine operations and 50 is `End`.

use parse_display::Display;

use crate::constants as C;
use crate::runtime::Mode;

/// The microcode operations of the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[repr(i32)]
pub enum Operation {
    #[display("Invalid")]
    Invalid = 0,
    #[display("LoadV")]
    LoadValue = 1,
    #[display("LoadA")]
    LoadAddr = 2,
    #[display("LoadI")]
    LoadIndirect = 3,
    #[display("LoadX")]
    LoadIndexX = 4,
    #[display("LoadY")]
    LoadIndexY = 5,
    #[display("LoadSPX")]
    LoadSpX = 6,
    #[display("Store")]
    Store = 7,
    #[display("Get")]
    Get = 8,
    #[display("Put")]
    Put = 9,
    #[display("AddX")]
    AddX = 10,
    #[display("AddY")]
    AddY = 11,
    #[display("SubX")]
    SubX = 12,
    #[display("SubY")]
    SubY = 13,
    #[display("CopyToX")]
    CopyToX = 14,
    #[display("CopyFromX")]
    CopyFromX = 15,
    #[display("CopyToY")]
    CopyToY = 16,
    #[display("CopyFromY")]
    CopyFromY = 17,
    #[display("CopyToSP")]
    CopyToSp = 18,
    #[display("CopyFromSP")]
    CopyFromSp = 19,
    #[display("Jump")]
    Jump = 20,
    #[display("JumpEQ")]
    JumpEq = 21,
    #[display("JumpNE")]
    JumpNe = 22,
    #[display("Call")]
    Call = 23,
    #[display("Return")]
    Return = 24,
    #[display("IncX")]
    IncX = 25,
    #[display("DecX")]
    DecX = 26,
    #[display("Push")]
    Push = 27,
    #[display("Pop")]
    Pop = 28,
    #[display("Interrupt")]
    Interrupt = 29,
    #[display("IReturn")]
    IReturn = 30,
    #[display("End")]
    End = 50,
}

impl Operation {
    /// Every valid operation, in opcode order
    pub const ALL: [Operation; 31] = [
        Operation::LoadValue,
        Operation::LoadAddr,
        Operation::LoadIndirect,
        Operation::LoadIndexX,
        Operation::LoadIndexY,
        Operation::LoadSpX,
        Operation::Store,
        Operation::Get,
        Operation::Put,
        Operation::AddX,
        Operation::AddY,
        Operation::SubX,
        Operation::SubY,
        Operation::CopyToX,
        Operation::CopyFromX,
        Operation::CopyToY,
        Operation::CopyFromY,
        Operation::CopyToSp,
        Operation::CopyFromSp,
        Operation::Jump,
        Operation::JumpEq,
        Operation::JumpNe,
        Operation::Call,
        Operation::Return,
        Operation::IncX,
        Operation::DecX,
        Operation::Push,
        Operation::Pop,
        Operation::Interrupt,
        Operation::IReturn,
        Operation::End,
    ];

    #[must_use]
    pub const fn opcode(self) -> C::Word {
        self as C::Word
    }

    /// Control-transfer instructions set `%pc` themselves
    #[must_use]
    pub const fn is_cti(self) -> bool {
        matches!(
            self,
            Operation::Jump
                | Operation::JumpEq
                | Operation::JumpNe
                | Operation::Call
                | Operation::Return
                | Operation::Interrupt
                | Operation::IReturn
        )
    }

    /// Whether the instruction is encoded on two words
    #[must_use]
    pub const fn has_operand(self) -> bool {
        matches!(
            self,
            Operation::LoadValue
                | Operation::LoadAddr
                | Operation::LoadIndirect
                | Operation::LoadIndexX
                | Operation::LoadIndexY
                | Operation::Store
                | Operation::Put
                | Operation::Jump
                | Operation::JumpEq
                | Operation::JumpNe
                | Operation::Call
        )
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Operation::Invalid => "Invalid opcode.",
            Operation::LoadValue => "LoadV value: load the value into AC",
            Operation::LoadAddr => "LoadA address: load the value at address into AC",
            Operation::LoadIndirect => {
                "LoadI address: load the value from the address found at address into AC"
            }
            Operation::LoadIndexX => "LoadX address: load the value at (address+X) into AC",
            Operation::LoadIndexY => "LoadY address: load the value at (address+Y) into AC",
            Operation::LoadSpX => "LoadSPX: load the value at (SP+X) into AC",
            Operation::Store => "Store address: store AC into address",
            Operation::Get => "Get: load a random int from 1 to 100 into AC",
            Operation::Put => "Put port: write AC to screen. port 1=int, port 2=char",
            Operation::AddX => "AddX: add the value in X to AC",
            Operation::AddY => "AddY: add the value in Y to AC",
            Operation::SubX => "SubX: subtract the value in X from AC",
            Operation::SubY => "SubY: subtract the value in Y from AC",
            Operation::CopyToX => "CopyToX: copy the value in AC to X",
            Operation::CopyFromX => "CopyFromX: copy the value in X to AC",
            Operation::CopyToY => "CopyToY: copy the value in AC to Y",
            Operation::CopyFromY => "CopyFromY: copy the value in Y to AC",
            Operation::CopyToSp => "CopyToSP: copy the value in AC to SP",
            Operation::CopyFromSp => "CopyFromSP: copy the value in SP to AC",
            Operation::Jump => "Jump address: jump to address",
            Operation::JumpEq => "JumpEQ address: jump to address if AC is zero",
            Operation::JumpNe => "JumpNE address: jump to address if AC is not zero",
            Operation::Call => {
                "Call address: push return address onto stack, jump to the address."
            }
            Operation::Return => "Return: pop return address from stack and jump to address.",
            Operation::IncX => "IncX: increment the value in X",
            Operation::DecX => "DecX: decrement the value in X",
            Operation::Push => "Push: push AC onto stack",
            Operation::Pop => "Pop: pop from stack into AC",
            Operation::Interrupt => "Interrupt: perform a system call",
            Operation::IReturn => "IReturn: return from system call",
            Operation::End => "End: end execution",
        }
    }

    /// Find the operation for an opcode. Returns `None` for invalid opcodes.
    #[must_use]
    pub fn from_opcode(opcode: C::Word) -> Option<Self> {
        if !is_valid_opcode(opcode) {
            return None;
        }

        Self::ALL.iter().copied().find(|op| op.opcode() == opcode)
    }
}

/// Only opcodes 1 to 30 and 50 are executable
#[must_use]
pub const fn is_valid_opcode(opcode: C::Word) -> bool {
    matches!(opcode, 1..=30 | 50)
}

/// Decode metadata for one opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub opcode: C::Word,
    pub operation: Operation,
    pub has_operand: bool,
    pub mnemonic: &'static str,
    pub description: &'static str,
}

impl Descriptor {
    const fn new(opcode: C::Word, operation: Operation, mnemonic: &'static str) -> Self {
        Self {
            opcode,
            operation,
            has_operand: operation.has_operand(),
            mnemonic,
            description: operation.description(),
        }
    }
}

const fn build_table() -> [Descriptor; C::NUM_OPCODES] {
    let mut table = [Descriptor::new(0, Operation::Invalid, "Invalid"); C::NUM_OPCODES];

    // Filler entries keep their index as opcode
    let mut i = 0;
    let mut opcode: C::Word = 0;
    while i < C::NUM_OPCODES {
        table[i].opcode = opcode;
        i += 1;
        opcode += 1;
    }

    macro_rules! entry {
        ($op:ident, $mnemonic:literal) => {
            table[Operation::$op as usize] =
                Descriptor::new(Operation::$op as C::Word, Operation::$op, $mnemonic);
        };
    }

    entry!(LoadValue, "LoadV");
    entry!(LoadAddr, "LoadA");
    entry!(LoadIndirect, "LoadI");
    entry!(LoadIndexX, "LoadX");
    entry!(LoadIndexY, "LoadY");
    entry!(LoadSpX, "LoadSPX");
    entry!(Store, "Store");
    entry!(Get, "Get");
    entry!(Put, "Put");
    entry!(AddX, "AddX");
    entry!(AddY, "AddY");
    entry!(SubX, "SubX");
    entry!(SubY, "SubY");
    entry!(CopyToX, "CopyToX");
    entry!(CopyFromX, "CopyFromX");
    entry!(CopyToY, "CopyToY");
    entry!(CopyFromY, "CopyFromY");
    entry!(CopyToSp, "CopyToSP");
    entry!(CopyFromSp, "CopyFromSP");
    entry!(Jump, "Jump");
    entry!(JumpEq, "JumpEQ");
    entry!(JumpNe, "JumpNE");
    entry!(Call, "Call");
    entry!(Return, "Return");
    entry!(IncX, "IncX");
    entry!(DecX, "DecX");
    entry!(Push, "Push");
    entry!(Pop, "Pop");
    entry!(Interrupt, "Interrupt");
    entry!(IReturn, "IReturn");
    entry!(End, "End");

    table
}

/// The instruction table, indexed by opcode
pub static TABLE: [Descriptor; C::NUM_OPCODES] = build_table();

/// Look up an opcode. Anything outside of the table resolves to the invalid entry.
#[must_use]
pub fn descriptor(opcode: C::Word) -> &'static Descriptor {
    usize::try_from(opcode)
        .ok()
        .and_then(|index| TABLE.get(index))
        .unwrap_or(&TABLE[0])
}

/// An instruction as fetched by the CPU
///
/// It is built fresh on every fetch, from the table entry of the opcode found
/// at `address` and the operand word following it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub descriptor: &'static Descriptor,

    /// Where the opcode was fetched from
    pub address: C::Address,

    /// The resolved operand, for two-word instructions
    pub operand: Option<C::Word>,

    /// Privilege level of the region the instruction lives in
    pub privilege: Mode,
}

impl Instruction {
    #[must_use]
    pub fn new(descriptor: &'static Descriptor, address: C::Address) -> Self {
        Self {
            descriptor,
            address,
            operand: None,
            privilege: Mode::for_address(address),
        }
    }

    #[must_use]
    pub const fn opcode(&self) -> C::Word {
        self.descriptor.opcode
    }

    #[must_use]
    pub const fn operation(&self) -> Operation {
        self.descriptor.operation
    }

    #[must_use]
    pub const fn has_operand(&self) -> bool {
        self.descriptor.has_operand
    }

    #[must_use]
    pub const fn mnemonic(&self) -> &'static str {
        self.descriptor.mnemonic
    }

    #[must_use]
    pub const fn description(&self) -> &'static str {
        self.descriptor.description
    }

    /// Number of words the instruction occupies
    #[must_use]
    pub const fn width(&self) -> C::Word {
        if self.descriptor.has_operand {
            2
        } else {
            1
        }
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let privilege = match self.privilege {
            Mode::User => 'U',
            Mode::System => 'S',
        };

        match self.operand {
            Some(operand) => write!(
                f,
                "{:08} {:<10} {:4} // {} {}",
                self.address,
                self.mnemonic(),
                operand,
                privilege,
                self.description()
            ),
            None => write!(
                f,
                "{:08} {:<10}      // {} {}",
                self.address,
                self.mnemonic(),
                privilege,
                self.description()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn valid_opcodes_test() {
        let valid: Vec<C::Word> = (-5..=60).filter(|&op| is_valid_opcode(op)).collect();
        let expected: Vec<C::Word> = (1..=30).chain(std::iter::once(50)).collect();
        assert_eq!(valid, expected);
    }

    #[test]
    fn table_layout_test() {
        assert_eq!(TABLE.len(), C::NUM_OPCODES);

        for (opcode, entry) in (0..).zip(TABLE.iter()) {
            assert_eq!(entry.opcode, opcode);
            let valid = is_valid_opcode(entry.opcode);
            assert_eq!(entry.operation != Operation::Invalid, valid, "{entry:?}");
            if valid {
                assert_eq!(entry.operation.opcode(), entry.opcode);
                assert_eq!(entry.mnemonic, entry.operation.to_string());
            }
        }
    }

    #[test]
    fn out_of_table_lookup_test() {
        assert_eq!(descriptor(-1).operation, Operation::Invalid);
        assert_eq!(descriptor(51).operation, Operation::Invalid);
        assert_eq!(descriptor(40).operation, Operation::Invalid);
        assert_eq!(descriptor(50).operation, Operation::End);
        assert_eq!(Operation::from_opcode(0), None);
        assert_eq!(Operation::from_opcode(31), None);
        assert_eq!(Operation::from_opcode(23), Some(Operation::Call));
    }

    #[test]
    fn cti_test() {
        let cti: Vec<Operation> = Operation::ALL
            .iter()
            .copied()
            .filter(|op| op.is_cti())
            .collect();
        assert_eq!(
            cti,
            vec![
                Operation::Jump,
                Operation::JumpEq,
                Operation::JumpNe,
                Operation::Call,
                Operation::Return,
                Operation::Interrupt,
                Operation::IReturn,
            ]
        );
    }

    #[test]
    fn operand_width_test() {
        assert!(descriptor(1).has_operand);
        assert!(!descriptor(6).has_operand);
        assert!(descriptor(9).has_operand);
        assert!(!descriptor(24).has_operand);
        assert!(!descriptor(50).has_operand);
    }

    #[test]
    fn display_test() {
        let mut load = Instruction::new(descriptor(1), 0);
        load.operand = Some(5);
        insta::assert_snapshot!(load.to_string(), @"00000000 LoadV         5 // U LoadV value: load the value into AC");

        let iret = Instruction::new(descriptor(30), 1005);
        insta::assert_snapshot!(iret.to_string(), @"00001005 IReturn         // S IReturn: return from system call");
    }
}
