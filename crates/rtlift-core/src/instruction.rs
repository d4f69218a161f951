//! Architecture-agnostic decoded instruction.

use crate::{Address, MachineOperand};

/// A decoded machine instruction. Immutable once produced by a disassembler.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineInstruction {
    /// Address of the first byte.
    pub address: Address,
    /// Length in bytes.
    pub length: usize,
    /// Raw bytes of the instruction.
    pub bytes: Vec<u8>,
    /// High-level operation category.
    pub operation: Operation,
    /// Mnemonic string (e.g., "mov", "pxor").
    pub mnemonic: String,
    /// Operands (destination first, then sources).
    pub operands: Vec<MachineOperand>,
    /// Control flow information.
    pub control_flow: ControlFlow,
}

impl MachineInstruction {
    /// Creates a new instruction with minimal fields.
    pub fn new(address: Address, bytes: Vec<u8>, mnemonic: impl Into<String>) -> Self {
        Self {
            address,
            length: bytes.len(),
            bytes,
            operation: Operation::Other(0),
            mnemonic: mnemonic.into(),
            operands: Vec::new(),
            control_flow: ControlFlow::Sequential,
        }
    }

    /// Sets the operation.
    pub fn with_operation(mut self, op: Operation) -> Self {
        self.operation = op;
        self
    }

    /// Adds an operand.
    pub fn with_operand(mut self, op: MachineOperand) -> Self {
        self.operands.push(op);
        self
    }

    /// Sets operands.
    pub fn with_operands(mut self, ops: Vec<MachineOperand>) -> Self {
        self.operands = ops;
        self
    }

    /// Sets the control flow.
    pub fn with_control_flow(mut self, cf: ControlFlow) -> Self {
        self.control_flow = cf;
        self
    }

    /// Returns the address of the following instruction.
    pub fn end_address(&self) -> Address {
        self.address.wrapping_add(self.length as u64)
    }

    /// Returns true if this instruction is a call.
    pub fn is_call(&self) -> bool {
        matches!(
            self.control_flow,
            ControlFlow::Call { .. } | ControlFlow::IndirectCall
        )
    }

    /// Returns true if this instruction is a return.
    pub fn is_return(&self) -> bool {
        matches!(self.control_flow, ControlFlow::Return)
    }

    /// Returns true if control never falls through to the next instruction.
    pub fn is_unconditional_transfer(&self) -> bool {
        matches!(
            self.control_flow,
            ControlFlow::UnconditionalBranch { .. }
                | ControlFlow::IndirectBranch
                | ControlFlow::Return
                | ControlFlow::Halt
        )
    }
}

/// High-level operation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Operation {
    // Data movement
    Move,
    Push,
    Pop,

    // Arithmetic
    Add,
    Sub,
    AddWithCarry,
    SubWithBorrow,

    // Logical
    And,
    Or,
    Xor,

    // Comparison
    Compare,

    // Control flow
    Jump,
    ConditionalJump,
    Call,
    Return,

    Nop,

    // Other
    Other(u16),
}

impl Operation {
    /// Returns the name of this operation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Push => "push",
            Self::Pop => "pop",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::AddWithCarry => "adc",
            Self::SubWithBorrow => "sbb",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Compare => "compare",
            Self::Jump => "jump",
            Self::ConditionalJump => "cond_jump",
            Self::Call => "call",
            Self::Return => "return",
            Self::Nop => "nop",
            Self::Other(_) => "other",
        }
    }
}

/// Branch condition for conditional jumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Condition {
    // Unsigned comparisons
    Equal,
    NotEqual,
    Above,         // CF=0 and ZF=0
    AboveOrEqual,  // CF=0
    Below,         // CF=1
    BelowOrEqual,  // CF=1 or ZF=1

    // Signed comparisons
    Greater,       // ZF=0 and SF=OF
    GreaterOrEqual,// SF=OF
    Less,          // SF!=OF
    LessOrEqual,   // ZF=1 or SF!=OF

    // Flag-based
    Sign,
    NotSign,
    Overflow,
    NotOverflow,
    Parity,
    NotParity,
}

impl Condition {
    /// Returns the inverse condition.
    pub fn inverse(&self) -> Self {
        match self {
            Self::Equal => Self::NotEqual,
            Self::NotEqual => Self::Equal,
            Self::Above => Self::BelowOrEqual,
            Self::AboveOrEqual => Self::Below,
            Self::Below => Self::AboveOrEqual,
            Self::BelowOrEqual => Self::Above,
            Self::Greater => Self::LessOrEqual,
            Self::GreaterOrEqual => Self::Less,
            Self::Less => Self::GreaterOrEqual,
            Self::LessOrEqual => Self::Greater,
            Self::Sign => Self::NotSign,
            Self::NotSign => Self::Sign,
            Self::Overflow => Self::NotOverflow,
            Self::NotOverflow => Self::Overflow,
            Self::Parity => Self::NotParity,
            Self::NotParity => Self::Parity,
        }
    }

    /// Returns the condition encoded in the low nibble of an x86 `Jcc` opcode.
    pub fn from_x86_cc(cc: u8) -> Self {
        match cc & 0x0F {
            0x0 => Self::Overflow,
            0x1 => Self::NotOverflow,
            0x2 => Self::Below,
            0x3 => Self::AboveOrEqual,
            0x4 => Self::Equal,
            0x5 => Self::NotEqual,
            0x6 => Self::BelowOrEqual,
            0x7 => Self::Above,
            0x8 => Self::Sign,
            0x9 => Self::NotSign,
            0xA => Self::Parity,
            0xB => Self::NotParity,
            0xC => Self::Less,
            0xD => Self::GreaterOrEqual,
            0xE => Self::LessOrEqual,
            _ => Self::Greater,
        }
    }

    /// Returns the x86 mnemonic suffix for this condition.
    pub fn x86_suffix(&self) -> &'static str {
        match self {
            Self::Equal => "e",
            Self::NotEqual => "ne",
            Self::Above => "a",
            Self::AboveOrEqual => "ae",
            Self::Below => "b",
            Self::BelowOrEqual => "be",
            Self::Greater => "g",
            Self::GreaterOrEqual => "ge",
            Self::Less => "l",
            Self::LessOrEqual => "le",
            Self::Sign => "s",
            Self::NotSign => "ns",
            Self::Overflow => "o",
            Self::NotOverflow => "no",
            Self::Parity => "p",
            Self::NotParity => "np",
        }
    }
}

/// Control flow classification.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    /// Sequential - falls through to next instruction.
    Sequential,

    /// Unconditional branch to a known address.
    UnconditionalBranch { target: Address },

    /// Conditional branch - may fall through or jump.
    ConditionalBranch {
        target: Address,
        condition: Condition,
        fallthrough: Address,
    },

    /// Indirect jump (target in register or memory).
    IndirectBranch,

    /// Call to a known address.
    Call { target: Address, return_addr: Address },

    /// Indirect call.
    IndirectCall,

    /// Return from procedure.
    Return,

    /// Halts execution.
    Halt,
}

impl std::fmt::Display for MachineInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}  ", self.address)?;

        for byte in &self.bytes {
            write!(f, "{:02x} ", byte)?;
        }

        // Pad to align mnemonic
        for _ in self.bytes.len()..8 {
            write!(f, "   ")?;
        }

        write!(f, " {}", self.mnemonic)?;

        if !self.operands.is_empty() {
            write!(f, " ")?;
            for (i, op) in self.operands.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", op)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RegisterClass, RegisterStorage};

    const EAX: RegisterStorage = RegisterStorage::new("eax", 0, RegisterClass::General, 32);

    #[test]
    fn test_condition_inverse_round_trip() {
        for cc in 0..16u8 {
            let c = Condition::from_x86_cc(cc);
            assert_ne!(c, c.inverse());
            assert_eq!(c.inverse().inverse(), c);
            // Adjacent encodings are inverses of each other.
            assert_eq!(Condition::from_x86_cc(cc ^ 1), c.inverse());
        }
    }

    #[test]
    fn test_end_address_and_display() {
        let insn = MachineInstruction::new(Address::ptr32(0x1000), vec![0x31, 0xC0], "xor")
            .with_operation(Operation::Xor)
            .with_operands(vec![MachineOperand::reg(EAX), MachineOperand::reg(EAX)]);
        assert_eq!(insn.length, 2);
        assert_eq!(insn.end_address(), Address::ptr32(0x1002));
        assert!(insn.to_string().ends_with("xor eax,eax"));
        assert!(!insn.is_unconditional_transfer());
    }
}
