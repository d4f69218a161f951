//! Machine instruction operand types.

use crate::{Address, RegisterStorage};

/// An instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum MachineOperand {
    /// Register operand.
    Register(RegisterStorage),
    /// Immediate value.
    Immediate(Immediate),
    /// Memory reference.
    Memory(MemoryRef),
    /// Resolved branch or call target.
    Address(Address),
}

impl MachineOperand {
    /// Creates a register operand.
    pub fn reg(reg: RegisterStorage) -> Self {
        Self::Register(reg)
    }

    /// Creates an immediate operand of `bits` width.
    pub fn imm(value: i64, bits: u16) -> Self {
        Self::Immediate(Immediate { value, bits })
    }

    /// Returns the register if this is a register operand.
    pub fn as_register(&self) -> Option<&RegisterStorage> {
        match self {
            Self::Register(reg) => Some(reg),
            _ => None,
        }
    }

    /// Returns true if this is a register operand.
    pub fn is_register(&self) -> bool {
        matches!(self, Self::Register(_))
    }

    /// Returns true if this is an immediate operand.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Self::Immediate(_))
    }

    /// Returns true if this is a memory operand.
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    /// Returns the operand width in bits, if it has one.
    pub fn bits(&self) -> Option<u16> {
        match self {
            Self::Register(reg) => Some(reg.bit_size),
            Self::Immediate(imm) => Some(imm.bits),
            Self::Memory(mem) => Some(mem.bits),
            Self::Address(_) => None,
        }
    }
}

/// Immediate value operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Immediate {
    /// The value, sign-extended.
    pub value: i64,
    /// Encoded width in bits.
    pub bits: u16,
}

impl Immediate {
    /// Returns the value truncated to its encoded width.
    pub fn as_u64(&self) -> u64 {
        if self.bits >= 64 {
            self.value as u64
        } else {
            (self.value as u64) & ((1u64 << self.bits) - 1)
        }
    }
}

/// Memory reference operand: `[segment:][base + index*scale + disp]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRef {
    /// Base register (if any).
    pub base: Option<RegisterStorage>,
    /// Index register (if any).
    pub index: Option<RegisterStorage>,
    /// Scale factor for index.
    pub scale: u8,
    /// Displacement/offset.
    pub displacement: i64,
    /// Access width in bits.
    pub bits: u16,
    /// Segment override.
    pub segment: Option<RegisterStorage>,
}

impl MemoryRef {
    /// Creates a memory reference with base and displacement.
    pub fn base_disp(base: RegisterStorage, displacement: i64, bits: u16) -> Self {
        Self {
            base: Some(base),
            index: None,
            scale: 1,
            displacement,
            bits,
            segment: None,
        }
    }

    /// Creates a memory reference with just a displacement (absolute address).
    pub fn absolute(displacement: i64, bits: u16) -> Self {
        Self {
            base: None,
            index: None,
            scale: 1,
            displacement,
            bits,
            segment: None,
        }
    }

    /// Sets the segment override.
    pub fn with_segment(mut self, segment: RegisterStorage) -> Self {
        self.segment = Some(segment);
        self
    }
}

impl std::fmt::Display for MachineOperand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register(reg) => write!(f, "{}", reg),
            Self::Immediate(imm) => {
                if imm.value < 0 {
                    write!(f, "-{:#x}", imm.value.unsigned_abs())
                } else {
                    write!(f, "{:#x}", imm.value)
                }
            }
            Self::Memory(mem) => {
                if let Some(seg) = mem.segment {
                    write!(f, "{}:", seg)?;
                }
                write!(f, "[")?;
                let mut has_content = false;

                if let Some(base) = mem.base {
                    write!(f, "{}", base)?;
                    has_content = true;
                }

                if let Some(index) = mem.index {
                    if has_content {
                        write!(f, "+")?;
                    }
                    write!(f, "{}", index)?;
                    if mem.scale > 1 {
                        write!(f, "*{}", mem.scale)?;
                    }
                    has_content = true;
                }

                if mem.displacement != 0 || !has_content {
                    if has_content {
                        if mem.displacement > 0 {
                            write!(f, "+{:X}", mem.displacement)?;
                        } else {
                            write!(f, "-{:X}", mem.displacement.unsigned_abs())?;
                        }
                    } else {
                        write!(f, "{:X}", mem.displacement)?;
                    }
                }

                write!(f, "]")
            }
            Self::Address(addr) => write!(f, "{}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RegisterClass;

    const EBX: RegisterStorage = RegisterStorage::new("ebx", 3, RegisterClass::General, 32);
    const ES: RegisterStorage = RegisterStorage::new("es", 24, RegisterClass::Segment, 16);

    #[test]
    fn test_immediate_truncation() {
        let imm = Immediate { value: -1, bits: 16 };
        assert_eq!(imm.as_u64(), 0xFFFF);
    }

    #[test]
    fn test_display() {
        assert_eq!(MachineOperand::reg(EBX).to_string(), "ebx");
        assert_eq!(MachineOperand::imm(-4, 8).to_string(), "-0x4");
        let mem = MachineOperand::Memory(MemoryRef::base_disp(EBX, -8, 32));
        assert_eq!(mem.to_string(), "[ebx-8]");
        let seg = MachineOperand::Memory(MemoryRef::absolute(0x40, 16).with_segment(ES));
        assert_eq!(seg.to_string(), "es:[40]");
    }
}
