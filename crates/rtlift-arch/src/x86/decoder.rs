//! x86 instruction decoder for 16- and 32-bit code.
//!
//! Covers the data movement, arithmetic, logical and control transfer
//! forms the rewriter lifts, plus the rest of the classic ALU group so that
//! unsupported forms surface as rewriter errors rather than decode errors.

use super::modrm::{decode_modrm_reg, decode_modrm_rm, ModRM, RegisterKind};
use super::prefix::Prefixes;
use super::registers;
use super::ProcessorMode;
use crate::DecodeError;
use rtlift_core::{
    Address, Condition, ControlFlow, ImageReader, MachineInstruction, MachineOperand, Operation,
};

/// Longest legal x86 instruction.
pub const MAX_INSTRUCTION_LENGTH: usize = 15;

const GROUP1_OPS: [(&str, Operation); 8] = [
    ("add", Operation::Add),
    ("or", Operation::Or),
    ("adc", Operation::AddWithCarry),
    ("sbb", Operation::SubWithBorrow),
    ("and", Operation::And),
    ("sub", Operation::Sub),
    ("xor", Operation::Xor),
    ("cmp", Operation::Compare),
];

/// Result of decoding an instruction.
#[derive(Debug, Clone)]
pub struct DecodedInstruction {
    /// The decoded instruction.
    pub instruction: MachineInstruction,
    /// Number of bytes consumed.
    pub size: usize,
}

/// Bounds-checked cursor over the bytes of one instruction.
struct Cursor<'b> {
    bytes: &'b [u8],
    offset: usize,
    address: Address,
}

impl<'b> Cursor<'b> {
    fn need(&self, n: usize) -> Result<&'b [u8], DecodeError> {
        self.bytes
            .get(self.offset..self.offset + n)
            .ok_or_else(|| DecodeError::truncated(self.address, self.offset + n, self.bytes.len()))
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        let b = self.need(1)?[0];
        self.offset += 1;
        Ok(b)
    }

    /// Reads a sign-extended little-endian immediate of `bits` width.
    fn imm(&mut self, bits: u16) -> Result<i64, DecodeError> {
        let b = self.need(bits as usize / 8)?;
        let value = match bits {
            8 => b[0] as i8 as i64,
            16 => i16::from_le_bytes([b[0], b[1]]) as i64,
            _ => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
        };
        self.offset += bits as usize / 8;
        Ok(value)
    }

    fn modrm(&mut self) -> Result<ModRM, DecodeError> {
        self.u8().map(ModRM::parse)
    }

    fn rm(
        &mut self,
        modrm: ModRM,
        prefixes: &Prefixes,
        address_bits: u16,
        kind: RegisterKind,
        operand_bits: u16,
    ) -> Result<MachineOperand, DecodeError> {
        let rest = &self.bytes[self.offset..];
        let (mut op, consumed) = decode_modrm_rm(rest, modrm, address_bits, kind, operand_bits)
            .ok_or_else(|| DecodeError::truncated(self.address, self.bytes.len() + 1, self.bytes.len()))?;
        self.offset += consumed;
        if let (MachineOperand::Memory(mem), Some(seg)) = (&mut op, prefixes.segment) {
            mem.segment = Some(seg);
        }
        Ok(op)
    }
}

/// x86 instruction decoder.
#[derive(Debug, Clone, Copy)]
pub struct X86Decoder {
    mode: ProcessorMode,
}

impl X86Decoder {
    pub fn new(mode: ProcessorMode) -> Self {
        Self { mode }
    }

    /// Decode a single instruction starting at the given address.
    pub fn decode_instruction(
        &self,
        bytes: &[u8],
        address: Address,
    ) -> Result<DecodedInstruction, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::truncated(address, 1, 0));
        }
        let bytes = &bytes[..bytes.len().min(MAX_INSTRUCTION_LENGTH)];

        let (prefixes, prefix_len) = Prefixes::parse(bytes);
        let default_bits = self.mode.default_bits();
        let op_bits = prefixes.operand_bits(default_bits);
        let addr_bits = prefixes.address_bits(default_bits);

        let mut c = Cursor {
            bytes,
            offset: prefix_len,
            address,
        };
        let opcode = c.u8()?;

        let mut control_flow = ControlFlow::Sequential;
        let (mnemonic, operation, operands): (String, Operation, Vec<MachineOperand>) = match opcode {
            // Classic ALU block: add, or, adc, sbb, and, sub, xor, cmp
            0x00..=0x3F if opcode & 0x07 < 6 => {
                let (mnemonic, operation) = GROUP1_OPS[(opcode >> 3) as usize];
                let byte_op = opcode & 0x01 == 0;
                let bits = if byte_op { 8 } else { op_bits };
                let operands = match opcode & 0x07 {
                    0..=3 => {
                        let modrm = c.modrm()?;
                        let rm = c.rm(modrm, &prefixes, addr_bits, RegisterKind::General(bits), bits)?;
                        let reg = decode_modrm_reg(modrm, RegisterKind::General(bits));
                        if opcode & 0x02 == 0 {
                            vec![rm, reg]
                        } else {
                            vec![reg, rm]
                        }
                    }
                    _ => {
                        let acc = MachineOperand::reg(registers::gpr(0, bits));
                        vec![acc, MachineOperand::imm(c.imm(bits.min(32))?, bits)]
                    }
                };
                (mnemonic.to_string(), operation, operands)
            }

            0x06 | 0x0E | 0x16 | 0x1E | 0x07 | 0x17 | 0x1F => {
                let seg = registers::sreg(opcode >> 3)
                    .ok_or_else(|| DecodeError::unknown_opcode(address, &bytes[..c.offset]))?;
                if opcode & 0x01 == 0 {
                    ("push".into(), Operation::Push, vec![MachineOperand::reg(seg)])
                } else {
                    ("pop".into(), Operation::Pop, vec![MachineOperand::reg(seg)])
                }
            }

            0x0F => return self.decode_two_byte(c, address, &prefixes, op_bits, addr_bits),

            0x50..=0x57 => (
                "push".into(),
                Operation::Push,
                vec![MachineOperand::reg(registers::gpr(opcode, op_bits))],
            ),
            0x58..=0x5F => (
                "pop".into(),
                Operation::Pop,
                vec![MachineOperand::reg(registers::gpr(opcode, op_bits))],
            ),
            0x68 => (
                "push".into(),
                Operation::Push,
                vec![MachineOperand::imm(c.imm(op_bits)?, op_bits)],
            ),
            0x6A => (
                "push".into(),
                Operation::Push,
                vec![MachineOperand::imm(c.imm(8)?, op_bits)],
            ),

            0x70..=0x7F => {
                let rel = c.imm(8)?;
                let condition = Condition::from_x86_cc(opcode);
                let end = address.wrapping_add(c.offset as u64);
                let target = end.wrapping_add(rel as u64);
                control_flow = ControlFlow::ConditionalBranch {
                    target,
                    condition,
                    fallthrough: end,
                };
                (
                    format!("j{}", condition.x86_suffix()),
                    Operation::ConditionalJump,
                    vec![MachineOperand::Address(target)],
                )
            }

            0x80..=0x83 => {
                let modrm = c.modrm()?;
                let (mnemonic, operation) = GROUP1_OPS[modrm.reg as usize];
                let bits = if opcode & 0x01 == 0 { 8 } else { op_bits };
                let rm = c.rm(modrm, &prefixes, addr_bits, RegisterKind::General(bits), bits)?;
                let imm = if opcode == 0x81 {
                    c.imm(bits)?
                } else {
                    c.imm(8)?
                };
                (
                    mnemonic.to_string(),
                    operation,
                    vec![rm, MachineOperand::imm(imm, bits)],
                )
            }

            0x88..=0x8B => {
                let bits = if opcode & 0x01 == 0 { 8 } else { op_bits };
                let modrm = c.modrm()?;
                let rm = c.rm(modrm, &prefixes, addr_bits, RegisterKind::General(bits), bits)?;
                let reg = decode_modrm_reg(modrm, RegisterKind::General(bits));
                let operands = if opcode & 0x02 == 0 {
                    vec![rm, reg]
                } else {
                    vec![reg, rm]
                };
                ("mov".into(), Operation::Move, operands)
            }

            0x8C | 0x8E => {
                let modrm = c.modrm()?;
                let seg = registers::sreg(modrm.reg)
                    .ok_or_else(|| DecodeError::invalid_encoding(address, "no such segment register"))?;
                let rm = c.rm(modrm, &prefixes, addr_bits, RegisterKind::General(16), 16)?;
                let seg = MachineOperand::reg(seg);
                let operands = if opcode == 0x8C { vec![rm, seg] } else { vec![seg, rm] };
                ("mov".into(), Operation::Move, operands)
            }

            0x8F => {
                let modrm = c.modrm()?;
                if modrm.reg != 0 {
                    return Err(DecodeError::invalid_encoding(address, "8F requires /0"));
                }
                let rm = c.rm(modrm, &prefixes, addr_bits, RegisterKind::General(op_bits), op_bits)?;
                ("pop".into(), Operation::Pop, vec![rm])
            }

            0x90 => ("nop".into(), Operation::Nop, vec![]),

            0xB0..=0xB7 => {
                let reg = registers::gpr(opcode, 8);
                let imm = c.imm(8)?;
                (
                    "mov".into(),
                    Operation::Move,
                    vec![MachineOperand::reg(reg), MachineOperand::imm(imm, 8)],
                )
            }
            0xB8..=0xBF => {
                let reg = registers::gpr(opcode, op_bits);
                let imm = c.imm(op_bits)?;
                (
                    "mov".into(),
                    Operation::Move,
                    vec![MachineOperand::reg(reg), MachineOperand::imm(imm, op_bits)],
                )
            }

            0xC2 => {
                let extra = c.imm(16)?;
                control_flow = ControlFlow::Return;
                (
                    "ret".into(),
                    Operation::Return,
                    vec![MachineOperand::imm(extra & 0xFFFF, 16)],
                )
            }
            0xC3 => {
                control_flow = ControlFlow::Return;
                ("ret".into(), Operation::Return, vec![])
            }

            0xC6 | 0xC7 => {
                let bits = if opcode == 0xC6 { 8 } else { op_bits };
                let modrm = c.modrm()?;
                if modrm.reg != 0 {
                    return Err(DecodeError::invalid_encoding(address, "C6/C7 require /0"));
                }
                let rm = c.rm(modrm, &prefixes, addr_bits, RegisterKind::General(bits), bits)?;
                let imm = c.imm(bits)?;
                (
                    "mov".into(),
                    Operation::Move,
                    vec![rm, MachineOperand::imm(imm, bits)],
                )
            }

            0xE8 | 0xE9 | 0xEB => {
                let rel = if opcode == 0xEB { c.imm(8)? } else { c.imm(op_bits)? };
                let end = address.wrapping_add(c.offset as u64);
                let target = end.wrapping_add(rel as u64);
                if opcode == 0xE8 {
                    control_flow = ControlFlow::Call {
                        target,
                        return_addr: end,
                    };
                    ("call".into(), Operation::Call, vec![MachineOperand::Address(target)])
                } else {
                    control_flow = ControlFlow::UnconditionalBranch { target };
                    ("jmp".into(), Operation::Jump, vec![MachineOperand::Address(target)])
                }
            }

            0xFF => {
                let modrm = c.modrm()?;
                let rm = c.rm(modrm, &prefixes, addr_bits, RegisterKind::General(op_bits), op_bits)?;
                match modrm.reg {
                    2 => {
                        control_flow = ControlFlow::IndirectCall;
                        ("call".into(), Operation::Call, vec![rm])
                    }
                    4 => {
                        control_flow = ControlFlow::IndirectBranch;
                        ("jmp".into(), Operation::Jump, vec![rm])
                    }
                    6 => ("push".into(), Operation::Push, vec![rm]),
                    _ => {
                        return Err(DecodeError::unsupported(
                            address,
                            format!("FF /{}", modrm.reg),
                        ))
                    }
                }
            }

            _ => return Err(DecodeError::unknown_opcode(address, &bytes[..c.offset])),
        };

        Ok(Self::finish(c, address, mnemonic, operation, operands, control_flow))
    }

    fn decode_two_byte(
        &self,
        mut c: Cursor<'_>,
        address: Address,
        prefixes: &Prefixes,
        op_bits: u16,
        addr_bits: u16,
    ) -> Result<DecodedInstruction, DecodeError> {
        let opcode = c.u8()?;
        match opcode {
            0x80..=0x8F => {
                let rel = c.imm(op_bits)?;
                let condition = Condition::from_x86_cc(opcode);
                let end = address.wrapping_add(c.offset as u64);
                let target = end.wrapping_add(rel as u64);
                let cf = ControlFlow::ConditionalBranch {
                    target,
                    condition,
                    fallthrough: end,
                };
                Ok(Self::finish(
                    c,
                    address,
                    format!("j{}", condition.x86_suffix()),
                    Operation::ConditionalJump,
                    vec![MachineOperand::Address(target)],
                    cf,
                ))
            }
            // pxor: MMX form, or SSE2 form with the 0x66 prefix
            0xEF => {
                let (kind, bits) = if prefixes.operand_size {
                    (RegisterKind::Xmm, 128)
                } else {
                    (RegisterKind::Mmx, 64)
                };
                let modrm = c.modrm()?;
                let rm = c.rm(modrm, prefixes, addr_bits, kind, bits)?;
                let reg = decode_modrm_reg(modrm, kind);
                Ok(Self::finish(
                    c,
                    address,
                    "pxor".into(),
                    Operation::Xor,
                    vec![reg, rm],
                    ControlFlow::Sequential,
                ))
            }
            _ => Err(DecodeError::unknown_opcode(address, &c.bytes[..c.offset])),
        }
    }

    fn finish(
        c: Cursor<'_>,
        address: Address,
        mnemonic: String,
        operation: Operation,
        operands: Vec<MachineOperand>,
        control_flow: ControlFlow,
    ) -> DecodedInstruction {
        let instruction = MachineInstruction::new(address, c.bytes[..c.offset].to_vec(), mnemonic)
            .with_operation(operation)
            .with_operands(operands)
            .with_control_flow(control_flow);
        DecodedInstruction {
            instruction,
            size: c.offset,
        }
    }
}

/// Lazy instruction stream over an image reader.
///
/// After a decode error the stream resumes one byte further on.
pub struct X86Disassembly<'a> {
    decoder: X86Decoder,
    rdr: ImageReader<'a>,
}

impl<'a> X86Disassembly<'a> {
    pub fn new(decoder: X86Decoder, rdr: ImageReader<'a>) -> Self {
        Self { decoder, rdr }
    }
}

impl<'a> Iterator for X86Disassembly<'a> {
    type Item = Result<MachineInstruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.rdr.has_more() {
            return None;
        }
        let address = self.rdr.address();
        let bytes = self.rdr.peek_bytes(MAX_INSTRUCTION_LENGTH);
        match self.decoder.decode_instruction(bytes, address) {
            Ok(decoded) => {
                self.rdr.skip(decoded.size).ok()?;
                log::trace!("{}", decoded.instruction);
                Some(Ok(decoded.instruction))
            }
            Err(e) => {
                self.rdr.skip(1).ok()?;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86::registers::*;
    use rtlift_core::{Endianness, MemoryRef};

    fn decode32(bytes: &[u8]) -> MachineInstruction {
        X86Decoder::new(ProcessorMode::Protected32)
            .decode_instruction(bytes, Address::ptr32(0x1000))
            .unwrap()
            .instruction
    }

    fn decode16(bytes: &[u8]) -> MachineInstruction {
        X86Decoder::new(ProcessorMode::Real16)
            .decode_instruction(bytes, Address::segmented(0x0C00, 0x0100).unwrap())
            .unwrap()
            .instruction
    }

    #[test]
    fn test_nop() {
        let insn = decode32(&[0x90]);
        assert_eq!(insn.mnemonic, "nop");
        assert_eq!(insn.length, 1);
    }

    #[test]
    fn test_xor_same_register() {
        let insn = decode32(&[0x31, 0xC0]);
        assert_eq!(insn.mnemonic, "xor");
        assert_eq!(insn.operation, Operation::Xor);
        assert_eq!(insn.operands, vec![MachineOperand::reg(EAX), MachineOperand::reg(EAX)]);

        let insn = decode16(&[0x33, 0xDB]);
        assert_eq!(insn.operands, vec![MachineOperand::reg(BX), MachineOperand::reg(BX)]);
    }

    #[test]
    fn test_pxor_forms() {
        let insn = decode32(&[0x0F, 0xEF, 0xC1]);
        assert_eq!(insn.mnemonic, "pxor");
        assert_eq!(insn.operands[0].as_register().map(|r| r.name), Some("mm0"));
        assert_eq!(insn.operands[1].as_register().map(|r| r.name), Some("mm1"));

        let insn = decode32(&[0x66, 0x0F, 0xEF, 0xC0]);
        assert_eq!(insn.operands[0].bits(), Some(128));
        assert_eq!(insn.length, 4);
    }

    #[test]
    fn test_operand_size_prefix() {
        // mov ax, 0x1234 in 32-bit code
        let insn = decode32(&[0x66, 0xB8, 0x34, 0x12]);
        assert_eq!(insn.operands, vec![MachineOperand::reg(AX), MachineOperand::imm(0x1234, 16)]);
        // mov eax, 1 in 16-bit code
        let insn = decode16(&[0x66, 0xB8, 0x01, 0x00, 0x00, 0x00]);
        assert_eq!(insn.operands[0], MachineOperand::reg(EAX));
        assert_eq!(insn.length, 6);
    }

    #[test]
    fn test_group1_sign_extends_imm8() {
        // sub esp, 8
        let insn = decode32(&[0x83, 0xEC, 0x08]);
        assert_eq!(insn.mnemonic, "sub");
        assert_eq!(insn.operands, vec![MachineOperand::reg(ESP), MachineOperand::imm(8, 32)]);
        // add eax, -1
        let insn = decode32(&[0x83, 0xC0, 0xFF]);
        assert_eq!(insn.operands[1], MachineOperand::imm(-1, 32));
    }

    #[test]
    fn test_segment_push_pop() {
        let insn = decode16(&[0x0E]);
        assert_eq!(insn.mnemonic, "push");
        assert_eq!(insn.operands, vec![MachineOperand::reg(CS)]);
        let insn = decode16(&[0x1F]);
        assert_eq!(insn.mnemonic, "pop");
        assert_eq!(insn.operands, vec![MachineOperand::reg(DS)]);
    }

    #[test]
    fn test_segment_override() {
        // mov es:[di], ax
        let insn = decode16(&[0x26, 0x89, 0x05]);
        match &insn.operands[0] {
            MachineOperand::Memory(MemoryRef { base, segment, .. }) => {
                assert_eq!(*base, Some(DI));
                assert_eq!(*segment, Some(ES));
            }
            other => panic!("expected memory operand, got {:?}", other),
        }
    }

    #[test]
    fn test_call_rel() {
        let insn = decode32(&[0xE8, 0x00, 0x01, 0x00, 0x00]);
        assert_eq!(insn.mnemonic, "call");
        assert_eq!(
            insn.control_flow,
            ControlFlow::Call {
                target: Address::ptr32(0x1105),
                return_addr: Address::ptr32(0x1005),
            }
        );

        let insn = decode16(&[0xE8, 0xFD, 0xFF]);
        assert_eq!(
            insn.operands[0],
            MachineOperand::Address(Address::segmented(0x0C00, 0x0100).unwrap())
        );
    }

    #[test]
    fn test_jcc() {
        let insn = decode32(&[0x75, 0x10]);
        assert_eq!(insn.mnemonic, "jne");
        assert_eq!(
            insn.control_flow,
            ControlFlow::ConditionalBranch {
                target: Address::ptr32(0x1012),
                condition: Condition::NotEqual,
                fallthrough: Address::ptr32(0x1002),
            }
        );
        let insn = decode32(&[0x0F, 0x84, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(insn.mnemonic, "je");
        assert_eq!(insn.length, 6);
    }

    #[test]
    fn test_ret_forms() {
        let insn = decode32(&[0xC3]);
        assert!(insn.is_return());
        let insn = decode16(&[0xC2, 0x04, 0x00]);
        assert_eq!(insn.operands, vec![MachineOperand::imm(4, 16)]);
    }

    #[test]
    fn test_errors() {
        let d = X86Decoder::new(ProcessorMode::Protected32);
        let at = Address::ptr32(0x1000);
        assert!(matches!(d.decode_instruction(&[], at), Err(DecodeError::Truncated { .. })));
        assert!(matches!(d.decode_instruction(&[0xB8, 0x01], at), Err(DecodeError::Truncated { .. })));
        assert!(matches!(d.decode_instruction(&[0xF4], at), Err(DecodeError::UnknownOpcode { .. })));
        assert!(matches!(d.decode_instruction(&[0x66; 20], at), Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn test_stream_resyncs_after_error() {
        let bytes = [0xF4, 0x90, 0xC3];
        let rdr = ImageReader::from_bytes(&bytes, Address::ptr32(0x1000), Endianness::Little);
        let items: Vec<_> = X86Disassembly::new(X86Decoder::new(ProcessorMode::Protected32), rdr).collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_err());
        assert_eq!(items[1].as_ref().unwrap().mnemonic, "nop");
        assert_eq!(items[2].as_ref().unwrap().address, Address::ptr32(0x1002));
    }
}
