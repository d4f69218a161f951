//! ModR/M and SIB byte decoding for 16- and 32-bit addressing.

use super::registers::{self, BP, BX, DI, SI};
use rtlift_core::{MachineOperand, MemoryRef, RegisterStorage};

/// Decoded ModR/M byte.
#[derive(Debug, Clone, Copy)]
pub struct ModRM {
    /// Mod field (2 bits)
    pub mod_: u8,
    /// Reg field (3 bits)
    pub reg: u8,
    /// R/M field (3 bits)
    pub rm: u8,
}

impl ModRM {
    pub fn parse(byte: u8) -> Self {
        Self {
            mod_: (byte >> 6) & 0x3,
            reg: (byte >> 3) & 0x7,
            rm: byte & 0x7,
        }
    }

    /// Returns true if this ModR/M encodes a register operand (mod=11).
    pub fn is_register(&self) -> bool {
        self.mod_ == 0b11
    }
}

/// Decoded SIB byte.
#[derive(Debug, Clone, Copy)]
pub struct Sib {
    /// Scale (2 bits) - actual scale is 1 << scale
    pub scale: u8,
    pub index: u8,
    pub base: u8,
}

impl Sib {
    pub fn parse(byte: u8) -> Self {
        Self {
            scale: (byte >> 6) & 0x3,
            index: (byte >> 3) & 0x7,
            base: byte & 0x7,
        }
    }

    /// Returns the actual scale factor (1, 2, 4, or 8).
    pub fn scale_factor(&self) -> u8 {
        1 << self.scale
    }
}

/// How the r/m field names a register when mod=11.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    General(u16),
    Mmx,
    Xmm,
}

impl RegisterKind {
    fn decode(self, reg: u8) -> RegisterStorage {
        match self {
            Self::General(bits) => registers::gpr(reg, bits),
            Self::Mmx => registers::mmx(reg),
            Self::Xmm => registers::xmm(reg),
        }
    }
}

/// Decode the reg field of ModR/M as a register operand.
pub fn decode_modrm_reg(modrm: ModRM, kind: RegisterKind) -> MachineOperand {
    MachineOperand::Register(kind.decode(modrm.reg))
}

fn read_disp(bytes: &[u8], offset: usize, size: usize) -> Option<i64> {
    let b = bytes.get(offset..offset + size)?;
    Some(match size {
        1 => b[0] as i8 as i64,
        2 => i16::from_le_bytes([b[0], b[1]]) as i64,
        _ => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
    })
}

/// Decode the r/m field of ModR/M.
/// `bytes` starts just past the ModR/M byte.
/// Returns (operand, bytes_consumed), or `None` if `bytes` is too short.
pub fn decode_modrm_rm(
    bytes: &[u8],
    modrm: ModRM,
    address_bits: u16,
    kind: RegisterKind,
    operand_bits: u16,
) -> Option<(MachineOperand, usize)> {
    if modrm.is_register() {
        return Some((MachineOperand::Register(kind.decode(modrm.rm)), 0));
    }
    if address_bits == 16 {
        decode_rm16(bytes, modrm, operand_bits)
    } else {
        decode_rm32(bytes, modrm, operand_bits)
    }
}

fn decode_rm16(bytes: &[u8], modrm: ModRM, bits: u16) -> Option<(MachineOperand, usize)> {
    // mod=00 rm=110 is a bare disp16.
    if modrm.mod_ == 0b00 && modrm.rm == 0b110 {
        let disp = read_disp(bytes, 0, 2)?;
        return Some((MachineOperand::Memory(MemoryRef::absolute(disp & 0xFFFF, bits)), 2));
    }
    let (base, index) = match modrm.rm {
        0 => (BX, Some(SI)),
        1 => (BX, Some(DI)),
        2 => (BP, Some(SI)),
        3 => (BP, Some(DI)),
        4 => (SI, None),
        5 => (DI, None),
        6 => (BP, None),
        _ => (BX, None),
    };
    let (displacement, consumed) = match modrm.mod_ {
        0b01 => (read_disp(bytes, 0, 1)?, 1),
        0b10 => (read_disp(bytes, 0, 2)?, 2),
        _ => (0, 0),
    };
    Some((
        MachineOperand::Memory(MemoryRef {
            base: Some(base),
            index,
            scale: 1,
            displacement,
            bits,
            segment: None,
        }),
        consumed,
    ))
}

fn decode_rm32(bytes: &[u8], modrm: ModRM, bits: u16) -> Option<(MachineOperand, usize)> {
    let mut offset = 0;
    let mut base = None;
    let mut index = None;
    let mut scale = 1;
    let mut disp32 = modrm.mod_ == 0b10;

    if modrm.rm == 0b100 {
        let sib = Sib::parse(*bytes.first()?);
        offset += 1;

        // Index ESP encoding means no index
        if sib.index != 0b100 {
            index = Some(registers::gpr(sib.index, 32));
            scale = sib.scale_factor();
        }
        // SIB base=5 with mod=00 has no base, only a disp32
        if sib.base == 0b101 && modrm.mod_ == 0b00 {
            disp32 = true;
        } else {
            base = Some(registers::gpr(sib.base, 32));
        }
    } else if modrm.rm == 0b101 && modrm.mod_ == 0b00 {
        disp32 = true;
    } else {
        base = Some(registers::gpr(modrm.rm, 32));
    }

    let mut displacement = 0;
    if disp32 {
        displacement = read_disp(bytes, offset, 4)?;
        offset += 4;
    } else if modrm.mod_ == 0b01 {
        displacement = read_disp(bytes, offset, 1)?;
        offset += 1;
    }

    Some((
        MachineOperand::Memory(MemoryRef {
            base,
            index,
            scale,
            displacement,
            bits,
            segment: None,
        }),
        offset,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::x86::registers::{EBP, ECX, ESP};

    fn mem(op: &MachineOperand) -> &MemoryRef {
        match op {
            MachineOperand::Memory(m) => m,
            other => panic!("expected memory operand, got {:?}", other),
        }
    }

    #[test]
    fn test_register_form() {
        let (op, n) =
            decode_modrm_rm(&[], ModRM::parse(0xC1), 32, RegisterKind::General(32), 32).unwrap();
        assert_eq!(op, MachineOperand::Register(ECX));
        assert_eq!(n, 0);
    }

    #[test]
    fn test_rm32_sib_and_disp8() {
        // [esp+8]: mod=01 rm=100, SIB base=esp no index
        let (op, n) = decode_modrm_rm(&[0x24, 0x08], ModRM::parse(0x44), 32, RegisterKind::General(32), 32)
            .unwrap();
        let m = mem(&op);
        assert_eq!(m.base, Some(ESP));
        assert_eq!(m.index, None);
        assert_eq!(m.displacement, 8);
        assert_eq!(n, 2);
    }

    #[test]
    fn test_rm32_absolute() {
        let (op, n) = decode_modrm_rm(
            &[0x00, 0x10, 0x40, 0x00],
            ModRM::parse(0x05),
            32,
            RegisterKind::General(32),
            32,
        )
        .unwrap();
        assert_eq!(mem(&op).base, None);
        assert_eq!(mem(&op).displacement, 0x401000);
        assert_eq!(n, 4);
    }

    #[test]
    fn test_rm32_ebp_disp32() {
        let (op, _) = decode_modrm_rm(
            &[0xFC, 0xFF, 0xFF, 0xFF],
            ModRM::parse(0x85),
            32,
            RegisterKind::General(32),
            32,
        )
        .unwrap();
        assert_eq!(mem(&op).base, Some(EBP));
        assert_eq!(mem(&op).displacement, -4);
    }

    #[test]
    fn test_rm16_forms() {
        // [bx+si]
        let (op, n) = decode_modrm_rm(&[], ModRM::parse(0x00), 16, RegisterKind::General(16), 16).unwrap();
        assert_eq!(mem(&op).base, Some(BX));
        assert_eq!(mem(&op).index, Some(SI));
        assert_eq!(n, 0);
        // [bp-2]
        let (op, n) = decode_modrm_rm(&[0xFE], ModRM::parse(0x46), 16, RegisterKind::General(16), 16).unwrap();
        assert_eq!(mem(&op).base, Some(BP));
        assert_eq!(mem(&op).displacement, -2);
        assert_eq!(n, 1);
        // [0x1234]
        let (op, n) =
            decode_modrm_rm(&[0x34, 0x12], ModRM::parse(0x06), 16, RegisterKind::General(16), 16).unwrap();
        assert_eq!(mem(&op).base, None);
        assert_eq!(mem(&op).displacement, 0x1234);
        assert_eq!(n, 2);
    }

    #[test]
    fn test_truncated() {
        assert!(decode_modrm_rm(&[], ModRM::parse(0x44), 32, RegisterKind::General(32), 32).is_none());
        assert!(decode_modrm_rm(&[0x12], ModRM::parse(0x86), 16, RegisterKind::General(16), 16).is_none());
    }
}
