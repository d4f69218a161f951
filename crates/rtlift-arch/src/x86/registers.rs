//! x86 register and flag tables.

use super::ProcessorMode;
use crate::ArchitectureDescriptor;
use rtlift_core::{Bitness, Endianness, FlagTable, RegisterClass, RegisterFile, RegisterStorage};
use std::sync::{Arc, OnceLock};

use RegisterClass::{Flags, General, ProgramCounter, Segment, StackPointer, Vector};

pub const EAX: RegisterStorage = RegisterStorage::new("eax", 0, General, 32);
pub const ECX: RegisterStorage = RegisterStorage::new("ecx", 1, General, 32);
pub const EDX: RegisterStorage = RegisterStorage::new("edx", 2, General, 32);
pub const EBX: RegisterStorage = RegisterStorage::new("ebx", 3, General, 32);
pub const ESP: RegisterStorage = RegisterStorage::new("esp", 4, StackPointer, 32);
pub const EBP: RegisterStorage = RegisterStorage::new("ebp", 5, General, 32);
pub const ESI: RegisterStorage = RegisterStorage::new("esi", 6, General, 32);
pub const EDI: RegisterStorage = RegisterStorage::new("edi", 7, General, 32);

pub const AX: RegisterStorage = RegisterStorage::carve("ax", 8, &EAX, 0, 16);
pub const CX: RegisterStorage = RegisterStorage::carve("cx", 9, &ECX, 0, 16);
pub const DX: RegisterStorage = RegisterStorage::carve("dx", 10, &EDX, 0, 16);
pub const BX: RegisterStorage = RegisterStorage::carve("bx", 11, &EBX, 0, 16);
pub const SP: RegisterStorage = RegisterStorage::carve("sp", 12, &ESP, 0, 16);
pub const BP: RegisterStorage = RegisterStorage::carve("bp", 13, &EBP, 0, 16);
pub const SI: RegisterStorage = RegisterStorage::carve("si", 14, &ESI, 0, 16);
pub const DI: RegisterStorage = RegisterStorage::carve("di", 15, &EDI, 0, 16);

pub const AL: RegisterStorage = RegisterStorage::carve("al", 16, &EAX, 0, 8);
pub const CL: RegisterStorage = RegisterStorage::carve("cl", 17, &ECX, 0, 8);
pub const DL: RegisterStorage = RegisterStorage::carve("dl", 18, &EDX, 0, 8);
pub const BL: RegisterStorage = RegisterStorage::carve("bl", 19, &EBX, 0, 8);
pub const AH: RegisterStorage = RegisterStorage::carve("ah", 20, &EAX, 8, 8);
pub const CH: RegisterStorage = RegisterStorage::carve("ch", 21, &ECX, 8, 8);
pub const DH: RegisterStorage = RegisterStorage::carve("dh", 22, &EDX, 8, 8);
pub const BH: RegisterStorage = RegisterStorage::carve("bh", 23, &EBX, 8, 8);

pub const ES: RegisterStorage = RegisterStorage::new("es", 24, Segment, 16);
pub const CS: RegisterStorage = RegisterStorage::new("cs", 25, Segment, 16);
pub const SS: RegisterStorage = RegisterStorage::new("ss", 26, Segment, 16);
pub const DS: RegisterStorage = RegisterStorage::new("ds", 27, Segment, 16);
pub const FS: RegisterStorage = RegisterStorage::new("fs", 28, Segment, 16);
pub const GS: RegisterStorage = RegisterStorage::new("gs", 29, Segment, 16);

pub const EIP: RegisterStorage = RegisterStorage::new("eip", 30, ProgramCounter, 32);
pub const IP: RegisterStorage = RegisterStorage::carve("ip", 31, &EIP, 0, 16);
pub const EFLAGS: RegisterStorage = RegisterStorage::new("eflags", 32, Flags, 32);

const GPR32: [RegisterStorage; 8] = [EAX, ECX, EDX, EBX, ESP, EBP, ESI, EDI];
const GPR16: [RegisterStorage; 8] = [AX, CX, DX, BX, SP, BP, SI, DI];
const GPR8: [RegisterStorage; 8] = [AL, CL, DL, BL, AH, CH, DH, BH];
const SEGMENTS: [RegisterStorage; 6] = [ES, CS, SS, DS, FS, GS];

const MM: [RegisterStorage; 8] = [
    RegisterStorage::new("mm0", 40, Vector, 64),
    RegisterStorage::new("mm1", 41, Vector, 64),
    RegisterStorage::new("mm2", 42, Vector, 64),
    RegisterStorage::new("mm3", 43, Vector, 64),
    RegisterStorage::new("mm4", 44, Vector, 64),
    RegisterStorage::new("mm5", 45, Vector, 64),
    RegisterStorage::new("mm6", 46, Vector, 64),
    RegisterStorage::new("mm7", 47, Vector, 64),
];

const XMM: [RegisterStorage; 8] = [
    RegisterStorage::new("xmm0", 48, Vector, 128),
    RegisterStorage::new("xmm1", 49, Vector, 128),
    RegisterStorage::new("xmm2", 50, Vector, 128),
    RegisterStorage::new("xmm3", 51, Vector, 128),
    RegisterStorage::new("xmm4", 52, Vector, 128),
    RegisterStorage::new("xmm5", 53, Vector, 128),
    RegisterStorage::new("xmm6", 54, Vector, 128),
    RegisterStorage::new("xmm7", 55, Vector, 128),
];

// Flag bits in canonical naming order.
pub const FLAG_S: u32 = 0x01;
pub const FLAG_C: u32 = 0x02;
pub const FLAG_Z: u32 = 0x04;
pub const FLAG_D: u32 = 0x08;
pub const FLAG_O: u32 = 0x10;
pub const FLAG_P: u32 = 0x20;

/// Decodes a general purpose register number of the given width.
pub fn gpr(reg: u8, bits: u16) -> RegisterStorage {
    let reg = (reg & 0x7) as usize;
    match bits {
        8 => GPR8[reg],
        16 => GPR16[reg],
        _ => GPR32[reg],
    }
}

/// Decodes a segment register number.
pub fn sreg(reg: u8) -> Option<RegisterStorage> {
    SEGMENTS.get(reg as usize).copied()
}

/// Decodes an MMX register number.
pub fn mmx(reg: u8) -> RegisterStorage {
    MM[(reg & 0x7) as usize]
}

/// Decodes an SSE register number.
pub fn xmm(reg: u8) -> RegisterStorage {
    XMM[(reg & 0x7) as usize]
}

/// Returns the stack pointer of the given width.
pub fn stack_pointer(bits: u16) -> RegisterStorage {
    if bits == 16 {
        SP
    } else {
        ESP
    }
}

fn register_file() -> RegisterFile {
    let mut regs = Vec::with_capacity(64);
    regs.extend(GPR32);
    regs.extend(GPR16);
    regs.extend(GPR8);
    regs.extend(SEGMENTS);
    regs.extend([EIP, IP, EFLAGS]);
    regs.extend(MM);
    regs.extend(XMM);
    RegisterFile::new(128, regs)
}

fn flag_table() -> FlagTable {
    FlagTable::new(
        EFLAGS,
        &[
            (FLAG_S, 'S'),
            (FLAG_C, 'C'),
            (FLAG_Z, 'Z'),
            (FLAG_D, 'D'),
            (FLAG_O, 'O'),
            (FLAG_P, 'P'),
        ],
    )
    .with_alias('V', FLAG_O)
}

/// Returns the shared tables for a processor mode, building them on first use.
pub fn descriptor(mode: ProcessorMode) -> Arc<ArchitectureDescriptor> {
    static REAL: OnceLock<Arc<ArchitectureDescriptor>> = OnceLock::new();
    static PROTECTED: OnceLock<Arc<ArchitectureDescriptor>> = OnceLock::new();

    let cell = match mode {
        ProcessorMode::Real16 => &REAL,
        ProcessorMode::Protected32 => &PROTECTED,
    };
    cell.get_or_init(|| {
        let real = mode == ProcessorMode::Real16;
        Arc::new(ArchitectureDescriptor {
            name: mode.architecture_name(),
            description: if real {
                "Intel x86 real mode, 16-bit segmented"
            } else {
                "Intel x86 protected mode, 32-bit flat"
            },
            registers: register_file(),
            flags: flag_table(),
            stack_register: if real { SP } else { ESP },
            instruction_pointer: if real { IP } else { EIP },
            code_segment: real.then_some(CS),
            pointer_bitness: if real { Bitness::Bits16 } else { Bitness::Bits32 },
            word_bits: if real { 16 } else { 32 },
            endianness: Endianness::Little,
            return_address_size: if real { 2 } else { 4 },
        })
    })
    .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_file_is_well_formed() {
        let regs = register_file();
        assert!(RegisterFile::validate(regs.max_bits(), &regs.iter().copied().collect::<Vec<_>>()).is_ok());
        for r in regs.iter() {
            assert_eq!(regs.by_name(r.name), Some(*r));
            assert_eq!(regs.by_index(r.number), Some(*r));
        }
    }

    #[test]
    fn test_subregisters() {
        let regs = register_file();
        assert_eq!(regs.subregister(&EAX, 0, 16), Some(AX));
        assert_eq!(regs.subregister(&EAX, 8, 8), Some(AH));
        assert_eq!(regs.subregister(&ESP, 0, 32), Some(ESP));
        assert_eq!(regs.subregister(&ESP, 8, 8), None);
        assert_eq!(regs.domain_root(&BH), Some(EBX));
    }

    #[test]
    fn test_gpr_decoding() {
        assert_eq!(gpr(0, 32), EAX);
        assert_eq!(gpr(4, 16), SP);
        assert_eq!(gpr(4, 8), AH);
        assert_eq!(gpr(7, 8), BH);
        assert_eq!(sreg(3), Some(DS));
        assert_eq!(sreg(6), None);
    }

    #[test]
    fn test_descriptors_are_shared() {
        let a = descriptor(ProcessorMode::Protected32);
        let b = descriptor(ProcessorMode::Protected32);
        assert!(Arc::ptr_eq(&a, &b));
        let real = descriptor(ProcessorMode::Real16);
        assert_eq!(real.stack_register, SP);
        assert!(real.is_segmented());
        assert!(!a.is_segmented());
    }
}
