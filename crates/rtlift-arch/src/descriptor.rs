//! Immutable per-architecture tables.

use rtlift_core::{Bitness, Endianness, FlagTable, RegisterFile, RegisterStorage};

/// Everything about an architecture that never changes once built.
///
/// Descriptors are built once per architecture variant and shared through
/// an `Arc` by every processor state and lift that uses it.
#[derive(Debug)]
pub struct ArchitectureDescriptor {
    /// Registry name, e.g. `x86-protected-32`.
    pub name: &'static str,
    pub description: &'static str,
    pub registers: RegisterFile,
    pub flags: FlagTable,
    pub stack_register: RegisterStorage,
    pub instruction_pointer: RegisterStorage,
    /// Register holding the code segment selector, for segmented architectures.
    pub code_segment: Option<RegisterStorage>,
    /// Width of a near pointer.
    pub pointer_bitness: Bitness,
    /// Width of a stack slot.
    pub word_bits: u16,
    pub endianness: Endianness,
    /// Bytes pushed by a call instruction.
    pub return_address_size: u8,
}

impl ArchitectureDescriptor {
    /// Returns true if addresses of this architecture are `selector:offset` pairs.
    pub fn is_segmented(&self) -> bool {
        self.code_segment.is_some()
    }
}
