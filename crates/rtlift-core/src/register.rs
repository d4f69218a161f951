//! Architecture-neutral register representation.
//!
//! A register is a bit range inside a storage *domain*. The widest register
//! of a domain owns it (its number is the domain id) and every subregister
//! carved from it shares the domain, so overlap is a mask test within one
//! domain.

use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Register class (general purpose, segment, flags, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RegisterClass {
    /// General purpose register (eax, ax, al, ...)
    General,
    /// Vector/SIMD register (xmm0, ...)
    Vector,
    /// Segment register (cs, ds, ...)
    Segment,
    /// Stack pointer (esp, sp)
    StackPointer,
    /// Instruction pointer (eip, ip)
    ProgramCounter,
    /// Flags / status register (eflags)
    Flags,
    /// Other special registers
    Other,
}

/// A machine register, or a named bit range of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterStorage {
    /// Canonical name.
    pub name: &'static str,
    /// Index, unique within the architecture.
    pub number: u16,
    /// Aliasing group: the number of the widest register this one is carved from.
    pub domain: u16,
    /// First bit within the domain.
    pub bit_offset: u16,
    /// Width in bits.
    pub bit_size: u16,
    /// The class of register.
    pub class: RegisterClass,
}

impl RegisterStorage {
    /// Creates a register that owns its own domain.
    pub const fn new(name: &'static str, number: u16, class: RegisterClass, bit_size: u16) -> Self {
        Self {
            name,
            number,
            domain: number,
            bit_offset: 0,
            bit_size,
            class,
        }
    }

    /// Creates a subregister occupying `bit_size` bits at `bit_offset` of `parent`'s domain.
    pub const fn carve(
        name: &'static str,
        number: u16,
        parent: &RegisterStorage,
        bit_offset: u16,
        bit_size: u16,
    ) -> Self {
        Self {
            name,
            number,
            domain: parent.domain,
            bit_offset: parent.bit_offset + bit_offset,
            bit_size,
            class: parent.class,
        }
    }

    /// Returns the bits this register occupies within its domain.
    pub fn bit_mask(&self) -> u128 {
        let width = if self.bit_size >= 128 {
            u128::MAX
        } else {
            (1u128 << self.bit_size) - 1
        };
        width.checked_shl(self.bit_offset as u32).unwrap_or(0)
    }

    /// Returns true if the two registers share at least one bit.
    pub fn overlaps_with(&self, other: &RegisterStorage) -> bool {
        self.domain == other.domain && self.bit_mask() & other.bit_mask() != 0
    }

    /// Returns true if every bit of `other` is also a bit of `self`.
    pub fn covers(&self, other: &RegisterStorage) -> bool {
        self.domain == other.domain && other.bit_mask() & !self.bit_mask() == 0
    }

    /// Returns true if this register is carved out of a wider one.
    pub fn is_subregister(&self) -> bool {
        self.domain != self.number
    }
}

impl fmt::Display for RegisterStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// The immutable register table of one architecture.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    max_bits: u16,
    registers: Vec<RegisterStorage>,
    by_number: HashMap<u16, usize>,
    by_name: HashMap<&'static str, usize>,
}

impl RegisterFile {
    /// Builds a register table. `max_bits` is the widest register the
    /// architecture has; a table that breaks the layout invariants is a
    /// bug in the architecture definition.
    pub fn new(max_bits: u16, registers: Vec<RegisterStorage>) -> Self {
        debug_assert!(
            Self::validate(max_bits, &registers).is_ok(),
            "{:?}",
            Self::validate(max_bits, &registers)
        );
        let by_number = registers
            .iter()
            .enumerate()
            .map(|(i, r)| (r.number, i))
            .collect();
        let by_name = registers
            .iter()
            .enumerate()
            .map(|(i, r)| (r.name, i))
            .collect();
        Self {
            max_bits,
            registers,
            by_number,
            by_name,
        }
    }

    /// Checks the layout invariants of a register table.
    pub fn validate(max_bits: u16, registers: &[RegisterStorage]) -> Result<()> {
        let mut numbers = HashSet::new();
        let mut names = HashSet::new();
        for reg in registers {
            if !numbers.insert(reg.number) {
                return Err(Error::invalid_register_table(format!(
                    "duplicate register number {}",
                    reg.number
                )));
            }
            if !names.insert(reg.name) {
                return Err(Error::invalid_register_table(format!(
                    "duplicate register name {}",
                    reg.name
                )));
            }
            if reg.bit_size == 0 || reg.bit_offset + reg.bit_size > max_bits {
                return Err(Error::invalid_register_table(format!(
                    "{} spans bits {}..{}, wider than {} bits",
                    reg.name,
                    reg.bit_offset,
                    reg.bit_offset + reg.bit_size,
                    max_bits
                )));
            }
        }
        for reg in registers.iter().filter(|r| r.is_subregister()) {
            let parent = registers
                .iter()
                .find(|p| p.number == reg.domain)
                .ok_or_else(|| {
                    Error::invalid_register_table(format!("{} has no domain register", reg.name))
                })?;
            if parent.is_subregister() || !parent.covers(reg) {
                return Err(Error::invalid_register_table(format!(
                    "{} is not contained in {}",
                    reg.name, parent.name
                )));
            }
        }
        Ok(())
    }

    /// Returns the widest register width of the architecture.
    pub fn max_bits(&self) -> u16 {
        self.max_bits
    }

    /// Returns the number of registers.
    pub fn len(&self) -> usize {
        self.registers.len()
    }

    /// Returns true if the table has no registers.
    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }

    /// Iterates over every register in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &RegisterStorage> {
        self.registers.iter()
    }

    /// Looks up a register by index.
    pub fn by_index(&self, number: u16) -> Option<RegisterStorage> {
        self.by_number.get(&number).map(|&i| self.registers[i])
    }

    /// Looks up a register by name.
    pub fn by_name(&self, name: &str) -> Option<RegisterStorage> {
        self.by_name.get(name).map(|&i| self.registers[i])
    }

    /// Returns the widest register of `reg`'s domain.
    pub fn domain_root(&self, reg: &RegisterStorage) -> Option<RegisterStorage> {
        self.by_index(reg.domain)
    }

    /// Returns the modeled register occupying `width` bits at `bit_offset`
    /// (relative to `parent`). Returns `parent` itself for its full range;
    /// arbitrary ranges are never synthesized.
    pub fn subregister(
        &self,
        parent: &RegisterStorage,
        bit_offset: u16,
        width: u16,
    ) -> Option<RegisterStorage> {
        if bit_offset == 0 && width == parent.bit_size {
            return Some(*parent);
        }
        let absolute = parent.bit_offset.checked_add(bit_offset)?;
        self.registers
            .iter()
            .find(|r| r.domain == parent.domain && r.bit_offset == absolute && r.bit_size == width)
            .filter(|r| parent.covers(r))
            .copied()
    }

    /// Returns `reg` if any member of `in_use` overlaps it, else `None`.
    pub fn widest_subregister(
        &self,
        reg: &RegisterStorage,
        in_use: &HashSet<RegisterStorage>,
    ) -> Option<RegisterStorage> {
        let mask = in_use
            .iter()
            .filter(|r| r.overlaps_with(reg))
            .fold(0u128, |acc, r| acc | r.bit_mask());
        (mask != 0).then_some(*reg)
    }

    /// Returns every modeled register overlapping `reg`, including `reg`.
    pub fn aliases(&self, reg: &RegisterStorage) -> Vec<RegisterStorage> {
        self.registers
            .iter()
            .filter(|r| r.overlaps_with(reg))
            .copied()
            .collect()
    }

    /// Removes `reg` and everything it overlaps from `set`.
    pub fn remove_aliases(&self, set: &mut HashSet<RegisterStorage>, reg: &RegisterStorage) {
        set.retain(|r| !r.overlaps_with(reg));
    }
}
