//! Condition-code flag groups.
//!
//! A [`FlagTable`] lists an architecture's flag bits in a fixed canonical
//! order. Names are built by concatenating the letters of the bits set in a
//! mask, in table order; parsing accepts the letters in any order and case,
//! plus alias letters that resolve to an already-named bit.

use crate::RegisterStorage;
use std::fmt;

/// One condition-code bit and its letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlagBit {
    pub mask: u32,
    pub letter: char,
}

/// A set of flag bits of one flag register, treated as a unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FlagGroupStorage {
    /// Register holding the bits.
    pub flag_register: RegisterStorage,
    /// Non-zero mask of the bits in the group.
    pub mask: u32,
    /// Canonical name, e.g. `SZ`.
    pub name: String,
}

impl FlagGroupStorage {
    /// Returns true if the groups share a bit.
    pub fn overlaps_with(&self, other: &FlagGroupStorage) -> bool {
        self.flag_register.domain == other.flag_register.domain && self.mask & other.mask != 0
    }

    /// Returns true if every bit of `other` is in this group.
    pub fn covers(&self, other: &FlagGroupStorage) -> bool {
        self.flag_register.domain == other.flag_register.domain && other.mask & !self.mask == 0
    }
}

impl fmt::Display for FlagGroupStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The flag bits of one architecture.
#[derive(Debug, Clone)]
pub struct FlagTable {
    flag_register: RegisterStorage,
    bits: Vec<FlagBit>,
    aliases: Vec<FlagBit>,
}

impl FlagTable {
    /// Creates a table from `(mask, letter)` pairs in canonical order.
    pub fn new(flag_register: RegisterStorage, bits: &[(u32, char)]) -> Self {
        debug_assert!(bits.iter().all(|&(mask, _)| mask != 0));
        Self {
            flag_register,
            bits: bits
                .iter()
                .map(|&(mask, letter)| FlagBit {
                    mask,
                    letter: letter.to_ascii_uppercase(),
                })
                .collect(),
            aliases: Vec::new(),
        }
    }

    /// Adds a letter that parses to `mask` but is never produced by
    /// [`FlagTable::name_from_mask`].
    pub fn with_alias(mut self, letter: char, mask: u32) -> Self {
        self.aliases.push(FlagBit {
            mask,
            letter: letter.to_ascii_uppercase(),
        });
        self
    }

    /// Returns the register holding the flags.
    pub fn flag_register(&self) -> RegisterStorage {
        self.flag_register
    }

    /// Returns the bits in canonical order.
    pub fn bits(&self) -> &[FlagBit] {
        &self.bits
    }

    /// Returns the mask of every bit in the table.
    pub fn all_bits(&self) -> u32 {
        self.bits.iter().fold(0, |acc, b| acc | b.mask)
    }

    /// Builds the canonical name of `mask`; unknown bits are ignored.
    pub fn name_from_mask(&self, mask: u32) -> String {
        self.bits
            .iter()
            .filter(|b| mask & b.mask != 0)
            .map(|b| b.letter)
            .collect()
    }

    /// Parses a flag name case-insensitively; unknown letters contribute nothing.
    pub fn mask_from_name(&self, name: &str) -> u32 {
        name.chars()
            .map(|c| c.to_ascii_uppercase())
            .filter_map(|c| {
                self.bits
                    .iter()
                    .chain(self.aliases.iter())
                    .find(|b| b.letter == c)
                    .map(|b| b.mask)
            })
            .fold(0, |acc, m| acc | m)
    }

    /// Returns the flag group for `mask`, or `None` if it names no known bit.
    pub fn group_from_mask(&self, mask: u32) -> Option<FlagGroupStorage> {
        let known = mask & self.all_bits();
        if known == 0 {
            return None;
        }
        Some(FlagGroupStorage {
            flag_register: self.flag_register,
            mask: known,
            name: self.name_from_mask(known),
        })
    }

    /// Returns the flag group named by `name`, carrying its canonical name.
    pub fn group_from_name(&self, name: &str) -> Option<FlagGroupStorage> {
        self.group_from_mask(self.mask_from_name(name))
    }
}
