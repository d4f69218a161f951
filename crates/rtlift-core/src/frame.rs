//! Per-procedure allocation of symbolic storage.
//!
//! A [`Frame`] hands out one [`Identifier`] per distinct storage location
//! referenced while lifting a procedure. Asking twice for the same storage
//! returns the same identifier.

use crate::{FlagGroupStorage, RegisterStorage};
use std::fmt;

/// Where an identifier's value lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Storage {
    Register(RegisterStorage),
    FlagGroup(FlagGroupStorage),
    /// Below the frame base (negative offsets).
    StackLocal { offset: i32 },
    /// Above the return address (positive offsets).
    StackArgument { offset: i32 },
}

/// A named storage location of one procedure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier {
    pub name: String,
    /// Width in bits.
    pub bits: u16,
    pub storage: Storage,
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// The identifiers of one procedure.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Width of a stack slot and of the frame pointer.
    word_bits: u16,
    identifiers: Vec<Identifier>,
}

impl Frame {
    pub fn new(word_bits: u16) -> Self {
        Self {
            word_bits,
            identifiers: Vec::new(),
        }
    }

    pub fn word_bits(&self) -> u16 {
        self.word_bits
    }

    /// Returns every identifier in allocation order.
    pub fn identifiers(&self) -> &[Identifier] {
        &self.identifiers
    }

    fn find(&self, storage: &Storage, bits: u16) -> Option<&Identifier> {
        self.identifiers
            .iter()
            .find(|id| id.storage == *storage && id.bits == bits)
    }

    fn ensure(&mut self, storage: Storage, bits: u16, name: impl FnOnce() -> String) -> Identifier {
        if let Some(id) = self.find(&storage, bits) {
            return id.clone();
        }
        let id = Identifier {
            name: name(),
            bits,
            storage,
        };
        self.identifiers.push(id.clone());
        id
    }

    /// Returns the identifier for a register.
    pub fn ensure_register(&mut self, reg: RegisterStorage) -> Identifier {
        self.ensure(Storage::Register(reg), reg.bit_size, || reg.name.to_string())
    }

    /// Returns the identifier for a flag group.
    pub fn ensure_flag_group(&mut self, grf: &FlagGroupStorage) -> Identifier {
        self.ensure(Storage::FlagGroup(grf.clone()), 1, || grf.name.clone())
    }

    /// Returns the identifier for a local at negative `offset` from the frame base.
    pub fn ensure_stack_local(&mut self, offset: i32, bits: u16) -> Identifier {
        self.ensure(Storage::StackLocal { offset }, bits, || {
            format!("loc{:02X}", offset.unsigned_abs())
        })
    }

    /// Returns the identifier for an argument at positive `offset` from the frame base.
    pub fn ensure_stack_argument(&mut self, offset: i32, bits: u16) -> Identifier {
        self.ensure(Storage::StackArgument { offset }, bits, || {
            format!("arg{:02X}", offset)
        })
    }
}
