//! Error types for rtlift-core.

use crate::Address;
use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Read or write past the end of a memory area.
    #[error("out of bounds at {address}: requested {requested} bytes, {available} available")]
    OutOfBounds {
        address: Address,
        requested: usize,
        available: usize,
    },

    /// Linear value does not fit in the address width.
    #[error("address {value:#x} does not fit in {bits} bits")]
    AddressOutOfRange { value: u64, bits: u16 },

    /// Selector or offset does not fit in 16 bits.
    #[error("segmented address {selector:#x}:{offset:#x} out of range")]
    SegmentedAddressOutOfRange { selector: u64, offset: u64 },

    /// Text could not be parsed as an address.
    #[error("invalid address: {0:?}")]
    InvalidAddress(String),

    /// Address lies outside the memory area it was resolved against.
    #[error("address {0} is not mapped")]
    AddressNotMapped(Address),

    /// A register table violates its layout invariants.
    #[error("invalid register table: {0}")]
    InvalidRegisterTable(String),
}

impl Error {
    /// Creates a new OutOfBounds error.
    pub fn out_of_bounds(address: Address, requested: usize, available: usize) -> Self {
        Self::OutOfBounds {
            address,
            requested,
            available,
        }
    }

    /// Creates a new InvalidRegisterTable error.
    pub fn invalid_register_table(reason: impl Into<String>) -> Self {
        Self::InvalidRegisterTable(reason.into())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
