//! Memory addresses, flat or segmented.
//!
//! Every address has a linear form. Equality, hashing and ordering are all
//! defined on that linear form, so a real-mode address `0000:1234` is the
//! same location as the flat address `1234`.

use crate::{Bitness, Error, Result};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Sub;
use std::str::FromStr;

/// A location in an address space.
#[derive(Debug, Clone, Copy)]
pub enum Address {
    /// Flat address of a given width.
    Linear { value: u64, bitness: Bitness },
    /// Real-mode `selector:offset` pair; linear form is `selector * 16 + offset`.
    Segmented { selector: u16, offset: u16 },
}

impl Address {
    /// Creates a flat address, failing if `value` does not fit in `bitness`.
    pub fn linear(value: u64, bitness: Bitness) -> Result<Self> {
        if value & !bitness.mask() != 0 {
            return Err(Error::AddressOutOfRange {
                value,
                bits: bitness.bits(),
            });
        }
        Ok(Self::Linear { value, bitness })
    }

    /// Creates a segmented address, failing if either part exceeds 16 bits.
    pub fn segmented(selector: u64, offset: u64) -> Result<Self> {
        match (u16::try_from(selector), u16::try_from(offset)) {
            (Ok(selector), Ok(offset)) => Ok(Self::Segmented { selector, offset }),
            _ => Err(Error::SegmentedAddressOutOfRange { selector, offset }),
        }
    }

    /// Creates a 16-bit flat address.
    pub fn ptr16(value: u16) -> Self {
        Self::Linear {
            value: value as u64,
            bitness: Bitness::Bits16,
        }
    }

    /// Creates a 32-bit flat address.
    pub fn ptr32(value: u32) -> Self {
        Self::Linear {
            value: value as u64,
            bitness: Bitness::Bits32,
        }
    }

    /// Creates a 64-bit flat address.
    pub fn ptr64(value: u64) -> Self {
        Self::Linear {
            value,
            bitness: Bitness::Bits64,
        }
    }

    /// Returns the linear (flat) form of this address.
    pub fn to_linear(&self) -> u64 {
        match *self {
            Self::Linear { value, .. } => value,
            Self::Segmented { selector, offset } => ((selector as u64) << 4) + offset as u64,
        }
    }

    /// Returns the selector of a segmented address.
    pub fn selector(&self) -> Option<u16> {
        match *self {
            Self::Segmented { selector, .. } => Some(selector),
            Self::Linear { .. } => None,
        }
    }

    /// Returns the offset part: the offset of a segmented address, or the
    /// whole value of a flat one.
    pub fn offset(&self) -> u64 {
        match *self {
            Self::Linear { value, .. } => value,
            Self::Segmented { offset, .. } => offset as u64,
        }
    }

    /// Returns the width of the offset part.
    pub fn bitness(&self) -> Bitness {
        match *self {
            Self::Linear { bitness, .. } => bitness,
            Self::Segmented { .. } => Bitness::Bits16,
        }
    }

    /// Returns true if this is a segmented address.
    pub fn is_segmented(&self) -> bool {
        matches!(self, Self::Segmented { .. })
    }

    /// Adds a signed displacement, returning `None` if the result leaves the
    /// address space (or the segment, for segmented addresses).
    pub fn checked_add(&self, delta: i64) -> Option<Self> {
        match *self {
            Self::Linear { value, bitness } => {
                let new = value.checked_add_signed(delta)?;
                (new & !bitness.mask() == 0).then_some(Self::Linear { value: new, bitness })
            }
            Self::Segmented { selector, offset } => {
                let new = (offset as i64).checked_add(delta)?;
                let offset = u16::try_from(new).ok()?;
                Some(Self::Segmented { selector, offset })
            }
        }
    }

    /// Adds an unsigned displacement, wrapping at the offset width.
    ///
    /// This is the only wrapping form of address arithmetic; it models the
    /// processor's own wrap-around of instruction and data pointers.
    pub fn wrapping_add(&self, delta: u64) -> Self {
        match *self {
            Self::Linear { value, bitness } => Self::Linear {
                value: value.wrapping_add(delta) & bitness.mask(),
                bitness,
            },
            Self::Segmented { selector, offset } => Self::Segmented {
                selector,
                offset: offset.wrapping_add(delta as u16),
            },
        }
    }

    /// Parses an address using an explicit offset width for flat addresses.
    pub fn parse_with(text: &str, bitness: Bitness) -> Result<Self> {
        let text = text.trim();
        if let Some((sel, off)) = text.split_once(':') {
            let selector = parse_hex(sel, text)?;
            let offset = parse_hex(off, text)?;
            return Self::segmented(selector, offset);
        }
        Self::linear(parse_hex(text, text)?, bitness)
    }
}

fn parse_hex(digits: &str, whole: &str) -> Result<u64> {
    let digits = digits.trim();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(digits);
    if digits.is_empty() {
        return Err(Error::InvalidAddress(whole.to_string()));
    }
    u64::from_str_radix(digits, 16).map_err(|_| Error::InvalidAddress(whole.to_string()))
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.to_linear() == other.to_linear()
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_linear().hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_linear().cmp(&other.to_linear())
    }
}

impl Sub<Address> for Address {
    type Output = i64;

    fn sub(self, rhs: Address) -> i64 {
        self.to_linear().wrapping_sub(rhs.to_linear()) as i64
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::Linear { value, bitness } => match bitness {
                Bitness::Bits16 => write!(f, "{:04X}", value),
                Bitness::Bits32 => write!(f, "{:08X}", value),
                Bitness::Bits64 => write!(f, "{:016X}", value),
            },
            Self::Segmented { selector, offset } => write!(f, "{:04X}:{:04X}", selector, offset),
        }
    }
}

/// Parses the hexadecimal text form produced by `Display`. The width of a
/// flat address is inferred from its digit count.
impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        let bitness = match digits.len() {
            0..=4 => Bitness::Bits16,
            5..=8 => Bitness::Bits32,
            _ => Bitness::Bits64,
        };
        Self::parse_with(trimmed, bitness)
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Address {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for Address {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
