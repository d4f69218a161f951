//! Word-size and byte-order properties shared by every architecture.

/// Width of an address or machine word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bitness {
    Bits16,
    Bits32,
    Bits64,
}

impl Bitness {
    /// Returns the width in bits.
    pub fn bits(&self) -> u16 {
        match self {
            Self::Bits16 => 16,
            Self::Bits32 => 32,
            Self::Bits64 => 64,
        }
    }

    /// Returns the width in bytes.
    pub fn bytes(&self) -> usize {
        self.bits() as usize / 8
    }

    /// Returns a mask covering every bit of this width.
    pub fn mask(&self) -> u64 {
        match self {
            Self::Bits64 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }

    /// Returns the bitness for a width in bits, if it is one we model.
    pub fn from_bits(bits: u16) -> Option<Self> {
        match bits {
            16 => Some(Self::Bits16),
            32 => Some(Self::Bits32),
            64 => Some(Self::Bits64),
            _ => None,
        }
    }
}

/// Byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endianness {
    Little,
    Big,
}

impl Endianness {
    /// Assembles an unsigned integer from `bytes` in this byte order.
    pub fn assemble(&self, bytes: &[u8]) -> u64 {
        match self {
            Self::Little => bytes
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64),
            Self::Big => bytes.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64),
        }
    }

    /// Splits the low `size` bytes of `value` in this byte order.
    pub fn disassemble(&self, value: u64, size: usize) -> Vec<u8> {
        let mut out: Vec<u8> = (0..size).map(|i| (value >> (i * 8)) as u8).collect();
        if *self == Self::Big {
            out.reverse();
        }
        out
    }
}
