//! x86 legacy prefix parsing.

use super::registers;
use rtlift_core::RegisterStorage;

/// Legacy prefixes that can appear before an instruction.
#[derive(Debug, Clone, Default)]
pub struct Prefixes {
    /// LOCK prefix (0xF0)
    pub lock: bool,
    /// REPNE/REPNZ prefix (0xF2)
    pub repne: bool,
    /// REP/REPE/REPZ prefix (0xF3)
    pub rep: bool,
    /// Segment override
    pub segment: Option<RegisterStorage>,
    /// Operand size override (0x66)
    pub operand_size: bool,
    /// Address size override (0x67)
    pub address_size: bool,
}

impl Prefixes {
    /// Parses prefixes from the start of `bytes`.
    /// Returns the prefixes and the number of bytes they occupy.
    pub fn parse(bytes: &[u8]) -> (Self, usize) {
        let mut prefixes = Self::default();
        let mut offset = 0;

        while offset < bytes.len() {
            match bytes[offset] {
                // Group 1: LOCK and repeat
                0xF0 => prefixes.lock = true,
                0xF2 => prefixes.repne = true,
                0xF3 => prefixes.rep = true,

                // Group 2: Segment overrides
                0x26 => prefixes.segment = Some(registers::ES),
                0x2E => prefixes.segment = Some(registers::CS),
                0x36 => prefixes.segment = Some(registers::SS),
                0x3E => prefixes.segment = Some(registers::DS),
                0x64 => prefixes.segment = Some(registers::FS),
                0x65 => prefixes.segment = Some(registers::GS),

                // Group 3: Operand size override
                0x66 => prefixes.operand_size = true,

                // Group 4: Address size override
                0x67 => prefixes.address_size = true,

                _ => break,
            }
            offset += 1;
        }

        (prefixes, offset)
    }

    /// Returns the operand size given the mode's default.
    pub fn operand_bits(&self, default_bits: u16) -> u16 {
        match (default_bits, self.operand_size) {
            (16, true) => 32,
            (_, true) => 16,
            (bits, false) => bits,
        }
    }

    /// Returns the address size given the mode's default.
    pub fn address_bits(&self, default_bits: u16) -> u16 {
        match (default_bits, self.address_size) {
            (16, true) => 32,
            (_, true) => 16,
            (bits, false) => bits,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefixes() {
        let (p, n) = Prefixes::parse(&[0x66, 0x26, 0x89, 0x07]);
        assert_eq!(n, 2);
        assert!(p.operand_size);
        assert_eq!(p.segment, Some(registers::ES));
        assert_eq!(p.operand_bits(32), 16);
        assert_eq!(p.operand_bits(16), 32);
        assert_eq!(p.address_bits(16), 16);
    }
}
