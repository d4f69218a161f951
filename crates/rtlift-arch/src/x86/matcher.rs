//! x86 encodings of references, for the pointer scanner.

use super::ProcessorMode;
use crate::scanner::ReferenceMatcher;
use rtlift_core::{Address, ImageReader};

/// Matches pointer-sized words, `call rel` and `jmp rel`.
#[derive(Debug, Clone, Copy)]
pub struct X86ReferenceMatcher {
    mode: ProcessorMode,
}

impl X86ReferenceMatcher {
    pub fn new(mode: ProcessorMode) -> Self {
        Self { mode }
    }

    /// Reads a word of the mode's width as a near pointer relative to `at`.
    fn read_near(&self, rdr: &mut ImageReader<'_>, at: Address) -> Option<Address> {
        match self.mode {
            ProcessorMode::Real16 => {
                let offset = rdr.read_u16().ok()?;
                match at.selector() {
                    Some(selector) => Address::segmented(selector as u64, offset as u64).ok(),
                    None => Some(Address::ptr16(offset)),
                }
            }
            ProcessorMode::Protected32 => rdr.read_u32().ok().map(Address::ptr32),
        }
    }

    /// Reads a relative displacement and resolves it against the end of
    /// the instruction.
    fn read_relative(&self, rdr: &mut ImageReader<'_>, short: bool) -> Option<Address> {
        let rel = match (short, self.mode) {
            (true, _) => rdr.read_i8().ok()? as i64,
            (false, ProcessorMode::Real16) => rdr.read_i16().ok()? as i64,
            (false, ProcessorMode::Protected32) => rdr.read_i32().ok()? as i64,
        };
        Some(rdr.address().wrapping_add(rel as u64))
    }
}

impl ReferenceMatcher for X86ReferenceMatcher {
    fn match_pointer(&self, rdr: &mut ImageReader<'_>) -> Option<Address> {
        let at = rdr.address();
        self.read_near(rdr, at)
    }

    fn match_call(&self, rdr: &mut ImageReader<'_>) -> Option<Address> {
        match rdr.read_u8().ok()? {
            0xE8 => self.read_relative(rdr, false),
            _ => None,
        }
    }

    fn match_jump(&self, rdr: &mut ImageReader<'_>) -> Option<Address> {
        match rdr.read_u8().ok()? {
            0xE9 => self.read_relative(rdr, false),
            0xEB => self.read_relative(rdr, true),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{PointerScanner, PointerScannerFlags};
    use rtlift_core::{Endianness, ImageSegment, MemoryArea, SegmentAccess, SegmentMap};
    use std::collections::HashSet;

    #[test]
    fn test_call_and_jump() {
        let m = X86ReferenceMatcher::new(ProcessorMode::Protected32);
        let bytes = [0xE8, 0x10, 0x00, 0x00, 0x00];
        let mut rdr = ImageReader::from_bytes(&bytes, Address::ptr32(0x1000), Endianness::Little);
        assert_eq!(m.match_call(&mut rdr), Some(Address::ptr32(0x1015)));

        let bytes = [0xEB, 0xFE];
        let mut rdr = ImageReader::from_bytes(&bytes, Address::ptr32(0x1000), Endianness::Little);
        assert_eq!(m.match_jump(&mut rdr), Some(Address::ptr32(0x1000)));
    }

    #[test]
    fn test_real_mode_pointer_keeps_segment() {
        let m = X86ReferenceMatcher::new(ProcessorMode::Real16);
        let bytes = [0x34, 0x12];
        let base = Address::segmented(0x0800, 0).unwrap();
        let mut rdr = ImageReader::from_bytes(&bytes, base, Endianness::Little);
        assert_eq!(
            m.match_pointer(&mut rdr),
            Some(Address::segmented(0x0800, 0x1234).unwrap())
        );
    }

    #[test]
    fn test_scanner_finds_known_references() {
        // dd 0x1010; call 0x1010; jmp 0x2000 (unknown); nop x4
        let bytes = vec![
            0x10, 0x10, 0x00, 0x00, 0xE8, 0x07, 0x00, 0x00, 0x00, 0xE9, 0xF2, 0x0F, 0x00, 0x00,
            0x90, 0x90, 0x90, 0x90,
        ];
        let mem = MemoryArea::new(Address::ptr32(0x1000), bytes);
        let mut segments = SegmentMap::new();
        segments.add(ImageSegment::new(
            ".text",
            mem.clone(),
            SegmentAccess::READ | SegmentAccess::EXECUTE,
        ));
        let known: HashSet<Address> = [Address::ptr32(0x1010)].into_iter().collect();
        let rdr = mem.reader_le(mem.base).unwrap();
        let hits: Vec<Address> = PointerScanner::new(
            X86ReferenceMatcher::new(ProcessorMode::Protected32),
            &segments,
            rdr,
            &known,
            PointerScannerFlags::ALL,
        )
        .collect();
        assert_eq!(hits, vec![Address::ptr32(0x1000), Address::ptr32(0x1004)]);

        let rdr = mem.reader_le(mem.base).unwrap();
        let calls: Vec<Address> = PointerScanner::new(
            X86ReferenceMatcher::new(ProcessorMode::Protected32),
            &segments,
            rdr,
            &known,
            PointerScannerFlags::CALLS,
        )
        .collect();
        assert_eq!(calls, vec![Address::ptr32(0x1004)]);
    }
}
