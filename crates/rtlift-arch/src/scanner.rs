//! Scanning raw memory for references to known addresses.

use bitflags::bitflags;
use rtlift_core::{Address, ImageReader, SegmentMap};
use std::collections::HashSet;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Kinds of reference a pointer scanner looks for
    pub struct PointerScannerFlags : u8 {
        /// Pointer-sized words
        const POINTERS = 0x01;
        /// Relative calls
        const CALLS = 0x02;
        /// Relative jumps
        const JUMPS = 0x04;
        const ALL = Self::POINTERS.bits() | Self::CALLS.bits() | Self::JUMPS.bits();
    }
}

/// Recognizes the architecture-specific encodings of a reference.
///
/// Each method reads from a private copy of the reader positioned at the
/// candidate location and returns the referenced address on a match.
pub trait ReferenceMatcher {
    fn match_pointer(&self, rdr: &mut ImageReader<'_>) -> Option<Address>;

    fn match_call(&self, rdr: &mut ImageReader<'_>) -> Option<Address>;

    fn match_jump(&self, rdr: &mut ImageReader<'_>) -> Option<Address>;
}

/// Lazy scan over every byte position of a reader's range.
pub struct PointerScanner<'a, M> {
    matcher: M,
    segments: &'a SegmentMap,
    rdr: ImageReader<'a>,
    known: &'a HashSet<Address>,
    flags: PointerScannerFlags,
}

impl<'a, M: ReferenceMatcher> PointerScanner<'a, M> {
    pub fn new(
        matcher: M,
        segments: &'a SegmentMap,
        rdr: ImageReader<'a>,
        known: &'a HashSet<Address>,
        flags: PointerScannerFlags,
    ) -> Self {
        Self {
            matcher,
            segments,
            rdr,
            known,
            flags,
        }
    }

    /// Runs one matcher on a copy of the reader; code references must
    /// land in an executable segment when the map has any segments.
    fn probe<F>(&self, code: bool, matcher: F) -> bool
    where
        F: Fn(&M, &mut ImageReader<'a>) -> Option<Address>,
    {
        let mut rdr = self.rdr.clone();
        matcher(&self.matcher, &mut rdr).is_some_and(|target| {
            self.known.contains(&target)
                && (!code || self.segments.is_empty() || self.segments.is_executable_address(target))
        })
    }

    fn matches_here(&self) -> bool {
        (self.flags.contains(PointerScannerFlags::POINTERS)
            && self.probe(false, |m, r| m.match_pointer(r)))
            || (self.flags.contains(PointerScannerFlags::CALLS)
                && self.probe(true, |m, r| m.match_call(r)))
            || (self.flags.contains(PointerScannerFlags::JUMPS)
                && self.probe(true, |m, r| m.match_jump(r)))
    }
}

impl<'a, M: ReferenceMatcher> Iterator for PointerScanner<'a, M> {
    type Item = Address;

    fn next(&mut self) -> Option<Address> {
        while self.rdr.has_more() {
            let here = self.rdr.address();
            let hit = self.matches_here();
            self.rdr.skip(1).ok()?;
            if hit {
                log::trace!("reference at {}", here);
                return Some(here);
            }
        }
        None
    }
}
