//! Map of named, access-controlled memory segments of a loaded image.

use crate::{Address, MemoryArea};
use bitflags::bitflags;
use std::collections::BTreeMap;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    /// Access rights of a segment
    pub struct SegmentAccess : u8 {
        /// Readable
        const READ = 0x01;
        /// Writable
        const WRITE = 0x02;
        /// Executable
        const EXECUTE = 0x04;
    }
}

/// A named memory area with access rights.
#[derive(Debug, Clone)]
pub struct ImageSegment {
    pub name: String,
    pub memory: MemoryArea,
    pub access: SegmentAccess,
}

impl ImageSegment {
    pub fn new(name: impl Into<String>, memory: MemoryArea, access: SegmentAccess) -> Self {
        Self {
            name: name.into(),
            memory,
            access,
        }
    }

    pub fn address(&self) -> Address {
        self.memory.base
    }

    pub fn end(&self) -> Address {
        self.memory.end()
    }

    pub fn contains(&self, addr: Address) -> bool {
        self.memory.contains(addr)
    }

    pub fn is_executable(&self) -> bool {
        self.access.contains(SegmentAccess::EXECUTE)
    }
}

/// Segments of an image, ordered by start address.
#[derive(Debug, Clone, Default)]
pub struct SegmentMap {
    segments: BTreeMap<Address, ImageSegment>,
}

impl SegmentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a segment, replacing any segment starting at the same address.
    pub fn add(&mut self, segment: ImageSegment) {
        self.segments.insert(segment.address(), segment);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Iterates over segments in address order.
    pub fn iter(&self) -> impl Iterator<Item = &ImageSegment> {
        self.segments.values()
    }

    /// Returns the segment containing `addr`.
    pub fn segment_at(&self, addr: Address) -> Option<&ImageSegment> {
        self.segments
            .range(..=addr)
            .next_back()
            .map(|(_, seg)| seg)
            .filter(|seg| seg.contains(addr))
    }

    /// Returns true if `addr` lies in any segment.
    pub fn is_valid_address(&self, addr: Address) -> bool {
        self.segment_at(addr).is_some()
    }

    /// Returns true if `addr` lies in an executable segment.
    pub fn is_executable_address(&self, addr: Address) -> bool {
        self.segment_at(addr).is_some_and(|s| s.is_executable())
    }
}
