//! Memory images and endian-aware sequential accessors.

use crate::{Address, Endianness, Error, Result};

/// A contiguous block of loaded bytes starting at `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryArea {
    pub base: Address,
    pub bytes: Vec<u8>,
}

impl MemoryArea {
    pub fn new(base: Address, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }

    /// Returns the size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns the address one past the last byte.
    pub fn end(&self) -> Address {
        self.base.wrapping_add(self.bytes.len() as u64)
    }

    /// Returns true if `addr` is one of this area's bytes.
    pub fn contains(&self, addr: Address) -> bool {
        matches!(self.offset_of(addr), Some(off) if off < self.bytes.len())
    }

    /// Returns the byte offset of `addr`; the end address is a valid position.
    pub fn offset_of(&self, addr: Address) -> Option<usize> {
        let delta = addr.to_linear().checked_sub(self.base.to_linear())?;
        let delta = usize::try_from(delta).ok()?;
        (delta <= self.bytes.len()).then_some(delta)
    }

    /// Creates a little-endian reader positioned at `addr`.
    pub fn reader_le(&self, addr: Address) -> Result<ImageReader<'_>> {
        ImageReader::new(self, addr, Endianness::Little)
    }

    /// Creates a big-endian reader positioned at `addr`.
    pub fn reader_be(&self, addr: Address) -> Result<ImageReader<'_>> {
        ImageReader::new(self, addr, Endianness::Big)
    }
}

/// Sequential reader over a memory area.
#[derive(Debug, Clone)]
pub struct ImageReader<'a> {
    bytes: &'a [u8],
    base: Address,
    begin: usize,
    offset: usize,
    end: usize,
    endianness: Endianness,
}

impl<'a> ImageReader<'a> {
    /// Creates a reader over the whole of `mem`, positioned at `addr`.
    pub fn new(mem: &'a MemoryArea, addr: Address, endianness: Endianness) -> Result<Self> {
        let offset = mem.offset_of(addr).ok_or(Error::AddressNotMapped(addr))?;
        Ok(Self {
            bytes: &mem.bytes,
            base: mem.base,
            begin: 0,
            offset,
            end: mem.bytes.len(),
            endianness,
        })
    }

    /// Creates a reader limited to `[begin, end)` of `mem`.
    pub fn with_range(
        mem: &'a MemoryArea,
        begin: Address,
        end: Address,
        endianness: Endianness,
    ) -> Result<Self> {
        let offset = mem.offset_of(begin).ok_or(Error::AddressNotMapped(begin))?;
        let end = mem.offset_of(end).ok_or(Error::AddressNotMapped(end))?;
        Ok(Self {
            bytes: &mem.bytes,
            base: mem.base,
            begin: offset,
            offset,
            end: end.max(offset),
            endianness,
        })
    }

    /// Creates a reader directly over a byte slice loaded at `base`.
    pub fn from_bytes(bytes: &'a [u8], base: Address, endianness: Endianness) -> Self {
        Self {
            bytes,
            base,
            begin: 0,
            offset: 0,
            end: bytes.len(),
            endianness,
        }
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Returns the address of the next byte to be read.
    pub fn address(&self) -> Address {
        self.base.wrapping_add(self.offset as u64)
    }

    /// Returns the byte offset of the next byte within the area.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Returns the number of bytes left before the end of the range.
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.offset)
    }

    /// Returns true if at least one more byte can be read.
    pub fn has_more(&self) -> bool {
        self.offset < self.end
    }

    /// Moves to `addr`, which must lie within the range or at its end.
    pub fn seek(&mut self, addr: Address) -> Result<()> {
        let delta = addr
            .to_linear()
            .checked_sub(self.base.to_linear())
            .and_then(|d| usize::try_from(d).ok())
            .filter(|&d| d >= self.begin && d <= self.end)
            .ok_or(Error::AddressNotMapped(addr))?;
        self.offset = delta;
        Ok(())
    }

    /// Skips `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(Error::out_of_bounds(self.address(), count, self.remaining()));
        }
        let bytes = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(bytes)
    }

    /// Returns the next byte without consuming it.
    pub fn peek_u8(&self) -> Result<u8> {
        if self.has_more() {
            Ok(self.bytes[self.offset])
        } else {
            Err(Error::out_of_bounds(self.address(), 1, 0))
        }
    }

    /// Returns up to `max` upcoming bytes without consuming them.
    pub fn peek_bytes(&self, max: usize) -> &'a [u8] {
        let end = self.end.min(self.offset.saturating_add(max));
        &self.bytes[self.offset.min(end)..end]
    }

    /// Reads `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    /// Reads an unsigned integer of `size` bytes (at most 8).
    pub fn read_uint(&mut self, size: usize) -> Result<u64> {
        debug_assert!(size <= 8);
        let endianness = self.endianness;
        self.take(size).map(|b| endianness.assemble(b))
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_uint(1).map(|v| v as u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.read_uint(2).map(|v| v as u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.read_uint(4).map(|v| v as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_uint(8)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        self.read_u8().map(|v| v as i8)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.read_u16().map(|v| v as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.read_u32().map(|v| v as i32)
    }
}

/// Sequential writer over a memory area.
#[derive(Debug)]
pub struct ImageWriter<'a> {
    mem: &'a mut MemoryArea,
    offset: usize,
    endianness: Endianness,
}

impl<'a> ImageWriter<'a> {
    /// Creates a writer positioned at `addr`.
    pub fn new(mem: &'a mut MemoryArea, addr: Address, endianness: Endianness) -> Result<Self> {
        let offset = mem.offset_of(addr).ok_or(Error::AddressNotMapped(addr))?;
        Ok(Self {
            mem,
            offset,
            endianness,
        })
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Returns the address of the next byte to be written.
    pub fn address(&self) -> Address {
        self.mem.base.wrapping_add(self.offset as u64)
    }

    /// Moves to `addr` within the area.
    pub fn seek(&mut self, addr: Address) -> Result<()> {
        self.offset = self
            .mem
            .offset_of(addr)
            .ok_or(Error::AddressNotMapped(addr))?;
        Ok(())
    }

    /// Writes raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let available = self.mem.bytes.len() - self.offset;
        if data.len() > available {
            return Err(Error::out_of_bounds(self.address(), data.len(), available));
        }
        self.mem.bytes[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();
        Ok(())
    }

    /// Writes the low `size` bytes of `value`.
    pub fn write_uint(&mut self, value: u64, size: usize) -> Result<()> {
        let bytes = self.endianness.disassemble(value, size);
        self.write_bytes(&bytes)
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.write_bytes(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.write_uint(value as u64, 2)
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.write_uint(value as u64, 4)
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.write_uint(value, 8)
    }
}
