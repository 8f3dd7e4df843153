//! Byte-addressable memory segments.
//!
//! Every region of the machine (general data, program, I/O, display, stack
//! and the register file itself) is a [`Segment`]: a fixed-capacity byte
//! array with bounds-checked 8-bit and big-endian 16-bit access.

use serde::{Serialize, Deserialize};

/// Capacity used when a segment is requested with a size of zero.
pub const FALLBACK_CAPACITY: usize = 256;

/// A fixed-capacity memory segment.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    bytes: Vec<u8>,
}

impl Segment {
    /// Create a zeroed segment. A zero capacity falls back to
    /// [`FALLBACK_CAPACITY`].
    pub fn new(capacity: usize) -> Self {
        let capacity = if capacity == 0 { FALLBACK_CAPACITY } else { capacity };
        Self {
            bytes: vec![0; capacity],
        }
    }

    /// Number of addressable bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Whether `addr` names a byte inside the segment.
    #[inline]
    pub fn address_exists(&self, addr: usize) -> bool {
        addr < self.bytes.len()
    }

    fn check(&self, addr: usize) -> Result<(), MemoryError> {
        if !self.address_exists(addr) {
            return Err(MemoryError::AddressOutOfBounds {
                addr,
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Read one byte.
    pub fn get_u8(&self, addr: usize) -> Result<u8, MemoryError> {
        self.check(addr)?;
        Ok(self.bytes[addr])
    }

    /// Write one byte. Wider values are masked to their low 8 bits.
    pub fn set_u8(&mut self, addr: usize, value: u16) -> Result<(), MemoryError> {
        self.check(addr)?;
        self.bytes[addr] = (value & 0xFF) as u8;
        Ok(())
    }

    /// Read a big-endian word spanning `addr` and `addr + 1`.
    pub fn get_u16(&self, addr: usize) -> Result<u16, MemoryError> {
        self.check(addr)?;
        self.check(addr + 1)?;
        Ok(u16::from_be_bytes([self.bytes[addr], self.bytes[addr + 1]]))
    }

    /// Write a big-endian word spanning `addr` and `addr + 1`.
    pub fn set_u16(&mut self, addr: usize, value: u16) -> Result<(), MemoryError> {
        self.check(addr)?;
        self.check(addr + 1)?;
        let [hi, lo] = value.to_be_bytes();
        self.bytes[addr] = hi;
        self.bytes[addr + 1] = lo;
        Ok(())
    }

    /// Check that `addr..addr + len` lies inside the segment. An empty range
    /// may start one past the last byte.
    fn check_range(&self, addr: usize, len: usize) -> Result<usize, MemoryError> {
        if len == 0 {
            if addr > self.capacity() {
                return Err(MemoryError::AddressOutOfBounds {
                    addr,
                    capacity: self.capacity(),
                });
            }
            return Ok(addr);
        }
        let last = addr.checked_add(len - 1).ok_or(MemoryError::AddressOutOfBounds {
            addr: usize::MAX,
            capacity: self.capacity(),
        })?;
        self.check(addr)?;
        self.check(last)?;
        Ok(last + 1)
    }

    /// Borrow `len` bytes starting at `addr`.
    pub fn slice(&self, addr: usize, len: usize) -> Result<&[u8], MemoryError> {
        let end = self.check_range(addr, len)?;
        Ok(&self.bytes[addr..end])
    }

    /// Copy `data` into the segment starting at `addr`.
    pub fn write_bytes(&mut self, addr: usize, data: &[u8]) -> Result<(), MemoryError> {
        let end = self.check_range(addr, data.len())?;
        self.bytes[addr..end].copy_from_slice(data);
        Ok(())
    }

    /// Zero every byte.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    /// Render `len` bytes from `addr` as hex, two bytes per group
    /// (`"0112 3400"`). The range is clipped to the segment.
    pub fn format_chunk(&self, addr: usize, len: usize) -> String {
        let end = addr.saturating_add(len).min(self.capacity());
        let start = addr.min(end);
        let mut out = String::with_capacity(len * 3);
        for (i, byte) in self.bytes[start..end].iter().enumerate() {
            if i > 0 && i % 2 == 0 {
                out.push(' ');
            }
            out.push_str(&format!("{:02x}", byte));
        }
        out
    }
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.bytes.iter().filter(|b| **b != 0).count();

        f.debug_struct("Segment")
            .field("capacity", &self.capacity())
            .field("non_zero_bytes", &non_zero)
            .finish()
    }
}

/// Errors that can occur during memory operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// Address is outside the segment.
    AddressOutOfBounds { addr: usize, capacity: usize },
}

impl std::fmt::Display for MemoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryError::AddressOutOfBounds { addr, capacity } => {
                write!(f, "address {:#06x} out of bounds (capacity {})", addr, capacity)
            }
        }
    }
}

impl std::error::Error for MemoryError {}
