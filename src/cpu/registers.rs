//! Register file.
//!
//! Registers are named 16-bit words backed by a dedicated [`Segment`]. Each
//! name maps to a fixed, even byte offset (`name_index * 2`); instructions
//! address registers by that offset.

use crate::cpu::memory::Segment;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// A register operand: the byte offset of a register in the file.
pub type RegIndex = u8;

/// The register file.
#[derive(Clone, Serialize, Deserialize)]
pub struct Registers {
    names: Vec<String>,
    file: Segment,
}

impl Registers {
    /// Create a zeroed register file with the given register names.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let file = Segment::new(names.len() * 2);
        Self { names, file }
    }

    /// Register names in offset order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Number of registers.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the file holds no registers.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Resolve a register name to its offset.
    pub fn index_of(&self, name: &str) -> Result<RegIndex, RegisterError> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|pos| RegIndex::try_from(pos * 2).ok())
            .ok_or_else(|| RegisterError::NotFound(name.to_string()))
    }

    /// The name of the register at `index`, if any.
    pub fn name_of(&self, index: RegIndex) -> Option<&str> {
        if index % 2 != 0 {
            return None;
        }
        self.names.get(index as usize / 2).map(String::as_str)
    }

    fn check(&self, index: RegIndex) -> Result<usize, RegisterError> {
        if index % 2 != 0 || index as usize / 2 >= self.names.len() {
            return Err(RegisterError::IndexNotFound(index));
        }
        Ok(index as usize)
    }

    /// Read the register at `index`.
    pub fn get(&self, index: RegIndex) -> Result<u16, RegisterError> {
        let offset = self.check(index)?;
        self.file
            .get_u16(offset)
            .map_err(|_| RegisterError::IndexNotFound(index))
    }

    /// Write the register at `index`.
    pub fn set(&mut self, index: RegIndex, value: u16) -> Result<(), RegisterError> {
        let offset = self.check(index)?;
        self.file
            .set_u16(offset, value)
            .map_err(|_| RegisterError::IndexNotFound(index))
    }

    /// Read a register by name.
    pub fn get_named(&self, name: &str) -> Result<u16, RegisterError> {
        self.get(self.index_of(name)?)
    }

    /// Write a register by name.
    pub fn set_named(&mut self, name: &str, value: u16) -> Result<(), RegisterError> {
        let index = self.index_of(name)?;
        self.set(index, value)
    }

    /// Zero every register.
    pub fn reset(&mut self) {
        self.file.clear();
    }

    /// Every register as `(name, value)`, in offset order.
    pub fn dump(&self) -> Vec<(&str, u16)> {
        self.names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = self.file.get_u16(i * 2).unwrap_or(0);
                (name.as_str(), value)
            })
            .collect()
    }
}

impl std::fmt::Display for Registers {
    /// One `name : 0000` line per register.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, value) in self.dump() {
            writeln!(f, "{} : {:04x}", name, value)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.dump()).finish()
    }
}

/// Errors raised by register resolution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("register name {0:?} not found")]
    NotFound(String),

    #[error("register index {0:#04x} not found")]
    IndexNotFound(RegIndex),
}
