//! Machine configuration: segment sizes and the register list.

use serde::{Serialize, Deserialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

/// Total memory of the reference machine, in bytes.
pub const DEFAULT_MEMORY_SIZE: usize = 8192;

/// Registers every configuration must provide.
pub const REQUIRED_REGISTERS: [&str; 5] = ["ip", "lr", "ac", "sp", "fp"];

/// The reference register set.
pub const DEFAULT_REGISTERS: [&str; 13] = [
    "ip", "lr", "ac",
    "r1", "r2", "r3", "r4",
    "r5", "r6", "r7", "r8",
    "sp", "fp",
];

/// Register offsets are a single byte, so at most 128 two-byte registers fit.
const MAX_REGISTERS: usize = 128;

/// Largest segment a 16-bit address can cover.
pub const MAX_SEGMENT_SIZE: usize = 0x10000;

/// Segment sizes (in bytes) and register names for one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuConfig {
    pub general: usize,
    pub program: usize,
    pub io: usize,
    pub display: usize,
    pub stack: usize,
    pub registers: Vec<String>,
}

impl CpuConfig {
    /// Split `total` bytes the way the reference machine does:
    /// a quarter each for general and program memory, a sixteenth for I/O,
    /// a thirty-second for the display and the remaining 13/32 for the stack.
    pub fn with_memory_size(total: usize) -> Self {
        Self {
            general: total / 4,
            program: total / 4,
            io: total / 16,
            display: total / 32,
            stack: total * 13 / 32,
            registers: DEFAULT_REGISTERS.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Check that the configuration describes a runnable machine.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for name in &self.registers {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateRegister(name.clone()));
            }
        }
        for required in REQUIRED_REGISTERS {
            if !seen.contains(required) {
                return Err(ConfigError::MissingRegister(required.to_string()));
            }
        }
        if self.registers.len() > MAX_REGISTERS {
            return Err(ConfigError::TooManyRegisters(self.registers.len()));
        }
        for (segment, size) in self.segments() {
            if size > MAX_SEGMENT_SIZE {
                return Err(ConfigError::SegmentTooLarge { segment, size });
            }
        }
        if self.stack < 4 {
            return Err(ConfigError::StackTooSmall(self.stack));
        }
        // Stack slots are whole words
        if self.stack % 2 != 0 {
            return Err(ConfigError::OddStackSize(self.stack));
        }
        Ok(())
    }

    /// Segment names and sizes.
    pub fn segments(&self) -> [(&'static str, usize); 5] {
        [
            ("general", self.general),
            ("program", self.program),
            ("io", self.io),
            ("display", self.display),
            ("stack", self.stack),
        ]
    }

    /// Parse a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: CpuConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration as pretty-printed JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self::with_memory_size(DEFAULT_MEMORY_SIZE)
    }
}

/// Load and validate a JSON configuration file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CpuConfig, ConfigError> {
    let json = std::fs::read_to_string(path.as_ref())
        .map_err(|e| ConfigError::Io(e.to_string()))?;
    CpuConfig::from_json(&json)
}

/// Errors in a machine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("required register {0:?} is missing")]
    MissingRegister(String),

    #[error("register {0:?} is declared twice")]
    DuplicateRegister(String),

    #[error("{0} registers do not fit in byte-sized offsets")]
    TooManyRegisters(usize),

    #[error("stack segment of {0} bytes is too small")]
    StackTooSmall(usize),

    #[error("stack segment of {0} bytes does not hold a whole number of words")]
    OddStackSize(usize),

    #[error("{segment} segment of {size} bytes exceeds the 16-bit address range")]
    SegmentTooLarge { segment: &'static str, size: usize },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}
