//! CPU emulation for the 16-bit register machine.
//!
//! This module implements the complete machine:
//! - a stateless ALU with zero/negative/overflow flags
//! - five byte-addressable memory segments (general, program, I/O, display, stack)
//! - a register file of named 16-bit registers backed by its own segment
//! - a one-byte opcode set with register and 16-bit immediate operands

pub mod alu;
pub mod config;
pub mod memory;
pub mod registers;
pub mod decode;
pub mod execute;

pub use alu::{AluOp, AluError, Flags};
pub use config::{CpuConfig, ConfigError, load_config};
pub use memory::{Segment, MemoryError};
pub use registers::{Registers, RegisterError, RegIndex};
pub use decode::{Instruction, Opcode, Condition, DecodeError};
pub use execute::{Cpu, CpuError, CpuState, SegmentId};
