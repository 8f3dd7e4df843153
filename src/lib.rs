//! # vm16
//!
//! A simulator for a small 16-bit register machine.
//!
//! The machine has a register file of named 16-bit registers, five
//! byte-addressable memory segments, a stack growing toward lower
//! addresses, condition flags set by an ALU and a one-byte opcode set.
//! Programs are built from named functions, either through
//! [`asm::ProgramBuilder`] or the text [`assemble`]r, and loaded into a
//! [`Cpu`] which runs them until `HLT`.

pub mod cpu;
pub mod asm;

#[cfg(feature = "tui")]
pub mod tui;

#[cfg(feature = "wasm")]
pub mod wasm;

// Re-export commonly used types
pub use cpu::{Cpu, CpuState, CpuError, CpuConfig, Segment, SegmentId, Registers, Instruction, Opcode, AluOp, Flags};
pub use asm::{assemble, disassemble, AssemblerError, Program, ProgramBuilder, load_image, save_image};

#[cfg(feature = "tui")]
pub use tui::run_debugger;
