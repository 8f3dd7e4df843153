//! Assembler and disassembler for register-machine programs.
//!
//! This module provides:
//! - A program builder that lays out functions and resolves labels
//! - A text assembler on top of the builder
//! - A disassembler (bytes → readable text)
//! - JSON program images

pub mod builder;
pub mod assembler;
pub mod disasm;
pub mod image;

pub use builder::{Program, ProgramBuilder, BuilderError};
pub use assembler::{assemble, assemble_with, AssemblerError};
pub use disasm::disassemble;
pub use image::{load_image, save_image, parse_image, ImageError};
