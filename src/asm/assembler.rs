//! Simple assembler for register-machine programs.
//!
//! Syntax:
//! ```text
//! ; Comment
//! helper:             ; Start (or switch to) the function "helper"
//!     MOV r1, 0x0004  ; Load an immediate
//!     RET
//!
//! main:
//!     JALI helper     ; Address operands may name a declared function
//!     ADD r1, r2      ; Result goes to ac
//!     HLT
//! ```
//!
//! Lines before the first function header belong to `main`. A function can
//! only be referenced after its header has appeared.

use crate::asm::builder::{BuilderError, Program, ProgramBuilder, DEFAULT_FUNCTION};
use crate::cpu::config::DEFAULT_REGISTERS;
use crate::cpu::decode::{Opcode, Operands};
use crate::cpu::registers::{RegIndex, Registers};
use thiserror::Error;

/// Assemble source code using the reference register set.
pub fn assemble(source: &str) -> Result<Program, AssemblerError> {
    assemble_with(source, &DEFAULT_REGISTERS)
}

/// Assemble source code, resolving register names against `registers`.
pub fn assemble_with<S: AsRef<str>>(source: &str, registers: &[S]) -> Result<Program, AssemblerError> {
    let mut asm = Assembler::new(Registers::new(registers));
    asm.assemble(source)
}

/// The assembler state.
struct Assembler {
    /// Register names -> offsets.
    registers: Registers,
    /// Function currently receiving instructions.
    current: String,
    builder: ProgramBuilder,
}

/// An address operand: either a literal or a function name.
enum Address<'a> {
    Literal(u16),
    Label(&'a str),
}

impl Assembler {
    fn new(registers: Registers) -> Self {
        Self {
            registers,
            current: DEFAULT_FUNCTION.to_string(),
            builder: ProgramBuilder::new(),
        }
    }

    fn assemble(&mut self, source: &str) -> Result<Program, AssemblerError> {
        for (line_num, line) in source.lines().enumerate() {
            self.process_line(line, line_num + 1)?;
        }

        let builder = std::mem::take(&mut self.builder);
        builder
            .build()
            .map_err(|source| AssemblerError::Builder { line: 0, source })
    }

    fn process_line(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        // Remove comments
        let line = match line.find(';') {
            Some(idx) => &line[..idx],
            None => line,
        };
        let line = line.trim();

        if line.is_empty() {
            return Ok(());
        }

        // Function header
        if let Some(colon_idx) = line.find(':') {
            let name = line[..colon_idx].trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(AssemblerError::SyntaxError {
                    line: line_num,
                    message: format!("invalid function name {:?}", name),
                });
            }
            self.builder.declare(name);
            self.current = name.to_string();

            let rest = line[colon_idx + 1..].trim();
            if !rest.is_empty() {
                return self.process_instruction(rest, line_num);
            }
            return Ok(());
        }

        self.process_instruction(line, line_num)
    }

    fn process_instruction(&mut self, line: &str, line_num: usize) -> Result<(), AssemblerError> {
        let (mnemonic, rest) = match line.split_once(char::is_whitespace) {
            Some((m, r)) => (m, r),
            None => (line, ""),
        };
        let operands: Vec<&str> = rest
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| AssemblerError::UnknownMnemonic {
            line: line_num,
            mnemonic: mnemonic.to_string(),
        })?;

        let expected = match opcode.layout() {
            Operands::None => 0,
            Operands::Reg | Operands::Imm16 => 1,
            Operands::RegReg | Operands::RegImm16 => 2,
        };
        if operands.len() != expected {
            return Err(AssemblerError::SyntaxError {
                line: line_num,
                message: format!("{} expects {} operand(s), found {}", opcode, expected, operands.len()),
            });
        }

        let function = self.current.clone();
        let result = match opcode.layout() {
            Operands::None => self.builder.instruction(&function, opcode, &[]),
            Operands::Reg => {
                let r = self.register(operands[0], line_num)?;
                self.builder.instruction(&function, opcode, &[r])
            }
            Operands::RegReg => {
                let r1 = self.register(operands[0], line_num)?;
                let r2 = self.register(operands[1], line_num)?;
                self.builder.instruction(&function, opcode, &[r1, r2])
            }
            Operands::Imm16 => match self.address(operands[0], line_num)? {
                Address::Literal(value) => {
                    let [hi, lo] = value.to_be_bytes();
                    self.builder.instruction(&function, opcode, &[hi, lo])
                }
                Address::Label(label) => {
                    self.builder.instruction_to_label(&function, opcode, &[], label)
                }
            },
            Operands::RegImm16 => {
                let rd = self.register(operands[0], line_num)?;
                match self.address(operands[1], line_num)? {
                    Address::Literal(value) => {
                        let [hi, lo] = value.to_be_bytes();
                        self.builder.instruction(&function, opcode, &[rd, hi, lo])
                    }
                    Address::Label(label) => {
                        self.builder.instruction_to_label(&function, opcode, &[rd], label)
                    }
                }
            }
        };

        result.map_err(|source| AssemblerError::Builder { line: line_num, source })
    }

    fn register(&self, operand: &str, line_num: usize) -> Result<RegIndex, AssemblerError> {
        self.registers
            .index_of(&operand.to_ascii_lowercase())
            .map_err(|_| AssemblerError::UnknownRegister {
                line: line_num,
                name: operand.to_string(),
            })
    }

    fn address<'a>(&self, operand: &'a str, line_num: usize) -> Result<Address<'a>, AssemblerError> {
        let starts_numeric = operand
            .chars()
            .next()
            .map_or(false, |c| c.is_ascii_digit() || c == '-' || c == '+');

        if starts_numeric {
            return parse_immediate(operand, line_num).map(Address::Literal);
        }
        Ok(Address::Label(operand))
    }
}

/// Parse a 16-bit immediate: decimal (signed or unsigned), `0x` hex or `0b`
/// binary.
fn parse_immediate(operand: &str, line_num: usize) -> Result<u16, AssemblerError> {
    let (negative, digits) = match operand.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, operand.strip_prefix('+').unwrap_or(operand)),
    };
    if digits.starts_with(['-', '+']) {
        return Err(AssemblerError::SyntaxError {
            line: line_num,
            message: format!("invalid number {:?}", operand),
        });
    }

    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        i64::from_str_radix(bin, 2)
    } else {
        digits.parse::<i64>()
    };

    let magnitude = parsed.map_err(|_| AssemblerError::SyntaxError {
        line: line_num,
        message: format!("invalid number {:?}", operand),
    })?;
    let value = if negative { -magnitude } else { magnitude };

    if !(i16::MIN as i64..=u16::MAX as i64).contains(&value) {
        return Err(AssemblerError::ValueOutOfRange { line: line_num, value });
    }
    Ok(value as u16)
}

/// Errors that can occur during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblerError {
    #[error("syntax error on line {line}: {message}")]
    SyntaxError { line: usize, message: String },

    #[error("unknown mnemonic on line {line}: {mnemonic}")]
    UnknownMnemonic { line: usize, mnemonic: String },

    #[error("unknown register on line {line}: {name}")]
    UnknownRegister { line: usize, name: String },

    #[error("value out of range on line {line}: {value}")]
    ValueOutOfRange { line: usize, value: i64 },

    #[error("line {line}: {source}")]
    Builder { line: usize, source: BuilderError },
}
