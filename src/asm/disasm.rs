//! Disassembler for register-machine programs.
//!
//! Converts instruction bytes back to the text the assembler accepts.

use crate::asm::builder::Program;
use crate::cpu::decode::{decode, Instruction};
use crate::cpu::registers::{RegIndex, Registers};
use std::collections::HashMap;

/// One disassembled instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    /// Program address of the first byte.
    pub addr: usize,
    /// Raw instruction bytes.
    pub bytes: Vec<u8>,
    /// Assembly text, or `???` when the bytes do not decode.
    pub text: String,
}

/// Disassemble the instruction at the start of `bytes`.
///
/// Returns the text and the number of bytes consumed. Undecodable bytes are
/// consumed one at a time.
pub fn disassemble_instruction(bytes: &[u8], regs: &Registers) -> (String, usize) {
    match decode(bytes) {
        Ok((instr, len)) => (format_instruction(&instr, regs, &HashMap::new()), len),
        Err(_) => ("???".to_string(), 1.min(bytes.len())),
    }
}

/// Disassemble a run of bytes starting at program address `base`.
pub fn listing(bytes: &[u8], base: usize, regs: &Registers, labels: &HashMap<u16, String>) -> Vec<Line> {
    let mut lines = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        let (text, len) = match decode(&bytes[pos..]) {
            Ok((instr, len)) => (format_instruction(&instr, regs, labels), len),
            Err(_) => ("???".to_string(), 1),
        };
        lines.push(Line {
            addr: base + pos,
            bytes: bytes[pos..pos + len].to_vec(),
            text,
        });
        pos += len;
    }

    lines
}

/// Disassemble a whole program, one section per function.
pub fn disassemble(program: &Program, regs: &Registers) -> String {
    let labels: HashMap<u16, String> = program
        .labels()
        .into_iter()
        .filter_map(|(name, offset)| u16::try_from(offset).ok().map(|o| (o, name.to_string())))
        .collect();

    let mut output = String::new();
    output.push_str("; Disassembly\n");
    output.push_str("; -----------\n");

    for ((name, bytes), (_, base)) in program.functions.iter().zip(program.labels()) {
        output.push_str(&format!("\n{}:\n", name));
        for line in listing(bytes, base, regs, &labels) {
            let hex: Vec<String> = line.bytes.iter().map(|b| format!("{:02x}", b)).collect();
            output.push_str(&format!("{:04x}:  {:<24}; {}\n", line.addr, line.text, hex.join(" ")));
        }
    }

    output
}

/// Format a decoded instruction as assembly text. Addresses that start a
/// known function are shown by name.
pub fn format_instruction(instr: &Instruction, regs: &Registers, labels: &HashMap<u16, String>) -> String {
    let mnemonic = instr.opcode().mnemonic();
    let reg = |index: RegIndex| register_name(regs, index);
    let addr = |target: u16| match labels.get(&target) {
        Some(name) => name.clone(),
        None => format!("0x{:04x}", target),
    };

    match *instr {
        Instruction::Lw { rd, rs } => format!("{} {}, {}", mnemonic, reg(rd), reg(rs)),
        Instruction::Sw { rs, rd } => format!("{} {}, {}", mnemonic, reg(rs), reg(rd)),
        Instruction::Mov { rd, imm } => format!("{} {}, 0x{:04x}", mnemonic, reg(rd), imm),
        Instruction::Swp { r1, r2 } => format!("{} {}, {}", mnemonic, reg(r1), reg(r2)),
        Instruction::Psh { rs } => format!("{} {}", mnemonic, reg(rs)),
        Instruction::Pshi { imm } => format!("{} 0x{:04x}", mnemonic, imm),
        Instruction::Pop { rd } => format!("{} {}", mnemonic, reg(rd)),
        Instruction::Jali { target } => format!("{} {}", mnemonic, addr(target)),
        Instruction::Jal { rs } => format!("{} {}", mnemonic, reg(rs)),
        Instruction::Alu { op, r1, r2 } => {
            if op.is_unary() {
                format!("{} {}", mnemonic, reg(r1))
            } else {
                format!("{} {}, {}", mnemonic, reg(r1), reg(r2))
            }
        }
        Instruction::Jr { rs } => format!("{} {}", mnemonic, reg(rs)),
        Instruction::Ji { target } => format!("{} {}", mnemonic, addr(target)),
        Instruction::Branch { target, .. } => format!("{} {}", mnemonic, addr(target)),
        Instruction::Ret | Instruction::Hlt => mnemonic.to_string(),
    }
}

/// Register name for an operand byte; unmapped offsets show as `#n`.
fn register_name(regs: &Registers, index: RegIndex) -> String {
    match regs.name_of(index) {
        Some(name) => name.to_string(),
        None => format!("#{}", index),
    }
}
