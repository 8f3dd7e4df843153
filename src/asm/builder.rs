//! Program builder.
//!
//! Accumulates instruction bytes into named functions and resolves label
//! references to the address each function will occupy once loaded. The
//! layout matches [`Cpu::load_program`]: functions in declaration order,
//! one padding byte between consecutive functions.

use crate::cpu::decode::{encode, Instruction, Opcode, Operands};
use crate::cpu::{Cpu, CpuError};
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Function new instructions go to when no other is named.
pub const DEFAULT_FUNCTION: &str = "main";

/// A built program: named byte sequences plus their total size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Program {
    /// Functions in load order.
    pub functions: Vec<(String, Vec<u8>)>,
    /// Total instruction bytes across all functions.
    pub byte_count: usize,
}

impl Program {
    /// Start offset of every function, in load order.
    pub fn labels(&self) -> Vec<(&str, usize)> {
        let mut offset = 0;
        self.functions
            .iter()
            .map(|(name, bytes)| {
                let start = offset;
                offset += bytes.len() + 1;
                (name.as_str(), start)
            })
            .collect()
    }

    /// Bytes of a single function.
    pub fn function(&self, name: &str) -> Option<&[u8]> {
        self.functions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Load the program into a CPU.
    pub fn load_into(&self, cpu: &mut Cpu) -> Result<(), CpuError> {
        cpu.load_program(&self.functions, self.byte_count)
    }

    /// Whether the program contains no instruction bytes.
    pub fn is_empty(&self) -> bool {
        self.byte_count == 0
    }
}

/// A label operand waiting for its function's final address.
#[derive(Debug, Clone)]
struct Fixup {
    function: usize,
    at: usize,
    label: String,
}

/// Incrementally builds a [`Program`].
#[derive(Debug, Clone, Default)]
pub struct ProgramBuilder {
    functions: Vec<(String, Vec<u8>)>,
    fixups: Vec<Fixup>,
    byte_count: usize,
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a function, making it available as a label. Declaring an
    /// existing function is a no-op. Returns the function's index.
    pub fn declare(&mut self, name: &str) -> usize {
        if let Some(index) = self.position(name) {
            return index;
        }
        self.functions.push((name.to_string(), Vec::new()));
        self.functions.len() - 1
    }

    /// Whether `name` has been declared.
    pub fn is_declared(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.functions.iter().position(|(n, _)| n == name)
    }

    /// Total bytes emitted so far.
    pub fn byte_count(&self) -> usize {
        self.byte_count
    }

    /// Append `opcode` and its operand bytes to `function`.
    pub fn instruction(&mut self, function: &str, opcode: Opcode, operands: &[u8]) -> Result<(), BuilderError> {
        let expected = opcode.layout().width();
        if operands.len() != expected {
            return Err(BuilderError::OperandCount {
                opcode,
                expected,
                found: operands.len(),
            });
        }

        let index = self.declare(function);
        let bytes = &mut self.functions[index].1;
        bytes.push(opcode as u8);
        bytes.extend_from_slice(operands);
        self.byte_count += 1 + operands.len();
        Ok(())
    }

    /// Append `opcode` whose trailing 16-bit operand is the address of the
    /// function `label`. `registers` supplies any leading register operands.
    ///
    /// The label must already be declared.
    pub fn instruction_to_label(
        &mut self,
        function: &str,
        opcode: Opcode,
        registers: &[u8],
        label: &str,
    ) -> Result<(), BuilderError> {
        let leading = match opcode.layout() {
            Operands::Imm16 => 0,
            Operands::RegImm16 => 1,
            _ => return Err(BuilderError::LabelNotAllowed(opcode)),
        };
        if registers.len() != leading {
            return Err(BuilderError::OperandCount {
                opcode,
                expected: leading + 2,
                found: registers.len() + 1,
            });
        }

        let index = self.declare(function);
        if !self.is_declared(label) {
            return Err(BuilderError::LabelNotDeclared(label.to_string()));
        }

        let bytes = &mut self.functions[index].1;
        bytes.push(opcode as u8);
        bytes.extend_from_slice(registers);
        let at = bytes.len();
        bytes.extend_from_slice(&[0, 0]);
        self.byte_count += 3 + leading;

        self.fixups.push(Fixup {
            function: index,
            at,
            label: label.to_string(),
        });
        Ok(())
    }

    /// Append an already-decoded instruction.
    pub fn emit(&mut self, function: &str, instr: &Instruction) {
        let index = self.declare(function);
        let bytes = encode(instr);
        self.byte_count += bytes.len();
        self.functions[index].1.extend(bytes);
    }

    /// Resolve label references and produce the program.
    pub fn build(mut self) -> Result<Program, BuilderError> {
        let mut offsets = Vec::with_capacity(self.functions.len());
        let mut offset = 0usize;
        for (_, bytes) in &self.functions {
            offsets.push(offset);
            offset += bytes.len() + 1;
        }

        for fixup in &self.fixups {
            let target = self
                .position(&fixup.label)
                .ok_or_else(|| BuilderError::LabelNotDeclared(fixup.label.clone()))?;
            let address = u16::try_from(offsets[target])
                .map_err(|_| BuilderError::AddressOverflow(fixup.label.clone()))?;
            let [hi, lo] = address.to_be_bytes();
            let bytes = &mut self.functions[fixup.function].1;
            bytes[fixup.at] = hi;
            bytes[fixup.at + 1] = lo;
        }

        Ok(Program {
            functions: self.functions,
            byte_count: self.byte_count,
        })
    }
}

/// Errors that can occur while building a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuilderError {
    #[error("label {0:?} used before its function was declared")]
    LabelNotDeclared(String),

    #[error("{opcode} takes {expected} operand bytes, found {found}")]
    OperandCount { opcode: Opcode, expected: usize, found: usize },

    #[error("{0} does not take an address operand")]
    LabelNotAllowed(Opcode),

    #[error("function {0:?} lies beyond the 16-bit address range")]
    AddressOverflow(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::Condition;

    #[test]
    fn test_instruction_bytes() {
        let mut builder = ProgramBuilder::new();
        builder.instruction(DEFAULT_FUNCTION, Opcode::Mov, &[6, 0x00, 0x04]).unwrap();
        builder.instruction(DEFAULT_FUNCTION, Opcode::Hlt, &[]).unwrap();

        let program = builder.build().unwrap();
        assert_eq!(program.byte_count, 5);
        assert_eq!(program.function("main").unwrap(), &[0x14, 6, 0x00, 0x04, 0xFF]);
    }

    #[test]
    fn test_operand_count_checked() {
        let mut builder = ProgramBuilder::new();
        assert_eq!(
            builder.instruction("main", Opcode::Add, &[6]),
            Err(BuilderError::OperandCount { opcode: Opcode::Add, expected: 2, found: 1 })
        );
        assert_eq!(builder.byte_count(), 0);
    }

    #[test]
    fn test_label_must_be_declared() {
        let mut builder = ProgramBuilder::new();
        assert_eq!(
            builder.instruction_to_label("main", Opcode::Jali, &[], "helper"),
            Err(BuilderError::LabelNotDeclared("helper".into()))
        );
    }

    #[test]
    fn test_label_only_on_address_operands() {
        let mut builder = ProgramBuilder::new();
        builder.declare("main");
        assert_eq!(
            builder.instruction_to_label("main", Opcode::Add, &[], "main"),
            Err(BuilderError::LabelNotAllowed(Opcode::Add))
        );
    }

    #[test]
    fn test_labels_resolve_to_load_offsets() {
        let mut builder = ProgramBuilder::new();
        builder.instruction("helper", Opcode::Ret, &[]).unwrap();
        builder.instruction_to_label("main", Opcode::Jali, &[], "helper").unwrap();
        // main keeps growing after the reference; helper's offset is unaffected
        builder.instruction_to_label("main", Opcode::Mov, &[6], "main").unwrap();
        builder.instruction("main", Opcode::Hlt, &[]).unwrap();

        let program = builder.build().unwrap();
        assert_eq!(program.labels(), vec![("helper", 0), ("main", 2)]);
        assert_eq!(
            program.function("main").unwrap(),
            &[0x89, 0x00, 0x00, 0x14, 6, 0x00, 0x02, 0xFF]
        );
        assert_eq!(program.byte_count, 9);
    }

    #[test]
    fn test_emit_and_load() {
        let mut builder = ProgramBuilder::new();
        builder.emit("main", &Instruction::Pshi { imm: 0x0112 });
        builder.emit("main", &Instruction::Pop { rd: 6 });
        builder.emit("main", &Instruction::Branch { cond: Condition::Ne, target: 0 });
        builder.emit("main", &Instruction::Hlt);
        let program = builder.build().unwrap();
        assert_eq!(program.byte_count, 9);

        let mut cpu = Cpu::new();
        program.load_into(&mut cpu).unwrap();
        cpu.run().unwrap();
        assert_eq!(cpu.regs.get_named("r1").unwrap(), 0x0112);
    }
}
