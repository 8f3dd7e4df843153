//! Instruction encoding and decoding.
//!
//! Every instruction starts with a one-byte opcode followed by its operands:
//! register operands are one byte (the register's offset in the register
//! file) and immediates are 16-bit big-endian words.

use crate::cpu::alu::{AluOp, Flags};
use crate::cpu::registers::RegIndex;
use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Operand shape following an opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operands {
    None,
    Reg,
    RegReg,
    Imm16,
    RegImm16,
}

impl Operands {
    /// Number of operand bytes.
    pub fn width(self) -> usize {
        match self {
            Operands::None => 0,
            Operands::Reg => 1,
            Operands::RegReg | Operands::Imm16 => 2,
            Operands::RegImm16 => 3,
        }
    }
}

macro_rules! opcodes {
    ($($name:ident = $byte:literal, $mnemonic:literal, $layout:ident;)*) => {
        /// The closed set of opcodes.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $byte,)*
        }

        impl Opcode {
            /// Every opcode, in encoding order.
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name,)*];

            /// Assembly mnemonic.
            pub fn mnemonic(self) -> &'static str {
                match self {
                    $(Opcode::$name => $mnemonic,)*
                }
            }

            /// Operands that follow the opcode byte.
            pub fn layout(self) -> Operands {
                match self {
                    $(Opcode::$name => Operands::$layout,)*
                }
            }
        }

        impl TryFrom<u8> for Opcode {
            type Error = DecodeError;

            fn try_from(byte: u8) -> Result<Self, Self::Error> {
                match byte {
                    $($byte => Ok(Opcode::$name),)*
                    _ => Err(DecodeError::UnknownInstruction(byte)),
                }
            }
        }
    };
}

opcodes! {
    Lw    = 0x10, "LW",    RegReg;
    Sw    = 0x12, "SW",    RegReg;
    Mov   = 0x14, "MOV",   RegImm16;
    Swp   = 0x15, "SWP",   RegReg;

    Psh   = 0x20, "PSH",   Reg;
    Pshi  = 0x21, "PSHI",  Imm16;
    Pop   = 0x22, "POP",   Reg;

    Add   = 0x50, "ADD",   RegReg;
    Sub   = 0x52, "SUB",   RegReg;
    Mult  = 0x54, "MULT",  RegReg;
    Div   = 0x56, "DIV",   RegReg;
    Mod   = 0x58, "MOD",   RegReg;

    And   = 0x60, "AND",   RegReg;
    Or    = 0x62, "OR",    RegReg;
    Xor   = 0x64, "XOR",   RegReg;
    Lshft = 0x66, "LSHFT", RegReg;
    Rshft = 0x68, "RSHFT", RegReg;
    Not   = 0x6A, "NOT",   Reg;

    Jr    = 0x80, "JR",    Reg;
    Ji    = 0x81, "JI",    Imm16;
    Jal   = 0x82, "JAL",   Reg;
    Beq   = 0x83, "BEQ",   Imm16;
    Bne   = 0x84, "BNE",   Imm16;
    Blt   = 0x85, "BLT",   Imm16;
    Ble   = 0x86, "BLE",   Imm16;
    Bgt   = 0x87, "BGT",   Imm16;
    Bge   = 0x88, "BGE",   Imm16;
    Jali  = 0x89, "JALI",  Imm16;
    Ret   = 0x8A, "RET",   None;

    Hlt   = 0xFF, "HLT",   None;
}

impl Opcode {
    /// Look up an opcode by mnemonic (case-insensitive).
    pub fn from_mnemonic(mnemonic: &str) -> Option<Self> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(mnemonic))
    }

    /// The ALU operator this opcode dispatches to, if any.
    pub fn alu_op(self) -> Option<AluOp> {
        let op = match self {
            Opcode::Add => AluOp::Add,
            Opcode::Sub => AluOp::Sub,
            Opcode::Mult => AluOp::Mul,
            Opcode::Div => AluOp::Div,
            Opcode::Mod => AluOp::Mod,
            Opcode::And => AluOp::And,
            Opcode::Or => AluOp::Or,
            Opcode::Xor => AluOp::Xor,
            Opcode::Lshft => AluOp::Shl,
            Opcode::Rshft => AluOp::Shr,
            Opcode::Not => AluOp::Not,
            _ => return None,
        };
        Some(op)
    }

    /// The branch condition this opcode tests, if any.
    pub fn condition(self) -> Option<Condition> {
        let cond = match self {
            Opcode::Beq => Condition::Eq,
            Opcode::Bne => Condition::Ne,
            Opcode::Blt => Condition::Lt,
            Opcode::Ble => Condition::Le,
            Opcode::Bgt => Condition::Gt,
            Opcode::Bge => Condition::Ge,
            _ => return None,
        };
        Some(cond)
    }

    fn from_alu(op: AluOp) -> Self {
        match op {
            AluOp::Add => Opcode::Add,
            AluOp::Sub => Opcode::Sub,
            AluOp::Mul => Opcode::Mult,
            AluOp::Div => Opcode::Div,
            AluOp::Mod => Opcode::Mod,
            AluOp::And => Opcode::And,
            AluOp::Or => Opcode::Or,
            AluOp::Xor => Opcode::Xor,
            AluOp::Shl => Opcode::Lshft,
            AluOp::Shr => Opcode::Rshft,
            AluOp::Not => Opcode::Not,
        }
    }

    fn from_condition(cond: Condition) -> Self {
        match cond {
            Condition::Eq => Opcode::Beq,
            Condition::Ne => Opcode::Bne,
            Condition::Lt => Opcode::Blt,
            Condition::Le => Opcode::Ble,
            Condition::Gt => Opcode::Bgt,
            Condition::Ge => Opcode::Bge,
        }
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.mnemonic())
    }
}

/// Branch conditions, evaluated against the flags of the most recent
/// arithmetic or logical instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Condition {
    /// Whether the branch is taken for `flags`.
    ///
    /// `Gt` and `Ge` only look at the negative flag, so both are taken on a
    /// zero result.
    pub fn holds(self, flags: Flags) -> bool {
        match self {
            Condition::Eq => flags.zero,
            Condition::Ne => !flags.zero,
            Condition::Lt => flags.negative,
            Condition::Le => flags.negative || flags.zero,
            Condition::Gt => !flags.negative,
            Condition::Ge => !flags.negative || flags.zero,
        }
    }
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Instruction {
    // ==================== Register / Memory ====================

    /// Load word: rd := general[rs]
    Lw { rd: RegIndex, rs: RegIndex },

    /// Store word: general[rd] := rs
    Sw { rs: RegIndex, rd: RegIndex },

    /// Load immediate: rd := imm
    Mov { rd: RegIndex, imm: u16 },

    /// Exchange two registers through the stack
    Swp { r1: RegIndex, r2: RegIndex },

    // ==================== Stack ====================

    Psh { rs: RegIndex },
    Pshi { imm: u16 },
    Pop { rd: RegIndex },

    // ==================== Call / Return ====================

    /// Call an absolute address
    Jali { target: u16 },

    /// Call the address held in a register
    Jal { rs: RegIndex },

    /// Return to the caller
    Ret,

    // ==================== Arithmetic / Logical ====================

    /// ac := r1 op r2. `r2` is unused for unary operators.
    Alu { op: AluOp, r1: RegIndex, r2: RegIndex },

    // ==================== Control Flow ====================

    Jr { rs: RegIndex },
    Ji { target: u16 },
    Branch { cond: Condition, target: u16 },

    Hlt,
}

impl Instruction {
    /// The opcode this instruction encodes to.
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Lw { .. } => Opcode::Lw,
            Instruction::Sw { .. } => Opcode::Sw,
            Instruction::Mov { .. } => Opcode::Mov,
            Instruction::Swp { .. } => Opcode::Swp,
            Instruction::Psh { .. } => Opcode::Psh,
            Instruction::Pshi { .. } => Opcode::Pshi,
            Instruction::Pop { .. } => Opcode::Pop,
            Instruction::Jali { .. } => Opcode::Jali,
            Instruction::Jal { .. } => Opcode::Jal,
            Instruction::Ret => Opcode::Ret,
            Instruction::Alu { op, .. } => Opcode::from_alu(*op),
            Instruction::Jr { .. } => Opcode::Jr,
            Instruction::Ji { .. } => Opcode::Ji,
            Instruction::Branch { cond, .. } => Opcode::from_condition(*cond),
            Instruction::Hlt => Opcode::Hlt,
        }
    }

    /// Encoded size in bytes.
    pub fn size(&self) -> usize {
        1 + self.opcode().layout().width()
    }

    /// Read the operands of `opcode` from `src` and build the instruction.
    pub fn read<S: OperandSource>(opcode: Opcode, src: &mut S) -> Result<Self, S::Error> {
        if let Some(op) = opcode.alu_op() {
            let r1 = src.next_byte()?;
            let r2 = if op.is_unary() { 0 } else { src.next_byte()? };
            return Ok(Instruction::Alu { op, r1, r2 });
        }
        if let Some(cond) = opcode.condition() {
            let target = src.next_word()?;
            return Ok(Instruction::Branch { cond, target });
        }

        let instr = match opcode {
            Opcode::Lw => {
                let rd = src.next_byte()?;
                let rs = src.next_byte()?;
                Instruction::Lw { rd, rs }
            }
            Opcode::Sw => {
                let rs = src.next_byte()?;
                let rd = src.next_byte()?;
                Instruction::Sw { rs, rd }
            }
            Opcode::Mov => {
                let rd = src.next_byte()?;
                let imm = src.next_word()?;
                Instruction::Mov { rd, imm }
            }
            Opcode::Swp => {
                let r1 = src.next_byte()?;
                let r2 = src.next_byte()?;
                Instruction::Swp { r1, r2 }
            }
            Opcode::Psh => Instruction::Psh { rs: src.next_byte()? },
            Opcode::Pshi => Instruction::Pshi { imm: src.next_word()? },
            Opcode::Pop => Instruction::Pop { rd: src.next_byte()? },
            Opcode::Jali => Instruction::Jali { target: src.next_word()? },
            Opcode::Jal => Instruction::Jal { rs: src.next_byte()? },
            Opcode::Ret => Instruction::Ret,
            Opcode::Jr => Instruction::Jr { rs: src.next_byte()? },
            Opcode::Ji => Instruction::Ji { target: src.next_word()? },
            Opcode::Hlt => Instruction::Hlt,
            // ALU and branch opcodes are handled above
            _ => unreachable!("opcode {} has a dedicated decoder", opcode),
        };
        Ok(instr)
    }
}

/// A stream of operand bytes.
///
/// The CPU implements this over its instruction pointer; [`decode`] implements
/// it over a byte slice.
pub trait OperandSource {
    type Error;

    /// Next operand byte.
    fn next_byte(&mut self) -> Result<u8, Self::Error>;

    /// Next big-endian operand word.
    fn next_word(&mut self) -> Result<u16, Self::Error>;
}

struct SliceSource<'a> {
    bytes: &'a [u8],
    pos: usize,
    opcode: Opcode,
}

impl OperandSource for SliceSource<'_> {
    type Error = DecodeError;

    fn next_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.bytes.get(self.pos).ok_or(DecodeError::Truncated(self.opcode))?;
        self.pos += 1;
        Ok(byte)
    }

    fn next_word(&mut self) -> Result<u16, DecodeError> {
        let hi = self.next_byte()?;
        let lo = self.next_byte()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }
}

/// Decode the instruction at the start of `bytes`.
///
/// Returns the instruction and the number of bytes it occupies.
pub fn decode(bytes: &[u8]) -> Result<(Instruction, usize), DecodeError> {
    let first = *bytes.first().ok_or(DecodeError::Empty)?;
    let opcode = Opcode::try_from(first)?;
    let mut src = SliceSource { bytes, pos: 1, opcode };
    let instr = Instruction::read(opcode, &mut src)?;
    Ok((instr, src.pos))
}

/// Encode an instruction to bytes.
pub fn encode(instr: &Instruction) -> Vec<u8> {
    let mut out = Vec::with_capacity(instr.size());
    out.push(instr.opcode() as u8);

    match *instr {
        Instruction::Lw { rd, rs } => out.extend([rd, rs]),
        Instruction::Sw { rs, rd } => out.extend([rs, rd]),
        Instruction::Mov { rd, imm } => {
            out.push(rd);
            out.extend(imm.to_be_bytes());
        }
        Instruction::Swp { r1, r2 } => out.extend([r1, r2]),
        Instruction::Psh { rs } | Instruction::Jal { rs } | Instruction::Jr { rs } => {
            out.push(rs)
        }
        Instruction::Pop { rd } => out.push(rd),
        Instruction::Pshi { imm: word }
        | Instruction::Jali { target: word }
        | Instruction::Ji { target: word }
        | Instruction::Branch { target: word, .. } => out.extend(word.to_be_bytes()),
        Instruction::Alu { op, r1, r2 } => {
            out.push(r1);
            if !op.is_unary() {
                out.push(r2);
            }
        }
        Instruction::Ret | Instruction::Hlt => {}
    }

    out
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown instruction {0:#04x}")]
    UnknownInstruction(u8),

    #[error("operands of {0} run past the end of the program")]
    Truncated(Opcode),

    #[error("no instruction bytes")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_bytes_roundtrip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op as u8).unwrap(), op);
        }
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(
            Opcode::try_from(0x00),
            Err(DecodeError::UnknownInstruction(0x00))
        );
        assert_eq!(decode(&[0x11]), Err(DecodeError::UnknownInstruction(0x11)));
    }

    #[test]
    fn test_from_mnemonic() {
        assert_eq!(Opcode::from_mnemonic("mult"), Some(Opcode::Mult));
        assert_eq!(Opcode::from_mnemonic("HLT"), Some(Opcode::Hlt));
        assert_eq!(Opcode::from_mnemonic("NOP"), None);
    }

    #[test]
    fn test_decode_mov() {
        let (instr, len) = decode(&[0x14, 0x06, 0x01, 0x12, 0xFF]).unwrap();
        assert_eq!(instr, Instruction::Mov { rd: 6, imm: 0x0112 });
        assert_eq!(len, 4);
    }

    #[test]
    fn test_decode_not_takes_one_register() {
        let (instr, len) = decode(&[0x6A, 0x06]).unwrap();
        assert_eq!(instr, Instruction::Alu { op: AluOp::Not, r1: 6, r2: 0 });
        assert_eq!(len, 2);
    }

    #[test]
    fn test_decode_truncated() {
        assert_eq!(decode(&[0x81, 0x00]), Err(DecodeError::Truncated(Opcode::Ji)));
        assert_eq!(decode(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn test_encode_layouts() {
        assert_eq!(encode(&Instruction::Hlt), vec![0xFF]);
        assert_eq!(
            encode(&Instruction::Branch { cond: Condition::Eq, target: 0x0102 }),
            vec![0x83, 0x01, 0x02]
        );
        assert_eq!(
            encode(&Instruction::Alu { op: AluOp::Sub, r1: 6, r2: 8 }),
            vec![0x52, 0x06, 0x08]
        );
    }

    #[test]
    fn test_size_matches_encoding() {
        let samples = [
            Instruction::Mov { rd: 6, imm: 4 },
            Instruction::Pop { rd: 6 },
            Instruction::Alu { op: AluOp::Not, r1: 6, r2: 0 },
            Instruction::Jali { target: 9 },
            Instruction::Ret,
        ];
        for instr in samples {
            let bytes = encode(&instr);
            assert_eq!(bytes.len(), instr.size());
            assert_eq!(decode(&bytes).unwrap(), (instr, bytes.len()));
        }
    }

    #[test]
    fn test_branch_table() {
        let zero = Flags { zero: true, negative: false, overflow: false };
        let neg = Flags { zero: false, negative: true, overflow: false };
        let pos = Flags { zero: false, negative: false, overflow: false };

        assert!(Condition::Eq.holds(zero));
        assert!(!Condition::Eq.holds(pos));
        assert!(Condition::Ne.holds(neg));
        assert!(Condition::Lt.holds(neg));
        assert!(!Condition::Lt.holds(zero));
        assert!(Condition::Le.holds(zero));
        assert!(Condition::Le.holds(neg));
        assert!(!Condition::Le.holds(pos));
        assert!(Condition::Gt.holds(pos));
        assert!(Condition::Gt.holds(zero));
        assert!(!Condition::Gt.holds(neg));
        assert!(Condition::Ge.holds(zero));
        assert!(!Condition::Ge.holds(neg));
    }
}
