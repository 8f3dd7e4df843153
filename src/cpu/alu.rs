//! Arithmetic-logic unit.
//!
//! The ALU is stateless: every call reinterprets its operands as signed
//! 16-bit values, computes one operator and reports the raw result together
//! with a fresh set of condition flags. The result is *not* wrapped back to
//! 16 bits; callers storing it into a register truncate it there.

use serde::{Serialize, Deserialize};
use std::str::FromStr;
use thiserror::Error;

/// Largest shift count applied before the raw result stops being meaningful.
const MAX_SHIFT: i64 = 48;

/// An ALU operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AluOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    /// Bitwise complement. Unary: the second operand is ignored.
    Not,
}

impl AluOp {
    /// Every operator, in opcode order.
    pub const ALL: [AluOp; 11] = [
        AluOp::Add, AluOp::Sub, AluOp::Mul, AluOp::Div, AluOp::Mod,
        AluOp::And, AluOp::Or, AluOp::Xor, AluOp::Shl, AluOp::Shr,
        AluOp::Not,
    ];

    /// The operator's symbol.
    pub fn symbol(self) -> &'static str {
        match self {
            AluOp::Add => "+",
            AluOp::Sub => "-",
            AluOp::Mul => "*",
            AluOp::Div => "/",
            AluOp::Mod => "%",
            AluOp::And => "&",
            AluOp::Or => "|",
            AluOp::Xor => "^",
            AluOp::Shl => "<<",
            AluOp::Shr => ">>",
            AluOp::Not => "~",
        }
    }

    /// Whether the operator only reads its first operand.
    pub fn is_unary(self) -> bool {
        self == AluOp::Not
    }
}

impl FromStr for AluOp {
    type Err = AluError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AluOp::ALL
            .into_iter()
            .find(|op| op.symbol() == s)
            .ok_or_else(|| AluError::UnknownOperator(s.to_string()))
    }
}

impl std::fmt::Display for AluOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Condition flags left behind by the most recent ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub zero: bool,
    pub negative: bool,
    pub overflow: bool,
}

impl Flags {
    /// Flags derived from a raw (unwrapped) result.
    pub fn from_result(result: i64) -> Self {
        Self {
            zero: result == 0,
            negative: result < 0,
            overflow: result.unsigned_abs() > 0xFFFF,
        }
    }
}

impl Default for Flags {
    /// The reset state: zero set, everything else clear.
    fn default() -> Self {
        Self {
            zero: true,
            negative: false,
            overflow: false,
        }
    }
}

/// Output of a single ALU computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AluOutput {
    /// The raw result, not wrapped to 16 bits.
    pub result: i64,
    pub flags: Flags,
}

impl AluOutput {
    /// The result truncated to a 16-bit register word.
    #[inline]
    pub fn word(&self) -> u16 {
        self.result as u16
    }
}

/// Reinterpret a 16-bit pattern as a two's-complement value.
#[inline]
pub fn to_signed(word: u16) -> i64 {
    word as i16 as i64
}

/// Compute `a op b`.
///
/// Both operands are reinterpreted as signed 16-bit values before the
/// operation. Division and modulo are floored, so the remainder takes the
/// sign of the divisor. Right shifts propagate the sign bit.
pub fn compute(op: AluOp, a: u16, b: u16) -> Result<AluOutput, AluError> {
    let a = to_signed(a);
    let b = to_signed(b);

    let result = match op {
        AluOp::Add => a + b,
        AluOp::Sub => a - b,
        AluOp::Mul => a * b,
        AluOp::Div => {
            if b == 0 {
                return Err(AluError::DivideByZero);
            }
            floor_div(a, b)
        }
        AluOp::Mod => {
            if b == 0 {
                return Err(AluError::ModuloByZero);
            }
            floor_mod(a, b)
        }
        AluOp::And => a & b,
        AluOp::Or => a | b,
        AluOp::Xor => a ^ b,
        AluOp::Shl => a << shift_count(b)?,
        AluOp::Shr => a >> shift_count(b)?,
        AluOp::Not => !a,
    };

    Ok(AluOutput {
        result,
        flags: Flags::from_result(result),
    })
}

fn shift_count(b: i64) -> Result<i64, AluError> {
    if b < 0 {
        return Err(AluError::NegativeShiftCount(b));
    }
    Ok(b.min(MAX_SHIFT))
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a / b;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q - 1
    } else {
        q
    }
}

fn floor_mod(a: i64, b: i64) -> i64 {
    let r = a % b;
    if r != 0 && ((r < 0) != (b < 0)) {
        r + b
    } else {
        r
    }
}

/// Errors raised by the ALU.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AluError {
    #[error("divide by zero")]
    DivideByZero,

    #[error("modulo by zero")]
    ModuloByZero,

    #[error("unknown operator \"{0}\"")]
    UnknownOperator(String),

    #[error("negative shift count {0}")]
    NegativeShiftCount(i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_sets_no_flags_for_positive() {
        let out = compute(AluOp::Add, 4, 2).unwrap();
        assert_eq!(out.result, 6);
        assert_eq!(out.flags, Flags { zero: false, negative: false, overflow: false });
    }

    #[test]
    fn test_signed_reinterpretation() {
        // 0xFFFF is -1, 0x8000 is -32768
        assert_eq!(compute(AluOp::Add, 0xFFFF, 0).unwrap().result, -1);
        assert_eq!(compute(AluOp::Add, 0x8000, 0).unwrap().result, -32768);
        assert_eq!(compute(AluOp::Add, 0x7FFF, 0).unwrap().result, 32767);
    }

    #[test]
    fn test_sub_to_zero_and_negative() {
        let zero = compute(AluOp::Sub, 5, 5).unwrap();
        assert!(zero.flags.zero);
        assert!(!zero.flags.negative);

        let neg = compute(AluOp::Sub, 5, 6).unwrap();
        assert_eq!(neg.result, -1);
        assert!(neg.flags.negative);
        assert!(!neg.flags.zero);
        assert_eq!(neg.word(), 0xFFFF);
    }

    #[test]
    fn test_result_is_not_wrapped() {
        let out = compute(AluOp::Mul, 0x0100, 0x0100).unwrap();
        assert_eq!(out.result, 0x10000);
        assert!(out.flags.overflow);
        assert_eq!(out.word(), 0);
        assert!(!out.flags.zero);
    }

    #[test]
    fn test_overflow_on_negative_magnitude() {
        let out = compute(AluOp::Mul, 0x8000, 0x0002).unwrap();
        assert_eq!(out.result, -65536);
        assert!(out.flags.overflow);
        assert!(out.flags.negative);
    }

    #[test]
    fn test_floored_division_and_modulo() {
        assert_eq!(compute(AluOp::Div, 7, 2).unwrap().result, 3);
        assert_eq!(compute(AluOp::Div, (-7i16) as u16, 2).unwrap().result, -4);
        assert_eq!(compute(AluOp::Mod, (-7i16) as u16, 2).unwrap().result, 1);
        assert_eq!(compute(AluOp::Mod, 7, (-2i16) as u16).unwrap().result, -1);
    }

    #[test]
    fn test_bitwise() {
        assert_eq!(compute(AluOp::And, 0b1100, 0b1010).unwrap().result, 0b1000);
        assert_eq!(compute(AluOp::Or, 0b1100, 0b1010).unwrap().result, 0b1110);
        assert_eq!(compute(AluOp::Xor, 0b1100, 0b1010).unwrap().result, 0b0110);
    }

    #[test]
    fn test_not_is_unary() {
        let out = compute(AluOp::Not, 0, 1234).unwrap();
        assert_eq!(out.result, -1);
        assert_eq!(out.word(), 0xFFFF);
        assert!(out.flags.negative);
    }

    #[test]
    fn test_shifts() {
        assert_eq!(compute(AluOp::Shl, 1, 4).unwrap().result, 16);
        assert_eq!(compute(AluOp::Shr, 0x0112, 4).unwrap().result, 0x11);
        // Sign propagates on right shift
        assert_eq!(compute(AluOp::Shr, 0xFFF0, 2).unwrap().result, -4);
        assert_eq!(
            compute(AluOp::Shl, 1, 0xFFFF),
            Err(AluError::NegativeShiftCount(-1))
        );
    }

    #[test]
    fn test_huge_shift_keeps_sign() {
        let out = compute(AluOp::Shl, 0xFFFF, 1000).unwrap();
        assert!(out.flags.negative);
        assert!(out.flags.overflow);
        assert_eq!(out.word(), 0);
    }

    #[test]
    fn test_operator_symbols() {
        for op in AluOp::ALL {
            assert_eq!(op.symbol().parse::<AluOp>().unwrap(), op);
        }
        assert_eq!(
            "**".parse::<AluOp>(),
            Err(AluError::UnknownOperator("**".into()))
        );
    }

    #[test]
    fn test_reset_flags() {
        let flags = Flags::default();
        assert!(flags.zero);
        assert!(!flags.negative);
        assert!(!flags.overflow);
    }

    proptest! {
        #[test]
        fn prop_additive_identity(v in any::<u16>()) {
            let out = compute(AluOp::Add, v, 0).unwrap();
            prop_assert_eq!(out.result, v as i16 as i64);
        }

        #[test]
        fn prop_divide_by_zero_always_fails(v in any::<u16>()) {
            prop_assert_eq!(compute(AluOp::Div, v, 0), Err(AluError::DivideByZero));
            prop_assert_eq!(compute(AluOp::Mod, v, 0), Err(AluError::ModuloByZero));
        }

        #[test]
        fn prop_zero_excludes_negative(a in any::<u16>(), b in any::<u16>()) {
            for op in [AluOp::Add, AluOp::Sub, AluOp::Mul, AluOp::Xor] {
                let flags = compute(op, a, b).unwrap().flags;
                prop_assert!(!(flags.zero && flags.negative));
            }
        }
    }
}
