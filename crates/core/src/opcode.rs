//! Instruction set of the murk stack machine.
//!
//! Every instruction is a fixed three-byte word: the opcode byte followed by a 16-bit
//! little-endian operand. Instructions that take no operand carry zero. Jump operands are
//! absolute instruction indices, not byte offsets.
use crate::ast::CmpOp;
use std::fmt;

/// Size in bytes of one encoded instruction.
pub const INSTRUCTION_WIDTH: usize = 3;

/// Largest value an operand can carry.
pub const MAX_ARG: usize = u16::MAX as usize;

/// Operation of one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Inert filler: no operand-stack or control-flow effect.
    Nop,
    PopTop,
    LoadConst,
    LoadFast,
    StoreFast,
    LoadGlobal,
    StoreGlobal,
    UnaryNegative,
    UnaryNot,
    BinaryAdd,
    BinarySubtract,
    BinaryMultiply,
    BinaryFloorDivide,
    BinaryModulo,
    CompareOp,
    BuildList,
    BinarySubscr,
    JumpAbsolute,
    PopJumpIfFalse,
    PopJumpIfTrue,
    JumpIfFalseOrPop,
    JumpIfTrueOrPop,
    GetIter,
    ForIter,
    CallFunction,
    MakeFunction,
    ReturnValue,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nop => "NOP",
            Self::PopTop => "POP_TOP",
            Self::LoadConst => "LOAD_CONST",
            Self::LoadFast => "LOAD_FAST",
            Self::StoreFast => "STORE_FAST",
            Self::LoadGlobal => "LOAD_GLOBAL",
            Self::StoreGlobal => "STORE_GLOBAL",
            Self::UnaryNegative => "UNARY_NEGATIVE",
            Self::UnaryNot => "UNARY_NOT",
            Self::BinaryAdd => "BINARY_ADD",
            Self::BinarySubtract => "BINARY_SUBTRACT",
            Self::BinaryMultiply => "BINARY_MULTIPLY",
            Self::BinaryFloorDivide => "BINARY_FLOOR_DIVIDE",
            Self::BinaryModulo => "BINARY_MODULO",
            Self::CompareOp => "COMPARE_OP",
            Self::BuildList => "BUILD_LIST",
            Self::BinarySubscr => "BINARY_SUBSCR",
            Self::JumpAbsolute => "JUMP_ABSOLUTE",
            Self::PopJumpIfFalse => "POP_JUMP_IF_FALSE",
            Self::PopJumpIfTrue => "POP_JUMP_IF_TRUE",
            Self::JumpIfFalseOrPop => "JUMP_IF_FALSE_OR_POP",
            Self::JumpIfTrueOrPop => "JUMP_IF_TRUE_OR_POP",
            Self::GetIter => "GET_ITER",
            Self::ForIter => "FOR_ITER",
            Self::CallFunction => "CALL_FUNCTION",
            Self::MakeFunction => "MAKE_FUNCTION",
            Self::ReturnValue => "RETURN_VALUE",
        };
        f.write_str(name)
    }
}

impl Opcode {
    /// Parses a raw opcode byte.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        use Opcode::*;

        Some(match byte {
            0x00 => Nop,
            0x01 => PopTop,
            0x10 => LoadConst,
            0x11 => LoadFast,
            0x12 => StoreFast,
            0x13 => LoadGlobal,
            0x14 => StoreGlobal,
            0x20 => UnaryNegative,
            0x21 => UnaryNot,
            0x22 => BinaryAdd,
            0x23 => BinarySubtract,
            0x24 => BinaryMultiply,
            0x25 => BinaryFloorDivide,
            0x26 => BinaryModulo,
            0x27 => CompareOp,
            0x28 => BuildList,
            0x29 => BinarySubscr,
            0x30 => JumpAbsolute,
            0x31 => PopJumpIfFalse,
            0x32 => PopJumpIfTrue,
            0x33 => JumpIfFalseOrPop,
            0x34 => JumpIfTrueOrPop,
            0x35 => GetIter,
            0x36 => ForIter,
            0x40 => CallFunction,
            0x41 => MakeFunction,
            0x42 => ReturnValue,
            _ => return None,
        })
    }

    /// Encoded opcode byte.
    pub const fn to_byte(self) -> u8 {
        use Opcode::*;

        match self {
            Nop => 0x00,
            PopTop => 0x01,
            LoadConst => 0x10,
            LoadFast => 0x11,
            StoreFast => 0x12,
            LoadGlobal => 0x13,
            StoreGlobal => 0x14,
            UnaryNegative => 0x20,
            UnaryNot => 0x21,
            BinaryAdd => 0x22,
            BinarySubtract => 0x23,
            BinaryMultiply => 0x24,
            BinaryFloorDivide => 0x25,
            BinaryModulo => 0x26,
            CompareOp => 0x27,
            BuildList => 0x28,
            BinarySubscr => 0x29,
            JumpAbsolute => 0x30,
            PopJumpIfFalse => 0x31,
            PopJumpIfTrue => 0x32,
            JumpIfFalseOrPop => 0x33,
            JumpIfTrueOrPop => 0x34,
            GetIter => 0x35,
            ForIter => 0x36,
            CallFunction => 0x40,
            MakeFunction => 0x41,
            ReturnValue => 0x42,
        }
    }

    /// Returns true if the operand is an absolute instruction index.
    pub const fn is_jump(self) -> bool {
        matches!(
            self,
            Self::JumpAbsolute
                | Self::PopJumpIfFalse
                | Self::PopJumpIfTrue
                | Self::JumpIfFalseOrPop
                | Self::JumpIfTrueOrPop
                | Self::ForIter
        )
    }

    /// Returns true if execution never falls through to the next instruction.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::JumpAbsolute | Self::ReturnValue)
    }

    /// Net operand-stack change. `jump` selects the effect along the taken branch of a jump.
    pub const fn stack_effect(self, arg: u16, jump: bool) -> i32 {
        use Opcode::*;

        match self {
            Nop | UnaryNegative | UnaryNot | JumpAbsolute | GetIter | MakeFunction => 0,
            LoadConst | LoadFast | LoadGlobal => 1,
            PopTop | StoreFast | StoreGlobal | ReturnValue => -1,
            BinaryAdd | BinarySubtract | BinaryMultiply | BinaryFloorDivide | BinaryModulo
            | CompareOp | BinarySubscr => -1,
            PopJumpIfFalse | PopJumpIfTrue => -1,
            JumpIfFalseOrPop | JumpIfTrueOrPop => {
                if jump {
                    0
                } else {
                    -1
                }
            }
            ForIter => {
                if jump {
                    -1
                } else {
                    1
                }
            }
            BuildList => 1 - arg as i32,
            CallFunction => -(arg as i32),
        }
    }
}

/// Operand encoding of comparison kinds for `COMPARE_OP`.
pub const fn compare_arg(op: CmpOp) -> u16 {
    match op {
        CmpOp::Eq => 0,
        CmpOp::NotEq => 1,
        CmpOp::Lt => 2,
        CmpOp::LtE => 3,
        CmpOp::Gt => 4,
        CmpOp::GtE => 5,
    }
}

/// Comparison selected by a `COMPARE_OP` operand.
pub const fn compare_from_arg(arg: u16) -> Option<CmpOp> {
    Some(match arg {
        0 => CmpOp::Eq,
        1 => CmpOp::NotEq,
        2 => CmpOp::Lt,
        3 => CmpOp::LtE,
        4 => CmpOp::Gt,
        5 => CmpOp::GtE,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_byte_round_trips() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op.to_byte(), byte, "{op}");
            }
        }
    }

    #[test]
    fn filler_is_inert() {
        assert_eq!(Opcode::Nop.stack_effect(0, false), 0);
        assert!(!Opcode::Nop.is_jump());
        assert!(!Opcode::Nop.is_terminal());
    }

    #[test]
    fn for_iter_effect_depends_on_branch() {
        assert_eq!(Opcode::ForIter.stack_effect(0, false), 1);
        assert_eq!(Opcode::ForIter.stack_effect(0, true), -1);
    }
}
