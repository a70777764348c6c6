//! Turns a raw instruction stream into structured [`Instruction`]s.

use crate::opcode::{INSTRUCTION_WIDTH, Opcode};
use murk_utils::errors::CodeError;
use std::fmt;

/// A single decoded instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    /// position in the stream, in instructions
    pub index: usize,
    pub opcode: Opcode,
    /// operand; zero for instructions that take none
    pub arg: u16,
}

impl Instruction {
    pub const fn new(opcode: Opcode, arg: u16) -> Self {
        Self {
            index: 0,
            opcode,
            arg,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>5} {:<22} {}", self.index, self.opcode.to_string(), self.arg)
    }
}

/// Number of whole instructions in an encoded stream.
pub const fn instruction_count(code: &[u8]) -> usize {
    code.len() / INSTRUCTION_WIDTH
}

/// Decodes every instruction in `code`.
///
/// Fails if the stream is not a whole number of instructions or holds an unknown opcode.
pub fn decode_instructions(code: &[u8]) -> Result<Vec<Instruction>, CodeError> {
    if code.len() % INSTRUCTION_WIDTH != 0 {
        return Err(CodeError::TruncatedInstruction(code.len()));
    }
    code.chunks_exact(INSTRUCTION_WIDTH)
        .enumerate()
        .map(|(index, word)| {
            let opcode = Opcode::from_byte(word[0]).ok_or(CodeError::UnknownOpcode {
                index,
                opcode: word[0],
            })?;
            Ok(Instruction {
                index,
                opcode,
                arg: u16::from_le_bytes([word[1], word[2]]),
            })
        })
        .collect()
}
