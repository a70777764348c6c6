use crate::decoder::Instruction;
use crate::opcode::INSTRUCTION_WIDTH;

/// Appends one encoded instruction word to `out`.
pub fn encode_into(out: &mut Vec<u8>, ins: &Instruction) {
    out.push(ins.opcode.to_byte());
    out.extend_from_slice(&ins.arg.to_le_bytes());
}

/// Encodes `instructions` into a byte stream.
pub fn encode(instructions: &[Instruction]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(instructions.len() * INSTRUCTION_WIDTH);
    for ins in instructions {
        encode_into(&mut bytes, ins);
    }
    bytes
}
