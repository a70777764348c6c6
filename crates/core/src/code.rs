//! Compiled code objects: instruction stream, constant pool and debug metadata.
//!
//! A [`CodeObject`] can only be built through [`CodeObject::new`], which validates the
//! instruction stream against the tables it references. Nested definitions live in the
//! constant pool as [`Constant::Code`], so a module object owns its whole tree of units.

use crate::decoder::{Instruction, decode_instructions, instruction_count};
use crate::opcode::{Opcode, compare_from_arg};
use murk_utils::errors::CodeError;
use std::fmt::Write;

/// An entry of a code object's constant pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    Code(Box<CodeObject>),
}

/// Maps the instructions starting at `start` to a source line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineEntry {
    /// First instruction index the entry covers.
    pub start: usize,
    /// Source line of those instructions.
    pub line: u32,
}

/// Instruction-to-line mapping, in either of its two on-disk representations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineTable {
    /// Delta pairs `(instruction advance: u8, line advance: i8)` relative to `first_line`.
    Compact(Vec<u8>),
    /// Absolute entries ordered by start instruction.
    Expanded(Vec<LineEntry>),
}

impl Default for LineTable {
    fn default() -> Self {
        Self::Expanded(Vec::new())
    }
}

impl LineTable {
    /// Returns absolute entries regardless of representation. Consecutive entries with the
    /// same line are merged.
    pub fn normalized(&self, first_line: u32) -> Vec<LineEntry> {
        let raw = match self {
            Self::Expanded(entries) => entries.clone(),
            Self::Compact(pairs) => decode_compact(pairs, first_line),
        };
        let mut out: Vec<LineEntry> = Vec::with_capacity(raw.len());
        for entry in raw {
            if out.last().is_some_and(|last| last.line == entry.line) {
                continue;
            }
            out.push(entry);
        }
        out
    }

    /// Builds the delta-encoded representation of `entries`.
    pub fn compact(entries: &[LineEntry], first_line: u32) -> Self {
        let mut pairs = Vec::with_capacity(entries.len() * 2);
        let mut prev_start = 0usize;
        let mut prev_line = i64::from(first_line);
        for entry in entries {
            let mut addr_delta = entry.start.saturating_sub(prev_start);
            let mut line_delta = i64::from(entry.line) - prev_line;
            while addr_delta > usize::from(u8::MAX) {
                pairs.extend_from_slice(&[u8::MAX, 0]);
                addr_delta -= usize::from(u8::MAX);
            }
            let first = line_delta.clamp(i64::from(i8::MIN), i64::from(i8::MAX));
            pairs.extend_from_slice(&[addr_delta as u8, first as i8 as u8]);
            line_delta -= first;
            while line_delta != 0 {
                let step = line_delta.clamp(i64::from(i8::MIN), i64::from(i8::MAX));
                pairs.extend_from_slice(&[0, step as i8 as u8]);
                line_delta -= step;
            }
            prev_start = entry.start;
            prev_line = i64::from(entry.line);
        }
        Self::Compact(pairs)
    }
}

fn decode_compact(pairs: &[u8], first_line: u32) -> Vec<LineEntry> {
    let mut entries = Vec::new();
    let mut start = 0usize;
    let mut line = i64::from(first_line);
    for pair in pairs.chunks_exact(2) {
        if pair[0] != 0 {
            entries.push(LineEntry {
                start,
                line: line.max(0) as u32,
            });
        }
        start += usize::from(pair[0]);
        line += i64::from(pair[1] as i8);
    }
    entries.push(LineEntry {
        start,
        line: line.max(0) as u32,
    });
    entries
}

/// Raw fields of a code object, prior to validation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodeParts {
    /// Unit name, `<module>` for module code.
    pub name: String,
    /// File the unit was compiled from.
    pub filename: String,
    /// Line of the unit's first statement.
    pub first_line: u32,
    /// Number of leading `varnames` that are parameters.
    pub arg_count: u16,
    /// Declared operand stack bound.
    pub stack_size: u32,
    /// Encoded instruction stream.
    pub code: Vec<u8>,
    /// Constant pool.
    pub constants: Vec<Constant>,
    /// Global names referenced by the unit.
    pub names: Vec<String>,
    /// Local slots, parameters first.
    pub varnames: Vec<String>,
    /// Instruction to source line mapping.
    pub lines: LineTable,
}

/// A validated compiled unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeObject {
    parts: CodeParts,
}

impl CodeObject {
    /// Validates `parts` and wraps them.
    ///
    /// Checks that the stream decodes, every jump lands inside it, every operand indexes an
    /// existing table slot, the line table is ordered, and the declared stack size covers the
    /// deepest point reachable along any path.
    pub fn new(parts: CodeParts) -> Result<Self, CodeError> {
        let instructions = decode_instructions(&parts.code)?;
        let len = instructions.len();

        for ins in &instructions {
            check_operand(ins, &parts, len)?;
        }

        if usize::from(parts.arg_count) > parts.varnames.len() {
            return Err(CodeError::ArgCountExceedsLocals {
                arg_count: usize::from(parts.arg_count),
                locals: parts.varnames.len(),
            });
        }

        let mut previous: Option<usize> = None;
        for entry in parts.lines.normalized(parts.first_line) {
            let in_range = entry.start < len || entry.start == 0;
            if !in_range || previous.is_some_and(|p| entry.start <= p) {
                return Err(CodeError::LineTableUnordered(entry.start));
            }
            previous = Some(entry.start);
        }

        let required = max_stack_depth(&instructions)?;
        if (parts.stack_size as usize) < required {
            return Err(CodeError::StackSizeTooSmall {
                declared: parts.stack_size as usize,
                required,
            });
        }

        Ok(Self { parts })
    }

    /// Unit name.
    pub fn name(&self) -> &str {
        &self.parts.name
    }

    /// Source file name.
    pub fn filename(&self) -> &str {
        &self.parts.filename
    }

    /// Line of the first statement.
    pub const fn first_line(&self) -> u32 {
        self.parts.first_line
    }

    /// Parameter count.
    pub const fn arg_count(&self) -> u16 {
        self.parts.arg_count
    }

    /// Declared operand stack bound.
    pub const fn stack_size(&self) -> u32 {
        self.parts.stack_size
    }

    /// Encoded instruction stream.
    pub fn code(&self) -> &[u8] {
        &self.parts.code
    }

    /// Constant pool.
    pub fn constants(&self) -> &[Constant] {
        &self.parts.constants
    }

    /// Global names.
    pub fn names(&self) -> &[String] {
        &self.parts.names
    }

    /// Local slot names.
    pub fn varnames(&self) -> &[String] {
        &self.parts.varnames
    }

    /// Line table as stored.
    pub const fn lines(&self) -> &LineTable {
        &self.parts.lines
    }

    /// Instructions in this unit, nested units excluded.
    pub fn instruction_count(&self) -> usize {
        instruction_count(&self.parts.code)
    }

    /// Decodes the stream. Cannot fail for a validated object.
    pub fn instructions(&self) -> Vec<Instruction> {
        decode_instructions(&self.parts.code).unwrap_or_default()
    }

    /// Copies the fields out for building a modified object.
    pub fn to_parts(&self) -> CodeParts {
        self.parts.clone()
    }

    /// Unwraps the raw fields.
    pub fn into_parts(self) -> CodeParts {
        self.parts
    }

    /// Source line of the instruction at `index`.
    pub fn line_for(&self, index: usize) -> u32 {
        let entries = self.parts.lines.normalized(self.parts.first_line);
        match entries.partition_point(|entry| entry.start <= index) {
            0 => self.parts.first_line,
            n => entries[n - 1].line,
        }
    }

    /// Total instruction count of this object and every nested code constant.
    pub fn total_instruction_count(&self) -> usize {
        self.instruction_count()
            + self
                .nested()
                .map(CodeObject::total_instruction_count)
                .sum::<usize>()
    }

    /// Code objects held directly in the constant pool.
    pub fn nested(&self) -> impl Iterator<Item = &CodeObject> {
        self.parts.constants.iter().filter_map(|constant| match constant {
            Constant::Code(code) => Some(code.as_ref()),
            _ => None,
        })
    }

    /// Human-readable listing of this object and, recursively, its nested units.
    pub fn disassemble(&self) -> String {
        let mut out = String::new();
        self.disassemble_into(&mut out);
        out
    }

    fn disassemble_into(&self, out: &mut String) {
        let _ = writeln!(
            out,
            "code '{}' ({}:{}) args={} stack={} instructions={}",
            self.parts.name,
            self.parts.filename,
            self.parts.first_line,
            self.parts.arg_count,
            self.parts.stack_size,
            self.instruction_count()
        );
        for ins in self.instructions() {
            let _ = writeln!(out, "{ins}{}", self.operand_note(&ins));
        }
        for nested in self.nested() {
            out.push('\n');
            nested.disassemble_into(out);
        }
    }

    fn operand_note(&self, ins: &Instruction) -> String {
        let slot = usize::from(ins.arg);
        match ins.opcode {
            Opcode::LoadConst => match &self.parts.constants[slot] {
                Constant::None => " (None)".to_string(),
                Constant::Bool(b) => format!(" ({})", if *b { "True" } else { "False" }),
                Constant::Int(v) => format!(" ({v})"),
                Constant::Str(s) => format!(" ({s:?})"),
                Constant::Code(code) => format!(" (<code {}>)", code.name()),
            },
            Opcode::LoadFast | Opcode::StoreFast => format!(" ({})", self.parts.varnames[slot]),
            Opcode::LoadGlobal | Opcode::StoreGlobal => format!(" ({})", self.parts.names[slot]),
            Opcode::CompareOp => compare_from_arg(ins.arg)
                .map(|op| format!(" ({})", op.symbol()))
                .unwrap_or_default(),
            op if op.is_jump() => format!(" (to {slot})"),
            _ => String::new(),
        }
    }
}

fn check_operand(ins: &Instruction, parts: &CodeParts, len: usize) -> Result<(), CodeError> {
    let slot = usize::from(ins.arg);
    let (table, table_len) = match ins.opcode {
        op if op.is_jump() => {
            if slot >= len {
                return Err(CodeError::JumpOutOfRange {
                    index: ins.index,
                    target: slot,
                    len,
                });
            }
            return Ok(());
        }
        Opcode::LoadConst => ("constants", parts.constants.len()),
        Opcode::LoadFast | Opcode::StoreFast => ("varnames", parts.varnames.len()),
        Opcode::LoadGlobal | Opcode::StoreGlobal => ("names", parts.names.len()),
        Opcode::CompareOp => ("comparison kinds", 6),
        _ => return Ok(()),
    };
    if slot >= table_len {
        return Err(CodeError::OperandOutOfRange {
            index: ins.index,
            table,
            slot,
            len: table_len,
        });
    }
    Ok(())
}

/// Deepest operand stack reachable along any control-flow path.
///
/// Every instruction must be reached with the same depth from all predecessors.
pub fn max_stack_depth(instructions: &[Instruction]) -> Result<usize, CodeError> {
    let mut depths: Vec<Option<i32>> = vec![None; instructions.len()];
    let mut worklist = Vec::new();
    if !instructions.is_empty() {
        worklist.push((0usize, 0i32));
    }
    let mut max = 0i32;

    while let Some((index, depth)) = worklist.pop() {
        let Some(ins) = instructions.get(index) else {
            continue;
        };
        match depths[index] {
            Some(seen) if seen == depth => continue,
            Some(_) => return Err(CodeError::InconsistentStack(index)),
            None => depths[index] = Some(depth),
        }

        if ins.opcode.is_jump() {
            let taken = depth + ins.opcode.stack_effect(ins.arg, true);
            if taken < 0 {
                return Err(CodeError::InconsistentStack(index));
            }
            max = max.max(taken);
            worklist.push((usize::from(ins.arg), taken));
        }
        if !ins.opcode.is_terminal() {
            let next = depth + ins.opcode.stack_effect(ins.arg, false);
            if next < 0 {
                return Err(CodeError::InconsistentStack(index));
            }
            max = max.max(next);
            worklist.push((index + 1, next));
        }
    }
    Ok(max as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode;

    fn parts(instructions: &[Instruction], stack_size: u32) -> CodeParts {
        CodeParts {
            name: "<test>".into(),
            filename: "test.mk".into(),
            first_line: 1,
            stack_size,
            code: encode(instructions),
            constants: vec![Constant::Int(1), Constant::Int(2)],
            ..Default::default()
        }
    }

    #[test]
    fn accepts_valid_object() {
        let code = [
            Instruction::new(Opcode::LoadConst, 0),
            Instruction::new(Opcode::LoadConst, 1),
            Instruction::new(Opcode::BinaryAdd, 0),
            Instruction::new(Opcode::ReturnValue, 0),
        ];
        let object = CodeObject::new(parts(&code, 2)).unwrap();
        assert_eq!(object.instruction_count(), 4);
    }

    #[test]
    fn rejects_undersized_stack() {
        let code = [
            Instruction::new(Opcode::LoadConst, 0),
            Instruction::new(Opcode::LoadConst, 1),
            Instruction::new(Opcode::BinaryAdd, 0),
            Instruction::new(Opcode::ReturnValue, 0),
        ];
        assert_eq!(
            CodeObject::new(parts(&code, 1)),
            Err(CodeError::StackSizeTooSmall {
                declared: 1,
                required: 2
            })
        );
    }

    #[test]
    fn rejects_jump_past_end() {
        let code = [
            Instruction::new(Opcode::JumpAbsolute, 5),
            Instruction::new(Opcode::ReturnValue, 0),
        ];
        assert!(matches!(
            CodeObject::new(parts(&code, 1)),
            Err(CodeError::JumpOutOfRange { target: 5, .. })
        ));
    }

    #[test]
    fn rejects_missing_constant() {
        let code = [
            Instruction::new(Opcode::LoadConst, 7),
            Instruction::new(Opcode::ReturnValue, 0),
        ];
        assert!(matches!(
            CodeObject::new(parts(&code, 1)),
            Err(CodeError::OperandOutOfRange { slot: 7, .. })
        ));
    }

    #[test]
    fn detects_inconsistent_merge() {
        // both paths reach instruction 3, one with an extra value on the stack
        let code = [
            Instruction::new(Opcode::LoadConst, 0),
            Instruction::new(Opcode::PopJumpIfFalse, 3),
            Instruction::new(Opcode::LoadConst, 1),
            Instruction::new(Opcode::LoadConst, 1),
            Instruction::new(Opcode::ReturnValue, 0),
        ];
        assert!(matches!(
            CodeObject::new(parts(&code, 4)),
            Err(CodeError::InconsistentStack(_))
        ));
    }

    #[test]
    fn compact_table_round_trips_large_deltas() {
        let entries = vec![
            LineEntry { start: 0, line: 10 },
            LineEntry { start: 3, line: 400 },
            LineEntry { start: 700, line: 2 },
        ];
        let table = LineTable::compact(&entries, 10);
        let restored: Vec<LineEntry> = table
            .normalized(10)
            .into_iter()
            .filter(|e| entries.iter().any(|orig| orig.start == e.start))
            .collect();
        assert_eq!(restored, entries);
    }

    #[test]
    fn line_lookup_uses_preceding_entry() {
        let code = [
            Instruction::new(Opcode::LoadConst, 0),
            Instruction::new(Opcode::PopTop, 0),
            Instruction::new(Opcode::LoadConst, 1),
            Instruction::new(Opcode::ReturnValue, 0),
        ];
        let mut p = parts(&code, 1);
        p.lines = LineTable::Expanded(vec![
            LineEntry { start: 0, line: 1 },
            LineEntry { start: 2, line: 5 },
        ]);
        let object = CodeObject::new(p).unwrap();
        assert_eq!(object.line_for(1), 1);
        assert_eq!(object.line_for(3), 5);
    }
}
