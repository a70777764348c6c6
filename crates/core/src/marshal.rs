//! Tagged binary encoding of constants and code objects.
//!
//! Integers are little-endian. Strings and byte runs carry a `u32` length prefix. A code
//! object records its fields in declaration order; the line table is preceded by a
//! representation byte so either form survives a round trip unchanged.

use crate::code::{CodeObject, CodeParts, Constant, LineEntry, LineTable};
use murk_utils::errors::DecodeError;

const TAG_NONE: u8 = b'N';
const TAG_TRUE: u8 = b'T';
const TAG_FALSE: u8 = b'F';
const TAG_INT: u8 = b'i';
const TAG_STR: u8 = b's';
const TAG_CODE: u8 = b'c';

const LINES_COMPACT: u8 = 0;
const LINES_EXPANDED: u8 = 1;

/// Serializes a code object.
pub fn dumps(code: &CodeObject) -> Vec<u8> {
    let mut out = Vec::new();
    write_code(&mut out, code);
    out
}

/// Deserializes a code object, rejecting trailing bytes.
pub fn loads(bytes: &[u8]) -> Result<CodeObject, DecodeError> {
    let mut reader = Reader { bytes, pos: 0 };
    let code = match reader.constant()? {
        Constant::Code(code) => *code,
        _ => return Err(DecodeError::UnknownTag { offset: 0, tag: bytes[0] }),
    };
    match bytes.len() - reader.pos {
        0 => Ok(code),
        trailing => Err(DecodeError::TrailingBytes(trailing)),
    }
}

fn write_u16(out: &mut Vec<u8>, v: u16) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_u32(out, bytes.len() as u32);
    out.extend_from_slice(bytes);
}

fn write_str(out: &mut Vec<u8>, s: &str) {
    write_bytes(out, s.as_bytes());
}

fn write_constant(out: &mut Vec<u8>, constant: &Constant) {
    match constant {
        Constant::None => out.push(TAG_NONE),
        Constant::Bool(true) => out.push(TAG_TRUE),
        Constant::Bool(false) => out.push(TAG_FALSE),
        Constant::Int(v) => {
            out.push(TAG_INT);
            out.extend_from_slice(&v.to_le_bytes());
        }
        Constant::Str(s) => {
            out.push(TAG_STR);
            write_str(out, s);
        }
        Constant::Code(code) => write_code(out, code),
    }
}

fn write_code(out: &mut Vec<u8>, code: &CodeObject) {
    out.push(TAG_CODE);
    write_str(out, code.name());
    write_str(out, code.filename());
    write_u32(out, code.first_line());
    write_u16(out, code.arg_count());
    write_u32(out, code.stack_size());
    write_bytes(out, code.code());

    write_u32(out, code.constants().len() as u32);
    for constant in code.constants() {
        write_constant(out, constant);
    }
    for table in [code.names(), code.varnames()] {
        write_u32(out, table.len() as u32);
        for name in table {
            write_str(out, name);
        }
    }

    match code.lines() {
        LineTable::Compact(bytes) => {
            out.push(LINES_COMPACT);
            write_bytes(out, bytes);
        }
        LineTable::Expanded(entries) => {
            out.push(LINES_EXPANDED);
            write_u32(out, entries.len() as u32);
            for entry in entries {
                write_u32(out, entry.start as u32);
                write_u32(out, entry.line);
            }
        }
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(DecodeError::UnexpectedEof(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn byte_run(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let start = self.pos;
        let raw = self.byte_run()?;
        String::from_utf8(raw.to_vec()).map_err(|_| DecodeError::InvalidUtf8(start))
    }

    fn strings(&mut self) -> Result<Vec<String>, DecodeError> {
        let count = self.u32()? as usize;
        // each entry needs at least its length prefix
        let mut out = Vec::with_capacity(count.min(self.bytes.len() / 4));
        for _ in 0..count {
            out.push(self.string()?);
        }
        Ok(out)
    }

    fn constant(&mut self) -> Result<Constant, DecodeError> {
        let offset = self.pos;
        match self.u8()? {
            TAG_NONE => Ok(Constant::None),
            TAG_TRUE => Ok(Constant::Bool(true)),
            TAG_FALSE => Ok(Constant::Bool(false)),
            TAG_INT => Ok(Constant::Int(i64::from_le_bytes(self.array()?))),
            TAG_STR => Ok(Constant::Str(self.string()?)),
            TAG_CODE => Ok(Constant::Code(Box::new(self.code()?))),
            tag => Err(DecodeError::UnknownTag { offset, tag }),
        }
    }

    fn code(&mut self) -> Result<CodeObject, DecodeError> {
        let name = self.string()?;
        let filename = self.string()?;
        let first_line = self.u32()?;
        let arg_count = self.u16()?;
        let stack_size = self.u32()?;
        let code = self.byte_run()?.to_vec();

        let count = self.u32()? as usize;
        let mut constants = Vec::with_capacity(count.min(self.bytes.len()));
        for _ in 0..count {
            constants.push(self.constant()?);
        }
        let names = self.strings()?;
        let varnames = self.strings()?;

        let offset = self.pos;
        let lines = match self.u8()? {
            LINES_COMPACT => LineTable::Compact(self.byte_run()?.to_vec()),
            LINES_EXPANDED => {
                let count = self.u32()? as usize;
                let mut entries = Vec::with_capacity(count.min(self.bytes.len() / 8));
                for _ in 0..count {
                    let start = self.u32()? as usize;
                    let line = self.u32()?;
                    entries.push(LineEntry { start, line });
                }
                LineTable::Expanded(entries)
            }
            tag => return Err(DecodeError::UnknownTag { offset, tag }),
        };

        Ok(CodeObject::new(CodeParts {
            name,
            filename,
            first_line,
            arg_count,
            stack_size,
            code,
            constants,
            names,
            varnames,
            lines,
        })?)
    }
}
