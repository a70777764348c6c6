use thiserror::Error;

/// Error raised while turning source text into a syntax tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A token appeared where the grammar does not allow it.
    #[error("line {line}, column {column}: unexpected {found}, expected {expected}")]
    UnexpectedToken {
        line: u32,
        column: u32,
        found: String,
        expected: String,
    },
    /// A dedent does not return to any enclosing indentation level.
    #[error("line {line}: unindent does not match any outer indentation level")]
    InconsistentDedent { line: u32 },
    /// A block opener (`:`) is not followed by an indented block.
    #[error("line {line}: expected an indented block")]
    ExpectedIndent { line: u32 },
    /// A string literal reached end of line before its closing quote.
    #[error("line {line}, column {column}: unterminated string literal")]
    UnterminatedString { line: u32, column: u32 },
    /// An integer literal does not fit in 64 bits.
    #[error("line {line}, column {column}: integer literal `{literal}` out of range")]
    IntegerOverflow {
        line: u32,
        column: u32,
        literal: String,
    },
    /// A character that starts no token.
    #[error("line {line}, column {column}: invalid character {ch:?}")]
    InvalidCharacter { line: u32, column: u32, ch: char },
}

/// Error raised when a syntax tree cannot be lowered to a code object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("line {0}: 'return' outside function")]
    ReturnOutsideFunction(u32),
    #[error("line {0}: 'break' outside loop")]
    BreakOutsideLoop(u32),
    #[error("line {0}: 'continue' not properly in loop")]
    ContinueOutsideLoop(u32),
    #[error("definition '{function}' declares parameter '{param}' more than once")]
    DuplicateParameter { function: String, param: String },
    /// One of the per-object tables outgrew the 16-bit operand.
    #[error("too many {table} in '{unit}' (limit {limit})")]
    TableOverflow {
        unit: String,
        table: &'static str,
        limit: usize,
    },
    /// The assembled object failed validation.
    #[error("invalid code object: {0}")]
    Code(#[from] CodeError),
}

/// Validation failure for a compiled code object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodeError {
    #[error("instruction stream length {0} is not a multiple of the instruction width")]
    TruncatedInstruction(usize),
    #[error("unknown opcode 0x{opcode:02x} at instruction {index}")]
    UnknownOpcode { index: usize, opcode: u8 },
    #[error("jump at instruction {index} targets {target}, past the end of {len} instructions")]
    JumpOutOfRange {
        index: usize,
        target: usize,
        len: usize,
    },
    #[error("instruction {index} references {table} slot {slot}, table has {len} entries")]
    OperandOutOfRange {
        index: usize,
        table: &'static str,
        slot: usize,
        len: usize,
    },
    #[error("argument count {arg_count} exceeds {locals} local slots")]
    ArgCountExceedsLocals { arg_count: usize, locals: usize },
    #[error("line table entry for instruction {0} is out of order or past the end")]
    LineTableUnordered(usize),
    #[error("declared stack size {declared} is below the required depth {required}")]
    StackSizeTooSmall { declared: usize, required: usize },
    #[error("stack depth is inconsistent at instruction {0}")]
    InconsistentStack(usize),
}

/// Failure while generating synthetic identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenameError {
    #[error("no free synthetic name with prefix '{prefix}' after {attempts} attempts")]
    CollisionExhaustion { prefix: String, attempts: usize },
}

/// Failure while building a dispatcher loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlattenError {
    #[error("definition '{definition}': state {state} has no reachable branch")]
    UnreachableState { definition: String, state: i64 },
    #[error("definition '{definition}': state {state} advances to {next}, expected {expected}")]
    BrokenChain {
        definition: String,
        state: i64,
        next: i64,
        expected: i64,
    },
    #[error("definition '{definition}': line {line}: '{keyword}' outside a loop")]
    LoopControlOutsideLoop {
        definition: String,
        line: u32,
        keyword: &'static str,
    },
    #[error("could not allocate a state variable: {0}")]
    StateVariable(#[from] RenameError),
}

/// Error type for syntax tree transforms.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("rename failed: {0}")]
    Rename(#[from] RenameError),
    #[error("flatten failed: {0}")]
    Flatten(#[from] FlattenError),
    #[error("generic error: {0}")]
    Generic(String),
}

/// Recoverable failure while padding a code object.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PadError {
    #[error("padded object failed validation: {0}")]
    Metadata(#[from] CodeError),
    #[error("instruction index {0} does not fit the 16-bit operand after padding")]
    IndexOverflow(usize),
}

/// Failure while reading a serialized object or container.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unexpected end of input at offset {0}")]
    UnexpectedEof(usize),
    #[error("unknown tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { offset: usize, tag: u8 },
    #[error("invalid UTF-8 string at offset {0}")]
    InvalidUtf8(usize),
    #[error("{0} trailing bytes after the serialized object")]
    TrailingBytes(usize),
    #[error("bad magic {0:02x?}")]
    BadMagic([u8; 4]),
    #[error("decoded code object is invalid: {0}")]
    InvalidObject(#[from] CodeError),
}

/// Failure while writing or reading a container artifact.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("container I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not persist '{path}': {source}")]
    Persist {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("container decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// Runtime error raised by the virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VmError {
    #[error("line {line}: name '{name}' is not defined")]
    NameError { line: u32, name: String },
    #[error("line {line}: local variable '{name}' referenced before assignment")]
    UnboundLocal { line: u32, name: String },
    #[error("line {line}: {message}")]
    TypeError { line: u32, message: String },
    #[error("line {0}: integer division or modulo by zero")]
    ZeroDivision(u32),
    #[error("line {0}: list index out of range")]
    IndexError(u32),
    #[error("line {0}: integer overflow")]
    Overflow(u32),
    #[error("line {line}: {message}")]
    ValueError { line: u32, message: String },
    #[error("line {0}: maximum recursion depth exceeded")]
    RecursionLimit(u32),
    #[error("'{unit}' exceeded its declared stack size of {bound}")]
    StackBoundExceeded { unit: String, bound: usize },
    #[error("'{unit}' has a malformed instruction stream: {source}")]
    Malformed {
        unit: String,
        #[source]
        source: CodeError,
    },
}

/// Errors that can occur during obfuscation, tagged with the failing stage.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    #[error("parse stage failed: {0}")]
    Parse(#[from] ParseError),
    #[error("transform stage failed: {0}")]
    Transform(#[from] TransformError),
    #[error("compile stage failed: {0}")]
    Compile(#[from] CompileError),
    #[error("serialize stage failed: {0}")]
    Container(#[from] ContainerError),
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
}
