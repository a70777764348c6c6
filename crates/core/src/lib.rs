/// Syntax tree.
pub mod ast;
/// Built-in functions.
pub mod builtins;
/// Validated code objects and line tables.
pub mod code;
/// Syntax tree to code object lowering.
pub mod compiler;
/// Versioned container artifacts.
pub mod container;
/// Instruction stream decoding.
pub mod decoder;
/// Instruction stream encoding.
pub mod encoder;
/// Tokenizer.
pub mod lexer;
/// Code object serialization.
pub mod marshal;
/// Instruction set.
pub mod opcode;
/// Source parser.
pub mod parser;
/// Canonical source printer.
pub mod unparse;
/// Stack virtual machine.
pub mod vm;

pub use code::CodeObject;
pub use compiler::compile;
pub use opcode::Opcode;
pub use parser::parse;
pub use unparse::unparse;
