//! Lowers a syntax tree to a [`CodeObject`].
//!
//! Module-level code binds every name as a global. Inside a definition, parameters and
//! every name the body assigns become fast locals; any other name is looked up as a global
//! and then as a built-in at run time.

use crate::ast::{BinOp, BoolOp, Definition, Expr, Module, Stmt, StmtKind, UnaryOp, local_bindings};
use crate::code::{CodeObject, CodeParts, Constant, LineEntry, LineTable, max_stack_depth};
use crate::decoder::Instruction;
use crate::encoder::encode;
use crate::opcode::{MAX_ARG, Opcode, compare_arg};
use murk_utils::errors::CompileError;
use std::collections::{HashMap, HashSet};

/// Compiles a whole module into its top-level code object.
pub fn compile(module: &Module, filename: &str) -> Result<CodeObject, CompileError> {
    let first_line = module.body.first().map_or(1, |stmt| stmt.line.max(1));
    let mut unit = Unit::new("<module>", filename, first_line, None);
    unit.block(&module.body)?;
    let code = unit.finish()?;
    tracing::debug!(
        "compiled '{}' into {} instructions ({} total)",
        filename,
        code.instruction_count(),
        code.total_instruction_count()
    );
    Ok(code)
}

enum LoopKind {
    While,
    For,
}

struct Loop {
    kind: LoopKind,
    continue_target: usize,
    break_patches: Vec<usize>,
}

/// Builder for one code object.
struct Unit {
    name: String,
    filename: String,
    first_line: u32,
    arg_count: u16,
    instructions: Vec<Instruction>,
    constants: Vec<Constant>,
    names: Vec<String>,
    name_slots: HashMap<String, u16>,
    varnames: Vec<String>,
    local_slots: Option<HashMap<String, u16>>,
    loops: Vec<Loop>,
    lines: Vec<LineEntry>,
    line: u32,
}

impl Unit {
    /// `locals` is `None` for module scope.
    fn new(name: &str, filename: &str, first_line: u32, locals: Option<Vec<String>>) -> Self {
        let (varnames, local_slots) = match locals {
            Some(vars) => {
                let slots = vars
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (v.clone(), i as u16))
                    .collect();
                (vars, Some(slots))
            }
            None => (Vec::new(), None),
        };
        Self {
            name: name.to_string(),
            filename: filename.to_string(),
            first_line,
            arg_count: 0,
            instructions: Vec::new(),
            constants: Vec::new(),
            names: Vec::new(),
            name_slots: HashMap::new(),
            varnames,
            local_slots,
            loops: Vec::new(),
            lines: Vec::new(),
            line: first_line,
        }
    }

    fn overflow(&self, table: &'static str) -> CompileError {
        CompileError::TableOverflow {
            unit: self.name.clone(),
            table,
            limit: MAX_ARG + 1,
        }
    }

    fn here(&self) -> usize {
        self.instructions.len()
    }

    fn emit(&mut self, opcode: Opcode, arg: u16) -> usize {
        let index = self.instructions.len();
        if self.lines.last().is_none_or(|entry| entry.line != self.line) {
            self.lines.push(LineEntry {
                start: index,
                line: self.line,
            });
        }
        self.instructions.push(Instruction {
            index,
            opcode,
            arg,
        });
        index
    }

    fn patch(&mut self, at: usize, target: usize) -> Result<(), CompileError> {
        let target = u16::try_from(target).map_err(|_| self.overflow("instructions"))?;
        self.instructions[at].arg = target;
        Ok(())
    }

    fn constant(&mut self, constant: Constant) -> Result<u16, CompileError> {
        let existing = match constant {
            Constant::Code(_) => None,
            ref plain => self.constants.iter().position(|c| c == plain),
        };
        let slot = existing.unwrap_or_else(|| {
            self.constants.push(constant);
            self.constants.len() - 1
        });
        u16::try_from(slot).map_err(|_| self.overflow("constants"))
    }

    fn global_slot(&mut self, name: &str) -> Result<u16, CompileError> {
        if let Some(&slot) = self.name_slots.get(name) {
            return Ok(slot);
        }
        let slot = u16::try_from(self.names.len()).map_err(|_| self.overflow("names"))?;
        self.names.push(name.to_string());
        self.name_slots.insert(name.to_string(), slot);
        Ok(slot)
    }

    fn local_slot(&self, name: &str) -> Option<u16> {
        self.local_slots.as_ref()?.get(name).copied()
    }

    fn load_name(&mut self, name: &str) -> Result<(), CompileError> {
        match self.local_slot(name) {
            Some(slot) => self.emit(Opcode::LoadFast, slot),
            None => {
                let slot = self.global_slot(name)?;
                self.emit(Opcode::LoadGlobal, slot)
            }
        };
        Ok(())
    }

    fn store_name(&mut self, name: &str) -> Result<(), CompileError> {
        match self.local_slot(name) {
            Some(slot) => self.emit(Opcode::StoreFast, slot),
            None => {
                let slot = self.global_slot(name)?;
                self.emit(Opcode::StoreGlobal, slot)
            }
        };
        Ok(())
    }

    fn block(&mut self, body: &[Stmt]) -> Result<(), CompileError> {
        body.iter().try_for_each(|stmt| self.statement(stmt))
    }

    fn statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        if stmt.line != 0 {
            self.line = stmt.line;
        }
        let line = self.line;
        match &stmt.kind {
            StmtKind::Def(def) => {
                let code = compile_definition(def, &self.filename, line)?;
                let slot = self.constant(Constant::Code(Box::new(code)))?;
                self.emit(Opcode::LoadConst, slot);
                self.emit(Opcode::MakeFunction, 0);
                self.store_name(&def.name)?;
            }
            StmtKind::Return(value) => {
                if self.local_slots.is_none() {
                    return Err(CompileError::ReturnOutsideFunction(line));
                }
                match value {
                    Some(value) => self.expr(value)?,
                    None => {
                        let slot = self.constant(Constant::None)?;
                        self.emit(Opcode::LoadConst, slot);
                    }
                }
                self.emit(Opcode::ReturnValue, 0);
            }
            StmtKind::Assign { target, value } => {
                self.expr(value)?;
                self.store_name(target)?;
            }
            StmtKind::AugAssign { target, op, value } => {
                self.load_name(target)?;
                self.expr(value)?;
                self.emit(binary_opcode(*op), 0);
                self.store_name(target)?;
            }
            StmtKind::If { test, body, orelse } => {
                self.expr(test)?;
                let to_else = self.emit(Opcode::PopJumpIfFalse, 0);
                self.block(body)?;
                if orelse.is_empty() {
                    let end = self.here();
                    self.patch(to_else, end)?;
                } else {
                    let to_end = self.emit(Opcode::JumpAbsolute, 0);
                    let else_start = self.here();
                    self.patch(to_else, else_start)?;
                    self.block(orelse)?;
                    let end = self.here();
                    self.patch(to_end, end)?;
                }
            }
            StmtKind::While { test, body } => {
                let start = self.here();
                self.expr(test)?;
                let exit = self.emit(Opcode::PopJumpIfFalse, 0);
                self.loop_body(LoopKind::While, start, body, exit)?;
            }
            StmtKind::For { target, iter, body } => {
                self.expr(iter)?;
                self.emit(Opcode::GetIter, 0);
                let start = self.emit(Opcode::ForIter, 0);
                self.store_name(target)?;
                self.loop_body(LoopKind::For, start, body, start)?;
            }
            StmtKind::Expr(value) => {
                self.expr(value)?;
                self.emit(Opcode::PopTop, 0);
            }
            StmtKind::Pass => {}
            StmtKind::Break => {
                let Some(innermost) = self.loops.last() else {
                    return Err(CompileError::BreakOutsideLoop(line));
                };
                if matches!(innermost.kind, LoopKind::For) {
                    // leave the loop's iterator behind
                    self.emit(Opcode::PopTop, 0);
                }
                let jump = self.emit(Opcode::JumpAbsolute, 0);
                if let Some(innermost) = self.loops.last_mut() {
                    innermost.break_patches.push(jump);
                }
            }
            StmtKind::Continue => {
                let Some(innermost) = self.loops.last() else {
                    return Err(CompileError::ContinueOutsideLoop(line));
                };
                let target = innermost.continue_target;
                let jump = self.emit(Opcode::JumpAbsolute, 0);
                self.patch(jump, target)?;
            }
        }
        Ok(())
    }

    /// Emits a loop body followed by the back-edge, then resolves `exit` and every `break`
    /// to the first instruction after the loop.
    fn loop_body(
        &mut self,
        kind: LoopKind,
        start: usize,
        body: &[Stmt],
        exit: usize,
    ) -> Result<(), CompileError> {
        self.loops.push(Loop {
            kind,
            continue_target: start,
            break_patches: Vec::new(),
        });
        self.block(body)?;
        let back = self.emit(Opcode::JumpAbsolute, 0);
        self.patch(back, start)?;
        let end = self.here();
        self.patch(exit, end)?;
        if let Some(finished) = self.loops.pop() {
            for at in finished.break_patches {
                self.patch(at, end)?;
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), CompileError> {
        match expr {
            Expr::Int(v) => self.load_constant(Constant::Int(*v))?,
            Expr::Str(s) => self.load_constant(Constant::Str(s.clone()))?,
            Expr::Bool(b) => self.load_constant(Constant::Bool(*b))?,
            Expr::None => self.load_constant(Constant::None)?,
            Expr::Name(id) => self.load_name(id)?,
            Expr::List(items) => {
                for item in items {
                    self.expr(item)?;
                }
                let count = u16::try_from(items.len()).map_err(|_| self.overflow("list items"))?;
                self.emit(Opcode::BuildList, count);
            }
            Expr::Index { value, index } => {
                self.expr(value)?;
                self.expr(index)?;
                self.emit(Opcode::BinarySubscr, 0);
            }
            Expr::Unary { op, operand } => {
                self.expr(operand)?;
                let opcode = match op {
                    UnaryOp::Neg => Opcode::UnaryNegative,
                    UnaryOp::Not => Opcode::UnaryNot,
                };
                self.emit(opcode, 0);
            }
            Expr::Binary { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.emit(binary_opcode(*op), 0);
            }
            Expr::Compare { op, left, right } => {
                self.expr(left)?;
                self.expr(right)?;
                self.emit(Opcode::CompareOp, compare_arg(*op));
            }
            Expr::BoolOp { op, left, right } => {
                self.expr(left)?;
                let opcode = match op {
                    BoolOp::And => Opcode::JumpIfFalseOrPop,
                    BoolOp::Or => Opcode::JumpIfTrueOrPop,
                };
                let jump = self.emit(opcode, 0);
                self.expr(right)?;
                let end = self.here();
                self.patch(jump, end)?;
            }
            Expr::Call { func, args } => {
                self.expr(func)?;
                for arg in args {
                    self.expr(arg)?;
                }
                let argc = u16::try_from(args.len()).map_err(|_| self.overflow("arguments"))?;
                self.emit(Opcode::CallFunction, argc);
            }
        }
        Ok(())
    }

    fn load_constant(&mut self, constant: Constant) -> Result<(), CompileError> {
        let slot = self.constant(constant)?;
        self.emit(Opcode::LoadConst, slot);
        Ok(())
    }

    fn finish(mut self) -> Result<CodeObject, CompileError> {
        let none = self.constant(Constant::None)?;
        self.emit(Opcode::LoadConst, none);
        self.emit(Opcode::ReturnValue, 0);

        if self.instructions.len() > MAX_ARG + 1 {
            return Err(self.overflow("instructions"));
        }
        if self.varnames.len() > MAX_ARG + 1 {
            return Err(self.overflow("locals"));
        }

        let stack_size = max_stack_depth(&self.instructions)?;
        let parts = CodeParts {
            lines: LineTable::compact(&self.lines, self.first_line),
            name: self.name,
            filename: self.filename,
            first_line: self.first_line,
            arg_count: self.arg_count,
            stack_size: stack_size as u32,
            code: encode(&self.instructions),
            constants: self.constants,
            names: self.names,
            varnames: self.varnames,
        };
        Ok(CodeObject::new(parts)?)
    }
}

fn compile_definition(
    def: &Definition,
    filename: &str,
    line: u32,
) -> Result<CodeObject, CompileError> {
    let mut seen = HashSet::new();
    for param in &def.params {
        if !seen.insert(param.as_str()) {
            return Err(CompileError::DuplicateParameter {
                function: def.name.clone(),
                param: param.clone(),
            });
        }
    }

    let mut others: Vec<String> = local_bindings(def)
        .into_iter()
        .filter(|name| !seen.contains(name.as_str()))
        .collect();
    others.sort();
    let mut locals = def.params.clone();
    locals.extend(others);

    let mut unit = Unit::new(&def.name, filename, line, Some(locals));
    let arg_count = u16::try_from(def.params.len()).map_err(|_| unit.overflow("parameters"))?;
    unit.arg_count = arg_count;
    unit.block(&def.body)?;
    unit.finish()
}

const fn binary_opcode(op: BinOp) -> Opcode {
    match op {
        BinOp::Add => Opcode::BinaryAdd,
        BinOp::Sub => Opcode::BinarySubtract,
        BinOp::Mul => Opcode::BinaryMultiply,
        BinOp::FloorDiv => Opcode::BinaryFloorDivide,
        BinOp::Mod => Opcode::BinaryModulo,
    }
}
