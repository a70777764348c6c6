//! Stack-machine interpreter for [`CodeObject`]s.
//!
//! The interpreter is the loader for compiled artifacts: it executes a module's top-level
//! code, keeps the resulting globals, and can then call any function the module defined.
//! Output of `print` is captured so that two runs can be compared line for line.

use crate::builtins::Builtin;
use crate::code::{CodeObject, Constant};
use crate::decoder::decode_instructions;
use crate::opcode::{Opcode, compare_from_arg};
use crate::ast::CmpOp;
use murk_utils::errors::VmError;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

/// Call depth at which execution is aborted.
pub const DEFAULT_RECURSION_LIMIT: usize = 200;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    List(Rc<Vec<Value>>),
    Range { start: i64, stop: i64, step: i64 },
    /// An unbound code constant, before `MAKE_FUNCTION`.
    Code(Rc<CodeObject>),
    Function(Rc<CodeObject>),
    Builtin(Builtin),
    Iter(Box<IterState>),
}

/// Position of an in-progress `for` loop.
#[derive(Debug, Clone)]
pub enum IterState {
    Range { next: i64, stop: i64, step: i64 },
    Items { items: Rc<Vec<Value>>, pos: usize },
    Chars { text: Rc<str>, pos: usize },
}

impl Iterator for IterState {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self {
            Self::Range { next, stop, step } => {
                let more = if *step > 0 { *next < *stop } else { *next > *stop };
                if !more {
                    return None;
                }
                let value = *next;
                // saturation ends the loop on the following call
                *next = next.saturating_add(*step);
                if *next == value {
                    *next = *stop;
                }
                Some(Value::Int(value))
            }
            Self::Items { items, pos } => {
                let value = items.get(*pos)?.clone();
                *pos += 1;
                Some(value)
            }
            Self::Chars { text, pos } => {
                let c = text[*pos..].chars().next()?;
                *pos += c.len_utf8();
                Some(Value::Str(Rc::from(c.to_string())))
            }
        }
    }
}

impl Value {
    pub fn str(text: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(text.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Self {
        Self::List(Rc::new(items))
    }

    /// Type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "NoneType",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Range { .. } => "range",
            Self::Code(_) => "code",
            Self::Function(_) => "function",
            Self::Builtin(_) => "builtin_function",
            Self::Iter(_) => "iterator",
        }
    }

    /// Truth value used by conditions.
    pub fn truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Int(v) => *v != 0,
            Self::Str(s) => !s.is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Range { .. } => range_len(self) > 0,
            _ => true,
        }
    }

    /// Integer view of ints and bools.
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    /// Quoted form used inside containers.
    pub fn repr(&self) -> String {
        match self {
            Self::Str(s) => {
                let mut out = String::from("'");
                for c in s.chars() {
                    match c {
                        '\\' => out.push_str("\\\\"),
                        '\'' => out.push_str("\\'"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        other => out.push(other),
                    }
                }
                out.push('\'');
                out
            }
            other => other.to_string(),
        }
    }

    pub(crate) fn iterate(&self, line: u32) -> Result<IterState, VmError> {
        match self {
            Self::List(items) => Ok(IterState::Items {
                items: Rc::clone(items),
                pos: 0,
            }),
            Self::Str(text) => Ok(IterState::Chars {
                text: Rc::clone(text),
                pos: 0,
            }),
            Self::Range { start, stop, step } => Ok(IterState::Range {
                next: *start,
                stop: *stop,
                step: *step,
            }),
            Self::Iter(state) => Ok((**state).clone()),
            other => Err(VmError::TypeError {
                line,
                message: format!("'{}' object is not iterable", other.type_name()),
            }),
        }
    }
}

pub(crate) fn range_len(value: &Value) -> usize {
    let Value::Range { start, stop, step } = *value else {
        return 0;
    };
    let (span, step) = if step > 0 {
        (i128::from(stop) - i128::from(start), i128::from(step))
    } else {
        (i128::from(start) - i128::from(stop), -i128::from(step))
    };
    if span <= 0 {
        0
    } else {
        usize::try_from((span + step - 1) / step).unwrap_or(usize::MAX)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Range { .. }, Self::Range { .. }) => {
                let (a, b) = (self.iterate(0), other.iterate(0));
                match (a, b) {
                    (Ok(a), Ok(b)) => a.eq(b),
                    _ => false,
                }
            }
            (Self::Function(a), Self::Function(b)) | (Self::Code(a), Self::Code(b)) => {
                Rc::ptr_eq(a, b)
            }
            (Self::Builtin(a), Self::Builtin(b)) => a == b,
            (a, b) => match (a.as_int(), b.as_int()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(true) => f.write_str("True"),
            Self::Bool(false) => f.write_str("False"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => f.write_str(s),
            Self::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    f.write_str(&item.repr())?;
                }
                f.write_str("]")
            }
            Self::Range { start, stop, step } if *step == 1 => write!(f, "range({start}, {stop})"),
            Self::Range { start, stop, step } => write!(f, "range({start}, {stop}, {step})"),
            Self::Code(code) => write!(f, "<code {}>", code.name()),
            Self::Function(code) => write!(f, "<function {}>", code.name()),
            Self::Builtin(b) => write!(f, "<built-in function {}>", b.name()),
            Self::Iter(_) => f.write_str("<iterator>"),
        }
    }
}

/// Orders two values the way `<` and friends do.
pub(crate) fn compare_order(a: &Value, b: &Value, line: u32) -> Result<Ordering, VmError> {
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x.cmp(y)),
        (Value::List(x), Value::List(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                if l != r {
                    return compare_order(l, r, line);
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => match (a.as_int(), b.as_int()) {
            (Some(x), Some(y)) => Ok(x.cmp(&y)),
            _ => Err(VmError::TypeError {
                line,
                message: format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    a.type_name(),
                    b.type_name()
                ),
            }),
        },
    }
}

/// Executes code objects against a shared global namespace.
#[derive(Debug)]
pub struct Vm {
    globals: HashMap<String, Value>,
    output: Vec<String>,
    echo: bool,
    depth: usize,
    recursion_limit: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

impl Vm {
    /// VM with empty globals and the default recursion limit.
    pub fn new() -> Self {
        Self {
            globals: HashMap::new(),
            output: Vec::new(),
            echo: false,
            depth: 0,
            recursion_limit: DEFAULT_RECURSION_LIMIT,
        }
    }

    /// Also writes printed lines to standard output as they are produced.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    /// Overrides the call depth limit.
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = limit;
        self
    }

    /// Runs a module's top-level code.
    pub fn run(&mut self, module: &CodeObject) -> Result<(), VmError> {
        let module = Rc::new(module.clone());
        self.execute(&module, None).map(|_| ())
    }

    /// Calls a global function by name.
    pub fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Value, VmError> {
        let callee = self
            .globals
            .get(name)
            .cloned()
            .or_else(|| Builtin::from_name(name).map(Value::Builtin))
            .ok_or_else(|| VmError::NameError {
                line: 0,
                name: name.to_string(),
            })?;
        self.invoke(callee, args, 0)
    }

    /// Global bound to `name`, if any.
    pub fn global(&self, name: &str) -> Option<&Value> {
        self.globals.get(name)
    }

    /// Lines printed so far.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    /// Drains captured `print` lines.
    pub fn take_output(&mut self) -> Vec<String> {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn emit_line(&mut self, line: String) {
        if self.echo {
            println!("{line}");
        }
        self.output.push(line);
    }

    fn invoke(&mut self, callee: Value, args: Vec<Value>, line: u32) -> Result<Value, VmError> {
        match callee {
            Value::Function(code) => {
                let expected = usize::from(code.arg_count());
                if args.len() != expected {
                    return Err(VmError::TypeError {
                        line,
                        message: format!(
                            "{}() takes {} positional arguments but {} were given",
                            code.name(),
                            expected,
                            args.len()
                        ),
                    });
                }
                if self.depth >= self.recursion_limit {
                    return Err(VmError::RecursionLimit(line));
                }
                let mut locals: Vec<Option<Value>> = vec![None; code.varnames().len()];
                for (slot, arg) in locals.iter_mut().zip(args) {
                    *slot = Some(arg);
                }
                self.depth += 1;
                let result = self.execute(&code, Some(locals));
                self.depth -= 1;
                result
            }
            Value::Builtin(builtin) => builtin.call(self, args, line),
            other => Err(VmError::TypeError {
                line,
                message: format!("'{}' object is not callable", other.type_name()),
            }),
        }
    }

    /// Runs one frame. `locals` is `None` for module scope, where fast locals do not exist.
    fn execute(
        &mut self,
        code: &Rc<CodeObject>,
        mut locals: Option<Vec<Option<Value>>>,
    ) -> Result<Value, VmError> {
        let instructions =
            decode_instructions(code.code()).map_err(|source| VmError::Malformed {
                unit: code.name().to_string(),
                source,
            })?;
        let lines = code.lines().normalized(code.first_line());
        let bound = code.stack_size() as usize;
        let mut stack: Vec<Value> = Vec::with_capacity(bound);
        let mut pc = 0;

        macro_rules! push {
            ($value:expr) => {{
                if stack.len() >= bound {
                    return Err(VmError::StackBoundExceeded {
                        unit: code.name().to_string(),
                        bound,
                    });
                }
                stack.push($value);
            }};
        }

        while let Some(ins) = instructions.get(pc) {
            let line = match lines.partition_point(|entry| entry.start <= pc) {
                0 => code.first_line(),
                n => lines[n - 1].line,
            };
            let slot = usize::from(ins.arg);
            pc += 1;
            match ins.opcode {
                Opcode::Nop => {}
                Opcode::PopTop => {
                    pop(&mut stack, code)?;
                }
                Opcode::LoadConst => {
                    let value = match &code.constants()[slot] {
                        Constant::None => Value::None,
                        Constant::Bool(b) => Value::Bool(*b),
                        Constant::Int(v) => Value::Int(*v),
                        Constant::Str(s) => Value::str(s),
                        Constant::Code(nested) => Value::Code(Rc::new((**nested).clone())),
                    };
                    push!(value);
                }
                Opcode::LoadFast => {
                    let value = locals
                        .as_ref()
                        .and_then(|l| l.get(slot).cloned().flatten())
                        .ok_or_else(|| VmError::UnboundLocal {
                            line,
                            name: code.varnames()[slot].clone(),
                        })?;
                    push!(value);
                }
                Opcode::StoreFast => {
                    let value = pop(&mut stack, code)?;
                    if let Some(target) = locals.as_mut().and_then(|l| l.get_mut(slot)) {
                        *target = Some(value);
                    }
                }
                Opcode::LoadGlobal => {
                    let name = &code.names()[slot];
                    let value = self
                        .globals
                        .get(name)
                        .cloned()
                        .or_else(|| Builtin::from_name(name).map(Value::Builtin))
                        .ok_or_else(|| VmError::NameError {
                            line,
                            name: name.clone(),
                        })?;
                    push!(value);
                }
                Opcode::StoreGlobal => {
                    let value = pop(&mut stack, code)?;
                    self.globals.insert(code.names()[slot].clone(), value);
                }
                Opcode::UnaryNegative => {
                    let value = pop(&mut stack, code)?;
                    let result = match value.as_int() {
                        Some(v) => Value::Int(v.checked_neg().ok_or(VmError::Overflow(line))?),
                        None => {
                            return Err(VmError::TypeError {
                                line,
                                message: format!(
                                    "bad operand type for unary -: '{}'",
                                    value.type_name()
                                ),
                            });
                        }
                    };
                    push!(result);
                }
                Opcode::UnaryNot => {
                    let value = pop(&mut stack, code)?;
                    push!(Value::Bool(!value.truthy()));
                }
                Opcode::BinaryAdd
                | Opcode::BinarySubtract
                | Opcode::BinaryMultiply
                | Opcode::BinaryFloorDivide
                | Opcode::BinaryModulo => {
                    let right = pop(&mut stack, code)?;
                    let left = pop(&mut stack, code)?;
                    push!(binary(ins.opcode, &left, &right, line)?);
                }
                Opcode::CompareOp => {
                    let right = pop(&mut stack, code)?;
                    let left = pop(&mut stack, code)?;
                    let op = compare_from_arg(ins.arg).unwrap_or(CmpOp::Eq);
                    let result = match op {
                        CmpOp::Eq => left == right,
                        CmpOp::NotEq => left != right,
                        CmpOp::Lt => compare_order(&left, &right, line)?.is_lt(),
                        CmpOp::LtE => compare_order(&left, &right, line)?.is_le(),
                        CmpOp::Gt => compare_order(&left, &right, line)?.is_gt(),
                        CmpOp::GtE => compare_order(&left, &right, line)?.is_ge(),
                    };
                    push!(Value::Bool(result));
                }
                Opcode::BuildList => {
                    let at = stack.len().checked_sub(slot).ok_or_else(|| underflow(code))?;
                    let items = stack.split_off(at);
                    push!(Value::list(items));
                }
                Opcode::BinarySubscr => {
                    let index = pop(&mut stack, code)?;
                    let value = pop(&mut stack, code)?;
                    push!(subscript(&value, &index, line)?);
                }
                Opcode::JumpAbsolute => pc = slot,
                Opcode::PopJumpIfFalse => {
                    if !pop(&mut stack, code)?.truthy() {
                        pc = slot;
                    }
                }
                Opcode::PopJumpIfTrue => {
                    if pop(&mut stack, code)?.truthy() {
                        pc = slot;
                    }
                }
                Opcode::JumpIfFalseOrPop | Opcode::JumpIfTrueOrPop => {
                    let top = stack.last().ok_or_else(|| underflow(code))?;
                    let jump_when = ins.opcode == Opcode::JumpIfTrueOrPop;
                    if top.truthy() == jump_when {
                        pc = slot;
                    } else {
                        stack.pop();
                    }
                }
                Opcode::GetIter => {
                    let value = pop(&mut stack, code)?;
                    push!(Value::Iter(Box::new(value.iterate(line)?)));
                }
                Opcode::ForIter => {
                    let next = match stack.last_mut() {
                        Some(Value::Iter(state)) => state.next(),
                        _ => return Err(underflow(code)),
                    };
                    match next {
                        Some(value) => push!(value),
                        None => {
                            stack.pop();
                            pc = slot;
                        }
                    }
                }
                Opcode::CallFunction => {
                    let at = stack.len().checked_sub(slot).ok_or_else(|| underflow(code))?;
                    let args = stack.split_off(at);
                    let callee = pop(&mut stack, code)?;
                    let result = self.invoke(callee, args, line)?;
                    push!(result);
                }
                Opcode::MakeFunction => match pop(&mut stack, code)? {
                    Value::Code(body) => push!(Value::Function(body)),
                    other => {
                        return Err(VmError::TypeError {
                            line,
                            message: format!("cannot make a function from '{}'", other.type_name()),
                        });
                    }
                },
                Opcode::ReturnValue => return pop(&mut stack, code),
            }
        }
        Ok(Value::None)
    }
}

fn underflow(code: &CodeObject) -> VmError {
    VmError::Malformed {
        unit: code.name().to_string(),
        source: murk_utils::errors::CodeError::InconsistentStack(0),
    }
}

fn pop(stack: &mut Vec<Value>, code: &CodeObject) -> Result<Value, VmError> {
    stack.pop().ok_or_else(|| underflow(code))
}

fn binary(opcode: Opcode, left: &Value, right: &Value, line: u32) -> Result<Value, VmError> {
    if let (Some(a), Some(b)) = (left.as_int(), right.as_int()) {
        let result = match opcode {
            Opcode::BinaryAdd => a.checked_add(b),
            Opcode::BinarySubtract => a.checked_sub(b),
            Opcode::BinaryMultiply => a.checked_mul(b),
            Opcode::BinaryFloorDivide | Opcode::BinaryModulo if b == 0 => {
                return Err(VmError::ZeroDivision(line));
            }
            Opcode::BinaryFloorDivide => a.checked_div(b).map(|q| {
                if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
            }),
            _ => a.checked_rem(b).map(|r| {
                if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
            }),
        };
        return result.map(Value::Int).ok_or(VmError::Overflow(line));
    }

    match (opcode, left, right) {
        (Opcode::BinaryAdd, Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{a}{b}"))),
        (Opcode::BinaryAdd, Value::List(a), Value::List(b)) => {
            Ok(Value::list(a.iter().chain(b.iter()).cloned().collect()))
        }
        (Opcode::BinaryMultiply, Value::Str(s), n) | (Opcode::BinaryMultiply, n, Value::Str(s))
            if n.as_int().is_some() =>
        {
            let times = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
            Ok(Value::str(s.repeat(times)))
        }
        (Opcode::BinaryMultiply, Value::List(items), n)
        | (Opcode::BinaryMultiply, n, Value::List(items))
            if n.as_int().is_some() =>
        {
            let times = usize::try_from(n.as_int().unwrap_or(0)).unwrap_or(0);
            let mut out = Vec::with_capacity(items.len() * times);
            for _ in 0..times {
                out.extend(items.iter().cloned());
            }
            Ok(Value::list(out))
        }
        _ => {
            let symbol = match opcode {
                Opcode::BinaryAdd => "+",
                Opcode::BinarySubtract => "-",
                Opcode::BinaryMultiply => "*",
                Opcode::BinaryFloorDivide => "//",
                _ => "%",
            };
            Err(VmError::TypeError {
                line,
                message: format!(
                    "unsupported operand type(s) for {symbol}: '{}' and '{}'",
                    left.type_name(),
                    right.type_name()
                ),
            })
        }
    }
}

fn subscript(value: &Value, index: &Value, line: u32) -> Result<Value, VmError> {
    let Some(i) = index.as_int() else {
        return Err(VmError::TypeError {
            line,
            message: format!("indices must be integers, not '{}'", index.type_name()),
        });
    };
    let resolve = |len: usize| -> Result<usize, VmError> {
        let len = i64::try_from(len).map_err(|_| VmError::IndexError(line))?;
        let at = if i < 0 { i + len } else { i };
        if (0..len).contains(&at) {
            Ok(at as usize)
        } else {
            Err(VmError::IndexError(line))
        }
    };
    match value {
        Value::List(items) => Ok(items[resolve(items.len())?].clone()),
        Value::Str(s) => {
            let count = s.chars().count();
            let at = resolve(count)?;
            Ok(s.chars().nth(at).map(|c| Value::str(c.to_string())).unwrap_or(Value::None))
        }
        Value::Range { start, step, .. } => {
            let at = resolve(range_len(value))?;
            Ok(Value::Int(start + step * at as i64))
        }
        other => Err(VmError::TypeError {
            line,
            message: format!("'{}' object is not subscriptable", other.type_name()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::parser::parse;

    fn run(source: &str) -> Result<Vec<String>, VmError> {
        let code = compile(&parse(source).unwrap(), "test.mk").unwrap();
        let mut vm = Vm::new();
        vm.run(&code)?;
        Ok(vm.take_output())
    }

    #[test]
    fn sums_a_range() {
        let out = run("total = 0\nfor i in range(1, 11):\n    total += i\nprint(total)\n").unwrap();
        assert_eq!(out, vec!["55"]);
    }

    #[test]
    fn floor_division_and_modulo_round_toward_negative_infinity() {
        let out = run("print(-7 // 2, -7 % 2, 7 // -2, 7 % -2)\n").unwrap();
        assert_eq!(out, vec!["-4 1 -4 -1"]);
    }

    #[test]
    fn functions_and_recursion() {
        let source = "def fact(n):\n    if n <= 1:\n        return 1\n    return n * fact(n - 1)\nprint(fact(10))\n";
        assert_eq!(run(source).unwrap(), vec!["3628800"]);
    }

    #[test]
    fn short_circuit_returns_operand() {
        let out = run("print(0 or 'x', 1 and [], None or None)\n").unwrap();
        assert_eq!(out, vec!["x [] None"]);
    }

    #[test]
    fn loops_honor_break_and_continue() {
        let source = "out = []\nfor i in range(10):\n    if i == 6:\n        break\n    if i % 2 == 0:\n        continue\n    out = out + [i]\nprint(out)\n";
        assert_eq!(run(source).unwrap(), vec!["[1, 3, 5]"]);
    }

    #[test]
    fn errors_carry_line_numbers() {
        assert_eq!(run("x = 1\ny = x // 0\n"), Err(VmError::ZeroDivision(2)));
        assert!(matches!(
            run("print(missing)\n"),
            Err(VmError::NameError { line: 1, .. })
        ));
    }

    #[test]
    fn unbound_local_is_reported() {
        let source = "def f():\n    if False:\n        x = 1\n    return x\nf()\n";
        assert!(matches!(run(source), Err(VmError::UnboundLocal { line: 4, .. })));
    }

    #[test]
    fn call_invokes_a_defined_function() {
        let code = compile(&parse("def add(a, b):\n    return a + b\n").unwrap(), "t").unwrap();
        let mut vm = Vm::new();
        vm.run(&code).unwrap();
        let result = vm.call("add", vec![Value::Int(2), Value::Int(3)]).unwrap();
        assert_eq!(result, Value::Int(5));
    }

    #[test]
    fn runaway_recursion_is_stopped() {
        let source = "def f(n):\n    return f(n + 1)\nf(0)\n";
        assert!(matches!(run(source), Err(VmError::RecursionLimit(_))));
    }

    #[test]
    fn strings_and_lists_are_indexable() {
        let out = run("s = 'hello'\nl = [1, 2, 3]\nprint(s[1], s[-1], l[-2], range(0, 10, 3)[2])\n").unwrap();
        assert_eq!(out, vec!["e o 2 6"]);
    }
}
