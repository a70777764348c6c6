//! Built-in functions available to every murk program.

use crate::vm::{Value, Vm, compare_order, range_len};
use murk_utils::errors::VmError;

/// Names resolved as built-ins when no global of the same name exists.
pub const BUILTIN_NAMES: &[&str] = &[
    "print", "range", "len", "str", "int", "abs", "min", "max", "bool", "list",
];

/// Returns true if `name` is a built-in function.
pub fn is_builtin(name: &str) -> bool {
    BUILTIN_NAMES.contains(&name)
}

/// A built-in function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Print,
    Range,
    Len,
    Str,
    Int,
    Abs,
    Min,
    Max,
    Bool,
    List,
}

impl Builtin {
    /// Looks up a built-in by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "print" => Self::Print,
            "range" => Self::Range,
            "len" => Self::Len,
            "str" => Self::Str,
            "int" => Self::Int,
            "abs" => Self::Abs,
            "min" => Self::Min,
            "max" => Self::Max,
            "bool" => Self::Bool,
            "list" => Self::List,
            _ => return None,
        })
    }

    /// Name the built-in is bound to.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Range => "range",
            Self::Len => "len",
            Self::Str => "str",
            Self::Int => "int",
            Self::Abs => "abs",
            Self::Min => "min",
            Self::Max => "max",
            Self::Bool => "bool",
            Self::List => "list",
        }
    }

    pub(crate) fn call(self, vm: &mut Vm, args: Vec<Value>, line: u32) -> Result<Value, VmError> {
        let type_error = |message: String| VmError::TypeError { line, message };
        let arity = |min: usize, max: usize| -> Result<(), VmError> {
            if (min..=max).contains(&args.len()) {
                Ok(())
            } else {
                Err(type_error(format!(
                    "{}() takes {} arguments ({} given)",
                    self.name(),
                    if min == max {
                        min.to_string()
                    } else {
                        format!("{min} to {max}")
                    },
                    args.len()
                )))
            }
        };

        match self {
            Self::Print => {
                let text = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                vm.emit_line(text);
                Ok(Value::None)
            }
            Self::Range => {
                arity(1, 3)?;
                let mut bounds = Vec::with_capacity(3);
                for arg in &args {
                    bounds.push(arg.as_int().ok_or_else(|| {
                        type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            arg.type_name()
                        ))
                    })?);
                }
                let (start, stop, step) = match bounds.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step, ..] => (*start, *stop, *step),
                    [] => (0, 0, 1),
                };
                if step == 0 {
                    return Err(VmError::ValueError {
                        line,
                        message: "range() arg 3 must not be zero".to_string(),
                    });
                }
                Ok(Value::Range { start, stop, step })
            }
            Self::Len => {
                arity(1, 1)?;
                let len = match &args[0] {
                    Value::Str(s) => s.chars().count(),
                    Value::List(items) => items.len(),
                    range @ Value::Range { .. } => range_len(range),
                    other => {
                        return Err(type_error(format!(
                            "object of type '{}' has no len()",
                            other.type_name()
                        )));
                    }
                };
                i64::try_from(len).map(Value::Int).map_err(|_| VmError::Overflow(line))
            }
            Self::Str => {
                arity(0, 1)?;
                Ok(Value::str(args.first().map(ToString::to_string).unwrap_or_default()))
            }
            Self::Int => {
                arity(0, 1)?;
                match args.first() {
                    None => Ok(Value::Int(0)),
                    Some(Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
                        VmError::ValueError {
                            line,
                            message: format!("invalid literal for int(): '{s}'"),
                        }
                    }),
                    Some(other) => other.as_int().map(Value::Int).ok_or_else(|| {
                        type_error(format!(
                            "int() argument must be a string or a number, not '{}'",
                            other.type_name()
                        ))
                    }),
                }
            }
            Self::Abs => {
                arity(1, 1)?;
                let v = args[0].as_int().ok_or_else(|| {
                    type_error(format!("bad operand type for abs(): '{}'", args[0].type_name()))
                })?;
                v.checked_abs().map(Value::Int).ok_or(VmError::Overflow(line))
            }
            Self::Min | Self::Max => {
                if args.is_empty() {
                    return Err(type_error(format!("{} expected 1 argument, got 0", self.name())));
                }
                let candidates: Vec<Value> = if args.len() == 1 {
                    args[0].iterate(line)?.collect()
                } else {
                    args
                };
                let mut best: Option<Value> = None;
                for candidate in candidates {
                    best = Some(match best {
                        None => candidate,
                        Some(current) => {
                            let order = compare_order(&candidate, &current, line)?;
                            let better = if self == Self::Min {
                                order.is_lt()
                            } else {
                                order.is_gt()
                            };
                            if better { candidate } else { current }
                        }
                    });
                }
                best.ok_or_else(|| VmError::ValueError {
                    line,
                    message: format!("{}() arg is an empty sequence", self.name()),
                })
            }
            Self::Bool => {
                arity(0, 1)?;
                Ok(Value::Bool(args.first().is_some_and(Value::truthy)))
            }
            Self::List => {
                arity(0, 1)?;
                match args.first() {
                    None => Ok(Value::list(Vec::new())),
                    Some(value) => Ok(Value::list(value.iterate(line)?.collect())),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_resolves() {
        for name in BUILTIN_NAMES {
            let builtin = Builtin::from_name(name).unwrap();
            assert_eq!(builtin.name(), *name);
        }
        assert!(Builtin::from_name("open").is_none());
    }

    #[test]
    fn min_max_accept_iterables_and_varargs() {
        let mut vm = Vm::new();
        let items = Value::list(vec![Value::Int(3), Value::Int(-1), Value::Int(7)]);
        assert_eq!(Builtin::Min.call(&mut vm, vec![items.clone()], 1), Ok(Value::Int(-1)));
        assert_eq!(
            Builtin::Max.call(&mut vm, vec![Value::Int(2), Value::Int(9)], 1),
            Ok(Value::Int(9))
        );
        assert!(matches!(
            Builtin::Max.call(&mut vm, vec![Value::list(Vec::new())], 4),
            Err(VmError::ValueError { line: 4, .. })
        ));
    }

    #[test]
    fn range_rejects_zero_step() {
        let mut vm = Vm::new();
        let args = vec![Value::Int(0), Value::Int(5), Value::Int(0)];
        assert!(matches!(
            Builtin::Range.call(&mut vm, args, 2),
            Err(VmError::ValueError { line: 2, .. })
        ));
    }

    #[test]
    fn print_is_captured() {
        let mut vm = Vm::new();
        let args = vec![Value::str("a"), Value::Int(1), Value::list(vec![Value::str("b")])];
        Builtin::Print.call(&mut vm, args, 1).unwrap();
        assert_eq!(vm.output(), ["a 1 ['b']"]);
    }
}
