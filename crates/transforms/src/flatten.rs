//! Control-flow flattening.
//!
//! Each definition body of N statements becomes
//!
//! ```text
//! _state = 0
//! while _state != -1:
//!     if _state == 0:
//!         <statement 0>
//!         _state = 1
//!     ...
//!     if _state == N - 1:
//!         <statement N - 1>
//!         _state = -1
//! ```
//!
//! A statement that is itself a `return` advances straight to the terminal state. Only
//! the top-level sequence is rewritten; statements with nested blocks move into their
//! branch unchanged. Nested definitions are flattened first, each with its own state
//! variable. An empty body starts in the terminal state so the loop never runs.

use crate::name_mapper::NameMapper;
use crate::{PassContext, Transform};
use murk_core::ast::{CmpOp, Definition, Expr, Module, Stmt, StmtKind, collect_identifiers};
use murk_utils::errors::{FlattenError, TransformError};
use rand::rngs::StdRng;
use tracing::debug;

/// Value of the state variable once every statement has run.
pub const TERMINAL_STATE: i64 = -1;

const STATE_PREFIX: &str = "_";
const STATE_SUFFIX_LEN: usize = 5;

/// Rewrites every definition body as a state-driven dispatcher loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlFlowFlattener;

impl Transform for ControlFlowFlattener {
    fn name(&self) -> &'static str {
        "ControlFlowFlattener"
    }

    fn apply(&self, module: &mut Module, ctx: &mut PassContext) -> Result<bool, TransformError> {
        let mut states = NameMapper::new(STATE_PREFIX, STATE_SUFFIX_LEN);
        states.mark_taken(collect_identifiers(module));

        let mut flattened = 0;
        for stmt in &mut module.body {
            flattened += flatten_in(stmt, &mut states, &mut ctx.rng)?;
        }
        debug!("flattened {flattened} definitions");
        Ok(flattened > 0)
    }
}

/// Flattens every definition reachable from `stmt` without crossing into another
/// definition's dispatcher. Returns the number of definitions rewritten.
fn flatten_in(
    stmt: &mut Stmt,
    states: &mut NameMapper,
    rng: &mut StdRng,
) -> Result<usize, FlattenError> {
    match &mut stmt.kind {
        StmtKind::Def(def) => {
            let mut count = 0;
            for inner in &mut def.body {
                count += flatten_in(inner, states, rng)?;
            }
            let state = states.fresh(rng)?;
            flatten_definition(def, &state)?;
            Ok(count + 1)
        }
        StmtKind::If { body, orelse, .. } => {
            let mut count = 0;
            for inner in body.iter_mut().chain(orelse.iter_mut()) {
                count += flatten_in(inner, states, rng)?;
            }
            Ok(count)
        }
        StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
            let mut count = 0;
            for inner in body {
                count += flatten_in(inner, states, rng)?;
            }
            Ok(count)
        }
        _ => Ok(0),
    }
}

/// Replaces `def.body` with its dispatcher encoding driven by `state`.
///
/// Fails without touching `def` when a top-level statement holds a `break` or `continue`
/// that no loop inside it encloses, since the dispatcher loop would capture it.
pub fn flatten_definition(def: &mut Definition, state: &str) -> Result<(), FlattenError> {
    if let Some((line, keyword)) = def.body.iter().find_map(stray_loop_control) {
        return Err(FlattenError::LoopControlOutsideLoop {
            definition: def.name.clone(),
            line,
            keyword,
        });
    }
    let body = std::mem::take(&mut def.body);
    let count = body.len() as i64;
    let initial = if body.is_empty() { TERMINAL_STATE } else { 0 };

    let mut branches = Vec::with_capacity(body.len());
    for (k, stmt) in (0_i64..).zip(body) {
        let next = if stmt.is_return() || k + 1 == count {
            TERMINAL_STATE
        } else {
            k + 1
        };
        let test = Expr::compare(CmpOp::Eq, Expr::name(state), Expr::Int(k));
        branches.push(Stmt::synthetic(StmtKind::If {
            test,
            body: vec![stmt, assign_state(state, next)],
            orelse: Vec::new(),
        }));
    }
    if branches.is_empty() {
        branches.push(Stmt::synthetic(StmtKind::Pass));
    }

    def.body = vec![
        assign_state(state, initial),
        Stmt::synthetic(StmtKind::While {
            test: Expr::compare(CmpOp::NotEq, Expr::name(state), Expr::Int(TERMINAL_STATE)),
            body: branches,
        }),
    ];
    verify_dispatch(def, state, count)?;
    debug!("'{}': {count} states on {state}", def.name);
    Ok(())
}

/// Finds a `break` or `continue` in `stmt` that is not inside a loop of `stmt` itself.
fn stray_loop_control(stmt: &Stmt) -> Option<(u32, &'static str)> {
    match &stmt.kind {
        StmtKind::Break => Some((stmt.line, "break")),
        StmtKind::Continue => Some((stmt.line, "continue")),
        StmtKind::If { body, orelse, .. } => body.iter().chain(orelse).find_map(stray_loop_control),
        _ => None,
    }
}

fn assign_state(state: &str, value: i64) -> Stmt {
    Stmt::synthetic(StmtKind::Assign {
        target: state.to_string(),
        value: Expr::Int(value),
    })
}

/// Checks that states `0..count` each own exactly one branch and that every branch advances
/// to its successor, or to the terminal state after the last statement or a `return`.
fn verify_dispatch(def: &Definition, state: &str, count: i64) -> Result<(), FlattenError> {
    let unreachable = |k: i64| FlattenError::UnreachableState {
        definition: def.name.clone(),
        state: k,
    };
    let Some(Stmt {
        kind: StmtKind::While { body: branches, .. },
        ..
    }) = def.body.get(1)
    else {
        return Err(unreachable(0));
    };

    let mut seen = vec![false; count as usize];
    for branch in branches {
        let StmtKind::If { test, body, .. } = &branch.kind else {
            continue;
        };
        let Some(k) = state_guard(test, state) else {
            continue;
        };
        let slot = usize::try_from(k)
            .ok()
            .and_then(|k| seen.get_mut(k))
            .ok_or_else(|| unreachable(k))?;
        if std::mem::replace(slot, true) {
            return Err(unreachable(k));
        }

        let (Some(original), Some(advance)) = (body.first(), body.last()) else {
            return Err(unreachable(k));
        };
        let next = match &advance.kind {
            StmtKind::Assign {
                target,
                value: Expr::Int(next),
            } if target == state => *next,
            _ => return Err(unreachable(k)),
        };
        let expected = if original.is_return() || k + 1 == count {
            TERMINAL_STATE
        } else {
            k + 1
        };
        if next != expected {
            return Err(FlattenError::BrokenChain {
                definition: def.name.clone(),
                state: k,
                next,
                expected,
            });
        }
    }

    match seen.iter().position(|covered| !covered) {
        Some(missing) => Err(unreachable(missing as i64)),
        None => Ok(()),
    }
}

fn state_guard(test: &Expr, state: &str) -> Option<i64> {
    match test {
        Expr::Compare {
            op: CmpOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (Expr::Name(name), Expr::Int(k)) if name == state => Some(*k),
            _ => None,
        },
        _ => None,
    }
}
