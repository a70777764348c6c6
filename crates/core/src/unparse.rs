//! Renders a syntax tree back to canonical murk source.

use crate::ast::{BoolOp, Expr, Module, Stmt, StmtKind, UnaryOp};

const INDENT: &str = "    ";

/// Produces source text that re-parses to an equivalent tree.
pub fn unparse(module: &Module) -> String {
    let mut out = String::new();
    for (i, stmt) in module.body.iter().enumerate() {
        let is_def = matches!(stmt.kind, StmtKind::Def(_));
        if is_def && i > 0 && !out.ends_with("\n\n") {
            out.push('\n');
        }
        write_stmt(&mut out, stmt, 0);
        if is_def && i + 1 < module.body.len() {
            out.push('\n');
        }
    }
    out
}

fn write_block(out: &mut String, body: &[Stmt], depth: usize) {
    if body.is_empty() {
        push_line(out, depth, "pass");
        return;
    }
    for stmt in body {
        write_stmt(out, stmt, depth);
    }
}

fn push_line(out: &mut String, depth: usize, text: &str) {
    for _ in 0..depth {
        out.push_str(INDENT);
    }
    out.push_str(text);
    out.push('\n');
}

fn write_stmt(out: &mut String, stmt: &Stmt, depth: usize) {
    match &stmt.kind {
        StmtKind::Def(def) => {
            push_line(out, depth, &format!("def {}({}):", def.name, def.params.join(", ")));
            write_block(out, &def.body, depth + 1);
        }
        StmtKind::Return(None) => push_line(out, depth, "return"),
        StmtKind::Return(Some(value)) => {
            push_line(out, depth, &format!("return {}", expr(value, 0)));
        }
        StmtKind::Assign { target, value } => {
            push_line(out, depth, &format!("{target} = {}", expr(value, 0)));
        }
        StmtKind::AugAssign { target, op, value } => {
            push_line(
                out,
                depth,
                &format!("{target} {}= {}", op.symbol(), expr(value, 0)),
            );
        }
        StmtKind::If { .. } => write_if(out, stmt, depth, "if"),
        StmtKind::While { test, body } => {
            push_line(out, depth, &format!("while {}:", expr(test, 0)));
            write_block(out, body, depth + 1);
        }
        StmtKind::For { target, iter, body } => {
            push_line(out, depth, &format!("for {target} in {}:", expr(iter, 0)));
            write_block(out, body, depth + 1);
        }
        StmtKind::Expr(value) => push_line(out, depth, &expr(value, 0)),
        StmtKind::Pass => push_line(out, depth, "pass"),
        StmtKind::Break => push_line(out, depth, "break"),
        StmtKind::Continue => push_line(out, depth, "continue"),
    }
}

fn write_if(out: &mut String, stmt: &Stmt, depth: usize, keyword: &str) {
    let StmtKind::If { test, body, orelse } = &stmt.kind else {
        return;
    };
    push_line(out, depth, &format!("{keyword} {}:", expr(test, 0)));
    write_block(out, body, depth + 1);
    match orelse.as_slice() {
        [] => {}
        [nested] if matches!(nested.kind, StmtKind::If { .. }) => {
            write_if(out, nested, depth, "elif");
        }
        _ => {
            push_line(out, depth, "else:");
            write_block(out, orelse, depth + 1);
        }
    }
}

// Binding strength, loosest first.
const PREC_OR: u8 = 1;
const PREC_AND: u8 = 2;
const PREC_NOT: u8 = 3;
const PREC_CMP: u8 = 4;
const PREC_ARITH: u8 = 5;
const PREC_TERM: u8 = 6;
const PREC_UNARY: u8 = 7;
const PREC_POSTFIX: u8 = 8;
const PREC_ATOM: u8 = 9;

fn precedence(e: &Expr) -> u8 {
    match e {
        Expr::BoolOp { op: BoolOp::Or, .. } => PREC_OR,
        Expr::BoolOp { op: BoolOp::And, .. } => PREC_AND,
        Expr::Unary { op: UnaryOp::Not, .. } => PREC_NOT,
        Expr::Compare { .. } => PREC_CMP,
        Expr::Binary { op, .. } => match op {
            crate::ast::BinOp::Add | crate::ast::BinOp::Sub => PREC_ARITH,
            _ => PREC_TERM,
        },
        Expr::Unary { op: UnaryOp::Neg, .. } => PREC_UNARY,
        Expr::Int(v) if *v < 0 => PREC_UNARY,
        Expr::Index { .. } | Expr::Call { .. } => PREC_POSTFIX,
        _ => PREC_ATOM,
    }
}

/// Renders `e`, parenthesized when it binds looser than `min`.
fn expr(e: &Expr, min: u8) -> String {
    let prec = precedence(e);
    let text = match e {
        Expr::Int(v) => v.to_string(),
        Expr::Str(s) => quote(s),
        Expr::Bool(true) => "True".to_string(),
        Expr::Bool(false) => "False".to_string(),
        Expr::None => "None".to_string(),
        Expr::Name(id) => id.clone(),
        Expr::List(items) => format!("[{}]", join(items)),
        Expr::Index { value, index } => {
            format!("{}[{}]", expr(value, PREC_POSTFIX), expr(index, 0))
        }
        Expr::Call { func, args } => format!("{}({})", expr(func, PREC_POSTFIX), join(args)),
        Expr::Unary {
            op: UnaryOp::Neg,
            operand,
        } => format!("-{}", expr(operand, PREC_UNARY)),
        Expr::Unary {
            op: UnaryOp::Not,
            operand,
        } => format!("not {}", expr(operand, PREC_NOT)),
        Expr::Binary { op, left, right } => format!(
            "{} {} {}",
            expr(left, prec),
            op.symbol(),
            expr(right, prec + 1)
        ),
        Expr::Compare { op, left, right } => format!(
            "{} {} {}",
            expr(left, PREC_ARITH),
            op.symbol(),
            expr(right, PREC_ARITH)
        ),
        Expr::BoolOp { op, left, right } => {
            let word = match op {
                BoolOp::And => "and",
                BoolOp::Or => "or",
            };
            format!("{} {word} {}", expr(left, prec), expr(right, prec + 1))
        }
    };
    if prec < min { format!("({text})") } else { text }
}

fn join(items: &[Expr]) -> String {
    items
        .iter()
        .map(|item| expr(item, 0))
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}
