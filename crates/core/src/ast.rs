//! Syntax tree for murk source programs.
//!
//! Nodes are plain owned data: every transform matches on the closed `StmtKind` and `Expr`
//! enums, so adding a node kind forces each pass to decide how to handle it.

use std::collections::HashSet;

/// A parsed source unit.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Module {
    pub body: Vec<Stmt>,
}

/// A statement together with the 1-based line it came from.
///
/// Line 0 marks statements synthesized by a transform; the compiler attributes them to the
/// line of whatever code precedes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stmt {
    pub line: u32,
    pub kind: StmtKind,
}

impl Stmt {
    /// Statement at a source line.
    pub const fn new(line: u32, kind: StmtKind) -> Self {
        Self { line, kind }
    }

    /// Statement with no source line; it inherits the enclosing one.
    pub const fn synthetic(kind: StmtKind) -> Self {
        Self { line: 0, kind }
    }

    /// Returns true for a statement that unconditionally leaves the current definition.
    pub const fn is_return(&self) -> bool {
        matches!(self.kind, StmtKind::Return(_))
    }
}

/// Statement variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StmtKind {
    Def(Definition),
    Return(Option<Expr>),
    Assign {
        target: String,
        value: Expr,
    },
    AugAssign {
        target: String,
        op: BinOp,
        value: Expr,
    },
    If {
        test: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    For {
        target: String,
        iter: Expr,
        body: Vec<Stmt>,
    },
    Expr(Expr),
    Pass,
    Break,
    Continue,
}

/// A function definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// Expression variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Int(i64),
    Str(String),
    Bool(bool),
    None,
    Name(String),
    List(Vec<Expr>),
    Index {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Compare {
        op: CmpOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    BoolOp {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
}

impl Expr {
    /// Name reference.
    pub fn name(id: impl Into<String>) -> Self {
        Self::Name(id.into())
    }

    /// Single comparison.
    pub fn compare(op: CmpOp, left: Self, right: Self) -> Self {
        Self::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// Call of `func` with positional `args`.
    pub fn call(func: Self, args: Vec<Self>) -> Self {
        Self::Call {
            func: Box::new(func),
            args,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    FloorDiv,
    Mod,
}

impl BinOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::FloorDiv => "//",
            Self::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
}

impl CmpOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::LtE => "<=",
            Self::Gt => ">",
            Self::GtE => ">=",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

/// Collects every identifier spelled anywhere in the module: definition names, parameters,
/// binding targets and references.
pub fn collect_identifiers(module: &Module) -> HashSet<String> {
    let mut out = HashSet::new();
    for stmt in &module.body {
        identifiers_in_stmt(stmt, &mut out);
    }
    out
}

fn identifiers_in_stmt(stmt: &Stmt, out: &mut HashSet<String>) {
    match &stmt.kind {
        StmtKind::Def(def) => {
            out.insert(def.name.clone());
            out.extend(def.params.iter().cloned());
            for inner in &def.body {
                identifiers_in_stmt(inner, out);
            }
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                identifiers_in_expr(value, out);
            }
        }
        StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => {
            out.insert(target.clone());
            identifiers_in_expr(value, out);
        }
        StmtKind::If { test, body, orelse } => {
            identifiers_in_expr(test, out);
            for inner in body.iter().chain(orelse) {
                identifiers_in_stmt(inner, out);
            }
        }
        StmtKind::While { test, body } => {
            identifiers_in_expr(test, out);
            for inner in body {
                identifiers_in_stmt(inner, out);
            }
        }
        StmtKind::For { target, iter, body } => {
            out.insert(target.clone());
            identifiers_in_expr(iter, out);
            for inner in body {
                identifiers_in_stmt(inner, out);
            }
        }
        StmtKind::Expr(expr) => identifiers_in_expr(expr, out),
        StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
    }
}

fn identifiers_in_expr(expr: &Expr, out: &mut HashSet<String>) {
    match expr {
        Expr::Int(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None => {}
        Expr::Name(id) => {
            out.insert(id.clone());
        }
        Expr::List(items) => items.iter().for_each(|item| identifiers_in_expr(item, out)),
        Expr::Index { value, index } => {
            identifiers_in_expr(value, out);
            identifiers_in_expr(index, out);
        }
        Expr::Unary { operand, .. } => identifiers_in_expr(operand, out),
        Expr::Binary { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::BoolOp { left, right, .. } => {
            identifiers_in_expr(left, out);
            identifiers_in_expr(right, out);
        }
        Expr::Call { func, args } => {
            identifiers_in_expr(func, out);
            args.iter().for_each(|arg| identifiers_in_expr(arg, out));
        }
    }
}

/// Names a definition binds locally: parameters, assignment and loop targets, and nested
/// definition names. Nested definition bodies are separate scopes and are not descended into.
pub fn local_bindings(def: &Definition) -> HashSet<String> {
    let mut out = scope_bindings(&def.body);
    out.extend(def.params.iter().cloned());
    out
}

/// Names bound by a statement sequence, without descending into nested definition bodies.
pub fn scope_bindings(body: &[Stmt]) -> HashSet<String> {
    let mut out = HashSet::new();
    for stmt in body {
        bindings_in_stmt(stmt, &mut out);
    }
    out
}

fn bindings_in_stmt(stmt: &Stmt, out: &mut HashSet<String>) {
    match &stmt.kind {
        StmtKind::Def(def) => {
            out.insert(def.name.clone());
        }
        StmtKind::Assign { target, .. } | StmtKind::AugAssign { target, .. } => {
            out.insert(target.clone());
        }
        StmtKind::For { target, body, .. } => {
            out.insert(target.clone());
            body.iter().for_each(|inner| bindings_in_stmt(inner, out));
        }
        StmtKind::If { body, orelse, .. } => {
            body.iter()
                .chain(orelse)
                .for_each(|inner| bindings_in_stmt(inner, out));
        }
        StmtKind::While { body, .. } => body.iter().for_each(|inner| bindings_in_stmt(inner, out)),
        StmtKind::Return(_)
        | StmtKind::Expr(_)
        | StmtKind::Pass
        | StmtKind::Break
        | StmtKind::Continue => {}
    }
}
