use murk_core::ast::{Definition, Expr, Stmt, StmtKind, local_bindings};
use std::collections::HashSet;

/// Receives every name occurrence of one scope.
pub(crate) trait ScopeVisitor {
    type Error;

    /// Called for reads, binding targets and nested definition names.
    fn name(&mut self, id: &mut String) -> Result<(), Self::Error>;

    /// Called after a nested definition's name has been visited. The body is not walked.
    fn definition(&mut self, def: &mut Definition) -> Result<(), Self::Error>;
}

/// Visits every name read inside `expr`.
pub(crate) fn visit_reads<E>(
    expr: &mut Expr,
    visit: &mut impl FnMut(&mut String) -> Result<(), E>,
) -> Result<(), E> {
    match expr {
        Expr::Int(_) | Expr::Str(_) | Expr::Bool(_) | Expr::None => Ok(()),
        Expr::Name(id) => visit(id),
        Expr::List(items) => items.iter_mut().try_for_each(|item| visit_reads(item, visit)),
        Expr::Index { value, index } => {
            visit_reads(value, visit)?;
            visit_reads(index, visit)
        }
        Expr::Unary { operand, .. } => visit_reads(operand, visit),
        Expr::Binary { left, right, .. }
        | Expr::Compare { left, right, .. }
        | Expr::BoolOp { left, right, .. } => {
            visit_reads(left, visit)?;
            visit_reads(right, visit)
        }
        Expr::Call { func, args } => {
            visit_reads(func, visit)?;
            args.iter_mut().try_for_each(|arg| visit_reads(arg, visit))
        }
    }
}

/// Walks one scope's statements in source order.
pub(crate) fn visit_scope<V: ScopeVisitor>(body: &mut [Stmt], visitor: &mut V) -> Result<(), V::Error> {
    for stmt in body {
        match &mut stmt.kind {
            StmtKind::Def(def) => {
                visitor.name(&mut def.name)?;
                visitor.definition(def)?;
            }
            StmtKind::Return(value) => {
                if let Some(value) = value {
                    visit_reads(value, &mut |id| visitor.name(id))?;
                }
            }
            StmtKind::Assign { target, value } | StmtKind::AugAssign { target, value, .. } => {
                visit_reads(value, &mut |id| visitor.name(id))?;
                visitor.name(target)?;
            }
            StmtKind::If { test, body, orelse } => {
                visit_reads(test, &mut |id| visitor.name(id))?;
                visit_scope(body, visitor)?;
                visit_scope(orelse, visitor)?;
            }
            StmtKind::While { test, body } => {
                visit_reads(test, &mut |id| visitor.name(id))?;
                visit_scope(body, visitor)?;
            }
            StmtKind::For { target, iter, body } => {
                visit_reads(iter, &mut |id| visitor.name(id))?;
                visitor.name(target)?;
                visit_scope(body, visitor)?;
            }
            StmtKind::Expr(value) => visit_reads(value, &mut |id| visitor.name(id))?,
            StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
        }
    }
    Ok(())
}

/// Names of definitions anywhere in `body`, nested ones included, in lexical order.
pub(crate) fn definition_names(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Def(def) => {
                out.push(def.name.clone());
                definition_names(&def.body, out);
            }
            StmtKind::If { body, orelse, .. } => {
                definition_names(body, out);
                definition_names(orelse, out);
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => definition_names(body, out),
            _ => {}
        }
    }
}

/// Names a definition binds that are not definitions themselves.
pub(crate) fn shadowing_bindings(def: &Definition) -> HashSet<String> {
    let mut nested = Vec::new();
    direct_definitions(&def.body, &mut nested);
    let mut bound = local_bindings(def);
    for name in nested {
        bound.remove(&name);
    }
    bound
}

fn direct_definitions(body: &[Stmt], out: &mut Vec<String>) {
    for stmt in body {
        match &stmt.kind {
            StmtKind::Def(def) => out.push(def.name.clone()),
            StmtKind::If { body, orelse, .. } => {
                direct_definitions(body, out);
                direct_definitions(orelse, out);
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                direct_definitions(body, out)
            }
            _ => {}
        }
    }
}
