//! Renames local bindings inside definitions.
//!
//! A name is protected, and never renamed or recorded, when it is a reserved word, a
//! built-in, the name of any definition in the module, a module-level binding, or a
//! parameter of the definition being walked or of one that encloses it. Every other name
//! read or bound inside a definition body is replaced with its synthetic local name.
//! Module-level code is not touched: every name bound there is a global.

use crate::name_mapper::NameMapper;
use crate::util::{ScopeVisitor, definition_names, visit_scope};
use crate::{PassContext, Transform, is_reserved};
use murk_core::ast::{Definition, Module, Stmt, StmtKind, scope_bindings};
use murk_utils::errors::{RenameError, TransformError};
use rand::rngs::StdRng;
use std::collections::HashSet;
use tracing::debug;

/// Renames unprotected local bindings inside definitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRenamer;

impl Transform for LocalRenamer {
    fn name(&self) -> &'static str {
        "LocalRenamer"
    }

    fn apply(&self, module: &mut Module, ctx: &mut PassContext) -> Result<bool, TransformError> {
        let mut definitions = Vec::new();
        definition_names(&module.body, &mut definitions);
        let module_level = scope_bindings(&module.body);
        debug!(
            "protecting {} definition names and {} module-level bindings",
            definitions.len(),
            module_level.len()
        );

        let PassContext {
            rng, local_names, ..
        } = ctx;
        let mut renamer = Renamer {
            mapper: local_names,
            rng,
            definitions: definitions.into_iter().collect(),
            module_level,
            params: Vec::new(),
            rewritten: 0,
        };
        for stmt in &mut module.body {
            renamer.module_statement(stmt)?;
        }
        let rewritten = renamer.rewritten;
        debug!("rewrote {rewritten} local name occurrences");
        Ok(rewritten > 0)
    }
}

struct Renamer<'a> {
    mapper: &'a mut NameMapper,
    rng: &'a mut StdRng,
    definitions: HashSet<String>,
    module_level: HashSet<String>,
    /// Parameter sets of the definitions being walked, innermost last.
    params: Vec<HashSet<String>>,
    rewritten: usize,
}

impl Renamer<'_> {
    fn is_protected(&self, name: &str) -> bool {
        is_reserved(name)
            || self.definitions.contains(name)
            || self.module_level.contains(name)
            || self.params.iter().any(|scope| scope.contains(name))
    }

    /// Finds definitions in module-level statements, including inside top-level control flow.
    fn module_statement(&mut self, stmt: &mut Stmt) -> Result<(), RenameError> {
        match &mut stmt.kind {
            StmtKind::Def(def) => self.definition(def),
            StmtKind::If { body, orelse, .. } => body
                .iter_mut()
                .chain(orelse.iter_mut())
                .try_for_each(|inner| self.module_statement(inner)),
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => body
                .iter_mut()
                .try_for_each(|inner| self.module_statement(inner)),
            _ => Ok(()),
        }
    }
}

impl ScopeVisitor for Renamer<'_> {
    type Error = RenameError;

    fn name(&mut self, id: &mut String) -> Result<(), RenameError> {
        if self.is_protected(id) {
            return Ok(());
        }
        *id = self.mapper.reserve(id, self.rng)?;
        self.rewritten += 1;
        Ok(())
    }

    fn definition(&mut self, def: &mut Definition) -> Result<(), RenameError> {
        self.params.push(def.params.iter().cloned().collect());
        let result = visit_scope(&mut def.body, self);
        self.params.pop();
        result
    }
}
