//! Renames every definition and every reference that resolves to it.
//!
//! Runs in two passes. The first reserves a synthetic name for every definition in the
//! module, nested ones included, so that a reference appearing before its definition
//! (forward or mutual calls) is rewritten exactly like a later one. The second pass walks
//! each scope and rewrites definition sites, reads and binding targets whose name is mapped.
//! Inside a definition, a name the definition binds itself as a parameter or a plain local
//! shadows the renamed definition and is left alone.

use crate::name_mapper::NameMapper;
use crate::util::{ScopeVisitor, definition_names, shadowing_bindings, visit_scope};
use crate::{PassContext, Transform, is_reserved};
use murk_core::ast::{Definition, Module};
use murk_utils::errors::{RenameError, TransformError};
use std::collections::HashSet;
use tracing::debug;

/// Renames definitions and every reference that resolves to them.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefinitionRenamer;

impl Transform for DefinitionRenamer {
    fn name(&self) -> &'static str {
        "DefinitionRenamer"
    }

    fn apply(&self, module: &mut Module, ctx: &mut PassContext) -> Result<bool, TransformError> {
        let mut names = Vec::new();
        definition_names(&module.body, &mut names);

        let mut reserved = 0;
        for name in names.iter().filter(|name| !is_reserved(name)) {
            if !ctx.definition_names.contains(name) {
                ctx.definition_names.reserve(name, &mut ctx.rng)?;
                reserved += 1;
            }
        }
        if ctx.definition_names.is_empty() {
            debug!("no definitions to rename");
            return Ok(false);
        }
        debug!("reserved {reserved} definition names");

        let mut rewriter = Rewriter {
            mapper: &ctx.definition_names,
            shadowed: HashSet::new(),
            rewritten: 0,
        };
        visit_scope(&mut module.body, &mut rewriter)?;
        let rewritten = rewriter.rewritten;
        debug!("rewrote {rewritten} definition sites and references");
        Ok(rewritten > 0)
    }
}

struct Rewriter<'a> {
    mapper: &'a NameMapper,
    /// Names the current scope binds as non-definitions.
    shadowed: HashSet<String>,
    rewritten: usize,
}

impl ScopeVisitor for Rewriter<'_> {
    type Error = RenameError;

    fn name(&mut self, id: &mut String) -> Result<(), RenameError> {
        if self.shadowed.contains(id.as_str()) {
            return Ok(());
        }
        if let Some(synthetic) = self.mapper.get(id) {
            *id = synthetic.to_string();
            self.rewritten += 1;
        }
        Ok(())
    }

    fn definition(&mut self, def: &mut Definition) -> Result<(), RenameError> {
        let inner = shadowing_bindings(def);
        let outer = std::mem::replace(&mut self.shadowed, inner);
        let result = visit_scope(&mut def.body, self);
        self.shadowed = outer;
        result
    }
}
