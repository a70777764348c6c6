use crate::{PassContext, Transform};
use murk_core::ast::Module;
use murk_utils::errors::TransformError;
use tracing::info;

/// Runs `passes` in order. Each pass rewrites a snapshot of the module that replaces the
/// original only once the pass succeeded, so a failing pass leaves the last good tree in
/// place. Returns the names of the passes that changed something.
pub fn run(
    module: &mut Module,
    passes: &[Box<dyn Transform>],
    ctx: &mut PassContext,
) -> Result<Vec<String>, TransformError> {
    let mut applied = Vec::new();
    for pass in passes {
        let mut snapshot = module.clone();
        let mutated = pass.apply(&mut snapshot, ctx)?;
        info!("{:>20} {}", pass.name(), if mutated { "✓" } else { "·" });
        if mutated {
            *module = snapshot;
            applied.push(pass.name().to_string());
        }
    }
    Ok(applied)
}
