/// Definition renaming.
pub mod definition_renamer;
/// Control-flow flattening.
pub mod flatten;
/// Local-binding renaming.
pub mod local_renamer;
/// Synthetic name allocation.
pub mod name_mapper;
/// The end-to-end pipeline and its options.
pub mod obfuscator;
/// Filler instruction padding.
pub mod padder;
/// Snapshot-and-commit pass runner.
pub mod pass;
mod util;

use murk_core::ast::{Module, collect_identifiers};
use murk_core::builtins::BUILTIN_NAMES;
use murk_core::lexer::KEYWORDS;
use murk_utils::errors::TransformError;
use name_mapper::NameMapper;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Prefix of synthetic definition names.
pub const DEFINITION_PREFIX: &str = "func_";
/// Prefix of synthetic local names.
pub const LOCAL_PREFIX: &str = "var_";
/// Length of the random suffix of synthetic names.
pub const SUFFIX_LEN: usize = 8;

/// Trait for syntax tree transforms.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and identification.
    fn name(&self) -> &'static str;
    /// Applies the transform to the module, returning whether changes were made.
    fn apply(&self, module: &mut Module, ctx: &mut PassContext) -> Result<bool, TransformError>;
}

/// Mutable state of one pipeline run. Never shared between runs.
#[derive(Debug)]
pub struct PassContext {
    /// Seeded source of all randomness in the run.
    pub rng: StdRng,
    /// Definition names issued so far.
    pub definition_names: NameMapper,
    /// Local names issued so far.
    pub local_names: NameMapper,
}

impl PassContext {
    /// Seeds the run and marks every identifier already in `module` as taken.
    pub fn new(seed: u64, module: &Module) -> Self {
        let existing = collect_identifiers(module);
        let reserved = KEYWORDS.iter().chain(BUILTIN_NAMES).copied();

        let mut definition_names = NameMapper::new(DEFINITION_PREFIX, SUFFIX_LEN);
        definition_names.mark_taken(existing.iter().cloned());
        definition_names.mark_taken(reserved.clone());

        let mut local_names = NameMapper::new(LOCAL_PREFIX, SUFFIX_LEN);
        local_names.mark_taken(existing);
        local_names.mark_taken(reserved);

        Self {
            rng: StdRng::seed_from_u64(seed),
            definition_names,
            local_names,
        }
    }
}

/// Reserved words and built-in names; never renamed by any pass.
pub fn is_reserved(name: &str) -> bool {
    KEYWORDS.contains(&name) || BUILTIN_NAMES.contains(&name)
}
