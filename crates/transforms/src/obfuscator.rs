use crate::definition_renamer::DefinitionRenamer;
use crate::flatten::ControlFlowFlattener;
use crate::local_renamer::LocalRenamer;
use crate::padder::{MAX_FILLER_RATIO, MIN_FILLER_RATIO, PadConfig, pad};
use crate::{PassContext, Transform, pass};
use indexmap::IndexMap;
use murk_core::container::{ContainerHeader, FormatVersion, write_container};
use murk_core::{compile, parse, unparse};
use murk_utils::errors::ObfuscateError;
use serde::{Deserialize, Serialize};

/// Which transform family runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformOrder {
    #[default]
    RenameThenFlatten,
    FlattenThenRename,
}

/// Configuration for the obfuscation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationOptions {
    /// Rewrite every definition body as a dispatcher loop
    pub flatten: bool,
    /// Give definitions synthetic names
    pub rename_definitions: bool,
    /// Give local bindings synthetic names
    pub rename_locals: bool,
    /// Compile, pad and serialize the result into a container
    pub emit_container: bool,
    /// Filler budget as a share of each unit's instructions, clamped to [0.05, 0.5]
    pub filler_ratio: f64,
    /// Longest run of fillers inserted in one place
    pub max_consecutive_fillers: usize,
    /// Chance of starting a filler run before any given instruction
    pub filler_probability: f64,
    /// Container header layout
    pub format_version: FormatVersion,
    /// Whether renaming or flattening runs first
    pub order: TransformOrder,
    /// Prepend the name mappings as comments to the rewritten source
    pub annotate_mapping: bool,
    /// Random seed; drawn from the thread RNG when absent
    pub seed: Option<u64>,
    /// Name recorded in compiled code objects
    pub filename: String,
}

impl Default for ObfuscationOptions {
    fn default() -> Self {
        Self {
            flatten: true,
            rename_definitions: true,
            rename_locals: true,
            emit_container: false,
            filler_ratio: 0.2,
            max_consecutive_fillers: 5,
            filler_probability: 0.3,
            format_version: FormatVersion::default(),
            order: TransformOrder::default(),
            annotate_mapping: false,
            seed: None,
            filename: "<murk>".to_string(),
        }
    }
}

impl ObfuscationOptions {
    /// Padder settings with the ratio clamped.
    pub fn pad_config(&self) -> PadConfig {
        PadConfig {
            ratio: self.filler_ratio.clamp(MIN_FILLER_RATIO, MAX_FILLER_RATIO),
            max_consecutive: self.max_consecutive_fillers,
            probability: self.filler_probability,
        }
    }

    /// Builds the enabled transforms in the configured order.
    pub fn transforms(&self) -> Vec<Box<dyn Transform>> {
        let mut renames: Vec<Box<dyn Transform>> = Vec::new();
        if self.rename_definitions {
            renames.push(Box::new(DefinitionRenamer));
        }
        if self.rename_locals {
            renames.push(Box::new(LocalRenamer));
        }
        let flatten: Option<Box<dyn Transform>> =
            self.flatten.then(|| Box::new(ControlFlowFlattener) as Box<dyn Transform>);

        match self.order {
            TransformOrder::RenameThenFlatten => renames.into_iter().chain(flatten).collect(),
            TransformOrder::FlattenThenRename => flatten.into_iter().chain(renames).collect(),
        }
    }
}

/// Result of the obfuscation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationResult {
    /// Rewritten source text
    pub rewritten_source: String,
    /// Original to synthetic definition names
    pub definition_names: IndexMap<String, String>,
    /// Original to synthetic local names
    pub local_names: IndexMap<String, String>,
    /// Serialized container, when requested
    #[serde(skip)]
    pub container: Option<Vec<u8>>,
    /// Run statistics
    pub stats: ObfuscationStats,
}

/// Counters describing one pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObfuscationStats {
    /// Seed used for the run
    pub seed_used: u64,
    /// Names of transforms that changed the tree
    pub transforms_applied: Vec<String>,
    /// Instructions across all units before padding
    pub instructions_before: usize,
    /// Instructions across all units after padding
    pub instructions_after: usize,
    /// Filler instructions added by padding
    pub fillers_inserted: usize,
    /// Units left unpadded after failing validation
    pub units_skipped: usize,
    /// Container length in bytes, when one was written
    pub container_size: Option<usize>,
}

/// Main obfuscation pipeline
pub fn obfuscate(
    source: &str,
    options: &ObfuscationOptions,
) -> Result<ObfuscationResult, ObfuscateError> {
    let mut module = parse(source)?;
    let seed = options.seed.unwrap_or_else(rand::random);

    tracing::debug!("Starting obfuscation pipeline:");
    tracing::debug!("  Input size: {} bytes", source.len());
    tracing::debug!("  Statements: {}", module.body.len());
    tracing::debug!("  Seed: 0x{seed:x}");

    let mut ctx = PassContext::new(seed, &module);
    let transforms = options.transforms();
    let transforms_applied = pass::run(&mut module, &transforms, &mut ctx)?;

    let PassContext {
        mut rng,
        definition_names,
        local_names,
    } = ctx;
    let definition_names = definition_names.into_mapping();
    let local_names = local_names.into_mapping();

    let mut rewritten_source = unparse(&module);
    if options.annotate_mapping {
        rewritten_source = annotate(&rewritten_source, &definition_names, &local_names);
    }

    // Compiling also catches a rewrite that left the tree structurally invalid.
    let code = compile(&module, &options.filename)?;
    let instructions_before = code.total_instruction_count();
    tracing::debug!("  Compiled instructions: {instructions_before}");

    let mut stats = ObfuscationStats {
        seed_used: seed,
        transforms_applied,
        instructions_before,
        instructions_after: instructions_before,
        ..ObfuscationStats::default()
    };

    let container = if options.emit_container {
        let (padded, report) = pad(&code, &options.pad_config(), &mut rng);
        stats.instructions_after = padded.total_instruction_count();
        stats.fillers_inserted = report.fillers_inserted;
        stats.units_skipped = report.units_skipped;

        let header = ContainerHeader::new(options.format_version, rewritten_source.len());
        let mut bytes = Vec::new();
        write_container(&mut bytes, &padded, &header)?;
        stats.container_size = Some(bytes.len());
        Some(bytes)
    } else {
        None
    };

    tracing::debug!(
        "  Applied: {:?}, {} -> {} instructions",
        stats.transforms_applied,
        stats.instructions_before,
        stats.instructions_after
    );

    Ok(ObfuscationResult {
        rewritten_source,
        definition_names,
        local_names,
        container,
        stats,
    })
}

fn annotate(
    source: &str,
    definition_names: &IndexMap<String, String>,
    local_names: &IndexMap<String, String>,
) -> String {
    let mut out = String::new();
    for (original, synthetic) in definition_names.iter().chain(local_names) {
        out.push_str(&format!("# {original} -> {synthetic}\n"));
    }
    if !out.is_empty() {
        out.push('\n');
    }
    out.push_str(source);
    out
}

/// Convenience function to create common option sets
pub mod presets {
    use super::*;

    /// Renaming and flattening, source output only
    pub fn default_obfuscation(seed: Option<u64>) -> ObfuscationOptions {
        ObfuscationOptions {
            seed,
            ..ObfuscationOptions::default()
        }
    }

    /// Definition renaming only
    pub fn light_obfuscation(seed: Option<u64>) -> ObfuscationOptions {
        ObfuscationOptions {
            seed,
            flatten: false,
            rename_locals: false,
            ..ObfuscationOptions::default()
        }
    }

    /// Every transform plus a padded container
    pub fn full_obfuscation(seed: Option<u64>) -> ObfuscationOptions {
        ObfuscationOptions {
            seed,
            emit_container: true,
            filler_ratio: 0.35,
            ..ObfuscationOptions::default()
        }
    }
}
