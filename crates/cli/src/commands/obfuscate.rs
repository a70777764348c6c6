/// Module for the `obfuscate` subcommand, which renames and flattens a source file and
/// optionally emits a padded container.
use async_trait::async_trait;
use clap::Args;
use murk_core::container::{write_atomic, FormatVersion};
use murk_transform::obfuscator::{obfuscate, ObfuscationOptions, ObfuscationResult};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};

/// Arguments for the `obfuscate` subcommand.
#[derive(Args)]
pub struct ObfuscateArgs {
    /// Source file to obfuscate.
    pub input: PathBuf,
    /// Output path; source is printed to stdout when absent.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Leave definition bodies unflattened.
    #[arg(long)]
    no_flatten: bool,
    /// Keep original definition names.
    #[arg(long)]
    no_rename_defs: bool,
    /// Keep original local names.
    #[arg(long)]
    no_rename_locals: bool,
    /// Write a padded container instead of source.
    #[arg(long)]
    container: bool,
    /// Filler budget per unit, clamped to [0.05, 0.5].
    #[arg(long)]
    filler_ratio: Option<f64>,
    /// Container format version.
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=3))]
    format_version: Option<u8>,
    /// Random seed; drawn at random when absent.
    #[arg(long)]
    seed: Option<u64>,
    /// Prepend the name mappings as comments.
    #[arg(long)]
    annotate: bool,
    /// JSON file with pipeline options; flags are applied on top.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Path to emit the mapping and stats report as JSON.
    #[arg(long)]
    emit: Option<PathBuf>,
}

impl ObfuscateArgs {
    /// Loads `--config` if given and applies the individual flags over it.
    fn options(&self) -> Result<ObfuscationOptions, Box<dyn Error>> {
        let mut options = match &self.config {
            Some(path) => serde_json::from_slice(&super::read_input(path)?)
                .map_err(|err| format!("invalid config {}: {err}", path.display()))?,
            None => ObfuscationOptions::default(),
        };

        options.flatten &= !self.no_flatten;
        options.rename_definitions &= !self.no_rename_defs;
        options.rename_locals &= !self.no_rename_locals;
        options.emit_container |= self.container;
        options.annotate_mapping |= self.annotate;
        if let Some(ratio) = self.filler_ratio {
            options.filler_ratio = ratio;
        }
        if let Some(version) = self.format_version.and_then(FormatVersion::from_byte) {
            options.format_version = version;
        }
        if self.seed.is_some() {
            options.seed = self.seed;
        }
        options.filename = self.input.display().to_string();
        Ok(options)
    }
}

/// Executes the `obfuscate` subcommand.
#[async_trait]
impl super::Command for ObfuscateArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let options = self.options()?;
        let source = fs::read_to_string(&self.input)
            .map_err(|err| format!("cannot read {}: {err}", self.input.display()))?;

        let result = obfuscate(&source, &options)?;
        let stats = &result.stats;
        tracing::info!(
            "seed 0x{:x}: {} definitions and {} locals renamed",
            stats.seed_used,
            result.definition_names.len(),
            result.local_names.len()
        );

        match (&result.container, &self.output) {
            (Some(bytes), Some(path)) => {
                write_atomic(path, bytes)?;
                tracing::info!(
                    "wrote {} byte container ({} fillers) to {}",
                    bytes.len(),
                    stats.fillers_inserted,
                    path.display()
                );
            }
            (Some(bytes), None) => println!("{}", hex::encode(bytes)),
            (None, Some(path)) => {
                write_atomic(path, result.rewritten_source.as_bytes())?;
                tracing::info!("wrote rewritten source to {}", path.display());
            }
            (None, None) => print!("{}", result.rewritten_source),
        }

        if let Some(path) = &self.emit {
            write_report(&result, path)?;
            tracing::info!("wrote report to {}", path.display());
        }
        Ok(())
    }
}

/// Writes the mappings and stats of `result` as pretty JSON.
fn write_report(result: &ObfuscationResult, path: &Path) -> Result<(), Box<dyn Error>> {
    let report = serde_json::to_string_pretty(result)?;
    write_atomic(path, report.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;
    use murk_core::container::read_container;

    const SOURCE: &str = "def square(x):\n    y = x * x\n    return y\n\nprint(square(7))\n";

    fn args(input: PathBuf, output: Option<PathBuf>) -> ObfuscateArgs {
        ObfuscateArgs {
            input,
            output,
            no_flatten: false,
            no_rename_defs: false,
            no_rename_locals: false,
            container: false,
            filler_ratio: None,
            format_version: None,
            seed: Some(11),
            annotate: false,
            config: None,
            emit: None,
        }
    }

    #[tokio::test]
    async fn writes_source_and_report() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("square.mk");
        fs::write(&input, SOURCE).unwrap();
        let output = dir.path().join("out.mk");
        let report = dir.path().join("report.json");

        let mut args = args(input, Some(output.clone()));
        args.emit = Some(report.clone());
        args.execute().await.unwrap();

        let rewritten = fs::read_to_string(&output).unwrap();
        assert!(!rewritten.contains("def square("));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(json["stats"]["seed_used"], 11);
        assert!(json["definition_names"]["square"].is_string());
        assert!(json.get("container").is_none());
    }

    #[tokio::test]
    async fn writes_container_with_requested_version() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("square.mk");
        fs::write(&input, SOURCE).unwrap();
        let output = dir.path().join("square.mrk");

        let mut args = args(input, Some(output.clone()));
        args.container = true;
        args.format_version = Some(2);
        args.execute().await.unwrap();

        let (header, _) = read_container(&fs::read(&output).unwrap()).unwrap();
        assert_eq!(header.version, FormatVersion::V2);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("options.json");
        fs::write(&config, r#"{"emit_container": true, "filler_ratio": 0.1, "seed": 1}"#).unwrap();

        let mut args = args(dir.path().join("in.mk"), None);
        args.config = Some(config);
        args.no_flatten = true;
        args.filler_ratio = Some(0.4);
        let options = args.options().unwrap();
        assert!(options.emit_container);
        assert!(!options.flatten);
        assert_eq!(options.filler_ratio, 0.4);
        assert_eq!(options.seed, Some(11));
    }
}
