use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;
use std::fs;
use std::path::Path;

/// The `inspect` subcommand.
pub mod inspect;
/// The `obfuscate` subcommand.
pub mod obfuscate;
/// The `run` subcommand.
pub mod run;

/// Subcommands of the `murk` binary.
#[derive(Subcommand)]
pub enum Cmd {
    /// Rename and flatten a source file, optionally emitting a padded container
    Obfuscate(obfuscate::ObfuscateArgs),

    /// Print a container's header and disassembly
    Inspect(inspect::InspectArgs),

    /// Execute a source file or a container
    Run(run::RunArgs),
}

/// A runnable subcommand.
#[async_trait]
pub trait Command {
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Obfuscate(args) => args.execute().await,
            Cmd::Inspect(args) => args.execute().await,
            Cmd::Run(args) => args.execute().await,
        }
    }
}

/// Reads `path` fully, naming the file in the error.
pub(crate) fn read_input(path: &Path) -> Result<Vec<u8>, Box<dyn Error>> {
    fs::read(path).map_err(|err| format!("cannot read {}: {err}", path.display()).into())
}
