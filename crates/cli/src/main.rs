/// Entry point for the murk CLI, a source-program obfuscator.
///
/// Parses command-line arguments, installs the tracing subscriber and dispatches to the
/// `obfuscate`, `inspect` and `run` subcommands.
use clap::Parser;
use murk_cli::commands::{Cmd, Command};
use tracing_subscriber::EnvFilter;

/// Command-line interface for murk.
#[derive(Parser)]
#[command(name = "murk")]
#[command(about = "Murk: source-program obfuscator")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    cli.command.execute().await.inspect_err(|err| tracing::error!("{err}"))
}
