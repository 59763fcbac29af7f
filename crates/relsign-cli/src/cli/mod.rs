#![forbid(unsafe_code)]

use anyhow::Result;
use clap::{Parser, Subcommand};

pub mod clean;
pub mod sign;

pub use clean::CleanArgs;
pub use sign::SignArgs;

/// Environment variable that overrides `--log`.
pub const LOG_ENV: &str = "RELSIGN_LOG";

#[derive(Debug, Parser)]
#[command(
    name = "relsign",
    about = "Sign release archives in passes: entries, notarization, detached signatures",
    version
)]
pub struct Cli {
    /// Logging filter (overrides RELSIGN_LOG)
    #[arg(long = "log", default_value = "info", global = true)]
    pub verbosity: String,

    /// Emit machine-readable JSON output where applicable
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Extract, sign and repack every matching archive
    Sign(SignArgs),
    /// Remove staging directories and partial outputs left by earlier runs
    Clean(CleanArgs),
}

/// Resolve the logging filter to use for telemetry initialisation.
pub fn resolve_env_filter(cli: &Cli) -> String {
    std::env::var(LOG_ENV).unwrap_or_else(|_| cli.verbosity.clone())
}

/// Execute the CLI using a pre-parsed argument set.
pub async fn run_with_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Sign(args) => sign::handle(args, cli.json).await?,
        Command::Clean(args) => clean::handle(args, cli.json)?,
    }

    Ok(())
}
