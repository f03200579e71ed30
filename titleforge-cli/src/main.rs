//! Titleforge CLI - command-line interface to the acquisition and
//! packaging engine.

mod commands;
mod error;
mod progress;

use clap::{Parser, Subcommand};
use console::style;

use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "titleforge", version, about = "Title acquisition and packaging")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Acquire a title version and pack it into an archive
    Fetch(commands::fetch::FetchArgs),

    /// Query the published latest-versions table
    Versions(commands::versions::VersionsArgs),

    /// Print the file table of a packed archive
    Inspect(commands::inspect::InspectArgs),

    /// Build an archive from files already on disk
    Pack(commands::pack::PackArgs),
}

#[tokio::main]
async fn main() {
    titleforge::telemetry::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Fetch(args) => commands::fetch::run(args).await,
        Commands::Versions(args) => commands::versions::run(args).await,
        Commands::Inspect(args) => commands::inspect::run(args),
        Commands::Pack(args) => commands::pack::run(args).await,
    };

    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }
}

/// Print an error and its causal chain, innermost last.
fn report(error: &CliError) {
    eprintln!("{} {}", style("error:").red().bold(), error);
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        eprintln!("  {} {}", style("caused by:").dim(), cause);
        source = cause.source();
    }
}
