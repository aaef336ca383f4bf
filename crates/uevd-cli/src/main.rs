//! UEVD CLI
//!
//! Standalone harness for the device event rule engine: apply a single
//! event against a (possibly scratch) sysfs tree, or lint a rules
//! directory.

use clap::{Parser, Subcommand};

mod commands;

#[derive(Debug, Parser)]
#[command(name = "uevd")]
#[command(about = "UEVD - Device event rule engine harness", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Process one device event end to end
    Apply(commands::apply::ApplyArgs),
    /// Load the rule database and report its contents
    Check(commands::check::CheckArgs),
}

#[tokio::main]
async fn main() {
    uevd_core::logging::init(uevd_core::logging::Profile::Development);

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Apply(args) => commands::apply::execute(args).await,
        Commands::Check(args) => commands::check::execute(args),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
