/// Entry point for the Murk CLI, an SSA-IR obfuscation tool.
///
/// This module parses command-line arguments and dispatches to subcommands for
/// obfuscating, verifying, visualizing or interpreting textual IR modules. It
/// initializes logging and handles the main execution flow.
use clap::Parser;
use murk_cli::commands::{Cmd, Command};

/// Command-line interface for Murk.
///
/// Murk transforms a typed SSA IR so the compiled binary is substantially
/// harder to analyze statically: string encryption, bogus control flow, fake
/// loops and control-flow flattening, composed through presets or an explicit
/// pass list.
#[derive(Parser)]
#[command(name = "murk")]
#[command(about = "Murk: SSA-IR obfuscator")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

/// Runs the Murk CLI with the provided arguments.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let cli = Cli::parse();
    cli.command.execute().await
}
