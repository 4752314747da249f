use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;

pub mod cfg;
pub mod obfuscate;
pub mod run;
pub mod verify;

/// CLI subcommands for Murk.
#[derive(Subcommand)]
pub enum Cmd {
    /// Obfuscate a textual IR module with a preset or explicit pass list
    Obfuscate(obfuscate::ObfuscateArgs),
    /// Parse a module and check the IR invariants
    Verify(verify::VerifyArgs),
    /// Write the module's control flow graphs as Graphviz dot
    Cfg(cfg::CfgArgs),
    /// Interpret a function of the module with integer arguments
    Run(run::RunArgs),
}

/// Trait for executing CLI subcommands.
///
/// Implementors define the logic for processing an input module and producing
/// output (transformed IR, a verification verdict, a CFG rendering, or an
/// interpreted result).
#[async_trait]
pub trait Command {
    /// Executes the subcommand.
    ///
    /// # Returns
    /// A `Result` indicating success or an error if execution fails.
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Obfuscate(args) => args.execute().await,
            Cmd::Verify(args) => args.execute().await,
            Cmd::Cfg(args) => args.execute().await,
            Cmd::Run(args) => args.execute().await,
        }
    }
}
