/// Module for the `verify` subcommand: parse a module and check the IR
/// invariants, reporting the first violation.
use async_trait::async_trait;
use clap::Args;
use murk_core::parser::parse_module;
use murk_core::verifier::verify_module;
use std::error::Error;
use std::fs;

#[derive(Args)]
pub struct VerifyArgs {
    /// Input path of the textual IR module.
    pub input: String,
}

#[async_trait]
impl super::Command for VerifyArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let text = fs::read_to_string(&self.input)?;
        let module = parse_module(&text)?;
        verify_module(&module)?;
        let stats = module.stats();
        println!(
            "module `{}` verifies: {} functions, {} blocks, {} instructions",
            module.name, stats.functions, stats.blocks, stats.instructions
        );
        Ok(())
    }
}
