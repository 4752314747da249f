/// Module for the `run` subcommand: interprets one function of the module
/// with integer arguments and prints the result. Useful for spot-checking
/// that a transformed module still computes what the original did.
use async_trait::async_trait;
use clap::Args;
use murk_core::interp::{Interp, Val};
use murk_core::parser::parse_module;
use std::error::Error;
use std::fs;

#[derive(Args)]
pub struct RunArgs {
    /// Input path of the textual IR module.
    pub input: String,
    /// Function to interpret.
    pub function: String,
    /// Integer arguments.
    pub args: Vec<i64>,
}

#[async_trait]
impl super::Command for RunArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let text = fs::read_to_string(&self.input)?;
        let module = parse_module(&text)?;
        let vals: Vec<Val> = self.args.iter().map(|&a| Val::Int(a)).collect();
        let mut interp = Interp::new(&module);
        match interp.call(&self.function, &vals)? {
            Some(Val::Int(v)) => println!("{v}"),
            Some(ptr @ Val::Ptr { .. }) => {
                let bytes = interp.read_cstr(ptr)?;
                println!("{}", String::from_utf8_lossy(&bytes));
            }
            Some(Val::Null) => println!("(null)"),
            None => println!("(void)"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Command;

    #[tokio::test]
    async fn runs_a_function() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("m.ir");
        fs::write(
            &input,
            r#"
module m
func @add(i32 %a, i32 %b) -> i32 {
entry:
  %sum = add i32 %a, %b
  ret i32 %sum
}
"#,
        )
        .unwrap();
        RunArgs {
            input: input.to_str().unwrap().to_string(),
            function: "add".to_string(),
            args: vec![2, 3],
        }
        .execute()
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn unknown_function_errors() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("m.ir");
        fs::write(&input, "module m\nfunc @f() -> i32 {\nentry:\n  ret i32 0\n}\n").unwrap();
        let result = RunArgs {
            input: input.to_str().unwrap().to_string(),
            function: "missing".to_string(),
            args: vec![],
        }
        .execute()
        .await;
        assert!(result.is_err());
    }
}
