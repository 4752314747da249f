/// Module for the `cfg` subcommand: renders every function's control flow
/// graph as Graphviz dot, one cluster per function.
use async_trait::async_trait;
use clap::Args;
use murk_core::ir::{Function, Terminator};
use murk_core::parser::parse_module;
use murk_core::Module;
use std::error::Error;
use std::fs;

#[derive(Args)]
pub struct CfgArgs {
    /// Input path of the textual IR module.
    pub input: String,
    /// Output file for Graphviz .dot (default: stdout)
    #[arg(short, long)]
    output: Option<String>,
}

#[async_trait]
impl super::Command for CfgArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let text = fs::read_to_string(&self.input)?;
        let module = parse_module(&text)?;
        let dot = generate_dot(&module);
        if let Some(out_path) = self.output {
            fs::write(out_path, &dot)?;
        } else {
            println!("{dot}");
        }
        Ok(())
    }
}

fn generate_dot(module: &Module) -> String {
    let mut dot = String::from("digraph CFG {\n");
    for (fi, f) in module.funcs.iter().enumerate() {
        if f.is_declaration() {
            continue;
        }
        dot.push_str(&format!("    subgraph cluster_{fi} {{\n"));
        dot.push_str(&format!("        label=\"@{}\";\n", f.name));
        for &b in &f.blocks {
            dot.push_str(&format!(
                "        f{fi}_b{} [label=\"{}\\n{} insts\"];\n",
                b.0,
                f.block(b).name,
                f.block(b).insts.len()
            ));
        }
        for &b in &f.blocks {
            for (succ, label) in edges(f, b) {
                dot.push_str(&format!(
                    "        f{fi}_b{} -> f{fi}_b{} [label=\"{label}\"];\n",
                    b.0, succ.0
                ));
            }
        }
        dot.push_str("    }\n");
    }
    dot.push_str("}\n");
    dot
}

fn edges(f: &Function, b: murk_core::ir::BlockId) -> Vec<(murk_core::ir::BlockId, String)> {
    match &f.block(b).term {
        Terminator::Br { target } => vec![(*target, "br".to_string())],
        Terminator::CondBr {
            on_true, on_false, ..
        } => vec![
            (*on_true, "true".to_string()),
            (*on_false, "false".to_string()),
        ],
        Terminator::Switch {
            default, cases, ..
        } => {
            let mut out = vec![(*default, "default".to_string())];
            out.extend(cases.iter().map(|(k, t)| (*t, k.to_string())));
            out
        }
        Terminator::Ret { .. } | Terminator::Unreachable => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_blocks_and_edges() {
        let module = parse_module(
            r#"
module m
func @abs(i32 %x) -> i32 {
entry:
  %neg = icmp slt i32 %x, 0
  br i1 %neg, %flip, %keep
flip:
  %minus = sub i32 0, %x
  ret i32 %minus
keep:
  ret i32 %x
}
"#,
        )
        .unwrap();
        let dot = generate_dot(&module);
        assert!(dot.contains("digraph CFG"));
        assert!(dot.contains("label=\"@abs\""));
        assert!(dot.contains("[label=\"true\"]"));
        assert!(dot.contains("[label=\"false\"]"));
    }
}
