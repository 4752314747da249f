/// Control-flow flattening (`cff`).
///
/// Reshapes a function so every original block becomes a case of a central
/// dispatcher keyed by a state variable: successor relationships turn into
/// data stored in `cff_state`, and the original syntactic CFG disappears.
/// State 0 means "exit"; the dispatcher's default edge leads to a sentinel
/// return block. Return values survive flattening through a dedicated slot
/// that every rewritten `ret` stores into and the sentinel block reloads.
use crate::demote::{demote_cross_block_values, demote_phis};
use crate::Transform;
use murk_core::builder::Builder;
use murk_core::ir::{BlockId, Operand, Terminator, Ty};
use murk_core::{Module, RUNTIME_PREFIX};
use murk_utils::config::CFF_SALT;
use murk_utils::errors::TransformError;
use murk_utils::prng::XorShift32;
use murk_utils::reporter::{Reporter, FUNCTIONS_FLATTENED};
use tracing::debug;

pub struct Flatten;

impl Transform for Flatten {
    fn name(&self) -> &'static str {
        "cff"
    }

    fn seed_salt(&self) -> u32 {
        CFF_SALT
    }

    fn apply(
        &self,
        module: &mut Module,
        _rng: &mut XorShift32,
        reporter: &mut Reporter,
    ) -> Result<bool, TransformError> {
        let mut flattened = 0u64;
        for fi in 0..module.funcs.len() {
            let f = &mut module.funcs[fi];
            if f.is_declaration() || f.name.starts_with(RUNTIME_PREFIX) || f.blocks.len() <= 2 {
                continue;
            }
            let Some(entry) = f.entry() else { continue };
            // Entry terminators the state rewrite below cannot express.
            if matches!(
                f.block(entry).term,
                Terminator::Switch { .. } | Terminator::Unreachable
            ) {
                debug!("skipping `{}`: entry terminator not flattenable", f.name);
                continue;
            }

            // Make every SSA value block-local before the surgery.
            demote_phis(f);
            demote_cross_block_values(f);

            let origs: Vec<BlockId> = f.blocks[1..].to_vec();
            for &b in &origs {
                f.detach_block(b);
            }
            let dispatch = f.add_block("dispatch");
            let return_block = f.add_block("returnBlock");

            // A branch to the original entry maps to the first non-entry
            // state; unknown targets fall back to the exit state.
            let state_of = |target: BlockId| -> i64 {
                if target == entry {
                    return 1;
                }
                origs
                    .iter()
                    .position(|&b| b == target)
                    .map(|i| i as i64 + 1)
                    .unwrap_or(0)
            };

            // Entry rewrite: state + return slots, then the entry's own
            // terminator becomes the initial state (a fall-through into the
            // first non-entry block stores state 1).
            let entry_term = f.block(entry).term.clone();
            let mut b = Builder::at_end(f, entry);
            let state = b.alloca("cff_state", Ty::I32);
            let ret_ty = b.func().ret_ty;
            let ret_slot = if ret_ty == Ty::Void {
                None
            } else {
                Some(b.alloca("cff_ret", ret_ty))
            };
            rewrite_terminator(
                b, &entry_term, state, ret_slot, ret_ty, dispatch, return_block, &state_of,
            );

            let mut b = Builder::at_end(f, dispatch);
            let loaded = b.load("load_cff_state", Ty::I32, Operand::Value(state));
            let cases: Vec<(i64, BlockId)> = origs
                .iter()
                .enumerate()
                .map(|(i, &blk)| (i as i64 + 1, blk))
                .collect();
            b.switch(Operand::Value(loaded), return_block, cases);

            for &blk in &origs {
                f.attach_block(blk);
                let term = f.block(blk).term.clone();
                match term {
                    Terminator::Ret { .. } | Terminator::Br { .. } | Terminator::CondBr { .. } => {
                        let b = Builder::at_end(f, blk);
                        rewrite_terminator(
                            b, &term, state, ret_slot, ret_ty, dispatch, return_block, &state_of,
                        );
                    }
                    // Switch targets stay direct edges to reattached blocks;
                    // unreachable stays as is.
                    Terminator::Switch { .. } | Terminator::Unreachable => {}
                }
            }

            let mut b = Builder::at_end(f, return_block);
            match ret_slot {
                None => b.ret(None),
                Some(slot) => {
                    let rv = b.load("cff_out", ret_ty, Operand::Value(slot));
                    b.ret(Some(Operand::Value(rv)));
                }
            }

            flattened += 1;
        }

        reporter.bump(FUNCTIONS_FLATTENED, flattened);
        if flattened > 0 {
            debug!("flattened {flattened} functions");
        }
        Ok(flattened > 0)
    }
}

/// Replaces one block's terminator with the equivalent state-machine step:
/// returns store the value and the exit state, branches store the successor
/// state (through a `select` for conditional branches) and loop back to the
/// dispatcher.
#[allow(clippy::too_many_arguments)]
fn rewrite_terminator(
    mut b: Builder<'_>,
    term: &Terminator,
    state: murk_core::ir::ValueId,
    ret_slot: Option<murk_core::ir::ValueId>,
    ret_ty: Ty,
    dispatch: BlockId,
    return_block: BlockId,
    state_of: &dyn Fn(BlockId) -> i64,
) {
    match term {
        Terminator::Ret { value } => {
            if let (Some(slot), Some(v)) = (ret_slot, value) {
                b.store(ret_ty, v.clone(), Operand::Value(slot));
            }
            b.store(Ty::I32, Operand::i32(0), Operand::Value(state));
            b.br(return_block);
        }
        Terminator::Br { target } => {
            b.store(Ty::I32, Operand::i32(state_of(*target)), Operand::Value(state));
            b.br(dispatch);
        }
        Terminator::CondBr {
            cond,
            on_true,
            on_false,
        } => {
            let next = b.select(
                "cff_next",
                Ty::I32,
                cond.clone(),
                Operand::i32(state_of(*on_true)),
                Operand::i32(state_of(*on_false)),
            );
            b.store(Ty::I32, Operand::Value(next), Operand::Value(state));
            b.br(dispatch);
        }
        Terminator::Switch { .. } | Terminator::Unreachable => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::interp::Interp;
    use murk_core::parser::parse_module;
    use murk_core::printer::print_module;
    use murk_core::verifier::{reachable_blocks, verify_module};

    const ABS: &str = r#"
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
"#;

    fn run(module: &mut Module) -> (bool, Reporter) {
        let mut rng = XorShift32::new(1);
        let mut reporter = Reporter::new(None);
        let changed = Flatten.apply(module, &mut rng, &mut reporter).unwrap();
        (changed, reporter)
    }

    #[test]
    fn flattens_into_dispatcher_shape() {
        let mut m = parse_module(ABS).unwrap();
        let (changed, reporter) = run(&mut m);
        assert!(changed);
        assert_eq!(reporter.get(FUNCTIONS_FLATTENED), 1);
        verify_module(&m).unwrap();

        let f = m.func("abs").unwrap();
        let names: Vec<_> = f.blocks.iter().map(|&b| f.block(b).name.clone()).collect();
        assert_eq!(names, vec!["entry", "dispatch", "returnBlock", "flip", "keep"]);

        // The dispatcher switches over the state with one case per original
        // non-entry block and defaults to the sentinel return block.
        let dispatch = f.blocks[1];
        match &f.block(dispatch).term {
            Terminator::Switch { default, cases, .. } => {
                assert_eq!(*default, f.blocks[2]);
                assert_eq!(cases.len(), 2);
            }
            other => panic!("dispatch ends in {other:?}"),
        }

        let mut interp = Interp::new(&m);
        for x in [-3, 0, 7] {
            assert_eq!(interp.call_i32("abs", &[x]).unwrap(), x.abs());
        }
    }

    #[test]
    fn every_block_reachable_after_flattening() {
        let mut m = parse_module(ABS).unwrap();
        run(&mut m);
        let f = m.func("abs").unwrap();
        let reached = reachable_blocks(f);
        assert_eq!(reached.len(), f.blocks.len());
    }

    #[test]
    fn preserves_loops_with_phis() {
        let text = r#"
module m
func @sum_to(i32 %n) -> i32 {
entry:
  br %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %next, %loop ]
  %acc = phi i32 [ 0, %entry ], [ %acc2, %loop ]
  %acc2 = add i32 %acc, %i
  %next = add i32 %i, 1
  %done = icmp sgt i32 %next, %n
  br i1 %done, %exit, %loop
exit:
  ret i32 %acc2
}
"#;
        let mut m = parse_module(text).unwrap();
        let (changed, _) = run(&mut m);
        assert!(changed);
        verify_module(&m).unwrap();
        let mut interp = Interp::new(&m);
        assert_eq!(interp.call_i32("sum_to", &[5]).unwrap(), 15);
        assert_eq!(interp.call_i32("sum_to", &[0]).unwrap(), 0);
    }

    #[test]
    fn skips_small_functions() {
        let text = r#"
module m
func @tiny(i32 %x) -> i32 {
entry:
  br %done
done:
  ret i32 %x
}
"#;
        let mut m = parse_module(text).unwrap();
        let (changed, reporter) = run(&mut m);
        assert!(!changed);
        assert_eq!(reporter.get(FUNCTIONS_FLATTENED), 0);
    }

    #[test]
    fn return_values_survive() {
        let text = r#"
module m
func @pick(i32 %x) -> i32 {
entry:
  %pos = icmp sgt i32 %x, 0
  br i1 %pos, %a, %b
a:
  %ra = mul i32 %x, 2
  ret i32 %ra
b:
  %rb = sub i32 0, %x
  ret i32 %rb
}
"#;
        let mut m = parse_module(text).unwrap();
        run(&mut m);
        verify_module(&m).unwrap();
        let mut interp = Interp::new(&m);
        assert_eq!(interp.call_i32("pick", &[6]).unwrap(), 12);
        assert_eq!(interp.call_i32("pick", &[-4]).unwrap(), 4);
    }

    #[test]
    fn deterministic_output() {
        let mut a = parse_module(ABS).unwrap();
        let mut b = parse_module(ABS).unwrap();
        run(&mut a);
        run(&mut b);
        assert_eq!(print_module(&a), print_module(&b));
    }
}
