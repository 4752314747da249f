/// Bogus block insertion (`bogus-insert`).
///
/// Prepends to each admitted function an opaque-predicate-guarded diamond.
/// The predicate calls `__obf_opaque`, which cannot be constant-folded
/// statically, and both arms store distinct dead values into a scratch slot
/// before flowing forward into the rest of the function, so neither arm can be
/// proven unreachable or removed by naive dead-code elimination.
use crate::Transform;
use murk_core::builder::Builder;
use murk_core::ir::{BinOp, InstKind, Operand, Pred, Ty};
use murk_core::{Module, RUNTIME_PREFIX};
use murk_utils::config::BOGUS_INSERT_SALT;
use murk_utils::errors::TransformError;
use murk_utils::prng::XorShift32;
use murk_utils::reporter::{Reporter, BOGUS_BLOCKS_INSERTED};
use tracing::debug;

pub const OPAQUE_FN: &str = "__obf_opaque";

pub struct BogusInsert {
    /// Percent chance (0-100) that a function is admitted.
    ratio: u32,
}

impl BogusInsert {
    pub fn new(ratio: u32) -> Self {
        Self {
            ratio: ratio.min(100),
        }
    }
}

impl Transform for BogusInsert {
    fn name(&self) -> &'static str {
        "bogus-insert"
    }

    fn seed_salt(&self) -> u32 {
        BOGUS_INSERT_SALT
    }

    fn apply(
        &self,
        module: &mut Module,
        rng: &mut XorShift32,
        reporter: &mut Reporter,
    ) -> Result<bool, TransformError> {
        module.get_or_declare(OPAQUE_FN, &[Ty::I32], Ty::I32)?;

        let mut inserted = 0u64;
        for fi in 0..module.funcs.len() {
            let f = &mut module.funcs[fi];
            if f.is_declaration() || f.name.starts_with(RUNTIME_PREFIX) {
                continue;
            }
            // Admission draw happens for every candidate so the stream stays
            // aligned across runs regardless of which functions are admitted.
            let p = rng.next() % 100;
            if p >= self.ratio {
                continue;
            }
            let Some(entry) = f.entry() else { continue };

            // First non-phi instruction; a function whose entry holds only a
            // terminator is too small to split.
            let phi_end = f
                .block(entry)
                .insts
                .iter()
                .position(|&iid| !f.inst(iid).kind.is_phi())
                .unwrap_or(f.block(entry).insts.len());
            if phi_end == f.block(entry).insts.len() {
                continue;
            }

            // Scratch slot first; allocas precede any non-alloca user.
            let ob_tmp = {
                let mut b = Builder::before(f, entry, phi_end);
                b.alloca("ob_tmp", Ty::I32)
            };

            // Split after the slot: the whole original tail moves so the entry
            // block is never left empty.
            let main = f.add_block_after("entry.main", entry);
            let tail: Vec<_> = f.block_mut(entry).insts.split_off(phi_end + 1);
            f.block_mut(main).insts = tail;
            f.block_mut(main).term = f.block(entry).term.clone();

            // Successor phis now arrive from the split tail.
            for succ in f.block(main).term.successors() {
                relabel_phi_pred(f, succ, entry, main);
            }

            let arg = (rng.next() & 0xFFFF) as i64;
            let ob_true = f.add_block_after("ob_true", entry);
            let ob_false = f.add_block_after("ob_false", ob_true);

            let mut b = Builder::at_end(f, entry);
            let call = b
                .call("op", OPAQUE_FN, Ty::I32, vec![(Ty::I32, Operand::i32(arg))])
                .ok_or_else(|| TransformError::Generic("opaque call has no result".into()))?;
            let masked = b.bin(
                "masked",
                BinOp::And,
                Ty::I32,
                Operand::Value(call),
                Operand::i32(0xFF),
            );
            let cmp = b.icmp(
                "cmp",
                Pred::Eq,
                Ty::I32,
                Operand::Value(masked),
                Operand::i32(0),
            );
            b.cond_br(Operand::Value(cmp), ob_true, ob_false);

            let mut b = Builder::at_end(f, ob_true);
            let t1 = b.bin("t1", BinOp::Add, Ty::I32, Operand::i32(arg), Operand::i32(13));
            let t2 = b.bin("t2", BinOp::Mul, Ty::I32, Operand::Value(t1), Operand::i32(7));
            b.store(Ty::I32, Operand::Value(t2), Operand::Value(ob_tmp));
            b.br(main);

            let mut b = Builder::at_end(f, ob_false);
            let f1 = b.bin("f1", BinOp::Sub, Ty::I32, Operand::i32(arg), Operand::i32(3));
            let f2 = b.bin("f2", BinOp::Shl, Ty::I32, Operand::Value(f1), Operand::i32(2));
            b.store(Ty::I32, Operand::Value(f2), Operand::Value(ob_tmp));
            b.br(main);

            inserted += 1;
        }

        reporter.bump(BOGUS_BLOCKS_INSERTED, inserted);
        if inserted > 0 {
            debug!("inserted {inserted} bogus diamonds");
        }
        Ok(inserted > 0)
    }
}

/// Rewrites phi incoming labels in `block` from `from` to `to` after a split.
fn relabel_phi_pred(
    f: &mut murk_core::ir::Function,
    block: murk_core::ir::BlockId,
    from: murk_core::ir::BlockId,
    to: murk_core::ir::BlockId,
) {
    let insts = f.block(block).insts.clone();
    for iid in insts {
        if let InstKind::Phi { incoming, .. } = &mut f.inst_mut(iid).kind {
            for (_, pred) in incoming {
                if *pred == from {
                    *pred = to;
                }
            }
        } else {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::interp::Interp;
    use murk_core::parser::parse_module;
    use murk_core::printer::print_module;
    use murk_core::verifier::verify_module;

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

    fn run(module: &mut Module, ratio: u32, seed: u32) -> (bool, Reporter) {
        let mut rng = XorShift32::new(seed);
        let mut reporter = Reporter::new(None);
        let changed = BogusInsert::new(ratio)
            .apply(module, &mut rng, &mut reporter)
            .unwrap();
        (changed, reporter)
    }

    #[test]
    fn inserts_diamond_and_preserves_semantics() {
        let mut m = parse_module(ABS).unwrap();
        let (changed, reporter) = run(&mut m, 100, 42);
        assert!(changed);
        assert_eq!(reporter.get(BOGUS_BLOCKS_INSERTED), 1);
        verify_module(&m).unwrap();

        let f = m.func("abs").unwrap();
        // entry, ob_true, ob_false, entry.main, flip, keep.
        assert_eq!(f.blocks.len(), 6);
        let names: Vec<_> = f.blocks.iter().map(|&b| f.block(b).name.clone()).collect();
        assert_eq!(
            names,
            vec!["entry", "ob_true", "ob_false", "entry.main", "flip", "keep"]
        );

        let mut interp = Interp::new(&m);
        for x in [-3, 0, 7] {
            assert_eq!(interp.call_i32("abs", &[x]).unwrap(), x.abs());
        }
    }

    #[test]
    fn ratio_zero_admits_nothing() {
        let mut m = parse_module(ABS).unwrap();
        let (changed, reporter) = run(&mut m, 0, 42);
        assert!(!changed);
        assert_eq!(reporter.get(BOGUS_BLOCKS_INSERTED), 0);
        assert_eq!(m.func("abs").unwrap().blocks.len(), 3);
    }

    #[test]
    fn skips_terminator_only_entry() {
        let text = r#"
module m
func @tiny() -> i32 {
entry:
  ret i32 0
}
"#;
        let mut m = parse_module(text).unwrap();
        let (changed, _) = run(&mut m, 100, 1);
        assert!(!changed);
        assert_eq!(m.func("tiny").unwrap().blocks.len(), 1);
    }

    #[test]
    fn deterministic_under_fixed_seed() {
        let mut a = parse_module(ABS).unwrap();
        let mut b = parse_module(ABS).unwrap();
        run(&mut a, 100, 9);
        run(&mut b, 100, 9);
        assert_eq!(print_module(&a), print_module(&b));
    }

    #[test]
    fn split_relabels_successor_phis() {
        let text = r#"
module m
func @join(i32 %x) -> i32 {
entry:
  %start = add i32 %x, 1
  br %merge
merge:
  %v = phi i32 [ %start, %entry ]
  ret i32 %v
}
"#;
        let mut m = parse_module(text).unwrap();
        let (changed, _) = run(&mut m, 100, 3);
        assert!(changed);
        verify_module(&m).unwrap();
        let mut interp = Interp::new(&m);
        assert_eq!(interp.call_i32("join", &[4]).unwrap(), 5);
    }
}
