/// Fake loop insertion (`fake-loop`).
///
/// Prepends a bounded counted loop that performs cheap arithmetic with no
/// observable effect, then falls through into the original function body. The
/// counter lives in a stack slot that is live across the back edge, so the
/// loop survives trivial dead-code elimination.
use crate::Transform;
use murk_core::builder::Builder;
use murk_core::ir::{BinOp, InstKind, Operand, Pred, Ty};
use murk_core::{Module, RUNTIME_PREFIX};
use murk_utils::config::FAKE_LOOP_SALT;
use murk_utils::errors::TransformError;
use murk_utils::prng::XorShift32;
use murk_utils::reporter::{Reporter, FAKE_LOOPS_ADDED};
use tracing::debug;

pub struct FakeLoop;

impl Transform for FakeLoop {
    fn name(&self) -> &'static str {
        "fake-loop"
    }

    fn seed_salt(&self) -> u32 {
        FAKE_LOOP_SALT
    }

    fn apply(
        &self,
        module: &mut Module,
        rng: &mut XorShift32,
        reporter: &mut Reporter,
    ) -> Result<bool, TransformError> {
        let mut added = 0u64;
        for fi in 0..module.funcs.len() {
            let f = &mut module.funcs[fi];
            if f.is_declaration() || f.name.starts_with(RUNTIME_PREFIX) || f.blocks.len() < 3 {
                continue;
            }
            let Some(entry) = f.entry() else { continue };

            // First real insertion point: leading phis stay in the entry.
            let split_at = f
                .block(entry)
                .insts
                .iter()
                .position(|&iid| !f.inst(iid).kind.is_phi())
                .unwrap_or(f.block(entry).insts.len());

            let header = f.add_block_after("fake.loop.header", entry);
            let body = f.add_block_after("fake.loop.body", header);
            let after = f.add_block_after("fake.loop.after", body);

            // Move the entry's tail, terminator included, behind the loop.
            let tail = f.block_mut(entry).insts.split_off(split_at);
            f.block_mut(after).insts = tail;
            f.block_mut(after).term = f.block(entry).term.clone();
            for succ in f.block(after).term.successors() {
                relabel_phi_pred(f, succ, entry, after);
            }

            let b = Builder::at_end(f, entry);
            b.br(header);

            let count = ((rng.next() % 5) + 3) as i64;
            let mut b = Builder::at_end(f, header);
            let cnt = b.alloca("fake_cnt", Ty::I32);
            b.store(Ty::I32, Operand::i32(count), Operand::Value(cnt));
            b.br(body);

            let mut b = Builder::at_end(f, body);
            let v = b.load("fake_val", Ty::I32, Operand::Value(cnt));
            let dec = b.bin("fake_dec", BinOp::Sub, Ty::I32, Operand::Value(v), Operand::i32(1));
            b.store(Ty::I32, Operand::Value(dec), Operand::Value(cnt));
            // Dead arithmetic, deliberately unused.
            let tmp = b.bin("fake_tmp", BinOp::Add, Ty::I32, Operand::Value(dec), Operand::i32(7));
            b.bin("fake_shift", BinOp::Lshr, Ty::I32, Operand::Value(tmp), Operand::i32(1));
            let cond = b.icmp("fake_cond", Pred::Sgt, Ty::I32, Operand::Value(dec), Operand::i32(0));
            b.cond_br(Operand::Value(cond), body, after);

            added += 1;
        }

        reporter.bump(FAKE_LOOPS_ADDED, added);
        if added > 0 {
            debug!("added {added} fake loops");
        }
        Ok(added > 0)
    }
}

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
