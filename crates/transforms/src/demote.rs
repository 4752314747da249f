/// Register-to-memory demotion, the pre-pass control-flow flattening relies
/// on.
///
/// Flattening rewires every edge through the central dispatcher, which
/// invalidates both phi incoming labels and cross-block dominance. Demoting
/// phis and block-crossing values to entry-block stack slots first makes every
/// SSA value block-local, so the subsequent CFG surgery cannot break a
/// def-use relationship. Re-promotion afterwards is deliberately not done.
use murk_core::builder::Builder;
use murk_core::ir::{Function, InstKind, Operand, Site, Ty, UseSite, ValueId};

/// Demotes every phi node to a stack slot: one store per incoming edge at the
/// end of the predecessor, one load at the head of the phi's block. Returns
/// the number of phis demoted.
pub fn demote_phis(f: &mut Function) -> usize {
    let Some(entry) = f.entry() else { return 0 };

    struct PhiInfo {
        block: murk_core::ir::BlockId,
        value: ValueId,
        ty: Ty,
        incoming: Vec<(Operand, murk_core::ir::BlockId)>,
        slot: ValueId,
    }

    // Collect the leading phi group of every block.
    let mut phis: Vec<PhiInfo> = Vec::new();
    for &b in &f.blocks.clone() {
        for &iid in &f.block(b).insts.clone() {
            let inst = f.inst(iid);
            let InstKind::Phi { ty, incoming } = &inst.kind else {
                break;
            };
            let (ty, incoming) = (*ty, incoming.clone());
            let Some(value) = inst.dest else { break };
            phis.push(PhiInfo {
                block: b,
                value,
                ty,
                incoming,
                slot: value, // placeholder, assigned below
            });
        }
    }
    if phis.is_empty() {
        return 0;
    }

    // All slots go to the entry block, after any phis it still holds.
    let entry_phi_end = f
        .block(entry)
        .insts
        .iter()
        .position(|&iid| !f.inst(iid).kind.is_phi())
        .unwrap_or(f.block(entry).insts.len());
    let mut slot_at = entry_phi_end;
    for phi in &mut phis {
        let hint = format!("{}.slot", f.value(phi.value).name);
        let mut b = Builder::before(f, entry, slot_at);
        phi.slot = b.alloca(&hint, phi.ty);
        slot_at += 1;
    }
    let slot_region_end = slot_at;

    // One store per incoming edge, at the end of the predecessor.
    for phi in &phis {
        for (op, pred) in &phi.incoming {
            let mut b = Builder::at_end(f, *pred);
            b.store(phi.ty, op.clone(), Operand::Value(phi.slot));
        }
    }

    // Drop the phi instructions, then lay the loads down at each block head
    // (after the slot region in the entry block). Loads happen before any
    // stores of the same block, so the parallel-copy semantics of the phi
    // group are preserved even across swap patterns.
    let mut replacements: Vec<(ValueId, ValueId)> = Vec::new();
    let mut bi = 0;
    while bi < phis.len() {
        let block = phis[bi].block;
        let group_end = phis[bi..]
            .iter()
            .position(|p| p.block != block)
            .map(|o| bi + o)
            .unwrap_or(phis.len());
        for _ in bi..group_end {
            f.remove_inst(block, 0);
        }
        let base = if block == entry { slot_region_end - group_end + bi } else { 0 };
        for (j, phi) in phis[bi..group_end].iter().enumerate() {
            let hint = format!("{}.demoted", f.value(phi.value).name);
            let mut b = Builder::before(f, block, base + j);
            let loaded = b.load(&hint, phi.ty, Operand::Value(phi.slot));
            replacements.push((phi.value, loaded));
        }
        bi = group_end;
    }
    for (old, new) in replacements {
        f.replace_all_value_uses(old, Operand::Value(new));
    }
    phis.len()
}

/// Spills every value that is used outside its defining block: a store right
/// after the definition, a fresh load in front of every cross-block use.
/// Returns the number of values spilled.
pub fn demote_cross_block_values(f: &mut Function) -> usize {
    let Some(entry) = f.entry() else { return 0 };

    // Candidates first; the rewrite below invalidates positions, not ids.
    let mut candidates: Vec<ValueId> = Vec::new();
    for &b in &f.blocks {
        for &iid in &f.block(b).insts {
            if let Some(v) = f.inst(iid).dest {
                if f.value_uses(v).iter().any(|u| u.block != b) {
                    candidates.push(v);
                }
            }
        }
    }

    let spilled = candidates.len();
    for v in candidates {
        let ty = f.value(v).ty;
        let slot = {
            let hint = format!("{}.spill", f.value(v).name);
            let mut b = Builder::at_start(f, entry);
            b.alloca(&hint, ty)
        };

        // Store immediately after the definition.
        let def = f.blocks.iter().copied().find_map(|b| {
            f.block(b)
                .insts
                .iter()
                .position(|&iid| f.inst(iid).dest == Some(v))
                .map(|i| (b, i))
        });
        let Some((def_block, def_idx)) = def else { continue };
        {
            let mut b = Builder::before(f, def_block, def_idx + 1);
            b.store(ty, Operand::Value(v), Operand::Value(slot));
        }

        // Reload in front of every use outside the defining block.
        loop {
            let site = f
                .value_uses(v)
                .into_iter()
                .find(|u| u.block != def_block);
            let Some(site) = site else { break };
            let hint = format!("{}.reload", f.value(v).name);
            match site.site {
                Site::Inst(i) => {
                    let loaded = {
                        let mut b = Builder::before(f, site.block, i);
                        b.load(&hint, ty, Operand::Value(slot))
                    };
                    f.replace_operand_at(
                        UseSite {
                            block: site.block,
                            site: Site::Inst(i + 1),
                        },
                        &Operand::Value(v),
                        &Operand::Value(loaded),
                    );
                }
                Site::Term => {
                    let loaded = {
                        let mut b = Builder::at_end(f, site.block);
                        b.load(&hint, ty, Operand::Value(slot))
                    };
                    f.replace_operand_at(site, &Operand::Value(v), &Operand::Value(loaded));
                }
            }
        }
    }
    spilled
}

#[cfg(test)]
mod tests {
    use super::*;
    use murk_core::interp::Interp;
    use murk_core::parser::parse_module;
    use murk_core::verifier::verify_module;

    const LOOP_WITH_PHI: &str = r#"
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

    #[test]
    fn phi_demotion_preserves_loop_semantics() {
        let mut m = parse_module(LOOP_WITH_PHI).unwrap();
        let f = m.func_mut("sum_to").unwrap();
        let demoted = demote_phis(f);
        assert_eq!(demoted, 2);

        // No phi survives.
        let f = m.func("sum_to").unwrap();
        for &b in &f.blocks {
            for &iid in &f.block(b).insts {
                assert!(!f.inst(iid).kind.is_phi());
            }
        }
        verify_module(&m).unwrap();
        let mut interp = Interp::new(&m);
        assert_eq!(interp.call_i32("sum_to", &[5]).unwrap(), 15);
    }

    #[test]
    fn swap_pattern_keeps_parallel_copy_semantics() {
        let text = r#"
module m
func @swap_sum(i32 %n) -> i32 {
entry:
  br %loop
loop:
  %a = phi i32 [ 1, %entry ], [ %b, %loop ]
  %b = phi i32 [ 2, %entry ], [ %a, %loop ]
  %k = phi i32 [ 0, %entry ], [ %k2, %loop ]
  %k2 = add i32 %k, 1
  %done = icmp sge i32 %k2, %n
  br i1 %done, %exit, %loop
exit:
  %r = mul i32 %a, 10
  %out = add i32 %r, %b
  ret i32 %out
}
"#;
        let mut m = parse_module(text).unwrap();
        let mut baseline = Interp::new(&m);
        let expect_2 = baseline.call_i32("swap_sum", &[2]).unwrap();
        let expect_3 = baseline.call_i32("swap_sum", &[3]).unwrap();

        let f = m.func_mut("swap_sum").unwrap();
        demote_phis(f);
        verify_module(&m).unwrap();
        let mut interp = Interp::new(&m);
        assert_eq!(interp.call_i32("swap_sum", &[2]).unwrap(), expect_2);
        assert_eq!(interp.call_i32("swap_sum", &[3]).unwrap(), expect_3);
    }

    #[test]
    fn cross_block_values_become_block_local() {
        let text = r#"
module m
func @f(i32 %x) -> i32 {
entry:
  %double = add i32 %x, %x
  br %use
use:
  %r = add i32 %double, 1
  ret i32 %r
}
"#;
        let mut m = parse_module(text).unwrap();
        let f = m.func_mut("f").unwrap();
        let spilled = demote_cross_block_values(f);
        assert_eq!(spilled, 1);

        // Every value use now sits in its defining block.
        let f = m.func("f").unwrap();
        for &b in &f.blocks {
            for &iid in &f.block(b).insts {
                if let Some(v) = f.inst(iid).dest {
                    assert!(f.value_uses(v).iter().all(|u| u.block == b));
                }
            }
        }
        verify_module(&m).unwrap();
        let mut interp = Interp::new(&m);
        assert_eq!(interp.call_i32("f", &[5]).unwrap(), 11);
    }
}
