/// Module verifier.
///
/// Invoked by the pipeline after every pass: a failure means a transform
/// produced malformed IR and the run must abort rather than write invalid
/// output. The checks mirror the structural invariants the passes are required
/// to preserve: terminators reference attached blocks, phi incoming lists
/// match predecessor sets, every use is dominated by its definition, and calls
/// match their callee's signature.
use crate::ir::{BlockId, Function, InstId, InstKind, Module, Operand, Site, Ty, ValueDef};
use murk_utils::errors::VerifyError;
use petgraph::algo::dominators::{simple_fast, Dominators};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use std::collections::{BTreeSet, HashMap, HashSet};

pub fn verify_module(m: &Module) -> Result<(), VerifyError> {
    for f in &m.funcs {
        if !f.is_declaration() {
            verify_function(m, f)?;
        }
    }
    Ok(())
}

/// Blocks reachable from the entry along terminator edges.
pub fn reachable_blocks(f: &Function) -> HashSet<BlockId> {
    let (graph, nodes) = build_cfg(f);
    let mut reached = HashSet::new();
    let Some(entry) = f.entry() else {
        return reached;
    };
    let mut dfs = Dfs::new(&graph, nodes[&entry]);
    while let Some(n) = dfs.next(&graph) {
        reached.insert(graph[n]);
    }
    reached
}

fn build_cfg(f: &Function) -> (DiGraph<BlockId, ()>, HashMap<BlockId, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut nodes = HashMap::new();
    for &b in &f.blocks {
        nodes.insert(b, graph.add_node(b));
    }
    for &b in &f.blocks {
        for succ in f.block(b).term.successors() {
            if let Some(&t) = nodes.get(&succ) {
                graph.add_edge(nodes[&b], t, ());
            }
        }
    }
    (graph, nodes)
}

fn verify_function(m: &Module, f: &Function) -> Result<(), VerifyError> {
    let func = || f.name.clone();
    let entry = f.entry().ok_or(VerifyError::NoEntryBlock { func: func() })?;

    // Where each attached instruction lives, for definition lookups.
    let mut inst_home: HashMap<InstId, (BlockId, usize)> = HashMap::new();
    for &b in &f.blocks {
        for (i, &iid) in f.block(b).insts.iter().enumerate() {
            inst_home.insert(iid, (b, i));
        }
    }

    // Structural checks first: attached successors and phi shape.
    for &b in &f.blocks {
        let data = f.block(b);
        for succ in data.term.successors() {
            if !f.blocks.contains(&succ) {
                return Err(VerifyError::DetachedBlock {
                    func: func(),
                    block: data.name.clone(),
                    target: f.block(succ).name.clone(),
                });
            }
        }
        let preds: BTreeSet<BlockId> = f.preds(b).into_iter().collect();
        for (i, &iid) in data.insts.iter().enumerate() {
            let inst = f.inst(iid);
            if let InstKind::Phi { incoming, .. } = &inst.kind {
                if i > 0 && !f.inst(data.insts[i - 1]).kind.is_phi() {
                    return Err(VerifyError::PhiMismatch {
                        func: func(),
                        block: data.name.clone(),
                        detail: "phi after non-phi instruction".to_string(),
                    });
                }
                if b == entry && preds.is_empty() {
                    return Err(VerifyError::PhiInEntry { func: func() });
                }
                let inc: BTreeSet<BlockId> = incoming.iter().map(|(_, p)| *p).collect();
                if inc != preds {
                    let names = |set: &BTreeSet<BlockId>| {
                        set.iter()
                            .map(|&p| f.block(p).name.clone())
                            .collect::<Vec<_>>()
                            .join(",")
                    };
                    return Err(VerifyError::PhiMismatch {
                        func: func(),
                        block: data.name.clone(),
                        detail: format!(
                            "incoming [{}] vs predecessors [{}]",
                            names(&inc),
                            names(&preds)
                        ),
                    });
                }
            }
        }
    }

    let (graph, nodes) = build_cfg(f);
    let doms = simple_fast(&graph, nodes[&entry]);
    let reachable: HashSet<BlockId> = {
        let mut r = HashSet::new();
        let mut dfs = Dfs::new(&graph, nodes[&entry]);
        while let Some(n) = dfs.next(&graph) {
            r.insert(graph[n]);
        }
        r
    };

    // Operand checks: globals resolve, values are live and dominated.
    for &b in &f.blocks {
        let data = f.block(b);
        for (i, &iid) in data.insts.iter().enumerate() {
            let inst = f.inst(iid);
            if let InstKind::Phi { incoming, .. } = &inst.kind {
                for (op, pred) in incoming {
                    check_operand(
                        m, f, &inst_home, &doms, &nodes, &reachable, op, b,
                        // A phi use happens at the end of the incoming edge.
                        Site::Term, Some(*pred),
                    )?;
                }
            } else {
                let mut result = Ok(());
                inst.kind.for_each_operand(|op| {
                    if result.is_ok() {
                        result = check_operand(
                            m, f, &inst_home, &doms, &nodes, &reachable, op, b,
                            Site::Inst(i), None,
                        );
                    }
                });
                result?;
            }
            if let InstKind::Call { callee, ret, args } = &inst.kind {
                check_call(m, f, callee, *ret, args)?;
            }
        }
        let mut result = Ok(());
        data.term.for_each_operand(|op| {
            if result.is_ok() {
                result = check_operand(
                    m, f, &inst_home, &doms, &nodes, &reachable, op, b, Site::Term, None,
                );
            }
        });
        result?;
    }
    tracing::debug!("function `{}` verified ({} blocks)", f.name, f.blocks.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn check_operand(
    m: &Module,
    f: &Function,
    inst_home: &HashMap<InstId, (BlockId, usize)>,
    doms: &Dominators<NodeIndex>,
    nodes: &HashMap<BlockId, NodeIndex>,
    reachable: &HashSet<BlockId>,
    op: &Operand,
    use_block: BlockId,
    use_site: Site,
    phi_pred: Option<BlockId>,
) -> Result<(), VerifyError> {
    let block_name = |b: BlockId| f.block(b).name.clone();
    match op {
        Operand::Const(_) => Ok(()),
        Operand::Global(g) => {
            if m.global(*g).is_none() {
                return Err(VerifyError::DeletedGlobal {
                    func: f.name.clone(),
                    block: block_name(use_block),
                });
            }
            Ok(())
        }
        Operand::Value(v) => {
            let data = f.value(*v);
            match data.def {
                ValueDef::Param(i) if i < f.params.len() => Ok(()),
                ValueDef::Param(_) => Err(VerifyError::DeletedValue {
                    func: f.name.clone(),
                    block: block_name(use_block),
                    value: data.name.clone(),
                }),
                ValueDef::Inst(iid) => {
                    let Some(&(def_block, def_idx)) = inst_home.get(&iid) else {
                        return Err(VerifyError::DeletedValue {
                            func: f.name.clone(),
                            block: block_name(use_block),
                            value: data.name.clone(),
                        });
                    };
                    // The effective point of use: a phi reads its operand at
                    // the end of the incoming predecessor block.
                    let (at_block, at_site) = match phi_pred {
                        Some(pred) => (pred, Site::Term),
                        None => (use_block, use_site),
                    };
                    if !reachable.contains(&at_block) {
                        return Ok(());
                    }
                    let dominated = if def_block == at_block {
                        match at_site {
                            Site::Term => true,
                            Site::Inst(use_idx) => def_idx < use_idx,
                        }
                    } else {
                        reachable.contains(&def_block)
                            && dominates(doms, nodes[&def_block], nodes[&at_block])
                    };
                    if dominated {
                        Ok(())
                    } else {
                        Err(VerifyError::UseNotDominated {
                            func: f.name.clone(),
                            block: block_name(use_block),
                            value: data.name.clone(),
                        })
                    }
                }
            }
        }
    }
}

fn dominates(doms: &Dominators<NodeIndex>, a: NodeIndex, b: NodeIndex) -> bool {
    if a == b {
        return true;
    }
    let mut cur = b;
    while let Some(idom) = doms.immediate_dominator(cur) {
        if idom == a {
            return true;
        }
        cur = idom;
    }
    false
}

fn check_call(
    m: &Module,
    f: &Function,
    callee: &str,
    ret: Ty,
    args: &[(Ty, crate::ir::Operand)],
) -> Result<(), VerifyError> {
    let Some(target) = m.func(callee) else {
        return Err(VerifyError::UnknownCallee {
            func: f.name.clone(),
            callee: callee.to_string(),
        });
    };
    let param_tys: Vec<Ty> = target.params.iter().map(|&p| target.value(p).ty).collect();
    let arg_tys: Vec<Ty> = args.iter().map(|(t, _)| *t).collect();
    if param_tys != arg_tys || target.ret_ty != ret {
        return Err(VerifyError::SignatureMismatch {
            func: f.name.clone(),
            callee: callee.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_module;

    #[test]
    fn accepts_well_formed_module() {
        let m = parse_module(
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
        verify_module(&m).unwrap();
    }

    #[test]
    fn rejects_use_before_def() {
        let m = parse_module(
            r#"
module m
func @f(i32 %x) -> i32 {
entry:
  br %a
a:
  ret i32 %later
b:
  %later = add i32 %x, 1
  br %a
}
"#,
        )
        .unwrap();
        // %later is defined in an unreachable block but used in a reachable one.
        assert!(matches!(
            verify_module(&m),
            Err(VerifyError::UseNotDominated { .. })
        ));
    }

    #[test]
    fn rejects_phi_predecessor_mismatch() {
        let mut m = parse_module(
            r#"
module m
func @f(i32 %x) -> i32 {
entry:
  br %join
other:
  br %join
join:
  %v = phi i32 [ 1, %entry ], [ 2, %other ]
  ret i32 %v
}
"#,
        )
        .unwrap();
        verify_module(&m).unwrap();
        // Detach `other` from the layout: the phi still names it.
        let f = m.func_mut("f").unwrap();
        let other = f.blocks[1];
        f.detach_block(other);
        assert!(matches!(
            verify_module(&m),
            Err(VerifyError::PhiMismatch { .. })
        ));
    }

    #[test]
    fn rejects_call_signature_mismatch() {
        let m = parse_module(
            r#"
module m
declare @helper(i32) -> i32
func @f() -> i32 {
entry:
  %r = call i32 @helper(i32 1, i32 2)
  ret i32 %r
}
"#,
        )
        .unwrap();
        assert!(matches!(
            verify_module(&m),
            Err(VerifyError::SignatureMismatch { .. })
        ));
    }

    #[test]
    fn rejects_unknown_callee() {
        let m = parse_module(
            r#"
module m
func @f() -> void {
entry:
  call void @missing()
  ret void
}
"#,
        )
        .unwrap();
        assert!(matches!(
            verify_module(&m),
            Err(VerifyError::UnknownCallee { .. })
        ));
    }

    #[test]
    fn reachability_follows_edges() {
        let m = parse_module(
            r#"
module m
func @f() -> i32 {
entry:
  br %live
live:
  ret i32 1
dead:
  ret i32 2
}
"#,
        )
        .unwrap();
        let f = m.func("f").unwrap();
        let reached = reachable_blocks(f);
        assert_eq!(reached.len(), 2);
        assert!(!reached.contains(&f.blocks[2]));
    }
}
