/// Canonical textual form of a module.
///
/// The printer is the "IR out" half of the round-trippable external interface.
/// Output is byte-stable: globals print in id order, functions and blocks in
/// layout order, and names come from the arenas, so two structurally identical
/// modules print identically. The determinism guarantee of the pipeline is
/// checked against this text.
use crate::ir::{
    BinOp, Const, Function, InstKind, Module, Operand, Pred, Terminator, Ty,
};
use std::fmt::Write;

pub fn print_module(m: &Module) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "module {}", m.name);

    let mut any = false;
    for (_, g) in m.globals() {
        any = true;
        let linkage = match g.linkage {
            crate::ir::Linkage::Private => "private",
            crate::ir::Linkage::External => "external",
        };
        let mut line = format!("global @{} = {linkage}", g.name);
        if g.unnamed_addr {
            line.push_str(" unnamed_addr");
        }
        line.push_str(if g.constant { " constant" } else { " mutable" });
        let _ = write!(line, " {}", g.ty);
        if let Some(init) = &g.init {
            let _ = write!(line, " {}", fmt_const(init));
        }
        let _ = writeln!(out, "{line}");
    }
    if any {
        out.push('\n');
    }

    for f in &m.funcs {
        if f.is_declaration() {
            let tys: Vec<String> = f
                .params
                .iter()
                .map(|&p| f.value(p).ty.to_string())
                .collect();
            let _ = writeln!(out, "declare @{}({}) -> {}", f.name, tys.join(", "), f.ret_ty);
        }
    }
    if m.funcs.iter().any(|f| f.is_declaration()) {
        out.push('\n');
    }

    for f in &m.funcs {
        if f.is_declaration() {
            continue;
        }
        print_function(&mut out, m, f);
        out.push('\n');
    }
    out
}

fn print_function(out: &mut String, m: &Module, f: &Function) {
    let params: Vec<String> = f
        .params
        .iter()
        .map(|&p| format!("{} %{}", f.value(p).ty, f.value(p).name))
        .collect();
    let _ = writeln!(out, "func @{}({}) -> {} {{", f.name, params.join(", "), f.ret_ty);
    for &b in &f.blocks {
        let data = f.block(b);
        let _ = writeln!(out, "{}:", data.name);
        for &iid in &data.insts {
            let _ = writeln!(out, "  {}", fmt_inst(m, f, iid));
        }
        let _ = writeln!(out, "  {}", fmt_term(m, f, &data.term));
    }
    let _ = writeln!(out, "}}");
}

fn fmt_inst(m: &Module, f: &Function, iid: crate::ir::InstId) -> String {
    let inst = f.inst(iid);
    let dest = inst
        .dest
        .map(|v| format!("%{} = ", f.value(v).name))
        .unwrap_or_default();
    let body = match &inst.kind {
        InstKind::Alloca { ty } => format!("alloca {ty}"),
        InstKind::Load { ty, ptr } => format!("load {ty}, ptr {}", fmt_op(m, f, ptr)),
        InstKind::Store { ty, value, ptr } => format!(
            "store {ty} {}, ptr {}",
            fmt_op(m, f, value),
            fmt_op(m, f, ptr)
        ),
        InstKind::Bin { op, ty, lhs, rhs } => format!(
            "{} {ty} {}, {}",
            bin_name(*op),
            fmt_op(m, f, lhs),
            fmt_op(m, f, rhs)
        ),
        InstKind::Icmp { pred, ty, lhs, rhs } => format!(
            "icmp {} {ty} {}, {}",
            pred_name(*pred),
            fmt_op(m, f, lhs),
            fmt_op(m, f, rhs)
        ),
        InstKind::Select {
            ty,
            cond,
            on_true,
            on_false,
        } => format!(
            "select i1 {}, {ty} {}, {ty} {}",
            fmt_op(m, f, cond),
            fmt_op(m, f, on_true),
            fmt_op(m, f, on_false)
        ),
        InstKind::Gep { base } => format!("gep ptr {}", fmt_op(m, f, base)),
        InstKind::Call { callee, ret, args } => {
            let args: Vec<String> = args
                .iter()
                .map(|(ty, op)| format!("{ty} {}", fmt_op(m, f, op)))
                .collect();
            format!("call {ret} @{callee}({})", args.join(", "))
        }
        InstKind::Phi { ty, incoming } => {
            let inc: Vec<String> = incoming
                .iter()
                .map(|(op, b)| format!("[ {}, %{} ]", fmt_op(m, f, op), f.block(*b).name))
                .collect();
            format!("phi {ty} {}", inc.join(", "))
        }
    };
    format!("{dest}{body}")
}

fn fmt_term(m: &Module, f: &Function, term: &Terminator) -> String {
    match term {
        Terminator::Br { target } => format!("br %{}", f.block(*target).name),
        Terminator::CondBr {
            cond,
            on_true,
            on_false,
        } => format!(
            "br i1 {}, %{}, %{}",
            fmt_op(m, f, cond),
            f.block(*on_true).name,
            f.block(*on_false).name
        ),
        Terminator::Switch {
            value,
            default,
            cases,
        } => {
            let cases: Vec<String> = cases
                .iter()
                .map(|(k, b)| format!("{k}: %{}", f.block(*b).name))
                .collect();
            format!(
                "switch {} {}, %{} [ {} ]",
                f.operand_ty(value),
                fmt_op(m, f, value),
                f.block(*default).name,
                cases.join(", ")
            )
        }
        Terminator::Ret { value: Some(v) } => {
            format!("ret {} {}", f.operand_ty(v), fmt_op(m, f, v))
        }
        Terminator::Ret { value: None } => "ret void".to_string(),
        Terminator::Unreachable => "unreachable".to_string(),
    }
}

fn fmt_op(m: &Module, f: &Function, op: &Operand) -> String {
    match op {
        Operand::Value(v) => format!("%{}", f.value(*v).name),
        Operand::Global(g) => match m.global(*g) {
            Some(g) => format!("@{}", g.name),
            None => "@<deleted>".to_string(),
        },
        Operand::Const(c) => fmt_const(c),
    }
}

fn fmt_const(c: &Const) -> String {
    match c {
        Const::Int { value, .. } => value.to_string(),
        Const::Bytes(bytes) => fmt_bytes(bytes),
        Const::Zero(_) => "zeroinitializer".to_string(),
        Const::Undef(_) => "undef".to_string(),
    }
}

/// Byte arrays print as `c"..."` when every byte is plain printable ASCII or
/// NUL, and as `x"<hex>"` otherwise (encrypted payloads land here).
fn fmt_bytes(bytes: &[u8]) -> String {
    let plain = bytes
        .iter()
        .all(|&b| b == 0 || ((0x20..0x7f).contains(&b) && b != b'"' && b != b'\\'));
    if plain {
        let mut s = String::from("c\"");
        for &b in bytes {
            if b == 0 {
                s.push_str("\\00");
            } else {
                s.push(b as char);
            }
        }
        s.push('"');
        s
    } else {
        format!("x\"{}\"", hex::encode(bytes))
    }
}

fn bin_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::Shl => "shl",
        BinOp::Lshr => "lshr",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
    }
}

fn pred_name(pred: Pred) -> &'static str {
    match pred {
        Pred::Eq => "eq",
        Pred::Ne => "ne",
        Pred::Slt => "slt",
        Pred::Sle => "sle",
        Pred::Sgt => "sgt",
        Pred::Sge => "sge",
        Pred::Ult => "ult",
        Pred::Ugt => "ugt",
    }
}
