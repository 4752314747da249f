/// Typed SSA intermediate representation.
///
/// The module is the unit the pipeline mutates in place: it owns globals and
/// functions, a function owns arenas of blocks, instructions and values that
/// are addressed through integer handles. There are no owning references
/// between IR entities, so control-flow surgery (splitting, detaching and
/// reattaching blocks) is plain index manipulation; use-lists are recovered by
/// scanning operand lists, which is cheap at the module sizes the passes see.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GlobalId(pub u32);

/// The type lattice is deliberately small: the passes only ever build i1/i32
/// arithmetic, byte arrays for string payloads and opaque pointers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ty {
    Void,
    I1,
    I8,
    I32,
    Ptr,
    /// A byte array `[N x i8]`.
    Array(u32),
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::I1 => write!(f, "i1"),
            Ty::I8 => write!(f, "i8"),
            Ty::I32 => write!(f, "i32"),
            Ty::Ptr => write!(f, "ptr"),
            Ty::Array(n) => write!(f, "[{n} x i8]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Visible only within the module; safely rewritable.
    Private,
    External,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int { ty: Ty, value: i64 },
    /// Contents of a byte array; the array length is the byte count.
    Bytes(Vec<u8>),
    Zero(Ty),
    Undef(Ty),
}

impl Const {
    pub fn i32(value: i64) -> Self {
        Const::Int { ty: Ty::I32, value }
    }

    pub fn ty(&self) -> Ty {
        match self {
            Const::Int { ty, .. } => *ty,
            Const::Bytes(b) => Ty::Array(b.len() as u32),
            Const::Zero(ty) | Const::Undef(ty) => *ty,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(ValueId),
    /// The address of a module global.
    Global(GlobalId),
    Const(Const),
}

impl Operand {
    pub fn i32(value: i64) -> Self {
        Operand::Const(Const::i32(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Shl,
    Lshr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pred {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ugt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InstKind {
    Alloca {
        ty: Ty,
    },
    Load {
        ty: Ty,
        ptr: Operand,
    },
    Store {
        ty: Ty,
        value: Operand,
        ptr: Operand,
    },
    Bin {
        op: BinOp,
        ty: Ty,
        lhs: Operand,
        rhs: Operand,
    },
    Icmp {
        pred: Pred,
        ty: Ty,
        lhs: Operand,
        rhs: Operand,
    },
    Select {
        ty: Ty,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    },
    /// Zero-index inbounds GEP: the address of the first byte of `base`.
    Gep {
        base: Operand,
    },
    Call {
        callee: String,
        ret: Ty,
        args: Vec<(Ty, Operand)>,
    },
    Phi {
        ty: Ty,
        incoming: Vec<(Operand, BlockId)>,
    },
}

impl InstKind {
    pub fn for_each_operand(&self, mut f: impl FnMut(&Operand)) {
        match self {
            InstKind::Alloca { .. } => {}
            InstKind::Load { ptr, .. } => f(ptr),
            InstKind::Store { value, ptr, .. } => {
                f(value);
                f(ptr);
            }
            InstKind::Bin { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                f(cond);
                f(on_true);
                f(on_false);
            }
            InstKind::Gep { base } => f(base),
            InstKind::Call { args, .. } => {
                for (_, a) in args {
                    f(a);
                }
            }
            InstKind::Phi { incoming, .. } => {
                for (op, _) in incoming {
                    f(op);
                }
            }
        }
    }

    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            InstKind::Alloca { .. } => {}
            InstKind::Load { ptr, .. } => f(ptr),
            InstKind::Store { value, ptr, .. } => {
                f(value);
                f(ptr);
            }
            InstKind::Bin { lhs, rhs, .. } | InstKind::Icmp { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                f(cond);
                f(on_true);
                f(on_false);
            }
            InstKind::Gep { base } => f(base),
            InstKind::Call { args, .. } => {
                for (_, a) in args {
                    f(a);
                }
            }
            InstKind::Phi { incoming, .. } => {
                for (op, _) in incoming {
                    f(op);
                }
            }
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstKind::Phi { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub dest: Option<ValueId>,
    pub kind: InstKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Br {
        target: BlockId,
    },
    CondBr {
        cond: Operand,
        on_true: BlockId,
        on_false: BlockId,
    },
    Switch {
        value: Operand,
        default: BlockId,
        cases: Vec<(i64, BlockId)>,
    },
    Ret {
        value: Option<Operand>,
    },
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br { target } => vec![*target],
            Terminator::CondBr {
                on_true, on_false, ..
            } => vec![*on_true, *on_false],
            Terminator::Switch {
                default, cases, ..
            } => {
                let mut s = vec![*default];
                s.extend(cases.iter().map(|(_, b)| *b));
                s
            }
            Terminator::Ret { .. } | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn for_each_operand(&self, mut f: impl FnMut(&Operand)) {
        match self {
            Terminator::CondBr { cond, .. } => f(cond),
            Terminator::Switch { value, .. } => f(value),
            Terminator::Ret { value: Some(v) } => f(v),
            _ => {}
        }
    }

    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut Operand)) {
        match self {
            Terminator::CondBr { cond, .. } => f(cond),
            Terminator::Switch { value, .. } => f(value),
            Terminator::Ret { value: Some(v) } => f(v),
            _ => {}
        }
    }

    /// Relabels every successor edge equal to `from` so it points at `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        let fix = |b: &mut BlockId| {
            if *b == from {
                *b = to;
            }
        };
        match self {
            Terminator::Br { target } => fix(target),
            Terminator::CondBr {
                on_true, on_false, ..
            } => {
                fix(on_true);
                fix(on_false);
            }
            Terminator::Switch {
                default, cases, ..
            } => {
                fix(default);
                for (_, b) in cases {
                    fix(b);
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<InstId>,
    pub term: Terminator,
}

#[derive(Debug, Clone)]
pub enum ValueDef {
    Param(usize),
    Inst(InstId),
}

#[derive(Debug, Clone)]
pub struct ValueData {
    pub name: String,
    pub ty: Ty,
    pub def: ValueDef,
}

/// Where an operand occurs inside a block: a numbered instruction or the
/// terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Site {
    Inst(usize),
    Term,
}

#[derive(Debug, Clone, Copy)]
pub struct UseSite {
    pub block: BlockId,
    pub site: Site,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ret_ty: Ty,
    pub params: Vec<ValueId>,
    /// Attached blocks in layout order; index 0 is the entry block. Blocks in
    /// the arena but absent from this list are detached.
    pub blocks: Vec<BlockId>,
    pub block_arena: Vec<BlockData>,
    pub inst_arena: Vec<Inst>,
    pub values: Vec<ValueData>,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_ty: Ty) -> Self {
        Self {
            name: name.into(),
            ret_ty,
            params: Vec::new(),
            blocks: Vec::new(),
            block_arena: Vec::new(),
            inst_arena: Vec::new(),
            values: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry(&self) -> Option<BlockId> {
        self.blocks.first().copied()
    }

    pub fn add_param(&mut self, name: impl Into<String>, ty: Ty) -> ValueId {
        let idx = self.params.len();
        let v = self.new_value(name, ty, ValueDef::Param(idx));
        self.params.push(v);
        v
    }

    pub fn new_value(&mut self, name: impl Into<String>, ty: Ty, def: ValueDef) -> ValueId {
        let name = self.fresh_value_name(&name.into());
        let id = ValueId(self.values.len() as u32);
        self.values.push(ValueData { name, ty, def });
        id
    }

    /// Creates a block in the arena without attaching it to the layout.
    pub fn new_block(&mut self, name: impl Into<String>) -> BlockId {
        let name = self.fresh_block_name(&name.into());
        let id = BlockId(self.block_arena.len() as u32);
        self.block_arena.push(BlockData {
            name,
            insts: Vec::new(),
            term: Terminator::Unreachable,
        });
        id
    }

    /// Creates a block and attaches it at the end of the layout.
    pub fn add_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.new_block(name);
        self.blocks.push(id);
        id
    }

    /// Creates a block and attaches it right after `after` in the layout.
    pub fn add_block_after(&mut self, name: impl Into<String>, after: BlockId) -> BlockId {
        let id = self.new_block(name);
        let pos = self
            .blocks
            .iter()
            .position(|&b| b == after)
            .map(|p| p + 1)
            .unwrap_or(self.blocks.len());
        self.blocks.insert(pos, id);
        id
    }

    pub fn detach_block(&mut self, id: BlockId) {
        self.blocks.retain(|&b| b != id);
    }

    pub fn attach_block(&mut self, id: BlockId) {
        if !self.blocks.contains(&id) {
            self.blocks.push(id);
        }
    }

    pub fn block(&self, id: BlockId) -> &BlockData {
        &self.block_arena[id.0 as usize]
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut BlockData {
        &mut self.block_arena[id.0 as usize]
    }

    pub fn inst(&self, id: InstId) -> &Inst {
        &self.inst_arena[id.0 as usize]
    }

    pub fn inst_mut(&mut self, id: InstId) -> &mut Inst {
        &mut self.inst_arena[id.0 as usize]
    }

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.0 as usize]
    }

    /// Inserts an instruction at `index` within `block`; `dest` names the
    /// produced value, `None` for void instructions.
    pub fn insert_inst(
        &mut self,
        block: BlockId,
        index: usize,
        kind: InstKind,
        dest: Option<(&str, Ty)>,
    ) -> (InstId, Option<ValueId>) {
        let iid = InstId(self.inst_arena.len() as u32);
        let vid = dest.map(|(hint, ty)| self.new_value(hint, ty, ValueDef::Inst(iid)));
        self.inst_arena.push(Inst { dest: vid, kind });
        let insts = &mut self.block_arena[block.0 as usize].insts;
        let index = index.min(insts.len());
        insts.insert(index, iid);
        (iid, vid)
    }

    pub fn push_inst(
        &mut self,
        block: BlockId,
        kind: InstKind,
        dest: Option<(&str, Ty)>,
    ) -> (InstId, Option<ValueId>) {
        let at = self.block(block).insts.len();
        self.insert_inst(block, at, kind, dest)
    }

    /// Removes the instruction at `index` from `block`'s list. The arena slot
    /// stays behind as a tombstone; callers must have rewritten all uses of the
    /// instruction's value first.
    pub fn remove_inst(&mut self, block: BlockId, index: usize) -> InstId {
        self.block_arena[block.0 as usize].insts.remove(index)
    }

    /// Attached predecessor blocks of `block`.
    pub fn preds(&self, block: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .copied()
            .filter(|&b| self.block(b).term.successors().contains(&block))
            .collect()
    }

    /// Every operand occurrence of `value` across attached blocks.
    pub fn value_uses(&self, value: ValueId) -> Vec<UseSite> {
        let target = Operand::Value(value);
        let mut sites = Vec::new();
        for &b in &self.blocks {
            let data = self.block(b);
            for (i, &iid) in data.insts.iter().enumerate() {
                let mut hit = false;
                self.inst(iid).kind.for_each_operand(|op| hit |= *op == target);
                if hit {
                    sites.push(UseSite {
                        block: b,
                        site: Site::Inst(i),
                    });
                }
            }
            let mut hit = false;
            data.term.for_each_operand(|op| hit |= *op == target);
            if hit {
                sites.push(UseSite {
                    block: b,
                    site: Site::Term,
                });
            }
        }
        sites
    }

    /// Replaces every operand occurrence of `from` with `to` in one site.
    pub fn replace_operand_at(&mut self, site: UseSite, from: &Operand, to: &Operand) {
        match site.site {
            Site::Inst(i) => {
                let iid = self.block(site.block).insts[i];
                self.inst_mut(iid).kind.for_each_operand_mut(|op| {
                    if op == from {
                        *op = to.clone();
                    }
                });
            }
            Site::Term => {
                self.block_mut(site.block).term.for_each_operand_mut(|op| {
                    if op == from {
                        *op = to.clone();
                    }
                });
            }
        }
    }

    /// Replaces every occurrence of value `from` with `to` across the function.
    pub fn replace_all_value_uses(&mut self, from: ValueId, to: Operand) {
        let old = Operand::Value(from);
        for data in &mut self.block_arena {
            for &iid in &data.insts {
                self.inst_arena[iid.0 as usize]
                    .kind
                    .for_each_operand_mut(|op| {
                        if *op == old {
                            *op = to.clone();
                        }
                    });
            }
            data.term.for_each_operand_mut(|op| {
                if *op == old {
                    *op = to.clone();
                }
            });
        }
    }

    /// The type of an operand in this function's context.
    pub fn operand_ty(&self, op: &Operand) -> Ty {
        match op {
            Operand::Value(v) => self.value(*v).ty,
            Operand::Global(_) => Ty::Ptr,
            Operand::Const(c) => c.ty(),
        }
    }

    fn fresh_value_name(&self, hint: &str) -> String {
        let hint = if hint.is_empty() { "t" } else { hint };
        if !self.values.iter().any(|v| v.name == hint) {
            return hint.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{hint}.{n}");
            if !self.values.iter().any(|v| v.name == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn fresh_block_name(&self, hint: &str) -> String {
        let hint = if hint.is_empty() { "bb" } else { hint };
        if !self.block_arena.iter().any(|b| b.name == hint) {
            return hint.to_string();
        }
        let mut n = 1;
        loop {
            let candidate = format!("{hint}.{n}");
            if !self.block_arena.iter().any(|b| b.name == candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    pub fn inst_count(&self) -> usize {
        self.blocks.iter().map(|&b| self.block(b).insts.len()).sum()
    }
}

#[derive(Debug, Clone)]
pub struct GlobalVar {
    pub name: String,
    pub ty: Ty,
    pub linkage: Linkage,
    pub constant: bool,
    pub unnamed_addr: bool,
    pub init: Option<Const>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleStats {
    pub functions: usize,
    pub blocks: usize,
    pub instructions: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    /// Tombstoned on erasure so `GlobalId`s stay stable.
    globals: Vec<Option<GlobalVar>>,
    pub funcs: Vec<Function>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            globals: Vec::new(),
            funcs: Vec::new(),
        }
    }

    pub fn add_global(&mut self, var: GlobalVar) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Some(var));
        id
    }

    pub fn global(&self, id: GlobalId) -> Option<&GlobalVar> {
        self.globals.get(id.0 as usize).and_then(|g| g.as_ref())
    }

    pub fn erase_global(&mut self, id: GlobalId) {
        if let Some(slot) = self.globals.get_mut(id.0 as usize) {
            *slot = None;
        }
    }

    /// Live globals in declaration order.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &GlobalVar)> {
        self.globals
            .iter()
            .enumerate()
            .filter_map(|(i, g)| g.as_ref().map(|g| (GlobalId(i as u32), g)))
    }

    pub fn global_by_name(&self, name: &str) -> Option<GlobalId> {
        self.globals().find(|(_, g)| g.name == name).map(|(id, _)| id)
    }

    pub fn func(&self, name: &str) -> Option<&Function> {
        self.funcs.iter().find(|f| f.name == name)
    }

    pub fn func_mut(&mut self, name: &str) -> Option<&mut Function> {
        self.funcs.iter_mut().find(|f| f.name == name)
    }

    /// Ensures a declaration with the given signature exists, mirroring the
    /// get-or-insert discipline passes use for runtime helpers. Returns an
    /// error when a function of that name exists with a different signature.
    pub fn get_or_declare(
        &mut self,
        name: &str,
        param_tys: &[Ty],
        ret_ty: Ty,
    ) -> Result<(), murk_utils::errors::TransformError> {
        if let Some(existing) = self.func(name) {
            let tys: Vec<Ty> = existing
                .params
                .iter()
                .map(|&p| existing.value(p).ty)
                .collect();
            if tys != param_tys || existing.ret_ty != ret_ty {
                return Err(murk_utils::errors::TransformError::HelperSignatureClash(
                    name.to_string(),
                ));
            }
            return Ok(());
        }
        let mut f = Function::new(name, ret_ty);
        for (i, &ty) in param_tys.iter().enumerate() {
            f.add_param(format!("arg{i}"), ty);
        }
        self.funcs.push(f);
        Ok(())
    }

    /// All instruction-level use sites of a global across the module, as
    /// `(function index, site)` pairs.
    pub fn global_uses(&self, id: GlobalId) -> Vec<(usize, UseSite)> {
        let target = Operand::Global(id);
        let mut sites = Vec::new();
        for (fi, func) in self.funcs.iter().enumerate() {
            for &b in &func.blocks {
                let data = func.block(b);
                for (i, &iid) in data.insts.iter().enumerate() {
                    let mut hit = false;
                    func.inst(iid).kind.for_each_operand(|op| hit |= *op == target);
                    if hit {
                        sites.push((
                            fi,
                            UseSite {
                                block: b,
                                site: Site::Inst(i),
                            },
                        ));
                    }
                }
                let mut hit = false;
                data.term.for_each_operand(|op| hit |= *op == target);
                if hit {
                    sites.push((
                        fi,
                        UseSite {
                            block: b,
                            site: Site::Term,
                        },
                    ));
                }
            }
        }
        sites
    }

    pub fn stats(&self) -> ModuleStats {
        ModuleStats {
            functions: self.funcs.len(),
            blocks: self.funcs.iter().map(|f| f.blocks.len()).sum(),
            instructions: self.funcs.iter().map(|f| f.inst_count()).sum(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_names_are_unique() {
        let mut f = Function::new("f", Ty::I32);
        let a = f.add_param("x", Ty::I32);
        let b = f.new_value("x", Ty::I32, ValueDef::Param(9));
        assert_eq!(f.value(a).name, "x");
        assert_eq!(f.value(b).name, "x.1");
        let b1 = f.new_block("entry");
        let b2 = f.new_block("entry");
        assert_eq!(f.block(b1).name, "entry");
        assert_eq!(f.block(b2).name, "entry.1");
    }

    #[test]
    fn preds_follow_terminators() {
        let mut f = Function::new("f", Ty::Void);
        let e = f.add_block("entry");
        let a = f.add_block("a");
        let b = f.add_block("b");
        f.block_mut(e).term = Terminator::CondBr {
            cond: Operand::Const(Const::Int { ty: Ty::I1, value: 1 }),
            on_true: a,
            on_false: b,
        };
        f.block_mut(a).term = Terminator::Br { target: b };
        f.block_mut(b).term = Terminator::Ret { value: None };
        assert_eq!(f.preds(b), vec![e, a]);
        assert_eq!(f.preds(e), Vec::<BlockId>::new());
    }

    #[test]
    fn value_uses_and_replacement() {
        let mut f = Function::new("f", Ty::I32);
        let x = f.add_param("x", Ty::I32);
        let e = f.add_block("entry");
        let (_, sum) = f.push_inst(
            e,
            InstKind::Bin {
                op: BinOp::Add,
                ty: Ty::I32,
                lhs: Operand::Value(x),
                rhs: Operand::i32(1),
            },
            Some(("sum", Ty::I32)),
        );
        f.block_mut(e).term = Terminator::Ret {
            value: Some(Operand::Value(sum.unwrap())),
        };
        assert_eq!(f.value_uses(x).len(), 1);
        assert_eq!(f.value_uses(sum.unwrap()).len(), 1);
        f.replace_all_value_uses(x, Operand::i32(7));
        assert!(f.value_uses(x).is_empty());
    }

    #[test]
    fn global_erasure_keeps_ids_stable() {
        let mut m = Module::new("m");
        let a = m.add_global(GlobalVar {
            name: ".str".into(),
            ty: Ty::Array(3),
            linkage: Linkage::Private,
            constant: true,
            unnamed_addr: false,
            init: Some(Const::Bytes(b"hi\0".to_vec())),
        });
        let b = m.add_global(GlobalVar {
            name: ".str.1".into(),
            ty: Ty::Array(4),
            linkage: Linkage::Private,
            constant: true,
            unnamed_addr: false,
            init: Some(Const::Bytes(b"abc\0".to_vec())),
        });
        m.erase_global(a);
        assert!(m.global(a).is_none());
        assert_eq!(m.global(b).unwrap().name, ".str.1");
        assert_eq!(m.globals().count(), 1);
    }
}
