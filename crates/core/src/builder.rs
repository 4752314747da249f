/// Cursor-style instruction builder.
///
/// A builder owns an insertion point (block + index) inside one function and
/// advances it as instructions are emitted, so a sequence of emit calls lays
/// instructions down in source order. Passes position a builder the same way
/// the original IRBuilder discipline does: at a block's start for allocas, at
/// its end to grow straight-line code, or just before an existing instruction
/// when rewriting a use in place.
use crate::ir::{
    BinOp, BlockId, Function, InstKind, Operand, Pred, Terminator, Ty, ValueId,
};

pub struct Builder<'f> {
    func: &'f mut Function,
    block: BlockId,
    at: usize,
}

impl<'f> Builder<'f> {
    pub fn at_start(func: &'f mut Function, block: BlockId) -> Self {
        Self { func, block, at: 0 }
    }

    pub fn at_end(func: &'f mut Function, block: BlockId) -> Self {
        let at = func.block(block).insts.len();
        Self { func, block, at }
    }

    pub fn before(func: &'f mut Function, block: BlockId, index: usize) -> Self {
        Self {
            func,
            block,
            at: index,
        }
    }

    pub fn func(&mut self) -> &mut Function {
        self.func
    }

    /// Current insertion index within the block.
    pub fn cursor(&self) -> usize {
        self.at
    }

    fn emit(&mut self, kind: InstKind, dest: Option<(&str, Ty)>) -> Option<ValueId> {
        let (_, vid) = self.func.insert_inst(self.block, self.at, kind, dest);
        self.at += 1;
        vid
    }

    pub fn alloca(&mut self, name: &str, ty: Ty) -> ValueId {
        self.emit(InstKind::Alloca { ty }, Some((name, Ty::Ptr)))
            .unwrap()
    }

    pub fn load(&mut self, name: &str, ty: Ty, ptr: Operand) -> ValueId {
        self.emit(InstKind::Load { ty, ptr }, Some((name, ty))).unwrap()
    }

    pub fn store(&mut self, ty: Ty, value: Operand, ptr: Operand) {
        self.emit(InstKind::Store { ty, value, ptr }, None);
    }

    pub fn bin(&mut self, name: &str, op: BinOp, ty: Ty, lhs: Operand, rhs: Operand) -> ValueId {
        self.emit(InstKind::Bin { op, ty, lhs, rhs }, Some((name, ty)))
            .unwrap()
    }

    pub fn icmp(&mut self, name: &str, pred: Pred, ty: Ty, lhs: Operand, rhs: Operand) -> ValueId {
        self.emit(InstKind::Icmp { pred, ty, lhs, rhs }, Some((name, Ty::I1)))
            .unwrap()
    }

    pub fn select(
        &mut self,
        name: &str,
        ty: Ty,
        cond: Operand,
        on_true: Operand,
        on_false: Operand,
    ) -> ValueId {
        self.emit(
            InstKind::Select {
                ty,
                cond,
                on_true,
                on_false,
            },
            Some((name, ty)),
        )
        .unwrap()
    }

    pub fn gep(&mut self, name: &str, base: Operand) -> ValueId {
        self.emit(InstKind::Gep { base }, Some((name, Ty::Ptr)))
            .unwrap()
    }

    /// Phi nodes must head their block; position the builder accordingly.
    pub fn phi(&mut self, name: &str, ty: Ty, incoming: Vec<(Operand, BlockId)>) -> ValueId {
        self.emit(InstKind::Phi { ty, incoming }, Some((name, ty)))
            .unwrap()
    }

    pub fn call(
        &mut self,
        name: &str,
        callee: &str,
        ret: Ty,
        args: Vec<(Ty, Operand)>,
    ) -> Option<ValueId> {
        let dest = if ret == Ty::Void {
            None
        } else {
            Some((name, ret))
        };
        self.emit(
            InstKind::Call {
                callee: callee.to_string(),
                ret,
                args,
            },
            dest,
        )
    }

    pub fn br(self, target: BlockId) {
        self.func.block_mut(self.block).term = Terminator::Br { target };
    }

    pub fn cond_br(self, cond: Operand, on_true: BlockId, on_false: BlockId) {
        self.func.block_mut(self.block).term = Terminator::CondBr {
            cond,
            on_true,
            on_false,
        };
    }

    pub fn switch(self, value: Operand, default: BlockId, cases: Vec<(i64, BlockId)>) {
        self.func.block_mut(self.block).term = Terminator::Switch {
            value,
            default,
            cases,
        };
    }

    pub fn ret(self, value: Option<Operand>) {
        self.func.block_mut(self.block).term = Terminator::Ret { value };
    }
}
