/// Reference interpreter.
///
/// Evaluates functions of a module over concrete values so tests can check
/// that a transformed module computes exactly what the original did. Memory is
/// a table of byte objects addressed by (object, offset) pairs; the three
/// runtime helpers are modeled natively with the same observable behavior as
/// the shipped runtime library. A step budget bounds execution so accidental
/// non-termination in a transformed module fails the test instead of hanging
/// it.
use crate::ir::{
    BinOp, BlockId, Const, Function, InstKind, Module, Operand, Pred, Terminator, Ty, ValueId,
};
use crate::RUNTIME_PREFIX;
use murk_utils::errors::EvalError;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Val {
    Int(i64),
    Ptr { obj: usize, off: usize },
    Null,
}

struct Obj {
    bytes: Vec<u8>,
    freed: bool,
}

pub struct Interp<'m> {
    module: &'m Module,
    mem: Vec<Obj>,
    globals: HashMap<crate::ir::GlobalId, usize>,
    steps_left: u64,
    opaque_nonce: u32,
}

const DEFAULT_STEP_BUDGET: u64 = 1_000_000;

impl<'m> Interp<'m> {
    pub fn new(module: &'m Module) -> Self {
        let mut mem = Vec::new();
        let mut globals = HashMap::new();
        for (id, g) in module.globals() {
            let bytes = match &g.init {
                Some(Const::Bytes(b)) => b.clone(),
                Some(Const::Int { value, .. }) => (*value as i32).to_le_bytes().to_vec(),
                Some(Const::Zero(ty)) => vec![0; ty_size(*ty)],
                Some(Const::Undef(ty)) => vec![0; ty_size(*ty)],
                None => vec![0; ty_size(g.ty)],
            };
            globals.insert(id, mem.len());
            mem.push(Obj {
                bytes,
                freed: false,
            });
        }
        Self {
            module,
            mem,
            globals,
            steps_left: DEFAULT_STEP_BUDGET,
            opaque_nonce: 0x9E37_79B9,
        }
    }

    pub fn with_step_budget(mut self, steps: u64) -> Self {
        self.steps_left = steps;
        self
    }

    /// Calls a function by name. Returns `None` for void functions.
    pub fn call(&mut self, name: &str, args: &[Val]) -> Result<Option<Val>, EvalError> {
        let module = self.module;
        let f = module
            .func(name)
            .ok_or_else(|| EvalError::UnknownFunction(name.to_string()))?;
        if f.is_declaration() {
            return Err(EvalError::Declaration(name.to_string()));
        }
        if args.len() != f.params.len() {
            return Err(EvalError::WrongArgCount {
                func: name.to_string(),
                expected: f.params.len(),
                got: args.len(),
            });
        }
        self.exec(f, args.to_vec())
    }

    /// Convenience wrapper for i32 functions: i64 in, i64 out.
    pub fn call_i32(&mut self, name: &str, args: &[i64]) -> Result<i64, EvalError> {
        let vals: Vec<Val> = args.iter().map(|&a| Val::Int(a)).collect();
        match self.call(name, &vals)? {
            Some(Val::Int(v)) => Ok(v),
            other => Err(EvalError::Type(format!(
                "expected i32 result from `{name}`, got {other:?}"
            ))),
        }
    }

    /// Reads a NUL-terminated byte string out of interpreter memory.
    pub fn read_cstr(&self, v: Val) -> Result<Vec<u8>, EvalError> {
        let Val::Ptr { obj, off } = v else {
            return Err(EvalError::BadPointer);
        };
        let o = self.mem.get(obj).ok_or(EvalError::BadPointer)?;
        if o.freed {
            return Err(EvalError::UseAfterFree);
        }
        let tail = o.bytes.get(off..).ok_or(EvalError::OutOfBounds { obj, off })?;
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Ok(tail[..end].to_vec())
    }

    fn exec(&mut self, f: &'m Function, args: Vec<Val>) -> Result<Option<Val>, EvalError> {
        let mut frame: HashMap<ValueId, Val> = HashMap::new();
        for (&p, v) in f.params.iter().zip(args) {
            frame.insert(p, v);
        }
        let mut block = f.entry().ok_or_else(|| EvalError::Declaration(f.name.clone()))?;
        let mut prev: Option<BlockId> = None;
        loop {
            self.enter_block(f, block, prev, &mut frame)?;
            for &iid in &f.block(block).insts {
                self.tick()?;
                let inst = f.inst(iid);
                if inst.kind.is_phi() {
                    continue;
                }
                if let Some(v) = self.exec_inst(f, &inst.kind, &frame)? {
                    if let Some(dest) = inst.dest {
                        frame.insert(dest, v);
                    }
                }
            }
            self.tick()?;
            match &f.block(block).term {
                Terminator::Br { target } => {
                    prev = Some(block);
                    block = *target;
                }
                Terminator::CondBr {
                    cond,
                    on_true,
                    on_false,
                } => {
                    let c = self.int_of(f, cond, &frame)?;
                    prev = Some(block);
                    block = if c != 0 { *on_true } else { *on_false };
                }
                Terminator::Switch {
                    value,
                    default,
                    cases,
                } => {
                    let v = self.int_of(f, value, &frame)?;
                    prev = Some(block);
                    block = cases
                        .iter()
                        .find(|(k, _)| *k == v)
                        .map(|(_, b)| *b)
                        .unwrap_or(*default);
                }
                Terminator::Ret { value } => {
                    return match value {
                        Some(op) => Ok(Some(self.eval(f, op, &frame)?)),
                        None => Ok(None),
                    };
                }
                Terminator::Unreachable => return Err(EvalError::Unreachable),
            }
        }
    }

    /// Evaluates the phi group at a block entry with parallel-copy semantics:
    /// all incoming values are read before any destination is written.
    fn enter_block(
        &mut self,
        f: &'m Function,
        block: BlockId,
        prev: Option<BlockId>,
        frame: &mut HashMap<ValueId, Val>,
    ) -> Result<(), EvalError> {
        let mut writes: Vec<(ValueId, Val)> = Vec::new();
        for &iid in &f.block(block).insts {
            let inst = f.inst(iid);
            let InstKind::Phi { incoming, .. } = &inst.kind else {
                break;
            };
            let pred = prev.ok_or_else(|| {
                EvalError::Type(format!("phi in entry block of `{}`", f.name))
            })?;
            let (op, _) = incoming
                .iter()
                .find(|(_, b)| *b == pred)
                .ok_or_else(|| EvalError::Type("phi has no edge for predecessor".to_string()))?;
            let v = self.eval(f, op, frame)?;
            if let Some(dest) = inst.dest {
                writes.push((dest, v));
            }
        }
        for (dest, v) in writes {
            frame.insert(dest, v);
        }
        Ok(())
    }

    fn exec_inst(
        &mut self,
        f: &'m Function,
        kind: &'m InstKind,
        frame: &HashMap<ValueId, Val>,
    ) -> Result<Option<Val>, EvalError> {
        match kind {
            InstKind::Alloca { ty } => {
                let obj = self.alloc(vec![0; ty_size(*ty)]);
                Ok(Some(Val::Ptr { obj, off: 0 }))
            }
            InstKind::Load { ty, ptr } => {
                let p = self.eval(f, ptr, frame)?;
                Ok(Some(self.read(p, *ty)?))
            }
            InstKind::Store { ty, value, ptr } => {
                let v = self.eval(f, value, frame)?;
                let p = self.eval(f, ptr, frame)?;
                self.write(p, *ty, v)?;
                Ok(None)
            }
            InstKind::Bin { op, lhs, rhs, .. } => {
                let a = self.int_of(f, lhs, frame)? as i32;
                let b = self.int_of(f, rhs, frame)? as i32;
                let r = match op {
                    BinOp::Add => a.wrapping_add(b),
                    BinOp::Sub => a.wrapping_sub(b),
                    BinOp::Mul => a.wrapping_mul(b),
                    BinOp::Shl => a.wrapping_shl(b as u32 & 31),
                    BinOp::Lshr => ((a as u32) >> (b as u32 & 31)) as i32,
                    BinOp::And => a & b,
                    BinOp::Or => a | b,
                    BinOp::Xor => a ^ b,
                };
                Ok(Some(Val::Int(r as i64)))
            }
            InstKind::Icmp { pred, lhs, rhs, .. } => {
                let a = self.int_of(f, lhs, frame)? as i32;
                let b = self.int_of(f, rhs, frame)? as i32;
                let r = match pred {
                    Pred::Eq => a == b,
                    Pred::Ne => a != b,
                    Pred::Slt => a < b,
                    Pred::Sle => a <= b,
                    Pred::Sgt => a > b,
                    Pred::Sge => a >= b,
                    Pred::Ult => (a as u32) < (b as u32),
                    Pred::Ugt => (a as u32) > (b as u32),
                };
                Ok(Some(Val::Int(r as i64)))
            }
            InstKind::Select {
                cond,
                on_true,
                on_false,
                ..
            } => {
                let c = self.int_of(f, cond, frame)?;
                let v = if c != 0 {
                    self.eval(f, on_true, frame)?
                } else {
                    self.eval(f, on_false, frame)?
                };
                Ok(Some(v))
            }
            InstKind::Gep { base } => {
                // Zero-index GEP: the address of the first byte.
                Ok(Some(self.eval(f, base, frame)?))
            }
            InstKind::Call { callee, args, .. } => {
                let mut vals = Vec::with_capacity(args.len());
                for (_, op) in args {
                    vals.push(self.eval(f, op, frame)?);
                }
                if callee.starts_with(RUNTIME_PREFIX) {
                    return self.runtime_call(callee, &vals);
                }
                let module = self.module;
                let target = module
                    .func(callee)
                    .ok_or_else(|| EvalError::UnknownFunction(callee.clone()))?;
                if target.is_declaration() {
                    return Err(EvalError::Declaration(callee.clone()));
                }
                self.exec(target, vals)
            }
            InstKind::Phi { .. } => Ok(None),
        }
    }

    /// Models the native runtime helpers with the behavior of `murk-runtime`.
    fn runtime_call(&mut self, name: &str, args: &[Val]) -> Result<Option<Val>, EvalError> {
        match name {
            "__obf_decrypt" => {
                let (ptr, len, key) = match args {
                    [p, Val::Int(len), Val::Int(key)] => (*p, *len, *key),
                    _ => return Err(EvalError::Type("bad __obf_decrypt call".to_string())),
                };
                if len <= 0 {
                    return Ok(Some(Val::Null));
                }
                let Val::Ptr { obj, off } = ptr else {
                    return Ok(Some(Val::Null));
                };
                let src = {
                    let o = self.mem.get(obj).ok_or(EvalError::BadPointer)?;
                    if o.freed {
                        return Err(EvalError::UseAfterFree);
                    }
                    o.bytes
                        .get(off..off + len as usize)
                        .ok_or(EvalError::OutOfBounds { obj, off })?
                        .to_vec()
                };
                let k = (key & 0xFF) as u8;
                let mut out: Vec<u8> = src.iter().map(|&b| b ^ k).collect();
                out.push(0);
                let new_obj = self.alloc(out);
                Ok(Some(Val::Ptr {
                    obj: new_obj,
                    off: 0,
                }))
            }
            "__obf_free" => {
                let (ptr, len) = match args {
                    [p, Val::Int(len)] => (*p, *len),
                    _ => return Err(EvalError::Type("bad __obf_free call".to_string())),
                };
                if let Val::Ptr { obj, .. } = ptr {
                    let o = self.mem.get_mut(obj).ok_or(EvalError::BadPointer)?;
                    for b in o.bytes.iter_mut().take(len.max(0) as usize) {
                        *b = 0;
                    }
                    o.freed = true;
                }
                Ok(None)
            }
            "__obf_opaque" => {
                let x = match args {
                    [Val::Int(x)] => *x as i32,
                    _ => return Err(EvalError::Type("bad __obf_opaque call".to_string())),
                };
                // Stand-in for the frame address the native helper mixes in.
                self.opaque_nonce = self.opaque_nonce.wrapping_mul(2654435761).wrapping_add(97);
                let addr = self.opaque_nonce as i32;
                let mut s = x.wrapping_mul(1103515245).wrapping_add(12345);
                s ^= addr;
                s = s.rotate_left(7) ^ x.wrapping_add(addr & 0xFF);
                Ok(Some(Val::Int((s & 0xFF) as i64)))
            }
            other => Err(EvalError::UnknownFunction(other.to_string())),
        }
    }

    fn eval(
        &self,
        f: &Function,
        op: &Operand,
        frame: &HashMap<ValueId, Val>,
    ) -> Result<Val, EvalError> {
        match op {
            Operand::Value(v) => frame.get(v).copied().ok_or_else(|| {
                EvalError::Type(format!("value `%{}` has no binding", f.value(*v).name))
            }),
            Operand::Global(g) => {
                let obj = self.globals.get(g).copied().ok_or(EvalError::BadPointer)?;
                Ok(Val::Ptr { obj, off: 0 })
            }
            Operand::Const(Const::Int { value, .. }) => Ok(Val::Int(*value)),
            Operand::Const(Const::Undef(_)) => Ok(Val::Int(0)),
            Operand::Const(c) => Err(EvalError::Type(format!(
                "constant {c:?} cannot appear as an operand"
            ))),
        }
    }

    fn int_of(
        &self,
        f: &Function,
        op: &Operand,
        frame: &HashMap<ValueId, Val>,
    ) -> Result<i64, EvalError> {
        match self.eval(f, op, frame)? {
            Val::Int(v) => Ok(v),
            other => Err(EvalError::Type(format!("expected integer, got {other:?}"))),
        }
    }

    fn alloc(&mut self, bytes: Vec<u8>) -> usize {
        self.mem.push(Obj {
            bytes,
            freed: false,
        });
        self.mem.len() - 1
    }

    fn read(&self, ptr: Val, ty: Ty) -> Result<Val, EvalError> {
        let Val::Ptr { obj, off } = ptr else {
            return Err(EvalError::BadPointer);
        };
        let o = self.mem.get(obj).ok_or(EvalError::BadPointer)?;
        if o.freed {
            return Err(EvalError::UseAfterFree);
        }
        let size = ty_size(ty);
        let slice = o
            .bytes
            .get(off..off + size)
            .ok_or(EvalError::OutOfBounds { obj, off })?;
        Ok(match ty {
            Ty::I1 | Ty::I8 => Val::Int(slice[0] as i8 as i64),
            Ty::I32 => {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(slice);
                Val::Int(i32::from_le_bytes(raw) as i64)
            }
            Ty::Ptr => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(slice);
                let packed = u64::from_le_bytes(raw);
                if packed == 0 {
                    Val::Null
                } else {
                    Val::Ptr {
                        obj: (packed >> 32) as usize - 1,
                        off: (packed & 0xFFFF_FFFF) as usize,
                    }
                }
            }
            _ => return Err(EvalError::Type(format!("cannot load {ty}"))),
        })
    }

    fn write(&mut self, ptr: Val, ty: Ty, val: Val) -> Result<(), EvalError> {
        let Val::Ptr { obj, off } = ptr else {
            return Err(EvalError::BadPointer);
        };
        let size = ty_size(ty);
        let raw: Vec<u8> = match (ty, val) {
            (Ty::I1 | Ty::I8, Val::Int(v)) => vec![v as u8],
            (Ty::I32, Val::Int(v)) => (v as i32).to_le_bytes().to_vec(),
            (Ty::Ptr, Val::Ptr { obj: o, off: f }) => {
                (((o as u64 + 1) << 32) | (f as u64 & 0xFFFF_FFFF))
                    .to_le_bytes()
                    .to_vec()
            }
            (Ty::Ptr, Val::Null) => 0u64.to_le_bytes().to_vec(),
            (ty, v) => return Err(EvalError::Type(format!("cannot store {v:?} as {ty}"))),
        };
        let o = self.mem.get_mut(obj).ok_or(EvalError::BadPointer)?;
        if o.freed {
            return Err(EvalError::UseAfterFree);
        }
        let slice = o
            .bytes
            .get_mut(off..off + size)
            .ok_or(EvalError::OutOfBounds { obj, off })?;
        slice.copy_from_slice(&raw);
        Ok(())
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        if self.steps_left == 0 {
            return Err(EvalError::StepLimit);
        }
        self.steps_left -= 1;
        Ok(())
    }
}

fn ty_size(ty: Ty) -> usize {
    match ty {
        Ty::Void => 0,
        Ty::I1 | Ty::I8 => 1,
        Ty::I32 => 4,
        Ty::Ptr => 8,
        Ty::Array(n) => n as usize,
    }
}
