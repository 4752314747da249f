/// Parser for the textual module form produced by [`crate::printer`].
///
/// The grammar is line-oriented: one directive, label or instruction per line,
/// `;` starts a comment. Block labels are scanned ahead of the instruction
/// pass so forward branches resolve; value references may be forward only from
/// phi nodes, which is the only place SSA permits them.
use crate::ir::{
    BinOp, BlockId, Const, Function, GlobalId, GlobalVar, Inst, InstId, InstKind, Linkage, Module,
    Operand, Pred, Terminator, Ty, ValueDef, ValueId,
};
use murk_utils::errors::ParseError;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    VName(String),
    GName(String),
    Int(i64),
    Bytes(Vec<u8>),
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Eq,
    Colon,
    Arrow,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_'
}

fn tokenize(line: &str, lineno: usize) -> Result<Vec<Tok>, ParseError> {
    let syntax = |msg: &str| ParseError::Syntax {
        line: lineno,
        msg: msg.to_string(),
        raw: line.trim().to_string(),
    };
    let mut toks = Vec::new();
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ';' => break,
            c if c.is_whitespace() => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '{' => {
                toks.push(Tok::LBrace);
                i += 1;
            }
            '}' => {
                toks.push(Tok::RBrace);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            '=' => {
                toks.push(Tok::Eq);
                i += 1;
            }
            ':' => {
                toks.push(Tok::Colon);
                i += 1;
            }
            '-' => {
                if chars.get(i + 1) == Some(&'>') {
                    toks.push(Tok::Arrow);
                    i += 2;
                } else {
                    let start = i;
                    i += 1;
                    while i < chars.len() && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                    let text: String = chars[start..i].iter().collect();
                    let v = text.parse::<i64>().map_err(|_| syntax("bad integer"))?;
                    toks.push(Tok::Int(v));
                }
            }
            '%' | '@' => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_name_char(chars[end]) {
                    end += 1;
                }
                if end == start {
                    return Err(syntax("empty name"));
                }
                let name: String = chars[start..end].iter().collect();
                toks.push(if c == '%' {
                    Tok::VName(name)
                } else {
                    Tok::GName(name)
                });
                i = end;
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < chars.len() && chars[i].is_ascii_digit() {
                    i += 1;
                }
                let text: String = chars[start..i].iter().collect();
                let v = text.parse::<i64>().map_err(|_| syntax("bad integer"))?;
                toks.push(Tok::Int(v));
            }
            'c' | 'x' if chars.get(i + 1) == Some(&'"') => {
                let hex_form = c == 'x';
                i += 2;
                let mut bytes = Vec::new();
                let mut raw = String::new();
                loop {
                    let Some(&ch) = chars.get(i) else {
                        return Err(syntax("unterminated string"));
                    };
                    i += 1;
                    if ch == '"' {
                        break;
                    }
                    if hex_form {
                        raw.push(ch);
                    } else if ch == '\\' {
                        let hi = chars.get(i).copied().ok_or_else(|| syntax("bad escape"))?;
                        let lo = chars
                            .get(i + 1)
                            .copied()
                            .ok_or_else(|| syntax("bad escape"))?;
                        i += 2;
                        let byte = u8::from_str_radix(&format!("{hi}{lo}"), 16)
                            .map_err(|_| syntax("bad escape"))?;
                        bytes.push(byte);
                    } else {
                        bytes.push(ch as u8);
                    }
                }
                if hex_form {
                    bytes = hex::decode(&raw).map_err(|_| syntax("bad hex string"))?;
                }
                toks.push(Tok::Bytes(bytes));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                toks.push(Tok::Ident(chars[start..i].iter().collect()));
            }
            _ => return Err(syntax(&format!("unexpected character `{c}`"))),
        }
    }
    Ok(toks)
}

/// Token cursor over one line.
struct Cursor {
    toks: Vec<Tok>,
    pos: usize,
    line: usize,
    raw: String,
}

impl Cursor {
    fn new(toks: Vec<Tok>, line: usize, raw: &str) -> Self {
        Self {
            toks,
            pos: 0,
            line,
            raw: raw.trim().to_string(),
        }
    }

    fn err(&self, msg: &str) -> ParseError {
        ParseError::Syntax {
            line: self.line,
            msg: msg.to_string(),
            raw: self.raw.clone(),
        }
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn next(&mut self) -> Option<Tok> {
        let t = self.toks.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect(&mut self, tok: Tok, what: &str) -> Result<(), ParseError> {
        match self.next() {
            Some(t) if t == tok => Ok(()),
            _ => Err(self.err(&format!("expected {what}"))),
        }
    }

    fn expect_ident(&mut self, word: &str) -> Result<(), ParseError> {
        match self.next() {
            Some(Tok::Ident(w)) if w == word => Ok(()),
            _ => Err(self.err(&format!("expected `{word}`"))),
        }
    }

    fn ident(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::Ident(w)) => Ok(w),
            _ => Err(self.err("expected identifier")),
        }
    }

    fn vname(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::VName(w)) => Ok(w),
            _ => Err(self.err("expected %name")),
        }
    }

    fn gname(&mut self) -> Result<String, ParseError> {
        match self.next() {
            Some(Tok::GName(w)) => Ok(w),
            _ => Err(self.err("expected @name")),
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.toks.len()
    }

    fn finish(&self) -> Result<(), ParseError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.err("trailing tokens"))
        }
    }

    fn ty(&mut self) -> Result<Ty, ParseError> {
        match self.next() {
            Some(Tok::Ident(w)) => match w.as_str() {
                "void" => Ok(Ty::Void),
                "i1" => Ok(Ty::I1),
                "i8" => Ok(Ty::I8),
                "i32" => Ok(Ty::I32),
                "ptr" => Ok(Ty::Ptr),
                _ => Err(self.err(&format!("unknown type `{w}`"))),
            },
            Some(Tok::LBracket) => {
                let n = match self.next() {
                    Some(Tok::Int(n)) if n >= 0 => n as u32,
                    _ => return Err(self.err("expected array length")),
                };
                self.expect_ident("x")?;
                self.expect_ident("i8")?;
                self.expect(Tok::RBracket, "`]`")?;
                Ok(Ty::Array(n))
            }
            _ => Err(self.err("expected type")),
        }
    }
}

/// Per-function parsing context: name → id maps plus the set of values whose
/// defining instruction has not been seen yet (forward phi references).
struct FuncCtx {
    values: HashMap<String, ValueId>,
    pending: HashSet<String>,
    blocks: HashMap<String, BlockId>,
}

impl FuncCtx {
    fn lookup_value(&mut self, f: &mut Function, name: &str) -> ValueId {
        if let Some(&v) = self.values.get(name) {
            return v;
        }
        // Forward reference: materialize a placeholder, patched at definition.
        let v = f.new_value(name, Ty::I32, ValueDef::Param(usize::MAX));
        self.values.insert(name.to_string(), v);
        self.pending.insert(name.to_string());
        v
    }

    fn block(&self, c: &Cursor, name: &str) -> Result<BlockId, ParseError> {
        self.blocks.get(name).copied().ok_or(ParseError::UnknownName {
            line: c.line,
            name: name.to_string(),
        })
    }
}

pub fn parse_module(text: &str) -> Result<Module, ParseError> {
    let lines: Vec<&str> = text.lines().collect();
    let mut module = Module::new("module");
    let mut globals: HashMap<String, GlobalId> = HashMap::new();
    let mut i = 0;
    while i < lines.len() {
        let lineno = i + 1;
        let toks = tokenize(lines[i], lineno)?;
        if toks.is_empty() {
            i += 1;
            continue;
        }
        let mut c = Cursor::new(toks, lineno, lines[i]);
        match c.peek() {
            Some(Tok::Ident(w)) if w == "module" => {
                c.next();
                module.name = c.ident()?;
                c.finish()?;
                i += 1;
            }
            Some(Tok::Ident(w)) if w == "global" => {
                c.next();
                let (name, var) = parse_global(&mut c)?;
                if globals.contains_key(&name) {
                    return Err(ParseError::Duplicate { line: lineno, name });
                }
                let id = module.add_global(var);
                globals.insert(name, id);
                i += 1;
            }
            Some(Tok::Ident(w)) if w == "declare" => {
                c.next();
                let f = parse_declare(&mut c)?;
                module.funcs.push(f);
                i += 1;
            }
            Some(Tok::Ident(w)) if w == "func" => {
                // Collect the body up to the closing brace line.
                let mut end = i + 1;
                loop {
                    if end >= lines.len() {
                        return Err(c.err("unterminated function body"));
                    }
                    let t = tokenize(lines[end], end + 1)?;
                    if t == vec![Tok::RBrace] {
                        break;
                    }
                    end += 1;
                }
                c.next();
                let f = parse_function(&mut c, &lines[i + 1..end], i + 1, &globals)?;
                module.funcs.push(f);
                i = end + 1;
            }
            _ => return Err(c.err("expected `module`, `global`, `declare` or `func`")),
        }
    }
    Ok(module)
}

fn parse_global(c: &mut Cursor) -> Result<(String, GlobalVar), ParseError> {
    let name = c.gname()?;
    c.expect(Tok::Eq, "`=`")?;
    let linkage = match c.ident()?.as_str() {
        "private" => Linkage::Private,
        "external" => Linkage::External,
        other => return Err(c.err(&format!("unknown linkage `{other}`"))),
    };
    let mut unnamed_addr = false;
    let mut word = c.ident()?;
    if word == "unnamed_addr" {
        unnamed_addr = true;
        word = c.ident()?;
    }
    let constant = match word.as_str() {
        "constant" => true,
        "mutable" => false,
        other => return Err(c.err(&format!("expected `constant` or `mutable`, got `{other}`"))),
    };
    let ty = c.ty()?;
    let init = if c.at_end() {
        None
    } else {
        Some(parse_const(c, ty)?)
    };
    if let (Ty::Array(n), Some(Const::Bytes(b))) = (ty, &init) {
        if b.len() as u32 != n {
            return Err(c.err("array initializer length mismatch"));
        }
    }
    c.finish()?;
    Ok((
        name.clone(),
        GlobalVar {
            name,
            ty,
            linkage,
            constant,
            unnamed_addr,
            init,
        },
    ))
}

fn parse_const(c: &mut Cursor, ty: Ty) -> Result<Const, ParseError> {
    match c.next() {
        Some(Tok::Int(value)) => Ok(Const::Int { ty, value }),
        Some(Tok::Bytes(b)) => Ok(Const::Bytes(b)),
        Some(Tok::Ident(w)) if w == "zeroinitializer" => Ok(Const::Zero(ty)),
        Some(Tok::Ident(w)) if w == "undef" => Ok(Const::Undef(ty)),
        _ => Err(c.err("expected initializer")),
    }
}

fn parse_declare(c: &mut Cursor) -> Result<Function, ParseError> {
    let name = c.gname()?;
    c.expect(Tok::LParen, "`(`")?;
    let mut tys = Vec::new();
    if c.peek() != Some(&Tok::RParen) {
        loop {
            tys.push(c.ty()?);
            match c.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => break,
                _ => return Err(c.err("expected `,` or `)`")),
            }
        }
    } else {
        c.next();
    }
    c.expect(Tok::Arrow, "`->`")?;
    let ret_ty = c.ty()?;
    c.finish()?;
    let mut f = Function::new(name, ret_ty);
    for (i, ty) in tys.into_iter().enumerate() {
        f.add_param(format!("arg{i}"), ty);
    }
    Ok(f)
}

fn parse_function(
    c: &mut Cursor,
    body: &[&str],
    body_start: usize,
    globals: &HashMap<String, GlobalId>,
) -> Result<Function, ParseError> {
    let name = c.gname()?;
    c.expect(Tok::LParen, "`(`")?;
    let mut params = Vec::new();
    if c.peek() == Some(&Tok::RParen) {
        c.next();
    } else {
        loop {
            let ty = c.ty()?;
            let pname = c.vname()?;
            params.push((ty, pname));
            match c.next() {
                Some(Tok::Comma) => continue,
                Some(Tok::RParen) => break,
                _ => return Err(c.err("expected `,` or `)`")),
            }
        }
    }
    c.expect(Tok::Arrow, "`->`")?;
    let ret_ty = c.ty()?;
    c.expect(Tok::LBrace, "`{`")?;
    c.finish()?;

    let mut f = Function::new(name, ret_ty);
    let mut ctx = FuncCtx {
        values: HashMap::new(),
        pending: HashSet::new(),
        blocks: HashMap::new(),
    };
    for (ty, pname) in params {
        if ctx.values.contains_key(&pname) {
            return Err(ParseError::Duplicate {
                line: c.line,
                name: pname,
            });
        }
        let v = f.add_param(pname.clone(), ty);
        ctx.values.insert(pname, v);
    }

    // Label pre-scan: creates the blocks in layout order.
    for (off, raw) in body.iter().enumerate() {
        let lineno = body_start + off + 1;
        let toks = tokenize(raw, lineno)?;
        if let [Tok::Ident(label), Tok::Colon] = toks.as_slice() {
            if ctx.blocks.contains_key(label) {
                return Err(ParseError::Duplicate {
                    line: lineno,
                    name: label.clone(),
                });
            }
            let b = f.add_block(label.clone());
            ctx.blocks.insert(label.clone(), b);
        }
    }
    if f.blocks.is_empty() {
        return Err(c.err("function body has no blocks"));
    }

    let mut current: Option<BlockId> = None;
    for (off, raw) in body.iter().enumerate() {
        let lineno = body_start + off + 1;
        let toks = tokenize(raw, lineno)?;
        if toks.is_empty() {
            continue;
        }
        if let [Tok::Ident(label), Tok::Colon] = toks.as_slice() {
            current = Some(ctx.blocks[label]);
            continue;
        }
        let block = current.ok_or(ParseError::Syntax {
            line: lineno,
            msg: "instruction before first label".to_string(),
            raw: raw.trim().to_string(),
        })?;
        let mut lc = Cursor::new(toks, lineno, raw);
        parse_line(&mut lc, &mut f, &mut ctx, globals, block)?;
    }

    if let Some(name) = ctx.pending.iter().next() {
        return Err(ParseError::UnknownName {
            line: c.line,
            name: name.clone(),
        });
    }
    Ok(f)
}

fn parse_operand(
    c: &mut Cursor,
    f: &mut Function,
    ctx: &mut FuncCtx,
    globals: &HashMap<String, GlobalId>,
    ty: Ty,
) -> Result<Operand, ParseError> {
    match c.next() {
        Some(Tok::VName(name)) => Ok(Operand::Value(ctx.lookup_value(f, &name))),
        Some(Tok::GName(name)) => match globals.get(&name) {
            Some(&g) => Ok(Operand::Global(g)),
            None => Err(ParseError::UnknownName {
                line: c.line,
                name,
            }),
        },
        Some(Tok::Int(value)) => Ok(Operand::Const(Const::Int { ty, value })),
        Some(Tok::Ident(w)) if w == "undef" => Ok(Operand::Const(Const::Undef(ty))),
        _ => Err(c.err("expected operand")),
    }
}

/// Installs one parsed instruction, reusing a forward-declared placeholder
/// value when the destination was already referenced by a phi.
fn install(
    f: &mut Function,
    ctx: &mut FuncCtx,
    c: &Cursor,
    block: BlockId,
    dest: Option<(String, Ty)>,
    kind: InstKind,
) -> Result<(), ParseError> {
    let iid = InstId(f.inst_arena.len() as u32);
    let vid = match dest {
        None => None,
        Some((name, ty)) => {
            if let Some(&v) = ctx.values.get(&name) {
                if !ctx.pending.remove(&name) {
                    return Err(ParseError::Duplicate {
                        line: c.line,
                        name,
                    });
                }
                f.values[v.0 as usize].ty = ty;
                f.values[v.0 as usize].def = ValueDef::Inst(iid);
                Some(v)
            } else {
                let v = f.new_value(name.clone(), ty, ValueDef::Inst(iid));
                ctx.values.insert(name, v);
                Some(v)
            }
        }
    };
    f.inst_arena.push(Inst { dest: vid, kind });
    f.block_mut(block).insts.push(iid);
    Ok(())
}

fn parse_line(
    c: &mut Cursor,
    f: &mut Function,
    ctx: &mut FuncCtx,
    globals: &HashMap<String, GlobalId>,
    block: BlockId,
) -> Result<(), ParseError> {
    // `%dest = <op> ...` or a bare op.
    let dest_name = if let Some(Tok::VName(_)) = c.peek() {
        let name = c.vname()?;
        c.expect(Tok::Eq, "`=`")?;
        Some(name)
    } else {
        None
    };
    let op = c.ident()?;

    let bin = |w: &str| match w {
        "add" => Some(BinOp::Add),
        "sub" => Some(BinOp::Sub),
        "mul" => Some(BinOp::Mul),
        "shl" => Some(BinOp::Shl),
        "lshr" => Some(BinOp::Lshr),
        "and" => Some(BinOp::And),
        "or" => Some(BinOp::Or),
        "xor" => Some(BinOp::Xor),
        _ => None,
    };

    match op.as_str() {
        "alloca" => {
            let name = dest_name.ok_or_else(|| c.err("alloca needs a destination"))?;
            let ty = c.ty()?;
            c.finish()?;
            install(f, ctx, c, block, Some((name, Ty::Ptr)), InstKind::Alloca { ty })
        }
        "load" => {
            let name = dest_name.ok_or_else(|| c.err("load needs a destination"))?;
            let ty = c.ty()?;
            c.expect(Tok::Comma, "`,`")?;
            c.expect_ident("ptr")?;
            let ptr = parse_operand(c, f, ctx, globals, Ty::Ptr)?;
            c.finish()?;
            install(f, ctx, c, block, Some((name, ty)), InstKind::Load { ty, ptr })
        }
        "store" => {
            if dest_name.is_some() {
                return Err(c.err("store has no destination"));
            }
            let ty = c.ty()?;
            let value = parse_operand(c, f, ctx, globals, ty)?;
            c.expect(Tok::Comma, "`,`")?;
            c.expect_ident("ptr")?;
            let ptr = parse_operand(c, f, ctx, globals, Ty::Ptr)?;
            c.finish()?;
            install(f, ctx, c, block, None, InstKind::Store { ty, value, ptr })
        }
        w if bin(w).is_some() => {
            let name = dest_name.ok_or_else(|| c.err("arithmetic needs a destination"))?;
            let ty = c.ty()?;
            let lhs = parse_operand(c, f, ctx, globals, ty)?;
            c.expect(Tok::Comma, "`,`")?;
            let rhs = parse_operand(c, f, ctx, globals, ty)?;
            c.finish()?;
            let op = bin(w).ok_or_else(|| c.err("bad op"))?;
            install(
                f,
                ctx,
                c,
                block,
                Some((name, ty)),
                InstKind::Bin { op, ty, lhs, rhs },
            )
        }
        "icmp" => {
            let name = dest_name.ok_or_else(|| c.err("icmp needs a destination"))?;
            let pred = match c.ident()?.as_str() {
                "eq" => Pred::Eq,
                "ne" => Pred::Ne,
                "slt" => Pred::Slt,
                "sle" => Pred::Sle,
                "sgt" => Pred::Sgt,
                "sge" => Pred::Sge,
                "ult" => Pred::Ult,
                "ugt" => Pred::Ugt,
                other => return Err(c.err(&format!("unknown predicate `{other}`"))),
            };
            let ty = c.ty()?;
            let lhs = parse_operand(c, f, ctx, globals, ty)?;
            c.expect(Tok::Comma, "`,`")?;
            let rhs = parse_operand(c, f, ctx, globals, ty)?;
            c.finish()?;
            install(
                f,
                ctx,
                c,
                block,
                Some((name, Ty::I1)),
                InstKind::Icmp { pred, ty, lhs, rhs },
            )
        }
        "select" => {
            let name = dest_name.ok_or_else(|| c.err("select needs a destination"))?;
            c.expect_ident("i1")?;
            let cond = parse_operand(c, f, ctx, globals, Ty::I1)?;
            c.expect(Tok::Comma, "`,`")?;
            let ty = c.ty()?;
            let on_true = parse_operand(c, f, ctx, globals, ty)?;
            c.expect(Tok::Comma, "`,`")?;
            let ty2 = c.ty()?;
            if ty2 != ty {
                return Err(c.err("select arm types differ"));
            }
            let on_false = parse_operand(c, f, ctx, globals, ty)?;
            c.finish()?;
            install(
                f,
                ctx,
                c,
                block,
                Some((name, ty)),
                InstKind::Select {
                    ty,
                    cond,
                    on_true,
                    on_false,
                },
            )
        }
        "gep" => {
            let name = dest_name.ok_or_else(|| c.err("gep needs a destination"))?;
            c.expect_ident("ptr")?;
            let base = parse_operand(c, f, ctx, globals, Ty::Ptr)?;
            c.finish()?;
            install(f, ctx, c, block, Some((name, Ty::Ptr)), InstKind::Gep { base })
        }
        "call" => {
            let ret = c.ty()?;
            let callee = c.gname()?;
            c.expect(Tok::LParen, "`(`")?;
            let mut args = Vec::new();
            if c.peek() == Some(&Tok::RParen) {
                c.next();
            } else {
                loop {
                    let ty = c.ty()?;
                    let op = parse_operand(c, f, ctx, globals, ty)?;
                    args.push((ty, op));
                    match c.next() {
                        Some(Tok::Comma) => continue,
                        Some(Tok::RParen) => break,
                        _ => return Err(c.err("expected `,` or `)`")),
                    }
                }
            }
            c.finish()?;
            let dest = match (&dest_name, ret) {
                // A non-void call may discard its result.
                (None, _) => None,
                (Some(name), ty) if ty != Ty::Void => Some((name.clone(), ty)),
                _ => return Err(c.err("void call cannot have a destination")),
            };
            install(f, ctx, c, block, dest, InstKind::Call { callee, ret, args })
        }
        "phi" => {
            let name = dest_name.ok_or_else(|| c.err("phi needs a destination"))?;
            let ty = c.ty()?;
            let mut incoming = Vec::new();
            loop {
                c.expect(Tok::LBracket, "`[`")?;
                let op = parse_operand(c, f, ctx, globals, ty)?;
                c.expect(Tok::Comma, "`,`")?;
                let bname = c.vname()?;
                let b = ctx.block(c, &bname)?;
                c.expect(Tok::RBracket, "`]`")?;
                incoming.push((op, b));
                if c.peek() == Some(&Tok::Comma) {
                    c.next();
                    continue;
                }
                break;
            }
            c.finish()?;
            install(
                f,
                ctx,
                c,
                block,
                Some((name, ty)),
                InstKind::Phi { ty, incoming },
            )
        }
        "br" => {
            if dest_name.is_some() {
                return Err(c.err("br has no destination"));
            }
            match c.peek() {
                Some(Tok::Ident(w)) if w == "i1" => {
                    c.next();
                    let cond = parse_operand(c, f, ctx, globals, Ty::I1)?;
                    c.expect(Tok::Comma, "`,`")?;
                    let t = c.vname()?;
                    let on_true = ctx.block(c, &t)?;
                    c.expect(Tok::Comma, "`,`")?;
                    let e = c.vname()?;
                    let on_false = ctx.block(c, &e)?;
                    c.finish()?;
                    f.block_mut(block).term = Terminator::CondBr {
                        cond,
                        on_true,
                        on_false,
                    };
                }
                _ => {
                    let t = c.vname()?;
                    let target = ctx.block(c, &t)?;
                    c.finish()?;
                    f.block_mut(block).term = Terminator::Br { target };
                }
            }
            Ok(())
        }
        "switch" => {
            if dest_name.is_some() {
                return Err(c.err("switch has no destination"));
            }
            let ty = c.ty()?;
            let value = parse_operand(c, f, ctx, globals, ty)?;
            c.expect(Tok::Comma, "`,`")?;
            let d = c.vname()?;
            let default = ctx.block(c, &d)?;
            c.expect(Tok::LBracket, "`[`")?;
            let mut cases = Vec::new();
            if c.peek() == Some(&Tok::RBracket) {
                c.next();
            } else {
                loop {
                    let k = match c.next() {
                        Some(Tok::Int(k)) => k,
                        _ => return Err(c.err("expected case value")),
                    };
                    c.expect(Tok::Colon, "`:`")?;
                    let bname = c.vname()?;
                    let b = ctx.block(c, &bname)?;
                    cases.push((k, b));
                    match c.next() {
                        Some(Tok::Comma) => continue,
                        Some(Tok::RBracket) => break,
                        _ => return Err(c.err("expected `,` or `]`")),
                    }
                }
            }
            c.finish()?;
            f.block_mut(block).term = Terminator::Switch {
                value,
                default,
                cases,
            };
            Ok(())
        }
        "ret" => {
            if dest_name.is_some() {
                return Err(c.err("ret has no destination"));
            }
            match c.peek() {
                Some(Tok::Ident(w)) if w == "void" => {
                    c.next();
                    c.finish()?;
                    f.block_mut(block).term = Terminator::Ret { value: None };
                }
                _ => {
                    let ty = c.ty()?;
                    let v = parse_operand(c, f, ctx, globals, ty)?;
                    c.finish()?;
                    f.block_mut(block).term = Terminator::Ret { value: Some(v) };
                }
            }
            Ok(())
        }
        "unreachable" => {
            if dest_name.is_some() {
                return Err(c.err("unreachable has no destination"));
            }
            c.finish()?;
            f.block_mut(block).term = Terminator::Unreachable;
            Ok(())
        }
        other => Err(c.err(&format!("unknown instruction `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::print_module;

    const SMALL: &str = r#"
module demo
global @.str = private constant [3 x i8] c"hi\00"

declare @__obf_decrypt(ptr, i32, i32) -> ptr

func @add(i32 %a, i32 %b) -> i32 {
entry:
  %sum = add i32 %a, %b
  ret i32 %sum
}
"#;

    #[test]
    fn parses_and_reprints_stably() {
        let m = parse_module(SMALL).unwrap();
        assert_eq!(m.name, "demo");
        assert_eq!(m.globals().count(), 1);
        assert_eq!(m.funcs.len(), 2);
        let printed = print_module(&m);
        let reparsed = parse_module(&printed).unwrap();
        assert_eq!(print_module(&reparsed), printed);
    }

    #[test]
    fn parses_phi_with_forward_reference() {
        let text = r#"
module m
func @count(i32 %n) -> i32 {
entry:
  br %loop
loop:
  %i = phi i32 [ 0, %entry ], [ %next, %loop ]
  %next = add i32 %i, 1
  %done = icmp sge i32 %next, %n
  br i1 %done, %exit, %loop
exit:
  ret i32 %i
}
"#;
        let m = parse_module(text).unwrap();
        let f = m.func("count").unwrap();
        assert_eq!(f.blocks.len(), 3);
        let printed = print_module(&m);
        assert!(printed.contains("phi i32 [ 0, %entry ], [ %next, %loop ]"));
    }

    #[test]
    fn parses_switch_and_hex_bytes() {
        let text = r#"
module m
global @blob = private unnamed_addr constant [2 x i8] x"0b06"
func @pick(i32 %x) -> i32 {
entry:
  switch i32 %x, %other [ 1: %one, 2: %two ]
one:
  ret i32 10
two:
  ret i32 20
other:
  ret i32 0
}
"#;
        let m = parse_module(text).unwrap();
        let (_, g) = m.globals().next().unwrap();
        assert_eq!(g.init, Some(Const::Bytes(vec![0x0b, 0x06])));
        let printed = print_module(&m);
        assert!(printed.contains("switch i32 %x, %other [ 1: %one, 2: %two ]"));
    }

    #[test]
    fn rejects_unknown_value() {
        let text = r#"
module m
func @f() -> i32 {
entry:
  ret i32 %nope
}
"#;
        assert!(matches!(
            parse_module(text),
            Err(ParseError::UnknownName { .. })
        ));
    }

    #[test]
    fn rejects_duplicate_definition() {
        let text = r#"
module m
func @f(i32 %x) -> i32 {
entry:
  %y = add i32 %x, 1
  %y = add i32 %x, 2
  ret i32 %y
}
"#;
        assert!(matches!(
            parse_module(text),
            Err(ParseError::Duplicate { .. })
        ));
    }

    #[test]
    fn reports_line_numbers() {
        let text = "module m\nglobal @g = bogus constant i32 0\n";
        match parse_module(text) {
            Err(ParseError::Syntax { line, .. }) => assert_eq!(line, 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
