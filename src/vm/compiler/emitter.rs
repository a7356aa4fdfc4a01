use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrorKind, Result};
use crate::options::CompilerOptions;
use crate::runtime::host::{Class, Method, PrimType};
use crate::value::Value;
use crate::vm::unit::{CompiledMethod, HostSite};
use crate::vm::vp::Instr;

use super::bytecode_builder::{BytecodeBuilder, Label, Operand};
use super::compiler::Context;
use super::expr::*;
use super::objexpr::{ObjExpr, ObjKind, ObjMethod, UnitBuilder};
use super::scope_manager::LocalBinding;

pub fn emit_method(
    method: &ObjMethod,
    unit: &mut UnitBuilder,
    fields: &IndexMap<u64, u16>,
    once_only: bool,
    options: &CompilerOptions,
) -> Result<CompiledMethod> {
    let mut e = MethodEmitter {
        code: BytecodeBuilder::new(options.generate_asm),
        unit,
        fields,
        once_only,
        clearing: !options.disable_locals_clearing,
        catch_finally_locals: &method.catch_finally_locals,
        loop_label: None,
    };
    e.code.line_number(method.line);
    e.loop_label = Some(e.code.here());
    e.emit_body(&method.body, &method.ret)?;
    e.code.emit(Instr::Return);
    let asm = e.code.finish()?;
    let params_len = method.params.len() + 1;
    Ok(CompiledMethod {
        name: method.name.clone(),
        params: method.params.clone(),
        ret: method.ret.clone(),
        is_static: method.is_static,
        required: method.required(),
        variadic: method.variadic,
        max_locals: ((method.max_local + 1).max(0) as usize).max(params_len),
        code: asm.code,
        exception_table: asm.exception_table,
        lines: asm.lines,
        listing: asm.listing,
    })
}

fn intrinsic(m: &Method) -> Option<Instr> {
    let all = |p: PrimType| !m.params.is_empty() && m.params.iter().all(|c| c.prim() == Some(p));
    let long = all(PrimType::Long);
    let double = all(PrimType::Double);
    let instr = match (m.declaring.as_str(), m.name.as_str(), m.params.len()) {
        ("clojure.lang.Numbers", "add", 2) if long => Instr::AddL,
        ("clojure.lang.Numbers", "add", 2) if double => Instr::AddD,
        ("clojure.lang.Numbers", "minus", 2) if long => Instr::SubL,
        ("clojure.lang.Numbers", "minus", 2) if double => Instr::SubD,
        ("clojure.lang.Numbers", "multiply", 2) if long => Instr::MulL,
        ("clojure.lang.Numbers", "multiply", 2) if double => Instr::MulD,
        ("clojure.lang.Numbers", "divide", 2) if double => Instr::DivD,
        ("clojure.lang.Numbers", "inc", 1) if long => Instr::IncL,
        ("clojure.lang.Numbers", "dec", 1) if long => Instr::DecL,
        ("clojure.lang.Numbers", "lt", 2) if long => Instr::LtL,
        ("clojure.lang.Numbers", "lt", 2) if double => Instr::LtD,
        ("clojure.lang.Numbers", "gt", 2) if long => Instr::GtL,
        ("clojure.lang.Numbers", "gt", 2) if double => Instr::GtD,
        ("clojure.lang.Numbers", "lte", 2) if long => Instr::LteL,
        ("clojure.lang.Numbers", "lte", 2) if double => Instr::LteD,
        ("clojure.lang.Numbers", "gte", 2) if long => Instr::GteL,
        ("clojure.lang.Numbers", "gte", 2) if double => Instr::GteD,
        ("clojure.lang.Numbers" | "clojure.lang.Util", "equiv", 2) if long => Instr::EqL,
        ("clojure.lang.Numbers" | "clojure.lang.Util", "equiv", 2) if double => Instr::EqD,
        _ => return None,
    };
    Some(instr)
}

pub fn recur_prim_matches(needed: Option<PrimType>, had: Option<PrimType>) -> bool {
    match needed {
        Some(PrimType::Long) => {
            matches!(had, Some(PrimType::Long | PrimType::Int | PrimType::Short | PrimType::Char | PrimType::Byte))
        }
        Some(PrimType::Double) => matches!(had, Some(PrimType::Double | PrimType::Float)),
        Some(other) => had == Some(other),
        None => true,
    }
}

fn class_name(e: &Expr) -> String {
    match e.java_class() {
        Some(StaticType::Class(c)) => c.name.clone(),
        _ => "Object".to_string(),
    }
}

struct MethodEmitter<'a> {
    code: BytecodeBuilder,
    unit: &'a mut UnitBuilder,
    fields: &'a IndexMap<u64, u16>,
    once_only: bool,
    clearing: bool,
    catch_finally_locals: &'a HashSet<i32>,
    loop_label: Option<Label>,
}

impl<'a> MethodEmitter<'a> {
    fn emit_body(&mut self, body: &Expr, ret: &Rc<Class>) -> Result<()> {
        if ret.is_primitive() && body.can_emit_primitive() {
            match body.java_class() {
                Some(StaticType::Recur) => {}
                Some(StaticType::Class(c)) if c.name == ret.name => {}
                other => {
                    let had = match other {
                        Some(StaticType::Class(c)) => c.name.clone(),
                        _ => "null".to_string(),
                    };
                    return Err(ErrorKind::PrimitiveMismatch(format!(
                        "Mismatched primitive return, expected: {}, had: {}",
                        ret.name, had
                    ))
                    .into());
                }
            }
            self.emit(body, Context::Return)
        } else {
            self.emit(body, Context::Return)?;
            if let Some(p) = ret.prim() {
                self.code.op(Instr::Unbox, &[Operand::U8(p.code())]);
            }
            Ok(())
        }
    }

    fn constant(&mut self, v: &Value) -> Result<()> {
        match v {
            Value::Nil => self.code.emit(Instr::Nil),
            Value::Bool(true) => self.code.emit(Instr::True),
            Value::Bool(false) => self.code.emit(Instr::False),
            Value::Long(l) => self.code.op(Instr::Long, &[Operand::I64(*l)]),
            Value::Double(d) => self.code.op(Instr::Double, &[Operand::F64(*d)]),
            other => {
                let idx = self.unit.constant(other)?;
                self.code.op_noted(Instr::Const, &[Operand::U16(idx)], &format!("const__{}", idx));
            }
        }
        Ok(())
    }

    fn constant_index(&mut self, v: &Value) -> Result<u16> {
        self.unit.constant(v)
    }

    fn pop_if_statement(&mut self, ctx: Context) {
        if ctx == Context::Statement {
            self.code.emit(Instr::Pop);
        }
    }

    fn emit(&mut self, expr: &Expr, ctx: Context) -> Result<()> {
        if let Some(v) = expr.literal_value() {
            if ctx != Context::Statement {
                self.constant(&v)?;
            }
            return Ok(());
        }
        match expr {
            Expr::Local(l) => {
                if ctx != Context::Statement {
                    let clear = l.should_clear.get() && l.binding.prim.is_none();
                    self.emit_local(&l.binding, clear);
                }
            }
            Expr::Var(v) => {
                let idx = self.constant_index(&Value::Var(v.var.clone()))?;
                self.code.op_noted(Instr::VarGet, &[Operand::U16(idx)], &format!("const__{}", idx));
                self.pop_if_statement(ctx);
            }
            Expr::TheVar(var) => {
                if ctx != Context::Statement {
                    self.constant(&Value::Var(var.clone()))?;
                }
            }
            Expr::UnresolvedVar(sym) => {
                let idx = self.constant_index(&Value::Symbol(Rc::new(sym.clone())))?;
                self.code.op(Instr::ResolveVar, &[Operand::U16(idx)]);
                self.pop_if_statement(ctx);
            }
            Expr::StaticField(f) => {
                match &f.field.slot {
                    crate::runtime::host::FieldSlot::Static(v) if !f.field.mutable => self.constant(v)?,
                    _ => {
                        let site = self.unit.host_site(HostSite::Field(f.field.clone()))?;
                        self.code.op_noted(Instr::GetStatic, &[Operand::U16(site)], &f.field.name);
                    }
                }
                self.pop_if_statement(ctx);
            }
            Expr::InstanceField(f) => {
                self.code.line_number(f.line);
                self.emit(&f.target, Context::Expression)?;
                match &f.field {
                    Some(field) => {
                        let site = self.unit.host_site(HostSite::Field(field.clone()))?;
                        self.code.op_noted(Instr::GetField, &[Operand::U16(site)], &field.name);
                    }
                    None => {
                        let idx = self.constant_index(&Value::from(f.name.as_str()))?;
                        self.code.op(Instr::GetFieldReflective, &[Operand::U16(idx)]);
                    }
                }
                self.pop_if_statement(ctx);
            }
            Expr::StaticMethod(m) => {
                self.code.line_number(m.line);
                match &m.method {
                    Some(method) => {
                        self.emit_typed_args(&method.params, &m.args)?;
                        match intrinsic(method) {
                            Some(instr) => self.code.emit(instr),
                            None => {
                                let site = self.unit.host_site(HostSite::Method(method.clone()))?;
                                self.code.op_noted(
                                    Instr::CallStatic,
                                    &[Operand::U16(site), Operand::U8(m.args.len() as u8)],
                                    &format!("{}/{}", m.class.name, m.name),
                                );
                            }
                        }
                    }
                    None => {
                        self.emit_args(&m.args)?;
                        let site = self
                            .unit
                            .host_site(HostSite::Reflective { name: m.name.clone(), static_class: Some(m.class.clone()) })?;
                        self.code.op(Instr::CallReflective, &[Operand::U16(site), Operand::U8(m.args.len() as u8)]);
                    }
                }
                self.pop_if_statement(ctx);
            }
            Expr::InstanceMethod(m) => {
                self.code.line_number(m.line);
                self.emit(&m.target, Context::Expression)?;
                match &m.method {
                    Some(method) => {
                        self.emit_typed_args(&method.params, &m.args)?;
                        let site = self.unit.host_site(HostSite::Method(method.clone()))?;
                        self.code.op_noted(
                            Instr::CallVirtual,
                            &[Operand::U16(site), Operand::U8(m.args.len() as u8)],
                            &format!("{}.{}", method.declaring, m.name),
                        );
                    }
                    None => {
                        self.emit_args(&m.args)?;
                        let site = self.unit.host_site(HostSite::Reflective { name: m.name.clone(), static_class: None })?;
                        self.code.op(Instr::CallReflective, &[Operand::U16(site), Operand::U8(m.args.len() as u8)]);
                    }
                }
                self.pop_if_statement(ctx);
            }
            Expr::New(n) => {
                match &n.ctor {
                    Some(ctor) => {
                        self.emit_typed_args(&ctor.params, &n.args)?;
                        let site = self.unit.host_site(HostSite::Ctor { class: n.class.clone(), ctor: ctor.clone() })?;
                        self.code.op_noted(Instr::New, &[Operand::U16(site), Operand::U8(n.args.len() as u8)], &n.class.name);
                    }
                    None => {
                        self.emit_args(&n.args)?;
                        let idx = self.constant_index(&Value::Class(n.class.clone()))?;
                        self.code.op(Instr::NewReflective, &[Operand::U16(idx), Operand::U8(n.args.len() as u8)]);
                    }
                }
                self.pop_if_statement(ctx);
            }
            Expr::InstanceOf(i) => {
                self.emit(&i.expr, Context::Expression)?;
                let idx = self.constant_index(&Value::Class(i.class.clone()))?;
                self.code.op_noted(Instr::InstanceOf, &[Operand::U16(idx)], &i.class.name);
                self.pop_if_statement(ctx);
            }
            Expr::If(i) => self.emit_if(i, ctx)?,
            Expr::Body(exprs) => {
                let Some((last, init)) = exprs.split_last() else {
                    if ctx != Context::Statement {
                        self.code.emit(Instr::Nil);
                    }
                    return Ok(());
                };
                for e in init {
                    self.emit(e, Context::Statement)?;
                }
                self.emit(last, ctx)?;
            }
            Expr::Let(l) => self.emit_let(l, ctx)?,
            Expr::LetFn(l) => self.emit_letfn(l, ctx)?,
            Expr::Recur(r) => self.emit_recur(r)?,
            Expr::Obj(o) => self.emit_obj(o, ctx)?,
            Expr::Case(c) => self.emit_case(c, ctx)?,
            Expr::Try(t) => self.emit_try(t, ctx)?,
            Expr::Throw(e) => {
                self.emit(e, Context::Expression)?;
                self.code.emit(Instr::Throw);
            }
            Expr::MonitorEnter(e) | Expr::MonitorExit(e) => {
                self.emit(e, Context::Expression)?;
                let instr = if matches!(expr, Expr::MonitorEnter(_)) { Instr::MonitorEnter } else { Instr::MonitorExit };
                self.code.emit(instr);
                if ctx != Context::Statement {
                    self.code.emit(Instr::Nil);
                }
            }
            Expr::Assign(a) => self.emit_assign(a, ctx)?,
            Expr::Def(d) => self.emit_def(d, ctx)?,
            Expr::Import(name) => {
                let idx = self.constant_index(&Value::from(name.as_str()))?;
                self.code.op_noted(Instr::Import, &[Operand::U16(idx)], name);
                self.pop_if_statement(ctx);
            }
            Expr::Invoke(i) => {
                self.code.line_number(i.line);
                self.emit(&i.fexpr, Context::Expression)?;
                self.emit_args(&i.args)?;
                self.code.op(Instr::Invoke, &[Operand::U8(i.args.len() as u8)]);
                self.pop_if_statement(ctx);
            }
            Expr::KeywordInvoke(k) => {
                self.code.line_number(k.line);
                self.emit(&k.target, Context::Expression)?;
                let site = self.unit.keyword_site(&k.kw)?;
                self.code.op_noted(
                    Instr::KeywordInvoke,
                    &[Operand::U16(site)],
                    &format!("__site__{}__ __thunk__{}__", site, site),
                );
                self.pop_if_statement(ctx);
            }
            Expr::Meta(m) => {
                self.emit(&m.expr, Context::Expression)?;
                self.emit(&m.meta, Context::Expression)?;
                self.code.emit(Instr::WithMeta);
                self.pop_if_statement(ctx);
            }
            Expr::List(items) => self.emit_coll(Instr::MakeList, items, items.len(), ctx)?,
            Expr::Vector(items) => self.emit_coll(Instr::MakeVector, items, items.len(), ctx)?,
            Expr::Map(kvs) => self.emit_coll(Instr::MakeMap, kvs, kvs.len() / 2, ctx)?,
            Expr::Set(items) => self.emit_coll(Instr::MakeSet, items, items.len(), ctx)?,
            _ => return Err(ErrorKind::internal(format!("no emitter for {}", expr.kind_name())).into()),
        }
        Ok(())
    }

    fn emit_args(&mut self, args: &[Expr]) -> Result<()> {
        for arg in args {
            self.emit(arg, Context::Expression)?;
        }
        Ok(())
    }

    /// Emits arguments for a resolved signature, converting to each primitive parameter unless
    /// the argument already produces that primitive.
    fn emit_typed_args(&mut self, params: &[Rc<Class>], args: &[Expr]) -> Result<()> {
        for (param, arg) in params.iter().zip(args) {
            self.emit(arg, Context::Expression)?;
            let Some(p) = param.prim() else { continue };
            let same = arg.prim_type().map_or(false, |c| c.name == param.name);
            if !same {
                self.code.op(Instr::Unbox, &[Operand::U8(p.code())]);
            }
        }
        Ok(())
    }

    fn emit_coll(&mut self, instr: Instr, items: &[Expr], count: usize, ctx: Context) -> Result<()> {
        self.emit_args(items)?;
        self.code.op(instr, &[Operand::U16(count as u16)]);
        self.pop_if_statement(ctx);
        Ok(())
    }

    fn emit_local(&mut self, b: &LocalBinding, clear: bool) {
        if let Some(&field) = self.fields.get(&b.id) {
            self.code.op_noted(Instr::LoadClosed, &[Operand::U16(field)], &b.name);
            if self.clearing && self.once_only && clear && b.can_be_cleared.get() {
                self.code.op(Instr::ClearClosed, &[Operand::U16(field)]);
            }
            return;
        }
        let slot = b.idx.max(0) as u16;
        self.code.op_noted(Instr::LoadLocal, &[Operand::U16(slot)], &b.name);
        let clearable = b.idx > 0 && b.prim.is_none() && b.can_be_cleared.get() && !self.catch_finally_locals.contains(&b.idx);
        if self.clearing && clear && clearable {
            self.code.op(Instr::ClearLocal, &[Operand::U16(slot)]);
        }
    }

    fn store_local(&mut self, b: &LocalBinding) {
        self.code.op_noted(Instr::StoreLocal, &[Operand::U16(b.idx.max(0) as u16)], &b.name);
    }

    fn emit_if(&mut self, i: &IfExpr, ctx: Context) -> Result<()> {
        let otherwise = self.code.new_label();
        let end = self.code.new_label();
        self.code.line_number(i.line);
        self.emit(&i.test, Context::Expression)?;
        self.code.jump(Instr::JumpIfFalse, otherwise);
        self.emit(&i.then, ctx)?;
        self.code.jump(Instr::Jump, end);
        self.code.mark(otherwise);
        self.emit(&i.otherwise, ctx)?;
        self.code.mark(end);
        Ok(())
    }

    fn emit_let(&mut self, l: &LetExpr, ctx: Context) -> Result<()> {
        for bi in &l.inits {
            self.emit(&bi.init, Context::Expression)?;
            self.store_local(&bi.binding);
        }
        if l.is_loop {
            let saved = self.loop_label.replace(self.code.here());
            let result = self.emit(&l.body, ctx);
            self.loop_label = saved;
            result
        } else {
            self.emit(&l.body, ctx)
        }
    }

    /// Every function slot is nil while the functions are built, then each function's captured
    /// siblings are patched in.
    fn emit_letfn(&mut self, l: &LetFnExpr, ctx: Context) -> Result<()> {
        for bi in &l.inits {
            self.code.emit(Instr::Nil);
            self.store_local(&bi.binding);
        }
        for bi in &l.inits {
            self.emit(&bi.init, Context::Expression)?;
            self.store_local(&bi.binding);
        }
        let siblings: HashSet<u64> = l.inits.iter().map(|bi| bi.binding.id).collect();
        for bi in &l.inits {
            let Expr::Obj(obj) = &bi.init else { continue };
            self.emit_local(&bi.binding, false);
            for close in obj.closes.iter().filter(|c| siblings.contains(&c.id)) {
                let Some(field) = obj.class.field(&close.name, false) else { continue };
                self.code.emit(Instr::Dup);
                self.emit_local(close, false);
                let site = self.unit.host_site(HostSite::Field(field))?;
                self.code.op_noted(Instr::SetField, &[Operand::U16(site)], &close.name);
                self.code.emit(Instr::Pop);
            }
            self.code.emit(Instr::Pop);
        }
        self.emit(&l.body, ctx)
    }

    fn emit_recur(&mut self, r: &RecurExpr) -> Result<()> {
        let Some(target) = self.loop_label else {
            return Err(ErrorKind::internal("recur emitted outside a loop").into());
        };
        self.code.line_number(r.line);
        for (lb, arg) in r.loop_locals.iter().zip(&r.args) {
            if let Some(needed) = &lb.prim {
                let had = arg.prim_type().and_then(|c| c.prim());
                if !recur_prim_matches(needed.prim(), had) {
                    return Err(ErrorKind::PrimitiveMismatch(format!(
                        "recur arg for primitive local: {} is not matching primitive, had: {}, needed: {}",
                        lb.name,
                        class_name(arg),
                        needed.name
                    ))
                    .into());
                }
            }
            self.emit(arg, Context::Expression)?;
        }
        for lb in r.loop_locals.iter().rev() {
            self.store_local(lb);
        }
        self.code.jump(Instr::Jump, target);
        Ok(())
    }

    fn emit_obj(&mut self, o: &ObjExpr, ctx: Context) -> Result<()> {
        if o.kind == ObjKind::Deftype {
            if ctx != Context::Statement {
                self.code.emit(Instr::Nil);
            }
            return Ok(());
        }
        for close in &o.close_exprs {
            let clear = close.should_clear.get() && close.binding.prim.is_none();
            self.emit_local(&close.binding, clear);
        }
        let Some(ctor) = o.class.ctors().into_iter().find(|c| c.params.len() == o.closes.len()) else {
            return Err(ErrorKind::internal(format!("{} has no constructor for its closed-over locals", o.name)).into());
        };
        let site = self.unit.host_site(HostSite::Ctor { class: o.class.clone(), ctor })?;
        self.code.op_noted(Instr::New, &[Operand::U16(site), Operand::U8(o.closes.len() as u8)], &o.name);
        self.pop_if_statement(ctx);
        Ok(())
    }

    fn emit_assign(&mut self, a: &AssignExpr, ctx: Context) -> Result<()> {
        match &*a.target {
            Expr::Var(v) => {
                self.emit(&a.val, Context::Expression)?;
                let idx = self.constant_index(&Value::Var(v.var.clone()))?;
                self.code.op(Instr::VarSet, &[Operand::U16(idx)]);
            }
            Expr::InstanceField(f) => {
                self.emit(&f.target, Context::Expression)?;
                self.emit(&a.val, Context::Expression)?;
                match &f.field {
                    Some(field) => {
                        let site = self.unit.host_site(HostSite::Field(field.clone()))?;
                        self.code.op_noted(Instr::SetField, &[Operand::U16(site)], &field.name);
                    }
                    None => {
                        let idx = self.constant_index(&Value::from(f.name.as_str()))?;
                        self.code.op(Instr::SetFieldReflective, &[Operand::U16(idx)]);
                    }
                }
            }
            Expr::Local(l) => {
                let Some(&field) = self.fields.get(&l.binding.id) else {
                    return Err(ErrorKind::internal(format!("{} is not a field", l.binding.name)).into());
                };
                self.emit(&a.val, Context::Expression)?;
                self.code.emit(Instr::Dup);
                self.code.op_noted(Instr::SetClosed, &[Operand::U16(field)], &l.binding.name);
            }
            other => return Err(ErrorKind::internal(format!("can't assign to {}", other.kind_name())).into()),
        }
        self.pop_if_statement(ctx);
        Ok(())
    }

    fn emit_def(&mut self, d: &DefExpr, ctx: Context) -> Result<()> {
        let var = Value::Var(d.var.clone());
        let idx = self.constant_index(&var)?;
        let note = format!("#'{}", d.var.qualified_name());
        if d.is_dynamic {
            self.code.op_noted(Instr::SetDynamic, &[Operand::U16(idx)], &note);
        }
        if let Some(meta) = &d.meta {
            self.emit(meta, Context::Expression)?;
            self.code.op_noted(Instr::SetVarMeta, &[Operand::U16(idx)], &note);
        }
        if let Some(init) = &d.init {
            self.emit(init, Context::Expression)?;
            self.code.op_noted(Instr::BindRoot, &[Operand::U16(idx)], &note);
        }
        if ctx != Context::Statement {
            self.constant(&var)?;
        }
        Ok(())
    }

    fn emit_case(&mut self, c: &CaseExpr, ctx: Context) -> Result<()> {
        let default = self.code.new_label();
        let end = self.code.new_label();
        let labels: Vec<(i32, Label)> = c.tests.keys().map(|k| (*k, self.code.new_label())).collect();
        self.code.line_number(c.line);
        let prim = c.expr.binding.prim.clone();
        let scrutinee = Expr::Local(LocalBindingExpr {
            binding: c.expr.binding.clone(),
            tag_class: c.expr.tag_class.clone(),
            should_clear: std::rc::Rc::new(std::cell::Cell::new(false)),
        });
        let prim_is_long = prim.as_ref().map_or(false, |p| p.prim() == Some(PrimType::Long));
        match c.test_type {
            TestType::Int if prim.is_some() && !prim_is_long => {
                // only integral scrutinees can match int tests
                self.code.jump(Instr::Jump, default);
            }
            TestType::Int => {
                self.emit(&scrutinee, Context::Expression)?;
                self.code.jump(Instr::IntKey, default);
                self.emit_shift_mask(c);
            }
            TestType::HashEquiv | TestType::HashIdentity => {
                self.emit(&scrutinee, Context::Expression)?;
                self.code.emit(Instr::HashKey);
                self.emit_shift_mask(c);
            }
        }
        if !(c.test_type == TestType::Int && prim.is_some() && !prim_is_long) {
            match c.switch_type {
                SwitchType::Sparse => self.code.lookup_switch(default, &labels),
                SwitchType::Compact => {
                    let targets: Vec<Label> = (c.low..=c.high)
                        .map(|k| labels.iter().find(|(key, _)| *key == k).map_or(default, |(_, l)| *l))
                        .collect();
                    self.code.table_switch(c.low, c.high, default, &targets);
                }
            }
        }
        for (key, label) in &labels {
            self.code.mark(*label);
            let (Some(test), Some(then)) = (c.tests.get(key), c.thens.get(key)) else {
                return Err(ErrorKind::internal(format!("case key {} has no clause", key)).into());
            };
            let skip = c.test_type != TestType::Int && c.skip_check.contains(key);
            if !skip {
                self.emit(&scrutinee, Context::Expression)?;
                self.emit(test, Context::Expression)?;
                let compare = match c.test_type {
                    TestType::Int if prim_is_long => Instr::EqL,
                    TestType::HashIdentity => Instr::Identical,
                    _ => Instr::Equiv,
                };
                self.code.emit(compare);
                self.code.jump(Instr::JumpIfFalse, default);
            }
            self.emit(then, Context::Expression)?;
            self.code.jump(Instr::Jump, end);
        }
        self.code.mark(default);
        self.emit(&c.default, Context::Expression)?;
        self.code.mark(end);
        self.pop_if_statement(ctx);
        Ok(())
    }

    fn emit_shift_mask(&mut self, c: &CaseExpr) {
        if c.mask != 0 {
            self.code.op(Instr::ShiftMask, &[Operand::U8(c.shift), Operand::I32(c.mask)]);
        }
    }

    fn emit_try(&mut self, t: &TryExpr, ctx: Context) -> Result<()> {
        let start = self.code.new_label();
        let end_try = self.code.new_label();
        let ret = self.code.new_label();
        let finally_label = self.code.new_label();
        let clauses: Vec<(Label, Label)> = t.catches.iter().map(|_| (self.code.new_label(), self.code.new_label())).collect();
        let ret_slot = t.ret_local.max(0) as u16;

        self.code.mark(start);
        self.emit(&t.body, Context::Expression)?;
        self.code.op(Instr::StoreLocal, &[Operand::U16(ret_slot)]);
        self.code.mark(end_try);
        if let Some(finally) = &t.finally {
            self.emit(finally, Context::Statement)?;
        }
        self.code.jump(Instr::Jump, ret);

        for (clause, (handler, handler_end)) in t.catches.iter().zip(&clauses) {
            self.code.mark(*handler);
            self.store_local(&clause.binding);
            self.emit(&clause.handler, Context::Expression)?;
            self.code.op(Instr::StoreLocal, &[Operand::U16(ret_slot)]);
            self.code.mark(*handler_end);
            if let Some(finally) = &t.finally {
                self.emit(finally, Context::Statement)?;
            }
            self.code.jump(Instr::Jump, ret);
        }

        if let Some(finally) = &t.finally {
            let slot = t.finally_local.max(0) as u16;
            self.code.mark(finally_label);
            self.code.op(Instr::StoreLocal, &[Operand::U16(slot)]);
            self.emit(finally, Context::Statement)?;
            self.code.op(Instr::LoadLocal, &[Operand::U16(slot)]);
            self.code.emit(Instr::Throw);
        }

        self.code.mark(ret);
        if ctx != Context::Statement {
            self.code.op(Instr::LoadLocal, &[Operand::U16(ret_slot)]);
        }

        for (clause, (handler, _)) in t.catches.iter().zip(&clauses) {
            self.code.try_catch_block(start, end_try, *handler, Some(clause.class.clone()));
        }
        if t.finally.is_some() {
            self.code.try_catch_block(start, end_try, finally_label, None);
            for (handler, handler_end) in &clauses {
                self.code.try_catch_block(*handler, *handler_end, finally_label, None);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::host::host;

    fn method(body: Expr, ret: &str) -> ObjMethod {
        ObjMethod {
            name: "invoke".into(),
            params: vec![],
            ret: host().get(ret).unwrap(),
            arg_locals: vec![],
            variadic: false,
            is_static: false,
            body,
            max_local: 0,
            catch_finally_locals: HashSet::new(),
            line: 1,
            bridges: vec![],
        }
    }

    fn emit(m: &ObjMethod) -> Result<CompiledMethod> {
        let mut unit = UnitBuilder::default();
        let options = CompilerOptions::new().generate_asm(true);
        emit_method(m, &mut unit, &IndexMap::new(), false, &options)
    }

    #[test]
    fn statements_leave_nothing_behind() {
        let body = Expr::Body(vec![Expr::Str("ignored".into()), Expr::Number(Value::Long(7))]);
        let out = emit(&method(body, "java.lang.Object")).unwrap();
        assert_eq!(out.listing, "L0:\nLong 7\nReturn\n");
    }

    #[test]
    fn primitive_return_mismatch_is_reported() {
        let err = emit(&method(Expr::Number(Value::Double(1.5)), "long")).err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::PrimitiveMismatch(_)));
        assert!(err.to_string().contains("Mismatched primitive return, expected: long, had: double"));
    }

    #[test]
    fn boxed_body_is_unboxed_for_primitive_return() {
        let out = emit(&method(Expr::Str("x".into()), "long")).unwrap();
        assert!(out.listing.contains("Unbox"));
    }
}
