use std::cell::Cell;
use std::collections::{BTreeMap, HashSet};
use std::rc::Rc;

use crate::error::{ErrorKind, Result};
use crate::runtime::host::{host, Class, Ctor, Field, FieldSlot, Method};
use crate::runtime::namespace::Var;
use crate::value::{Keyword, Symbol, Value};
use crate::vm::vm::Vm;

use super::objexpr::ObjExpr;
use super::scope_manager::LocalBinding;

#[derive(Clone, Debug)]
pub enum StaticType {
    Nil,
    Recur,
    Class(Rc<Class>),
}

impl StaticType {
    pub fn class(&self) -> Option<&Rc<Class>> {
        match self {
            StaticType::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn same(&self, other: &StaticType) -> bool {
        match (self, other) {
            (StaticType::Nil, StaticType::Nil) | (StaticType::Recur, StaticType::Recur) => true,
            (StaticType::Class(a), StaticType::Class(b)) => a.name == b.name,
            _ => false,
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.class().map_or(false, |c| c.is_primitive())
    }
}

fn named(name: &str) -> Option<StaticType> {
    host().get(name).map(StaticType::Class)
}

fn thrown(e: Value) -> crate::error::CompilerError {
    ErrorKind::Thrown(e).into()
}

pub struct LocalBindingExpr {
    pub binding: Rc<LocalBinding>,
    pub tag_class: Option<Rc<Class>>,
    pub should_clear: Rc<Cell<bool>>,
}

pub struct VarExpr {
    pub var: Rc<Var>,
    pub tag_class: Option<Rc<Class>>,
}

pub struct StaticFieldExpr {
    pub class: Rc<Class>,
    pub field: Rc<Field>,
    pub tag_class: Option<Rc<Class>>,
    pub line: u32,
}

pub struct InstanceFieldExpr {
    pub target: Box<Expr>,
    pub name: String,
    pub field: Option<Rc<Field>>,
    pub tag_class: Option<Rc<Class>>,
    pub line: u32,
}

pub struct StaticMethodExpr {
    pub class: Rc<Class>,
    pub name: String,
    pub args: Vec<Expr>,
    pub method: Option<Rc<Method>>,
    pub tag_class: Option<Rc<Class>>,
    pub line: u32,
}

pub struct InstanceMethodExpr {
    pub target: Box<Expr>,
    pub name: String,
    pub args: Vec<Expr>,
    pub method: Option<Rc<Method>>,
    pub tag_class: Option<Rc<Class>>,
    pub line: u32,
}

pub struct NewExpr {
    pub class: Rc<Class>,
    pub args: Vec<Expr>,
    pub ctor: Option<Rc<Ctor>>,
}

pub struct InstanceOfExpr {
    pub class: Rc<Class>,
    pub expr: Box<Expr>,
}

pub struct IfExpr {
    pub test: Box<Expr>,
    pub then: Box<Expr>,
    pub otherwise: Box<Expr>,
    pub line: u32,
}

pub struct BindingInit {
    pub binding: Rc<LocalBinding>,
    pub init: Expr,
}

pub struct LetExpr {
    pub inits: Vec<BindingInit>,
    pub body: Box<Expr>,
    pub is_loop: bool,
}

pub struct LetFnExpr {
    pub inits: Vec<BindingInit>,
    pub body: Box<Expr>,
}

pub struct RecurExpr {
    pub loop_locals: Rc<Vec<Rc<LocalBinding>>>,
    pub args: Vec<Expr>,
    pub line: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchType {
    Compact,
    Sparse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TestType {
    Int,
    HashEquiv,
    HashIdentity,
}

pub struct CaseExpr {
    pub expr: LocalBindingExpr,
    pub shift: u8,
    pub mask: i32,
    pub low: i32,
    pub high: i32,
    pub default: Box<Expr>,
    pub tests: BTreeMap<i32, Expr>,
    pub thens: BTreeMap<i32, Expr>,
    pub switch_type: SwitchType,
    pub test_type: TestType,
    pub skip_check: HashSet<i32>,
    pub return_type: Option<Rc<Class>>,
    pub line: u32,
}

pub struct CatchClause {
    pub class: Rc<Class>,
    pub binding: Rc<LocalBinding>,
    pub handler: Expr,
}

pub struct TryExpr {
    pub body: Box<Expr>,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Box<Expr>>,
    pub ret_local: i32,
    pub finally_local: i32,
}

pub struct AssignExpr {
    pub target: Box<Expr>,
    pub val: Box<Expr>,
}

pub struct DefExpr {
    pub var: Rc<Var>,
    pub init: Option<Box<Expr>>,
    pub meta: Option<Box<Expr>>,
    pub is_dynamic: bool,
}

pub struct InvokeExpr {
    pub fexpr: Box<Expr>,
    pub args: Vec<Expr>,
    pub tag_class: Option<Rc<Class>>,
    pub line: u32,
}

pub struct KeywordInvokeExpr {
    pub kw: Rc<Keyword>,
    pub target: Box<Expr>,
    pub tag_class: Option<Rc<Class>>,
    pub line: u32,
}

pub struct MetaExpr {
    pub expr: Box<Expr>,
    pub meta: Box<Expr>,
}

pub enum Expr {
    Nil,
    Bool(bool),
    Number(Value),
    Str(Rc<str>),
    Keyword(Rc<Keyword>),
    Constant(Value),
    Empty(Value),
    Local(LocalBindingExpr),
    Var(VarExpr),
    TheVar(Rc<Var>),
    UnresolvedVar(Symbol),
    StaticField(StaticFieldExpr),
    InstanceField(InstanceFieldExpr),
    StaticMethod(StaticMethodExpr),
    InstanceMethod(InstanceMethodExpr),
    New(NewExpr),
    InstanceOf(InstanceOfExpr),
    If(IfExpr),
    Body(Vec<Expr>),
    Let(LetExpr),
    LetFn(LetFnExpr),
    Recur(RecurExpr),
    Obj(Rc<ObjExpr>),
    Case(Box<CaseExpr>),
    Try(TryExpr),
    Throw(Box<Expr>),
    MonitorEnter(Box<Expr>),
    MonitorExit(Box<Expr>),
    Assign(AssignExpr),
    Def(DefExpr),
    Import(String),
    Invoke(InvokeExpr),
    KeywordInvoke(KeywordInvokeExpr),
    Meta(MetaExpr),
    List(Vec<Expr>),
    Vector(Vec<Expr>),
    Map(Vec<Expr>),
    Set(Vec<Expr>),
}

pub fn maybe_java_class<'a>(exprs: impl IntoIterator<Item = &'a Expr>) -> Option<Rc<Class>> {
    let mut found: Option<StaticType> = None;
    for e in exprs {
        if matches!(e, Expr::Throw(_)) {
            continue;
        }
        let t = e.java_class()?;
        match &found {
            None => found = Some(t),
            Some(f) if !f.same(&t) => return None,
            Some(_) => {}
        }
    }
    found.and_then(|t| t.class().cloned())
}

impl Expr {
    pub fn java_class(&self) -> Option<StaticType> {
        match self {
            Expr::Nil => Some(StaticType::Nil),
            Expr::Bool(_) => named("java.lang.Boolean"),
            Expr::Number(Value::Double(_)) => named("double"),
            Expr::Number(_) => named("long"),
            Expr::Str(_) => named("java.lang.String"),
            Expr::Keyword(_) => named("clojure.lang.Keyword"),
            Expr::Constant(v) => host().class_of(v).map(StaticType::Class),
            Expr::Empty(v) => collection_type(v),
            Expr::Local(l) => {
                l.tag_class.clone().or_else(|| l.binding.java_class.clone()).map(StaticType::Class)
            }
            Expr::Var(v) => v.tag_class.clone().map(StaticType::Class),
            Expr::TheVar(_) | Expr::Def(_) => named("clojure.lang.Var"),
            Expr::UnresolvedVar(_) => None,
            Expr::StaticField(f) => Some(StaticType::Class(f.tag_class.clone().unwrap_or_else(|| f.field.class.clone()))),
            Expr::InstanceField(f) => {
                f.tag_class.clone().or_else(|| f.field.as_ref().map(|fd| fd.class.clone())).map(StaticType::Class)
            }
            Expr::StaticMethod(m) => {
                m.tag_class.clone().or_else(|| m.method.as_ref().map(|md| md.ret.clone())).map(StaticType::Class)
            }
            Expr::InstanceMethod(m) => {
                m.tag_class.clone().or_else(|| m.method.as_ref().map(|md| md.ret.clone())).map(StaticType::Class)
            }
            Expr::New(n) => Some(StaticType::Class(n.class.clone())),
            Expr::InstanceOf(_) => named("boolean"),
            Expr::If(i) => if_java_class(i),
            Expr::Body(exprs) => exprs.last().and_then(Expr::java_class),
            Expr::Let(l) => l.body.java_class(),
            Expr::LetFn(l) => l.body.java_class(),
            Expr::Recur(_) => Some(StaticType::Recur),
            Expr::Obj(o) => o.java_class().map(StaticType::Class),
            Expr::Case(c) => c.return_type.clone().map(StaticType::Class),
            Expr::Try(t) => t.body.java_class(),
            Expr::Throw(_) | Expr::MonitorEnter(_) | Expr::MonitorExit(_) | Expr::Import(_) => None,
            Expr::Assign(a) => a.val.java_class(),
            Expr::Invoke(i) => i.tag_class.clone().map(StaticType::Class),
            Expr::KeywordInvoke(k) => k.tag_class.clone().map(StaticType::Class),
            Expr::Meta(m) => m.expr.java_class(),
            Expr::List(_) => named("clojure.lang.PersistentList"),
            Expr::Vector(_) => named("clojure.lang.IPersistentVector"),
            Expr::Map(_) => named("clojure.lang.IPersistentMap"),
            Expr::Set(_) => named("clojure.lang.PersistentHashSet"),
        }
    }

    pub fn has_java_class(&self) -> bool {
        self.java_class().is_some()
    }

    pub fn can_emit_primitive(&self) -> bool {
        match self {
            Expr::Number(_) | Expr::InstanceOf(_) | Expr::Recur(_) => true,
            Expr::Local(l) => l.binding.prim.is_some(),
            Expr::StaticMethod(m) => m.method.as_ref().map_or(false, |md| md.ret.is_primitive()),
            Expr::InstanceMethod(m) => m.method.as_ref().map_or(false, |md| md.ret.is_primitive()),
            Expr::StaticField(f) => f.field.class.is_primitive(),
            Expr::InstanceField(f) => f.field.as_ref().map_or(false, |fd| fd.class.is_primitive()),
            Expr::If(i) => {
                let (Some(t), Some(e)) = (i.then.java_class(), i.otherwise.java_class()) else { return false };
                let agree = t.same(&e) || matches!(t, StaticType::Recur) || matches!(e, StaticType::Recur);
                agree && i.then.can_emit_primitive() && i.otherwise.can_emit_primitive()
            }
            Expr::Body(exprs) => exprs.last().map_or(false, Expr::can_emit_primitive),
            Expr::Let(l) => l.body.can_emit_primitive(),
            Expr::Case(c) => c.return_type.as_ref().map_or(false, |r| r.is_primitive()),
            _ => false,
        }
    }

    pub fn prim_type(&self) -> Option<Rc<Class>> {
        if !self.can_emit_primitive() {
            return None;
        }
        match self.java_class() {
            Some(StaticType::Class(c)) if c.is_primitive() => Some(c),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expr::Nil | Expr::Bool(_) | Expr::Number(_) | Expr::Str(_) | Expr::Keyword(_) | Expr::Constant(_) | Expr::Empty(_)
        )
    }

    pub fn literal_value(&self) -> Option<Value> {
        Some(match self {
            Expr::Nil => Value::Nil,
            Expr::Bool(b) => Value::Bool(*b),
            Expr::Number(v) | Expr::Constant(v) | Expr::Empty(v) => v.clone(),
            Expr::Str(s) => Value::Str(s.clone()),
            Expr::Keyword(k) => Value::Keyword(k.clone()),
            _ => return None,
        })
    }

    pub fn eval(&self, vm: &mut Vm) -> Result<Value> {
        if let Some(v) = self.literal_value() {
            return Ok(v);
        }
        match self {
            Expr::Var(v) => v.var.deref().map_err(thrown),
            Expr::TheVar(var) => Ok(Value::Var(var.clone())),
            Expr::UnresolvedVar(_) => Err(ErrorKind::internal("UnresolvedVarExpr cannot be evalled").into()),
            Expr::StaticField(f) => match &f.field.slot {
                FieldSlot::Static(v) => Ok(v.clone()),
                FieldSlot::Instance(_) => Err(ErrorKind::internal(format!("{} is not static", f.field.name)).into()),
            },
            Expr::InstanceField(f) => {
                let target = f.target.eval(vm)?;
                field_value(&target, &f.name).or_else(|_| vm.invoke_member(&target, &f.name, &[])).map_err(thrown)
            }
            Expr::StaticMethod(m) => {
                let args = eval_all(&m.args, vm)?;
                match &m.method {
                    Some(method) => vm.call_method(method, None, &args),
                    None => vm.invoke_static(&m.class, &m.name, &args),
                }
                .map_err(thrown)
            }
            Expr::InstanceMethod(m) => {
                let target = m.target.eval(vm)?;
                let args = eval_all(&m.args, vm)?;
                match &m.method {
                    Some(method) => vm.call_method(method, Some(&target), &args),
                    None => vm.invoke_member(&target, &m.name, &args),
                }
                .map_err(thrown)
            }
            Expr::New(n) => {
                let args = eval_all(&n.args, vm)?;
                match &n.ctor {
                    Some(ctor) => vm.construct(&n.class, ctor, &args),
                    None => vm.construct_reflective(&n.class, &args),
                }
                .map_err(thrown)
            }
            Expr::InstanceOf(i) => {
                let v = i.expr.eval(vm)?;
                Ok(Value::Bool(host().class_of(&v).map_or(false, |c| i.class.is_assignable_from(&c))))
            }
            Expr::If(i) => {
                if i.test.eval(vm)?.is_truthy() {
                    i.then.eval(vm)
                } else {
                    i.otherwise.eval(vm)
                }
            }
            Expr::Body(exprs) => {
                let mut last = Value::Nil;
                for e in exprs {
                    last = e.eval(vm)?;
                }
                Ok(last)
            }
            Expr::Obj(o) => o.eval(vm),
            Expr::Assign(a) => eval_assign(a, vm),
            Expr::Def(d) => {
                if let Some(init) = &d.init {
                    let v = init.eval(vm)?;
                    d.var.bind_root(v);
                }
                if let Some(meta) = &d.meta {
                    let m = meta.eval(vm)?;
                    d.var.set_meta(m);
                }
                if d.is_dynamic {
                    d.var.set_dynamic(true);
                }
                Ok(Value::Var(d.var.clone()))
            }
            Expr::Import(name) => {
                let Some(class) = host().get(name) else {
                    return Err(ErrorKind::unresolved(format!("java.lang.ClassNotFoundException: {}", name)).into());
                };
                vm.namespaces().current().import_class(&class);
                Ok(Value::Class(class))
            }
            Expr::Invoke(i) => {
                let f = i.fexpr.eval(vm)?;
                let args = eval_all(&i.args, vm)?;
                vm.invoke(&f, &args).map_err(thrown)
            }
            Expr::KeywordInvoke(k) => {
                let target = k.target.eval(vm)?;
                vm.keyword_lookup(&target, &Value::Keyword(k.kw.clone()), Value::Nil).map_err(thrown)
            }
            Expr::Meta(m) => {
                let v = m.expr.eval(vm)?;
                let meta = m.meta.eval(vm)?;
                Ok(v.with_meta(if meta.is_nil() { None } else { Some(meta) }))
            }
            Expr::List(items) => Ok(Value::list(eval_all(items, vm)?)),
            Expr::Vector(items) => Ok(Value::vector(eval_all(items, vm)?)),
            Expr::Set(items) => Ok(Value::set(eval_all(items, vm)?)),
            Expr::Map(kvs) => {
                let flat = eval_all(kvs, vm)?;
                Ok(Value::map(flat.chunks_exact(2).map(|kv| (kv[0].clone(), kv[1].clone())).collect()))
            }
            Expr::Local(_) => Err(ErrorKind::internal("Can't eval locals").into()),
            _ => Err(ErrorKind::internal(format!("Can't eval {}", self.kind_name())).into()),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Let(l) if l.is_loop => "loop",
            Expr::Let(_) => "let",
            Expr::LetFn(_) => "letfn",
            Expr::Recur(_) => "recur",
            Expr::Case(_) => "case",
            Expr::Try(_) => "try",
            Expr::Throw(_) => "throw",
            Expr::MonitorEnter(_) => "monitor-enter",
            Expr::MonitorExit(_) => "monitor-exit",
            _ => "expression",
        }
    }
}

fn collection_type(v: &Value) -> Option<StaticType> {
    match v {
        Value::Vector(_) => named("clojure.lang.IPersistentVector"),
        Value::Map(_) => named("clojure.lang.IPersistentMap"),
        other => host().class_of(other).map(StaticType::Class),
    }
}

fn if_java_class(i: &IfExpr) -> Option<StaticType> {
    let t = i.then.java_class()?;
    let e = i.otherwise.java_class()?;
    let compatible = t.same(&e)
        || matches!(t, StaticType::Recur)
        || matches!(e, StaticType::Recur)
        || (matches!(t, StaticType::Nil) && !e.is_primitive())
        || (matches!(e, StaticType::Nil) && !t.is_primitive());
    if !compatible {
        return None;
    }
    match t {
        StaticType::Class(_) => Some(t),
        _ => Some(e),
    }
}

fn eval_all(exprs: &[Expr], vm: &mut Vm) -> Result<Vec<Value>> {
    exprs.iter().map(|e| e.eval(vm)).collect()
}

fn field_value(target: &Value, name: &str) -> crate::value::NativeResult {
    if let Value::Object(o) = target {
        if let Some(field) = o.class.field(name, false) {
            if let FieldSlot::Instance(i) = field.slot {
                return Ok(o.fields.borrow().get(i).cloned().unwrap_or(Value::Nil));
            }
        }
    }
    Err(crate::runtime::rt::illegal_argument(format!("No matching field found: {}", name)))
}

fn eval_assign(a: &AssignExpr, vm: &mut Vm) -> Result<Value> {
    match &*a.target {
        Expr::Var(v) => {
            let val = a.val.eval(vm)?;
            v.var.set(val).map_err(thrown)
        }
        Expr::InstanceField(f) => {
            let target = f.target.eval(vm)?;
            let val = a.val.eval(vm)?;
            match (&target, &f.field) {
                (Value::Object(o), Some(field)) if field.mutable => {
                    if let FieldSlot::Instance(i) = field.slot {
                        o.fields.borrow_mut()[i] = val.clone();
                    }
                    Ok(val)
                }
                _ => Err(thrown(crate::runtime::rt::illegal_argument(format!("No matching field found: {}", f.name)))),
            }
        }
        _ => Err(ErrorKind::internal("Can't eval locals").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn if_expr(then: Expr, otherwise: Expr) -> Expr {
        Expr::If(IfExpr { test: Box::new(Expr::Bool(true)), then: Box::new(then), otherwise: Box::new(otherwise), line: 0 })
    }

    #[test]
    fn numbers_are_primitive() {
        let e = Expr::Number(Value::Long(3));
        assert!(e.can_emit_primitive());
        assert_eq!(e.prim_type().map(|c| c.name.clone()), Some("long".to_string()));
        assert_eq!(Expr::Number(Value::Double(1.5)).prim_type().map(|c| c.name.clone()), Some("double".to_string()));
    }

    #[test]
    fn if_agrees_on_a_type_or_has_none() {
        let same = if_expr(Expr::Number(Value::Long(1)), Expr::Number(Value::Long(2)));
        assert!(same.can_emit_primitive());
        let mixed = if_expr(Expr::Number(Value::Long(1)), Expr::Number(Value::Double(2.0)));
        assert!(mixed.java_class().is_none());
        assert!(!mixed.can_emit_primitive());
        let with_nil = if_expr(Expr::Str("a".into()), Expr::Nil);
        assert_eq!(with_nil.java_class().and_then(|t| t.class().map(|c| c.name.clone())), Some("java.lang.String".into()));
        let nil_and_prim = if_expr(Expr::Nil, Expr::Number(Value::Long(1)));
        assert!(nil_and_prim.java_class().is_none());
    }

    #[test]
    fn throw_is_ignored_when_agreeing_on_a_type() {
        let exprs = vec![Expr::Str("a".into()), Expr::Throw(Box::new(Expr::Nil)), Expr::Str("b".into())];
        assert_eq!(maybe_java_class(&exprs).map(|c| c.name.clone()), Some("java.lang.String".to_string()));
        let exprs = vec![Expr::Str("a".into()), Expr::Number(Value::Long(1))];
        assert!(maybe_java_class(&exprs).is_none());
    }

    #[test]
    fn literals_and_collections_evaluate() {
        let mut vm = Vm::new();
        let v = Expr::Vector(vec![Expr::Number(Value::Long(1)), Expr::Keyword(Rc::new(Keyword::intern("a")))]);
        assert_eq!(v.eval(&mut vm).unwrap().to_string(), "[1 :a]");
        let cond = if_expr(Expr::Str("yes".into()), Expr::Nil);
        assert_eq!(cond.eval(&mut vm).unwrap().to_str(), "yes");
    }
}
