use std::cell::Cell;
use std::rc::Rc;

use crate::error::{CompilerError, ErrorKind, Result};
use crate::instructions::SpecialForm;
use crate::options::CompilerOptions;
use crate::runtime::host::{host, Class};
use crate::runtime::namespace::Var;
use crate::runtime::rt;
use crate::value::{identical, map_assoc, map_get_kw, map_without, Symbol, Value};
use crate::vm::loader;
use crate::vm::vm::Vm;

use super::expr::*;
use super::ops;
use super::path::PathNode;
use super::reflector;
use super::scope_manager::{LocalBinding, LocalTypes, ScopeManager};

/// Where an expression's value goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Context {
    Statement,
    Expression,
    Return,
    Eval,
}

/// Dynamic analysis state, rebound by special forms for the extent of their subforms.
#[derive(Clone, Default)]
pub(super) struct AnalysisContext {
    pub line: u32,
    pub column: u32,
    pub clear_path: Option<Rc<PathNode>>,
    pub clear_root: Option<Rc<PathNode>>,
    /// The locals a `recur` in tail position rebinds.
    pub loop_locals: Option<Rc<Vec<Rc<LocalBinding>>>>,
    pub in_catch_finally: bool,
    /// Set inside `try` bodies, where a `recur` would jump out of the protected region.
    pub no_recur: bool,
    /// The placeholder class a type's own name resolves to while its methods are analyzed.
    pub compile_stub: Option<(Symbol, Rc<Class>)>,
}

pub struct Compiler<'a> {
    pub(super) vm: &'a mut Vm,
    pub(super) options: CompilerOptions,
    pub(super) scopes: ScopeManager,
    pub(super) ctx: AnalysisContext,
    source: Rc<str>,
}

pub(super) fn thrown(e: Value) -> CompilerError {
    ErrorKind::Thrown(e).into()
}

pub(super) fn form_position(form: &Value) -> Option<(u32, u32)> {
    let line = match form.meta_get("line") {
        Some(Value::Long(l)) if l > 0 => l as u32,
        _ => return None,
    };
    let column = match form.meta_get("column") {
        Some(Value::Long(c)) => c.max(0) as u32,
        _ => 0,
    };
    Some((line, column))
}

pub(super) fn tag_of(form: &Value) -> Option<Symbol> {
    match form.meta_get("tag")? {
        Value::Symbol(s) => Some(s.with_meta(None)),
        Value::Str(s) => Some(Symbol::simple(&s)),
        Value::Class(c) => Some(Symbol::simple(&c.name)),
        _ => None,
    }
}

pub(super) fn preserve_tag(src: &Value, dst: Value) -> Value {
    let Some(tag) = tag_of(src) else { return dst };
    match dst {
        Value::Symbol(_) | Value::List(_) | Value::Vector(_) | Value::Map(_) | Value::Set(_) => {
            let meta = map_assoc(dst.meta(), Value::kw("tag"), Value::from(tag));
            dst.with_meta(Some(meta))
        }
        other => other,
    }
}

/// Metadata without the reader's position keys; `None` when nothing else is left.
pub(super) fn strip_position(meta: Option<&Value>) -> Option<Value> {
    let meta = meta?;
    let mut m = meta.clone();
    for key in ["line", "column", "file"] {
        m = map_without(&m, &Value::kw(key));
    }
    match m.count() {
        Some(0) | None => None,
        _ => Some(m),
    }
}

/// `((fn* ^{:once true} [] form))`: runs `form` as the body of a one-shot function.
pub(super) fn once_fn_call(form: &Value) -> Value {
    let fn_sym = Value::sym("fn*").with_meta(Some(Value::map(vec![(Value::kw("once"), Value::Bool(true))])));
    let f = Value::list(vec![fn_sym, Value::vector(vec![]), form.clone()]);
    Value::list(vec![f])
}

fn special_form(op: &Value) -> Option<SpecialForm> {
    op.as_symbol().and_then(SpecialForm::from_symbol)
}

pub(super) fn is_special(op: &Value) -> bool {
    special_form(op).is_some()
}

impl<'a> Compiler<'a> {
    pub fn new(vm: &'a mut Vm, options: CompilerOptions, source: &str) -> Compiler<'a> {
        Compiler { vm, options, scopes: ScopeManager::new(), ctx: AnalysisContext::default(), source: source.into() }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// Runs `f` and restores the lexical environment and the analysis state afterwards.
    pub(super) fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let scope = self.scopes.save();
        let ctx = self.ctx.clone();
        let out = f(self);
        self.scopes.restore(scope);
        self.ctx = ctx;
        out
    }

    /// Like `scoped`, but only the analysis state is restored; locals registered by `f` stay.
    pub(super) fn with_ctx<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let ctx = self.ctx.clone();
        let out = f(self);
        self.ctx = ctx;
        out
    }

    pub fn analyze(&mut self, ctx: Context, form: &Value) -> Result<Expr> {
        self.analyze_named(ctx, form, None)
    }

    /// Analyzes `form`; `name` names the function when `form` turns out to be an `fn*`.
    pub fn analyze_named(&mut self, ctx: Context, form: &Value, name: Option<&str>) -> Result<Expr> {
        let (line, column) = (self.ctx.line, self.ctx.column);
        self.analyze_form(ctx, form, name).map_err(|e| e.at(&self.source, line, column))
    }

    fn analyze_form(&mut self, ctx: Context, form: &Value, name: Option<&str>) -> Result<Expr> {
        match form {
            Value::Nil => Ok(Expr::Nil),
            Value::Bool(b) => Ok(Expr::Bool(*b)),
            Value::Symbol(sym) => self.analyze_symbol(sym),
            Value::Keyword(k) => Ok(Expr::Keyword(k.clone())),
            Value::Long(_) | Value::Double(_) => Ok(Expr::Number(form.clone())),
            Value::Str(s) => Ok(Expr::Str(s.clone())),
            Value::List(_) | Value::Vector(_) | Value::Map(_) | Value::Set(_) if form.count() == Some(0) => {
                let empty = Expr::Empty(form.with_meta(None));
                match strip_position(form.meta()) {
                    None => Ok(empty),
                    Some(meta) => {
                        let meta = ops::collections::parse_map(self, Context::Expression, &meta)?;
                        Ok(Expr::Meta(MetaExpr { expr: Box::new(empty), meta: Box::new(meta) }))
                    }
                }
            }
            Value::List(_) => self.analyze_seq(ctx, form, name),
            Value::Vector(_) => ops::collections::parse_vector(self, ctx, form),
            Value::Map(_) => ops::collections::parse_map(self, ctx, form),
            Value::Set(_) => ops::collections::parse_set(self, ctx, form),
            other => Ok(Expr::Constant(other.clone())),
        }
    }

    fn analyze_seq(&mut self, ctx: Context, form: &Value, name: Option<&str>) -> Result<Expr> {
        let saved = (self.ctx.line, self.ctx.column);
        let (line, column) = form_position(form).unwrap_or(saved);
        self.ctx.line = line;
        self.ctx.column = column;
        let out = self.analyze_seq_at(ctx, form, name).map_err(|e| e.at(&self.source, line, column));
        self.ctx.line = saved.0;
        self.ctx.column = saved.1;
        out
    }

    fn analyze_seq_at(&mut self, ctx: Context, form: &Value, name: Option<&str>) -> Result<Expr> {
        if let Some(expanded) = self.macroexpand1(form)? {
            if !identical(&expanded, form) {
                return self.analyze_named(ctx, &expanded, name);
            }
        }
        let items = form.list_items().unwrap_or(&[]);
        let Some(op) = items.first() else {
            return Ok(Expr::Empty(form.with_meta(None)));
        };
        if op.is_nil() {
            return Err(ErrorKind::malformed(format!("nil is not allowed as the first element for seq -> {}", form)).into());
        }
        if let Some(inline) = self.inline_fn(op, items.len() - 1)? {
            let expanded = self.vm.invoke(&inline, &items[1..]).map_err(thrown)?;
            return self.analyze_named(ctx, &preserve_tag(form, expanded), name);
        }
        match special_form(op) {
            Some(SpecialForm::Fn) => ops::functions::parse_fn(self, ctx, form, name),
            Some(SpecialForm::Def) => ops::definitions::parse_def(self, ctx, form),
            Some(SpecialForm::Let) => ops::bindings::parse_let(self, ctx, form, false),
            Some(SpecialForm::Loop) => ops::bindings::parse_let(self, ctx, form, true),
            Some(SpecialForm::Recur) => ops::bindings::parse_recur(self, ctx, form),
            Some(SpecialForm::LetFn) => ops::bindings::parse_letfn(self, ctx, form),
            Some(SpecialForm::If) => ops::control::parse_if(self, ctx, form),
            Some(SpecialForm::Do) => ops::control::parse_do(self, ctx, form),
            Some(SpecialForm::Case) => ops::control::parse_case(self, ctx, form),
            Some(SpecialForm::Quote) => ops::control::parse_quote(form),
            Some(SpecialForm::TheVar) => ops::definitions::parse_the_var(self, form),
            Some(SpecialForm::Import) => ops::definitions::parse_import(self, form),
            Some(SpecialForm::Assign) => ops::definitions::parse_assign(self, ctx, form),
            Some(SpecialForm::Dot) => ops::interop::parse_dot(self, ctx, form),
            Some(SpecialForm::New) => ops::interop::parse_new(self, ctx, form),
            Some(SpecialForm::Deftype) => ops::types::parse_deftype(self, ctx, form),
            Some(SpecialForm::Reify) => ops::types::parse_reify(self, ctx, form),
            Some(SpecialForm::Try) => ops::exceptions::parse_try(self, ctx, form),
            Some(SpecialForm::Throw) => ops::exceptions::parse_throw(self, ctx, form),
            Some(SpecialForm::MonitorEnter) => ops::exceptions::parse_monitor(self, form, true),
            Some(SpecialForm::MonitorExit) => ops::exceptions::parse_monitor(self, form, false),
            Some(SpecialForm::Catch | SpecialForm::Finally | SpecialForm::Amp) | None => {
                ops::functions::parse_invoke(self, ctx, form)
            }
        }
    }

    /// One step of macroexpansion. `None` when the form is not a macro call or member sugar.
    pub fn macroexpand1(&mut self, form: &Value) -> Result<Option<Value>> {
        let Value::List(coll) = form else { return Ok(None) };
        let Some(op) = coll.items.first() else { return Ok(None) };
        if is_special(op) {
            return Ok(None);
        }
        if let Some(mac) = self.macro_var(op)? {
            let mut args = Vec::with_capacity(coll.items.len() + 1);
            args.push(form.clone());
            args.push(self.local_env_value());
            args.extend(coll.items[1..].iter().cloned());
            log::trace!("expanding macro {}", mac.qualified_name());
            return match self.vm.invoke(&Value::Var(mac), &args) {
                Ok(expanded) => Ok(Some(expanded)),
                Err(e) => Err(thrown(match rt::arity_exception_parts(&e) {
                    // the macro's own form and env are not the caller's arguments
                    Some((actual, name)) => rt::arity_exception(actual.saturating_sub(2), &name),
                    None => e,
                })),
            };
        }
        let Value::Symbol(sym) = op else { return Ok(None) };
        let sname: &str = &sym.name;
        if sym.ns.is_none() && sname.len() > 1 && sname.starts_with('.') {
            if coll.items.len() < 2 {
                return Err(
                    ErrorKind::malformed("Malformed member expression, expecting (.member target ...)").into()
                );
            }
            let member = Value::sym(&sname[1..]);
            let mut target = coll.items[1].clone();
            if self.maybe_class(&target).is_some() {
                let tag = Value::map(vec![(Value::kw("tag"), Value::sym("java.lang.Class"))]);
                target = Value::list(vec![Value::sym("clojure.core/identity"), target]).with_meta(Some(tag));
            }
            let mut out = vec![Value::sym("."), target, member];
            out.extend(coll.items[2..].iter().cloned());
            return Ok(Some(preserve_tag(form, Value::list(out))));
        }
        if let Some(ns) = &sym.ns {
            if self.vm.namespaces().namespace_for(sym).is_none() {
                let target = Value::sym(ns);
                if self.maybe_class(&target).is_some() {
                    let mut out = vec![Value::sym("."), target, Value::sym(sname)];
                    out.extend(coll.items[1..].iter().cloned());
                    return Ok(Some(preserve_tag(form, Value::list(out))));
                }
            }
            return Ok(None);
        }
        if sname.len() > 1 && sname.ends_with('.') {
            let mut out = vec![Value::sym("new"), Value::sym(&sname[..sname.len() - 1])];
            out.extend(coll.items[1..].iter().cloned());
            return Ok(Some(Value::list(out)));
        }
        Ok(None)
    }

    /// `&env` for macros: every visible local, keyed by its symbol.
    fn local_env_value(&self) -> Value {
        let locals = self.scopes.local_symbols();
        if locals.is_empty() {
            return Value::Nil;
        }
        Value::map(locals.into_iter().map(|s| (Value::from(s), Value::Nil)).collect())
    }

    /// The macro var `op` names. Locals shadow macros.
    pub(super) fn macro_var(&self, op: &Value) -> Result<Option<Rc<Var>>> {
        let var = match op {
            Value::Var(v) => v.clone(),
            Value::Symbol(sym) => {
                if self.scopes.find_local(sym).is_some() {
                    return Ok(None);
                }
                match self.vm.namespaces().lookup_var(sym, false)? {
                    Some(v) => v,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
        if !var.is_macro() {
            return Ok(None);
        }
        self.vm.namespaces().check_accessible(&var)?;
        Ok(Some(var))
    }

    fn inline_fn(&mut self, op: &Value, arity: usize) -> Result<Option<Value>> {
        let var = match op {
            Value::Var(v) => v.clone(),
            Value::Symbol(sym) => {
                if self.scopes.find_local(sym).is_some() {
                    return Ok(None);
                }
                match self.vm.namespaces().lookup_var(sym, false)? {
                    Some(v) => v,
                    None => return Ok(None),
                }
            }
            _ => return Ok(None),
        };
        let Some(inline) = var.meta_value("inline") else { return Ok(None) };
        self.vm.namespaces().check_accessible(&var)?;
        if let Some(pred) = var.meta_value("inline-arities") {
            let accepts = self.vm.invoke(&pred, &[Value::Long(arity as i64)]).map_err(thrown)?;
            if !accepts.is_truthy() {
                return Ok(None);
            }
        }
        Ok(Some(inline))
    }

    fn analyze_symbol(&mut self, sym: &Symbol) -> Result<Expr> {
        let tag = tag_of(&Value::from(sym.clone()));
        match &sym.ns {
            None => {
                if let Some(binding) = self.scopes.reference_local(sym, self.ctx.in_catch_finally) {
                    return Ok(Expr::Local(self.local_expr(binding, tag.as_ref())?));
                }
            }
            Some(ns) => {
                if self.vm.namespaces().namespace_for(sym).is_none() {
                    if let Some(class) = self.maybe_class(&Value::sym(ns)) {
                        let Some(field) = class.field(&sym.name, true) else {
                            return Err(ErrorKind::unresolved(format!(
                                "Unable to find static field: {} in class {}",
                                sym.name, class.name
                            ))
                            .into());
                        };
                        let tag_class = tag.as_ref().map(|t| self.tag_to_class(t)).transpose()?;
                        return Ok(Expr::StaticField(StaticFieldExpr { class, field, tag_class, line: self.ctx.line }));
                    }
                }
            }
        }
        match self.resolve(sym)? {
            Value::Var(var) => {
                if var.is_macro() {
                    return Err(
                        ErrorKind::malformed(format!("Can't take value of a macro: #'{}", var.qualified_name())).into()
                    );
                }
                if var.is_const() {
                    let value = var.deref().map_err(thrown)?;
                    return ops::control::parse_quote(&Value::list(vec![Value::sym("quote"), value]));
                }
                let tag = tag.or_else(|| var.meta_value("tag").and_then(|t| tag_of_value(&t)));
                let tag_class = tag.as_ref().and_then(|t| self.tag_to_class(t).ok());
                Ok(Expr::Var(VarExpr { var, tag_class }))
            }
            Value::Class(c) => Ok(Expr::Constant(Value::Class(c))),
            Value::Symbol(s) => Ok(Expr::UnresolvedVar((*s).clone())),
            _ => Err(ErrorKind::unresolved(format!("Unable to resolve symbol: {} in this context", sym)).into()),
        }
    }

    /// What a non-local symbol names in the current namespace: a var, a class, or (when unresolved
    /// symbols are allowed) the symbol itself.
    pub(super) fn resolve(&self, sym: &Symbol) -> Result<Value> {
        let namespaces = self.vm.namespaces();
        if let Some(ns_name) = &sym.ns {
            let Some(ns) = namespaces.namespace_for(sym) else {
                return Err(ErrorKind::unresolved(format!("No such namespace: {}", ns_name)).into());
            };
            let Some(var) = ns.find_interned_var(&sym.name) else {
                return Err(ErrorKind::unresolved(format!("No such var: {}", sym)).into());
            };
            namespaces.check_accessible(&var)?;
            return Ok(Value::Var(var));
        }
        if let Some(stub) = self.compile_stub_for(sym) {
            return Ok(Value::Class(stub));
        }
        if sym.name.find('.').map_or(false, |i| i > 0) || sym.name.starts_with('[') {
            return match host().get(&sym.name) {
                Some(c) => Ok(Value::Class(c)),
                None => Err(ErrorKind::unresolved(format!("java.lang.ClassNotFoundException: {}", sym.name)).into()),
            };
        }
        match namespaces.current().get_mapping(&sym.name) {
            Some(v) => Ok(v),
            None if self.options.allow_unresolved => Ok(Value::from(sym.clone())),
            None => Err(ErrorKind::unresolved(format!("Unable to resolve symbol: {} in this context", sym)).into()),
        }
    }

    /// The class a form names, if it names one. Locals shadow imported class names.
    pub(super) fn maybe_class(&self, form: &Value) -> Option<Rc<Class>> {
        let sym = match form {
            Value::Class(c) => return Some(c.clone()),
            Value::Symbol(s) => s,
            Value::Str(s) => return host().get(s).filter(|c| !c.is_primitive()),
            _ => return None,
        };
        if sym.ns.is_some() {
            return None;
        }
        if let Some(stub) = self.compile_stub_for(sym) {
            return Some(stub);
        }
        if sym.name.find('.').map_or(false, |i| i > 0) || sym.name.starts_with('[') {
            return host().get(&sym.name).filter(|c| !c.is_primitive());
        }
        match self.vm.namespaces().current().get_mapping(&sym.name) {
            Some(Value::Class(c)) => Some(c),
            _ if self.scopes.find_local(sym).is_some() => None,
            _ => host().get(&sym.name).filter(|c| !c.is_primitive()),
        }
    }

    /// The stub standing in for the type being compiled, by its short or its full class name.
    fn compile_stub_for(&self, sym: &Symbol) -> Option<Rc<Class>> {
        let (stub_sym, stub) = self.ctx.compile_stub.as_ref()?;
        if stub_sym == sym || stub.name == loader::stub_name(&sym.name) {
            return Some(stub.clone());
        }
        None
    }

    /// The class a type hint names. Primitive names are accepted.
    pub(super) fn tag_to_class(&self, tag: &Symbol) -> Result<Rc<Class>> {
        if tag.ns.is_none() {
            if let Some(p) = reflector::prim_class(&tag.name) {
                return Ok(p);
            }
            if &*tag.name == "objects" {
                if let Some(c) = host().get("[Ljava.lang.Object;") {
                    return Ok(c);
                }
            }
        }
        self.maybe_class(&Value::from(tag.clone()))
            .ok_or_else(|| ErrorKind::unresolved(format!("Unable to resolve classname: {}", tag)).into())
    }

    pub(super) fn tag_class(&self, tag: Option<&Symbol>) -> Result<Rc<Class>> {
        match tag {
            None => Ok(host().object()),
            Some(t) => self.tag_to_class(t),
        }
    }

    pub(super) fn local_types(&self, tag: Option<&Symbol>, init: Option<&Expr>) -> Result<LocalTypes> {
        let prim = init.and_then(Expr::prim_type);
        let java_class = match tag {
            Some(t) => Some(self.tag_to_class(t)?),
            None => match init.and_then(Expr::java_class) {
                Some(StaticType::Class(c)) if !c.is_primitive() || prim.is_some() => Some(c),
                _ => None,
            },
        };
        Ok(LocalTypes { java_class, prim })
    }

    pub(super) fn register_local(
        &mut self,
        sym: &Symbol,
        tag: Option<Symbol>,
        init: Option<&Expr>,
        is_arg: bool,
    ) -> Result<Rc<LocalBinding>> {
        let types = self.local_types(tag.as_ref(), init)?;
        let root = self.ctx.clear_root.clone();
        Ok(self.scopes.register_local(sym, tag, types, is_arg, root))
    }

    pub(super) fn register_param(&mut self, sym: &Symbol, class: &Rc<Class>) -> Rc<LocalBinding> {
        let types = LocalTypes {
            java_class: Some(class.clone()).filter(|c| c.name != host().object().name),
            prim: Some(class.clone()).filter(|c| c.is_primitive()),
        };
        let root = self.ctx.clear_root.clone();
        self.scopes.register_local(sym, None, types, true, root)
    }

    pub(super) fn local_expr(&mut self, binding: Rc<LocalBinding>, tag: Option<&Symbol>) -> Result<LocalBindingExpr> {
        if binding.prim.is_some() && tag.is_some() {
            return Err(ErrorKind::malformed("Can't type hint a primitive local").into());
        }
        let tag_class = tag.map(|t| self.tag_to_class(t)).transpose()?;
        let should_clear = Rc::new(Cell::new(false));
        let path = self.ctx.clear_path.clone();
        let root = self.ctx.clear_root.clone();
        self.scopes.record_clear_site(&binding, path.as_ref(), root.as_ref(), &should_clear);
        Ok(LocalBindingExpr { binding, tag_class, should_clear })
    }

    pub(super) fn analyze_in_fn(&mut self, ctx: Context, form: &Value) -> Result<Expr> {
        self.analyze(ctx, &once_fn_call(form))
    }

    pub(super) fn path_node(&self) -> Rc<PathNode> {
        PathNode::path(self.ctx.clear_path.clone())
    }

    pub(super) fn branch_node(&self) -> Rc<PathNode> {
        PathNode::branch(self.ctx.clear_path.clone())
    }

    pub(super) fn warn_reflection(&self, msg: &str) {
        reflector::warn_reflection(self.options.warn_on_reflection, &self.source, self.ctx.line, self.ctx.column, msg);
    }

    pub(super) fn current_ns_name(&self) -> Rc<str> {
        self.vm.namespaces().current().name.clone()
    }
}

/// A hint stored as metadata value rather than on a form.
pub(super) fn tag_of_value(tag: &Value) -> Option<Symbol> {
    match tag {
        Value::Symbol(s) => Some(s.with_meta(None)),
        Value::Str(s) => Some(Symbol::simple(s)),
        Value::Class(c) => Some(Symbol::simple(&c.name)),
        _ => None,
    }
}

/// The keyword-keyed entry of a form's metadata, through `map_get_kw`.
pub(super) fn meta_flag(form: &Value, key: &str) -> bool {
    form.meta().and_then(|m| map_get_kw(m, key)).map_or(false, |v| v.is_truthy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_one;

    fn analyze(src: &str) -> Result<Expr> {
        let mut vm = Vm::new();
        let form = read_one(src).unwrap();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new(), "test.clj");
        c.analyze(Context::Eval, &form)
    }

    #[test]
    fn literals_analyze_to_their_own_nodes() {
        assert!(matches!(analyze("nil").unwrap(), Expr::Nil));
        assert!(matches!(analyze("42").unwrap(), Expr::Number(Value::Long(42))));
        assert!(matches!(analyze(":k").unwrap(), Expr::Keyword(_)));
        assert!(matches!(analyze("\"s\"").unwrap(), Expr::Str(_)));
        assert!(matches!(analyze("[]").unwrap(), Expr::Empty(_)));
        assert!(matches!(analyze("\\a").unwrap(), Expr::Constant(Value::Char('a'))));
    }

    #[test]
    fn member_sugar_expands_to_dot() {
        let mut vm = Vm::new();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new(), "test.clj");
        let out = c.macroexpand1(&read_one("(.toUpperCase s)").unwrap()).unwrap().unwrap();
        assert_eq!(out.to_string(), "(. s toUpperCase)");
        let out = c.macroexpand1(&read_one("(Math/abs -1)").unwrap()).unwrap().unwrap();
        assert_eq!(out.to_string(), "(. Math abs -1)");
        let out = c.macroexpand1(&read_one("(StringBuilder. \"a\")").unwrap()).unwrap().unwrap();
        assert_eq!(out.to_string(), "(new StringBuilder \"a\")");
        assert!(c.macroexpand1(&read_one("(if a b)").unwrap()).unwrap().is_none());
    }

    #[test]
    fn member_sugar_needs_a_target() {
        let mut vm = Vm::new();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new(), "test.clj");
        let err = c.macroexpand1(&read_one("(.foo)").unwrap()).unwrap_err();
        assert!(err.to_string().contains("Malformed member expression"));
    }

    #[test]
    fn unresolved_symbols_are_positioned() {
        let err = analyze("(do\n  (nope 1))").err().unwrap();
        assert_eq!(err.to_string(), "Unable to resolve symbol: nope in this context, compiling:(test.clj:2:3)");
    }

    #[test]
    fn macros_have_no_value() {
        let err = analyze("when").err().unwrap();
        assert!(err.to_string().starts_with("Can't take value of a macro: #'clojure.core/when"));
    }

    #[test]
    fn allowed_unresolved_symbols_defer_lookup() {
        let mut vm = Vm::new();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new().allow_unresolved(true), "test.clj");
        let e = c.analyze(Context::Eval, &read_one("later").unwrap()).unwrap();
        assert!(matches!(e, Expr::UnresolvedVar(s) if &*s.name == "later"));
    }

    #[test]
    fn nil_cannot_be_called() {
        let err = analyze("(nil 1)").err().unwrap();
        assert!(err.to_string().contains("nil is not allowed as the first element for seq"));
    }
}
