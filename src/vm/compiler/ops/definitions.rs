use std::rc::Rc;

use crate::error::{malformed, ErrorKind, Result};
use crate::value::{map_assoc, map_get_kw, map_without, Value};
use crate::vm::compiler::expr::{AssignExpr, DefExpr, Expr};
use crate::vm::compiler::{Compiler, Context};

use super::collections::parse_map;

pub fn parse_def(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let mut items = form.list_items().unwrap_or(&[]).to_vec();
    let mut docstring = None;
    if items.len() == 4 {
        if let Value::Str(doc) = &items[2] {
            docstring = Some(doc.clone());
            items.remove(2);
        }
    }
    if items.len() > 3 {
        return malformed("Too many arguments to def");
    }
    if items.len() < 2 {
        return malformed("Too few arguments to def");
    }
    let Some(sym) = items[1].as_symbol() else {
        return malformed("First argument to def must be a Symbol");
    };

    let namespaces = compiler.vm.namespaces();
    let Some(mut var) = namespaces.lookup_var(sym, true)? else {
        return Err(ErrorKind::unresolved("Can't refer to qualified var that doesn't exist").into());
    };
    let current = namespaces.current();
    if *var.ns != *current.name {
        if sym.ns.is_some() {
            return malformed("Can't create defs outside of current ns");
        }
        var = current.intern(&sym.name);
    }

    let sym_meta = sym.meta.clone();
    let is_dynamic = sym_meta.as_ref().and_then(|m| map_get_kw(m, "dynamic")).map_or(false, |v| v.is_truthy());
    if is_dynamic {
        var.set_dynamic(true);
    } else if sym.name.len() > 2 && sym.name.starts_with('*') && sym.name.ends_with('*') {
        log::warn!(
            "Warning: {0} not declared dynamic and thus is not dynamically rebindable, but its name suggests otherwise. \
             Please either indicate ^:dynamic {0} or change the name. ({1}:{2})",
            sym.name,
            compiler.source(),
            compiler.ctx.line
        );
    }
    if let Some(arglists) = sym_meta.as_ref().and_then(|m| map_get_kw(m, "arglists")) {
        // written as (quote ([x] ...))
        let sigs = arglists.list_items().and_then(|l| l.get(1).cloned()).unwrap_or(arglists);
        var.alter_meta("arglists", sigs);
    }

    let meta = var_meta(compiler, sym_meta, docstring)?;
    let sub_ctx = if ctx == Context::Eval { ctx } else { Context::Expression };
    let meta = match meta {
        Some(m) => Some(Box::new(parse_map(compiler, sub_ctx, &m)?)),
        None => None,
    };
    let init = match items.get(2) {
        Some(f) => Some(Box::new(compiler.analyze_named(sub_ctx, f, Some(&sym.name))?)),
        None => None,
    };
    Ok(Expr::Def(DefExpr { var, init, meta, is_dynamic }))
}

fn var_meta(compiler: &Compiler, sym_meta: Option<Value>, docstring: Option<Rc<str>>) -> Result<Option<Value>> {
    let mut mm = sym_meta.unwrap_or_else(|| Value::map(vec![]));
    mm = map_assoc(Some(&mm), Value::kw("line"), Value::Long(compiler.ctx.line as i64));
    mm = map_assoc(Some(&mm), Value::kw("column"), Value::Long(compiler.ctx.column as i64));
    mm = map_assoc(Some(&mm), Value::kw("file"), Value::Str(compiler.source().into()));
    if let Some(doc) = docstring {
        mm = map_assoc(Some(&mm), Value::kw("doc"), Value::Str(doc));
    }
    if let Some(tag @ Value::Symbol(_)) = map_get_kw(&mm, "tag") {
        mm = map_assoc(Some(&mm), Value::kw("tag"), Value::list(vec![Value::sym("quote"), tag]));
    }
    for key in &compiler.options.elide_meta {
        mm = map_without(&mm, &Value::Keyword(Rc::new(key.clone())));
    }
    Ok(match mm.count() {
        Some(0) | None => None,
        _ => Some(mm),
    })
}

pub fn parse_the_var(compiler: &mut Compiler, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    let Some(sym) = items.get(1).and_then(Value::as_symbol) else {
        return malformed(format!("Malformed var form: {}", form));
    };
    match compiler.vm.namespaces().lookup_var(sym, false)? {
        Some(var) => Ok(Expr::TheVar(var)),
        None => Err(ErrorKind::unresolved(format!("Unable to resolve var: {} in this context", sym)).into()),
    }
}

pub fn parse_import(_compiler: &mut Compiler, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    match items.get(1) {
        Some(Value::Str(name)) => Ok(Expr::Import(name.to_string())),
        Some(Value::Symbol(sym)) => Ok(Expr::Import(sym.to_string())),
        _ => malformed(format!("Malformed import form: {}", form)),
    }
}

pub fn parse_assign(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    if items.len() != 3 {
        return malformed("Malformed assignment, expecting (set! target val)");
    }
    let sub_ctx = if ctx == Context::Eval { ctx } else { Context::Expression };
    let target = compiler.analyze(sub_ctx, &items[1])?;
    match &target {
        Expr::Var(_) | Expr::InstanceField(_) => {}
        Expr::Local(l) => {
            let lb = &l.binding;
            let own_field = compiler
                .scopes
                .current_obj()
                .map_or(false, |obj| obj.is_deftype && obj.closes.contains_key(&lb.id));
            if !(lb.mutable && own_field) {
                return malformed(format!("Cannot assign to non-mutable: {}", lb.name));
            }
        }
        Expr::StaticField(f) => {
            return malformed(format!("Cannot assign to static field: {} in class {}", f.field.name, f.class.name));
        }
        _ => return malformed("Invalid assignment target"),
    }
    let val = compiler.analyze(sub_ctx, &items[2])?;
    Ok(Expr::Assign(AssignExpr { target: Box::new(target), val: Box::new(val) }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::parser::read_one;
    use crate::value::Keyword;
    use crate::vm::vm::Vm;

    fn analyze_in(vm: &mut Vm, options: CompilerOptions, src: &str) -> Result<Expr> {
        let mut c = Compiler::new(vm, options, "defs.clj");
        c.analyze(Context::Eval, &read_one(src).unwrap())
    }

    fn run(vm: &mut Vm, src: &str) -> Result<Value> {
        analyze_in(vm, CompilerOptions::new(), src)?.eval(vm)
    }

    #[test]
    fn def_binds_the_root_and_returns_the_var() {
        let mut vm = Vm::new();
        let v = run(&mut vm, "(def answer 42)").unwrap();
        let Value::Var(var) = v else { panic!("expected a var") };
        assert_eq!(var.qualified_name(), "user/answer");
        assert!(matches!(var.deref().unwrap(), Value::Long(42)));
    }

    #[test]
    fn def_checks_its_shape() {
        let mut vm = Vm::new();
        let err = run(&mut vm, "(def a 1 2)").err().unwrap();
        assert!(err.to_string().starts_with("Too many arguments to def"));
        let err = run(&mut vm, "(def)").err().unwrap();
        assert!(err.to_string().starts_with("Too few arguments to def"));
        let err = run(&mut vm, "(def \"a\" 1)").err().unwrap();
        assert!(err.to_string().starts_with("First argument to def must be a Symbol"));
        let err = run(&mut vm, "(def clojure.core/str 1)").err().unwrap();
        assert!(err.to_string().starts_with("Can't create defs outside of current ns"));
    }

    #[test]
    fn docstring_and_position_land_in_the_var_meta() {
        let mut vm = Vm::new();
        let Value::Var(var) = run(&mut vm, "(def documented \"Says hi.\" 1)").unwrap() else {
            panic!("expected a var")
        };
        assert_eq!(var.meta_value("doc").unwrap().to_str(), "Says hi.");
        assert_eq!(var.meta_value("file").unwrap().to_str(), "defs.clj");
        assert!(var.meta_value("line").is_some());
    }

    #[test]
    fn elided_meta_is_dropped() {
        let mut vm = Vm::new();
        let options = CompilerOptions::new().elide_meta(vec![Keyword::intern("doc")]);
        let e = analyze_in(&mut vm, options, "(def quiet \"gone\" 1)").unwrap();
        let Value::Var(var) = e.eval(&mut vm).unwrap() else { panic!("expected a var") };
        assert!(var.meta_value("doc").is_none());
    }

    #[test]
    fn tag_symbols_stay_symbols() {
        let mut vm = Vm::new();
        let Value::Var(var) = run(&mut vm, "(def ^String greeting \"hi\")").unwrap() else {
            panic!("expected a var")
        };
        assert!(matches!(var.meta_value("tag"), Some(Value::Symbol(s)) if &*s.name == "String"));
    }

    #[test]
    fn dynamic_flag_is_applied() {
        let mut vm = Vm::new();
        let Value::Var(var) = run(&mut vm, "(def ^:dynamic *depth* 0)").unwrap() else {
            panic!("expected a var")
        };
        assert!(var.is_dynamic());
        let Value::Var(var) = run(&mut vm, "(def *loud* 0)").unwrap() else { panic!("expected a var") };
        assert!(!var.is_dynamic());
    }

    #[test]
    fn the_var_needs_an_existing_var() {
        let mut vm = Vm::new();
        assert!(matches!(analyze_in(&mut vm, CompilerOptions::new(), "(var clojure.core/str)").unwrap(), Expr::TheVar(_)));
        let err = analyze_in(&mut vm, CompilerOptions::new(), "(var nope)").err().unwrap();
        assert!(err.to_string().starts_with("Unable to resolve var: nope in this context"));
    }

    #[test]
    fn set_needs_an_assignable_target() {
        let mut vm = Vm::new();
        let err = run(&mut vm, "(set! 1 2)").err().unwrap();
        assert!(err.to_string().starts_with("Invalid assignment target"));
        let err = run(&mut vm, "(set! x)").err().unwrap();
        assert!(err.to_string().starts_with("Malformed assignment, expecting (set! target val)"));
        let err = analyze_in(&mut vm, CompilerOptions::new(), "(let* [x 1] (set! x 2))").err().unwrap();
        assert!(err.to_string().starts_with("Cannot assign to non-mutable: x"));
    }

    #[test]
    fn set_assigns_dynamic_vars_only() {
        let mut vm = Vm::new();
        run(&mut vm, "(def ^:dynamic *level* 1)").unwrap();
        assert!(matches!(run(&mut vm, "(set! *level* 2)").unwrap(), Value::Long(2)));
        run(&mut vm, "(def fixed 1)").unwrap();
        assert!(matches!(run(&mut vm, "(set! fixed 2)").err().unwrap().kind(), ErrorKind::Thrown(_)));
    }
}
