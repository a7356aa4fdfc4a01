use crate::error::{malformed, ErrorKind, Result};
use crate::value::{Symbol, Value};
use crate::vm::compiler::expr::{CatchClause, Expr, TryExpr};
use crate::vm::compiler::{Compiler, Context};

use super::control::parse_body;

fn clause_head(form: &Value) -> Option<&str> {
    let head = form.list_items()?.first()?.as_symbol()?;
    match &*head.name {
        "catch" | "finally" if head.ns.is_none() => Some(&head.name),
        _ => None,
    }
}

pub fn parse_try(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    if ctx != Context::Return {
        return compiler.analyze_in_fn(ctx, form);
    }
    let items = form.list_items().unwrap_or(&[]);
    let ret_local = compiler.scopes.next_local_num();
    let finally_local = compiler.scopes.next_local_num();

    let mut body_forms = Vec::new();
    let mut catch_forms = Vec::new();
    let mut finally_form = None;
    let mut caught = false;
    for f in &items[1..] {
        match clause_head(f) {
            None if caught => return malformed("Only catch or finally clause can follow catch in try expression"),
            None => body_forms.push(f.clone()),
            Some("catch") => {
                caught = true;
                catch_forms.push(f);
            }
            Some(_) => {
                caught = true;
                if finally_form.is_some() {
                    return malformed("Only one finally clause allowed in try expression");
                }
                finally_form = Some(f);
            }
        }
    }

    let body = compiler.with_ctx(|c| {
        c.ctx.no_recur = true;
        parse_body(c, ctx, &body_forms)
    })?;
    let mut catches = Vec::with_capacity(catch_forms.len());
    for f in catch_forms {
        catches.push(compiler.scoped(|c| parse_catch(c, f))?);
    }
    let finally = match finally_form {
        Some(f) => {
            let cleanup = f.list_items().map_or(&[][..], |l| &l[1..]);
            let expr = compiler.with_ctx(|c| {
                c.ctx.in_catch_finally = true;
                parse_body(c, Context::Statement, cleanup)
            })?;
            Some(Box::new(expr))
        }
        None => None,
    };
    Ok(Expr::Try(TryExpr { body: Box::new(body), catches, finally, ret_local, finally_local }))
}

fn parse_catch(compiler: &mut Compiler, form: &Value) -> Result<CatchClause> {
    let items = form.list_items().unwrap_or(&[]);
    let class_form = items.get(1).unwrap_or(&Value::Nil);
    let Some(class) = compiler.maybe_class(class_form) else {
        return Err(ErrorKind::unresolved(format!("Unable to resolve classname: {}", class_form)).into());
    };
    let Some(sym) = items.get(2).and_then(Value::as_symbol) else {
        let got = items.get(2).unwrap_or(&Value::Nil);
        return malformed(format!("Bad binding form, expected symbol, got: {}", got));
    };
    if sym.ns.is_some() {
        return malformed(format!("Can't bind qualified name:{}", sym));
    }
    compiler.ctx.in_catch_finally = true;
    let binding = compiler.register_local(sym, Some(Symbol::simple(&class.name)), None, false)?;
    let handler = parse_body(compiler, Context::Expression, &items[3..])?;
    Ok(CatchClause { class, binding, handler })
}

pub fn parse_throw(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    if ctx == Context::Eval {
        return compiler.analyze_in_fn(ctx, form);
    }
    let items = form.list_items().unwrap_or(&[]);
    if items.len() > 2 {
        return malformed("Too many arguments to throw, throw expects a single Throwable instance");
    }
    let exc = compiler.analyze(Context::Expression, items.get(1).unwrap_or(&Value::Nil))?;
    Ok(Expr::Throw(Box::new(exc)))
}

pub fn parse_monitor(compiler: &mut Compiler, form: &Value, enter: bool) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    let target = Box::new(compiler.analyze(Context::Expression, items.get(1).unwrap_or(&Value::Nil))?);
    Ok(if enter { Expr::MonitorEnter(target) } else { Expr::MonitorExit(target) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::parser::read_one;
    use crate::vm::vm::Vm;

    fn analyze(ctx: Context, src: &str) -> Result<Expr> {
        let mut vm = Vm::new();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new(), "try.clj");
        c.analyze(ctx, &read_one(src).unwrap())
    }

    #[test]
    fn try_in_return_position_keeps_its_clauses() {
        let e = analyze(Context::Return, "(try 1 (catch Exception e e) (catch Throwable t 2) (finally 3))").unwrap();
        let Expr::Try(t) = e else { panic!("expected try") };
        assert_eq!(t.catches.len(), 2);
        assert_eq!(t.catches[0].class.name, "java.lang.Exception");
        assert_eq!(t.catches[0].binding.java_class.as_ref().unwrap().name, "java.lang.Exception");
        assert!(t.finally.is_some());
        assert_ne!(t.ret_local, t.finally_local);
    }

    #[test]
    fn try_elsewhere_runs_in_a_function() {
        let e = analyze(Context::Expression, "(try 1 (finally 2))").unwrap();
        assert!(matches!(e, Expr::Invoke(i) if matches!(*i.fexpr, Expr::Obj(_))));
    }

    #[test]
    fn clause_order_is_checked() {
        let err = analyze(Context::Return, "(try (catch Exception e 1) 2)").err().unwrap();
        assert!(err.to_string().starts_with("Only catch or finally clause can follow catch in try expression"));
        let err = analyze(Context::Return, "(try 1 (finally 2) (finally 3))").err().unwrap();
        assert!(err.to_string().starts_with("Only one finally clause allowed in try expression"));
        let err = analyze(Context::Return, "(try 1 (catch Nope e 1))").err().unwrap();
        assert!(err.to_string().starts_with("Unable to resolve classname: Nope"));
    }

    #[test]
    fn recur_cannot_cross_try() {
        let err = analyze(Context::Return, "(loop* [i 0] (try (recur 1)))").err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::IllegalControlTransfer(_)));
        assert!(err.to_string().starts_with("Cannot recur across try"));
    }

    #[test]
    fn throw_takes_one_argument() {
        let err = analyze(Context::Expression, "(throw 1 2)").err().unwrap();
        assert!(err.to_string().starts_with("Too many arguments to throw"));
        assert!(matches!(analyze(Context::Expression, "(throw nil)").unwrap(), Expr::Throw(_)));
    }
}
