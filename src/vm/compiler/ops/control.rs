use std::collections::{BTreeMap, HashSet};

use crate::error::{malformed, ErrorKind, Result};
use crate::value::Value;
use crate::vm::compiler::expr::{maybe_java_class, CaseExpr, Expr, IfExpr, SwitchType, TestType};
use crate::vm::compiler::path::PathNode;
use crate::vm::compiler::{Compiler, Context};

pub fn parse_body(compiler: &mut Compiler, ctx: Context, forms: &[Value]) -> Result<Expr> {
    let mut exprs = Vec::with_capacity(forms.len().max(1));
    for (i, form) in forms.iter().enumerate() {
        let last = i + 1 == forms.len();
        let form_ctx = if ctx != Context::Eval && (ctx == Context::Statement || !last) { Context::Statement } else { ctx };
        exprs.push(compiler.analyze(form_ctx, form)?);
    }
    if exprs.is_empty() {
        exprs.push(Expr::Nil);
    }
    Ok(Expr::Body(exprs))
}

pub fn parse_do(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    parse_body(compiler, ctx, &items[1..])
}

pub fn parse_if(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    if items.len() > 4 {
        return malformed("Too many arguments to if");
    }
    if items.len() < 3 {
        return malformed("Too few arguments to if");
    }
    let line = compiler.ctx.line;
    let branch = compiler.branch_node();
    let test = compiler.analyze(if ctx == Context::Eval { ctx } else { Context::Expression }, &items[1])?;
    let then = compiler.with_ctx(|c| {
        c.ctx.clear_path = Some(PathNode::path(Some(branch.clone())));
        c.analyze(ctx, &items[2])
    })?;
    let otherwise = compiler.with_ctx(|c| {
        c.ctx.clear_path = Some(PathNode::path(Some(branch.clone())));
        c.analyze(ctx, items.get(3).unwrap_or(&Value::Nil))
    })?;
    Ok(Expr::If(IfExpr { test: Box::new(test), then: Box::new(then), otherwise: Box::new(otherwise), line }))
}

pub fn parse_quote(form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    let v = items.get(1).cloned().unwrap_or(Value::Nil);
    Ok(match v {
        Value::Nil => Expr::Nil,
        Value::Bool(b) => Expr::Bool(b),
        Value::Long(_) | Value::Double(_) => Expr::Number(v),
        Value::Str(s) => Expr::Str(s),
        Value::Keyword(k) => Expr::Keyword(k),
        ref c if c.is_coll() && c.count() == Some(0) => Expr::Empty(v.with_meta(None)),
        other => Expr::Constant(other),
    })
}

fn as_i32(v: &Value, what: &str) -> Result<i32> {
    match v {
        Value::Long(l) => i32::try_from(*l).map_err(|_| ErrorKind::malformed(format!("case* {} out of range: {}", what, l)).into()),
        other => malformed(format!("case* {} must be an integer, got: {}", what, other)),
    }
}

pub fn parse_case(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    if ctx == Context::Eval {
        return compiler.analyze_in_fn(ctx, form);
    }
    let items = form.list_items().unwrap_or(&[]);
    if items.len() < 8 {
        return malformed(format!("Malformed case*: {}", form));
    }
    let line = compiler.ctx.line;
    let shift = as_i32(&items[2], "shift")?;
    let mask = as_i32(&items[3], "mask")?;
    let default_form = &items[4];
    let Value::Map(case_map) = &items[5] else {
        return malformed(format!("case* expects a map of clauses, got: {}", items[5]));
    };
    let switch_type = match items[6].as_keyword().map(|k| &*k.name) {
        Some("compact") => SwitchType::Compact,
        Some("sparse") => SwitchType::Sparse,
        _ => return malformed(format!("Unexpected switch type: {}", items[6])),
    };
    let test_type = match items[7].as_keyword().map(|k| &*k.name) {
        Some("int") => TestType::Int,
        Some("hash-equiv") => TestType::HashEquiv,
        Some("hash-identity") => TestType::HashIdentity,
        _ => return malformed(format!("Unexpected case test type: {}", items[7])),
    };
    let mut skip_check = HashSet::new();
    if let Some(Value::Set(keys)) = items.get(8) {
        for k in &keys.items {
            skip_check.insert(as_i32(k, "skip-check key")?);
        }
    }

    let expr = match compiler.analyze(Context::Expression, &items[1])? {
        Expr::Local(l) => l,
        other => return malformed(format!("case* dispatches on a local, got a {}", other.kind_name())),
    };
    expr.should_clear.set(false);

    let branch = compiler.branch_node();
    let mut tests = BTreeMap::new();
    let mut thens = BTreeMap::new();
    for (key, pair) in &case_map.entries {
        let key = as_i32(key, "key")?;
        let (test, then) = match pair.vector_items() {
            Some([test, then]) => (test, then),
            _ => return malformed(format!("case* clause must be [test then], got: {}", pair)),
        };
        let test_expr = match test_type {
            TestType::Int => Expr::Number(Value::Long(as_i32(test, "test")? as i64)),
            _ => Expr::Constant(test.clone()),
        };
        tests.insert(key, test_expr);
        let then_expr = compiler.with_ctx(|c| {
            c.ctx.clear_path = Some(PathNode::path(Some(branch.clone())));
            c.analyze(ctx, then)
        })?;
        thens.insert(key, then_expr);
    }
    let default = compiler.with_ctx(|c| {
        c.ctx.clear_path = Some(PathNode::path(Some(branch.clone())));
        c.analyze(ctx, default_form)
    })?;

    let (Some(&low), Some(&high)) = (tests.keys().next(), tests.keys().next_back()) else {
        return malformed("case* needs at least one clause");
    };
    if !skip_check.is_empty() && compiler.options.warn_on_reflection {
        log::warn!(
            "Performance warning, {}:{}:{} - hash collision of some case test constants; if selected, those entries will be tested sequentially.",
            compiler.source(),
            line,
            compiler.ctx.column
        );
    }
    let return_type = maybe_java_class(thens.values().chain(std::iter::once(&default)));
    Ok(Expr::Case(Box::new(CaseExpr {
        expr,
        shift: shift as u8,
        mask,
        low,
        high,
        default: Box::new(default),
        tests,
        thens,
        switch_type,
        test_type,
        skip_check,
        return_type,
        line,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::parser::read_one;
    use crate::vm::vm::Vm;

    fn analyze(ctx: Context, src: &str) -> Result<Expr> {
        let mut vm = Vm::new();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new(), "control.clj");
        c.analyze(ctx, &read_one(src).unwrap())
    }

    #[test]
    fn if_arity_is_checked() {
        let err = analyze(Context::Expression, "(if 1 2 3 4)").err().unwrap();
        assert!(err.to_string().starts_with("Too many arguments to if"));
        let err = analyze(Context::Expression, "(if 1)").err().unwrap();
        assert!(err.to_string().starts_with("Too few arguments to if"));
    }

    #[test]
    fn missing_else_is_nil() {
        let Expr::If(i) = analyze(Context::Expression, "(if true 1)").unwrap() else { panic!("expected if") };
        assert!(matches!(*i.otherwise, Expr::Nil));
    }

    #[test]
    fn empty_do_is_nil() {
        let Expr::Body(exprs) = analyze(Context::Expression, "(do)").unwrap() else { panic!("expected body") };
        assert!(matches!(exprs[..], [Expr::Nil]));
    }

    #[test]
    fn quote_keeps_forms_unevaluated() {
        assert!(matches!(analyze(Context::Expression, "(quote (a b))").unwrap(), Expr::Constant(Value::List(_))));
        assert!(matches!(analyze(Context::Expression, "(quote 5)").unwrap(), Expr::Number(_)));
        assert!(matches!(analyze(Context::Expression, "'()").unwrap(), Expr::Empty(_)));
    }
}
