use std::collections::HashSet;

use crate::error::{malformed, Result};
use crate::value::{equiv, Value};
use crate::vm::compiler::compiler::strip_position;
use crate::vm::compiler::expr::{Expr, MetaExpr};
use crate::vm::compiler::{Compiler, Context};

fn element_context(ctx: Context) -> Context {
    if ctx == Context::Eval {
        ctx
    } else {
        Context::Expression
    }
}

fn attach_meta(compiler: &mut Compiler, ctx: Context, form: &Value, expr: Expr) -> Result<Expr> {
    let Some(meta) = strip_position(form.meta()) else { return Ok(expr) };
    let meta = parse_map(compiler, element_context(ctx), &meta)?;
    Ok(Expr::Meta(MetaExpr { expr: Box::new(expr), meta: Box::new(meta) }))
}

fn all_literal(exprs: &[Expr]) -> Option<Vec<Value>> {
    exprs.iter().map(Expr::literal_value).collect()
}

pub fn parse_vector(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.vector_items().unwrap_or(&[]);
    let mut exprs = Vec::with_capacity(items.len());
    for item in items {
        exprs.push(compiler.analyze(element_context(ctx), item)?);
    }
    if strip_position(form.meta()).is_none() {
        if let Some(values) = all_literal(&exprs) {
            return Ok(Expr::Constant(Value::vector(values)));
        }
    }
    attach_meta(compiler, ctx, form, Expr::Vector(exprs))
}

pub fn parse_map(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let Value::Map(map) = form else { return malformed(format!("Expected a map, got: {}", form)) };
    let mut exprs = Vec::with_capacity(map.entries.len() * 2);
    let mut seen: Vec<&Value> = Vec::new();
    for (k, v) in &map.entries {
        if seen.iter().any(|s| equiv(s, k)) {
            return malformed(format!("Duplicate key: {}", k));
        }
        seen.push(k);
        exprs.push(compiler.analyze(element_context(ctx), k)?);
        exprs.push(compiler.analyze(element_context(ctx), v)?);
    }
    if strip_position(form.meta()).is_none() {
        if let Some(values) = all_literal(&exprs) {
            let entries = values.chunks_exact(2).map(|kv| (kv[0].clone(), kv[1].clone())).collect();
            return Ok(Expr::Constant(Value::map(entries)));
        }
    }
    attach_meta(compiler, ctx, form, Expr::Map(exprs))
}

pub fn parse_set(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let Value::Set(set) = form else { return malformed(format!("Expected a set, got: {}", form)) };
    let mut exprs = Vec::with_capacity(set.items.len());
    let mut hashes = HashSet::new();
    for (i, item) in set.items.iter().enumerate() {
        let dup = !hashes.insert(crate::value::hash(item)) && set.items[..i].iter().any(|s| equiv(s, item));
        if dup {
            return malformed(format!("Duplicate key: {}", item));
        }
        exprs.push(compiler.analyze(element_context(ctx), item)?);
    }
    if strip_position(form.meta()).is_none() {
        if let Some(values) = all_literal(&exprs) {
            return Ok(Expr::Constant(Value::set(values)));
        }
    }
    attach_meta(compiler, ctx, form, Expr::Set(exprs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::parser::read_one;
    use crate::vm::vm::Vm;

    fn analyze(src: &str) -> Result<Expr> {
        let mut vm = Vm::new();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new(), "coll.clj");
        c.analyze(Context::Expression, &read_one(src).unwrap())
    }

    #[test]
    fn constant_elements_fold() {
        assert!(matches!(analyze("[1 :a \"s\"]").unwrap(), Expr::Constant(Value::Vector(_))));
        assert!(matches!(analyze("{:a 1}").unwrap(), Expr::Constant(Value::Map(_))));
        assert!(matches!(analyze("#{1 2}").unwrap(), Expr::Constant(Value::Set(_))));
    }

    #[test]
    fn computed_elements_stay_expressions() {
        assert!(matches!(analyze("[1 (inc 1)]").unwrap(), Expr::Vector(_)));
        assert!(matches!(analyze("{:a (inc 1)}").unwrap(), Expr::Map(_)));
    }

    #[test]
    fn metadata_is_attached_at_run_time() {
        assert!(matches!(analyze("^:private [1 2]").unwrap(), Expr::Meta(_)));
    }
}
