use std::collections::HashSet;
use std::rc::Rc;

use crate::error::{malformed, ErrorKind, Result};
use crate::runtime::host::{host, PrimType};
use crate::value::{Symbol, Value};
use crate::vm::compiler::compiler::tag_of;
use crate::vm::compiler::emitter::recur_prim_matches;
use crate::vm::compiler::expr::{BindingInit, Expr, LetExpr, LetFnExpr, RecurExpr, StaticMethodExpr};
use crate::vm::compiler::path::PathNode;
use crate::vm::compiler::{Compiler, Context};

use super::control::parse_body;

fn binding_pairs(form: &Value) -> Result<(&[Value], &[Value])> {
    let items = form.list_items().unwrap_or(&[]);
    let Some(bindings) = items.get(1).and_then(Value::vector_items) else {
        return malformed("Bad binding form, expected vector");
    };
    if bindings.len() % 2 != 0 {
        return malformed("Bad binding form, expected matched symbol expression pairs");
    }
    Ok((bindings, &items[2..]))
}

fn binding_symbol(form: &Value) -> Result<&Symbol> {
    let Some(sym) = form.as_symbol() else {
        return malformed(format!("Bad binding form, expected symbol, got: {}", form));
    };
    if sym.ns.is_some() {
        return malformed(format!("Can't let qualified name: {}", sym));
    }
    Ok(sym)
}

fn rt_call(name: &str, arg: Expr, line: u32) -> Result<Expr> {
    let rt = host().get("clojure.lang.RT").ok_or_else(|| ErrorKind::internal("clojure.lang.RT is not registered"))?;
    let object = host().object();
    let method = rt.methods(name, 1, true).into_iter().find(|m| m.params[0].name == object.name);
    Ok(Expr::StaticMethod(StaticMethodExpr { class: rt, name: name.to_string(), args: vec![arg], method, tag_class: None, line }))
}

/// `(let* [sym init ...] body)` and `(loop* [sym init ...] body)`.
///
/// A loop is analyzed again whenever a `recur` hands one of its primitive locals a value of a
/// different primitive type; on the next pass that local starts out boxed. Each pass can only add
/// locals to the boxed set, so the number of passes is bounded by the number of locals.
pub fn parse_let(compiler: &mut Compiler, ctx: Context, form: &Value, is_loop: bool) -> Result<Expr> {
    let (bindings, body) = binding_pairs(form)?;
    if ctx == Context::Eval || (is_loop && ctx == Context::Expression) {
        return compiler.analyze_in_fn(ctx, form);
    }
    let n_locals = bindings.len() / 2;
    let max_passes = compiler.options.max_reanalysis.unwrap_or(n_locals + 1);
    let mut boxed: HashSet<usize> = HashSet::new();
    let mut pass = 0;
    loop {
        pass += 1;
        if pass > max_passes {
            return Err(ErrorKind::PrimitiveMismatch(format!(
                "loop locals kept changing primitive type after {} analysis passes",
                max_passes
            ))
            .into());
        }
        let (expr, mismatched) = compiler.scoped(|c| let_pass(c, ctx, bindings, body, is_loop, &boxed))?;
        let before = boxed.len();
        boxed.extend(mismatched);
        if boxed.len() == before {
            return Ok(expr);
        }
        log::debug!("re-analyzing loop with boxed locals {:?}", boxed);
    }
}

/// One analysis pass of a `let*`/`loop*`. Returns the node and the positions of the loop locals
/// some `recur` handed a mismatched primitive.
fn let_pass(
    compiler: &mut Compiler,
    ctx: Context,
    bindings: &[Value],
    body: &[Value],
    is_loop: bool,
    boxed: &HashSet<usize>,
) -> Result<(Expr, Vec<usize>)> {
    compiler.ctx.loop_locals = None;
    if is_loop {
        let looproot = compiler.path_node();
        let clear_root = PathNode::path(Some(looproot));
        compiler.ctx.clear_root = Some(clear_root.clone());
        compiler.ctx.clear_path = Some(clear_root);
        compiler.ctx.no_recur = false;
    }
    let line = compiler.ctx.line;
    let mut inits = Vec::with_capacity(bindings.len() / 2);
    let mut loop_locals = Vec::new();
    for (i, pair) in bindings.chunks(2).enumerate() {
        let sym = binding_symbol(&pair[0])?;
        let mut init = compiler.analyze_named(Context::Expression, &pair[1], Some(&sym.name))?;
        if is_loop {
            if boxed.contains(&i) {
                if compiler.options.warn_on_reflection {
                    log::warn!("Auto-boxing loop arg: {}", sym);
                }
                init = rt_call("box", init, line)?;
            } else {
                match init.prim_type().and_then(|p| p.prim()) {
                    Some(PrimType::Int) => init = rt_call("longCast", init, line)?,
                    Some(PrimType::Float) => init = rt_call("doubleCast", init, line)?,
                    _ => {}
                }
            }
        }
        let binding = compiler.register_local(sym, tag_of(&pair[0]), Some(&init), false)?;
        if is_loop {
            loop_locals.push(binding.clone());
        }
        inits.push(BindingInit { binding, init });
    }
    let body_ctx = if is_loop {
        compiler.ctx.loop_locals = Some(Rc::new(loop_locals.clone()));
        Context::Return
    } else {
        ctx
    };
    let body = parse_body(compiler, body_ctx, body)?;
    let mismatched =
        loop_locals.iter().enumerate().filter(|(_, lb)| lb.recur_mismatch.get()).map(|(i, _)| i).collect();
    Ok((Expr::Let(LetExpr { inits, body: Box::new(body), is_loop }), mismatched))
}

pub fn parse_recur(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let loop_locals = match (&compiler.ctx.loop_locals, ctx) {
        (Some(locals), Context::Return) => locals.clone(),
        _ => return Err(ErrorKind::IllegalControlTransfer("Can only recur from tail position".into()).into()),
    };
    if compiler.ctx.no_recur {
        return Err(ErrorKind::IllegalControlTransfer("Cannot recur across try".into()).into());
    }
    let line = compiler.ctx.line;
    let items = form.list_items().unwrap_or(&[]);
    let args = items[1..].iter().map(|f| compiler.analyze(Context::Expression, f)).collect::<Result<Vec<_>>>()?;
    if args.len() != loop_locals.len() {
        return malformed(format!(
            "Mismatched argument count to recur, expected: {} args, got: {}",
            loop_locals.len(),
            args.len()
        ));
    }
    for (lb, arg) in loop_locals.iter().zip(&args) {
        let Some(needed) = &lb.prim else { continue };
        let had = arg.prim_type();
        if !recur_prim_matches(needed.prim(), had.as_ref().and_then(|c| c.prim())) {
            lb.recur_mismatch.set(true);
            log::trace!(
                "recur arg for primitive local: {} is not matching primitive, had: {}, needed: {}",
                lb.name,
                had.map_or_else(|| "Object".to_string(), |c| c.name.clone()),
                needed.name
            );
        }
    }
    Ok(Expr::Recur(RecurExpr { loop_locals, args, line }))
}

/// `(letfn* [name (fn* ...) ...] body)`. Every name is visible in every init, so the functions
/// can call each other.
pub fn parse_letfn(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let (bindings, body) = binding_pairs(form)?;
    if ctx == Context::Eval {
        return compiler.analyze_in_fn(ctx, form);
    }
    compiler.scoped(|c| {
        let mut locals = Vec::with_capacity(bindings.len() / 2);
        for pair in bindings.chunks(2) {
            let sym = binding_symbol(&pair[0])?;
            let lb = c.register_local(sym, tag_of(&pair[0]), None, false)?;
            lb.can_be_cleared.set(false);
            locals.push(lb);
        }
        let mut inits = Vec::with_capacity(locals.len());
        for (binding, pair) in locals.into_iter().zip(bindings.chunks(2)) {
            let init = c.analyze_named(Context::Expression, &pair[1], Some(&binding.sym.name))?;
            inits.push(BindingInit { binding, init });
        }
        let body = parse_body(c, ctx, body)?;
        Ok(Expr::LetFn(LetFnExpr { inits, body: Box::new(body) }))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::parser::read_one;
    use crate::vm::vm::Vm;

    fn analyze(src: &str) -> Result<Expr> {
        let mut vm = Vm::new();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new(), "bindings.clj");
        c.analyze(Context::Return, &read_one(src).unwrap())
    }

    #[test]
    fn binding_vector_is_checked() {
        let err = analyze("(let* (x 1) x)").err().unwrap();
        assert!(err.to_string().starts_with("Bad binding form, expected vector"));
        let err = analyze("(let* [x] x)").err().unwrap();
        assert!(err.to_string().starts_with("Bad binding form, expected matched symbol expression pairs"));
        let err = analyze("(let* [a/x 1] 1)").err().unwrap();
        assert!(err.to_string().starts_with("Can't let qualified name: a/x"));
        let err = analyze("(let* [1 1] 1)").err().unwrap();
        assert!(err.to_string().starts_with("Bad binding form, expected symbol, got: 1"));
    }

    #[test]
    fn let_locals_take_the_init_primitive() {
        let Expr::Let(l) = analyze("(let* [x 1 y \"s\"] x)").unwrap() else { panic!("expected let") };
        assert!(l.inits[0].binding.prim.is_some());
        assert!(l.inits[1].binding.prim.is_none());
        assert_eq!(l.inits[1].binding.java_class.as_ref().unwrap().name, "java.lang.String");
    }

    #[test]
    fn recur_must_be_in_tail_position() {
        let err = analyze("(loop* [i 0] (recur i) 1)").err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::IllegalControlTransfer(_)));
        assert!(err.to_string().starts_with("Can only recur from tail position"));
    }

    #[test]
    fn recur_checks_its_argument_count() {
        let err = analyze("(loop* [i 0] (recur 1 2))").err().unwrap();
        assert!(err.to_string().starts_with("Mismatched argument count to recur, expected: 1 args, got: 2"));
    }

    #[test]
    fn mismatched_recur_boxes_the_loop_local() {
        let Expr::Let(l) = analyze("(loop* [i 0] (if (clojure.core/nil? i) i (recur \"x\")))").unwrap() else {
            panic!("expected loop")
        };
        assert!(l.is_loop);
        assert!(l.inits[0].binding.prim.is_none());
        assert!(matches!(&l.inits[0].init, Expr::StaticMethod(m) if m.name == "box"));
    }

    #[test]
    fn letfn_names_see_each_other() {
        let e = analyze("(letfn* [f (fn* f [] (g)) g (fn* g [] 1)] (f))").unwrap();
        let Expr::LetFn(l) = e else { panic!("expected letfn") };
        let Expr::Obj(f) = &l.inits[0].init else { panic!("expected fn") };
        assert_eq!(f.closes.len(), 1);
        assert_eq!(&*f.closes[0].sym.name, "g");
    }
}
