use std::rc::Rc;

use crate::error::{malformed, ErrorKind, Result};
use crate::runtime::host::{host, Class, PrimType};
use crate::value::{Symbol, Value};
use crate::vm::compiler::compiler::{meta_flag, strip_position, tag_of};
use crate::vm::compiler::expr::{Expr, InstanceOfExpr, InvokeExpr, KeywordInvokeExpr, MetaExpr};
use crate::vm::compiler::objexpr::{compile_unit, munge, trim_gen_id, ObjExpr, ObjKind, ObjMethod, UnitSpec};
use crate::vm::compiler::path::PathNode;
use crate::vm::compiler::scope_manager::{LocalBinding, ObjFrame};
use crate::vm::compiler::{Compiler, Context};

use super::collections::parse_map;
use super::control::parse_body;

pub const MAX_POSITIONAL_ARITY: usize = 20;

fn is_long_or_double(class: &Class) -> bool {
    matches!(class.prim(), Some(PrimType::Long | PrimType::Double))
}

fn fn_name(compiler: &Compiler, name: Option<&str>) -> String {
    let enclosing = compiler.scopes.current_obj().map(|o| o.name.clone());
    let base = match &enclosing {
        Some(outer) => format!("{}$", trim_gen_id(outer)),
        None => format!("{}$", munge(&compiler.current_ns_name())),
    };
    let simple = match name {
        Some(n) => {
            let n = munge(n).replace('.', "_DOT_");
            if enclosing.is_some() {
                format!("{}__{}", n, crate::runtime::rt::next_id())
            } else {
                n
            }
        }
        None => format!("fn__{}", crate::runtime::rt::next_id()),
    };
    base + &simple
}

pub fn parse_fn(compiler: &mut Compiler, ctx: Context, form: &Value, name: Option<&str>) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    let self_name = items.get(1).and_then(Value::as_symbol).map(|s| s.with_meta(None));
    let rest = if self_name.is_some() { &items[2..] } else { &items[1..] };
    let sigs: Vec<&[Value]> = match rest.first() {
        Some(Value::Vector(_)) => vec![rest],
        _ => rest
            .iter()
            .map(|sig| sig.list_items().ok_or_else(|| ErrorKind::malformed(format!("Invalid fn signature: {}", sig)).into()))
            .collect::<Result<_>>()?,
    };
    let name = fn_name(compiler, self_name.as_ref().map(|s| &*s.name).or(name));
    let ret_tag = tag_of(form);

    let mut frame = ObjFrame::new(name.clone());
    frame.this_name = self_name.clone();
    frame.once_only = items.first().map_or(false, |op| meta_flag(op, "once"));
    let once_only = frame.once_only;
    let obj = compiler.scopes.push_obj(frame);
    let parent = compiler.scopes.current_method();
    let methods = sigs
        .iter()
        .map(|sig| parse_fn_method(compiler, obj, parent, sig, ret_tag.as_ref(), self_name.as_ref()))
        .collect::<Result<Vec<_>>>();
    let frame = compiler.scopes.pop_obj().ok_or_else(|| ErrorKind::internal("object frame underflow"))?;
    let methods = methods?;
    check_arities(&methods)?;

    let variadic = methods.iter().any(|m| m.variadic);
    let closes: Vec<Rc<LocalBinding>> = frame.closes.values().cloned().collect();
    let superclass = host()
        .get(if variadic { "clojure.lang.RestFn" } else { "clojure.lang.AFunction" })
        .unwrap_or_else(|| host().object());
    let class = compile_unit(
        UnitSpec {
            name: name.clone(),
            kind: ObjKind::Fn,
            superclass,
            interfaces: Vec::new(),
            closes: closes.clone(),
            field_classes: Vec::new(),
            alt_ctor_drops: 0,
            methods,
            once_only,
        },
        &compiler.options,
    )?;
    log::debug!("compiled fn {} closing over {} locals", name, closes.len());
    let close_exprs = closes.iter().map(|b| compiler.local_expr(b.clone(), None)).collect::<Result<Vec<_>>>()?;
    let fn_expr = Expr::Obj(Rc::new(ObjExpr { name, kind: ObjKind::Fn, class, closes, close_exprs, tag_class: None }));
    match strip_position(form.meta()) {
        None => Ok(fn_expr),
        Some(meta) => {
            let meta_ctx = if ctx == Context::Eval { ctx } else { Context::Expression };
            let meta = parse_map(compiler, meta_ctx, &meta)?;
            Ok(Expr::Meta(MetaExpr { expr: Box::new(fn_expr), meta: Box::new(meta) }))
        }
    }
}

enum ParamState {
    Req,
    Rest,
    Done,
}

fn parse_fn_method(
    compiler: &mut Compiler,
    obj: usize,
    parent: Option<usize>,
    sig: &[Value],
    ret_tag: Option<&Symbol>,
    self_name: Option<&Symbol>,
) -> Result<ObjMethod> {
    let Some(params_form) = sig.first().filter(|p| matches!(p, Value::Vector(_))) else {
        return malformed(format!("Parameter declaration {} should be a vector", sig.first().unwrap_or(&Value::Nil)));
    };
    let params = params_form.vector_items().unwrap_or(&[]);
    let body = &sig[1..];
    compiler.scoped(|c| {
        c.scopes.push_method(obj, parent);
        let out = fn_method_body(c, params_form, params, body, ret_tag, self_name);
        let frame = c.scopes.pop_method();
        let mut method = out?;
        if let Some(frame) = frame {
            method.max_local = frame.max_local;
            method.catch_finally_locals = frame.catch_finally_locals;
        }
        Ok(method)
    })
}

fn fn_method_body(
    c: &mut Compiler,
    params_form: &Value,
    params: &[Value],
    body: &[Value],
    ret_tag: Option<&Symbol>,
    self_name: Option<&Symbol>,
) -> Result<ObjMethod> {
    let line = c.ctx.line;
    let root = c.ctx.clear_path.clone().unwrap_or_else(|| PathNode::path(None));
    c.ctx.clear_path = Some(root.clone());
    c.ctx.clear_root = Some(root);
    c.ctx.loop_locals = None;
    c.ctx.in_catch_finally = false;
    c.ctx.no_recur = false;

    match self_name {
        Some(s) => {
            c.register_local(s, None, None, false)?;
        }
        None => {
            c.scopes.next_local_num();
        }
    }

    let ret_tag = tag_of(params_form).or_else(|| ret_tag.filter(|t| matches!(&*t.name, "long" | "double")).cloned());
    let ret = c.tag_class(ret_tag.as_ref())?;
    if ret.is_primitive() && !is_long_or_double(&ret) {
        return malformed("Only long and double primitives are supported");
    }
    let object = host().object();
    let mut has_prims = ret.is_primitive();
    let mut param_classes = Vec::with_capacity(params.len());
    for p in params {
        let Some(sym) = p.as_symbol() else { return malformed("fn params must be Symbols") };
        if sym.is("&") {
            param_classes.push(None);
            continue;
        }
        let class = c.tag_class(tag_of(p).as_ref())?;
        let class = if class.is_primitive() { class } else { object.clone() };
        if class.is_primitive() && !is_long_or_double(&class) {
            return malformed(format!("Only long and double primitives are supported: {}", sym));
        }
        has_prims |= class.is_primitive();
        param_classes.push(Some(class));
    }

    let mut state = ParamState::Req;
    let mut arg_locals = Vec::with_capacity(params.len());
    let mut variadic = false;
    for (p, class) in params.iter().zip(param_classes) {
        let sym = p.as_symbol().ok_or_else(|| ErrorKind::malformed("fn params must be Symbols"))?;
        if sym.ns.is_some() {
            return malformed(format!("Can't use qualified name as parameter: {}", sym));
        }
        let Some(class) = class else {
            match state {
                ParamState::Req => state = ParamState::Rest,
                _ => return malformed("Invalid parameter list"),
            }
            continue;
        };
        let binding = match state {
            ParamState::Req => {
                if class.is_primitive() {
                    c.register_param(sym, &class)
                } else {
                    c.register_local(sym, tag_of(p), None, true)?
                }
            }
            ParamState::Rest => {
                if tag_of(p).is_some() {
                    return malformed("& arg cannot have type hint");
                }
                if has_prims {
                    return malformed("fns taking primitives cannot be variadic");
                }
                variadic = true;
                state = ParamState::Done;
                c.register_local(sym, None, None, true)?
            }
            ParamState::Done => return malformed("Unexpected parameter"),
        };
        arg_locals.push(binding);
    }
    if matches!(state, ParamState::Rest) {
        return malformed("Invalid parameter list");
    }
    let required = if variadic { arg_locals.len() - 1 } else { arg_locals.len() };
    if required > MAX_POSITIONAL_ARITY {
        return malformed(format!("Can't specify more than {} params", MAX_POSITIONAL_ARITY));
    }

    c.ctx.loop_locals = Some(Rc::new(arg_locals.clone()));
    let body = parse_body(c, Context::Return, body)?;
    let params = arg_locals.iter().map(|lb| lb.prim.clone().unwrap_or_else(|| object.clone())).collect();
    Ok(ObjMethod {
        name: if variadic { "doInvoke".into() } else { "invoke".into() },
        params,
        ret: if ret.is_primitive() { ret } else { object },
        arg_locals,
        variadic,
        is_static: false,
        body,
        max_local: 0,
        catch_finally_locals: Default::default(),
        line,
        bridges: Vec::new(),
    })
}

fn check_arities(methods: &[ObjMethod]) -> Result<()> {
    let mut fixed = std::collections::HashSet::new();
    let mut variadic: Option<&ObjMethod> = None;
    for m in methods {
        if m.variadic {
            if variadic.is_some() {
                return malformed("Can't have more than 1 variadic overload");
            }
            variadic = Some(m);
        } else if !fixed.insert(m.required()) {
            return malformed("Can't have 2 overloads with same arity");
        }
    }
    if let Some(v) = variadic {
        if fixed.iter().any(|&n| n > v.required()) {
            return malformed("Can't have fixed arity function with more params than variadic function");
        }
    }
    Ok(())
}

fn sig_tag(var: &crate::runtime::namespace::Var, argc: usize) -> Option<Symbol> {
    let arglists = var.meta_value("arglists")?;
    let sig = arglists.seq_items()?.iter().find(|a| a.vector_items().map_or(false, |v| v.len() == argc))?;
    tag_of(sig)
}

pub fn parse_invoke(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    let arg_ctx = if ctx == Context::Eval { ctx } else { Context::Expression };
    let line = compiler.ctx.line;
    let fexpr = compiler.analyze(arg_ctx, &items[0])?;

    if let Expr::Var(v) = &fexpr {
        if items.len() == 3 && v.var.qualified_name() == "clojure.core/instance?" {
            if let Expr::Constant(Value::Class(class)) = compiler.analyze(Context::Expression, &items[1])? {
                let expr = compiler.analyze(arg_ctx, &items[2])?;
                return Ok(Expr::InstanceOf(InstanceOfExpr { class, expr: Box::new(expr) }));
            }
        }
    }

    let form_tag = tag_of(form);
    if let Expr::Keyword(kw) = &fexpr {
        if items.len() == 2 && compiler.scopes.in_method() {
            let target = compiler.analyze(arg_ctx, &items[1])?;
            let tag_class = form_tag.as_ref().map(|t| compiler.tag_to_class(t)).transpose()?;
            return Ok(Expr::KeywordInvoke(KeywordInvokeExpr { kw: kw.clone(), target: Box::new(target), tag_class, line }));
        }
    }

    let args = items[1..].iter().map(|f| compiler.analyze(arg_ctx, f)).collect::<Result<Vec<_>>>()?;
    let tag_class = match (&form_tag, &fexpr) {
        (Some(t), _) => Some(compiler.tag_to_class(t)?),
        (None, Expr::Var(v)) => sig_tag(&v.var, args.len())
            .and_then(|t| compiler.tag_to_class(&t).ok())
            .or_else(|| v.tag_class.clone()),
        _ => None,
    };
    Ok(Expr::Invoke(InvokeExpr { fexpr: Box::new(fexpr), args, tag_class, line }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::parser::read_one;
    use crate::vm::vm::Vm;

    fn analyze(vm: &mut Vm, src: &str) -> Result<Expr> {
        let mut c = Compiler::new(vm, CompilerOptions::new(), "functions.clj");
        c.analyze(Context::Expression, &read_one(src).unwrap())
    }

    fn err(src: &str) -> String {
        let mut vm = Vm::new();
        analyze(&mut vm, src).err().unwrap().to_string()
    }

    #[test]
    fn arities_are_validated() {
        assert!(err("(fn* ([a] a) ([b] b))").starts_with("Can't have 2 overloads with same arity"));
        assert!(err("(fn* ([& a] a) ([& b] b))").starts_with("Can't have more than 1 variadic overload"));
        assert!(err("(fn* ([a b c] a) ([a & b] b))")
            .starts_with("Can't have fixed arity function with more params than variadic function"));
    }

    #[test]
    fn parameter_lists_are_validated() {
        assert!(err("(fn* [a & b c] a)").starts_with("Unexpected parameter"));
        assert!(err("(fn* [a &] a)").starts_with("Invalid parameter list"));
        assert!(err("(fn* [& ^String r] r)").starts_with("& arg cannot have type hint"));
        assert!(err("(fn* [^int x] x)").starts_with("Only long and double primitives are supported"));
        assert!(err("(fn* [^long x & r] x)").starts_with("fns taking primitives cannot be variadic"));
        let many: Vec<String> = (0..21).map(|i| format!("a{}", i)).collect();
        assert!(err(&format!("(fn* [{}] 1)", many.join(" "))).starts_with("Can't specify more than 20 params"));
    }

    #[test]
    fn named_fns_take_their_name() {
        let mut vm = Vm::new();
        let Expr::Obj(o) = analyze(&mut vm, "(fn* add1 [x] x)").unwrap() else { panic!("expected fn") };
        assert_eq!(o.name, "user$add1");
        let Expr::Obj(o) = analyze(&mut vm, "(fn* [x] x)").unwrap() else { panic!("expected fn") };
        assert!(o.name.starts_with("user$fn__"));
    }

    #[test]
    fn nested_fns_capture_outer_params() {
        let mut vm = Vm::new();
        let Expr::Obj(outer) = analyze(&mut vm, "(fn* [x y] (fn* [] x))").unwrap() else { panic!("expected fn") };
        assert!(outer.closes.is_empty());
        let class = &outer.class;
        assert!(class.methods("invoke", 2, false).len() == 1);
    }

    #[test]
    fn instance_check_on_a_class_literal() {
        let mut vm = Vm::new();
        let e = analyze(&mut vm, "(instance? String \"a\")").unwrap();
        assert!(matches!(e, Expr::InstanceOf(i) if i.class.name == "java.lang.String"));
    }
}
