use std::rc::Rc;

use crate::error::{malformed, ErrorKind, Result};
use crate::runtime::host::{host, Class, PrimType};
use crate::value::Value;
use crate::vm::compiler::compiler::tag_of;
use crate::vm::compiler::expr::{
    Expr, InstanceFieldExpr, InstanceMethodExpr, NewExpr, StaticFieldExpr, StaticMethodExpr, StaticType,
};
use crate::vm::compiler::objexpr::munge;
use crate::vm::compiler::reflector::get_matching_params;
use crate::vm::compiler::{Compiler, Context};

fn arg_types(args: &[Expr]) -> String {
    args.iter()
        .map(|a| match a.java_class() {
            Some(StaticType::Class(c)) => c.name.clone(),
            Some(StaticType::Nil) => "nil".to_string(),
            _ => "unknown".to_string(),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn target_class(target: &Expr) -> Option<Rc<Class>> {
    match target.java_class() {
        Some(StaticType::Class(c)) if !c.is_primitive() => Some(c),
        _ => None,
    }
}

pub fn parse_dot(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    if items.len() < 3 {
        return malformed("Malformed member expression, expecting (. target member ...)");
    }
    let sub_ctx = if ctx == Context::Eval { ctx } else { Context::Expression };
    let line = compiler.ctx.line;
    let class = compiler.maybe_class(&items[1]);
    let instance = match class {
        Some(_) => None,
        None => Some(compiler.analyze(sub_ctx, &items[1])?),
    };
    let tag = tag_of(form);
    let tag_class = tag.as_ref().map(|t| compiler.tag_to_class(t)).transpose()?;

    if let (3, Value::Symbol(member)) = (items.len(), &items[2]) {
        let (name, forced) = match member.name.strip_prefix('-') {
            Some(field) if !field.is_empty() => (munge(field), true),
            _ => (munge(&member.name), false),
        };
        let is_field = forced
            || match (&class, instance.as_ref().and_then(target_class)) {
                (Some(c), _) => c.methods(&name, 0, true).is_empty(),
                (None, Some(c)) => c.methods(&name, 0, false).is_empty(),
                (None, None) => true,
            };
        if is_field {
            return match (class, instance) {
                (Some(class), _) => static_field(class, &name, tag_class, line),
                (None, Some(target)) => Ok(instance_field(compiler, target, name, tag_class, line)),
                (None, None) => Err(ErrorKind::internal("member access without a target").into()),
            };
        }
    }

    let call: &[Value] = match &items[2] {
        Value::List(_) if items.len() == 3 => items[2].list_items().unwrap_or(&[]),
        _ => &items[2..],
    };
    let Some(member) = call.first().and_then(Value::as_symbol) else {
        return malformed("Malformed member expression");
    };
    let name = munge(&member.name);
    let args = call[1..].iter().map(|f| compiler.analyze(sub_ctx, f)).collect::<Result<Vec<_>>>()?;
    match (class, instance) {
        (Some(class), _) => static_method(compiler, class, name, args, tag_class, line),
        (None, Some(target)) => instance_method(compiler, target, name, args, tag_class, line),
        (None, None) => Err(ErrorKind::internal("member call without a target").into()),
    }
}

fn static_field(class: Rc<Class>, name: &str, tag_class: Option<Rc<Class>>, line: u32) -> Result<Expr> {
    let Some(field) = class.field(name, true) else {
        return Err(ErrorKind::unresolved(format!("Unable to find static field: {} in class {}", name, class.name)).into());
    };
    Ok(Expr::StaticField(StaticFieldExpr { class, field, tag_class, line }))
}

fn instance_field(
    compiler: &Compiler,
    target: Expr,
    name: String,
    tag_class: Option<Rc<Class>>,
    line: u32,
) -> Expr {
    let class = target_class(&target);
    let field = class.as_ref().and_then(|c| c.field(&name, false));
    if field.is_none() {
        match &class {
            Some(c) => compiler.warn_reflection(&format!("reference to field {} on {} can't be resolved.", name, c.name)),
            None => compiler.warn_reflection(&format!("reference to field {} can't be resolved.", name)),
        }
    }
    Expr::InstanceField(InstanceFieldExpr { target: Box::new(target), name, field, tag_class, line })
}

fn static_method(
    compiler: &Compiler,
    class: Rc<Class>,
    name: String,
    args: Vec<Expr>,
    tag_class: Option<Rc<Class>>,
    line: u32,
) -> Result<Expr> {
    let methods = class.methods(&name, args.len(), true);
    if methods.is_empty() {
        return malformed(format!(
            "No matching method {} found taking {} args for class {}",
            name,
            args.len(),
            class.name
        ));
    }
    let method = pick_method(&name, &methods, &args)?;
    if method.is_none() {
        compiler.warn_reflection(&format!(
            "call to static method {} on {} can't be resolved (argument types: {}).",
            name,
            class.name,
            arg_types(&args)
        ));
    }
    Ok(Expr::StaticMethod(StaticMethodExpr { class, name, args, method, tag_class, line }))
}

fn instance_method(
    compiler: &Compiler,
    target: Expr,
    name: String,
    args: Vec<Expr>,
    tag_class: Option<Rc<Class>>,
    line: u32,
) -> Result<Expr> {
    let method = match target_class(&target) {
        Some(class) => {
            let methods = class.methods(&name, args.len(), false);
            if methods.is_empty() {
                compiler.warn_reflection(&format!(
                    "call to method {} on {} can't be resolved (no such method).",
                    name, class.name
                ));
                None
            } else {
                let method = pick_method(&name, &methods, &args)?;
                if method.is_none() {
                    compiler.warn_reflection(&format!(
                        "call to method {} on {} can't be resolved (argument types: {}).",
                        name,
                        class.name,
                        arg_types(&args)
                    ));
                }
                method
            }
        }
        None => {
            compiler.warn_reflection(&format!("call to method {} can't be resolved (target class is unknown).", name));
            None
        }
    };
    Ok(Expr::InstanceMethod(InstanceMethodExpr { target: Box::new(target), name, args, method, tag_class, line }))
}

fn pick_method<T: HasSignature>(name: &str, candidates: &[Rc<T>], args: &[Expr]) -> Result<Option<Rc<T>>> {
    if candidates.len() == 1 {
        return Ok(Some(candidates[0].clone()));
    }
    let params: Vec<Vec<Rc<Class>>> = candidates.iter().map(|m| m.params().to_vec()).collect();
    let rets: Vec<Rc<Class>> = candidates.iter().map(|m| m.ret()).collect();
    Ok(get_matching_params(name, &params, args, &rets)?.map(|i| candidates[i].clone()))
}

trait HasSignature {
    fn params(&self) -> &[Rc<Class>];
    fn ret(&self) -> Rc<Class>;
}

impl HasSignature for crate::runtime::host::Method {
    fn params(&self) -> &[Rc<Class>] {
        &self.params
    }

    fn ret(&self) -> Rc<Class> {
        self.ret.clone()
    }
}

impl HasSignature for crate::runtime::host::Ctor {
    fn params(&self) -> &[Rc<Class>] {
        &self.params
    }

    fn ret(&self) -> Rc<Class> {
        host().prim(PrimType::Void)
    }
}

pub fn parse_new(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    if items.len() < 2 {
        return malformed("wrong number of arguments, expecting: (new Classname args...)");
    }
    let Some(class) = compiler.maybe_class(&items[1]) else {
        return Err(ErrorKind::unresolved(format!("Unable to resolve classname: {}", items[1])).into());
    };
    let sub_ctx = if ctx == Context::Eval { ctx } else { Context::Expression };
    let args = items[2..].iter().map(|f| compiler.analyze(sub_ctx, f)).collect::<Result<Vec<_>>>()?;
    let ctors: Vec<_> = class.ctors().into_iter().filter(|c| c.params.len() == args.len()).collect();
    if ctors.is_empty() {
        return malformed(format!("No matching ctor found for class {}", class.name));
    }
    let ctor = pick_method(&class.name, &ctors, &args)?;
    if ctor.is_none() {
        compiler.warn_reflection(&format!("call to {} ctor can't be resolved.", class.name));
    }
    Ok(Expr::New(NewExpr { class, args, ctor }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::parser::read_one;
    use crate::vm::vm::Vm;

    fn analyze(src: &str) -> Result<Expr> {
        let mut vm = Vm::new();
        let mut c = Compiler::new(&mut vm, CompilerOptions::new(), "interop.clj");
        c.analyze(Context::Expression, &read_one(src).unwrap())
    }

    #[test]
    fn static_calls_resolve_their_overload() {
        let Expr::StaticMethod(m) = analyze("(. clojure.lang.RT (longCast 1.5))").unwrap() else {
            panic!("expected a static call")
        };
        let method = m.method.unwrap();
        assert_eq!(method.params[0].name, "double");
        assert_eq!(method.ret.name, "long");
    }

    #[test]
    fn unknown_static_methods_are_errors() {
        let err = analyze("(. Math nope 1)").err().unwrap();
        assert!(err.to_string().starts_with("No matching method nope found taking 1 args for class java.lang.Math"));
    }

    #[test]
    fn untyped_targets_are_reflective() {
        let Expr::Let(l) = analyze("(let* [s (clojure.core/str 1)] (. s (toUpperCase)))").unwrap() else {
            panic!("expected let")
        };
        let Expr::Body(mut body) = *l.body else { panic!("expected body") };
        let Some(Expr::InstanceMethod(m)) = body.pop() else { panic!("expected an instance call") };
        assert!(m.method.is_none());
    }

    #[test]
    fn typed_targets_resolve_statically() {
        let Expr::InstanceMethod(m) = analyze("(. \"abc\" toUpperCase)").unwrap() else {
            panic!("expected an instance call")
        };
        assert!(m.method.is_some());
    }

    #[test]
    fn dash_forces_a_field() {
        assert!(matches!(analyze("(. \"abc\" -count)").unwrap(), Expr::InstanceField(f) if f.field.is_none()));
    }

    #[test]
    fn new_needs_a_class() {
        let err = analyze("(new Nope)").err().unwrap();
        assert!(err.to_string().starts_with("Unable to resolve classname: Nope"));
        let err = analyze("(new String 1 2 3 4 5)").err().unwrap();
        assert!(err.to_string().starts_with("No matching ctor found for class java.lang.String"));
    }
}
