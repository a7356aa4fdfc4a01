use std::cell::Cell;
use std::rc::Rc;

use crate::error::{malformed, ErrorKind, Result};
use crate::runtime::host::{host, Class, ClassKind, Ctor, Field, FieldSlot, Method};
use crate::runtime::rt;
use crate::value::{Symbol, Value};
use crate::vm::compiler::compiler::{meta_flag, strip_position, tag_of};
use crate::vm::compiler::expr::{Expr, MetaExpr};
use crate::vm::compiler::objexpr::{compile_unit, munge, trim_gen_id, ObjExpr, ObjKind, ObjMethod, UnitSpec};
use crate::vm::compiler::path::PathNode;
use crate::vm::compiler::scope_manager::{LocalBinding, ObjFrame};
use crate::vm::compiler::{Compiler, Context};
use crate::vm::loader::stub_name;

use super::collections::parse_map;
use super::control::{parse_body, parse_quote};

const HIDDEN_FIELDS: [&str; 4] = ["__meta", "__extmap", "__hash", "__hasheq"];

/// A method a type may implement, with the other return types supertypes declare for the same
/// signature.
struct Overridable {
    method: Rc<Method>,
    covariant_rets: Vec<Rc<Class>>,
}

/// The instance methods of `Object` and of every interface and its ancestors. Of two methods with
/// one signature the one with the narrower return type is kept.
fn gather_methods(interfaces: &[Rc<Class>]) -> Vec<Overridable> {
    let mut classes = vec![host().object()];
    for i in interfaces {
        classes.push(i.clone());
        classes.extend(i.ancestors());
    }
    let mut out: Vec<Overridable> = Vec::new();
    for class in classes {
        for m in class.members().methods.iter().filter(|m| !m.is_static) {
            match out.iter_mut().find(|o| o.method.same_signature(m)) {
                None => out.push(Overridable { method: m.clone(), covariant_rets: Vec::new() }),
                Some(o) if o.method.ret.name == m.ret.name => {}
                Some(o) => {
                    let other = if o.method.ret.is_assignable_from(&m.ret) {
                        std::mem::replace(&mut o.method, m.clone()).ret.clone()
                    } else {
                        m.ret.clone()
                    };
                    if !o.covariant_rets.iter().any(|r| r.name == other.name) {
                        o.covariant_rets.push(other);
                    }
                }
            }
        }
    }
    out
}

struct TypeDef<'a> {
    name: String,
    kind: ObjKind,
    fields: Vec<Rc<LocalBinding>>,
    field_classes: Vec<Rc<Class>>,
    field_syms: Vec<Value>,
    interfaces: Vec<Rc<Class>>,
    method_forms: &'a [Value],
    stub_sym: Option<Symbol>,
}

fn resolve_interfaces(compiler: &Compiler, forms: &[Value]) -> Result<Vec<Rc<Class>>> {
    let mut out = Vec::with_capacity(forms.len());
    for f in forms {
        let class = compiler
            .maybe_class(f)
            .ok_or_else(|| ErrorKind::unresolved(format!("Unable to resolve classname: {}", f)))?;
        if !class.is_interface {
            return malformed(format!("only interfaces are supported, had: {}", class.name));
        }
        out.push(class);
    }
    Ok(out)
}

pub fn parse_reify(compiler: &mut Compiler, ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    let Some(iface_forms) = items.get(1).and_then(Value::vector_items) else {
        return malformed("reify* expects a vector of interfaces");
    };
    let mut interfaces = resolve_interfaces(compiler, iface_forms)?;
    if let Some(iobj) = host().get("clojure.lang.IObj") {
        if !interfaces.iter().any(|i| i.name == iobj.name) {
            interfaces.push(iobj);
        }
    }
    let base = match compiler.scopes.current_obj() {
        Some(o) => format!("{}$", trim_gen_id(&o.name)),
        None => format!("{}$", munge(&compiler.current_ns_name())),
    };
    let def = TypeDef {
        name: format!("{}reify__{}", base, rt::next_id()),
        kind: ObjKind::Reify,
        fields: Vec::new(),
        field_classes: Vec::new(),
        field_syms: Vec::new(),
        interfaces,
        method_forms: &items[2..],
        stub_sym: None,
    };
    let obj = build_type(compiler, def)?;
    match strip_position(form.meta()) {
        None => Ok(Expr::Obj(obj)),
        Some(meta) => {
            let meta_ctx = if ctx == Context::Eval { ctx } else { Context::Expression };
            let meta = parse_map(compiler, meta_ctx, &meta)?;
            Ok(Expr::Meta(MetaExpr { expr: Box::new(Expr::Obj(obj)), meta: Box::new(meta) }))
        }
    }
}

pub fn parse_deftype(compiler: &mut Compiler, _ctx: Context, form: &Value) -> Result<Expr> {
    let items = form.list_items().unwrap_or(&[]);
    if items.len() < 4 {
        return malformed(format!("Malformed deftype*: {}", form));
    }
    let Some(tagname) = items[1].as_symbol() else { return malformed("deftype* tag name must be a symbol") };
    let Some(classname) = items[2].as_symbol() else { return malformed("deftype* class name must be a symbol") };
    let Some(field_forms) = items[3].vector_items() else { return malformed("deftype* fields must be a vector") };

    let mut rest = &items[4..];
    let mut iface_forms: &[Value] = &[];
    while let [Value::Keyword(k), v, tail @ ..] = rest {
        if &*k.name == "implements" {
            iface_forms = v.vector_items().unwrap_or(&[]);
        }
        rest = tail;
    }
    let interfaces = resolve_interfaces(compiler, iface_forms)?;

    let object = host().object();
    let mut fields = Vec::with_capacity(field_forms.len());
    let mut field_classes = Vec::with_capacity(field_forms.len());
    for f in field_forms {
        let Some(sym) = f.as_symbol() else { return malformed(format!("deftype* field must be a symbol, got: {}", f)) };
        let tag = tag_of(f);
        let class = compiler.tag_class(tag.as_ref())?;
        let mutable = meta_flag(f, "unsynchronized-mutable") || meta_flag(f, "volatile-mutable");
        fields.push(Rc::new(LocalBinding {
            id: rt::next_id(),
            idx: -1,
            sym: sym.with_meta(None),
            name: munge(&sym.name),
            tag,
            java_class: Some(class.clone()).filter(|c| c.name != object.name),
            prim: Some(class.clone()).filter(|c| c.is_primitive()),
            is_arg: false,
            clear_path_root: None,
            can_be_cleared: Cell::new(false),
            recur_mismatch: Cell::new(false),
            mutable,
        }));
        field_classes.push(if class.is_primitive() { class } else { object.clone() });
    }
    let def = TypeDef {
        name: classname.to_string(),
        kind: ObjKind::Deftype,
        fields,
        field_classes,
        field_syms: field_forms.to_vec(),
        interfaces,
        method_forms: rest,
        stub_sym: Some(Symbol::simple(&tagname.name)),
    };
    Ok(Expr::Obj(build_type(compiler, def)?))
}

fn define_stub(def: &TypeDef) -> Rc<Class> {
    let stub = Rc::new(Class::new(
        stub_name(&def.name),
        ClassKind::Stub,
        Some(host().object()),
        def.interfaces.clone(),
        false,
    ));
    for (i, (b, class)) in def.fields.iter().zip(&def.field_classes).enumerate() {
        stub.add_field(Field { name: b.name.clone(), class: class.clone(), slot: FieldSlot::Instance(i), mutable: b.mutable });
    }
    stub.add_ctor(Ctor { params: def.field_classes.clone(), func: None });
    host().define(stub.clone());
    stub
}

fn alt_ctor_drops(fields: &[Rc<LocalBinding>]) -> usize {
    fields.iter().rev().take_while(|b| HIDDEN_FIELDS.contains(&&*b.sym.name)).count()
}

fn build_type(compiler: &mut Compiler, def: TypeDef) -> Result<Rc<ObjExpr>> {
    let stub = define_stub(&def);
    let out = compiler.with_ctx(|c| build_type_with_stub(c, &def, &stub));
    if out.is_err() {
        host().remove(&stub.name);
    }
    let (class, closes) = out?;
    log::debug!("compiled {} with {} fields", def.name, closes.len());
    let close_exprs = match def.kind {
        ObjKind::Deftype => Vec::new(),
        _ => closes.iter().map(|b| compiler.local_expr(b.clone(), None)).collect::<Result<Vec<_>>>()?,
    };
    Ok(Rc::new(ObjExpr { name: def.name, kind: def.kind, class, closes, close_exprs, tag_class: None }))
}

fn build_type_with_stub(
    c: &mut Compiler,
    def: &TypeDef,
    stub: &Rc<Class>,
) -> Result<(Rc<Class>, Vec<Rc<LocalBinding>>)> {
    let is_deftype = def.kind == ObjKind::Deftype;
    let overridables = gather_methods(&def.interfaces);
    let this_tag = Symbol::simple(&stub.name);

    let mut frame = ObjFrame::new(def.name.clone());
    frame.is_deftype = is_deftype;
    for b in &def.fields {
        frame.closes.insert(b.id, b.clone());
    }
    let (parent, env) = if is_deftype {
        if let Some(sym) = &def.stub_sym {
            c.ctx.compile_stub = Some((sym.clone(), stub.clone()));
        }
        let env: im::HashMap<Symbol, Rc<LocalBinding>> = def.fields.iter().map(|b| (b.sym.clone(), b.clone())).collect();
        (None, Some(env))
    } else {
        (c.scopes.current_method(), None)
    };
    let obj = c.scopes.push_obj(frame);
    let methods = def
        .method_forms
        .iter()
        .map(|f| parse_type_method(c, obj, parent, env.as_ref(), f, &this_tag, &overridables))
        .collect::<Result<Vec<_>>>();
    let frame = c.scopes.pop_obj().ok_or_else(|| ErrorKind::internal("object frame underflow"))?;
    let mut methods = methods?;
    if is_deftype {
        methods.push(basis_method(c, &def.field_syms)?);
    }
    let closes: Vec<Rc<LocalBinding>> = frame.closes.values().cloned().collect();
    let class = compile_unit(
        UnitSpec {
            name: def.name.clone(),
            kind: def.kind,
            superclass: host().object(),
            interfaces: def.interfaces.clone(),
            closes: closes.clone(),
            field_classes: def.field_classes.clone(),
            alt_ctor_drops: alt_ctor_drops(&def.fields),
            methods,
            once_only: false,
        },
        &c.options,
    )?;
    Ok((class, closes))
}

fn basis_method(c: &Compiler, field_syms: &[Value]) -> Result<ObjMethod> {
    let basis = Value::vector(field_syms.to_vec());
    let body = parse_quote(&Value::list(vec![Value::sym("quote"), basis]))?;
    Ok(ObjMethod {
        name: "getBasis".into(),
        params: Vec::new(),
        ret: host().get("clojure.lang.IPersistentVector").unwrap_or_else(|| host().object()),
        arg_locals: Vec::new(),
        variadic: false,
        is_static: true,
        body,
        max_local: 0,
        catch_finally_locals: Default::default(),
        line: c.ctx.line,
        bridges: Vec::new(),
    })
}

/// The interface method a method form implements, with the parameter and return classes the
/// implementation uses. Unhinted forms adopt the signature of their only candidate.
fn match_method<'o>(
    c: &Compiler,
    name: &str,
    params: &[Value],
    ret_tag: Option<&Symbol>,
    overridables: &'o [Overridable],
) -> Result<(&'o Overridable, Vec<Rc<Class>>, Rc<Class>)> {
    let mut hinted = ret_tag.is_some();
    let mut pclasses = Vec::with_capacity(params.len());
    for p in params {
        let tag = tag_of(p);
        hinted |= tag.is_some();
        pclasses.push(c.tag_class(tag.as_ref())?);
    }
    let ret = c.tag_class(ret_tag)?;
    let candidates: Vec<&Overridable> =
        overridables.iter().filter(|o| o.method.name == name && o.method.arity() == params.len()).collect();
    let exact = || {
        candidates.iter().copied().find(|o| o.method.params.iter().zip(&pclasses).all(|(a, b)| a.name == b.name))
    };
    let found = match candidates.len() {
        0 => return malformed(format!("Can't define method not in interfaces: {}", name)),
        1 if !hinted => {
            let o = candidates[0];
            return Ok((o, o.method.params.clone(), o.method.ret.clone()));
        }
        1 => exact().ok_or_else(|| {
            ErrorKind::malformed(format!("Can't find matching method: {}, leave off hints for auto match.", name))
        })?,
        _ if !hinted => return malformed(format!("Must hint overloaded method: {}", name)),
        _ => exact().ok_or_else(|| ErrorKind::malformed(format!("Can't find matching overloaded method: {}", name)))?,
    };
    if found.method.ret.name != ret.name {
        return malformed(format!(
            "Mismatched return type: {}, expected: {}, had: {}",
            name, found.method.ret.name, ret.name
        ));
    }
    Ok((found, pclasses, ret))
}

/// `(name [this args...] body)`. Type methods see only the type's fields; `reify` methods see the
/// enclosing locals too.
fn parse_type_method(
    c: &mut Compiler,
    obj: usize,
    parent: Option<usize>,
    env: Option<&im::HashMap<Symbol, Rc<LocalBinding>>>,
    form: &Value,
    this_tag: &Symbol,
    overridables: &[Overridable],
) -> Result<ObjMethod> {
    let items = form.list_items().ok_or_else(|| ErrorKind::malformed(format!("Malformed method: {}", form)))?;
    let Some(dotname) = items.first().and_then(Value::as_symbol) else {
        return malformed(format!("Method name must be a symbol: {}", form));
    };
    let name = munge(&dotname.name);
    let Some(params) = items.get(1).and_then(Value::vector_items) else {
        return malformed(format!("Parameter declaration missing in method: {}", dotname));
    };
    let Some((this_form, params)) = params.split_first() else {
        return malformed(format!("Must supply at least one argument for 'this' in: {}", dotname));
    };
    let mut psyms = Vec::with_capacity(params.len());
    for p in std::iter::once(this_form).chain(params) {
        let Some(sym) = p.as_symbol() else { return malformed("params must be Symbols") };
        psyms.push(Symbol::simple(&sym.name));
    }
    let (found, pclasses, ret) = match_method(c, &name, params, tag_of(&items[0]).as_ref(), overridables)?;
    let bridges = found.covariant_rets.iter().map(|r| (pclasses.clone(), r.clone())).collect();
    let body = &items[2..];
    let line = c.ctx.line;

    c.scoped(|c| {
        c.scopes.push_method(obj, parent);
        let out = (|| -> Result<(Vec<Rc<LocalBinding>>, Expr)> {
            if let Some(env) = env {
                c.scopes.set_env(env.clone());
            }
            let root = PathNode::path(c.ctx.clear_path.clone());
            c.ctx.clear_path = Some(root.clone());
            c.ctx.clear_root = Some(root);
            c.ctx.loop_locals = None;
            c.ctx.in_catch_finally = false;
            c.ctx.no_recur = false;
            c.register_local(&psyms[0], Some(this_tag.clone()), None, false)?;
            let arg_locals: Vec<_> = psyms[1..].iter().zip(&pclasses).map(|(s, class)| c.register_param(s, class)).collect();
            c.ctx.loop_locals = Some(Rc::new(arg_locals.clone()));
            let body = parse_body(c, Context::Return, body)?;
            Ok((arg_locals, body))
        })();
        let frame = c.scopes.pop_method();
        let (arg_locals, body) = out?;
        let (max_local, catch_finally_locals) = frame.map(|f| (f.max_local, f.catch_finally_locals)).unwrap_or_default();
        Ok(ObjMethod {
            name,
            params: pclasses,
            ret,
            arg_locals,
            variadic: false,
            is_static: false,
            body,
            max_local,
            catch_finally_locals,
            line,
            bridges,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompilerOptions;
    use crate::parser::read_one;
    use crate::vm::vm::Vm;

    fn analyze(vm: &mut Vm, src: &str) -> Result<Expr> {
        let mut c = Compiler::new(vm, CompilerOptions::new(), "types.clj");
        c.analyze(Context::Expression, &read_one(src).unwrap())
    }

    fn obj(e: Expr) -> Rc<ObjExpr> {
        match e {
            Expr::Obj(o) => o,
            Expr::Meta(m) => match *m.expr {
                Expr::Obj(o) => o,
                _ => panic!("expected a unit"),
            },
            _ => panic!("expected a unit"),
        }
    }

    #[test]
    fn covariant_returns_are_gathered() {
        let vector = host().get("clojure.lang.IPersistentVector").unwrap();
        let methods = gather_methods(&[vector]);
        let cons = methods.iter().find(|o| o.method.name == "cons").unwrap();
        assert_eq!(cons.method.ret.name, "clojure.lang.IPersistentVector");
        assert_eq!(cons.covariant_rets.len(), 1);
        assert_eq!(cons.covariant_rets[0].name, "clojure.lang.IPersistentCollection");
    }

    #[test]
    fn reify_methods_must_exist_in_an_interface() {
        let mut vm = Vm::new();
        let err = analyze(&mut vm, "(reify* [clojure.lang.IDeref] (frob [this] 1))").err().unwrap();
        assert!(err.to_string().starts_with("Can't define method not in interfaces: frob"));
    }

    #[test]
    fn reify_requires_interfaces() {
        let mut vm = Vm::new();
        let err = analyze(&mut vm, "(reify* [String] (toString [this] \"x\"))").err().unwrap();
        assert!(err.to_string().starts_with("only interfaces are supported, had: java.lang.String"));
    }

    #[test]
    fn reify_adopts_the_interface_signature() {
        let mut vm = Vm::new();
        let o = obj(analyze(&mut vm, "(reify* [clojure.lang.IDeref] (deref [this] 42))").unwrap());
        assert_eq!(o.kind, ObjKind::Reify);
        assert!(o.name.starts_with("user$reify__"));
        assert_eq!(o.class.methods("deref", 0, false)[0].ret.name, "java.lang.Object");
        assert!(host().get(&stub_name(&o.name)).is_none());
    }

    #[test]
    fn deftype_fields_become_the_basis() {
        let mut vm = Vm::new();
        let o = obj(analyze(&mut vm, "(deftype* user/Pt user.Pt [x ^long y __meta] :implements [])").unwrap());
        assert_eq!(o.kind, ObjKind::Deftype);
        assert_eq!(o.closes.len(), 3);
        assert_eq!(o.class.ctors().len(), 2);
        assert_eq!(o.class.field("y", false).unwrap().class.name, "long");
        assert!(!o.class.methods("getBasis", 0, true).is_empty());
        assert!(host().get(&stub_name("user.Pt")).is_none());
    }

    #[test]
    fn deftype_methods_see_only_fields() {
        let mut vm = Vm::new();
        let err = analyze(&mut vm, "(let* [z 1] (deftype* user/Q user.Q [a] :implements [clojure.lang.IDeref] (deref [this] z)))")
            .err()
            .unwrap();
        assert!(err.to_string().contains("Unable to resolve symbol: z"));
    }
}
