use std::io::Write;

use crate::value::{self, equiv, map_assoc, Keyword, NativeFnPtr, NativeResult, Symbol, Value};
use crate::vm::vm::Vm;

use super::host::host;
use super::namespace::Namespace;
use super::rt::{self, arity_exception, illegal_argument};

fn sym(name: &str) -> Value {
    Value::sym(name)
}

fn list(items: Vec<Value>) -> Value {
    Value::list(items)
}

fn quote(v: Value) -> Value {
    list(vec![sym("quote"), v])
}

fn gensym(prefix: &str) -> Value {
    Value::from(Symbol::simple(&format!("{}{}", prefix, rt::next_id())))
}

fn host_call(class: &str, method: &str, args: &[Value]) -> Value {
    let mut call = vec![sym(method)];
    call.extend(args.iter().cloned());
    list(vec![sym("."), sym(class), list(call)])
}

fn check_arity(args: &[Value], min: usize, max: Option<usize>, name: &str) -> Result<(), Value> {
    if args.len() < min || max.map_or(false, |m| args.len() > m) {
        return Err(arity_exception(args.len(), name));
    }
    Ok(())
}

fn fold(vm: &mut Vm, init: Value, args: &[Value], op: NativeFnPtr) -> NativeResult {
    let mut acc = init;
    for a in args {
        acc = op(vm, &[acc, a.clone()])?;
    }
    Ok(acc)
}

fn plus(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match args {
        [] => Ok(Value::Long(0)),
        [first, rest @ ..] => fold(vm, first.clone(), rest, rt::add),
    }
}

fn minus(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match args {
        [] => Err(arity_exception(0, "clojure.core/-")),
        [x] => rt::minus(vm, &[x.clone()]),
        [first, rest @ ..] => fold(vm, first.clone(), rest, rt::minus),
    }
}

fn times(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match args {
        [] => Ok(Value::Long(1)),
        [first, rest @ ..] => fold(vm, first.clone(), rest, rt::multiply),
    }
}

fn divide(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match args {
        [] => Err(arity_exception(0, "clojure.core//")),
        [x] => rt::divide(vm, &[Value::Long(1), x.clone()]),
        [first, rest @ ..] => fold(vm, first.clone(), rest, rt::divide),
    }
}

fn chain(vm: &mut Vm, args: &[Value], name: &str, op: NativeFnPtr) -> NativeResult {
    check_arity(args, 1, None, name)?;
    for pair in args.windows(2) {
        if !op(vm, pair)?.is_truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn lt(vm: &mut Vm, args: &[Value]) -> NativeResult {
    chain(vm, args, "clojure.core/<", rt::lt)
}

fn gt(vm: &mut Vm, args: &[Value]) -> NativeResult {
    chain(vm, args, "clojure.core/>", rt::gt)
}

fn lte(vm: &mut Vm, args: &[Value]) -> NativeResult {
    chain(vm, args, "clojure.core/<=", rt::lte)
}

fn gte(vm: &mut Vm, args: &[Value]) -> NativeResult {
    chain(vm, args, "clojure.core/>=", rt::gte)
}

fn num_eq(vm: &mut Vm, args: &[Value]) -> NativeResult {
    chain(vm, args, "clojure.core/==", rt::num_equiv)
}

fn eq(vm: &mut Vm, args: &[Value]) -> NativeResult {
    chain(vm, args, "clojure.core/=", rt::util_equiv)
}

fn not(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/not")?;
    Ok(Value::Bool(!args[0].is_truthy()))
}

fn is_nil(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/nil?")?;
    Ok(Value::Bool(args[0].is_nil()))
}

fn identical(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(2), "clojure.core/identical?")?;
    Ok(Value::Bool(value::identical(&args[0], &args[1])))
}

fn unary(vm: &mut Vm, args: &[Value], name: &str, op: NativeFnPtr) -> NativeResult {
    check_arity(args, 1, Some(1), name)?;
    op(vm, args)
}

fn inc(vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary(vm, args, "clojure.core/inc", rt::inc)
}

fn dec(vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary(vm, args, "clojure.core/dec", rt::dec)
}

fn zero(vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary(vm, args, "clojure.core/zero?", rt::is_zero)
}

fn pos(vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary(vm, args, "clojure.core/pos?", rt::is_pos)
}

fn neg(vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary(vm, args, "clojure.core/neg?", rt::is_neg)
}

fn rem(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(2), "clojure.core/rem")?;
    rt::remainder(vm, args)
}

fn count(vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary(vm, args, "clojure.core/count", rt::count)
}

fn nth(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(3), "clojure.core/nth")?;
    rt::nth(vm, args)
}

fn get(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(3), "clojure.core/get")?;
    rt::get(vm, args)
}

fn conj(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match args {
        [] => Ok(Value::vector(vec![])),
        [coll] => Ok(coll.clone()),
        [coll, xs @ ..] => fold(vm, coll.clone(), xs, rt::conj),
    }
}

fn assoc(_: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() < 3 || args.len() % 2 == 0 {
        return Err(arity_exception(args.len(), "clojure.core/assoc"));
    }
    let mut m = args[0].clone();
    for kv in args[1..].chunks(2) {
        m = match &m {
            Value::Nil | Value::Map(_) => {
                let meta = m.meta().cloned();
                map_assoc(Some(&m), kv[0].clone(), kv[1].clone()).with_meta(meta)
            }
            Value::Vector(c) => match &kv[0] {
                Value::Long(i) if (*i as usize) <= c.items.len() && *i >= 0 => {
                    let mut items = c.items.clone();
                    if *i as usize == items.len() {
                        items.push(kv[1].clone());
                    } else {
                        items[*i as usize] = kv[1].clone();
                    }
                    Value::vector(items)
                }
                _ => return Err(rt::exception("java.lang.IndexOutOfBoundsException", kv[0].to_string())),
            },
            other => return Err(rt::class_cast(other, "clojure.lang.Associative")),
        };
    }
    Ok(m)
}

fn contains(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(2), "clojure.core/contains?")?;
    Ok(Value::Bool(match &args[0] {
        Value::Map(_) => value::map_get(&args[0], &args[1]).is_some(),
        Value::Set(c) => c.items.iter().any(|v| equiv(v, &args[1])),
        Value::Vector(c) => matches!(args[1], Value::Long(i) if i >= 0 && (i as usize) < c.items.len()),
        _ => false,
    }))
}

fn first(vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary(vm, args, "clojure.core/first", rt::first)
}

fn next(vm: &mut Vm, args: &[Value]) -> NativeResult {
    unary(vm, args, "clojure.core/next", rt::next)
}

fn rest(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match unary(vm, args, "clojure.core/rest", rt::next)? {
        Value::Nil => Ok(Value::list(vec![])),
        more => Ok(more),
    }
}

fn seq(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/seq")?;
    match &args[0] {
        v if v.count() == Some(0) => Ok(Value::Nil),
        Value::List(c) | Value::Vector(c) | Value::Set(c) => Ok(Value::list(c.items.clone())),
        Value::Map(m) => Ok(Value::list(m.entries.iter().map(|(k, v)| Value::vector(vec![k.clone(), v.clone()])).collect())),
        Value::Str(s) => Ok(Value::list(s.chars().map(Value::Char).collect())),
        other => Err(illegal_argument(format!("Don't know how to create ISeq from: {}", other.type_name()))),
    }
}

fn is_empty(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/empty?")?;
    Ok(Value::Bool(args[0].count() == Some(0)))
}

fn cons(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(2), "clojure.core/cons")?;
    rt::cons(vm, args)
}

fn make_list(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::list(args.to_vec()))
}

fn make_vector(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::vector(args.to_vec()))
}

fn vec(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/vec")?;
    match &args[0] {
        Value::Nil => Ok(Value::vector(vec![])),
        Value::List(c) | Value::Vector(c) | Value::Set(c) => Ok(Value::vector(c.items.clone())),
        Value::Array(a) => Ok(Value::vector(a.borrow().clone())),
        other => Err(illegal_argument(format!("Don't know how to create ISeq from: {}", other.type_name()))),
    }
}

fn hash_map(_: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() % 2 != 0 {
        return Err(illegal_argument(format!("No value supplied for key: {}", args[args.len() - 1])));
    }
    Ok(Value::map(args.chunks(2).map(|kv| (kv[0].clone(), kv[1].clone())).collect()))
}

fn hash_set(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::set(args.to_vec()))
}

fn str_(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::from(args.iter().map(Value::to_str).collect::<String>()))
}

fn print_line(args: &[Value], readably: bool) -> NativeResult {
    let line: Vec<String> = args.iter().map(|a| if readably { a.to_string() } else { a.to_str() }).collect();
    let mut out = std::io::stdout();
    writeln!(out, "{}", line.join(" ")).map_err(|e| rt::exception("java.io.IOException", e.to_string()))?;
    Ok(Value::Nil)
}

fn println(_: &mut Vm, args: &[Value]) -> NativeResult {
    print_line(args, false)
}

fn prn(_: &mut Vm, args: &[Value]) -> NativeResult {
    print_line(args, true)
}

fn instance(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(2), "clojure.core/instance?")?;
    let Value::Class(c) = &args[0] else {
        return Err(rt::class_cast(&args[0], "java.lang.Class"));
    };
    Ok(Value::Bool(host().class_of(&args[1]).map_or(false, |k| c.is_assignable_from(&k))))
}

fn class(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/class")?;
    Ok(host().class_of(&args[0]).map(Value::Class).unwrap_or(Value::Nil))
}

fn apply(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, None, "clojure.core/apply")?;
    let mut call_args: Vec<Value> = args[1..args.len() - 1].to_vec();
    match &args[args.len() - 1] {
        Value::Nil => {}
        Value::List(c) | Value::Vector(c) | Value::Set(c) => call_args.extend(c.items.iter().cloned()),
        other => return Err(illegal_argument(format!("Don't know how to create ISeq from: {}", other.type_name()))),
    }
    vm.invoke(&args[0], &call_args)
}

fn keyword(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(2), "clojure.core/keyword")?;
    Ok(match args {
        [Value::Keyword(k)] => Value::Keyword(k.clone()),
        [name] => Value::from(Keyword::intern(&name.to_str())),
        [ns, name] => Value::from(Keyword { ns: Some(ns.to_str().into()), name: name.to_str().into() }),
        _ => Value::Nil,
    })
}

fn symbol(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(2), "clojure.core/symbol")?;
    Ok(match args {
        [Value::Symbol(s)] => Value::Symbol(s.clone()),
        [name] => Value::from(Symbol::intern(&name.to_str())),
        [ns, name] => Value::from(Symbol::qualified(&ns.to_str(), &name.to_str())),
        _ => Value::Nil,
    })
}

fn name(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/name")?;
    match &args[0] {
        Value::Str(_) => Ok(args[0].clone()),
        _ => rt::named_name(vm, args),
    }
}

fn gensym_fn(_: &mut Vm, args: &[Value]) -> NativeResult {
    let prefix = args.first().map(Value::to_str).unwrap_or_else(|| "G__".into());
    Ok(gensym(&prefix))
}

fn meta(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/meta")?;
    Ok(match &args[0] {
        Value::Var(v) => v.meta(),
        other => other.meta().cloned().unwrap_or(Value::Nil),
    })
}

fn with_meta(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(2), "clojure.core/with-meta")?;
    rt::coll_with_meta(vm, args)
}

fn deref(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/deref")?;
    match &args[0] {
        Value::Var(v) => v.deref(),
        other => Err(rt::class_cast(other, "clojure.lang.IDeref")),
    }
}

fn ex_message(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/ex-message")?;
    match &args[0] {
        Value::Object(o) if host().throwable().is_assignable_from(&o.class) => rt::get_message(vm, args),
        _ => Ok(Value::Nil),
    }
}

fn in_ns(vm: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "clojure.core/in-ns")?;
    match &args[0] {
        Value::Symbol(s) => {
            vm.namespaces().in_ns(&s.name);
            Ok(args[0].clone())
        }
        other => Err(rt::class_cast(other, "clojure.lang.Symbol")),
    }
}

// inliners

fn nary_inline(args: &[Value], method: &str) -> NativeResult {
    match args {
        [] => Err(arity_exception(0, method)),
        [x] => Ok(host_call("clojure.lang.Numbers", method, &[x.clone()])),
        [x, y, more @ ..] => {
            let mut acc = host_call("clojure.lang.Numbers", method, &[x.clone(), y.clone()]);
            for m in more {
                acc = host_call("clojure.lang.Numbers", method, &[acc, m.clone()]);
            }
            Ok(acc)
        }
    }
}

fn inline_add(_: &mut Vm, args: &[Value]) -> NativeResult {
    nary_inline(args, "add")
}

fn inline_minus(_: &mut Vm, args: &[Value]) -> NativeResult {
    nary_inline(args, "minus")
}

fn inline_multiply(_: &mut Vm, args: &[Value]) -> NativeResult {
    nary_inline(args, "multiply")
}

fn inline_divide(_: &mut Vm, args: &[Value]) -> NativeResult {
    nary_inline(args, "divide")
}

fn binary_inline(args: &[Value], class: &str, method: &str) -> NativeResult {
    check_arity(args, 2, Some(2), method)?;
    Ok(host_call(class, method, args))
}

fn inline_lt(_: &mut Vm, args: &[Value]) -> NativeResult {
    binary_inline(args, "clojure.lang.Numbers", "lt")
}

fn inline_gt(_: &mut Vm, args: &[Value]) -> NativeResult {
    binary_inline(args, "clojure.lang.Numbers", "gt")
}

fn inline_lte(_: &mut Vm, args: &[Value]) -> NativeResult {
    binary_inline(args, "clojure.lang.Numbers", "lte")
}

fn inline_gte(_: &mut Vm, args: &[Value]) -> NativeResult {
    binary_inline(args, "clojure.lang.Numbers", "gte")
}

fn inline_num_eq(_: &mut Vm, args: &[Value]) -> NativeResult {
    binary_inline(args, "clojure.lang.Numbers", "equiv")
}

fn inline_eq(_: &mut Vm, args: &[Value]) -> NativeResult {
    binary_inline(args, "clojure.lang.Util", "equiv")
}

fn inline_identical(_: &mut Vm, args: &[Value]) -> NativeResult {
    binary_inline(args, "clojure.lang.Util", "identical")
}

fn inline_rem(_: &mut Vm, args: &[Value]) -> NativeResult {
    binary_inline(args, "clojure.lang.Numbers", "remainder")
}

fn inline_nil(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 1, Some(1), "nil?")?;
    Ok(host_call("clojure.lang.Util", "identical", &[args[0].clone(), Value::Nil]))
}

fn unary_inline(args: &[Value], class: &str, method: &str) -> NativeResult {
    check_arity(args, 1, Some(1), method)?;
    Ok(host_call(class, method, args))
}

fn inline_inc(_: &mut Vm, args: &[Value]) -> NativeResult {
    unary_inline(args, "clojure.lang.Numbers", "inc")
}

fn inline_dec(_: &mut Vm, args: &[Value]) -> NativeResult {
    unary_inline(args, "clojure.lang.Numbers", "dec")
}

fn inline_zero(_: &mut Vm, args: &[Value]) -> NativeResult {
    unary_inline(args, "clojure.lang.Numbers", "isZero")
}

fn inline_pos(_: &mut Vm, args: &[Value]) -> NativeResult {
    unary_inline(args, "clojure.lang.Numbers", "isPos")
}

fn inline_neg(_: &mut Vm, args: &[Value]) -> NativeResult {
    unary_inline(args, "clojure.lang.Numbers", "isNeg")
}

fn inline_count(_: &mut Vm, args: &[Value]) -> NativeResult {
    unary_inline(args, "clojure.lang.RT", "count")
}

fn inline_nth(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(3), "nth")?;
    Ok(host_call("clojure.lang.RT", "nth", args))
}

fn inline_get(_: &mut Vm, args: &[Value]) -> NativeResult {
    check_arity(args, 2, Some(3), "get")?;
    Ok(host_call("clojure.lang.RT", "get", args))
}

fn arity_at_least(args: &[Value], n: i64) -> NativeResult {
    Ok(Value::Bool(matches!(args.first(), Some(Value::Long(a)) if *a >= n)))
}

fn more_than_one(_: &mut Vm, args: &[Value]) -> NativeResult {
    arity_at_least(args, 2)
}

fn more_than_zero(_: &mut Vm, args: &[Value]) -> NativeResult {
    arity_at_least(args, 1)
}

// macros

fn macro_args<'a>(args: &'a [Value], name: &str, min: usize) -> Result<(&'a Value, &'a [Value]), Value> {
    if args.len() < 2 + min {
        return Err(arity_exception(args.len(), name));
    }
    Ok((&args[0], &args[2..]))
}

fn form_with(head: &str, items: &[Value]) -> Value {
    let mut out = vec![sym(head)];
    out.extend(items.iter().cloned());
    list(out)
}

fn check_bindings(bindings: &Value, name: &str) -> Result<(), Value> {
    match bindings.vector_items() {
        None => Err(illegal_argument(format!("{} requires a vector for its binding", name))),
        Some(items) if items.len() % 2 != 0 => {
            Err(illegal_argument(format!("{} requires an even number of forms in binding vector", name)))
        }
        Some(_) => Ok(()),
    }
}

fn let_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/let", 1)?;
    check_bindings(&args[0], "let")?;
    Ok(form_with("let*", args))
}

fn loop_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/loop", 1)?;
    check_bindings(&args[0], "loop")?;
    Ok(form_with("loop*", args))
}

fn fn_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (form, args) = macro_args(args, "clojure.core/fn", 0)?;
    Ok(form_with("fn*", args).with_meta(form.meta().cloned()))
}

fn when_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/when", 1)?;
    Ok(list(vec![sym("if"), args[0].clone(), form_with("do", &args[1..])]))
}

fn when_not_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/when-not", 1)?;
    Ok(list(vec![sym("if"), args[0].clone(), Value::Nil, form_with("do", &args[1..])]))
}

fn if_not_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/if-not", 2)?;
    if args.len() > 3 {
        return Err(arity_exception(args.len() + 2, "clojure.core/if-not"));
    }
    let otherwise = args.get(2).cloned().unwrap_or(Value::Nil);
    Ok(list(vec![sym("if"), list(vec![sym("clojure.core/not"), args[0].clone()]), args[1].clone(), otherwise]))
}

fn cond_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, clauses) = macro_args(args, "clojure.core/cond", 0)?;
    if clauses.len() % 2 != 0 {
        return Err(illegal_argument("cond requires an even number of forms"));
    }
    Ok(clauses.chunks(2).rev().fold(Value::Nil, |otherwise, clause| {
        list(vec![sym("if"), clause[0].clone(), clause[1].clone(), otherwise])
    }))
}

fn and_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, xs) = macro_args(args, "clojure.core/and", 0)?;
    Ok(match xs {
        [] => Value::Bool(true),
        [x] => x.clone(),
        [x, rest @ ..] => {
            let g = gensym("and__");
            list(vec![
                sym("let*"),
                Value::vector(vec![g.clone(), x.clone()]),
                list(vec![sym("if"), g.clone(), form_with("clojure.core/and", rest), g]),
            ])
        }
    })
}

fn or_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, xs) = macro_args(args, "clojure.core/or", 0)?;
    Ok(match xs {
        [] => Value::Nil,
        [x] => x.clone(),
        [x, rest @ ..] => {
            let g = gensym("or__");
            list(vec![
                sym("let*"),
                Value::vector(vec![g.clone(), x.clone()]),
                list(vec![sym("if"), g.clone(), g, form_with("clojure.core/or", rest)]),
            ])
        }
    })
}

fn comment_macro(_: &mut Vm, _: &[Value]) -> NativeResult {
    Ok(Value::Nil)
}

fn thread(args: &[Value], name: &str, last: bool) -> NativeResult {
    let (_, args) = macro_args(args, name, 1)?;
    let mut acc = args[0].clone();
    for step in &args[1..] {
        acc = match step {
            Value::List(c) if !c.items.is_empty() => {
                let mut items = c.items.clone();
                if last {
                    items.push(acc);
                } else {
                    items.insert(1, acc);
                }
                Value::list(items).with_meta(c.meta.clone())
            }
            other => list(vec![other.clone(), acc]),
        };
    }
    Ok(acc)
}

fn thread_first(_: &mut Vm, args: &[Value]) -> NativeResult {
    thread(args, "clojure.core/->", false)
}

fn thread_last(_: &mut Vm, args: &[Value]) -> NativeResult {
    thread(args, "clojure.core/->>", true)
}

fn defn_parts(args: &[Value]) -> Result<(Symbol, Value, Vec<Value>), Value> {
    let Some(name) = args.first().and_then(Value::as_symbol) else {
        return Err(illegal_argument("First argument to defn must be a symbol"));
    };
    let mut meta = name.meta.clone().unwrap_or_else(|| Value::map(vec![]));
    let mut rest = &args[1..];
    if let Some(doc @ Value::Str(_)) = rest.first() {
        meta = map_assoc(Some(&meta), Value::kw("doc"), doc.clone());
        rest = &rest[1..];
    }
    if let Some(Value::Map(attrs)) = rest.first() {
        for (k, v) in &attrs.entries {
            meta = map_assoc(Some(&meta), k.clone(), v.clone());
        }
        rest = &rest[1..];
    }
    let sigs: Vec<Value> = match rest.first() {
        Some(Value::Vector(_)) => vec![list(rest.to_vec())],
        Some(Value::List(_)) => rest.to_vec(),
        _ => return Err(illegal_argument(format!("Parameter declaration missing for {}", name))),
    };
    Ok((name.with_meta(None), meta, sigs))
}

fn defn_form(name: Symbol, meta: Value, sigs: Vec<Value>) -> Value {
    let arglists: Vec<Value> = sigs.iter().filter_map(|s| s.list_items().and_then(|i| i.first().cloned())).collect();
    let meta = map_assoc(Some(&meta), Value::kw("arglists"), quote(list(arglists)));
    let mut fn_form = vec![sym("fn*"), Value::from(name.clone())];
    fn_form.extend(sigs);
    list(vec![sym("def"), Value::from(name.with_meta(Some(meta))), list(fn_form)])
}

fn defn_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/defn", 2)?;
    let (name, meta, sigs) = defn_parts(args)?;
    Ok(defn_form(name, meta, sigs))
}

fn defmacro_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/defmacro", 2)?;
    let (name, meta, sigs) = defn_parts(args)?;
    let sigs = sigs
        .into_iter()
        .map(|sig| match sig.list_items() {
            Some([Value::Vector(params), body @ ..]) => {
                let mut p = vec![sym("&form"), sym("&env")];
                p.extend(params.items.iter().cloned());
                let mut items = vec![Value::vector(p)];
                items.extend(body.iter().cloned());
                Ok(list(items))
            }
            _ => Err(illegal_argument(format!("Parameter declaration missing for {}", name))),
        })
        .collect::<Result<Vec<_>, Value>>()?;
    let meta = map_assoc(Some(&meta), Value::kw("macro"), Value::Bool(true));
    Ok(defn_form(name, meta, sigs))
}

fn letfn_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/letfn", 1)?;
    let Some(fnspecs) = args[0].vector_items() else {
        return Err(illegal_argument("letfn requires a vector for its binding"));
    };
    let mut bindings = Vec::new();
    for spec in fnspecs {
        match spec.list_items() {
            Some([name @ Value::Symbol(_), sigs @ ..]) => {
                let mut f = vec![sym("fn*"), name.clone()];
                f.extend(sigs.iter().cloned());
                bindings.push(name.clone());
                bindings.push(list(f));
            }
            _ => return Err(illegal_argument("letfn function specs must be (name [params] body)")),
        }
    }
    let mut out = vec![sym("letfn*"), Value::vector(bindings)];
    out.extend(args[1..].iter().cloned());
    Ok(list(out))
}

fn reify_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (form, args) = macro_args(args, "clojure.core/reify", 0)?;
    let mut interfaces = Vec::new();
    let mut methods = Vec::new();
    for a in args {
        match a {
            Value::Symbol(_) => interfaces.push(a.clone()),
            _ => methods.push(a.clone()),
        }
    }
    let mut out = vec![sym("reify*"), Value::vector(interfaces)];
    out.extend(methods);
    Ok(list(out).with_meta(form.meta().cloned()))
}

fn deftype_macro(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/deftype", 2)?;
    let Some(name) = args[0].as_symbol() else {
        return Err(illegal_argument("deftype name must be a symbol"));
    };
    let Some(fields) = args[1].vector_items() else {
        return Err(illegal_argument("deftype fields must be a vector"));
    };
    let ns = vm.namespaces().current().name.clone();
    let classname = format!("{}.{}", crate::vm::compiler::objexpr::munge(&ns), name.name);
    let mut interfaces = Vec::new();
    let mut methods = Vec::new();
    for a in &args[2..] {
        match a {
            Value::Symbol(_) => interfaces.push(a.clone()),
            _ => methods.push(a.clone()),
        }
    }
    let mut deftype = vec![
        sym("deftype*"),
        Value::from(Symbol::qualified(&ns, &name.name)),
        sym(&classname),
        args[1].clone(),
        Value::kw("implements"),
        Value::vector(interfaces),
    ];
    deftype.extend(methods);

    let params: Vec<Value> = fields.iter().map(|f| f.as_symbol().map(|s| Value::from(s.with_meta(None))).unwrap_or(Value::Nil)).collect();
    let mut ctor = vec![sym("new"), sym(&classname)];
    ctor.extend(params.iter().cloned());
    let factory_name = format!("->{}", name.name);
    let factory = list(vec![
        sym("def"),
        sym(&factory_name),
        list(vec![sym("fn*"), sym(&factory_name), list(vec![Value::vector(params), list(ctor)])]),
    ]);
    Ok(list(vec![
        sym("do"),
        list(deftype),
        list(vec![sym("import*"), Value::from(classname.as_str())]),
        factory,
        sym(&classname),
    ]))
}

const MAX_MASK_BITS: u32 = 13;
const MAX_SWITCH_TABLE_SIZE: i64 = 1 << MAX_MASK_BITS;

fn shift_mask(shift: u32, mask: i32, h: i32) -> i32 {
    (h >> shift) & mask
}

fn fits_table(keys: &[i32]) -> bool {
    match (keys.iter().min(), keys.iter().max()) {
        (Some(lo), Some(hi)) => (*hi as i64 - *lo as i64) < MAX_SWITCH_TABLE_SIZE,
        _ => true,
    }
}

fn min_hash(keys: &[i32]) -> Option<(u32, i32)> {
    for bits in 1..=MAX_MASK_BITS {
        let mask = (1i32 << bits) - 1;
        for shift in 0..31 {
            let mut seen: Vec<i32> = keys.iter().map(|k| shift_mask(shift, mask, *k)).collect();
            seen.sort_unstable();
            seen.dedup();
            if seen.len() == keys.len() {
                return Some((shift, mask));
            }
        }
    }
    None
}

struct CaseTable {
    shift: u32,
    mask: i32,
    entries: Vec<(i32, Value, Value)>,
    switch_type: &'static str,
    skip_check: Vec<i32>,
}

fn layout_case(entries: Vec<(i32, Value, Value)>, skip_check: Vec<i32>) -> CaseTable {
    let keys: Vec<i32> = entries.iter().map(|e| e.0).collect();
    if fits_table(&keys) {
        return CaseTable { shift: 0, mask: 0, entries, switch_type: "compact", skip_check };
    }
    match min_hash(&keys) {
        None => CaseTable { shift: 0, mask: 0, entries, switch_type: "sparse", skip_check },
        Some((shift, mask)) => CaseTable {
            shift,
            mask,
            entries: entries.into_iter().map(|(k, t, e)| (shift_mask(shift, mask, k), t, e)).collect(),
            switch_type: "compact",
            skip_check: skip_check.into_iter().map(|k| shift_mask(shift, mask, k)).collect(),
        },
    }
}

fn case_macro(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (_, args) = macro_args(args, "clojure.core/case", 1)?;
    let ge = gensym("case__");
    let clauses = &args[1..];
    let default = if clauses.len() % 2 == 1 {
        clauses[clauses.len() - 1].clone()
    } else {
        list(vec![
            sym("throw"),
            list(vec![
                sym("new"),
                sym("IllegalArgumentException"),
                list(vec![sym("clojure.core/str"), Value::from("No matching clause: "), ge.clone()]),
            ]),
        ])
    };

    let mut pairs: Vec<(Value, Value)> = Vec::new();
    for clause in clauses.chunks_exact(2) {
        let tests: Vec<Value> = match &clause[0] {
            Value::List(c) => c.items.clone(),
            t => vec![t.clone()],
        };
        for t in tests {
            if pairs.iter().any(|(seen, _)| equiv(seen, &t)) {
                return Err(illegal_argument(format!("Duplicate case test constant: {}", t)));
            }
            pairs.push((t, clause[1].clone()));
        }
    }

    let as_int = |t: &Value| match t {
        Value::Long(l) => i32::try_from(*l).ok(),
        _ => None,
    };
    let (test_type, table) = if !pairs.is_empty() && pairs.iter().all(|(t, _)| as_int(t).is_some()) {
        let entries = pairs.iter().filter_map(|(t, e)| as_int(t).map(|k| (k, t.clone(), e.clone()))).collect();
        ("int", layout_case(entries, vec![]))
    } else {
        let identity = !pairs.is_empty() && pairs.iter().all(|(t, _)| matches!(t, Value::Keyword(_)));
        let compare = if identity { "clojure.core/identical?" } else { "clojure.core/=" };
        let mut buckets: Vec<(i32, Vec<(Value, Value)>)> = Vec::new();
        for (t, e) in pairs {
            let h = value::hash(&t);
            match buckets.iter_mut().find(|(bh, _)| *bh == h) {
                Some((_, bucket)) => bucket.push((t, e)),
                None => buckets.push((h, vec![(t, e)])),
            }
        }
        let mut entries = Vec::new();
        let mut skip_check = Vec::new();
        for (h, bucket) in buckets {
            if let [(t, e)] = &bucket[..] {
                entries.push((h, t.clone(), e.clone()));
            } else {
                // colliding tests share one slot that re-dispatches sequentially
                let chain = bucket.iter().rev().fold(default.clone(), |otherwise, (t, e)| {
                    list(vec![sym("if"), list(vec![sym(compare), ge.clone(), quote(t.clone())]), e.clone(), otherwise])
                });
                entries.push((h, Value::Long(h as i64), chain));
                skip_check.push(h);
            }
        }
        (if identity { "hash-identity" } else { "hash-equiv" }, layout_case(entries, skip_check))
    };

    let mut entries = table.entries;
    entries.sort_by_key(|e| e.0);
    let imap = Value::map(
        entries.into_iter().map(|(k, t, e)| (Value::Long(k as i64), Value::vector(vec![t, e]))).collect(),
    );
    let mut case = vec![
        sym("case*"),
        ge.clone(),
        Value::Long(table.shift as i64),
        Value::Long(table.mask as i64),
        default,
        imap,
        Value::kw(table.switch_type),
        Value::kw(test_type),
    ];
    if test_type != "int" {
        case.push(Value::set(table.skip_check.into_iter().map(|k| Value::Long(k as i64)).collect()));
    }
    Ok(list(vec![sym("let*"), Value::vector(vec![ge, args[0].clone()]), list(case)]))
}

fn def_native(ns: &Namespace, name: &'static str, f: NativeFnPtr) {
    ns.intern(name).bind_root(Value::native(name, f));
}

fn def_inline(ns: &Namespace, name: &'static str, f: NativeFnPtr, inline: NativeFnPtr, arities: Option<NativeFnPtr>) {
    let var = ns.intern(name);
    var.bind_root(Value::native(name, f));
    var.alter_meta("inline", Value::native(name, inline));
    if let Some(pred) = arities {
        var.alter_meta("inline-arities", Value::native(name, pred));
    }
}

fn def_macro(ns: &Namespace, name: &'static str, f: NativeFnPtr) {
    let var = ns.intern(name);
    var.bind_root(Value::native(name, f));
    var.set_macro();
}

pub fn install(ns: &Namespace) {
    def_inline(ns, "+", plus, inline_add, Some(more_than_one));
    def_inline(ns, "-", minus, inline_minus, Some(more_than_zero));
    def_inline(ns, "*", times, inline_multiply, Some(more_than_one));
    def_inline(ns, "/", divide, inline_divide, Some(more_than_one));
    def_inline(ns, "<", lt, inline_lt, Some(exactly_two));
    def_inline(ns, ">", gt, inline_gt, Some(exactly_two));
    def_inline(ns, "<=", lte, inline_lte, Some(exactly_two));
    def_inline(ns, ">=", gte, inline_gte, Some(exactly_two));
    def_inline(ns, "==", num_eq, inline_num_eq, Some(exactly_two));
    def_inline(ns, "=", eq, inline_eq, Some(exactly_two));
    def_inline(ns, "identical?", identical, inline_identical, None);
    def_inline(ns, "nil?", is_nil, inline_nil, None);
    def_inline(ns, "inc", inc, inline_inc, None);
    def_inline(ns, "dec", dec, inline_dec, None);
    def_inline(ns, "zero?", zero, inline_zero, None);
    def_inline(ns, "pos?", pos, inline_pos, None);
    def_inline(ns, "neg?", neg, inline_neg, None);
    def_inline(ns, "rem", rem, inline_rem, None);
    def_inline(ns, "count", count, inline_count, None);
    def_inline(ns, "nth", nth, inline_nth, None);
    def_inline(ns, "get", get, inline_get, None);

    def_native(ns, "not", not);
    def_native(ns, "identity", rt::identity);
    def_native(ns, "conj", conj);
    def_native(ns, "assoc", assoc);
    def_native(ns, "contains?", contains);
    def_native(ns, "first", first);
    def_native(ns, "next", next);
    def_native(ns, "rest", rest);
    def_native(ns, "seq", seq);
    def_native(ns, "empty?", is_empty);
    def_native(ns, "cons", cons);
    def_native(ns, "list", make_list);
    def_native(ns, "vector", make_vector);
    def_native(ns, "vec", vec);
    def_native(ns, "hash-map", hash_map);
    def_native(ns, "hash-set", hash_set);
    def_native(ns, "str", str_);
    def_native(ns, "println", println);
    def_native(ns, "prn", prn);
    def_native(ns, "instance?", instance);
    def_native(ns, "class", class);
    def_native(ns, "apply", apply);
    def_native(ns, "keyword", keyword);
    def_native(ns, "symbol", symbol);
    def_native(ns, "name", name);
    def_native(ns, "gensym", gensym_fn);
    def_native(ns, "meta", meta);
    def_native(ns, "with-meta", with_meta);
    def_native(ns, "deref", deref);
    def_native(ns, "ex-message", ex_message);
    def_native(ns, "in-ns", in_ns);

    def_macro(ns, "let", let_macro);
    def_macro(ns, "loop", loop_macro);
    def_macro(ns, "fn", fn_macro);
    def_macro(ns, "defn", defn_macro);
    def_macro(ns, "defmacro", defmacro_macro);
    def_macro(ns, "when", when_macro);
    def_macro(ns, "when-not", when_not_macro);
    def_macro(ns, "if-not", if_not_macro);
    def_macro(ns, "cond", cond_macro);
    def_macro(ns, "and", and_macro);
    def_macro(ns, "or", or_macro);
    def_macro(ns, "case", case_macro);
    def_macro(ns, "letfn", letfn_macro);
    def_macro(ns, "comment", comment_macro);
    def_macro(ns, "deftype", deftype_macro);
    def_macro(ns, "reify", reify_macro);
    def_macro(ns, "->", thread_first);
    def_macro(ns, "->>", thread_last);
}

fn exactly_two(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(matches!(args.first(), Some(Value::Long(2)))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_one;

    fn expand(f: NativeFnPtr, src: &str) -> Value {
        let form = read_one(src).unwrap();
        let mut args = vec![form.clone(), Value::Nil];
        args.extend(form.list_items().unwrap()[1..].iter().cloned());
        f(&mut Vm::new(), &args).unwrap()
    }

    #[test]
    fn int_case_builds_a_compact_table() {
        let out = expand(case_macro, "(case x 1 :a 2 :b :c)");
        let case = &out.list_items().unwrap()[2];
        let items = case.list_items().unwrap();
        assert_eq!(items[0].to_string(), "case*");
        assert_eq!(items[6].to_string(), ":compact");
        assert_eq!(items[7].to_string(), ":int");
        assert_eq!(items[5].to_string(), "{1 [1 :a], 2 [2 :b]}");
    }

    #[test]
    fn keyword_case_tests_by_identity() {
        let out = expand(case_macro, "(case x :a 1 (:b :c) 2)");
        let items = out.list_items().unwrap()[2].list_items().unwrap().to_vec();
        assert_eq!(items[7].to_string(), ":hash-identity");
        assert_eq!(items[5].count(), Some(3));
    }

    #[test]
    fn wide_int_keys_get_shift_mask_or_sparse() {
        let out = expand(case_macro, "(case x 1 :a 100000 :b 0)");
        let items = out.list_items().unwrap()[2].list_items().unwrap().to_vec();
        let shift = &items[2];
        let mask = &items[3];
        assert!(matches!(mask, Value::Long(m) if *m > 0) || items[6].to_string() == ":sparse");
        assert!(matches!(shift, Value::Long(_)));
    }

    #[test]
    fn duplicate_case_constants_are_rejected() {
        let form = read_one("(case x 1 :a 1 :b)").unwrap();
        let mut args = vec![form.clone(), Value::Nil];
        args.extend(form.list_items().unwrap()[1..].iter().cloned());
        assert!(case_macro(&mut Vm::new(), &args).is_err());
    }

    #[test]
    fn defn_records_arglists() {
        let out = expand(defn_macro, "(defn f \"doc\" [x] x)");
        assert_eq!(out.list_items().unwrap()[0].to_string(), "def");
        let name = &out.list_items().unwrap()[1];
        assert_eq!(name.meta_get("arglists").map(|a| a.to_string()), Some("(quote ([x]))".into()));
        assert_eq!(name.meta_get("doc").map(|a| a.to_string()), Some("\"doc\"".into()));
    }

    #[test]
    fn inliners_expand_to_host_calls() {
        let out = inline_add(&mut Vm::new(), &[Value::sym("a"), Value::sym("b"), Value::Long(1)]).unwrap();
        assert_eq!(
            out.to_string(),
            "(. clojure.lang.Numbers (add (. clojure.lang.Numbers (add a b)) 1))"
        );
    }
}
