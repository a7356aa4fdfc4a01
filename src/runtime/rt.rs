use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::value::{self, equiv, map_assoc, map_get, NativeResult, Object, Value};
use crate::vm::vm::Vm;

use super::host::host;

thread_local! {
    static NEXT_ID: Cell<u64> = const { Cell::new(0) };
}

pub fn next_id() -> u64 {
    NEXT_ID.with(|id| {
        let next = id.get() + 1;
        id.set(next);
        next
    })
}

pub fn exception(class_name: &str, msg: impl Into<String>) -> Value {
    let registry = host();
    let class = registry.get(class_name).unwrap_or_else(|| registry.throwable());
    let msg: String = msg.into();
    Value::Object(Rc::new(Object { class, fields: RefCell::new(vec![Value::from(msg), Value::Nil]), meta: None }))
}

pub fn illegal_argument(msg: impl Into<String>) -> Value {
    exception("java.lang.IllegalArgumentException", msg)
}

pub fn illegal_state(msg: impl Into<String>) -> Value {
    exception("java.lang.IllegalStateException", msg)
}

pub fn unsupported(msg: impl Into<String>) -> Value {
    exception("java.lang.UnsupportedOperationException", msg)
}

pub fn class_cast(v: &Value, target: &str) -> Value {
    let from = host().class_of(v).map_or_else(|| "nil".to_string(), |c| c.name.clone());
    exception("java.lang.ClassCastException", format!("{} cannot be cast to {}", from, target))
}

pub fn arity_exception(actual: usize, name: &str) -> Value {
    exception("clojure.lang.ArityException", format!("Wrong number of args ({}) passed to: {}", actual, name))
}

pub fn arity_exception_parts(exception: &Value) -> Option<(usize, String)> {
    let Value::Object(o) = exception else { return None };
    if o.class.name != "clojure.lang.ArityException" {
        return None;
    }
    let msg = o.fields.borrow().first().map(|m| m.to_str())?;
    let rest = msg.strip_prefix("Wrong number of args (")?;
    let close = rest.find(')')?;
    let actual = rest[..close].parse().ok()?;
    let name = rest[close..].trim_start_matches(") passed to: ").to_string();
    Some((actual, name))
}

fn arg(args: &[Value], i: usize) -> &Value {
    args.get(i).unwrap_or(&Value::Nil)
}

pub fn throwable_new(_: &mut Vm, args: &[Value]) -> NativeResult {
    // constructed by the VM with the class prepended
    let Value::Class(class) = arg(args, 0) else {
        return Err(illegal_argument("Exception constructor needs a class"));
    };
    let msg = arg(args, 1).clone();
    let cause = arg(args, 2).clone();
    Ok(Value::Object(Rc::new(Object { class: class.clone(), fields: RefCell::new(vec![msg, cause]), meta: None })))
}

pub fn arity_exception_new(_: &mut Vm, args: &[Value]) -> NativeResult {
    let actual = match arg(args, 1) {
        Value::Long(l) => *l as usize,
        other => return Err(class_cast(other, "int")),
    };
    Ok(arity_exception(actual, &arg(args, 2).to_str()))
}

pub fn get_message(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Object(o) => Ok(o.fields.borrow().first().cloned().unwrap_or(Value::Nil)),
        other => Err(class_cast(other, "java.lang.Throwable")),
    }
}

pub fn get_cause(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Object(o) => Ok(o.fields.borrow().get(1).cloned().unwrap_or(Value::Nil)),
        other => Err(class_cast(other, "java.lang.Throwable")),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Num {
    L(i64),
    D(f64),
}

fn num(v: &Value) -> Result<Num, Value> {
    match v {
        Value::Long(l) => Ok(Num::L(*l)),
        Value::Double(d) => Ok(Num::D(*d)),
        Value::Nil => Err(exception("java.lang.NullPointerException", "Cannot perform arithmetic on nil")),
        other => Err(class_cast(other, "java.lang.Number")),
    }
}

fn num_value(n: Num) -> Value {
    match n {
        Num::L(l) => Value::Long(l),
        Num::D(d) => Value::Double(d),
    }
}

fn as_f64(n: Num) -> f64 {
    match n {
        Num::L(l) => l as f64,
        Num::D(d) => d,
    }
}

fn overflow() -> Value {
    exception("java.lang.ArithmeticException", "integer overflow")
}

fn arith(
    args: &[Value],
    long_op: fn(i64, i64) -> Option<i64>,
    double_op: fn(f64, f64) -> f64,
) -> NativeResult {
    match (num(arg(args, 0))?, num(arg(args, 1))?) {
        (Num::L(a), Num::L(b)) => long_op(a, b).map(Value::Long).ok_or_else(overflow),
        (a, b) => Ok(Value::Double(double_op(as_f64(a), as_f64(b)))),
    }
}

pub fn add(_: &mut Vm, args: &[Value]) -> NativeResult {
    arith(args, i64::checked_add, |a, b| a + b)
}

pub fn minus(_: &mut Vm, args: &[Value]) -> NativeResult {
    if args.len() == 1 {
        return match num(arg(args, 0))? {
            Num::L(a) => a.checked_neg().map(Value::Long).ok_or_else(overflow),
            Num::D(d) => Ok(Value::Double(-d)),
        };
    }
    arith(args, i64::checked_sub, |a, b| a - b)
}

pub fn multiply(_: &mut Vm, args: &[Value]) -> NativeResult {
    arith(args, i64::checked_mul, |a, b| a * b)
}

pub fn divide(_: &mut Vm, args: &[Value]) -> NativeResult {
    match (num(arg(args, 0))?, num(arg(args, 1))?) {
        (Num::L(_), Num::L(0)) => Err(exception("java.lang.ArithmeticException", "Divide by zero")),
        (Num::L(a), Num::L(b)) if a % b == 0 => Ok(Value::Long(a / b)),
        (a, b) => Ok(Value::Double(as_f64(a) / as_f64(b))),
    }
}

pub fn remainder(_: &mut Vm, args: &[Value]) -> NativeResult {
    match (num(arg(args, 0))?, num(arg(args, 1))?) {
        (Num::L(_), Num::L(0)) => Err(exception("java.lang.ArithmeticException", "Divide by zero")),
        (Num::L(a), Num::L(b)) => Ok(Value::Long(a % b)),
        (a, b) => Ok(Value::Double(as_f64(a) % as_f64(b))),
    }
}

pub fn inc(_: &mut Vm, args: &[Value]) -> NativeResult {
    match num(arg(args, 0))? {
        Num::L(a) => a.checked_add(1).map(Value::Long).ok_or_else(overflow),
        Num::D(d) => Ok(Value::Double(d + 1.0)),
    }
}

pub fn dec(_: &mut Vm, args: &[Value]) -> NativeResult {
    match num(arg(args, 0))? {
        Num::L(a) => a.checked_sub(1).map(Value::Long).ok_or_else(overflow),
        Num::D(d) => Ok(Value::Double(d - 1.0)),
    }
}

fn compare(args: &[Value], long_cmp: fn(&i64, &i64) -> bool, double_cmp: fn(&f64, &f64) -> bool) -> NativeResult {
    Ok(Value::Bool(match (num(arg(args, 0))?, num(arg(args, 1))?) {
        (Num::L(a), Num::L(b)) => long_cmp(&a, &b),
        (a, b) => double_cmp(&as_f64(a), &as_f64(b)),
    }))
}

pub fn lt(_: &mut Vm, args: &[Value]) -> NativeResult {
    compare(args, i64::lt, f64::lt)
}

pub fn gt(_: &mut Vm, args: &[Value]) -> NativeResult {
    compare(args, i64::gt, f64::gt)
}

pub fn lte(_: &mut Vm, args: &[Value]) -> NativeResult {
    compare(args, i64::le, f64::le)
}

pub fn gte(_: &mut Vm, args: &[Value]) -> NativeResult {
    compare(args, i64::ge, f64::ge)
}

pub fn num_equiv(_: &mut Vm, args: &[Value]) -> NativeResult {
    compare(args, i64::eq, f64::eq)
}

pub fn is_zero(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(match num(arg(args, 0))? {
        Num::L(a) => a == 0,
        Num::D(d) => d == 0.0,
    }))
}

pub fn is_pos(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(as_f64(num(arg(args, 0))?) > 0.0))
}

pub fn is_neg(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(as_f64(num(arg(args, 0))?) < 0.0))
}

pub fn abs(_: &mut Vm, args: &[Value]) -> NativeResult {
    match num(arg(args, 0))? {
        Num::L(a) => a.checked_abs().map(Value::Long).ok_or_else(overflow),
        Num::D(d) => Ok(Value::Double(d.abs())),
    }
}

pub fn max(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (a, b) = (num(arg(args, 0))?, num(arg(args, 1))?);
    Ok(num_value(if as_f64(a) >= as_f64(b) { a } else { b }))
}

pub fn min(_: &mut Vm, args: &[Value]) -> NativeResult {
    let (a, b) = (num(arg(args, 0))?, num(arg(args, 1))?);
    Ok(num_value(if as_f64(a) <= as_f64(b) { a } else { b }))
}

pub fn sqrt(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Double(as_f64(num(arg(args, 0))?).sqrt()))
}

pub fn long_cast(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Long(l) => Ok(Value::Long(*l)),
        Value::Double(d) => Ok(Value::Long(*d as i64)),
        Value::Char(c) => Ok(Value::Long(*c as i64)),
        other => Err(class_cast(other, "long")),
    }
}

pub fn int_cast(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Long(l) if i32::try_from(*l).is_ok() => Ok(Value::Long(*l)),
        Value::Long(l) => Err(illegal_argument(format!("Value out of range for int: {}", l))),
        Value::Double(d) => Ok(Value::Long(*d as i32 as i64)),
        Value::Char(c) => Ok(Value::Long(*c as i64)),
        other => Err(class_cast(other, "int")),
    }
}

pub fn double_cast(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Long(l) => Ok(Value::Double(*l as f64)),
        Value::Double(d) => Ok(Value::Double(*d)),
        other => Err(class_cast(other, "double")),
    }
}

pub fn boolean_cast(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(arg(args, 0).is_truthy()))
}

pub fn identity(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(arg(args, 0).clone())
}

pub fn util_equiv(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(equiv(arg(args, 0), arg(args, 1))))
}

pub fn util_identical(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(value::identical(arg(args, 0), arg(args, 1))))
}

pub fn util_hash(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Long(value::hash(arg(args, 0)) as i64))
}

pub fn to_string(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::from(arg(args, 0).to_str()))
}

pub fn count(vm: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Object(_) => vm.invoke_member(arg(args, 0), "count", &[]),
        v => v
            .count()
            .map(|n| Value::Long(n as i64))
            .ok_or_else(|| unsupported(format!("count not supported on this type: {}", v.type_name()))),
    }
}

pub fn nth(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let idx = match arg(args, 1) {
        Value::Long(i) => *i,
        other => return Err(class_cast(other, "int")),
    };
    let coll = arg(args, 0);
    if let Value::Object(_) = coll {
        return vm.invoke_member(coll, "nth", &args[1..]);
    }
    let item = match coll {
        Value::List(c) | Value::Vector(c) => usize::try_from(idx).ok().and_then(|i| c.items.get(i).cloned()),
        Value::Str(s) => usize::try_from(idx).ok().and_then(|i| s.chars().nth(i)).map(Value::Char),
        Value::Array(a) => usize::try_from(idx).ok().and_then(|i| a.borrow().get(i).cloned()),
        Value::Nil => Some(Value::Nil),
        other => return Err(unsupported(format!("nth not supported on this type: {}", other.type_name()))),
    };
    match (item, args.get(2)) {
        (Some(v), _) => Ok(v),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(exception("java.lang.IndexOutOfBoundsException", idx.to_string())),
    }
}

pub fn get(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let (coll, key) = (arg(args, 0), arg(args, 1));
    let not_found = arg(args, 2).clone();
    let found = match coll {
        Value::Map(_) => map_get(coll, key).cloned(),
        Value::Set(c) => c.items.iter().find(|v| equiv(v, key)).cloned(),
        Value::Vector(c) => match key {
            Value::Long(i) => usize::try_from(*i).ok().and_then(|i| c.items.get(i).cloned()),
            _ => None,
        },
        Value::Object(_) => return vm.keyword_lookup(coll, key, not_found),
        _ => None,
    };
    Ok(found.unwrap_or(not_found))
}

pub fn first(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(match arg(args, 0) {
        Value::List(c) | Value::Vector(c) | Value::Set(c) => c.items.first().cloned().unwrap_or(Value::Nil),
        Value::Map(m) => m.entries.first().map(|(k, v)| Value::vector(vec![k.clone(), v.clone()])).unwrap_or(Value::Nil),
        Value::Nil => Value::Nil,
        other => return Err(illegal_argument(format!("Don't know how to create ISeq from: {}", other.type_name()))),
    })
}

pub fn next(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(match arg(args, 0) {
        Value::List(c) | Value::Vector(c) | Value::Set(c) if c.items.len() > 1 => Value::list(c.items[1..].to_vec()),
        Value::Map(m) if m.entries.len() > 1 => Value::list(
            m.entries[1..].iter().map(|(k, v)| Value::vector(vec![k.clone(), v.clone()])).collect(),
        ),
        Value::List(_) | Value::Vector(_) | Value::Set(_) | Value::Map(_) | Value::Nil => Value::Nil,
        other => return Err(illegal_argument(format!("Don't know how to create ISeq from: {}", other.type_name()))),
    })
}

pub fn cons(_: &mut Vm, args: &[Value]) -> NativeResult {
    let mut items = vec![arg(args, 0).clone()];
    match arg(args, 1) {
        Value::Nil => {}
        Value::List(c) | Value::Vector(c) | Value::Set(c) => items.extend(c.items.iter().cloned()),
        other => return Err(illegal_argument(format!("Don't know how to create ISeq from: {}", other.type_name()))),
    }
    Ok(Value::list(items))
}

pub fn conj(vm: &mut Vm, args: &[Value]) -> NativeResult {
    let coll = arg(args, 0);
    let x = arg(args, 1).clone();
    Ok(match coll {
        Value::Nil => Value::list(vec![x]),
        Value::List(c) => {
            let mut items = vec![x];
            items.extend(c.items.iter().cloned());
            Value::list(items)
        }
        Value::Vector(c) => {
            let mut items = c.items.clone();
            items.push(x);
            Value::vector(items)
        }
        Value::Set(c) => {
            let mut items = c.items.clone();
            items.push(x);
            Value::set(items)
        }
        Value::Map(m) => match x.vector_items() {
            Some([k, v]) => map_assoc(Some(coll), k.clone(), v.clone()).with_meta(m.meta.clone()),
            _ => return Err(illegal_argument("Vector arg to map conj must be a pair")),
        },
        Value::Object(_) => return vm.invoke_member(coll, "cons", &[x]),
        other => return Err(unsupported(format!("conj not supported on this type: {}", other.type_name()))),
    })
}

pub fn box_value(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(arg(args, 0).clone())
}

pub fn str_length(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Str(s) => Ok(Value::Long(s.chars().count() as i64)),
        other => Err(class_cast(other, "java.lang.String")),
    }
}

pub fn str_upper(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Str(s) => Ok(Value::from(s.to_uppercase())),
        other => Err(class_cast(other, "java.lang.String")),
    }
}

pub fn str_concat(_: &mut Vm, args: &[Value]) -> NativeResult {
    match (arg(args, 0), arg(args, 1)) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::from(format!("{}{}", a, b))),
        (a, _) => Err(class_cast(a, "java.lang.String")),
    }
}

pub fn str_char_at(_: &mut Vm, args: &[Value]) -> NativeResult {
    match (arg(args, 0), arg(args, 1)) {
        (Value::Str(s), Value::Long(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(Value::Char)
            .ok_or_else(|| exception("java.lang.StringIndexOutOfBoundsException", i.to_string())),
        (a, _) => Err(class_cast(a, "java.lang.String")),
    }
}

pub fn str_substring(_: &mut Vm, args: &[Value]) -> NativeResult {
    let Value::Str(s) = arg(args, 0) else {
        return Err(class_cast(arg(args, 0), "java.lang.String"));
    };
    let chars: Vec<char> = s.chars().collect();
    let start = match arg(args, 1) {
        Value::Long(i) => *i as usize,
        other => return Err(class_cast(other, "int")),
    };
    let end = match args.get(2) {
        Some(Value::Long(i)) => *i as usize,
        Some(other) => return Err(class_cast(other, "int")),
        None => chars.len(),
    };
    if start > end || end > chars.len() {
        return Err(exception("java.lang.StringIndexOutOfBoundsException", format!("begin {}, end {}", start, end)));
    }
    Ok(Value::from(chars[start..end].iter().collect::<String>()))
}

pub fn str_index_of(_: &mut Vm, args: &[Value]) -> NativeResult {
    match (arg(args, 0), arg(args, 1)) {
        (Value::Str(s), Value::Str(needle)) => Ok(Value::Long(
            s.find(&**needle).map(|b| s[..b].chars().count() as i64).unwrap_or(-1),
        )),
        (a, _) => Err(class_cast(a, "java.lang.String")),
    }
}

pub fn parse_long(_: &mut Vm, args: &[Value]) -> NativeResult {
    let s = arg(args, 0).to_str();
    s.trim()
        .parse::<i64>()
        .map(Value::Long)
        .map_err(|_| exception("java.lang.NumberFormatException", format!("For input string: \"{}\"", s)))
}

pub fn parse_double(_: &mut Vm, args: &[Value]) -> NativeResult {
    let s = arg(args, 0).to_str();
    s.trim()
        .parse::<f64>()
        .map(Value::Double)
        .map_err(|_| exception("java.lang.NumberFormatException", format!("For input string: \"{}\"", s)))
}

pub fn is_nan(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(matches!(arg(args, 0), Value::Double(d) if d.is_nan())))
}

pub fn class_name(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Class(c) => Ok(Value::from(c.name.as_str())),
        other => Err(class_cast(other, "java.lang.Class")),
    }
}

pub fn named_name(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Keyword(k) => Ok(Value::from(&*k.name)),
        Value::Symbol(s) => Ok(Value::from(&*s.name)),
        other => Err(class_cast(other, "clojure.lang.Named")),
    }
}

pub fn var_deref(_: &mut Vm, args: &[Value]) -> NativeResult {
    match arg(args, 0) {
        Value::Var(v) => v.deref(),
        other => Err(class_cast(other, "clojure.lang.Var")),
    }
}

pub fn object_hash_code(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Long(value::hash(arg(args, 0)) as i64))
}

pub fn object_equals(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(Value::Bool(equiv(arg(args, 0), arg(args, 1))))
}

pub fn number_long_value(vm: &mut Vm, args: &[Value]) -> NativeResult {
    long_cast(vm, args)
}

pub fn number_double_value(vm: &mut Vm, args: &[Value]) -> NativeResult {
    double_cast(vm, args)
}

pub fn coll_meta(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(arg(args, 0).meta().cloned().unwrap_or(Value::Nil))
}

pub fn coll_with_meta(_: &mut Vm, args: &[Value]) -> NativeResult {
    let meta = match arg(args, 1) {
        Value::Nil => None,
        m => Some(m.clone()),
    };
    Ok(arg(args, 0).with_meta(meta))
}

pub fn coll_val_at(vm: &mut Vm, args: &[Value]) -> NativeResult {
    get(vm, args)
}

pub fn coll_cons(vm: &mut Vm, args: &[Value]) -> NativeResult {
    conj(vm, args)
}

pub fn coll_empty(_: &mut Vm, args: &[Value]) -> NativeResult {
    Ok(match arg(args, 0) {
        Value::List(_) => Value::list(vec![]),
        Value::Vector(_) => Value::vector(vec![]),
        Value::Map(_) => Value::map(vec![]),
        Value::Set(_) => Value::set(vec![]),
        _ => Value::Nil,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_arithmetic_overflows_loudly() {
        let mut vm = Vm::new();
        let r = add(&mut vm, &[Value::Long(i64::MAX), Value::Long(1)]);
        assert!(r.is_err());
        let r = add(&mut vm, &[Value::Long(2), Value::Double(0.5)]).unwrap();
        assert!(matches!(r, Value::Double(d) if d == 2.5));
    }

    #[test]
    fn exact_division_stays_integral() {
        let mut vm = Vm::new();
        assert!(matches!(divide(&mut vm, &[Value::Long(6), Value::Long(3)]), Ok(Value::Long(2))));
        assert!(matches!(divide(&mut vm, &[Value::Long(1), Value::Long(2)]), Ok(Value::Double(_))));
        assert!(divide(&mut vm, &[Value::Long(1), Value::Long(0)]).is_err());
    }

    #[test]
    fn arity_exception_round_trips_its_parts() {
        let e = arity_exception(4, "user/m");
        assert_eq!(arity_exception_parts(&e), Some((4, "user/m".to_string())));
    }
}
