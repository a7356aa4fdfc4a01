use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use derive_more::From;

use crate::runtime::host::Class;
use crate::runtime::namespace::Var;
use crate::vm::vm::Vm;

pub type NativeResult = Result<Value, Value>;
pub type NativeFnPtr = fn(&mut Vm, &[Value]) -> NativeResult;

pub struct NativeFn {
    pub name: &'static str,
    pub func: NativeFnPtr,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Keyword {
    pub ns: Option<Rc<str>>,
    pub name: Rc<str>,
}

impl Keyword {
    pub fn intern(name: &str) -> Keyword {
        match split_ns(name) {
            (Some(ns), n) => Keyword { ns: Some(ns.into()), name: n.into() },
            (None, n) => Keyword { ns: None, name: n.into() },
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, ":{}/{}", ns, self.name),
            None => write!(f, ":{}", self.name),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Symbol {
    pub ns: Option<Rc<str>>,
    pub name: Rc<str>,
    pub meta: Option<Value>,
}

impl Symbol {
    pub fn intern(name: &str) -> Symbol {
        match split_ns(name) {
            (Some(ns), n) => Symbol { ns: Some(ns.into()), name: n.into(), meta: None },
            (None, n) => Symbol { ns: None, name: n.into(), meta: None },
        }
    }

    pub fn simple(name: &str) -> Symbol {
        Symbol { ns: None, name: name.into(), meta: None }
    }

    pub fn qualified(ns: &str, name: &str) -> Symbol {
        Symbol { ns: Some(ns.into()), name: name.into(), meta: None }
    }

    pub fn with_meta(&self, meta: Option<Value>) -> Symbol {
        Symbol { ns: self.ns.clone(), name: self.name.clone(), meta }
    }

    pub fn is(&self, name: &str) -> bool {
        self.ns.is_none() && &*self.name == name
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ns == other.ns && self.name == other.name
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.ns.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.ns {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

fn split_ns(name: &str) -> (Option<&str>, &str) {
    // "/" alone and "ns//" name the division symbol
    if name.len() > 1 {
        if let Some(pos) = name.find('/') {
            if pos > 0 && pos + 1 < name.len() {
                return (Some(&name[..pos]), &name[pos + 1..]);
            }
        }
    }
    (None, name)
}

#[derive(Clone, Debug)]
pub struct Coll {
    pub items: Vec<Value>,
    pub meta: Option<Value>,
}

#[derive(Clone, Debug)]
pub struct MapColl {
    pub entries: Vec<(Value, Value)>,
    pub meta: Option<Value>,
}

pub struct Object {
    pub class: Rc<Class>,
    pub fields: RefCell<Vec<Value>>,
    pub meta: Option<Value>,
}

#[derive(Clone, From)]
pub enum Value {
    #[from(skip)]
    Nil,
    Bool(bool),
    Long(i64),
    Double(f64),
    Char(char),
    #[from(skip)]
    Str(Rc<str>),
    #[from(skip)]
    Symbol(Rc<Symbol>),
    #[from(skip)]
    Keyword(Rc<Keyword>),
    #[from(skip)]
    List(Rc<Coll>),
    #[from(skip)]
    Vector(Rc<Coll>),
    #[from(skip)]
    Map(Rc<MapColl>),
    #[from(skip)]
    Set(Rc<Coll>),
    Var(Rc<Var>),
    Class(Rc<Class>),
    Object(Rc<Object>),
    Native(Rc<NativeFn>),
    #[from(skip)]
    Array(Rc<RefCell<Vec<Value>>>),
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into())
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(Rc::new(s))
    }
}

impl From<Keyword> for Value {
    fn from(k: Keyword) -> Self {
        Value::Keyword(Rc::new(k))
    }
}

impl Value {
    pub fn sym(name: &str) -> Value {
        Value::Symbol(Rc::new(Symbol::intern(name)))
    }

    pub fn kw(name: &str) -> Value {
        Value::Keyword(Rc::new(Keyword::intern(name)))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(Coll { items, meta: None }))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Rc::new(Coll { items, meta: None }))
    }

    pub fn map(entries: Vec<(Value, Value)>) -> Value {
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            match out.iter_mut().find(|(ek, _)| equiv(ek, &k)) {
                Some(slot) => slot.1 = v,
                None => out.push((k, v)),
            }
        }
        Value::Map(Rc::new(MapColl { entries: out, meta: None }))
    }

    pub fn set(items: Vec<Value>) -> Value {
        let mut out: Vec<Value> = Vec::with_capacity(items.len());
        for v in items {
            if !out.iter().any(|e| equiv(e, &v)) {
                out.push(v);
            }
        }
        Value::Set(Rc::new(Coll { items: out, meta: None }))
    }

    pub fn native(name: &'static str, func: NativeFnPtr) -> Value {
        Value::Native(Rc::new(NativeFn { name, func }))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_keyword(&self) -> Option<&Keyword> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    pub fn seq_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(c) | Value::Vector(c) => Some(&c.items),
            _ => None,
        }
    }

    pub fn list_items(&self) -> Option<&[Value]> {
        match self {
            Value::List(c) => Some(&c.items),
            _ => None,
        }
    }

    pub fn vector_items(&self) -> Option<&[Value]> {
        match self {
            Value::Vector(c) => Some(&c.items),
            _ => None,
        }
    }

    pub fn is_coll(&self) -> bool {
        matches!(self, Value::List(_) | Value::Vector(_) | Value::Map(_) | Value::Set(_))
    }

    pub fn count(&self) -> Option<usize> {
        match self {
            Value::Nil => Some(0),
            Value::List(c) | Value::Vector(c) | Value::Set(c) => Some(c.items.len()),
            Value::Map(m) => Some(m.entries.len()),
            Value::Str(s) => Some(s.chars().count()),
            Value::Array(a) => Some(a.borrow().len()),
            _ => None,
        }
    }

    pub fn meta(&self) -> Option<&Value> {
        match self {
            Value::Symbol(s) => s.meta.as_ref(),
            Value::List(c) | Value::Vector(c) | Value::Set(c) => c.meta.as_ref(),
            Value::Map(m) => m.meta.as_ref(),
            Value::Object(o) => o.meta.as_ref(),
            _ => None,
        }
    }

    pub fn with_meta(&self, meta: Option<Value>) -> Value {
        match self {
            Value::Symbol(s) => Value::Symbol(Rc::new(s.with_meta(meta))),
            Value::List(c) => Value::List(Rc::new(Coll { items: c.items.clone(), meta })),
            Value::Vector(c) => Value::Vector(Rc::new(Coll { items: c.items.clone(), meta })),
            Value::Set(c) => Value::Set(Rc::new(Coll { items: c.items.clone(), meta })),
            Value::Map(m) => Value::Map(Rc::new(MapColl { entries: m.entries.clone(), meta })),
            Value::Object(o) => Value::Object(Rc::new(Object {
                class: o.class.clone(),
                fields: RefCell::new(o.fields.borrow().clone()),
                meta,
            })),
            other => other.clone(),
        }
    }

    pub fn meta_get(&self, key: &str) -> Option<Value> {
        self.meta().and_then(|m| map_get_kw(m, key))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "java.lang.Boolean",
            Value::Long(_) => "java.lang.Long",
            Value::Double(_) => "java.lang.Double",
            Value::Char(_) => "java.lang.Character",
            Value::Str(_) => "java.lang.String",
            Value::Symbol(_) => "clojure.lang.Symbol",
            Value::Keyword(_) => "clojure.lang.Keyword",
            Value::List(_) => "clojure.lang.PersistentList",
            Value::Vector(_) => "clojure.lang.PersistentVector",
            Value::Map(_) => "clojure.lang.PersistentArrayMap",
            Value::Set(_) => "clojure.lang.PersistentHashSet",
            Value::Var(_) => "clojure.lang.Var",
            Value::Class(_) => "java.lang.Class",
            Value::Object(_) => "java.lang.Object",
            Value::Native(_) => "clojure.lang.AFn",
            Value::Array(_) => "[Ljava.lang.Object;",
        }
    }

    pub fn to_str(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Str(s) => s.to_string(),
            Value::Char(c) => c.to_string(),
            other => other.to_string(),
        }
    }
}

pub fn map_get<'a>(map: &'a Value, key: &Value) -> Option<&'a Value> {
    match map {
        Value::Map(m) => m.entries.iter().find(|(k, _)| equiv(k, key)).map(|(_, v)| v),
        _ => None,
    }
}

pub fn map_get_kw(map: &Value, key: &str) -> Option<Value> {
    match map {
        Value::Map(m) => m
            .entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Keyword(kw) if kw.ns.is_none() && &*kw.name == key))
            .map(|(_, v)| v.clone()),
        _ => None,
    }
}

pub fn map_assoc(map: Option<&Value>, key: Value, val: Value) -> Value {
    let mut entries = match map {
        Some(Value::Map(m)) => m.entries.clone(),
        _ => Vec::new(),
    };
    match entries.iter_mut().find(|(k, _)| equiv(k, &key)) {
        Some(slot) => slot.1 = val,
        None => entries.push((key, val)),
    }
    Value::Map(Rc::new(MapColl { entries, meta: None }))
}

pub fn map_without(map: &Value, key: &Value) -> Value {
    match map {
        Value::Map(m) => {
            let entries = m.entries.iter().filter(|(k, _)| !equiv(k, key)).cloned().collect();
            Value::Map(Rc::new(MapColl { entries, meta: m.meta.clone() }))
        }
        other => other.clone(),
    }
}

pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Long(x), Value::Long(y)) => x == y,
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Keyword(x), Value::Keyword(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => Rc::ptr_eq(x, y),
        (Value::Symbol(x), Value::Symbol(y)) => Rc::ptr_eq(x, y),
        (Value::List(x), Value::List(y))
        | (Value::Vector(x), Value::Vector(y))
        | (Value::Set(x), Value::Set(y)) => Rc::ptr_eq(x, y),
        (Value::Map(x), Value::Map(y)) => Rc::ptr_eq(x, y),
        (Value::Var(x), Value::Var(y)) => Rc::ptr_eq(x, y),
        (Value::Class(x), Value::Class(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Native(x), Value::Native(y)) => Rc::ptr_eq(x, y),
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

pub fn equiv(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(x), Value::Double(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::List(_) | Value::Vector(_), Value::List(_) | Value::Vector(_)) => {
            let (xs, ys) = (a.seq_items().unwrap_or(&[]), b.seq_items().unwrap_or(&[]));
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| equiv(x, y))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.entries.len() == y.entries.len()
                && x.entries.iter().all(|(k, v)| map_get(b, k).map_or(false, |w| equiv(v, w)))
        }
        (Value::Set(x), Value::Set(y)) => {
            x.items.len() == y.items.len() && x.items.iter().all(|v| y.items.iter().any(|w| equiv(v, w)))
        }
        _ => identical(a, b),
    }
}

fn string_hash(s: &str) -> i32 {
    s.encode_utf16().fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32))
}

fn long_hash(v: i64) -> i32 {
    (v ^ ((v as u64) >> 32) as i64) as i32
}

pub fn hash(v: &Value) -> i32 {
    match v {
        Value::Nil => 0,
        Value::Bool(true) => 1231,
        Value::Bool(false) => 1237,
        Value::Long(l) => long_hash(*l),
        Value::Double(d) => long_hash(d.to_bits() as i64),
        Value::Char(c) => *c as i32,
        Value::Str(s) => string_hash(s),
        Value::Symbol(s) => {
            let ns = s.ns.as_deref().map(string_hash).unwrap_or(0);
            string_hash(&s.name) ^ ns.wrapping_add(0x9e3779b9u32 as i32)
        }
        Value::Keyword(k) => {
            let ns = k.ns.as_deref().map(string_hash).unwrap_or(0);
            (string_hash(&k.name) ^ ns).wrapping_add(0x9e3779b9u32 as i32)
        }
        Value::List(c) | Value::Vector(c) => {
            c.items.iter().fold(1i32, |h, x| h.wrapping_mul(31).wrapping_add(hash(x)))
        }
        Value::Set(c) => c.items.iter().fold(0i32, |h, x| h.wrapping_add(hash(x))),
        Value::Map(m) => m.entries.iter().fold(0i32, |h, (k, x)| h.wrapping_add(hash(k) ^ hash(x))),
        Value::Var(x) => Rc::as_ptr(x) as usize as i32,
        Value::Class(x) => Rc::as_ptr(x) as usize as i32,
        Value::Object(x) => Rc::as_ptr(x) as usize as i32,
        Value::Native(x) => Rc::as_ptr(x) as usize as i32,
        Value::Array(x) => Rc::as_ptr(x) as usize as i32,
    }
}

fn write_seq(f: &mut fmt::Formatter, items: &[Value], open: &str, close: &str) -> fmt::Result {
    write!(f, "{}", open)?;
    for (i, e) in items.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "{}", e)?;
    }
    write!(f, "{}", close)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Long(l) => write!(f, "{}", l),
            Value::Double(d) => {
                if d.fract() == 0.0 && d.is_finite() {
                    write!(f, "{:.1}", d)
                } else {
                    write!(f, "{}", d)
                }
            }
            Value::Char(c) => match c {
                '\n' => write!(f, "\\newline"),
                ' ' => write!(f, "\\space"),
                '\t' => write!(f, "\\tab"),
                c => write!(f, "\\{}", c),
            },
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Keyword(k) => write!(f, "{}", k),
            Value::List(c) => write_seq(f, &c.items, "(", ")"),
            Value::Vector(c) => write_seq(f, &c.items, "[", "]"),
            Value::Set(c) => write_seq(f, &c.items, "#{", "}"),
            Value::Map(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Var(v) => write!(f, "#'{}", v.qualified_name()),
            Value::Class(c) => write!(f, "{}", c.name),
            Value::Object(o) => write!(f, "#object[{}]", o.class.name),
            Value::Native(n) => write!(f, "#native[{}]", n.name),
            Value::Array(a) => write_seq(f, &a.borrow(), "#array[", "]"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbols_split_namespace() {
        let s = Symbol::intern("clojure.core/map");
        assert_eq!(s.ns.as_deref(), Some("clojure.core"));
        assert_eq!(&*s.name, "map");
        assert!(Symbol::intern("/").ns.is_none());
    }

    #[test]
    fn sequentials_are_equiv_across_kinds() {
        let l = Value::list(vec![1i64.into(), 2i64.into()]);
        let v = Value::vector(vec![1i64.into(), 2i64.into()]);
        assert!(equiv(&l, &v));
        assert_eq!(hash(&l), hash(&v));
        assert!(!equiv(&Value::Long(1), &Value::Double(1.0)));
    }

    #[test]
    fn metadata_does_not_affect_symbol_equality() {
        let a = Symbol::simple("x");
        let b = a.with_meta(Some(Value::map(vec![(Value::kw("tag"), Value::sym("long"))])));
        assert_eq!(a, b);
        assert!(Value::from(b).meta_get("tag").is_some());
    }
}
