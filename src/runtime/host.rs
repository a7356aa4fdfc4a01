use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::value::{NativeFnPtr, Value};
use crate::vm::loader::LoadedUnit;

use super::rt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PrimType {
    Boolean,
    Char,
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl PrimType {
    pub const ALL: [PrimType; 9] = [
        PrimType::Boolean,
        PrimType::Char,
        PrimType::Byte,
        PrimType::Short,
        PrimType::Int,
        PrimType::Long,
        PrimType::Float,
        PrimType::Double,
        PrimType::Void,
    ];

    pub fn name(self) -> &'static str {
        match self {
            PrimType::Boolean => "boolean",
            PrimType::Char => "char",
            PrimType::Byte => "byte",
            PrimType::Short => "short",
            PrimType::Int => "int",
            PrimType::Long => "long",
            PrimType::Float => "float",
            PrimType::Double => "double",
            PrimType::Void => "void",
        }
    }

    pub fn from_name(name: &str) -> Option<PrimType> {
        PrimType::ALL.iter().copied().find(|p| p.name() == name)
    }

    pub fn box_name(self) -> &'static str {
        match self {
            PrimType::Boolean => "java.lang.Boolean",
            PrimType::Char => "java.lang.Character",
            PrimType::Byte => "java.lang.Byte",
            PrimType::Short => "java.lang.Short",
            PrimType::Int => "java.lang.Integer",
            PrimType::Long => "java.lang.Long",
            PrimType::Float => "java.lang.Float",
            PrimType::Double => "java.lang.Double",
            PrimType::Void => "java.lang.Void",
        }
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<PrimType> {
        PrimType::ALL.get(code as usize).copied()
    }
}

impl fmt::Display for PrimType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

pub enum MethodBody {
    Native(NativeFnPtr),
    Abstract,
    Compiled(usize),
}

pub struct Method {
    pub name: String,
    pub declaring: String,
    pub params: Vec<Rc<Class>>,
    pub ret: Rc<Class>,
    pub is_static: bool,
    pub body: MethodBody,
}

impl Method {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn same_signature(&self, other: &Method) -> bool {
        self.name == other.name
            && self.params.len() == other.params.len()
            && self.params.iter().zip(&other.params).all(|(a, b)| a.name == b.name)
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let params: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        write!(f, "{} {}.{}({})", self.ret.name, self.declaring, self.name, params.join(", "))
    }
}

pub enum FieldSlot {
    Static(Value),
    Instance(usize),
}

pub struct Field {
    pub name: String,
    pub class: Rc<Class>,
    pub slot: FieldSlot,
    pub mutable: bool,
}

impl Field {
    pub fn is_static(&self) -> bool {
        matches!(self.slot, FieldSlot::Static(_))
    }
}

pub struct Ctor {
    pub params: Vec<Rc<Class>>,
    pub func: Option<NativeFnPtr>,
}

pub enum ClassKind {
    Primitive(PrimType),
    Host,
    Compiled(Rc<LoadedUnit>),
    Stub,
}

#[derive(Default)]
pub struct Members {
    pub fields: Vec<Rc<Field>>,
    pub ctors: Vec<Rc<Ctor>>,
    pub methods: Vec<Rc<Method>>,
}

pub struct Class {
    pub name: String,
    pub kind: ClassKind,
    pub superclass: Option<Rc<Class>>,
    pub interfaces: Vec<Rc<Class>>,
    pub is_interface: bool,
    members: RefCell<Members>,
}

impl Class {
    pub fn new(
        name: impl Into<String>,
        kind: ClassKind,
        superclass: Option<Rc<Class>>,
        interfaces: Vec<Rc<Class>>,
        is_interface: bool,
    ) -> Class {
        Class { name: name.into(), kind, superclass, interfaces, is_interface, members: RefCell::new(Members::default()) }
    }

    pub fn members(&self) -> Ref<'_, Members> {
        self.members.borrow()
    }

    pub fn add_method(&self, method: Method) {
        self.members.borrow_mut().methods.push(Rc::new(method));
    }

    pub fn add_field(&self, field: Field) {
        self.members.borrow_mut().fields.push(Rc::new(field));
    }

    pub fn add_ctor(&self, ctor: Ctor) {
        self.members.borrow_mut().ctors.push(Rc::new(ctor));
    }

    pub fn prim(&self) -> Option<PrimType> {
        match self.kind {
            ClassKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_primitive(&self) -> bool {
        self.prim().is_some()
    }

    pub fn is_stub(&self) -> bool {
        matches!(self.kind, ClassKind::Stub)
    }

    pub fn loaded_unit(&self) -> Option<&Rc<LoadedUnit>> {
        match &self.kind {
            ClassKind::Compiled(u) => Some(u),
            _ => None,
        }
    }

    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn is_assignable_from(&self, other: &Class) -> bool {
        if self.name == other.name {
            return true;
        }
        if self.is_primitive() || other.is_primitive() {
            return false;
        }
        if self.name == "java.lang.Object" {
            return true;
        }
        other.superclass.as_ref().map_or(false, |s| self.is_assignable_from(s))
            || other.interfaces.iter().any(|i| self.is_assignable_from(i))
    }

    pub fn ancestors(&self) -> Vec<Rc<Class>> {
        let mut out: Vec<Rc<Class>> = Vec::new();
        let mut pending: Vec<Rc<Class>> = self.superclass.iter().chain(&self.interfaces).cloned().collect();
        while !pending.is_empty() {
            let next = pending.remove(0);
            if out.iter().any(|c| c.name == next.name) {
                continue;
            }
            pending.extend(next.superclass.iter().chain(&next.interfaces).cloned());
            out.push(next);
        }
        out
    }

    pub fn methods(&self, name: &str, arity: usize, is_static: bool) -> Vec<Rc<Method>> {
        let mut found: Vec<Rc<Method>> = Vec::new();
        let mut collect = |members: &Members| {
            for m in &members.methods {
                if m.name == name && m.arity() == arity && m.is_static == is_static && !found.iter().any(|f| f.same_signature(m))
                {
                    found.push(m.clone());
                }
            }
        };
        collect(&self.members());
        if !is_static {
            for a in self.ancestors() {
                collect(&a.members());
            }
        }
        found
    }

    pub fn has_method_named(&self, name: &str, is_static: bool) -> bool {
        let declared = |c: &Class| c.members().methods.iter().any(|m| m.name == name && m.is_static == is_static);
        declared(self) || (!is_static && self.ancestors().iter().any(|a| declared(a.as_ref())))
    }

    pub fn field(&self, name: &str, is_static: bool) -> Option<Rc<Field>> {
        if let Some(f) = self.members().fields.iter().find(|f| f.name == name && f.is_static() == is_static) {
            return Some(f.clone());
        }
        self.superclass.as_ref().and_then(|s| s.field(name, is_static))
    }

    pub fn ctors(&self) -> Vec<Rc<Ctor>> {
        self.members().ctors.clone()
    }

    pub fn instance_field_count(&self) -> usize {
        let own = self.members().fields.iter().filter(|f| !f.is_static()).count();
        own + self.superclass.as_ref().map_or(0, |s| s.instance_field_count())
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#class[{}]", self.name)
    }
}

impl PartialEq for Class {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

pub struct HostRegistry {
    classes: RefCell<IndexMap<String, Rc<Class>>>,
}

thread_local! {
    static HOST: Rc<HostRegistry> = Rc::new(HostRegistry::bootstrap());
}

pub fn host() -> Rc<HostRegistry> {
    HOST.with(|h| h.clone())
}

const OBJECT: &str = "java.lang.Object";
const ARRAY: &str = "[Ljava.lang.Object;";

impl HostRegistry {
    pub fn get(&self, name: &str) -> Option<Rc<Class>> {
        self.classes.borrow().get(name).cloned()
    }

    fn expect(&self, name: &str) -> Rc<Class> {
        match self.get(name) {
            Some(c) => c,
            None => panic!("host class {} is not registered", name),
        }
    }

    pub fn object(&self) -> Rc<Class> {
        self.expect(OBJECT)
    }

    pub fn throwable(&self) -> Rc<Class> {
        self.expect("java.lang.Throwable")
    }

    pub fn prim(&self, p: PrimType) -> Rc<Class> {
        self.expect(p.name())
    }

    pub fn define(&self, class: Rc<Class>) {
        log::debug!("defining class {}", class.name);
        self.classes.borrow_mut().insert(class.name.clone(), class);
    }

    pub fn remove(&self, name: &str) {
        self.classes.borrow_mut().shift_remove(name);
    }

    pub fn java_lang_classes(&self) -> Vec<Rc<Class>> {
        self.classes
            .borrow()
            .values()
            .filter(|c| c.name.strip_prefix("java.lang.").map_or(false, |rest| !rest.contains('.')))
            .cloned()
            .collect()
    }

    pub fn class_of(&self, v: &Value) -> Option<Rc<Class>> {
        let name = match v {
            Value::Nil => return None,
            Value::Object(o) => return Some(o.class.clone()),
            Value::Native(_) => "clojure.lang.AFunction",
            Value::Array(_) => ARRAY,
            other => other.type_name(),
        };
        self.get(name)
    }

    fn class(&self, name: &str, superclass: Option<&str>, interfaces: &[&str]) -> Rc<Class> {
        let class = Rc::new(Class::new(
            name,
            ClassKind::Host,
            superclass.map(|s| self.expect(s)),
            interfaces.iter().map(|i| self.expect(i)).collect(),
            false,
        ));
        self.define(class.clone());
        class
    }

    fn interface(&self, name: &str, extends: &[&str]) -> Rc<Class> {
        let class =
            Rc::new(Class::new(name, ClassKind::Host, None, extends.iter().map(|i| self.expect(i)).collect(), true));
        self.define(class.clone());
        class
    }

    fn types(&self, names: &[&str]) -> Vec<Rc<Class>> {
        names.iter().map(|n| self.expect(n)).collect()
    }

    fn static_method(&self, class: &str, name: &str, params: &[&str], ret: &str, f: NativeFnPtr) {
        self.expect(class).add_method(Method {
            name: name.into(),
            declaring: class.into(),
            params: self.types(params),
            ret: self.expect(ret),
            is_static: true,
            body: MethodBody::Native(f),
        });
    }

    fn instance_method(&self, class: &str, name: &str, params: &[&str], ret: &str, f: NativeFnPtr) {
        self.expect(class).add_method(Method {
            name: name.into(),
            declaring: class.into(),
            params: self.types(params),
            ret: self.expect(ret),
            is_static: false,
            body: MethodBody::Native(f),
        });
    }

    fn abstract_method(&self, class: &str, name: &str, params: &[&str], ret: &str) {
        self.expect(class).add_method(Method {
            name: name.into(),
            declaring: class.into(),
            params: self.types(params),
            ret: self.expect(ret),
            is_static: false,
            body: MethodBody::Abstract,
        });
    }

    fn static_field(&self, class: &str, name: &str, ty: &str, value: Value) {
        self.expect(class).add_field(Field {
            name: name.into(),
            class: self.expect(ty),
            slot: FieldSlot::Static(value),
            mutable: false,
        });
    }

    fn ctor(&self, class: &str, params: &[&str], f: NativeFnPtr) {
        self.expect(class).add_ctor(Ctor { params: self.types(params), func: Some(f) });
    }

    fn numeric_overloads(&self, name: &str, arity: usize, ret: &dyn Fn(&[&str]) -> &'static str, f: NativeFnPtr) {
        const BINARY: [[&str; 2]; 9] = [
            [OBJECT, OBJECT],
            ["double", "double"],
            ["long", "long"],
            ["long", OBJECT],
            [OBJECT, "long"],
            ["double", OBJECT],
            [OBJECT, "double"],
            ["double", "long"],
            ["long", "double"],
        ];
        const UNARY: [[&str; 1]; 3] = [[OBJECT], ["double"], ["long"]];
        if arity == 1 {
            for params in UNARY {
                self.static_method("clojure.lang.Numbers", name, &params, ret(&params[..]), f);
            }
        } else {
            for params in BINARY {
                self.static_method("clojure.lang.Numbers", name, &params, ret(&params[..]), f);
            }
        }
    }

    fn bootstrap() -> HostRegistry {
        let reg = HostRegistry { classes: RefCell::new(IndexMap::new()) };
        for p in PrimType::ALL {
            reg.define(Rc::new(Class::new(p.name(), ClassKind::Primitive(p), None, vec![], false)));
        }
        reg.define(Rc::new(Class::new(OBJECT, ClassKind::Host, None, vec![], false)));

        reg.interface("clojure.lang.IFn", &[]);
        reg.interface("clojure.lang.IMeta", &[]);
        reg.interface("clojure.lang.IObj", &["clojure.lang.IMeta"]);
        reg.interface("clojure.lang.Counted", &[]);
        reg.interface("clojure.lang.ILookup", &[]);
        reg.interface("clojure.lang.Seqable", &[]);
        reg.interface("clojure.lang.IDeref", &[]);
        reg.interface("clojure.lang.Named", &[]);
        reg.interface("clojure.lang.IPersistentCollection", &["clojure.lang.Seqable"]);
        reg.interface("clojure.lang.ISeq", &["clojure.lang.IPersistentCollection"]);
        reg.interface("clojure.lang.IPersistentMap", &["clojure.lang.IPersistentCollection", "clojure.lang.Counted"]);
        reg.interface("clojure.lang.IPersistentVector", &["clojure.lang.IPersistentCollection", "clojure.lang.Counted"]);
        reg.interface("clojure.lang.IType", &[]);
        reg.interface("java.lang.Comparable", &[]);
        reg.interface("java.lang.Runnable", &[]);

        reg.class("java.lang.Number", Some(OBJECT), &[]);
        reg.class("java.lang.Long", Some("java.lang.Number"), &["java.lang.Comparable"]);
        reg.class("java.lang.Integer", Some("java.lang.Number"), &["java.lang.Comparable"]);
        reg.class("java.lang.Short", Some("java.lang.Number"), &["java.lang.Comparable"]);
        reg.class("java.lang.Byte", Some("java.lang.Number"), &["java.lang.Comparable"]);
        reg.class("java.lang.Double", Some("java.lang.Number"), &["java.lang.Comparable"]);
        reg.class("java.lang.Float", Some("java.lang.Number"), &["java.lang.Comparable"]);
        reg.class("java.lang.Boolean", Some(OBJECT), &["java.lang.Comparable"]);
        reg.class("java.lang.Character", Some(OBJECT), &["java.lang.Comparable"]);
        reg.class("java.lang.Void", Some(OBJECT), &[]);
        reg.class("java.lang.String", Some(OBJECT), &["java.lang.Comparable"]);
        reg.class("java.lang.Class", Some(OBJECT), &[]);
        reg.class("java.lang.Math", Some(OBJECT), &[]);
        reg.class(ARRAY, Some(OBJECT), &[]);
        reg.class("clojure.lang.Keyword", Some(OBJECT), &["clojure.lang.IFn", "clojure.lang.Named", "java.lang.Comparable"]);
        reg.class("clojure.lang.Symbol", Some(OBJECT), &["clojure.lang.IObj", "clojure.lang.Named", "clojure.lang.IFn"]);
        reg.class("clojure.lang.Var", Some(OBJECT), &["clojure.lang.IFn", "clojure.lang.IDeref"]);
        reg.class("clojure.lang.AFn", Some(OBJECT), &["clojure.lang.IFn"]);
        reg.class("clojure.lang.AFunction", Some("clojure.lang.AFn"), &["clojure.lang.IObj"]);
        reg.class("clojure.lang.RestFn", Some("clojure.lang.AFunction"), &[]);
        reg.class(
            "clojure.lang.PersistentList",
            Some(OBJECT),
            &["clojure.lang.IPersistentCollection", "clojure.lang.Counted", "clojure.lang.IObj"],
        );
        reg.class(
            "clojure.lang.PersistentVector",
            Some(OBJECT),
            &["clojure.lang.IPersistentVector", "clojure.lang.ILookup", "clojure.lang.IFn", "clojure.lang.IObj"],
        );
        reg.class(
            "clojure.lang.PersistentArrayMap",
            Some(OBJECT),
            &["clojure.lang.IPersistentMap", "clojure.lang.ILookup", "clojure.lang.IFn", "clojure.lang.IObj"],
        );
        reg.class(
            "clojure.lang.PersistentHashSet",
            Some(OBJECT),
            &["clojure.lang.IPersistentCollection", "clojure.lang.Counted", "clojure.lang.IFn", "clojure.lang.IObj"],
        );
        reg.class("clojure.lang.Numbers", Some(OBJECT), &[]);
        reg.class("clojure.lang.Util", Some(OBJECT), &[]);
        reg.class("clojure.lang.RT", Some(OBJECT), &[]);

        let throwable = reg.class("java.lang.Throwable", Some(OBJECT), &[]);
        throwable.add_field(Field {
            name: "message".into(),
            class: reg.expect("java.lang.String"),
            slot: FieldSlot::Instance(0),
            mutable: false,
        });
        throwable.add_field(Field {
            name: "cause".into(),
            class: throwable.clone(),
            slot: FieldSlot::Instance(1),
            mutable: false,
        });
        reg.class("java.lang.Exception", Some("java.lang.Throwable"), &[]);
        reg.class("java.lang.Error", Some("java.lang.Throwable"), &[]);
        reg.class("java.lang.StackOverflowError", Some("java.lang.Error"), &[]);
        reg.class("java.lang.RuntimeException", Some("java.lang.Exception"), &[]);
        reg.class("java.lang.ClassNotFoundException", Some("java.lang.Exception"), &[]);
        for name in [
            "java.lang.IllegalArgumentException",
            "java.lang.IllegalStateException",
            "java.lang.ArithmeticException",
            "java.lang.UnsupportedOperationException",
            "java.lang.ClassCastException",
            "java.lang.NullPointerException",
            "java.lang.IndexOutOfBoundsException",
        ] {
            reg.class(name, Some("java.lang.RuntimeException"), &[]);
        }
        reg.class("java.lang.NumberFormatException", Some("java.lang.IllegalArgumentException"), &[]);
        reg.class("java.lang.StringIndexOutOfBoundsException", Some("java.lang.IndexOutOfBoundsException"), &[]);
        reg.class("clojure.lang.ArityException", Some("java.lang.IllegalArgumentException"), &[]);

        reg.register_members();
        reg
    }

    fn register_members(&self) {
        const STR: &str = "java.lang.String";
        const NUM: &str = "java.lang.Number";
        const COLL: &str = "clojure.lang.IPersistentCollection";
        const MAP: &str = "clojure.lang.IPersistentMap";

        self.instance_method(OBJECT, "toString", &[], STR, rt::to_string);
        self.instance_method(OBJECT, "hashCode", &[], "int", rt::object_hash_code);
        self.instance_method(OBJECT, "equals", &[OBJECT], "boolean", rt::object_equals);

        self.instance_method(NUM, "longValue", &[], "long", rt::number_long_value);
        self.instance_method(NUM, "intValue", &[], "int", rt::int_cast);
        self.instance_method(NUM, "doubleValue", &[], "double", rt::number_double_value);

        self.static_field("java.lang.Long", "MAX_VALUE", "long", Value::Long(i64::MAX));
        self.static_field("java.lang.Long", "MIN_VALUE", "long", Value::Long(i64::MIN));
        self.static_method("java.lang.Long", "valueOf", &["long"], "java.lang.Long", rt::box_value);
        self.static_method("java.lang.Long", "parseLong", &[STR], "long", rt::parse_long);
        self.static_field("java.lang.Integer", "MAX_VALUE", "int", Value::Long(i32::MAX as i64));
        self.static_field("java.lang.Integer", "MIN_VALUE", "int", Value::Long(i32::MIN as i64));
        self.static_field("java.lang.Double", "MAX_VALUE", "double", Value::Double(f64::MAX));
        self.static_method("java.lang.Double", "parseDouble", &[STR], "double", rt::parse_double);
        self.static_method("java.lang.Double", "isNaN", &["double"], "boolean", rt::is_nan);
        self.static_field("java.lang.Boolean", "TRUE", "java.lang.Boolean", Value::Bool(true));
        self.static_field("java.lang.Boolean", "FALSE", "java.lang.Boolean", Value::Bool(false));

        self.instance_method(STR, "length", &[], "int", rt::str_length);
        self.instance_method(STR, "toUpperCase", &[], STR, rt::str_upper);
        self.instance_method(STR, "concat", &[STR], STR, rt::str_concat);
        self.instance_method(STR, "charAt", &["int"], "char", rt::str_char_at);
        self.instance_method(STR, "substring", &["int"], STR, rt::str_substring);
        self.instance_method(STR, "substring", &["int", "int"], STR, rt::str_substring);
        self.instance_method(STR, "indexOf", &[STR], "int", rt::str_index_of);

        self.instance_method("java.lang.Class", "getName", &[], STR, rt::class_name);
        self.instance_method("clojure.lang.Keyword", "getName", &[], STR, rt::named_name);
        self.instance_method("clojure.lang.Symbol", "getName", &[], STR, rt::named_name);
        self.instance_method("clojure.lang.Var", "deref", &[], OBJECT, rt::var_deref);
        self.instance_method("clojure.lang.Var", "getRawRoot", &[], OBJECT, rt::var_deref);

        self.static_field("java.lang.Math", "PI", "double", Value::Double(std::f64::consts::PI));
        self.static_field("java.lang.Math", "E", "double", Value::Double(std::f64::consts::E));
        for p in ["long", "double"] {
            self.static_method("java.lang.Math", "abs", &[p], p, rt::abs);
            self.static_method("java.lang.Math", "max", &[p, p], p, rt::max);
            self.static_method("java.lang.Math", "min", &[p, p], p, rt::min);
        }
        self.static_method("java.lang.Math", "sqrt", &["double"], "double", rt::sqrt);

        self.ctor("java.lang.Throwable", &[], rt::throwable_new);
        self.ctor("java.lang.Throwable", &[STR], rt::throwable_new);
        self.ctor("java.lang.Throwable", &[STR, "java.lang.Throwable"], rt::throwable_new);
        self.instance_method("java.lang.Throwable", "getMessage", &[], STR, rt::get_message);
        self.instance_method("java.lang.Throwable", "getCause", &[], "java.lang.Throwable", rt::get_cause);
        for name in [
            "java.lang.Exception",
            "java.lang.Error",
            "java.lang.RuntimeException",
            "java.lang.IllegalArgumentException",
            "java.lang.IllegalStateException",
            "java.lang.ArithmeticException",
            "java.lang.UnsupportedOperationException",
            "java.lang.ClassCastException",
            "java.lang.NullPointerException",
            "java.lang.IndexOutOfBoundsException",
            "java.lang.NumberFormatException",
        ] {
            self.ctor(name, &[], rt::throwable_new);
            self.ctor(name, &[STR], rt::throwable_new);
            self.ctor(name, &[STR, "java.lang.Throwable"], rt::throwable_new);
        }
        self.ctor("clojure.lang.ArityException", &["int", STR], rt::arity_exception_new);

        // arithmetic keeps the long/double lanes apart; mixed lanes promote to double
        let arith_ret = |p: &[&str]| -> &'static str {
            match p {
                ["long", "long"] | ["long"] => "long",
                ["double", _] | [_, "double"] | ["double"] => "double",
                _ => NUM,
            }
        };
        let bool_ret = |_: &[&str]| -> &'static str { "boolean" };
        self.numeric_overloads("add", 2, &arith_ret, rt::add);
        self.numeric_overloads("minus", 2, &arith_ret, rt::minus);
        self.numeric_overloads("minus", 1, &arith_ret, rt::minus);
        self.numeric_overloads("multiply", 2, &arith_ret, rt::multiply);
        let divide_ret = |p: &[&str]| -> &'static str { if p == ["double", "double"] { "double" } else { NUM } };
        self.numeric_overloads("divide", 2, &divide_ret, rt::divide);
        self.numeric_overloads("remainder", 2, &arith_ret, rt::remainder);
        self.numeric_overloads("inc", 1, &arith_ret, rt::inc);
        self.numeric_overloads("dec", 1, &arith_ret, rt::dec);
        self.numeric_overloads("lt", 2, &bool_ret, rt::lt);
        self.numeric_overloads("gt", 2, &bool_ret, rt::gt);
        self.numeric_overloads("lte", 2, &bool_ret, rt::lte);
        self.numeric_overloads("gte", 2, &bool_ret, rt::gte);
        self.numeric_overloads("equiv", 2, &bool_ret, rt::num_equiv);
        self.numeric_overloads("isZero", 1, &bool_ret, rt::is_zero);
        self.numeric_overloads("isPos", 1, &bool_ret, rt::is_pos);
        self.numeric_overloads("isNeg", 1, &bool_ret, rt::is_neg);

        self.static_method("clojure.lang.Util", "equiv", &[OBJECT, OBJECT], "boolean", rt::util_equiv);
        self.static_method("clojure.lang.Util", "equiv", &["long", "long"], "boolean", rt::util_equiv);
        self.static_method("clojure.lang.Util", "equiv", &["double", "double"], "boolean", rt::util_equiv);
        self.static_method("clojure.lang.Util", "identical", &[OBJECT, OBJECT], "boolean", rt::util_identical);
        self.static_method("clojure.lang.Util", "hash", &[OBJECT], "int", rt::util_hash);

        self.static_method("clojure.lang.RT", "count", &[OBJECT], "int", rt::count);
        self.static_method("clojure.lang.RT", "nth", &[OBJECT, "int"], OBJECT, rt::nth);
        self.static_method("clojure.lang.RT", "nth", &[OBJECT, "int", OBJECT], OBJECT, rt::nth);
        self.static_method("clojure.lang.RT", "get", &[OBJECT, OBJECT], OBJECT, rt::get);
        self.static_method("clojure.lang.RT", "get", &[OBJECT, OBJECT, OBJECT], OBJECT, rt::get);
        self.static_method("clojure.lang.RT", "first", &[OBJECT], OBJECT, rt::first);
        self.static_method("clojure.lang.RT", "next", &[OBJECT], OBJECT, rt::next);
        self.static_method("clojure.lang.RT", "cons", &[OBJECT, OBJECT], OBJECT, rt::cons);
        self.static_method("clojure.lang.RT", "conj", &[COLL, OBJECT], COLL, rt::conj);
        self.static_method("clojure.lang.RT", "box", &[OBJECT], OBJECT, rt::box_value);
        self.static_method("clojure.lang.RT", "longCast", &[OBJECT], "long", rt::long_cast);
        self.static_method("clojure.lang.RT", "longCast", &["double"], "long", rt::long_cast);
        self.static_method("clojure.lang.RT", "intCast", &[OBJECT], "int", rt::int_cast);
        self.static_method("clojure.lang.RT", "intCast", &["long"], "int", rt::int_cast);
        self.static_method("clojure.lang.RT", "doubleCast", &[OBJECT], "double", rt::double_cast);
        self.static_method("clojure.lang.RT", "doubleCast", &["long"], "double", rt::double_cast);
        self.static_method("clojure.lang.RT", "booleanCast", &[OBJECT], "boolean", rt::boolean_cast);

        self.abstract_method("clojure.lang.IMeta", "meta", &[], MAP);
        self.abstract_method("clojure.lang.IObj", "withMeta", &[MAP], "clojure.lang.IObj");
        self.abstract_method("clojure.lang.Counted", "count", &[], "int");
        self.abstract_method("clojure.lang.ILookup", "valAt", &[OBJECT], OBJECT);
        self.abstract_method("clojure.lang.ILookup", "valAt", &[OBJECT, OBJECT], OBJECT);
        self.abstract_method("clojure.lang.Seqable", "seq", &[], OBJECT);
        self.abstract_method("clojure.lang.IDeref", "deref", &[], OBJECT);
        self.abstract_method(COLL, "count", &[], "int");
        self.abstract_method(COLL, "cons", &[OBJECT], COLL);
        self.abstract_method(COLL, "empty", &[], COLL);
        self.abstract_method(COLL, "equiv", &[OBJECT], "boolean");
        // covariant return over IPersistentCollection.cons
        self.abstract_method("clojure.lang.IPersistentVector", "cons", &[OBJECT], "clojure.lang.IPersistentVector");
        self.abstract_method("clojure.lang.IPersistentVector", "length", &[], "int");
        self.abstract_method("clojure.lang.IPersistentVector", "nth", &["int"], OBJECT);
        self.abstract_method("java.lang.Comparable", "compareTo", &[OBJECT], "int");
        self.abstract_method("java.lang.Runnable", "run", &[], "void");
        let objects: Vec<&str> = vec![OBJECT; 5];
        for arity in 0..=4 {
            self.abstract_method("clojure.lang.IFn", "invoke", &objects[..arity], OBJECT);
        }

        for coll in [
            "clojure.lang.PersistentList",
            "clojure.lang.PersistentVector",
            "clojure.lang.PersistentArrayMap",
            "clojure.lang.PersistentHashSet",
        ] {
            self.instance_method(coll, "count", &[], "int", rt::count);
            self.instance_method(coll, "cons", &[OBJECT], COLL, rt::coll_cons);
            self.instance_method(coll, "empty", &[], COLL, rt::coll_empty);
            self.instance_method(coll, "meta", &[], MAP, rt::coll_meta);
            self.instance_method(coll, "withMeta", &[MAP], "clojure.lang.IObj", rt::coll_with_meta);
        }
        for lookup in ["clojure.lang.PersistentVector", "clojure.lang.PersistentArrayMap"] {
            self.instance_method(lookup, "valAt", &[OBJECT], OBJECT, rt::coll_val_at);
            self.instance_method(lookup, "valAt", &[OBJECT, OBJECT], OBJECT, rt::coll_val_at);
        }
        self.instance_method("clojure.lang.PersistentVector", "nth", &["int"], OBJECT, rt::nth);
        self.instance_method("clojure.lang.PersistentVector", "length", &[], "int", rt::count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignability_follows_supertypes_and_interfaces() {
        let h = host();
        let object = h.object();
        let long = h.get("java.lang.Long").unwrap();
        let number = h.get("java.lang.Number").unwrap();
        let vector = h.get("clojure.lang.PersistentVector").unwrap();
        let coll = h.get("clojure.lang.IPersistentCollection").unwrap();
        assert!(number.is_assignable_from(&long));
        assert!(object.is_assignable_from(&long));
        assert!(!long.is_assignable_from(&number));
        assert!(coll.is_assignable_from(&vector));
        assert!(!object.is_assignable_from(&h.prim(PrimType::Long)));
    }

    #[test]
    fn inherited_methods_hide_overridden_signatures() {
        let h = host();
        let vector = h.get("clojure.lang.PersistentVector").unwrap();
        let counts = vector.methods("count", 0, false);
        assert_eq!(counts.len(), 1);
        assert!(matches!(counts[0].body, MethodBody::Native(_)));
        let adds = h.get("clojure.lang.Numbers").unwrap().methods("add", 2, true);
        assert_eq!(adds.len(), 9);
    }

    #[test]
    fn class_of_values() {
        let h = host();
        assert!(h.class_of(&Value::Nil).is_none());
        assert_eq!(h.class_of(&Value::Long(1)).unwrap().name, "java.lang.Long");
        assert_eq!(h.class_of(&Value::vector(vec![])).unwrap().name, "clojure.lang.PersistentVector");
    }
}
