use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrorKind, Result};
use crate::value::{map_assoc, map_get_kw, NativeResult, Symbol, Value};

use super::host::{host, Class};
use super::rt;

pub struct Var {
    pub ns: Rc<str>,
    pub sym: Symbol,
    root: RefCell<Option<Value>>,
    meta: RefCell<Value>,
    dynamic: Cell<bool>,
}

impl Var {
    fn new(ns: Rc<str>, sym: Symbol) -> Var {
        Var { ns, sym, root: RefCell::new(None), meta: RefCell::new(Value::map(vec![])), dynamic: Cell::new(false) }
    }

    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.ns, self.sym.name)
    }

    pub fn to_symbol(&self) -> Symbol {
        Symbol::qualified(&self.ns, &self.sym.name)
    }

    pub fn has_root(&self) -> bool {
        self.root.borrow().is_some()
    }

    pub fn root(&self) -> Option<Value> {
        self.root.borrow().clone()
    }

    pub fn deref(&self) -> NativeResult {
        match &*self.root.borrow() {
            Some(v) => Ok(v.clone()),
            None => Err(rt::illegal_state(format!("Attempting to call unbound fn: #'{}", self.qualified_name()))),
        }
    }

    pub fn bind_root(&self, v: Value) {
        *self.root.borrow_mut() = Some(v);
    }

    pub fn set(&self, v: Value) -> NativeResult {
        if !self.is_dynamic() {
            return Err(rt::illegal_state(format!(
                "Can't change/establish root binding of: {} with set",
                self.sym.name
            )));
        }
        self.bind_root(v.clone());
        Ok(v)
    }

    pub fn meta(&self) -> Value {
        self.meta.borrow().clone()
    }

    pub fn set_meta(&self, meta: Value) {
        let meta = match meta {
            Value::Nil => Value::map(vec![]),
            m => m,
        };
        *self.meta.borrow_mut() = meta;
    }

    pub fn alter_meta(&self, key: &str, val: Value) {
        let updated = map_assoc(Some(&self.meta()), Value::kw(key), val);
        *self.meta.borrow_mut() = updated;
    }

    fn meta_flag(&self, key: &str) -> bool {
        map_get_kw(&self.meta.borrow(), key).map_or(false, |v| v.is_truthy())
    }

    pub fn meta_value(&self, key: &str) -> Option<Value> {
        map_get_kw(&self.meta.borrow(), key)
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.get()
    }

    pub fn set_dynamic(&self, dynamic: bool) {
        self.dynamic.set(dynamic);
    }

    pub fn is_macro(&self) -> bool {
        self.meta_flag("macro")
    }

    pub fn set_macro(&self) {
        self.alter_meta("macro", Value::Bool(true));
    }

    pub fn is_public(&self) -> bool {
        !self.meta_flag("private")
    }

    pub fn is_const(&self) -> bool {
        self.meta_flag("const")
    }
}

impl fmt::Debug for Var {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#'{}", self.qualified_name())
    }
}

pub struct Namespace {
    pub name: Rc<str>,
    mappings: RefCell<IndexMap<Rc<str>, Value>>,
    aliases: RefCell<IndexMap<Rc<str>, Rc<Namespace>>>,
}

impl Namespace {
    fn new(name: &str) -> Namespace {
        let ns = Namespace { name: name.into(), mappings: RefCell::new(IndexMap::new()), aliases: RefCell::new(IndexMap::new()) };
        for class in host().java_lang_classes() {
            ns.import_class(&class);
        }
        ns
    }

    pub fn get_mapping(&self, name: &str) -> Option<Value> {
        self.mappings.borrow().get(name).cloned()
    }

    pub fn find_interned_var(&self, name: &str) -> Option<Rc<Var>> {
        match self.get_mapping(name) {
            Some(Value::Var(v)) if *v.ns == *self.name => Some(v),
            _ => None,
        }
    }

    pub fn intern(&self, name: &str) -> Rc<Var> {
        if let Some(v) = self.find_interned_var(name) {
            return v;
        }
        let var = Rc::new(Var::new(self.name.clone(), Symbol::simple(name)));
        self.mappings.borrow_mut().insert(name.into(), Value::Var(var.clone()));
        var
    }

    pub fn refer(&self, name: &str, var: Rc<Var>) {
        self.mappings.borrow_mut().insert(name.into(), Value::Var(var));
    }

    pub fn import_class(&self, class: &Rc<Class>) {
        self.mappings.borrow_mut().insert(class.simple_name().into(), Value::Class(class.clone()));
    }

    pub fn add_alias(&self, alias: &str, ns: Rc<Namespace>) {
        self.aliases.borrow_mut().insert(alias.into(), ns);
    }

    pub fn lookup_alias(&self, alias: &str) -> Option<Rc<Namespace>> {
        self.aliases.borrow().get(alias).cloned()
    }

    pub fn public_vars(&self) -> Vec<Rc<Var>> {
        self.mappings
            .borrow()
            .values()
            .filter_map(|v| match v {
                Value::Var(var) if *var.ns == *self.name && var.is_public() => Some(var.clone()),
                _ => None,
            })
            .collect()
    }
}

pub const CORE_NS: &str = "clojure.core";

pub struct Namespaces {
    namespaces: RefCell<IndexMap<Rc<str>, Rc<Namespace>>>,
    current: RefCell<Rc<Namespace>>,
}

impl Namespaces {
    pub fn new(install: impl FnOnce(&Namespace)) -> Namespaces {
        let core = Rc::new(Namespace::new(CORE_NS));
        install(&core);
        let namespaces = Namespaces { namespaces: RefCell::new(IndexMap::new()), current: RefCell::new(core.clone()) };
        namespaces.namespaces.borrow_mut().insert(core.name.clone(), core);
        namespaces.in_ns("user");
        namespaces
    }

    pub fn current(&self) -> Rc<Namespace> {
        self.current.borrow().clone()
    }

    pub fn find(&self, name: &str) -> Option<Rc<Namespace>> {
        self.namespaces.borrow().get(name).cloned()
    }

    pub fn core(&self) -> Option<Rc<Namespace>> {
        self.find(CORE_NS)
    }

    pub fn find_or_create(&self, name: &str) -> Rc<Namespace> {
        if let Some(ns) = self.find(name) {
            return ns;
        }
        let ns = Rc::new(Namespace::new(name));
        if let Some(core) = self.core() {
            for var in core.public_vars() {
                let name = var.sym.name.clone();
                ns.refer(&name, var);
            }
        }
        self.namespaces.borrow_mut().insert(ns.name.clone(), ns.clone());
        ns
    }

    pub fn in_ns(&self, name: &str) -> Rc<Namespace> {
        let ns = self.find_or_create(name);
        *self.current.borrow_mut() = ns.clone();
        ns
    }

    pub fn namespace_for(&self, sym: &Symbol) -> Option<Rc<Namespace>> {
        let ns_name = sym.ns.as_deref()?;
        self.current().lookup_alias(ns_name).or_else(|| self.find(ns_name))
    }

    pub fn lookup_var(&self, sym: &Symbol, intern_new: bool) -> Result<Option<Rc<Var>>> {
        let current = self.current();
        if sym.ns.is_some() {
            let Some(ns) = self.namespace_for(sym) else { return Ok(None) };
            if intern_new && Rc::ptr_eq(&ns, &current) {
                return Ok(Some(ns.intern(&sym.name)));
            }
            return Ok(ns.find_interned_var(&sym.name));
        }
        match current.get_mapping(&sym.name) {
            None if intern_new => Ok(Some(current.intern(&sym.name))),
            None => Ok(None),
            Some(Value::Var(v)) => Ok(Some(v)),
            Some(other) => Err(ErrorKind::malformed(format!("Expecting var, but {} is mapped to {}", sym, other)).into()),
        }
    }

    pub fn check_accessible(&self, var: &Var) -> Result<()> {
        if !var.is_public() && *var.ns != *self.current().name {
            return Err(ErrorKind::malformed(format!("var: #'{} is not public", var.qualified_name())).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_refers_core_vars() {
        let env = Namespaces::new(|core| {
            core.intern("inc").bind_root(Value::Long(1));
        });
        let user = env.current();
        assert_eq!(&*user.name, "user");
        let var = env.lookup_var(&Symbol::simple("inc"), false).unwrap().unwrap();
        assert_eq!(var.qualified_name(), "clojure.core/inc");
        assert!(user.find_interned_var("inc").is_none());
    }

    #[test]
    fn interning_shadows_a_referred_var() {
        let env = Namespaces::new(|core| {
            core.intern("x");
        });
        let own = env.current().intern("x");
        assert_eq!(own.qualified_name(), "user/x");
        assert!(matches!(env.current().get_mapping("String"), Some(Value::Class(_))));
    }

    #[test]
    fn only_dynamic_vars_can_be_set() {
        let env = Namespaces::new(|_| {});
        let v = env.current().intern("*x*");
        assert!(v.set(Value::Long(1)).is_err());
        v.set_dynamic(true);
        assert!(v.set(Value::Long(2)).is_ok());
        assert!(matches!(v.deref(), Ok(Value::Long(2))));
    }
}
