use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::runtime::host::{host, Class, ClassKind, Ctor, Field, FieldSlot, Method, MethodBody};
use crate::value::Value;

use super::unit::{CompiledUnit, HostSite, UnitKind};

pub const STUB_PREFIX: &str = "compile__stub.";

pub fn stub_name(class_name: &str) -> String {
    format!("{}{}", STUB_PREFIX, class_name)
}

/// A unit bound to its class. Constants and host sites mentioning the stub refer to the real
/// class once loaded.
pub struct LoadedUnit {
    pub unit: CompiledUnit,
    constants: RefCell<Vec<Value>>,
    host_sites: RefCell<Vec<HostSite>>,
    keyword_cache: RefCell<Vec<Option<(Weak<Class>, usize)>>>,
    member_cache: RefCell<Vec<Option<(Weak<Class>, Rc<Method>)>>>,
}

impl LoadedUnit {
    pub fn constant(&self, idx: usize) -> Option<Value> {
        self.constants.borrow().get(idx).cloned()
    }

    pub fn host_site(&self, idx: usize) -> Option<HostSite> {
        self.host_sites.borrow().get(idx).cloned()
    }

    pub fn cached_keyword_slot(&self, site: usize, class: &Rc<Class>) -> Option<usize> {
        match self.keyword_cache.borrow().get(site) {
            Some(Some((cached, slot))) if cached.upgrade().map_or(false, |c| Rc::ptr_eq(&c, class)) => Some(*slot),
            _ => None,
        }
    }

    pub fn cache_keyword_slot(&self, site: usize, class: &Rc<Class>, slot: usize) {
        if let Some(entry) = self.keyword_cache.borrow_mut().get_mut(site) {
            *entry = Some((Rc::downgrade(class), slot));
        }
    }

    pub fn cached_member(&self, site: usize, class: &Rc<Class>) -> Option<Rc<Method>> {
        match self.member_cache.borrow().get(site) {
            Some(Some((cached, m))) if cached.upgrade().map_or(false, |c| Rc::ptr_eq(&c, class)) => Some(m.clone()),
            _ => None,
        }
    }

    pub fn cache_member(&self, site: usize, class: &Rc<Class>, method: Rc<Method>) {
        if let Some(entry) = self.member_cache.borrow_mut().get_mut(site) {
            *entry = Some((Rc::downgrade(class), method));
        }
    }
}

fn is_stub_for(class: &Class, name: &str) -> bool {
    class.is_stub() && class.name.strip_prefix(STUB_PREFIX) == Some(name)
}

fn destub(v: &Value, name: &str, real: &Rc<Class>) -> Value {
    match v {
        Value::Class(c) if is_stub_for(c, name) => Value::Class(real.clone()),
        other => other.clone(),
    }
}

/// Defines the class for `unit`, replacing any earlier class of the same name and retiring the
/// unit's stub.
pub fn define(unit: CompiledUnit) -> Rc<Class> {
    let name = unit.name.clone();
    let superclass = unit.superclass.clone();
    let interfaces = unit.interfaces.clone();
    let site_count = unit.keyword_sites.len();
    let member_sites = unit.host_sites.len();
    let loaded = Rc::new(LoadedUnit {
        constants: RefCell::new(Vec::new()),
        host_sites: RefCell::new(Vec::new()),
        keyword_cache: RefCell::new(vec![None; site_count]),
        member_cache: RefCell::new(vec![None; member_sites]),
        unit,
    });
    let class = Rc::new(Class::new(name.clone(), ClassKind::Compiled(loaded.clone()), Some(superclass), interfaces, false));

    let unit = &loaded.unit;
    for (i, decl) in unit.fields.iter().enumerate() {
        class.add_field(Field {
            name: decl.name.clone(),
            class: decl.class.clone(),
            slot: FieldSlot::Instance(i),
            mutable: decl.mutable,
        });
    }
    let field_types: Vec<Rc<Class>> = unit.fields.iter().map(|f| f.class.clone()).collect();
    class.add_ctor(Ctor { params: field_types.clone(), func: None });
    if unit.alt_ctor_drops > 0 {
        let kept = field_types.len().saturating_sub(unit.alt_ctor_drops);
        class.add_ctor(Ctor { params: field_types[..kept].to_vec(), func: None });
    }
    for (i, m) in unit.methods.iter().enumerate() {
        class.add_method(Method {
            name: m.name.clone(),
            declaring: name.clone(),
            params: m.params.clone(),
            ret: m.ret.clone(),
            is_static: m.is_static,
            body: MethodBody::Compiled(i),
        });
    }
    for b in &unit.bridges {
        class.add_method(Method {
            name: b.name.clone(),
            declaring: name.clone(),
            params: b.params.clone(),
            ret: b.ret.clone(),
            is_static: false,
            body: MethodBody::Compiled(b.target),
        });
    }

    *loaded.constants.borrow_mut() = unit.constants.iter().map(|c| destub(c, &name, &class)).collect();
    *loaded.host_sites.borrow_mut() = unit
        .host_sites
        .iter()
        .map(|site| match site {
            HostSite::Ctor { class: target, ctor } if is_stub_for(target, &name) => {
                let real = class.ctors().into_iter().find(|c| c.params.len() == ctor.params.len());
                HostSite::Ctor { class: class.clone(), ctor: real.unwrap_or_else(|| ctor.clone()) }
            }
            HostSite::Reflective { name: member, static_class: Some(target) } if is_stub_for(target, &name) => {
                HostSite::Reflective { name: member.clone(), static_class: Some(class.clone()) }
            }
            other => other.clone(),
        })
        .collect();

    let registry = host();
    if unit.kind == UnitKind::Type {
        registry.remove(&stub_name(&name));
    }
    registry.define(class.clone());
    log::debug!("loaded {} with {} method(s)", name, unit.methods.len());
    class
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::unit::{CompiledMethod, FieldDecl};
    use crate::vm::vp::Instr;

    fn method(code: Vec<u8>) -> CompiledMethod {
        let object = host().object();
        CompiledMethod {
            name: "invoke".into(),
            params: vec![],
            ret: object,
            is_static: false,
            required: 0,
            variadic: false,
            max_locals: 1,
            code,
            exception_table: vec![],
            lines: vec![],
            listing: String::new(),
        }
    }

    #[test]
    fn stub_references_point_at_the_loaded_class() {
        let h = host();
        let stub = Rc::new(Class::new(stub_name("loader.test.Point"), ClassKind::Stub, Some(h.object()), vec![], false));
        h.define(stub.clone());
        let unit = CompiledUnit {
            name: "loader.test.Point".into(),
            kind: UnitKind::Type,
            superclass: h.object(),
            interfaces: vec![],
            fields: vec![FieldDecl { name: "x".into(), class: h.object(), mutable: false }],
            alt_ctor_drops: 0,
            methods: vec![method(vec![Instr::Nil as u8, Instr::Return as u8])],
            bridges: vec![],
            constants: vec![Value::Class(stub), Value::Long(3)],
            host_sites: vec![],
            keyword_sites: vec![],
            once_only: false,
        };
        let class = define(unit);
        let unit = class.loaded_unit().unwrap();
        assert!(matches!(unit.constant(0), Some(Value::Class(c)) if Rc::ptr_eq(&c, &class)));
        assert!(h.get(&stub_name("loader.test.Point")).is_none());
        assert_eq!(class.instance_field_count(), 1);
        assert_eq!(class.methods("invoke", 0, false).len(), 1);
    }
}
