use std::collections::HashSet;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{ErrorKind, Result};
use crate::options::CompilerOptions;
use crate::runtime::host::{host, Class};
use crate::value::{identical, Keyword, Value};
use crate::vm::loader;
use crate::vm::unit::{Bridge, CompiledUnit, FieldDecl, HostSite, UnitKind};
use crate::vm::vm::Vm;

use super::emitter::emit_method;
use super::expr::{Expr, LocalBindingExpr};
use super::scope_manager::LocalBinding;

const CHAR_MAP: &[(char, &str)] = &[
    ('-', "_"),
    (':', "_COLON_"),
    ('+', "_PLUS_"),
    ('>', "_GT_"),
    ('<', "_LT_"),
    ('=', "_EQ_"),
    ('~', "_TILDE_"),
    ('!', "_BANG_"),
    ('@', "_CIRCA_"),
    ('#', "_SHARP_"),
    ('\'', "_SINGLEQUOTE_"),
    ('"', "_DOUBLEQUOTE_"),
    ('%', "_PERCENT_"),
    ('^', "_CARET_"),
    ('&', "_AMPERSAND_"),
    ('*', "_STAR_"),
    ('|', "_BAR_"),
    ('{', "_LBRACE_"),
    ('}', "_RBRACE_"),
    ('[', "_LBRACK_"),
    (']', "_RBRACK_"),
    ('/', "_SLASH_"),
    ('\\', "_BSLASH_"),
    ('?', "_QMARK_"),
];

pub fn munge(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        match CHAR_MAP.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => out.push_str(to),
            None => out.push(c),
        }
    }
    out
}

pub fn demunge(munged: &str) -> String {
    let mut escapes: Vec<(&str, char)> = CHAR_MAP.iter().map(|(c, s)| (*s, *c)).collect();
    escapes.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    let mut out = String::with_capacity(munged.len());
    let mut rest = munged;
    'outer: while !rest.is_empty() {
        for (escape, c) in &escapes {
            if let Some(tail) = rest.strip_prefix(escape) {
                out.push(*c);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            out.push(if c == '$' { '/' } else { c });
        }
        rest = chars.as_str();
    }
    out
}

pub fn trim_gen_id(name: &str) -> &str {
    match name.rfind("__") {
        Some(i) => &name[..i],
        None => name,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjKind {
    Fn,
    Reify,
    Deftype,
}

pub struct ObjMethod {
    pub name: String,
    pub params: Vec<Rc<Class>>,
    pub ret: Rc<Class>,
    pub arg_locals: Vec<Rc<LocalBinding>>,
    pub variadic: bool,
    pub is_static: bool,
    pub body: Expr,
    pub max_local: i32,
    pub catch_finally_locals: HashSet<i32>,
    pub line: u32,
    pub bridges: Vec<(Vec<Rc<Class>>, Rc<Class>)>,
}

impl ObjMethod {
    pub fn required(&self) -> usize {
        if self.variadic {
            self.arg_locals.len().saturating_sub(1)
        } else {
            self.arg_locals.len()
        }
    }
}

pub struct ObjExpr {
    pub name: String,
    pub kind: ObjKind,
    pub class: Rc<Class>,
    pub closes: Vec<Rc<LocalBinding>>,
    pub close_exprs: Vec<LocalBindingExpr>,
    pub tag_class: Option<Rc<Class>>,
}

impl ObjExpr {
    pub fn java_class(&self) -> Option<Rc<Class>> {
        match self.kind {
            ObjKind::Fn => self.tag_class.clone().or_else(|| host().get("clojure.lang.AFunction")),
            ObjKind::Reify => Some(self.class.clone()),
            ObjKind::Deftype => None,
        }
    }

    pub fn eval(&self, vm: &mut Vm) -> Result<Value> {
        if self.kind == ObjKind::Deftype {
            return Ok(Value::Nil);
        }
        if !self.closes.is_empty() {
            return Err(ErrorKind::internal("Can't eval locals").into());
        }
        let Some(ctor) = self.class.ctors().into_iter().find(|c| c.params.is_empty()) else {
            return Err(ErrorKind::internal(format!("{} has no empty constructor", self.name)).into());
        };
        vm.construct(&self.class, &ctor, &[]).map_err(|e| ErrorKind::Thrown(e).into())
    }
}

#[derive(Default)]
pub struct UnitBuilder {
    pub constants: Vec<Value>,
    pub host_sites: Vec<HostSite>,
    pub keyword_sites: Vec<Keyword>,
}

impl UnitBuilder {
    pub fn constant(&mut self, v: &Value) -> Result<u16> {
        if let Some(i) = self.constants.iter().position(|c| identical(c, v)) {
            return Ok(i as u16);
        }
        self.constants.push(v.clone());
        u16::try_from(self.constants.len() - 1).map_err(|_| ErrorKind::internal("constant pool overflow").into())
    }

    pub fn host_site(&mut self, site: HostSite) -> Result<u16> {
        let same = |existing: &HostSite| match (existing, &site) {
            (HostSite::Method(a), HostSite::Method(b)) => Rc::ptr_eq(a, b),
            (HostSite::Field(a), HostSite::Field(b)) => Rc::ptr_eq(a, b),
            (HostSite::Ctor { ctor: a, .. }, HostSite::Ctor { ctor: b, .. }) => Rc::ptr_eq(a, b),
            _ => false,
        };
        if let Some(i) = self.host_sites.iter().position(same) {
            return Ok(i as u16);
        }
        self.host_sites.push(site);
        u16::try_from(self.host_sites.len() - 1).map_err(|_| ErrorKind::internal("too many host call sites").into())
    }

    pub fn keyword_site(&mut self, kw: &Keyword) -> Result<u16> {
        self.keyword_sites.push(kw.clone());
        u16::try_from(self.keyword_sites.len() - 1).map_err(|_| ErrorKind::internal("too many keyword sites").into())
    }
}

pub struct UnitSpec {
    pub name: String,
    pub kind: ObjKind,
    pub superclass: Rc<Class>,
    pub interfaces: Vec<Rc<Class>>,
    pub closes: Vec<Rc<LocalBinding>>,
    pub field_classes: Vec<Rc<Class>>,
    pub alt_ctor_drops: usize,
    pub methods: Vec<ObjMethod>,
    pub once_only: bool,
}

pub fn compile_unit(spec: UnitSpec, options: &CompilerOptions) -> Result<Rc<Class>> {
    let mut builder = UnitBuilder::default();
    let fields: IndexMap<u64, u16> = spec.closes.iter().enumerate().map(|(i, b)| (b.id, i as u16)).collect();
    let mut methods = Vec::with_capacity(spec.methods.len());
    let mut bridges = Vec::new();
    for (idx, m) in spec.methods.iter().enumerate() {
        methods.push(emit_method(m, &mut builder, &fields, spec.once_only, options)?);
        for (params, ret) in &m.bridges {
            bridges.push(Bridge { name: m.name.clone(), params: params.clone(), ret: ret.clone(), target: idx });
        }
    }
    let object = host().object();
    let field_decls = spec
        .closes
        .iter()
        .enumerate()
        .map(|(i, b)| FieldDecl {
            name: b.name.clone(),
            class: spec.field_classes.get(i).cloned().or_else(|| b.prim.clone()).unwrap_or_else(|| object.clone()),
            mutable: b.mutable,
        })
        .collect();
    let unit = CompiledUnit {
        name: spec.name,
        kind: if spec.kind == ObjKind::Fn { UnitKind::Fn } else { UnitKind::Type },
        superclass: spec.superclass,
        interfaces: spec.interfaces,
        fields: field_decls,
        alt_ctor_drops: spec.alt_ctor_drops,
        methods,
        bridges,
        constants: builder.constants,
        host_sites: builder.host_sites,
        keyword_sites: builder.keyword_sites,
        once_only: spec.once_only,
    };
    if options.generate_asm {
        log::debug!("{}", unit.listing());
    }
    Ok(loader::define(unit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn munge_escapes_special_characters() {
        assert_eq!(munge("my-fn"), "my_fn");
        assert_eq!(munge("even?"), "even_QMARK_");
        assert_eq!(munge("->Point"), "__GT_Point");
        assert_eq!(munge("a.b"), "a.b");
    }

    #[test]
    fn demunge_prefers_the_longest_escape() {
        assert_eq!(demunge("even_QMARK_"), "even?");
        assert_eq!(demunge("__GT_Point"), "->Point");
        assert_eq!(demunge("user$my_fn"), "user/my-fn");
        assert_eq!(demunge(&munge("swap!")), "swap!");
    }

    #[test]
    fn generated_ids_are_trimmed() {
        assert_eq!(trim_gen_id("user$f__12"), "user$f");
        assert_eq!(trim_gen_id("user$f"), "user$f");
    }

    #[test]
    fn constant_pool_shares_identical_values() {
        let mut b = UnitBuilder::default();
        let kw = Value::kw("a");
        let first = b.constant(&kw).unwrap();
        let again = b.constant(&Value::kw("a")).unwrap();
        let other = b.constant(&Value::from("a")).unwrap();
        assert_eq!(first, again);
        assert_ne!(first, other);
        let s = Value::from("a");
        let s2 = Value::from("a");
        assert_ne!(b.constant(&s).unwrap(), b.constant(&s2).unwrap());
        let k1 = b.keyword_site(&Keyword::intern("x")).unwrap();
        let k2 = b.keyword_site(&Keyword::intern("x")).unwrap();
        assert_ne!(k1, k2);
    }
}
