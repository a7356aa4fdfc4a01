use std::fmt;
use std::rc::Rc;

use crate::runtime::host::{Class, Ctor, Field, Method};
use crate::value::{Keyword, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnitKind {
    Fn,
    Type,
}

#[derive(Clone)]
pub enum HostSite {
    Method(Rc<Method>),
    Field(Rc<Field>),
    Ctor { class: Rc<Class>, ctor: Rc<Ctor> },
    Reflective { name: String, static_class: Option<Rc<Class>> },
}

impl fmt::Debug for HostSite {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HostSite::Method(m) => write!(f, "{:?}", m),
            HostSite::Field(fd) => write!(f, "field {}", fd.name),
            HostSite::Ctor { class, ctor } => write!(f, "new {}/{}", class.name, ctor.params.len()),
            HostSite::Reflective { name, static_class: Some(c) } => write!(f, "reflective {}/{}", c.name, name),
            HostSite::Reflective { name, static_class: None } => write!(f, "reflective .{}", name),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    pub class: Option<Rc<Class>>,
}

pub struct CompiledMethod {
    pub name: String,
    pub params: Vec<Rc<Class>>,
    pub ret: Rc<Class>,
    pub is_static: bool,
    pub required: usize,
    pub variadic: bool,
    pub max_locals: usize,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub lines: Vec<(u32, u32)>,
    pub listing: String,
}

impl CompiledMethod {
    pub fn line_at(&self, pc: u32) -> Option<u32> {
        self.lines.iter().take_while(|(off, _)| *off <= pc).last().map(|(_, l)| *l)
    }
}

impl fmt::Debug for CompiledMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}{}", self.name, self.required, if self.variadic { "+" } else { "" })
    }
}

#[derive(Clone, Debug)]
pub struct Bridge {
    pub name: String,
    pub params: Vec<Rc<Class>>,
    pub ret: Rc<Class>,
    pub target: usize,
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub name: String,
    pub class: Rc<Class>,
    pub mutable: bool,
}

pub struct CompiledUnit {
    pub name: String,
    pub kind: UnitKind,
    pub superclass: Rc<Class>,
    pub interfaces: Vec<Rc<Class>>,
    pub fields: Vec<FieldDecl>,
    pub alt_ctor_drops: usize,
    pub methods: Vec<CompiledMethod>,
    pub bridges: Vec<Bridge>,
    pub constants: Vec<Value>,
    pub host_sites: Vec<HostSite>,
    pub keyword_sites: Vec<Keyword>,
    pub once_only: bool,
}

impl CompiledUnit {
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for m in &self.methods {
            out += &format!("{}.{}:\n{}", self.name, m.name, m.listing);
        }
        out
    }
}

impl fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("methods", &self.methods)
            .field("constants", &self.constants)
            .finish()
    }
}
