use std::cell::RefCell;
use std::rc::Rc;

use crate::runtime::core;
use crate::runtime::host::{host, Class, Ctor, FieldSlot, Method, MethodBody, PrimType};
use crate::runtime::namespace::Namespaces;
use crate::runtime::rt;
use crate::value::{equiv, hash, identical, NativeResult, Object, Value};

use super::compiler::objexpr::{demunge, munge};
use super::loader::LoadedUnit;
use super::unit::{CompiledMethod, HostSite, UnitKind};
use super::vp::{CodeReader, Instr};

const MAX_DEPTH: usize = 400;

macro_rules! operand {
    ($e:expr) => {
        match $e {
            Some(v) => v,
            None => return Err(truncated()),
        }
    };
}

macro_rules! long_op {
    ($frame:ident, $op:ident) => {{
        let b = pop_long($frame)?;
        let a = pop_long($frame)?;
        match a.$op(b) {
            Some(r) => $frame.push(Value::Long(r)),
            None => return Err(rt::exception("java.lang.ArithmeticException", "integer overflow")),
        }
    }};
}

macro_rules! double_op {
    ($frame:ident, $op:tt) => {{
        let b = pop_double($frame)?;
        let a = pop_double($frame)?;
        $frame.push(Value::Double(a $op b));
    }};
}

macro_rules! comparison_op {
    ($frame:ident, $pop:ident, $op:tt) => {{
        let b = $pop($frame)?;
        let a = $pop($frame)?;
        $frame.push(Value::Bool(a $op b));
    }};
}

fn truncated() -> Value {
    rt::illegal_state("truncated instruction stream")
}

fn npe(what: &str) -> Value {
    rt::exception("java.lang.NullPointerException", what)
}

fn pop_long(frame: &mut Frame) -> Result<i64, Value> {
    match frame.pop()? {
        Value::Long(l) => Ok(l),
        other => Err(rt::class_cast(&other, "long")),
    }
}

fn pop_double(frame: &mut Frame) -> Result<f64, Value> {
    match frame.pop()? {
        Value::Double(d) => Ok(d),
        Value::Long(l) => Ok(l as f64),
        other => Err(rt::class_cast(&other, "double")),
    }
}

struct Frame {
    stack: Vec<Value>,
    locals: Vec<Value>,
}

impl Frame {
    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Result<Value, Value> {
        self.stack.pop().ok_or_else(|| rt::illegal_state("operand stack underflow"))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<Value>, Value> {
        if self.stack.len() < n {
            return Err(rt::illegal_state("operand stack underflow"));
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    fn local(&self, idx: u16) -> Value {
        self.locals.get(idx as usize).cloned().unwrap_or(Value::Nil)
    }

    fn set_local(&mut self, idx: u16, v: Value) {
        let idx = idx as usize;
        if idx >= self.locals.len() {
            self.locals.resize(idx + 1, Value::Nil);
        }
        self.locals[idx] = v;
    }

    fn this_object(&self) -> Result<Rc<Object>, Value> {
        match self.locals.first() {
            Some(Value::Object(o)) => Ok(o.clone()),
            _ => Err(rt::illegal_state("closed-over access outside an instance method")),
        }
    }
}

enum Step {
    Continue,
    Return(Value),
}

fn unbox(vm: &mut Vm, prim: PrimType, v: Value) -> NativeResult {
    match prim {
        PrimType::Long | PrimType::Int | PrimType::Short | PrimType::Byte => match v {
            Value::Long(_) => Ok(v),
            other => rt::long_cast(vm, &[other]),
        },
        PrimType::Double | PrimType::Float => match v {
            Value::Double(_) => Ok(v),
            other => rt::double_cast(vm, &[other]),
        },
        PrimType::Boolean => match v {
            Value::Bool(_) => Ok(v),
            other => Err(rt::class_cast(&other, "java.lang.Boolean")),
        },
        PrimType::Char => match v {
            Value::Char(_) => Ok(v),
            other => Err(rt::class_cast(&other, "java.lang.Character")),
        },
        PrimType::Void => Ok(Value::Nil),
    }
}

fn param_accepts(param: &Class, arg: &Value) -> bool {
    match param.prim() {
        Some(PrimType::Long | PrimType::Int | PrimType::Short | PrimType::Byte) => matches!(arg, Value::Long(_)),
        Some(PrimType::Double | PrimType::Float) => matches!(arg, Value::Double(_)),
        Some(PrimType::Boolean) => matches!(arg, Value::Bool(_)),
        Some(PrimType::Char) => matches!(arg, Value::Char(_)),
        Some(PrimType::Void) => false,
        None => host().class_of(arg).map_or(true, |c| param.is_assignable_from(&c)),
    }
}

fn select_method(candidates: &[Rc<Method>], args: &[Value]) -> Option<Rc<Method>> {
    if let [only] = candidates {
        return Some(only.clone());
    }
    candidates.iter().find(|m| m.params.iter().zip(args).all(|(p, a)| param_accepts(p, a))).cloned()
}

fn fn_display_name(unit_name: &str) -> String {
    let base = match unit_name.rfind("__") {
        Some(pos) if unit_name[pos + 2..].chars().all(|c| c.is_ascii_digit()) && pos + 2 < unit_name.len() => {
            &unit_name[..pos]
        }
        _ => unit_name,
    };
    demunge(base)
}

fn find_handler(method: &CompiledMethod, pc: u32, exception: &Value) -> Option<u32> {
    let thrown = host().class_of(exception);
    method
        .exception_table
        .iter()
        .find(|e| {
            pc >= e.start
                && pc < e.end
                && match &e.class {
                    None => true,
                    Some(c) => thrown.as_ref().map_or(false, |t| c.is_assignable_from(t)),
                }
        })
        .map(|e| e.handler)
}

pub struct Vm {
    namespaces: Rc<Namespaces>,
    depth: usize,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Vm {
        Vm::with_namespaces(Rc::new(Namespaces::new(core::install)))
    }

    pub fn with_namespaces(namespaces: Rc<Namespaces>) -> Vm {
        Vm { namespaces, depth: 0 }
    }

    pub fn namespaces(&self) -> Rc<Namespaces> {
        self.namespaces.clone()
    }

    pub fn invoke(&mut self, f: &Value, args: &[Value]) -> NativeResult {
        match f {
            Value::Native(n) => (n.func)(self, args),
            Value::Object(o) => match o.class.loaded_unit() {
                Some(unit) if unit.unit.kind == UnitKind::Fn => {
                    let unit = unit.clone();
                    self.invoke_fn(&unit, f, args)
                }
                _ => self.invoke_member(f, "invoke", args),
            },
            Value::Keyword(_) | Value::Symbol(_) => match args {
                [coll] => self.keyword_lookup(coll, f, Value::Nil),
                [coll, not_found] => self.keyword_lookup(coll, f, not_found.clone()),
                _ => Err(rt::arity_exception(args.len(), &f.to_string())),
            },
            Value::Map(_) | Value::Set(_) => match args {
                [key] => rt::get(self, &[f.clone(), key.clone()]),
                [key, not_found] => rt::get(self, &[f.clone(), key.clone(), not_found.clone()]),
                _ => Err(rt::arity_exception(args.len(), f.type_name())),
            },
            Value::Vector(_) => match args {
                [idx] => rt::nth(self, &[f.clone(), idx.clone()]),
                _ => Err(rt::arity_exception(args.len(), f.type_name())),
            },
            Value::Var(v) => {
                let target = v.deref()?;
                self.invoke(&target, args)
            }
            other => Err(rt::class_cast(other, "clojure.lang.IFn")),
        }
    }

    fn invoke_fn(&mut self, unit: &Rc<LoadedUnit>, this: &Value, args: &[Value]) -> NativeResult {
        let methods = &unit.unit.methods;
        let n = args.len();
        if let Some(idx) = methods.iter().position(|m| !m.is_static && !m.variadic && m.required == n) {
            return self.execute(unit, idx, this.clone(), args.to_vec());
        }
        if let Some(idx) = methods.iter().position(|m| m.variadic && n >= m.required) {
            let required = methods[idx].required;
            let mut fixed = args[..required].to_vec();
            fixed.push(if n > required { Value::list(args[required..].to_vec()) } else { Value::Nil });
            return self.execute(unit, idx, this.clone(), fixed);
        }
        Err(rt::arity_exception(n, &fn_display_name(&unit.unit.name)))
    }

    pub fn call_method(&mut self, method: &Rc<Method>, target: Option<&Value>, args: &[Value]) -> NativeResult {
        match &method.body {
            MethodBody::Native(f) => match target {
                None => f(self, args),
                Some(t) => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(t.clone());
                    full.extend_from_slice(args);
                    f(self, &full)
                }
            },
            MethodBody::Compiled(idx) => {
                let unit = match target {
                    Some(Value::Object(o)) if o.class.name == method.declaring => o.class.loaded_unit().cloned(),
                    _ => host().get(&method.declaring).and_then(|c| c.loaded_unit().cloned()),
                };
                let Some(unit) = unit else {
                    return Err(rt::illegal_state(format!("{} is not loaded", method.declaring)));
                };
                self.execute(&unit, *idx, target.cloned().unwrap_or(Value::Nil), args.to_vec())
            }
            MethodBody::Abstract => {
                let Some(t) = target else {
                    return Err(rt::unsupported(format!("{} has no implementation", method.name)));
                };
                let Some(class) = host().class_of(t) else { return Err(npe(&method.name)) };
                let concrete = class
                    .methods(&method.name, method.arity(), false)
                    .into_iter()
                    .find(|m| !matches!(m.body, MethodBody::Abstract));
                match concrete {
                    Some(m) => self.call_method(&m, target, args),
                    None => Err(rt::unsupported(format!("{}.{} is not implemented", class.name, method.name))),
                }
            }
        }
    }

    pub fn invoke_member(&mut self, target: &Value, name: &str, args: &[Value]) -> NativeResult {
        let Some(class) = host().class_of(target) else { return Err(npe(name)) };
        let candidates = class.methods(name, args.len(), false);
        match select_method(&candidates, args) {
            Some(m) => self.call_method(&m, Some(target), args),
            None => Err(rt::illegal_argument(format!(
                "No matching method {} found taking {} args for class {}",
                name,
                args.len(),
                class.name
            ))),
        }
    }

    pub fn invoke_static(&mut self, class: &Rc<Class>, name: &str, args: &[Value]) -> NativeResult {
        let candidates = class.methods(name, args.len(), true);
        match select_method(&candidates, args) {
            Some(m) => self.call_method(&m, None, args),
            None => Err(rt::illegal_argument(format!("No matching method {} found taking {} args", name, args.len()))),
        }
    }

    fn call_virtual(&mut self, method: &Rc<Method>, target: &Value, args: &[Value]) -> NativeResult {
        let Some(class) = host().class_of(target) else { return Err(npe(&method.name)) };
        let resolved = class
            .methods(&method.name, method.arity(), false)
            .into_iter()
            .find(|m| m.same_signature(method) && !matches!(m.body, MethodBody::Abstract))
            .unwrap_or_else(|| method.clone());
        self.call_method(&resolved, Some(target), args)
    }

    pub fn construct(&mut self, class: &Rc<Class>, ctor: &Rc<Ctor>, args: &[Value]) -> NativeResult {
        if let Some(f) = ctor.func {
            let mut full = Vec::with_capacity(args.len() + 1);
            full.push(Value::Class(class.clone()));
            full.extend_from_slice(args);
            return f(self, &full);
        }
        let mut fields = Vec::with_capacity(class.instance_field_count());
        for (arg, param) in args.iter().zip(&ctor.params) {
            fields.push(match param.prim() {
                Some(p) => unbox(self, p, arg.clone())?,
                None => arg.clone(),
            });
        }
        fields.resize(class.instance_field_count().max(args.len()), Value::Nil);
        Ok(Value::Object(Rc::new(Object { class: class.clone(), fields: RefCell::new(fields), meta: None })))
    }

    pub fn construct_reflective(&mut self, class: &Rc<Class>, args: &[Value]) -> NativeResult {
        let ctors: Vec<Rc<Ctor>> = class.ctors().into_iter().filter(|c| c.params.len() == args.len()).collect();
        let chosen = match &ctors[..] {
            [only] => Some(only.clone()),
            _ => ctors.iter().find(|c| c.params.iter().zip(args).all(|(p, a)| param_accepts(p, a))).cloned(),
        };
        match chosen {
            Some(ctor) => self.construct(class, &ctor, args),
            None => Err(rt::illegal_argument(format!("No matching ctor found for class {}", class.name))),
        }
    }

    pub fn keyword_lookup(&mut self, coll: &Value, key: &Value, not_found: Value) -> NativeResult {
        let Value::Object(o) = coll else {
            return rt::get(self, &[coll.clone(), key.clone(), not_found]);
        };
        if let (Some(kw), Some(_)) = (key.as_keyword(), o.class.loaded_unit()) {
            if let Some(field) = o.class.field(&munge(&kw.name), false) {
                if let FieldSlot::Instance(i) = field.slot {
                    return Ok(o.fields.borrow().get(i).cloned().unwrap_or(Value::Nil));
                }
            }
        }
        let lookup = host().get("clojure.lang.ILookup");
        if lookup.map_or(false, |l| l.is_assignable_from(&o.class)) {
            return self.invoke_member(coll, "valAt", &[key.clone(), not_found]);
        }
        Ok(not_found)
    }

    fn get_field_reflective(&mut self, target: &Value, name: &str) -> NativeResult {
        let Some(class) = host().class_of(target) else { return Err(npe(name)) };
        if let Some(field) = class.field(name, false) {
            if let (FieldSlot::Instance(i), Value::Object(o)) = (&field.slot, target) {
                return Ok(o.fields.borrow().get(*i).cloned().unwrap_or(Value::Nil));
            }
        }
        if !class.methods(name, 0, false).is_empty() {
            return self.invoke_member(target, name, &[]);
        }
        Err(rt::illegal_argument(format!("No matching field found: {} for class {}", name, class.name)))
    }

    fn set_field_reflective(&mut self, target: &Value, name: &str, v: Value) -> NativeResult {
        let Some(class) = host().class_of(target) else { return Err(npe(name)) };
        match (class.field(name, false), target) {
            (Some(field), Value::Object(o)) if field.mutable => {
                if let FieldSlot::Instance(i) = field.slot {
                    o.fields.borrow_mut()[i] = v.clone();
                }
                Ok(v)
            }
            _ => Err(rt::illegal_argument(format!("No matching field found: {} for class {}", name, class.name))),
        }
    }

    pub fn execute(&mut self, unit: &Rc<LoadedUnit>, idx: usize, this: Value, args: Vec<Value>) -> NativeResult {
        if self.depth >= MAX_DEPTH {
            return Err(rt::exception("java.lang.StackOverflowError", "call depth exceeded"));
        }
        self.depth += 1;
        let result = self.run(unit, idx, this, args);
        self.depth -= 1;
        result
    }

    fn run(&mut self, unit: &Rc<LoadedUnit>, idx: usize, this: Value, args: Vec<Value>) -> NativeResult {
        let Some(method) = unit.unit.methods.get(idx) else {
            return Err(rt::illegal_state(format!("{} has no method {}", unit.unit.name, idx)));
        };
        let mut locals = vec![Value::Nil; method.max_locals.max(args.len() + 1)];
        locals[0] = this;
        for (i, (arg, param)) in args.into_iter().zip(method.params.iter()).enumerate() {
            locals[i + 1] = match param.prim() {
                Some(p) => unbox(self, p, arg)?,
                None => arg,
            };
        }
        let mut frame = Frame { stack: Vec::with_capacity(8), locals };
        let mut code = CodeReader::new(&method.code);
        loop {
            let pc = code.position();
            match self.step(unit, &mut frame, &mut code) {
                Ok(Step::Continue) => {}
                Ok(Step::Return(v)) => return Ok(v),
                Err(exception) => match find_handler(method, pc, &exception) {
                    Some(handler) => {
                        log::trace!("{}: handler at {} for exception thrown at {}", unit.unit.name, handler, pc);
                        frame.stack.clear();
                        frame.push(exception);
                        code.jump_to(handler);
                    }
                    None => return Err(exception),
                },
            }
        }
    }

    fn constant(unit: &LoadedUnit, idx: u16) -> Result<Value, Value> {
        unit.constant(idx as usize).ok_or_else(|| rt::illegal_state(format!("no constant {}", idx)))
    }

    fn site(unit: &LoadedUnit, idx: u16) -> Result<HostSite, Value> {
        unit.host_site(idx as usize).ok_or_else(|| rt::illegal_state(format!("no host site {}", idx)))
    }

    fn var_constant(unit: &LoadedUnit, idx: u16) -> Result<Rc<crate::runtime::namespace::Var>, Value> {
        match Vm::constant(unit, idx)? {
            Value::Var(v) => Ok(v),
            other => Err(rt::class_cast(&other, "clojure.lang.Var")),
        }
    }

    fn step(&mut self, unit: &Rc<LoadedUnit>, frame: &mut Frame, code: &mut CodeReader) -> Result<Step, Value> {
        let Some(op) = code.read_u8() else {
            return Ok(Step::Return(frame.stack.pop().unwrap_or(Value::Nil)));
        };
        match Instr::try_from(op) {
            Ok(Instr::Nil) => frame.push(Value::Nil),
            Ok(Instr::True) => frame.push(Value::Bool(true)),
            Ok(Instr::False) => frame.push(Value::Bool(false)),
            Ok(Instr::Long) => frame.push(Value::Long(operand!(code.read_i64()))),
            Ok(Instr::Double) => frame.push(Value::Double(operand!(code.read_f64()))),
            Ok(Instr::Const) => frame.push(Vm::constant(unit, operand!(code.read_u16()))?),
            Ok(Instr::Pop) => {
                frame.pop()?;
            }
            Ok(Instr::Dup) => {
                let top = frame.stack.last().cloned().ok_or_else(|| rt::illegal_state("operand stack underflow"))?;
                frame.push(top);
            }
            Ok(Instr::LoadLocal) => {
                let idx = operand!(code.read_u16());
                let v = frame.local(idx);
                frame.push(v);
            }
            Ok(Instr::StoreLocal) => {
                let idx = operand!(code.read_u16());
                let v = frame.pop()?;
                frame.set_local(idx, v);
            }
            Ok(Instr::ClearLocal) => {
                let idx = operand!(code.read_u16());
                frame.set_local(idx, Value::Nil);
            }
            Ok(Instr::LoadClosed) => {
                let idx = operand!(code.read_u16()) as usize;
                let this = frame.this_object()?;
                let v = this.fields.borrow().get(idx).cloned().unwrap_or(Value::Nil);
                frame.push(v);
            }
            Ok(Instr::SetClosed) => {
                let idx = operand!(code.read_u16()) as usize;
                let v = frame.pop()?;
                let this = frame.this_object()?;
                let mut fields = this.fields.borrow_mut();
                if idx < fields.len() {
                    fields[idx] = v;
                }
            }
            Ok(Instr::ClearClosed) => {
                let idx = operand!(code.read_u16()) as usize;
                let this = frame.this_object()?;
                let mut fields = this.fields.borrow_mut();
                if idx < fields.len() {
                    fields[idx] = Value::Nil;
                }
            }
            Ok(Instr::VarGet) => {
                let var = Vm::var_constant(unit, operand!(code.read_u16()))?;
                frame.push(var.deref()?);
            }
            Ok(Instr::VarSet) => {
                let var = Vm::var_constant(unit, operand!(code.read_u16()))?;
                let v = frame.pop()?;
                frame.push(var.set(v)?);
            }
            Ok(Instr::BindRoot) => {
                let var = Vm::var_constant(unit, operand!(code.read_u16()))?;
                let v = frame.pop()?;
                var.bind_root(v);
            }
            Ok(Instr::SetVarMeta) => {
                let var = Vm::var_constant(unit, operand!(code.read_u16()))?;
                let meta = frame.pop()?;
                var.set_meta(meta);
            }
            Ok(Instr::SetDynamic) => {
                let var = Vm::var_constant(unit, operand!(code.read_u16()))?;
                var.set_dynamic(true);
            }
            Ok(Instr::ResolveVar) => {
                let sym = Vm::constant(unit, operand!(code.read_u16()))?;
                let Some(s) = sym.as_symbol() else { return Err(rt::class_cast(&sym, "clojure.lang.Symbol")) };
                match self.namespaces.lookup_var(s, false) {
                    Ok(Some(var)) => frame.push(var.deref()?),
                    _ => return Err(rt::illegal_state(format!("Unable to resolve var: {} in this context", s))),
                }
            }
            Ok(Instr::Jump) => {
                let target = operand!(code.read_u32());
                code.jump_to(target);
            }
            Ok(Instr::JumpIfFalse) => {
                let target = operand!(code.read_u32());
                if !frame.pop()?.is_truthy() {
                    code.jump_to(target);
                }
            }
            Ok(Instr::TableSwitch) => {
                let low = operand!(code.read_i32());
                let high = operand!(code.read_i32());
                let default = operand!(code.read_u32());
                let mut targets = Vec::with_capacity((high as i64 - low as i64 + 1).max(0) as usize);
                for _ in low..=high {
                    targets.push(operand!(code.read_u32()));
                }
                let key = pop_long(frame)?;
                let target = if key >= low as i64 && key <= high as i64 { targets[(key - low as i64) as usize] } else { default };
                code.jump_to(target);
            }
            Ok(Instr::LookupSwitch) => {
                let n = operand!(code.read_u16());
                let default = operand!(code.read_u32());
                let mut pairs = Vec::with_capacity(n as usize);
                for _ in 0..n {
                    pairs.push((operand!(code.read_i32()), operand!(code.read_u32())));
                }
                let key = pop_long(frame)?;
                let target = pairs.iter().find(|(k, _)| *k as i64 == key).map_or(default, |(_, t)| *t);
                code.jump_to(target);
            }
            Ok(Instr::HashKey) => {
                let v = frame.pop()?;
                frame.push(Value::Long(hash(&v) as i64));
            }
            Ok(Instr::ShiftMask) => {
                let shift = operand!(code.read_u8());
                let mask = operand!(code.read_i32());
                let key = pop_long(frame)? as i32;
                frame.push(Value::Long(((key >> shift) & mask) as i64));
            }
            Ok(Instr::IntKey) => {
                let default = operand!(code.read_u32());
                match frame.pop()? {
                    Value::Long(l) => frame.push(Value::Long(l as i32 as i64)),
                    Value::Double(d) => frame.push(Value::Long(d as i32 as i64)),
                    _ => code.jump_to(default),
                }
            }
            Ok(Instr::Equiv) => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(Value::Bool(equiv(&a, &b)));
            }
            Ok(Instr::Identical) => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(Value::Bool(identical(&a, &b)));
            }
            Ok(Instr::Invoke) => {
                let argc = operand!(code.read_u8()) as usize;
                let args = frame.pop_n(argc)?;
                let f = frame.pop()?;
                let result = self.invoke(&f, &args)?;
                frame.push(result);
            }
            Ok(Instr::CallStatic) => {
                let site = Vm::site(unit, operand!(code.read_u16()))?;
                let argc = operand!(code.read_u8()) as usize;
                let args = frame.pop_n(argc)?;
                let HostSite::Method(m) = site else { return Err(rt::illegal_state("static call site is not a method")) };
                let result = self.call_method(&m, None, &args)?;
                frame.push(result);
            }
            Ok(Instr::CallVirtual) => {
                let site = Vm::site(unit, operand!(code.read_u16()))?;
                let argc = operand!(code.read_u8()) as usize;
                let args = frame.pop_n(argc)?;
                let target = frame.pop()?;
                let HostSite::Method(m) = site else { return Err(rt::illegal_state("virtual call site is not a method")) };
                if target.is_nil() {
                    return Err(npe(&m.name));
                }
                let result = self.call_virtual(&m, &target, &args)?;
                frame.push(result);
            }
            Ok(Instr::CallReflective) => {
                let idx = operand!(code.read_u16());
                let site = Vm::site(unit, idx)?;
                let argc = operand!(code.read_u8()) as usize;
                let args = frame.pop_n(argc)?;
                let HostSite::Reflective { name, static_class } = site else {
                    return Err(rt::illegal_state("reflective call site expected"));
                };
                let result = match static_class {
                    Some(class) => self.invoke_static(&class, &name, &args)?,
                    None => {
                        let target = frame.pop()?;
                        self.member_site(unit, idx as usize, &target, &name, &args)?
                    }
                };
                frame.push(result);
            }
            Ok(Instr::GetStatic) => {
                let HostSite::Field(field) = Vm::site(unit, operand!(code.read_u16()))? else {
                    return Err(rt::illegal_state("field site expected"));
                };
                match &field.slot {
                    FieldSlot::Static(v) => frame.push(v.clone()),
                    FieldSlot::Instance(_) => return Err(rt::illegal_state(format!("{} is not static", field.name))),
                }
            }
            Ok(Instr::GetField) => {
                let HostSite::Field(field) = Vm::site(unit, operand!(code.read_u16()))? else {
                    return Err(rt::illegal_state("field site expected"));
                };
                let target = frame.pop()?;
                let v = match (&field.slot, &target) {
                    (FieldSlot::Instance(i), Value::Object(o)) => o.fields.borrow().get(*i).cloned().unwrap_or(Value::Nil),
                    (_, Value::Nil) => return Err(npe(&field.name)),
                    _ => return Err(rt::class_cast(&target, &field.class.name)),
                };
                frame.push(v);
            }
            Ok(Instr::SetField) => {
                let HostSite::Field(field) = Vm::site(unit, operand!(code.read_u16()))? else {
                    return Err(rt::illegal_state("field site expected"));
                };
                let v = frame.pop()?;
                let target = frame.pop()?;
                match (&field.slot, &target) {
                    (FieldSlot::Instance(i), Value::Object(o)) => o.fields.borrow_mut()[*i] = v.clone(),
                    (_, Value::Nil) => return Err(npe(&field.name)),
                    _ => return Err(rt::class_cast(&target, &field.class.name)),
                }
                frame.push(v);
            }
            Ok(Instr::GetFieldReflective) => {
                let name = Vm::constant(unit, operand!(code.read_u16()))?.to_str();
                let target = frame.pop()?;
                let v = self.get_field_reflective(&target, &name)?;
                frame.push(v);
            }
            Ok(Instr::SetFieldReflective) => {
                let name = Vm::constant(unit, operand!(code.read_u16()))?.to_str();
                let v = frame.pop()?;
                let target = frame.pop()?;
                let v = self.set_field_reflective(&target, &name, v)?;
                frame.push(v);
            }
            Ok(Instr::New) => {
                let site = Vm::site(unit, operand!(code.read_u16()))?;
                let argc = operand!(code.read_u8()) as usize;
                let args = frame.pop_n(argc)?;
                let HostSite::Ctor { class, ctor } = site else { return Err(rt::illegal_state("constructor site expected")) };
                let v = self.construct(&class, &ctor, &args)?;
                frame.push(v);
            }
            Ok(Instr::NewReflective) => {
                let class = Vm::constant(unit, operand!(code.read_u16()))?;
                let argc = operand!(code.read_u8()) as usize;
                let args = frame.pop_n(argc)?;
                let Value::Class(class) = class else { return Err(rt::class_cast(&class, "java.lang.Class")) };
                let v = self.construct_reflective(&class, &args)?;
                frame.push(v);
            }
            Ok(Instr::KeywordInvoke) => {
                let site = operand!(code.read_u16()) as usize;
                let target = frame.pop()?;
                let v = self.keyword_site(unit, site, &target)?;
                frame.push(v);
            }
            Ok(Instr::MakeList) => {
                let n = operand!(code.read_u16()) as usize;
                let items = frame.pop_n(n)?;
                frame.push(Value::list(items));
            }
            Ok(Instr::MakeVector) => {
                let n = operand!(code.read_u16()) as usize;
                let items = frame.pop_n(n)?;
                frame.push(Value::vector(items));
            }
            Ok(Instr::MakeMap) => {
                let n = operand!(code.read_u16()) as usize;
                let items = frame.pop_n(n * 2)?;
                let entries = items.chunks_exact(2).map(|kv| (kv[0].clone(), kv[1].clone())).collect();
                frame.push(Value::map(entries));
            }
            Ok(Instr::MakeSet) => {
                let n = operand!(code.read_u16()) as usize;
                let items = frame.pop_n(n)?;
                frame.push(Value::set(items));
            }
            Ok(Instr::WithMeta) => {
                let meta = frame.pop()?;
                let v = frame.pop()?;
                frame.push(v.with_meta(if meta.is_nil() { None } else { Some(meta) }));
            }
            Ok(Instr::Throw) => {
                let exception = frame.pop()?;
                let throwable = host().throwable();
                return Err(match host().class_of(&exception) {
                    None => npe("throw"),
                    Some(c) if throwable.is_assignable_from(&c) => exception,
                    Some(_) => rt::class_cast(&exception, &throwable.name),
                });
            }
            Ok(Instr::MonitorEnter) | Ok(Instr::MonitorExit) => {
                if frame.pop()?.is_nil() {
                    return Err(npe("monitor"));
                }
            }
            Ok(Instr::Return) => return Ok(Step::Return(frame.pop()?)),
            Ok(Instr::InstanceOf) => {
                let class = Vm::constant(unit, operand!(code.read_u16()))?;
                let v = frame.pop()?;
                let Value::Class(class) = class else { return Err(rt::class_cast(&class, "java.lang.Class")) };
                let is = host().class_of(&v).map_or(false, |c| class.is_assignable_from(&c));
                frame.push(Value::Bool(is));
            }
            Ok(Instr::Import) => {
                let name = Vm::constant(unit, operand!(code.read_u16()))?.to_str();
                let Some(class) = host().get(&name) else {
                    return Err(rt::exception("java.lang.ClassNotFoundException", name));
                };
                self.namespaces.current().import_class(&class);
                frame.push(Value::Class(class));
            }
            Ok(Instr::Unbox) => {
                let code_byte = operand!(code.read_u8());
                let prim = PrimType::from_code(code_byte).ok_or_else(truncated)?;
                let v = frame.pop()?;
                let v = unbox(self, prim, v)?;
                frame.push(v);
            }
            Ok(Instr::AddL) => long_op!(frame, checked_add),
            Ok(Instr::SubL) => long_op!(frame, checked_sub),
            Ok(Instr::MulL) => long_op!(frame, checked_mul),
            Ok(Instr::IncL) => {
                let a = pop_long(frame)?;
                match a.checked_add(1) {
                    Some(r) => frame.push(Value::Long(r)),
                    None => return Err(rt::exception("java.lang.ArithmeticException", "integer overflow")),
                }
            }
            Ok(Instr::DecL) => {
                let a = pop_long(frame)?;
                match a.checked_sub(1) {
                    Some(r) => frame.push(Value::Long(r)),
                    None => return Err(rt::exception("java.lang.ArithmeticException", "integer overflow")),
                }
            }
            Ok(Instr::AddD) => double_op!(frame, +),
            Ok(Instr::SubD) => double_op!(frame, -),
            Ok(Instr::MulD) => double_op!(frame, *),
            Ok(Instr::DivD) => double_op!(frame, /),
            Ok(Instr::LtL) => comparison_op!(frame, pop_long, <),
            Ok(Instr::GtL) => comparison_op!(frame, pop_long, >),
            Ok(Instr::LteL) => comparison_op!(frame, pop_long, <=),
            Ok(Instr::GteL) => comparison_op!(frame, pop_long, >=),
            Ok(Instr::EqL) => comparison_op!(frame, pop_long, ==),
            Ok(Instr::LtD) => comparison_op!(frame, pop_double, <),
            Ok(Instr::GtD) => comparison_op!(frame, pop_double, >),
            Ok(Instr::LteD) => comparison_op!(frame, pop_double, <=),
            Ok(Instr::GteD) => comparison_op!(frame, pop_double, >=),
            Ok(Instr::EqD) => comparison_op!(frame, pop_double, ==),
            Err(()) => return Err(rt::illegal_state(format!("bad opcode {}", op))),
        }
        Ok(Step::Continue)
    }

    fn member_site(&mut self, unit: &Rc<LoadedUnit>, site: usize, target: &Value, name: &str, args: &[Value]) -> NativeResult {
        let Some(class) = host().class_of(target) else { return Err(npe(name)) };
        if let Some(m) = unit.cached_member(site, &class) {
            return self.call_method(&m, Some(target), args);
        }
        if let [only] = &class.methods(name, args.len(), false)[..] {
            log::trace!("caching {}.{} at site {}", class.name, name, site);
            unit.cache_member(site, &class, only.clone());
        }
        self.invoke_member(target, name, args)
    }

    fn keyword_site(&mut self, unit: &Rc<LoadedUnit>, site: usize, target: &Value) -> NativeResult {
        let Some(kw) = unit.unit.keyword_sites.get(site) else {
            return Err(rt::illegal_state(format!("no keyword site {}", site)));
        };
        if let Value::Object(o) = target {
            if o.class.loaded_unit().is_some() {
                if let Some(slot) = unit.cached_keyword_slot(site, &o.class) {
                    return Ok(o.fields.borrow().get(slot).cloned().unwrap_or(Value::Nil));
                }
                if let Some(field) = o.class.field(&munge(&kw.name), false) {
                    if let FieldSlot::Instance(slot) = field.slot {
                        unit.cache_keyword_slot(site, &o.class, slot);
                        return Ok(o.fields.borrow().get(slot).cloned().unwrap_or(Value::Nil));
                    }
                }
            }
        }
        let key = Value::Keyword(Rc::new(kw.clone()));
        self.keyword_lookup(target, &key, Value::Nil)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_and_maps_are_callable() {
        let mut vm = Vm::new();
        let m = Value::map(vec![(Value::kw("a"), Value::Long(1))]);
        assert!(matches!(vm.invoke(&Value::kw("a"), &[m.clone()]), Ok(Value::Long(1))));
        assert!(matches!(vm.invoke(&m, &[Value::kw("b"), Value::Long(9)]), Ok(Value::Long(9))));
        assert!(vm.invoke(&Value::Long(1), &[]).is_err());
    }

    #[test]
    fn display_names_drop_numeric_suffixes() {
        assert_eq!(fn_display_name("user$f__12"), "user/f");
        assert_eq!(fn_display_name("user$my_fn"), "user/my-fn");
        assert_eq!(fn_display_name("user$fn__7"), "user/fn");
    }

    #[test]
    fn reflective_calls_pick_by_runtime_arguments() {
        let mut vm = Vm::new();
        let s = Value::from("hello");
        assert!(matches!(vm.invoke_member(&s, "length", &[]), Ok(Value::Long(5))));
        let sub = vm.invoke_member(&s, "substring", &[Value::Long(1), Value::Long(3)]).unwrap();
        assert_eq!(sub.to_str(), "el");
        assert!(vm.invoke_member(&Value::Nil, "length", &[]).is_err());
    }
}
