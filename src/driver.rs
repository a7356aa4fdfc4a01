use std::rc::Rc;

use crate::error::{CompilerError, ErrorKind, Result};
use crate::options::CompilerOptions;
use crate::parser::{read_all, ParseError};
use crate::runtime::host::Class;
use crate::runtime::rt;
use crate::value::{identical, Value};
use crate::vm::compiler::expr::Expr;
use crate::vm::compiler::{Compiler, Context};
use crate::vm::vm::Vm;

pub const NO_SOURCE_PATH: &str = "NO_SOURCE_PATH";

pub struct Driver {
    vm: Vm,
    options: CompilerOptions,
    source: String,
}

fn reader_error(e: ParseError, path: &str) -> CompilerError {
    CompilerError::from(ErrorKind::Reader(e.error)).at(path, e.line, e.column)
}

fn form_line(form: &Value) -> (u32, u32) {
    let get = |key| match form.meta_get(key) {
        Some(Value::Long(n)) if n > 0 => n as u32,
        _ => 0,
    };
    (get("line"), get("column"))
}

fn top_level_do(form: &Value) -> Option<&[Value]> {
    let items = form.list_items()?;
    match items.first()?.as_symbol() {
        Some(s) if s.is("do") => Some(&items[1..]),
        _ => None,
    }
}

fn is_def(form: &Value) -> bool {
    form.list_items()
        .and_then(|items| items.first()?.as_symbol().cloned())
        .map_or(false, |s| s.name.starts_with("def"))
}

impl Driver {
    pub fn new(options: CompilerOptions) -> Driver {
        Driver { vm: Vm::new(), options, source: NO_SOURCE_PATH.to_string() }
    }

    pub fn with_vm(vm: Vm, options: CompilerOptions) -> Driver {
        Driver { vm, options, source: NO_SOURCE_PATH.to_string() }
    }

    pub fn vm(&mut self) -> &mut Vm {
        &mut self.vm
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    fn compiler(&mut self) -> Compiler<'_> {
        Compiler::new(&mut self.vm, self.options.clone(), &self.source)
    }

    fn positioned(&self, e: CompilerError, form: &Value, outer: &Value) -> CompilerError {
        let (line, column) = match form_line(form) {
            (0, _) => form_line(outer),
            pos => pos,
        };
        e.at(&self.source, line, column)
    }

    pub fn eval(&mut self, form: &Value) -> Result<Value> {
        let original = form;
        let form = self.macroexpand(form).map_err(|e| self.positioned(e, original, original))?;
        if let Some(body) = top_level_do(&form) {
            let mut last = Value::Nil;
            for f in body {
                last = self.eval(f).map_err(|e| self.positioned(e, f, original))?;
            }
            return Ok(last);
        }
        self.eval_expanded(&form).map_err(|e| self.positioned(e, &form, original))
    }

    fn eval_expanded(&mut self, form: &Value) -> Result<Value> {
        if form.is_coll() && !is_def(form) {
            let name = format!("eval{}", rt::next_id());
            let wrapped = Value::list(vec![Value::sym("fn*"), Value::vector(vec![]), form.clone()]);
            let f = self.compiler().analyze_named(Context::Expression, &wrapped, Some(&name))?;
            let f = f.eval(&mut self.vm)?;
            log::trace!("running {}", name);
            return self.vm.invoke(&f, &[]).map_err(|e| ErrorKind::Thrown(e).into());
        }
        let expr = self.compiler().analyze(Context::Eval, form)?;
        expr.eval(&mut self.vm)
    }

    pub fn compile1(&mut self, form: &Value) -> Result<Vec<Rc<Class>>> {
        let original = form;
        let form = self.macroexpand(form).map_err(|e| self.positioned(e, original, original))?;
        if let Some(body) = top_level_do(&form) {
            let mut classes = Vec::new();
            for f in body {
                classes.extend(self.compile1(f)?);
            }
            return Ok(classes);
        }
        let name = format!("load{}", rt::next_id());
        let wrapped = Value::list(vec![Value::sym("fn*"), Value::vector(vec![]), form.clone()]);
        let compiled = self.compiler().analyze_named(Context::Expression, &wrapped, Some(&name));
        let expr = compiled.map_err(|e| self.positioned(e, &form, original))?;
        let class = match &expr {
            Expr::Obj(o) => o.class.clone(),
            _ => return Err(ErrorKind::internal(format!("{} did not compile to a unit", name)).into()),
        };
        let f = expr.eval(&mut self.vm)?;
        self.vm.invoke(&f, &[]).map_err(|e| self.positioned(ErrorKind::Thrown(e).into(), &form, original))?;
        Ok(vec![class])
    }

    pub fn load_str(&mut self, source: &str, path: &str) -> Result<Value> {
        let forms = read_all(source).map_err(|e| reader_error(e, path))?;
        let saved = std::mem::replace(&mut self.source, path.to_string());
        let mut out = Ok(Value::Nil);
        for form in &forms {
            out = self.eval(form);
            if out.is_err() {
                break;
            }
        }
        self.source = saved;
        out
    }

    pub fn eval_str(&mut self, source: &str) -> Result<Value> {
        self.load_str(source, NO_SOURCE_PATH)
    }

    pub fn macroexpand1(&mut self, form: &Value) -> Result<Value> {
        Ok(self.compiler().macroexpand1(form)?.unwrap_or_else(|| form.clone()))
    }

    pub fn macroexpand(&mut self, form: &Value) -> Result<Value> {
        let mut form = form.clone();
        loop {
            let expanded = self.macroexpand1(&form)?;
            if identical(&expanded, &form) {
                return Ok(form);
            }
            form = expanded;
        }
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new(CompilerOptions::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::read_one;

    #[test]
    fn top_level_do_is_split() {
        let mut d = Driver::default();
        let v = d.eval_str("(do (defmacro twice [x] (list 'clojure.core/+ x x)) (twice 4))").unwrap();
        assert!(matches!(v, Value::Long(8)));
    }

    #[test]
    fn macroexpand_stops_at_special_forms() {
        let mut d = Driver::default();
        let out = d.macroexpand(&read_one("(when a b)").unwrap()).unwrap();
        assert_eq!(out.to_string(), "(if a (do b))");
        let same = d.macroexpand1(&read_one("(if a b)").unwrap()).unwrap();
        assert_eq!(same.to_string(), "(if a b)");
    }

    #[test]
    fn reader_errors_are_positioned() {
        let mut d = Driver::default();
        let err = d.load_str("(+ 1", "broken.clj").err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::Reader(_)));
        assert!(err.to_string().contains("compiling:(broken.clj:"));
    }

    #[test]
    fn compile1_returns_one_unit_per_form() {
        let mut d = Driver::default();
        let classes = d.compile1(&read_one("(do (def a 1) (clojure.core/+ a 1))").unwrap()).unwrap();
        assert_eq!(classes.len(), 2);
        assert!(classes[0].name.starts_with("user$load"));
        assert!(classes[0].loaded_unit().is_some());
    }

    #[test]
    fn expanded_forms_report_the_callers_line() {
        let mut d = Driver::default();
        let err = d.load_str("(def a 1)\n(when true\n  (throw (new IllegalStateException \"late\")))", "when.clj").err().unwrap();
        assert!(!err.to_string().ends_with(":0:0)"));
        assert!(err.to_string().contains("compiling:(when.clj:"));
    }

    #[test]
    fn thrown_exceptions_surface_as_errors() {
        let mut d = Driver::default();
        let err = d.eval_str("(throw (new IllegalStateException \"boom\"))").err().unwrap();
        assert!(matches!(err.kind(), ErrorKind::Thrown(_)));
        assert!(err.to_string().starts_with("java.lang.IllegalStateException: boom"));
    }
}
