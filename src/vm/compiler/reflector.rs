use std::rc::Rc;

use crate::error::{ErrorKind, Result};
use crate::runtime::host::{host, Class, PrimType};

use super::expr::{Expr, StaticType};

/// What an argument expression contributes to overload matching.
enum ArgClass {
    /// `nil`: matches any reference parameter.
    Null,
    Known(Rc<Class>),
    /// A `recur` in argument position; only `Object` takes it.
    Recur,
}

fn arg_class(arg: &Expr) -> ArgClass {
    match arg.java_class() {
        None => ArgClass::Known(host().object()),
        Some(StaticType::Nil) => ArgClass::Null,
        Some(StaticType::Recur) => ArgClass::Recur,
        Some(StaticType::Class(c)) => ArgClass::Known(c),
    }
}

fn is_box_of(arg: &Class, prim: PrimType) -> bool {
    arg.name == prim.box_name()
}

pub fn param_arg_type_match(param: &Class, arg: Option<&Class>) -> bool {
    let Some(arg) = arg else { return !param.is_primitive() };
    if param.name == arg.name || param.is_assignable_from(arg) {
        return true;
    }
    let arg_prim = arg.prim();
    match param.prim() {
        Some(PrimType::Int) => {
            is_box_of(arg, PrimType::Int)
                || is_box_of(arg, PrimType::Long)
                || matches!(arg_prim, Some(PrimType::Long | PrimType::Short | PrimType::Byte))
        }
        Some(PrimType::Float) => is_box_of(arg, PrimType::Float) || arg_prim == Some(PrimType::Double),
        Some(PrimType::Double) => is_box_of(arg, PrimType::Double) || arg_prim == Some(PrimType::Float),
        Some(PrimType::Long) => {
            is_box_of(arg, PrimType::Long) || matches!(arg_prim, Some(PrimType::Int | PrimType::Short | PrimType::Byte))
        }
        Some(PrimType::Char) => is_box_of(arg, PrimType::Char),
        Some(PrimType::Short) => is_box_of(arg, PrimType::Short),
        Some(PrimType::Byte) => is_box_of(arg, PrimType::Byte),
        Some(PrimType::Boolean) => is_box_of(arg, PrimType::Boolean),
        _ => false,
    }
}

pub fn subsumes(c1: &[Rc<Class>], c2: &[Rc<Class>]) -> bool {
    let mut better = false;
    for (a, b) in c1.iter().zip(c2) {
        if a.name != b.name {
            if (!a.is_primitive() && b.is_primitive()) || b.is_assignable_from(a) {
                better = true;
            } else {
                return false;
            }
        }
    }
    better
}

fn same_params(a: &[Rc<Class>], b: &[Rc<Class>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.name == y.name)
}

pub fn get_matching_params(
    name: &str,
    paramlists: &[Vec<Rc<Class>>],
    args: &[Expr],
    rets: &[Rc<Class>],
) -> Result<Option<usize>> {
    let classes: Vec<ArgClass> = args.iter().map(arg_class).collect();
    let mut match_idx: Option<usize> = None;
    let mut tied = false;
    let mut found_exact = false;
    for (i, params) in paramlists.iter().enumerate() {
        let mut matches = true;
        let mut exact = 0;
        for (pclass, aclass) in params.iter().zip(&classes) {
            if !matches {
                break;
            }
            match aclass {
                ArgClass::Known(c) if c.name == pclass.name => exact += 1,
                ArgClass::Known(c) => matches = param_arg_type_match(pclass, Some(c)),
                ArgClass::Null => matches = param_arg_type_match(pclass, None),
                ArgClass::Recur => matches = pclass.name == host().object().name,
            }
        }
        if exact == args.len() {
            let narrower = match match_idx {
                Some(m) => rets[m].is_assignable_from(&rets[i]),
                None => true,
            };
            if !found_exact || narrower {
                match_idx = Some(i);
            }
            tied = false;
            found_exact = true;
        } else if matches && !found_exact {
            match match_idx {
                None => match_idx = Some(i),
                Some(m) => {
                    if subsumes(params, &paramlists[m]) {
                        match_idx = Some(i);
                        tied = false;
                    } else if same_params(&paramlists[m], params) {
                        if rets[m].is_assignable_from(&rets[i]) {
                            match_idx = Some(i);
                        }
                    } else if !subsumes(&paramlists[m], params) {
                        tied = true;
                    }
                }
            }
        }
    }
    if tied {
        return Err(ErrorKind::AmbiguousOverload(format!("More than one matching method found: {}", name)).into());
    }
    Ok(match_idx)
}

/// The primitive class a type hint names, for hints that may only be primitive.
pub fn prim_class(name: &str) -> Option<Rc<Class>> {
    PrimType::from_name(name).map(|p| host().prim(p))
}

/// Logs a reflection warning in the `file:line:col` form tooling greps for.
pub fn warn_reflection(enabled: bool, source: &str, line: u32, column: u32, msg: &str) {
    if enabled {
        log::warn!("Reflection warning, {}:{}:{} - {}", source, line, column, msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn class(name: &str) -> Rc<Class> {
        host().get(name).unwrap()
    }

    #[test]
    fn boxes_and_widening_match_primitive_params() {
        assert!(param_arg_type_match(&class("long"), Some(&class("java.lang.Long"))));
        assert!(param_arg_type_match(&class("long"), Some(&class("int"))));
        assert!(param_arg_type_match(&class("double"), Some(&class("java.lang.Double"))));
        assert!(!param_arg_type_match(&class("long"), Some(&class("double"))));
        assert!(!param_arg_type_match(&class("long"), None));
        assert!(param_arg_type_match(&class("java.lang.Object"), None));
        assert!(param_arg_type_match(&class("java.lang.Object"), Some(&class("java.lang.String"))));
    }

    #[test]
    fn primitives_subsume_objects() {
        let prim = vec![class("long")];
        let obj = vec![class("java.lang.Object")];
        assert!(subsumes(&obj, &prim));
        assert!(!subsumes(&prim, &obj));
        assert!(!subsumes(&prim, &prim));
    }

    #[test]
    fn exact_primitive_overload_wins() {
        let lists = vec![
            vec![class("java.lang.Object"), class("java.lang.Object")],
            vec![class("long"), class("long")],
            vec![class("double"), class("double")],
        ];
        let rets = vec![class("java.lang.Number"), class("long"), class("double")];
        let args = vec![Expr::Number(Value::Long(1)), Expr::Number(Value::Long(2))];
        assert_eq!(get_matching_params("add", &lists, &args, &rets).unwrap(), Some(1));
        let args = vec![Expr::Number(Value::Double(1.0)), Expr::Number(Value::Double(2.0))];
        assert_eq!(get_matching_params("add", &lists, &args, &rets).unwrap(), Some(2));
    }

    #[test]
    fn unrelated_compatible_overloads_are_ambiguous() {
        let lists = vec![vec![class("java.lang.String")], vec![class("java.lang.Number")]];
        let rets = vec![class("java.lang.Object"), class("java.lang.Object")];
        let args = vec![Expr::Nil];
        let err = get_matching_params("foo", &lists, &args, &rets).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::AmbiguousOverload(_)));
    }
}
