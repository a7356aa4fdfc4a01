mod common;
use common::{compare_expr, eval, eval_err};

use cljc::error::ErrorKind;

#[test]
fn test_static_field() {
    assert!(compare_expr(eval("Long/MAX_VALUE"), i64::MAX));
    let err = eval_err("Long/NOPE");
    assert!(err.to_string().starts_with("Unable to find static field: NOPE in class java.lang.Long"));
}

#[test]
fn test_static_method_sugar() {
    assert!(compare_expr(eval("(Long/parseLong \"123\")"), 123));
    assert!(compare_expr(eval("(. Long (parseLong \"7\"))"), 7));
}

#[test]
fn test_instance_method_sugar() {
    assert!(compare_expr(eval("(.toUpperCase \"abc\")"), "ABC"));
    assert!(compare_expr(eval("(let [s \"hello\"] (.length s))"), 5));
}

#[test]
fn test_reflective_call_on_untyped_local() {
    let prog = "
    (def shout (fn [s] (.toUpperCase s)))
    (shout \"hey\")";
    assert!(compare_expr(eval(prog), "HEY"));
}

#[test]
fn test_hinted_param_resolves_statically() {
    let prog = "
    (def len (fn [^String s] (.length s)))
    (len \"four\")";
    assert!(compare_expr(eval(prog), 4));
}

#[test]
fn test_constructor_sugar() {
    let res = eval("(ex-message (IllegalArgumentException. \"nope\"))");
    assert!(compare_expr(res, "nope"));
}

#[test]
fn test_unknown_static_method() {
    let err = eval_err("(Math/nope 1)");
    assert!(matches!(err.kind(), ErrorKind::MalformedForm(_)));
    assert!(err.to_string().starts_with("No matching method nope found taking 1 args for class java.lang.Math"));
}

#[test]
fn test_unknown_class_in_new() {
    let err = eval_err("(new NoSuchClass)");
    assert!(matches!(err.kind(), ErrorKind::Unresolved(_)));
}

#[test]
fn test_instance_check() {
    assert!(compare_expr(eval("(instance? String \"s\")"), true));
    assert!(compare_expr(eval("(instance? Long \"s\")"), false));
}

#[test]
fn test_primitive_arithmetic_inlined() {
    // both operands are primitive longs, so the inliner's host call resolves statically
    let prog = "(let [a 6 b 7] (* a b))";
    assert!(compare_expr(eval(prog), 42));
}

#[test]
fn test_reflective_site_follows_receiver_class() {
    let prog = "
    (def len (fn [x] (.length x)))
    [(len \"abc\") (len [1 2]) (len \"hello\") (len [])]";
    assert_eq!(eval(prog).to_string(), "[3 2 5 0]");
}

#[test]
fn test_reflective_site_caches_resolved_method() {
    use cljc::driver::Driver;
    use cljc::runtime::host::host;
    use cljc::value::Value;
    use cljc::vm::unit::HostSite;

    let mut d = Driver::default();
    d.eval_str("(def shout (fn [s] (.toUpperCase s)))").unwrap();
    assert_eq!(d.eval_str("(shout \"hey\")").unwrap().to_string(), "\"HEY\"");
    let Value::Object(f) = d.eval_str("shout").unwrap() else { panic!("expected a fn object") };
    let unit = f.class.loaded_unit().unwrap();
    let site = unit.unit.host_sites.iter().position(|s| matches!(s, HostSite::Reflective { .. })).unwrap();
    let string = host().get("java.lang.String").unwrap();
    assert!(unit.cached_member(site, &string).is_some());
}
