mod common;
use common::{compare_expr, eval, eval_err, eval_with};

use cljc::driver::Driver;
use cljc::options::CompilerOptions;
use cljc::value::Keyword;

#[test]
fn test_def_and_lookup() {
    let prog = "
    (def x 10)
    (def y (+ x 5))
    y";
    assert!(compare_expr(eval(prog), 15));
}

#[test]
fn test_def_returns_var() {
    assert_eq!(eval("(def z 1)").to_string(), "#'user/z");
    assert_eq!(eval("(def z 1) (var z)").to_string(), "#'user/z");
}

#[test]
fn test_redef_replaces_root() {
    assert!(compare_expr(eval("(def a 1) (def a 2) a"), 2));
}

#[test]
fn test_def_without_init_is_unbound() {
    let err = eval_err("(def pending) (+ pending 1)");
    assert!(err.to_string().contains("Attempting to call unbound fn: #'user/pending"));
}

#[test]
fn test_defn_recursion_through_var() {
    let prog = "
    (defn fib [n] (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2)))))
    (fib 10)";
    assert!(compare_expr(eval(prog), 55));
}

#[test]
fn test_defmacro() {
    let prog = "
    (defmacro unless [test then] (list 'if test nil then))
    (unless false :ran)";
    assert_eq!(eval(prog).to_string(), ":ran");
}

#[test]
fn test_docstring_and_meta() {
    let mut d = Driver::default();
    d.load_str("(def ^{:private true} hidden \"Hidden value.\" 3)", "meta.clj").unwrap();
    assert_eq!(d.eval_str("(:doc (meta (var hidden)))").unwrap().to_string(), "\"Hidden value.\"");
    assert_eq!(d.eval_str("(:file (meta (var hidden)))").unwrap().to_string(), "\"meta.clj\"");
    assert_eq!(d.eval_str("(:private (meta (var hidden)))").unwrap().to_string(), "true");
}

#[test]
fn test_elide_meta() {
    let options = CompilerOptions::new().elide_meta(vec![Keyword::intern("doc"), Keyword::intern("file")]);
    let res = eval_with(options, "(def e \"doc\" 1) [(:doc (meta (var e))) (:file (meta (var e)))]").unwrap();
    assert_eq!(res.to_string(), "[nil nil]");
}

#[test]
fn test_const_var_is_inlined() {
    // a later redefinition does not reach code compiled against the const value
    let prog = "
    (def ^:const limit 3)
    (def get-limit (fn [] limit))
    (def limit 4)
    (get-limit)";
    assert!(compare_expr(eval(prog), 3));
}

#[test]
fn test_dynamic_var_set() {
    let prog = "
    (def ^:dynamic *n* 1)
    (set! *n* 5)
    *n*";
    assert!(compare_expr(eval(prog), 5));
}

#[test]
fn test_def_errors() {
    let err = eval_err("(def 1 2)");
    assert!(err.to_string().starts_with("First argument to def must be a Symbol"));
    let err = eval_err("(def a 1 2)");
    assert!(err.to_string().starts_with("Too many arguments to def"));
    let err = eval_err("(def other.ns/a 1)");
    assert!(err.to_string().starts_with("Can't refer to qualified var that doesn't exist"));
    let err = eval_err("(def clojure.core/str 1)");
    assert!(err.to_string().starts_with("Can't create defs outside of current ns"));
}

#[test]
fn test_macro_value_rejected() {
    let err = eval_err("(defmacro m [] 1) (let [f m] f)");
    assert!(err.to_string().starts_with("Can't take value of a macro: #'user/m"));
}

#[test]
fn test_allow_unresolved_defers_lookup() {
    let options = CompilerOptions::new().allow_unresolved(true);
    let res = eval_with(options, "(def later-fn (fn [] (later 1))) (def later (fn [x] (+ x 1))) (later-fn)");
    assert!(compare_expr(res.unwrap(), 2));
}

#[test]
fn test_compiling_twice_gives_equivalent_units() {
    let src = "(let [v [:a \"s\" 2.5]] (if (= (count v) 3) v :short))";
    let shape = |src: &str| {
        let mut d = Driver::default();
        let form = cljc::parser::read_one(src).unwrap();
        let classes = d.compile1(&form).unwrap();
        let unit = &classes[0].loaded_unit().unwrap().unit;
        let arities: Vec<(usize, bool)> = unit.methods.iter().map(|m| (m.required, m.variadic)).collect();
        let constants: Vec<String> = unit.constants.iter().map(|c| c.to_string()).collect();
        (arities, constants, unit.keyword_sites.len(), unit.host_sites.len())
    };
    assert_eq!(shape(src), shape(src));
}
