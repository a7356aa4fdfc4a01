mod common;
use common::{compare_expr, eval, eval_err};

use cljc::error::ErrorKind;
use cljc::value::Value;

#[test]
fn test_literals_evaluate_to_themselves() {
    assert!(matches!(eval("nil"), Value::Nil));
    assert!(compare_expr(eval("true"), true));
    assert!(compare_expr(eval("42"), 42));
    assert!(compare_expr(eval("2.5"), 2.5));
    assert!(compare_expr(eval("\"s\""), "s"));
    assert_eq!(eval(":k").to_string(), ":k");
    assert_eq!(eval("[]").to_string(), "[]");
    assert_eq!(eval("{}").to_string(), "{}");
}

#[test]
fn test_if_truthiness() {
    assert!(compare_expr(eval("(if nil 1 2)"), 2));
    assert!(compare_expr(eval("(if false 1 2)"), 2));
    assert!(compare_expr(eval("(if 0 1 2)"), 1));
    assert!(matches!(eval("(if false 1)"), Value::Nil));
}

#[test]
fn test_if_arity() {
    let err = eval_err("(if)");
    assert!(err.to_string().starts_with("Too few arguments to if"));
    let err = eval_err("(if 1 2 3 4)");
    assert!(err.to_string().starts_with("Too many arguments to if"));
}

#[test]
fn test_do_returns_last() {
    assert!(compare_expr(eval("(do 1 2 3)"), 3));
    assert!(matches!(eval("(do)"), Value::Nil));
}

#[test]
fn test_case_on_ints() {
    let prog = "
    (def classify (fn [n] (case n 1 :one 2 :two (5 6) :five-or-six :other)))
    [(classify 1) (classify 2) (classify 3) (classify 6)]";
    assert_eq!(eval(prog).to_string(), "[:one :two :other :five-or-six]");
}

#[test]
fn test_case_sparse_ints() {
    // keys too far apart for a compact table
    let prog = "
    (def pick (fn [n] (case n 1 :a 1000 :b 1000000 :c :none)))
    [(pick 1) (pick 1000) (pick 1000000) (pick 2)]";
    assert_eq!(eval(prog).to_string(), "[:a :b :c :none]");
}

#[test]
fn test_case_on_keywords_and_strings() {
    let prog = "
    (def k (fn [x] (case x :red 1 :green 2 0)))
    (def s (fn [x] (case x \"a\" 1 \"b\" 2 0)))
    [(k :red) (k :green) (k :blue) (s \"a\") (s \"b\") (s \"c\")]";
    assert_eq!(eval(prog).to_string(), "[1 2 0 1 2 0]");
}

#[test]
fn test_case_hash_collisions_confirm_sequentially() {
    // "Aa", "BB" and "C#" share one string hash
    let prog = "
    (def pick (fn [x] (case x \"Aa\" :aa \"BB\" :bb \"D\" :d :none)))
    [(pick \"Aa\") (pick \"BB\") (pick \"C#\") (pick \"D\") (pick \"E\")]";
    assert_eq!(eval(prog).to_string(), "[:aa :bb :none :d :none]");
}

#[test]
fn test_case_redispatch_is_stable() {
    let prog = "
    (def f (fn [x] (case x 3 :three :else)))
    [(f 3) (f 3) (f 4) (f 4)]";
    assert_eq!(eval(prog).to_string(), "[:three :three :else :else]");
}

#[test]
fn test_case_without_default_throws() {
    let err = eval_err("(case 9 1 :one)");
    assert!(matches!(err.kind(), ErrorKind::Thrown(_)));
    assert!(err.to_string().contains("No matching clause: 9"));
}

#[test]
fn test_keyword_invoke() {
    assert!(compare_expr(eval("(let [m {:a 1 :b 2}] (:b m))"), 2));
    assert!(matches!(eval("(let [m {:a 1}] (:z m))"), Value::Nil));
}

#[test]
fn test_collection_literals_with_locals() {
    let prog = "(let [x 1 y 2] [x {:y y} #{x}])";
    assert_eq!(eval(prog).to_string(), "[1 {:y 2} #{1}]");
}

#[test]
fn test_quote() {
    assert_eq!(eval("'(a b c)").to_string(), "(a b c)");
    assert_eq!(eval("(quote x)").to_string(), "x");
}

#[test]
fn test_nested_forms_are_positioned_once() {
    let err = eval_err("(let [x 1]\n  (if x\n    (nope x)))");
    assert_eq!(err.to_string(), "Unable to resolve symbol: nope in this context, compiling:(test.clj:3:5)");
}
