mod common;
use common::{compare_expr, eval, eval_err};

use cljc::driver::Driver;
use cljc::error::ErrorKind;

const COUNTER: &str = "(def ^:dynamic *finally-runs* 0)";

fn finally_runs(driver: &mut Driver) -> i64 {
    match driver.eval_str("*finally-runs*") {
        Ok(cljc::value::Value::Long(n)) => n,
        other => panic!("unexpected counter value: {:?}", other.map(|v| v.to_string())),
    }
}

#[test]
fn test_finally_runs_once_on_normal_completion() {
    let mut d = Driver::default();
    d.eval_str(COUNTER).unwrap();
    let res = d.eval_str("(try 1 (finally (set! *finally-runs* (inc *finally-runs*))))").unwrap();
    assert!(compare_expr(res, 1));
    assert_eq!(finally_runs(&mut d), 1);
}

#[test]
fn test_finally_runs_once_when_caught() {
    let mut d = Driver::default();
    d.eval_str(COUNTER).unwrap();
    let prog = "
    (try
      (throw (new IllegalStateException \"boom\"))
      (catch IllegalStateException e (ex-message e))
      (finally (set! *finally-runs* (inc *finally-runs*))))";
    let res = d.eval_str(prog).unwrap();
    assert!(compare_expr(res, "boom"));
    assert_eq!(finally_runs(&mut d), 1);
}

#[test]
fn test_finally_runs_once_when_unhandled() {
    let mut d = Driver::default();
    d.eval_str(COUNTER).unwrap();
    let prog = "
    (try
      (throw (new IllegalStateException \"boom\"))
      (catch IllegalArgumentException e :wrong)
      (finally (set! *finally-runs* (inc *finally-runs*))))";
    let err = d.eval_str(prog).err().unwrap();
    assert!(matches!(err.kind(), ErrorKind::Thrown(_)));
    assert_eq!(finally_runs(&mut d), 1);
}

#[test]
fn test_catch_matches_superclass() {
    let prog = "
    (try
      (throw (new IllegalArgumentException \"bad\"))
      (catch RuntimeException e :runtime)
      (catch Exception e :exception))";
    assert_eq!(eval(prog).to_string(), ":runtime");
}

#[test]
fn test_try_value_feeds_expression() {
    // a try in argument position runs inside its own function
    let prog = "(+ 1 (try (throw (new RuntimeException \"x\")) (catch Exception e 41)))";
    assert!(compare_expr(eval(prog), 42));
}

#[test]
fn test_runtime_errors_are_caught() {
    let prog = "(try (nth [1 2] 5) (catch IndexOutOfBoundsException e :out))";
    assert_eq!(eval(prog).to_string(), ":out");
}

#[test]
fn test_recur_across_try_rejected() {
    let err = eval_err("(loop [i 0] (try (recur (inc i)) (finally nil)))");
    assert!(matches!(err.kind(), ErrorKind::IllegalControlTransfer(_)));
    assert!(err.to_string().starts_with("Cannot recur across try"));
}

#[test]
fn test_try_clause_shape() {
    let err = eval_err("(try 1 (catch Exception e 2) 3)");
    assert!(err.to_string().starts_with("Only catch or finally clause can follow catch in try expression"));
    let err = eval_err("(try 1 (catch NoSuchThing e 2))");
    assert!(err.to_string().starts_with("Unable to resolve classname: NoSuchThing"));
}

#[test]
fn test_locals_survive_into_catch() {
    let prog = "
    (let [x 5]
      (try (throw (new RuntimeException \"x\"))
        (catch Exception e (+ x 1))))";
    assert!(compare_expr(eval(prog), 6));
}
