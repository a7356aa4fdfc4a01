mod common;
use common::{compare_expr, eval, eval_err};

#[test]
fn test_closure_as_argument() {
    let prog = "
    (let [apply-1 (fn [f x] (f x))
          y 10]
      (apply-1 (fn [z] (+ z y)) 5))";
    assert!(compare_expr(eval(prog), 15));
}

#[test]
fn test_closure_returned() {
    let prog = "
    (def make-adder (fn [x] (fn [y] (+ x y))))
    (let [add5 (make-adder 5)]
      (add5 10))";
    assert!(compare_expr(eval(prog), 15));
}

#[test]
fn test_closure_shadowing() {
    // the inner x does not affect the value f captured
    let prog = "
    (let [x 10
          f (fn [y] (+ x y))
          x 20]
      (f 5))";
    assert!(compare_expr(eval(prog), 15));
}

#[test]
fn test_capture_through_intermediate_fn() {
    // the middle fn never names x but must carry it to the innermost one
    let prog = "
    (let [x 7
          outer (fn [] (fn [] (fn [] x)))]
      (((outer))))";
    assert!(compare_expr(eval(prog), 7));
}

#[test]
fn test_self_named_fn_recursion() {
    let prog = "((fn fact [n] (if (zero? n) 1 (* n (fact (dec n))))) 5)";
    assert!(compare_expr(eval(prog), 120));
}

#[test]
fn test_multi_arity_and_variadic() {
    let prog = "
    (def f (fn ([] :none)
               ([a] a)
               ([a & more] (count more))))
    [(f) (f 1) (f 1 2 3)]";
    assert_eq!(eval(prog).to_string(), "[:none 1 2]");
}

#[test]
fn test_primitive_params_and_return() {
    let prog = "
    (defn scale ^double [^double x ^long n] (* x n))
    (scale 1.5 4)";
    assert!(compare_expr(eval(prog), 6.0));
}

#[test]
fn test_wrong_arity_call_throws() {
    let err = eval_err("((fn [a] a) 1 2)");
    assert!(err.to_string().contains("Wrong number of args (2)"));
}

#[test]
fn test_invalid_params() {
    let err = eval_err("(fn [a &] a)");
    assert!(err.to_string().starts_with("Invalid parameter list"));
    let err = eval_err("(fn [^int a] a)");
    assert!(err.to_string().starts_with("Only long and double primitives are supported"));
}

#[test]
fn test_defn_with_docstring() {
    let prog = "
    (defn greet \"Says hello.\" [who] (str \"hello \" who))
    (greet \"you\")";
    assert!(compare_expr(eval(prog), "hello you"));
}
