mod common;
use common::{compare_expr, eval, eval_err, eval_with};

use cljc::error::ErrorKind;
use cljc::options::CompilerOptions;

#[test]
fn test_let_sees_earlier_bindings() {
    let res = eval("(let [x 1 y (+ x 1)] y)");
    assert!(compare_expr(res, 2));
}

#[test]
fn test_let_later_bindings_are_not_visible_earlier() {
    // y is not bound yet when x's initializer runs
    let err = eval_err("(let [x y y 1] x)");
    assert!(matches!(err.kind(), ErrorKind::Unresolved(_)));
    assert!(err.to_string().starts_with("Unable to resolve symbol: y in this context"));
}

#[test]
fn test_let_shadowing() {
    let prog = "
    (let [x 10]
      (let [x (* x 2)
            x (+ x 1)]
        x))";
    assert!(compare_expr(eval(prog), 21));
}

#[test]
fn test_loop_sums_with_recur() {
    let res = eval("(loop [i 0 acc 0] (if (= i 5) acc (recur (+ i 1) (+ acc i))))");
    assert!(compare_expr(res, 10));
}

#[test]
fn test_loop_inside_expression_position() {
    // a loop whose value feeds a call is compiled into its own function
    let res = eval("(+ 1 (loop [i 0] (if (< i 3) (recur (inc i)) i)))");
    assert!(compare_expr(res, 4));
}

#[test]
fn test_loop_with_double_accumulator() {
    let res = eval("(loop [i 0 acc 0.5] (if (= i 3) acc (recur (inc i) (+ acc 1.0))))");
    assert!(compare_expr(res, 3.5));
}

#[test]
fn test_loop_local_boxed_after_mismatch() {
    // acc starts as a long and is later handed a string, so it is re-analyzed boxed
    let res = eval("(loop [i 0 acc 0] (if (= i 2) acc (recur (inc i) (str acc i))))");
    assert!(compare_expr(res, "001"));
}

#[test]
fn test_reanalysis_cap() {
    let options = CompilerOptions::new().max_reanalysis(1);
    let err = eval_with(options, "(loop [i 0] (if (= i 2) i (recur (str i))))").err().unwrap();
    assert!(matches!(err.kind(), ErrorKind::PrimitiveMismatch(_)));
}

#[test]
fn test_recur_argument_count() {
    let err = eval_err("(loop [i 0] (recur 1 2))");
    assert!(matches!(err.kind(), ErrorKind::MalformedForm(_)));
    assert!(err.to_string().starts_with("Mismatched argument count to recur, expected: 1 args, got: 2"));
}

#[test]
fn test_recur_outside_tail_position() {
    let err = eval_err("(loop [i 0] (+ 1 (recur i)))");
    assert!(matches!(err.kind(), ErrorKind::IllegalControlTransfer(_)));
}

#[test]
fn test_recur_in_fn_body() {
    let prog = "
    (def countdown (fn [n acc] (if (zero? n) acc (recur (dec n) (conj acc n)))))
    (countdown 3 [])";
    assert_eq!(eval(prog).to_string(), "[3 2 1]");
}

#[test]
fn test_letfn_mutual_recursion() {
    let prog = "
    (letfn [(ev? [n] (if (zero? n) true (od? (dec n))))
            (od? [n] (if (zero? n) false (ev? (dec n))))]
      (ev? 10))";
    assert!(compare_expr(eval(prog), true));
}

#[test]
fn test_locals_clearing_disabled_gives_same_result() {
    let options = CompilerOptions::new().disable_locals_clearing(true);
    let res = eval_with(options, "(let [v [1 2 3] n (count v)] (+ n (first v)))").unwrap();
    assert!(compare_expr(res, 4));
}

#[test]
fn test_local_used_in_test_and_arm() {
    let prog = "
    (def g (fn [x] (if (= x 5) (+ x 1) x)))
    (def f (fn [n] (if (zero? n) 0 (dec n))))
    [(g 5) (g 2) (f 3) (f 0)]";
    assert_eq!(eval(prog).to_string(), "[6 2 2 0]");
}

#[test]
fn test_local_used_in_test_and_arm_of_derived_forms() {
    let prog = "
    (def w (fn [x] (when (pos? x) (+ x 10))))
    (def c (fn [x] (cond (neg? x) (- x) (zero? x) :zero :else (* x 2))))
    (def l (fn [x] (let [y (inc x)] (if (> y x) (+ y x) y))))
    [(w 1) (c -3) (c 0) (c 4) (l 2)]";
    assert_eq!(eval(prog).to_string(), "[11 3 :zero 8 5]");
}

#[test]
fn test_loop_local_in_test_and_exit_arm() {
    assert!(compare_expr(eval("(loop [i 0.5] (if (< i 3) (recur 4) i))"), 4));
}
