mod common;
use common::{eval_err, eval_opt};

use cljc::driver::Driver;
use cljc::error::ErrorKind;

#[test]
fn test_errors_carry_file_line_and_column() {
    let mut d = Driver::default();
    let err = d.load_str("(def ok 1)\n\n(let [a 1]\n  (missing a))", "src/app.clj").err().unwrap();
    assert!(err.is_positioned());
    assert_eq!(err.to_string(), "Unable to resolve symbol: missing in this context, compiling:(src/app.clj:4:3)");
}

#[test]
fn test_errors_inside_fns_are_wrapped_once() {
    let err = eval_err("(fn [x]\n  (fn [y]\n    (if)))");
    let text = err.to_string();
    assert_eq!(text.matches("compiling:").count(), 1);
    assert!(text.ends_with("compiling:(test.clj:3:5)"));
}

#[test]
fn test_macro_arity_errors_report_caller_arity() {
    let err = eval_err("(when)");
    assert!(matches!(err.kind(), ErrorKind::Thrown(_)));
    assert!(err.to_string().contains("Wrong number of args (0) passed to: clojure.core/when"));
}

#[test]
fn test_nil_head_rejected() {
    let err = eval_err("(nil 1 2)");
    assert!(matches!(err.kind(), ErrorKind::MalformedForm(_)));
}

#[test]
fn test_failed_form_leaves_earlier_defs() {
    let mut d = Driver::default();
    assert!(d.eval_str("(def kept 1)").is_ok());
    assert!(d.eval_str("(def broken (undefined-thing))").is_err());
    assert_eq!(d.eval_str("kept").unwrap().to_string(), "1");
}

#[test]
fn test_unterminated_form() {
    assert!(eval_opt("(let [x 1] x").is_none());
}

#[test]
fn test_runtime_errors_in_expanded_forms_use_the_form_line() {
    let err = eval_err("(def ok 1)\n(letfn [(boom [] (throw (new IllegalStateException \"no\")))] (boom))");
    assert!(matches!(err.kind(), ErrorKind::Thrown(_)));
    assert!(err.to_string().ends_with("compiling:(test.clj:2:1)"));
}
