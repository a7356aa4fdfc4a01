mod common;
use common::{compare_expr, eval, eval_err};

use cljc::driver::Driver;
use cljc::runtime::host::host;

#[test]
fn test_reify_closes_over_locals() {
    let prog = "
    (let [n 41
          r (reify clojure.lang.IDeref (deref [this] (+ n 1)))]
      (.deref r))";
    assert!(compare_expr(eval(prog), 42));
}

#[test]
fn test_reify_overloaded_interface_methods() {
    let prog = "
    (let [m (reify clojure.lang.ILookup
              (valAt [this k] (if (= k :a) 1 nil))
              (valAt [this k nf] (if (= k :a) 1 nf)))]
      [(.valAt m :a) (.valAt m :b) (.valAt m :b :dflt)])";
    assert_eq!(eval(prog).to_string(), "[1 nil :dflt]");
}

#[test]
fn test_reify_carries_metadata() {
    let prog = "(meta (with-meta (reify clojure.lang.IDeref (deref [this] 1)) {:tagged true}))";
    assert_eq!(eval(prog).to_string(), "{:tagged true}");
}

#[test]
fn test_deftype_fields_and_methods() {
    let prog = "
    (deftype Point [x y]
      clojure.lang.ILookup
      (valAt [this k] (case k :x x :y y nil))
      (valAt [this k nf] (case k :x x :y y nf)))
    (let [p (Point. 3 4)]
      [(.valAt p :x) (:y p) (.-x p)])";
    assert_eq!(eval(prog).to_string(), "[3 4 3]");
}

#[test]
fn test_deftype_factory_fn() {
    let prog = "
    (deftype Pair [a b])
    (.-b (->Pair 1 2))";
    assert!(compare_expr(eval(prog), 2));
}

#[test]
fn test_deftype_self_reference_in_method() {
    // the type's own name resolves while its methods are being compiled
    let prog = "
    (deftype Node [v]
      clojure.lang.IDeref
      (deref [this] (instance? Node this)))
    (.deref (Node. 1))";
    assert!(compare_expr(eval(prog), true));
}

#[test]
fn test_deftype_mutable_field() {
    let prog = "
    (deftype Counter [^:unsynchronized-mutable n]
      clojure.lang.IDeref
      (deref [this] (set! n (inc n)) n))
    (let [c (Counter. 0)]
      (.deref c)
      (.deref c))";
    assert!(compare_expr(eval(prog), 2));
}

#[test]
fn test_deftype_immutable_field_rejected() {
    let err = eval_err(
        "(deftype Frozen [n]
           clojure.lang.IDeref
           (deref [this] (set! n 1)))",
    );
    assert!(err.to_string().starts_with("Cannot assign to non-mutable: n"));
}

#[test]
fn test_deftype_unknown_method_leaves_no_stub() {
    let mut d = Driver::default();
    let err = d
        .eval_str(
            "(deftype Broken [a]
               clojure.lang.IDeref
               (nope [this] a))",
        )
        .err()
        .unwrap();
    assert!(err.to_string().starts_with("Can't define method not in interfaces: nope"));
    assert!(host().get("compile__stub.user.Broken").is_none());
}

#[test]
fn test_deftype_basis() {
    let prog = "
    (deftype Shape [w h])
    (. user.Shape getBasis)";
    assert_eq!(eval(prog).to_string(), "[w h]");
}
