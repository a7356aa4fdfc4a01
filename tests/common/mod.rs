use cljc::driver::Driver;
use cljc::error::CompilerError;
use cljc::options::CompilerOptions;
use cljc::value::{equiv, Value};

#[allow(dead_code)]
pub fn eval(prog: &str) -> Value {
    match Driver::default().load_str(prog, "test.clj") {
        Ok(v) => v,
        Err(e) => panic!("{} failed: {}", prog, e),
    }
}

#[allow(dead_code)]
pub fn eval_opt(prog: &str) -> Option<Value> {
    Driver::default().load_str(prog, "test.clj").ok()
}

#[allow(dead_code)]
pub fn eval_err(prog: &str) -> CompilerError {
    match Driver::default().load_str(prog, "test.clj") {
        Ok(v) => panic!("{} should fail, got {}", prog, v),
        Err(e) => e,
    }
}

#[allow(dead_code)]
pub fn eval_with(options: CompilerOptions, prog: &str) -> Result<Value, CompilerError> {
    Driver::new(options).load_str(prog, "test.clj")
}

pub fn compare_expr<T>(value: Value, expected: T) -> bool
where
    T: Into<Value>,
{
    equiv(&value, &expected.into())
}
