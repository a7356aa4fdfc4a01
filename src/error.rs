use thiserror::Error;

use crate::value::Value;

#[derive(Error, Debug, Clone)]
pub enum ErrorKind {
    #[error("{0}")]
    MalformedForm(String),
    #[error("{0}")]
    Unresolved(String),
    #[error("{0}")]
    AmbiguousOverload(String),
    #[error("{0}")]
    IllegalControlTransfer(String),
    #[error("{0}")]
    PrimitiveMismatch(String),
    #[error("{0}")]
    Reader(String),
    #[error("{}", exception_message(.0))]
    Thrown(Value),
    #[error("{0}")]
    Internal(String),
}

impl ErrorKind {
    pub fn malformed(msg: impl Into<String>) -> ErrorKind {
        ErrorKind::MalformedForm(msg.into())
    }

    pub fn unresolved(msg: impl Into<String>) -> ErrorKind {
        ErrorKind::Unresolved(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> ErrorKind {
        ErrorKind::Internal(msg.into())
    }
}

pub fn exception_message(exception: &Value) -> String {
    match exception {
        Value::Object(o) => {
            let msg = o.fields.borrow().first().cloned().unwrap_or(Value::Nil);
            match msg {
                Value::Nil => o.class.name.clone(),
                m => format!("{}: {}", o.class.name, m.to_str()),
            }
        }
        other => other.to_string(),
    }
}

#[derive(Error, Debug, Clone)]
pub enum CompilerError {
    #[error("{kind}, compiling:({file}:{line}:{column})")]
    Positioned { file: String, line: u32, column: u32, kind: ErrorKind },
    #[error(transparent)]
    Raw(#[from] ErrorKind),
}

impl CompilerError {
    pub fn at(self, source: &str, line: u32, column: u32) -> CompilerError {
        match self {
            CompilerError::Raw(kind) => CompilerError::Positioned { file: source.to_string(), line, column, kind },
            positioned => positioned,
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        match self {
            CompilerError::Positioned { kind, .. } => kind,
            CompilerError::Raw(kind) => kind,
        }
    }

    pub fn is_positioned(&self) -> bool {
        matches!(self, CompilerError::Positioned { .. })
    }
}

pub type Result<T> = std::result::Result<T, CompilerError>;

pub fn malformed<T>(msg: impl Into<String>) -> Result<T> {
    Err(ErrorKind::malformed(msg).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_exactly_once() {
        let err: CompilerError = ErrorKind::malformed("Too many arguments to if").into();
        let once = err.at("a.clj", 3, 7);
        let twice = once.clone().at("b.clj", 9, 1);
        assert_eq!(once.to_string(), "Too many arguments to if, compiling:(a.clj:3:7)");
        assert_eq!(once.to_string(), twice.to_string());
    }
}
