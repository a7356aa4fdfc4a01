pub mod bytecode_builder;
pub mod compiler;
pub mod emitter;
pub mod expr;
pub mod objexpr;
mod ops;
pub mod path;
pub mod reflector;
pub mod scope_manager;

pub use compiler::{Compiler, Context};
