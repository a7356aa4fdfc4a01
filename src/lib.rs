pub mod driver;
pub mod error;
pub mod instructions;
pub mod lexer;
pub mod options;
pub mod parser;
pub mod runtime;
pub mod value;
pub mod vm;

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;
