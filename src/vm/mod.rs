pub mod compiler;
pub mod loader;
pub mod unit;
pub mod vm;
pub mod vp;
