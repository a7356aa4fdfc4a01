pub mod core;
pub mod host;
pub mod namespace;
pub mod rt;
