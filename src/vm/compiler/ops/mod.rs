pub mod bindings;
pub mod collections;
pub mod control;
pub mod definitions;
pub mod exceptions;
pub mod functions;
pub mod interop;
pub mod types;
