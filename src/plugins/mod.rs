pub mod builtin;
pub mod process;
pub mod registry;
