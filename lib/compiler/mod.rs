pub mod code;
mod compiler;
mod symbol_table;
mod vm;

pub use compiler::{Bytecode, Compiler};
pub use vm::VirtualMachine;
