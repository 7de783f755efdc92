mod ast;
mod builtins;
mod compiler;
mod engine;
mod environment;
mod evaluator;
mod lexer;
mod object;
mod parser;
mod token;

pub use compiler::{Bytecode, Compiler, VirtualMachine};
pub use engine::{new_compiler, new_interpreter, Engine};
pub use evaluator::Evaluator;
pub use lexer::Lexer;
pub use object::Object;
pub use parser::Parser;
