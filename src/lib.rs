//! etc: a small statically-typed scripting language.
//!
//! Source is compiled in one pass straight to bytecode ([`compiler`]) and run
//! on a stack machine ([`vm`]). Natives come from [`stdlib`] or from the host
//! through [`Vm::register_native`].

pub mod chunk;
pub mod compiler;
pub mod diagnostic;
pub mod lexer;
pub mod stdlib;
pub mod value;
pub mod vm;

pub use compiler::CompileError;
pub use vm::{Capture, InterpretError, RuntimeError, Vm, VmOptions};

/// Compile and run `source` on a fresh VM writing to stdout.
pub fn interpret(source: &str) -> Result<(), InterpretError> {
    Vm::new().interpret(source)
}
