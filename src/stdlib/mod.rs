//! Native libraries a script can pull in with `using <name>;`.
//!
//! `general` is active in every run. Each library registers its natives
//! through [`Vm::register_native`], the same entry point an embedder uses.

mod general;
mod math;
mod string;

use crate::value::{NativeError, Value};
use crate::vm::Vm;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Library {
    General,
    Math,
    String,
}

impl Library {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "general" => Some(Library::General),
            "math" => Some(Library::Math),
            "string" => Some(Library::String),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Library::General => "general",
            Library::Math => "math",
            Library::String => "string",
        }
    }
}

/// Register every native of `library`. Callers go through
/// [`Vm::activate_library`], which makes repeated activation a no-op.
pub(crate) fn activate(vm: &mut Vm, library: Library) -> Result<(), NativeError> {
    match library {
        Library::General => general::register(vm),
        Library::Math => math::register(vm),
        Library::String => string::register(vm),
    }
}

fn number(value: &Value) -> Result<f64, NativeError> {
    value.as_number().ok_or_else(|| NativeError::failed(format!("Expected a number, got '{value}'.")))
}

fn text(value: &Value) -> Result<&str, NativeError> {
    value.as_str().ok_or_else(|| NativeError::failed(format!("Expected a string, got '{value}'.")))
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::chunk::Chunk;
    use crate::value::{NativeResult, Value};
    use crate::vm::{Capture, Vm};

    use super::Library;

    /// A loaded VM with `library` active, writing into the returned capture.
    pub fn vm_with(library: Library) -> (Vm, Capture) {
        let out = Capture::default();
        let mut vm = Vm::with_output(out.clone());
        vm.load(Chunk::new()).unwrap();
        vm.activate_library(library).unwrap();
        (vm, out)
    }

    /// Resolve `name` for the argument types and call it.
    pub fn call(vm: &Vm, name: &str, args: &[Value]) -> NativeResult {
        let Some(Value::Native(native)) = vm.global(name) else {
            panic!("'{name}' is not a registered native");
        };
        let types: Vec<_> = args.iter().map(Value::value_type).collect();
        let function = native.resolve(&types).unwrap_or_else(|| panic!("no overload of '{name}' for {types:?}"));
        function.call(args)
    }

    pub fn num(vm: &Vm, name: &str, args: &[Value]) -> f64 {
        match call(vm, name, args) {
            Ok(Value::Number(n)) => n,
            other => panic!("{name} returned {other:?}"),
        }
    }
}
