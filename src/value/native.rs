use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::{Value, ValueType, type_list};

pub type NativeResult = Result<Value, NativeError>;

/// Host-side failures: either a native body rejecting its input, or a
/// registration mistake made by the embedding code.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NativeError {
    #[error("{0}")]
    Failed(String),
    #[error("native '{name}' already has an overload taking ({signature})")]
    Duplicate { name: String, signature: String },
    #[error("native '{name}' declares {declared} parameters but its body takes {takes}")]
    ArityMismatch { name: String, declared: usize, takes: usize },
    #[error("'{name}' is already bound to a non-native value")]
    NameTaken { name: String },
    #[error("too many constants to register native '{name}'")]
    TooManyConstants { name: String },
}

impl NativeError {
    pub fn failed(message: impl Into<String>) -> Self {
        NativeError::Failed(message.into())
    }
}

/// A host callable, tagged by arity. Arguments arrive in left-to-right order.
#[derive(Clone)]
pub enum NativeFn {
    Nullary(Rc<dyn Fn() -> NativeResult>),
    Unary(Rc<dyn Fn(&Value) -> NativeResult>),
    Binary(Rc<dyn Fn(&Value, &Value) -> NativeResult>),
    Ternary(Rc<dyn Fn(&Value, &Value, &Value) -> NativeResult>),
}

impl NativeFn {
    pub fn nullary(f: impl Fn() -> NativeResult + 'static) -> Self {
        NativeFn::Nullary(Rc::new(f))
    }

    pub fn unary(f: impl Fn(&Value) -> NativeResult + 'static) -> Self {
        NativeFn::Unary(Rc::new(f))
    }

    pub fn binary(f: impl Fn(&Value, &Value) -> NativeResult + 'static) -> Self {
        NativeFn::Binary(Rc::new(f))
    }

    pub fn ternary(f: impl Fn(&Value, &Value, &Value) -> NativeResult + 'static) -> Self {
        NativeFn::Ternary(Rc::new(f))
    }

    pub fn arity(&self) -> usize {
        match self {
            NativeFn::Nullary(_) => 0,
            NativeFn::Unary(_) => 1,
            NativeFn::Binary(_) => 2,
            NativeFn::Ternary(_) => 3,
        }
    }

    /// Invoke with exactly `arity()` arguments taken from the front of `args`.
    pub fn call(&self, args: &[Value]) -> NativeResult {
        match (self, args) {
            (NativeFn::Nullary(f), []) => f(),
            (NativeFn::Unary(f), [a]) => f(a),
            (NativeFn::Binary(f), [a, b]) => f(a, b),
            (NativeFn::Ternary(f), [a, b, c]) => f(a, b, c),
            _ => Err(NativeError::ArityMismatch {
                name: "<native>".to_string(),
                declared: args.len(),
                takes: self.arity(),
            }),
        }
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativeFn/{}", self.arity())
    }
}

/// A native function and its overloads, keyed by exact parameter-type tuple.
/// The tuple length is the arity, so lookup is by arity and types together.
pub struct Native {
    name: Rc<str>,
    overloads: RefCell<HashMap<Vec<ValueType>, NativeFn>>,
}

impl Native {
    pub fn new(name: &str) -> Self {
        Native { name: super::intern(name), overloads: RefCell::new(HashMap::new()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_overload(&self, params: &[ValueType], function: NativeFn) -> Result<(), NativeError> {
        if function.arity() != params.len() {
            return Err(NativeError::ArityMismatch {
                name: self.name.to_string(),
                declared: params.len(),
                takes: function.arity(),
            });
        }
        let mut overloads = self.overloads.borrow_mut();
        if overloads.contains_key(params) {
            return Err(NativeError::Duplicate {
                name: self.name.to_string(),
                signature: type_list(params),
            });
        }
        overloads.insert(params.to_vec(), function);
        Ok(())
    }

    /// Exact match only; natives have no wildcard or insertion-order fallback.
    pub fn resolve(&self, args: &[ValueType]) -> Option<NativeFn> {
        self.overloads.borrow().get(args).cloned()
    }

    pub fn overload_count(&self) -> usize {
        self.overloads.borrow().len()
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Native")
            .field("name", &self.name)
            .field("overloads", &self.overload_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shout() -> NativeFn {
        NativeFn::unary(|v| Ok(Value::str(&v.to_string().to_uppercase())))
    }

    #[test]
    fn resolves_by_exact_types() {
        let native = Native::new("shout");
        native.add_overload(&[ValueType::Str], shout()).unwrap();
        assert!(native.resolve(&[ValueType::Str]).is_some());
        assert!(native.resolve(&[ValueType::Num]).is_none());
        assert!(native.resolve(&[]).is_none());
    }

    #[test]
    fn duplicate_overload_is_rejected() {
        let native = Native::new("shout");
        native.add_overload(&[ValueType::Str], shout()).unwrap();
        let err = native.add_overload(&[ValueType::Str], shout()).unwrap_err();
        assert!(matches!(err, NativeError::Duplicate { .. }));
        assert_eq!(native.overload_count(), 1);
    }

    #[test]
    fn arity_must_match_body() {
        let native = Native::new("shout");
        let err = native.add_overload(&[ValueType::Str, ValueType::Str], shout()).unwrap_err();
        assert!(matches!(err, NativeError::ArityMismatch { declared: 2, takes: 1, .. }));
    }

    #[test]
    fn call_passes_arguments_in_order() {
        let sub = NativeFn::binary(|a, b| match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a - b)),
            _ => Err(NativeError::failed("numbers only")),
        });
        let out = sub.call(&[Value::Number(10.0), Value::Number(4.0)]).unwrap();
        assert_eq!(out, Value::Number(6.0));
    }
}
