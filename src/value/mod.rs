//! Runtime values.
//!
//! The value set is closed: nil, numbers, booleans, strings, user functions and
//! natives. Strings are interned through a thread-local table so that equal
//! strings share one allocation and comparing them is a pointer check. Numbers
//! are unboxed `f64`s, so two equal numbers are already the same value.

mod native;

pub use native::{Native, NativeError, NativeFn, NativeResult};

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

thread_local! {
    /// Every string the compiler or the VM has produced. Never shrinks.
    static STRINGS: RefCell<HashSet<Rc<str>>> = RefCell::new(HashSet::new());
}

/// Return the canonical shared instance of `s`.
pub fn intern(s: &str) -> Rc<str> {
    STRINGS.with(|strings| {
        let mut strings = strings.borrow_mut();
        if let Some(existing) = strings.get(s) {
            return Rc::clone(existing);
        }
        let interned: Rc<str> = Rc::from(s);
        strings.insert(Rc::clone(&interned));
        interned
    })
}

/// Static type tags. The discriminant is the operand word of `CHK_TYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u16)]
pub enum ValueType {
    Nil = 0,
    Num = 1,
    Bool = 2,
    Str = 3,
    Function = 4,
    Native = 5,
    /// Wildcard: matches every type in a signature comparison.
    Any = 6,
}

impl ValueType {
    pub fn from_word(word: u16) -> Option<Self> {
        Some(match word {
            0 => ValueType::Nil,
            1 => ValueType::Num,
            2 => ValueType::Bool,
            3 => ValueType::Str,
            4 => ValueType::Function,
            5 => ValueType::Native,
            6 => ValueType::Any,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueType::Nil => "nil",
            ValueType::Num => "num",
            ValueType::Bool => "bool",
            ValueType::Str => "str",
            ValueType::Function => "function",
            ValueType::Native => "native",
            ValueType::Any => "any",
        }
    }

    /// Type equality with `Any` on either side matching everything.
    pub fn accepts(self, other: ValueType) -> bool {
        self == ValueType::Any || other == ValueType::Any || self == other
    }

    /// The value an uninitialised binding of this type starts with.
    pub fn default_value(self) -> Value {
        match self {
            ValueType::Num => Value::Number(0.0),
            ValueType::Bool => Value::Bool(false),
            ValueType::Str => Value::str(""),
            _ => Value::Nil,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compare a declared parameter list against the runtime argument types.
pub fn signature_matches(params: &[ValueType], args: &[ValueType]) -> bool {
    params.len() == args.len() && params.iter().zip(args).all(|(p, a)| p.accepts(*a))
}

/// Render a type list as `num, str`.
pub fn type_list(types: &[ValueType]) -> String {
    types.iter().map(|t| t.name()).collect::<Vec<_>>().join(", ")
}

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Number(f64),
    Bool(bool),
    Str(Rc<str>),
    Function(Rc<Function>),
    Native(Rc<Native>),
}

impl Value {
    /// Build an interned string value.
    pub fn str(s: &str) -> Self {
        Value::Str(intern(s))
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Number(_) => ValueType::Num,
            Value::Bool(_) => ValueType::Bool,
            Value::Str(_) => ValueType::Str,
            Value::Function(_) => ValueType::Function,
            Value::Native(_) => ValueType::Native,
        }
    }

    /// `nil` and `false` are falsey; everything else is truthy.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Value::Function(_) | Value::Native(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Number(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else {
                    write!(f, "{}", n)
                }
            }
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::Function(func) => write!(f, "{}", func),
            Value::Native(native) => write!(f, "<native fun {}>", native.name()),
        }
    }
}

/// A user-defined function. Functions sharing a name form an overload set
/// recorded in the chunk; the entry offset is bound by `DEF_FUN` at runtime.
#[derive(Debug)]
pub struct Function {
    pub name: Rc<str>,
    pub params: Vec<ValueType>,
    pub return_type: ValueType,
    entry: Cell<Option<usize>>,
}

impl Function {
    pub fn new(name: &str, params: Vec<ValueType>, return_type: ValueType) -> Self {
        Function { name: intern(name), params, return_type, entry: Cell::new(None) }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// First instruction of the body, once `DEF_FUN` has executed.
    pub fn entry(&self) -> Option<usize> {
        self.entry.get()
    }

    pub fn bind_entry(&self, offset: usize) {
        self.entry.set(Some(offset));
    }

    /// Short form used in diagnostics: `<fun name()>`.
    pub fn short_name(&self) -> String {
        format!("<fun {}()>", self.name)
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fun {} {}({})>", self.return_type, self.name, type_list(&self.params))
    }
}
