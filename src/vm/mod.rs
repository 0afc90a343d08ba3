//! Stack virtual machine.
//!
//! One flat chunk holds the script and every function body. A call pushes a
//! frame whose `base` is the stack index of the callee; parameters and
//! locals follow it, so local slot `i` lives at `base + 1 + i`. Top-level
//! locals index the stack directly.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{self, Write};
use std::rc::Rc;
use std::time::Instant;

use serde::Serialize;

use crate::chunk::*;
use crate::compiler::{self, CompileError};
use crate::stdlib::{self, Library};
use crate::value::{Function, Native, NativeError, NativeFn, Value, ValueType, signature_matches, type_list};

/// Capacity of the value stack and of the frame stack.
pub const STACK_MAX: usize = u16::MAX as usize + 1;
pub const FRAMES_MAX: usize = u16::MAX as usize + 1;

/// Shared output sink. `print` and the printing natives write here.
pub type Output = Rc<RefCell<dyn Write>>;

#[derive(Debug, Clone, Copy, Default)]
pub struct VmOptions {
    /// Log every instruction and the stack at `trace` level.
    pub trace: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum VmError {
    #[error("Operand must be a number.")]
    NegateNonNumber,
    #[error("Both operands must be either numbers or strings.")]
    AddOperands,
    #[error("Both operands must be numbers.")]
    NumberOperands,
    #[error("Variable with name '{name}' already exists.")]
    Redefinition { name: String },
    #[error("Undefined variable '{name}'.")]
    UndefinedVariable { name: String },
    #[error("A function identifier cannot be used to store values.")]
    AssignToFunction,
    #[error("Expecting a value of type '{expected}'.")]
    TypeMismatch { expected: ValueType },
    #[error("Can only call functions.")]
    NotCallable,
    #[error("No overload of {callee} accepts {arguments}.")]
    NoOverload { callee: String, arguments: String },
    #[error("Cannot return any value except 'nil'.")]
    NonNilReturn,
    #[error("'{function}' can only return a value of type '{expected}'.")]
    ReturnType { function: String, expected: ValueType },
    #[error("Library '{name}' does not exist.")]
    UnknownLibrary { name: String },
    #[error("Stack overflow.")]
    StackOverflow,
    #[error("Too many nested calls.")]
    FrameOverflow,
    #[error("Stack underflow.")]
    StackUnderflow,
    #[error("unknown opcode: {op}")]
    UnknownOpcode { op: u16 },
    #[error("malformed bytecode: {0}")]
    Malformed(&'static str),
    #[error("output error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Native(#[from] NativeError),
}

type VmResult<T> = Result<T, VmError>;

/// One row of a runtime backtrace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceLine {
    pub line: usize,
    /// `None` for top-level script code.
    pub function: Option<String>,
}

impl fmt::Display for TraceLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(name) => write!(f, "[line {}] in {}()", self.line, name),
            None => write!(f, "[line {}] in script", self.line),
        }
    }
}

/// A terminal runtime failure plus the call stack at the point it happened,
/// innermost frame first.
#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("{message}{}", render_trace(.trace))]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceLine>,
}

fn render_trace(trace: &[TraceLine]) -> String {
    trace.iter().map(|t| format!("\n{t}")).collect()
}

fn render_compile_errors(errors: &[CompileError]) -> String {
    errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum InterpretError {
    #[error("{}", render_compile_errors(.0))]
    Compile(Vec<CompileError>),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error(transparent)]
    Native(#[from] NativeError),
}

impl InterpretError {
    /// Process exit status for this failure: 65 for compile errors, 70 for
    /// runtime errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            InterpretError::Compile(_) => 65,
            InterpretError::Runtime(_) | InterpretError::Native(_) => 70,
        }
    }
}

struct CallFrame {
    function: Rc<Function>,
    return_ip: usize,
    /// Stack index of the callee value.
    base: usize,
}

enum Flow {
    Continue,
    Halt,
}

pub struct Vm {
    chunk: Chunk,
    ip: usize,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<u16, Value>,
    /// One variable tier per active call, consulted before `globals`.
    calls: Vec<HashMap<u16, Value>>,
    libraries: HashSet<Library>,
    started: Instant,
    out: Output,
    options: VmOptions,
}

impl Default for Vm {
    fn default() -> Self {
        Vm::new()
    }
}

impl Vm {
    pub fn new() -> Self {
        Vm::with_output(io::stdout())
    }

    pub fn with_output(out: impl Write + 'static) -> Self {
        Vm {
            chunk: Chunk::new(),
            ip: 0,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(64),
            globals: HashMap::new(),
            calls: Vec::new(),
            libraries: HashSet::new(),
            started: Instant::now(),
            out: Rc::new(RefCell::new(out)),
            options: VmOptions::default(),
        }
    }

    pub fn with_options(mut self, options: VmOptions) -> Self {
        self.options = options;
        self
    }

    pub fn output(&self) -> Output {
        Rc::clone(&self.out)
    }

    /// When this VM was created; `clock()` measures from here.
    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn chunk(&self) -> &Chunk {
        &self.chunk
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    /// Compile and run `source`.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let mut chunk = Chunk::new();
        compiler::compile(source, &mut chunk).map_err(InterpretError::Compile)?;
        self.load(chunk)?;
        self.run()?;
        Ok(())
    }

    /// Replace the program. Globals and libraries from a previous program are
    /// dropped because they are keyed by that program's constant indices.
    pub fn load(&mut self, chunk: Chunk) -> Result<(), NativeError> {
        self.chunk = chunk;
        self.globals.clear();
        self.libraries.clear();
        self.reset();
        self.activate_library(Library::General)
    }

    fn reset(&mut self) {
        self.ip = 0;
        self.stack.clear();
        self.frames.clear();
        self.calls.clear();
    }

    /// Execute the loaded chunk from the start.
    pub fn run(&mut self) -> Result<(), RuntimeError> {
        self.reset();
        let result = self.execute();
        if let Err(e) = self.out.borrow_mut().flush() {
            log::warn!("failed to flush output: {e}");
        }
        match &result {
            Ok(()) => log::debug!("run finished"),
            Err(e) => log::debug!("run aborted: {}", e.message),
        }
        result
    }

    /// Look up a global by name.
    pub fn global(&self, name: &str) -> Option<&Value> {
        let idx = self.chunk.constants().iter().position(|c| c.as_str() == Some(name))?;
        self.globals.get(&u16::try_from(idx).ok()?)
    }

    /// Activate a library once; later activations are no-ops.
    pub fn activate_library(&mut self, library: Library) -> Result<(), NativeError> {
        if !self.libraries.insert(library) {
            return Ok(());
        }
        log::debug!("activating library '{}'", library.name());
        stdlib::activate(self, library)
    }

    /// Add one overload of a native function, creating the global on first use.
    pub fn register_native(
        &mut self,
        name: &str,
        params: &[ValueType],
        function: NativeFn,
    ) -> Result<(), NativeError> {
        let idx = self.chunk.add_constant(Value::str(name));
        let idx = u16::try_from(idx)
            .map_err(|_| NativeError::TooManyConstants { name: name.to_string() })?;
        match self.globals.get(&idx) {
            Some(Value::Native(native)) => native.add_overload(params, function),
            Some(_) => Err(NativeError::NameTaken { name: name.to_string() }),
            None => {
                let native = Native::new(name);
                native.add_overload(params, function)?;
                self.globals.insert(idx, Value::Native(Rc::new(native)));
                Ok(())
            }
        }
    }

    // ── Execution ───────────────────────────────────────────────────

    fn execute(&mut self) -> Result<(), RuntimeError> {
        loop {
            let start = self.ip;
            match self.step() {
                Ok(Flow::Continue) => {}
                Ok(Flow::Halt) => return Ok(()),
                Err(e) => return Err(self.runtime_error(e, start)),
            }
        }
    }

    /// Build the backtrace from the frame stack: the failing line for the
    /// innermost frame, then each frame's call site.
    fn runtime_error(&self, error: VmError, at: usize) -> RuntimeError {
        let mut line = self.chunk.line(at);
        let mut trace = Vec::with_capacity(self.frames.len() + 1);
        for frame in self.frames.iter().rev() {
            trace.push(TraceLine { line, function: Some(frame.function.name.to_string()) });
            line = self.chunk.line(frame.return_ip.saturating_sub(1));
        }
        trace.push(TraceLine { line, function: None });
        RuntimeError { message: error.to_string(), trace }
    }

    fn step(&mut self) -> VmResult<Flow> {
        if self.options.trace {
            self.trace_instruction();
        }

        macro_rules! numeric {
            ($wrap:path, $op:tt) => {{
                let (Value::Number(a), Value::Number(b)) = (self.peek(1)?, self.peek(0)?) else {
                    return Err(VmError::NumberOperands);
                };
                let result = $wrap(*a $op *b);
                self.stack.truncate(self.stack.len() - 2);
                self.push(result)?;
            }};
        }

        let op = self.read_word()?;
        match op {
            OP_CONSTANT => {
                let value = self.read_constant()?.clone();
                self.push(value)?;
            }
            OP_DEFAULT => {
                let value = self
                    .frames
                    .last()
                    .map_or(Value::Nil, |f| f.function.return_type.default_value());
                self.push(value)?;
            }
            OP_NIL => self.push(Value::Nil)?,
            OP_TRUE => self.push(Value::Bool(true))?,
            OP_FALSE => self.push(Value::Bool(false))?,
            OP_NEGATE => {
                let Value::Number(n) = self.peek(0)? else {
                    return Err(VmError::NegateNonNumber);
                };
                let n = -*n;
                self.pop()?;
                self.push(Value::Number(n))?;
            }
            OP_NOT => {
                let value = self.pop()?;
                self.push(Value::Bool(value.is_falsey()))?;
            }
            OP_ADD => match (self.peek(1)?, self.peek(0)?) {
                (Value::Str(a), Value::Str(b)) => {
                    let joined = Value::str(&format!("{a}{b}"));
                    self.stack.truncate(self.stack.len() - 2);
                    self.push(joined)?;
                }
                (Value::Number(_), Value::Number(_)) => numeric!(Value::Number, +),
                _ => return Err(VmError::AddOperands),
            },
            OP_SUBTRACT => numeric!(Value::Number, -),
            OP_MULTIPLY => numeric!(Value::Number, *),
            OP_DIVIDE => numeric!(Value::Number, /),
            OP_MODULO => numeric!(Value::Number, %),
            OP_LESS => numeric!(Value::Bool, <),
            OP_GREATER => numeric!(Value::Bool, >),
            OP_EQUAL => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b))?;
            }
            OP_PRINT => {
                let value = self.pop()?;
                writeln!(self.out.borrow_mut(), "{value}")?;
            }
            OP_POP => {
                self.pop()?;
            }
            OP_DEF_GLOBAL => {
                let id = self.read_word()?;
                let is_function = matches!(self.peek(0)?, Value::Function(_));
                let tier = self.calls.last_mut().unwrap_or(&mut self.globals);
                if tier.contains_key(&id) {
                    // Later overloads reuse the name; the first binding stays.
                    if !is_function {
                        return Err(VmError::Redefinition { name: self.constant_name(id) });
                    }
                    self.pop()?;
                } else {
                    let value = self.pop()?;
                    let tier = self.calls.last_mut().unwrap_or(&mut self.globals);
                    tier.insert(id, value);
                }
            }
            OP_GET_GLOBAL => {
                let id = self.read_word()?;
                let value = self
                    .calls
                    .last()
                    .and_then(|tier| tier.get(&id))
                    .or_else(|| self.globals.get(&id))
                    .cloned()
                    .ok_or_else(|| VmError::UndefinedVariable { name: self.constant_name(id) })?;
                self.push(value)?;
            }
            OP_SET_GLOBAL => {
                let id = self.read_word()?;
                let incoming = self.peek(0)?.clone();
                let name = self.constant_name(id);
                let in_call = self.calls.last().is_some_and(|tier| tier.contains_key(&id));
                let tier = if in_call {
                    self.calls.last_mut().unwrap_or(&mut self.globals)
                } else {
                    &mut self.globals
                };
                let slot = tier.get_mut(&id).ok_or(VmError::UndefinedVariable { name })?;
                if slot.is_callable() {
                    return Err(VmError::AssignToFunction);
                }
                if slot.value_type() != incoming.value_type() {
                    return Err(VmError::TypeMismatch { expected: slot.value_type() });
                }
                *slot = incoming;
            }
            OP_GET_LOCAL => {
                let slot = self.local_index()?;
                let value = self.stack[slot].clone();
                self.push(value)?;
            }
            OP_SET_LOCAL => {
                let slot = self.local_index()?;
                let incoming = self.peek(0)?.clone();
                let expected = self.stack[slot].value_type();
                if expected != incoming.value_type() {
                    return Err(VmError::TypeMismatch { expected });
                }
                self.stack[slot] = incoming;
            }
            OP_CHECK_TYPE => {
                let word = self.read_word()?;
                let expected = ValueType::from_word(word).ok_or(VmError::Malformed("bad type tag"))?;
                if !expected.accepts(self.peek(0)?.value_type()) {
                    return Err(VmError::TypeMismatch { expected });
                }
            }
            OP_JUMP => {
                let distance = self.read_word()?;
                self.ip += distance as usize;
            }
            OP_JUMP_IF_TRUE => {
                let distance = self.read_word()?;
                if !self.peek(0)?.is_falsey() {
                    self.ip += distance as usize;
                }
            }
            OP_JUMP_IF_FALSE => {
                let distance = self.read_word()?;
                if self.peek(0)?.is_falsey() {
                    self.ip += distance as usize;
                }
            }
            OP_LOOP => {
                let distance = self.read_word()?;
                self.ip = self
                    .ip
                    .checked_sub(distance as usize)
                    .ok_or(VmError::Malformed("loop before start of chunk"))?;
            }
            OP_DEF_FUNCTION => {
                let entry = match self.read_constant()? {
                    Value::Number(n) => *n as usize,
                    _ => return Err(VmError::Malformed("function entry is not a number")),
                };
                let Value::Function(function) = self.peek(0)? else {
                    return Err(VmError::Malformed("DEF_FUN without a function"));
                };
                function.bind_entry(entry);
            }
            OP_CALL => {
                let argc = self.read_word()? as usize;
                self.call_value(argc)?;
            }
            OP_LIBRARY => {
                let name = match self.read_constant()? {
                    Value::Str(name) => name.to_string(),
                    _ => return Err(VmError::Malformed("library name is not a string")),
                };
                let library = Library::from_name(&name).ok_or(VmError::UnknownLibrary { name })?;
                self.activate_library(library)?;
            }
            OP_RETURN => return self.return_from_call(),
            _ => return Err(VmError::UnknownOpcode { op }),
        }
        Ok(Flow::Continue)
    }

    fn call_value(&mut self, argc: usize) -> VmResult<()> {
        let first_arg = self
            .stack
            .len()
            .checked_sub(argc)
            .filter(|i| *i > 0)
            .ok_or(VmError::StackUnderflow)?;
        let args: Vec<ValueType> = self.stack[first_arg..].iter().map(Value::value_type).collect();
        match &self.stack[first_arg - 1] {
            Value::Function(function) => {
                let function = Rc::clone(function);
                self.call_function(&function, &args, first_arg - 1)
            }
            Value::Native(native) => {
                let native = Rc::clone(native);
                self.call_native(&native, &args, first_arg)
            }
            _ => Err(VmError::NotCallable),
        }
    }

    /// The callee's own signature wins; otherwise the first bound overload of
    /// the same name whose parameters accept the arguments.
    fn call_function(&mut self, callee: &Rc<Function>, args: &[ValueType], base: usize) -> VmResult<()> {
        let target = if signature_matches(&callee.params, args) && callee.entry().is_some() {
            Rc::clone(callee)
        } else {
            self.chunk
                .overloads(&callee.name)
                .iter()
                .find(|f| f.entry().is_some() && signature_matches(&f.params, args))
                .cloned()
                .ok_or_else(|| VmError::NoOverload {
                    callee: callee.short_name(),
                    arguments: describe_arguments(args),
                })?
        };
        let entry = target.entry().ok_or(VmError::Malformed("function has no entry"))?;
        if self.frames.len() >= FRAMES_MAX {
            return Err(VmError::FrameOverflow);
        }
        self.calls.push(HashMap::new());
        self.frames.push(CallFrame { function: target, return_ip: self.ip, base });
        self.ip = entry;
        Ok(())
    }

    fn call_native(&mut self, native: &Native, args: &[ValueType], first_arg: usize) -> VmResult<()> {
        let function = native.resolve(args).ok_or_else(|| VmError::NoOverload {
            callee: format!("<native fun {}>", native.name()),
            arguments: describe_arguments(args),
        })?;
        let result = function.call(&self.stack[first_arg..])?;
        self.stack.truncate(first_arg - 1);
        self.push(result)
    }

    /// Validate before the frame is popped so a bad return value is reported
    /// inside the function that produced it.
    fn return_from_call(&mut self) -> VmResult<Flow> {
        let Some(frame) = self.frames.last() else {
            return Ok(Flow::Halt);
        };
        let function = Rc::clone(&frame.function);
        let (return_ip, base) = (frame.return_ip, frame.base);

        let result = self.pop()?;
        let expected = function.return_type;
        if expected == ValueType::Nil && !matches!(result, Value::Nil) {
            return Err(VmError::NonNilReturn);
        }
        if !expected.accepts(result.value_type()) {
            return Err(VmError::ReturnType { function: function.to_string(), expected });
        }

        self.stack.truncate(base);
        self.frames.pop();
        self.calls.pop();
        self.ip = return_ip;
        self.push(result)?;
        Ok(Flow::Continue)
    }

    // ── Helpers ─────────────────────────────────────────────────────

    fn read_word(&mut self) -> VmResult<u16> {
        let word = self.chunk.word(self.ip).ok_or(VmError::Malformed("ran past end of chunk"))?;
        self.ip += 1;
        Ok(word)
    }

    fn read_constant(&mut self) -> VmResult<&Value> {
        let idx = self.read_word()? as usize;
        self.chunk.constant(idx).ok_or(VmError::Malformed("constant index out of range"))
    }

    fn constant_name(&self, id: u16) -> String {
        self.chunk.constant(id as usize).map(|v| v.to_string()).unwrap_or_default()
    }

    /// Read a slot operand and turn it into an absolute stack index.
    fn local_index(&mut self) -> VmResult<usize> {
        let slot = self.read_word()? as usize;
        let base = self.frames.last().map_or(0, |f| f.base + 1);
        let idx = base + slot;
        if idx >= self.stack.len() {
            return Err(VmError::Malformed("local slot outside the stack"));
        }
        Ok(idx)
    }

    fn push(&mut self, value: Value) -> VmResult<()> {
        if self.stack.len() >= STACK_MAX {
            return Err(VmError::StackOverflow);
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> VmResult<Value> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    fn peek(&self, distance: usize) -> VmResult<&Value> {
        self.stack
            .len()
            .checked_sub(distance + 1)
            .and_then(|i| self.stack.get(i))
            .ok_or(VmError::StackUnderflow)
    }

    fn trace_instruction(&self) {
        if !log::log_enabled!(log::Level::Trace) {
            return;
        }
        let stack: String = self.stack.iter().map(|v| format!("[ {v} ]")).collect();
        let (text, _) = disassemble_instruction(&self.chunk, self.ip);
        log::trace!("          {stack}");
        log::trace!("{text}");
    }
}

/// In-memory output sink whose clones share one buffer. Hand one clone to
/// [`Vm::with_output`] and read the program's output from another.
#[derive(Debug, Clone, Default)]
pub struct Capture(Rc<RefCell<Vec<u8>>>);

impl Capture {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.borrow()).into_owned()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// `2 arguments (num, str)`
fn describe_arguments(args: &[ValueType]) -> String {
    let plural = if args.len() == 1 { "" } else { "s" };
    if args.is_empty() {
        format!("0 argument{plural}")
    } else {
        format!("{} argument{plural} ({})", args.len(), type_list(args))
    }
}
