//! The bytecode container: instruction words, constant pool and line table.

mod disassemble;

pub use disassemble::{REPEATED_LINE, disassemble, disassemble_instruction, line_column};

use std::collections::HashMap;
use std::rc::Rc;

use crate::value::{Function, Value, signature_matches};

// ── Opcodes (one 16-bit word each, operands follow inline) ──────────

// No operands
pub const OP_DEFAULT: u16 = 1;
pub const OP_NIL: u16 = 2;
pub const OP_TRUE: u16 = 3;
pub const OP_FALSE: u16 = 4;
pub const OP_NEGATE: u16 = 5;
pub const OP_NOT: u16 = 6;
pub const OP_ADD: u16 = 7;
pub const OP_SUBTRACT: u16 = 8;
pub const OP_MULTIPLY: u16 = 9;
pub const OP_DIVIDE: u16 = 10;
pub const OP_MODULO: u16 = 11;
pub const OP_EQUAL: u16 = 12;
pub const OP_LESS: u16 = 13;
pub const OP_GREATER: u16 = 14;
pub const OP_PRINT: u16 = 15;
pub const OP_POP: u16 = 16;
pub const OP_RETURN: u16 = 30;

// One operand: constant-pool index
pub const OP_CONSTANT: u16 = 0;
pub const OP_DEF_GLOBAL: u16 = 17;
pub const OP_GET_GLOBAL: u16 = 18;
pub const OP_SET_GLOBAL: u16 = 19;
pub const OP_DEF_FUNCTION: u16 = 28;
pub const OP_LIBRARY: u16 = 29;

// One operand: frame-relative slot
pub const OP_GET_LOCAL: u16 = 20;
pub const OP_SET_LOCAL: u16 = 21;

// One operand: type tag
pub const OP_CHECK_TYPE: u16 = 22;

// One operand: unsigned jump distance
pub const OP_JUMP: u16 = 23;
pub const OP_JUMP_IF_TRUE: u16 = 24;
pub const OP_JUMP_IF_FALSE: u16 = 25;
pub const OP_LOOP: u16 = 26;

// One operand: argument count
pub const OP_CALL: u16 = 27;

/// Mnemonic for an opcode word, or `None` when the word is not an opcode.
pub fn op_name(op: u16) -> Option<&'static str> {
    Some(match op {
        OP_CONSTANT => "CONSTANT",
        OP_DEFAULT => "DEFAULT",
        OP_NIL => "NIL",
        OP_TRUE => "TRUE",
        OP_FALSE => "FALSE",
        OP_NEGATE => "NEGATE",
        OP_NOT => "NOT",
        OP_ADD => "ADD",
        OP_SUBTRACT => "SUBTRACT",
        OP_MULTIPLY => "MULTIPLY",
        OP_DIVIDE => "DIVIDE",
        OP_MODULO => "MODULO",
        OP_EQUAL => "EQUAL",
        OP_LESS => "LESS",
        OP_GREATER => "GREATER",
        OP_PRINT => "PRINT",
        OP_POP => "POP",
        OP_DEF_GLOBAL => "DEF_GLOB",
        OP_GET_GLOBAL => "GET_GLOB",
        OP_SET_GLOBAL => "SET_GLOB",
        OP_GET_LOCAL => "GET_LOC",
        OP_SET_LOCAL => "SET_LOC",
        OP_CHECK_TYPE => "CHK_TYPE",
        OP_JUMP => "JUMP",
        OP_JUMP_IF_TRUE => "JUMP_IF_TRUE",
        OP_JUMP_IF_FALSE => "JUMP_IF_FALSE",
        OP_LOOP => "LOOP",
        OP_DEF_FUNCTION => "DEF_FUN",
        OP_CALL => "CALL",
        OP_LIBRARY => "LIB",
        OP_RETURN => "RETURN",
        _ => return None,
    })
}

/// Number of operand words following `op`.
pub fn operand_count(op: u16) -> usize {
    match op {
        OP_CONSTANT | OP_DEF_GLOBAL | OP_GET_GLOBAL | OP_SET_GLOBAL | OP_DEF_FUNCTION
        | OP_LIBRARY | OP_GET_LOCAL | OP_SET_LOCAL | OP_CHECK_TYPE | OP_JUMP
        | OP_JUMP_IF_TRUE | OP_JUMP_IF_FALSE | OP_LOOP | OP_CALL => 1,
        _ => 0,
    }
}

// ── Chunk ────────────────────────────────────────────────────────────

/// Append-only while compiling, read-only while running. `code` and `lines`
/// always have the same length.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    code: Vec<u16>,
    lines: Vec<usize>,
    constants: Vec<Value>,
    overloads: HashMap<Rc<str>, Vec<Rc<Function>>>,
}

impl Chunk {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one word; returns its index.
    pub fn write(&mut self, word: u16, line: usize) -> usize {
        let idx = self.code.len();
        self.code.push(word);
        self.lines.push(line);
        idx
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn code(&self) -> &[u16] {
        &self.code
    }

    pub fn word(&self, idx: usize) -> Option<u16> {
        self.code.get(idx).copied()
    }

    /// Overwrite an operand word. Opcode words are never patched.
    pub fn patch(&mut self, idx: usize, word: u16) {
        self.code[idx] = word;
    }

    pub fn line(&self, idx: usize) -> usize {
        self.lines.get(idx).copied().unwrap_or(0)
    }

    pub fn lines(&self) -> &[usize] {
        &self.lines
    }

    /// Add a constant, reusing an existing slot for equal numbers and strings.
    pub fn add_constant(&mut self, val: Value) -> usize {
        let existing = match &val {
            Value::Number(n) => self
                .constants
                .iter()
                .position(|c| matches!(c, Value::Number(m) if m == n)),
            Value::Str(_) => self.constants.iter().position(|c| *c == val),
            _ => None,
        };
        match existing {
            Some(idx) => idx,
            None => self.add_constant_raw(val),
        }
    }

    /// Add a constant without deduplication (function values).
    pub fn add_constant_raw(&mut self, val: Value) -> usize {
        let idx = self.constants.len();
        self.constants.push(val);
        idx
    }

    pub fn constant(&self, idx: usize) -> Option<&Value> {
        self.constants.get(idx)
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Register `function` in its name's overload set. Returns false when an
    /// overload with an indistinguishable parameter list already exists.
    pub fn add_overload(&mut self, function: Rc<Function>) -> bool {
        let set = self.overloads.entry(Rc::clone(&function.name)).or_default();
        if set.iter().any(|f| signature_matches(&f.params, &function.params)) {
            return false;
        }
        set.push(function);
        true
    }

    /// All overloads sharing `name`, in declaration order.
    pub fn overloads(&self, name: &str) -> &[Rc<Function>] {
        self.overloads.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}
