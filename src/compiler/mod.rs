//! Single-pass compiler: a Pratt parser that writes bytecode as it goes.
//!
//! There is no syntax tree. Each parse function emits the words for the
//! construct it just recognised, forward jumps are written with a zero operand
//! and patched once the target is known, and locals are resolved to stack
//! slots at the point of use.

use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::chunk::*;
use crate::lexer::{Scanner, Span, Token, TokenKind};
use crate::value::{Function, Value, ValueType};

/// Maximum number of live locals; slot operands are one word wide.
const LOCALS_MAX: usize = u16::MAX as usize + 1;

/// Where a diagnostic points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "lexeme", rename_all = "lowercase")]
pub enum Location {
    At(String),
    End,
    /// The token was itself an error; the message already describes it.
    Unknown,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::At(lexeme) => write!(f, " at '{lexeme}'"),
            Location::End => write!(f, " at the end"),
            Location::Unknown => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize)]
#[error("[line {line}] Error{location}. {message}")]
pub struct CompileError {
    pub line: usize,
    pub location: Location,
    pub message: String,
    pub span: Span,
}

/// Compile `source` into `chunk`. Every diagnostic found is returned; the chunk
/// contents are unspecified on failure.
pub fn compile(source: &str, chunk: &mut Chunk) -> Result<(), Vec<CompileError>> {
    log::debug!("compiling {} bytes", source.len());
    let mut compiler = Compiler::new(source, chunk);
    compiler.advance();
    while !compiler.matches(TokenKind::Eof) {
        compiler.declaration();
    }
    compiler.emit(OP_RETURN);

    if compiler.errors.is_empty() {
        log::debug!(
            "compiled {} words, {} constants",
            compiler.chunk.len(),
            compiler.chunk.constants().len()
        );
        Ok(())
    } else {
        log::debug!("compilation failed with {} error(s)", compiler.errors.len());
        Err(compiler.errors)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Prefix {
    Grouping,
    Unary,
    Number,
    String,
    Literal,
    Variable,
}

#[derive(Debug, Clone, Copy)]
enum Infix {
    Binary,
    Call,
    And,
    Or,
}

struct ParseRule {
    prefix: Option<Prefix>,
    infix: Option<Infix>,
    precedence: Precedence,
}

fn rule(kind: TokenKind) -> ParseRule {
    use Precedence as P;
    let (prefix, infix, precedence) = match kind {
        TokenKind::LParen => (Some(Prefix::Grouping), Some(Infix::Call), P::Call),
        TokenKind::Minus => (Some(Prefix::Unary), Some(Infix::Binary), P::Term),
        TokenKind::Plus => (None, Some(Infix::Binary), P::Term),
        TokenKind::Slash | TokenKind::Star | TokenKind::Percent => {
            (None, Some(Infix::Binary), P::Factor)
        }
        TokenKind::Bang => (Some(Prefix::Unary), None, P::None),
        TokenKind::NotEq | TokenKind::EqEq => (None, Some(Infix::Binary), P::Equality),
        TokenKind::Less | TokenKind::LessEq | TokenKind::Greater | TokenKind::GreaterEq => {
            (None, Some(Infix::Binary), P::Comparison)
        }
        TokenKind::Identifier => (Some(Prefix::Variable), None, P::None),
        TokenKind::String => (Some(Prefix::String), None, P::None),
        TokenKind::Number => (Some(Prefix::Number), None, P::None),
        TokenKind::And => (None, Some(Infix::And), P::And),
        TokenKind::Or => (None, Some(Infix::Or), P::Or),
        TokenKind::False | TokenKind::True | TokenKind::Nil => (Some(Prefix::Literal), None, P::None),
        _ => (None, None, P::None),
    };
    ParseRule { prefix, infix, precedence }
}

/// Declared type keywords. `void` maps to nil.
fn declared_type(kind: TokenKind) -> Option<ValueType> {
    match kind {
        TokenKind::Num => Some(ValueType::Num),
        TokenKind::Bool => Some(ValueType::Bool),
        TokenKind::Str => Some(ValueType::Str),
        TokenKind::Void => Some(ValueType::Nil),
        _ => None,
    }
}

struct Local<'s> {
    name: &'s str,
    /// `None` between declaration and the end of the initializer.
    depth: Option<usize>,
}

struct FunctionContext {
    return_type: ValueType,
    has_returned: bool,
}

struct Compiler<'s, 'c> {
    source: &'s str,
    scanner: Scanner<'s>,
    chunk: &'c mut Chunk,
    previous: Token,
    current: Token,
    errors: Vec<CompileError>,
    panic_mode: bool,
    can_use: bool,
    locals: Vec<Local<'s>>,
    scope_depth: usize,
    function: Option<FunctionContext>,
    /// Nesting of if/while/for bodies. A return inside one does not count as
    /// the function's unconditional return.
    conditional_depth: usize,
}

impl<'s, 'c> Compiler<'s, 'c> {
    fn new(source: &'s str, chunk: &'c mut Chunk) -> Self {
        Compiler {
            source,
            scanner: Scanner::new(source),
            chunk,
            previous: Token::synthetic(),
            current: Token::synthetic(),
            errors: Vec::new(),
            panic_mode: false,
            can_use: true,
            locals: Vec::new(),
            scope_depth: 0,
            function: None,
            conditional_depth: 0,
        }
    }

    // ── Token plumbing ──────────────────────────────────────────────

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.next_token();
            match self.current.kind {
                TokenKind::Error(message) => self.error_at_current(message),
                _ => break,
            }
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn matches(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.check(kind) {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn lexeme(&self, token: Token) -> &'s str {
        token.lexeme(self.source)
    }

    // ── Diagnostics ─────────────────────────────────────────────────

    fn error_at(&mut self, token: Token, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        let location = match token.kind {
            TokenKind::Eof => Location::End,
            TokenKind::Error(_) => Location::Unknown,
            _ => Location::At(self.lexeme(token).to_string()),
        };
        self.errors.push(CompileError {
            line: token.line,
            location,
            message: message.to_string(),
            span: token.span,
        });
    }

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    /// Skip to a statement boundary so one mistake yields one diagnostic.
    fn synchronize(&mut self) {
        self.panic_mode = false;
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semi {
                return;
            }
            match self.current.kind {
                TokenKind::Bool
                | TokenKind::Class
                | TokenKind::For
                | TokenKind::Fun
                | TokenKind::Helper
                | TokenKind::If
                | TokenKind::Num
                | TokenKind::Print
                | TokenKind::Return
                | TokenKind::Str
                | TokenKind::Void
                | TokenKind::While => return,
                _ => self.advance(),
            }
        }
    }

    // ── Emission ────────────────────────────────────────────────────

    fn emit(&mut self, word: u16) -> usize {
        let line = self.previous.line;
        self.chunk.write(word, line)
    }

    fn emit_with(&mut self, op: u16, operand: u16) {
        self.emit(op);
        self.emit(operand);
    }

    fn make_constant(&mut self, value: Value) -> u16 {
        let idx = self.chunk.add_constant(value);
        self.constant_index(idx)
    }

    fn constant_index(&mut self, idx: usize) -> u16 {
        match u16::try_from(idx) {
            Ok(idx) => idx,
            Err(_) => {
                self.error("Too many constants in one chunk.");
                0
            }
        }
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_with(OP_CONSTANT, idx);
    }

    fn emit_check(&mut self, ty: ValueType) {
        self.emit_with(OP_CHECK_TYPE, ty as u16);
    }

    /// Emit a jump with a placeholder operand; returns the operand's index.
    fn emit_jump(&mut self, op: u16) -> usize {
        self.emit(op);
        self.emit(0)
    }

    fn patch_jump(&mut self, at: usize) {
        let distance = self.chunk.len() - at - 1;
        let distance = match u16::try_from(distance) {
            Ok(d) => d,
            Err(_) => {
                self.error("Too much code to jump over.");
                0
            }
        };
        self.chunk.patch(at, distance);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit(OP_LOOP);
        let distance = self.chunk.len() - loop_start + 1;
        let distance = match u16::try_from(distance) {
            Ok(d) => d,
            Err(_) => {
                self.error("Loop body too large.");
                0
            }
        };
        self.emit(distance);
    }

    fn identifier_constant(&mut self, name: &str) -> u16 {
        self.make_constant(Value::str(name))
    }

    // ── Scopes and locals ───────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.scope_depth -= 1;
        while self.locals.last().is_some_and(|l| l.depth.is_none_or(|d| d > self.scope_depth)) {
            self.locals.pop();
            self.emit(OP_POP);
        }
    }

    fn declare_local(&mut self, name: Token) {
        let name = self.lexeme(name);
        let duplicate = self
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth.is_none_or(|d| d >= self.scope_depth))
            .any(|l| l.name == name);
        if duplicate {
            self.error("Cannot declare two variables with the same name in the same scope.");
        }
        if self.locals.len() >= LOCALS_MAX {
            self.error("Too many local variables in script.");
            return;
        }
        self.locals.push(Local { name, depth: None });
    }

    fn mark_initialised(&mut self) {
        let depth = self.scope_depth;
        if let Some(local) = self.locals.last_mut() {
            local.depth = Some(depth);
        }
    }

    fn resolve_local(&mut self, name: &str) -> Option<u16> {
        let (slot, initialised) = self
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, l)| l.name == name)
            .map(|(slot, l)| (slot, l.depth.is_some()))?;
        if !initialised {
            self.error("Can't read a local variable in its own initializer.");
        }
        // declare_local caps the table at LOCALS_MAX, so the slot fits.
        u16::try_from(slot).ok()
    }

    // ── Declarations ────────────────────────────────────────────────

    fn declaration(&mut self) {
        if self.matches(TokenKind::Using) {
            self.using_declaration();
        } else {
            self.can_use = false;
            if self.matches(TokenKind::Fun) {
                let return_type = self.parse_type(true, "Expecting return type of function.");
                self.consume(TokenKind::Identifier, "Expecting function name.");
                let name = self.previous;
                self.function_declaration(return_type, name);
            } else if self.matches(TokenKind::Class) {
                self.error("Classes are not supported.");
            } else if let Some(ty) = declared_type(self.current.kind) {
                self.advance();
                self.typed_declaration(ty);
            } else {
                self.statement();
            }
        }

        if self.panic_mode {
            self.synchronize();
        }
    }

    fn using_declaration(&mut self) {
        if !self.can_use {
            self.error("'using' statements can only be placed at the top of the script.");
            return;
        }
        self.consume(TokenKind::Identifier, "Expecting name of library to import.");
        let name = self.lexeme(self.previous);
        let idx = self.identifier_constant(name);
        self.consume(TokenKind::Semi, "Expecting ';' after 'using' statement.");
        self.emit_with(OP_LIBRARY, idx);
    }

    /// After a type keyword: `T name (` is a function, anything else a variable.
    fn typed_declaration(&mut self, ty: ValueType) {
        self.consume(TokenKind::Identifier, "Expecting variable name.");
        let name = self.previous;
        if self.check(TokenKind::LParen) {
            self.function_declaration(ty, name);
        } else if ty == ValueType::Nil {
            self.error_at(name, "'void' is not a valid type in this context.");
        } else {
            self.variable_declaration(ty, name);
        }
    }

    fn parse_type(&mut self, allow_void: bool, message: &str) -> ValueType {
        match declared_type(self.current.kind) {
            Some(ty) => {
                self.advance();
                if ty == ValueType::Nil && !allow_void {
                    self.error("'void' is not a valid type in this context.");
                }
                ty
            }
            None => {
                self.error_at_current(message);
                ValueType::Nil
            }
        }
    }

    fn variable_declaration(&mut self, ty: ValueType, name: Token) {
        let global = if self.scope_depth > 0 {
            self.declare_local(name);
            None
        } else {
            let name = self.lexeme(name);
            Some(self.identifier_constant(name))
        };

        if self.matches(TokenKind::Eq) {
            self.expression();
            self.emit_check(ty);
        } else {
            match ty {
                ValueType::Bool => {
                    self.emit(OP_FALSE);
                }
                _ => self.emit_constant(ty.default_value()),
            }
        }
        self.consume(TokenKind::Semi, "Expecting ';' after variable declaration.");

        match global {
            Some(idx) => self.emit_with(OP_DEF_GLOBAL, idx),
            None => self.mark_initialised(),
        }
    }

    /// The body is compiled inline behind a jump so top-level execution skips
    /// it; the function value is then bound to the body's first instruction.
    fn function_declaration(&mut self, return_type: ValueType, name: Token) {
        if self.scope_depth > 0 {
            self.error_at(name, "Cannot declare functions in a local scope.");
            self.skip_function_body();
            return;
        }
        let name_str = self.lexeme(name);
        let name_idx = self.identifier_constant(name_str);
        let skip = self.emit_jump(OP_JUMP);
        let entry = self.chunk.len();

        let enclosing_conditionals = std::mem::take(&mut self.conditional_depth);
        self.function = Some(FunctionContext { return_type, has_returned: false });
        self.begin_scope();

        self.consume(TokenKind::LParen, "Expecting '(' after function name.");
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let ty = self.parse_type(false, "Expecting type of parameter.");
                self.consume(TokenKind::Identifier, "Expecting name of parameter.");
                self.declare_local(self.previous);
                self.mark_initialised();
                params.push(ty);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expecting ')' after parameter list.");
        self.consume(TokenKind::LBrace, "Expecting '{' before function body.");
        self.block();

        let has_returned = self.function.as_ref().is_some_and(|f| f.has_returned);
        if !has_returned {
            self.emit(OP_DEFAULT);
            self.emit(OP_RETURN);
        }
        // RETURN discards the frame, so the body's locals need no POPs.
        self.scope_depth -= 1;
        self.locals.clear();
        self.function = None;
        self.conditional_depth = enclosing_conditionals;
        self.patch_jump(skip);

        let function = Rc::new(Function::new(name_str, params, return_type));
        if !self.chunk.add_overload(Rc::clone(&function)) {
            self.error_at(name, "Overloaded functions must have differing parameter lists.");
            return;
        }
        let fn_idx = self.chunk.add_constant_raw(Value::Function(function));
        let fn_idx = self.constant_index(fn_idx);
        self.emit_with(OP_CONSTANT, fn_idx);
        let entry_idx = self.make_constant(Value::Number(entry as f64));
        self.emit_with(OP_DEF_FUNCTION, entry_idx);
        self.emit_with(OP_DEF_GLOBAL, name_idx);
    }

    /// Discard a rejected function's parameter list and braced body. Recovery
    /// resumes after the closing brace; a body that never opens is left to
    /// `synchronize`.
    fn skip_function_body(&mut self) {
        while !matches!(self.current.kind, TokenKind::LBrace | TokenKind::Semi | TokenKind::Eof) {
            self.advance();
        }
        if !self.check(TokenKind::LBrace) {
            return;
        }
        let mut depth = 0usize;
        while !self.check(TokenKind::Eof) {
            match self.current.kind {
                TokenKind::LBrace => depth += 1,
                TokenKind::RBrace => depth -= 1,
                _ => {}
            }
            self.advance();
            if depth == 0 {
                self.panic_mode = false;
                return;
            }
        }
    }

    // ── Statements ──────────────────────────────────────────────────

    fn statement(&mut self) {
        if self.matches(TokenKind::Print) {
            self.print_statement();
        } else if self.matches(TokenKind::If) {
            self.if_statement();
        } else if self.matches(TokenKind::Else) {
            self.error("'else' without 'if'.");
        } else if self.matches(TokenKind::Return) {
            self.return_statement();
        } else if self.matches(TokenKind::While) {
            self.while_statement();
        } else if self.matches(TokenKind::For) {
            self.for_statement();
        } else if self.matches(TokenKind::LBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RBrace, "Expecting '}' to end the block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semi, "Expecting ';' after statement.");
        self.emit(OP_PRINT);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semi, "Expecting ';' after statement.");
        self.emit(OP_POP);
    }

    fn conditional_body(&mut self) {
        self.conditional_depth += 1;
        self.statement();
        self.conditional_depth -= 1;
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LParen, "Expecting '(' after 'if'.");
        self.expression();
        self.emit_check(ValueType::Bool);
        self.consume(TokenKind::RParen, "Expecting ')' after condition.");

        let then_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.conditional_body();
        let else_jump = self.emit_jump(OP_JUMP);

        self.patch_jump(then_jump);
        self.emit(OP_POP);
        if self.matches(TokenKind::Else) {
            self.conditional_body();
        }
        self.patch_jump(else_jump);
    }

    fn return_statement(&mut self) {
        let Some(return_type) = self.function.as_ref().map(|f| f.return_type) else {
            if !self.matches(TokenKind::Semi) {
                self.error("Cannot return a value from top-level code.");
                return;
            }
            self.emit(OP_RETURN);
            return;
        };

        if self.matches(TokenKind::Semi) {
            self.emit(OP_DEFAULT);
        } else {
            self.expression();
            self.consume(TokenKind::Semi, "Expecting ';' after return statement.");
            self.emit_check(return_type);
        }
        self.emit(OP_RETURN);

        if self.conditional_depth == 0 {
            if let Some(function) = self.function.as_mut() {
                function.has_returned = true;
            }
        }
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk.len();
        self.consume(TokenKind::LParen, "Expecting '(' after 'while'.");
        self.expression();
        self.emit_check(ValueType::Bool);
        self.consume(TokenKind::RParen, "Expecting ')' after condition.");

        let exit_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.conditional_body();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit(OP_POP);
    }

    /// Layout: init; cond; JIF exit; JUMP body; incr; LOOP cond; body; LOOP incr; exit.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LParen, "Expecting '(' after 'for'.");
        if self.matches(TokenKind::Semi) {
            // no initializer
        } else if let Some(ty) = declared_type(self.current.kind).filter(|t| *t != ValueType::Nil) {
            self.advance();
            self.consume(TokenKind::Identifier, "Expecting variable name.");
            let name = self.previous;
            self.variable_declaration(ty, name);
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk.len();
        let mut exit_jump = None;
        if !self.matches(TokenKind::Semi) {
            self.expression();
            self.consume(TokenKind::Semi, "Expecting ';' after loop condition.");
            self.emit_check(ValueType::Bool);
            exit_jump = Some(self.emit_jump(OP_JUMP_IF_FALSE));
            self.emit(OP_POP);
        }

        if !self.matches(TokenKind::RParen) {
            let body_jump = self.emit_jump(OP_JUMP);
            let increment_start = self.chunk.len();
            self.expression();
            self.emit(OP_POP);
            self.consume(TokenKind::RParen, "Expecting ')' after for loop clauses.");
            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.conditional_body();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit(OP_POP);
        }
        self.end_scope();
    }

    // ── Expressions ─────────────────────────────────────────────────

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let Some(prefix) = rule(self.previous.kind).prefix else {
            self.error("Expecting expression.");
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        self.prefix(prefix, can_assign);

        while precedence <= rule(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule(self.previous.kind).infix {
                self.infix(infix);
            }
        }

        if can_assign && self.matches(TokenKind::Eq) {
            self.error("Invalid assignment target.");
        }
    }

    fn prefix(&mut self, prefix: Prefix, can_assign: bool) {
        match prefix {
            Prefix::Grouping => self.grouping(),
            Prefix::Unary => self.unary(),
            Prefix::Number => self.number(),
            Prefix::String => self.string(),
            Prefix::Literal => self.literal(),
            Prefix::Variable => self.variable(can_assign),
        }
    }

    fn infix(&mut self, infix: Infix) {
        match infix {
            Infix::Binary => self.binary(),
            Infix::Call => self.call(),
            Infix::And => self.and(),
            Infix::Or => self.or(),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RParen, "Expecting ')' after expression.");
    }

    fn unary(&mut self) {
        let op = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Minus => {
                self.emit(OP_NEGATE);
            }
            TokenKind::Bang => {
                self.emit(OP_NOT);
            }
            _ => {}
        }
    }

    fn binary(&mut self) {
        let op = self.previous.kind;
        self.parse_precedence(rule(op).precedence.next());
        let words: &[u16] = match op {
            TokenKind::Plus => &[OP_ADD],
            TokenKind::Minus => &[OP_SUBTRACT],
            TokenKind::Star => &[OP_MULTIPLY],
            TokenKind::Slash => &[OP_DIVIDE],
            TokenKind::Percent => &[OP_MODULO],
            TokenKind::EqEq => &[OP_EQUAL],
            TokenKind::NotEq => &[OP_EQUAL, OP_NOT],
            TokenKind::Less => &[OP_LESS],
            TokenKind::LessEq => &[OP_GREATER, OP_NOT],
            TokenKind::Greater => &[OP_GREATER],
            TokenKind::GreaterEq => &[OP_LESS, OP_NOT],
            _ => &[],
        };
        for word in words {
            self.emit(*word);
        }
    }

    fn and(&mut self) {
        let end_jump = self.emit_jump(OP_JUMP_IF_FALSE);
        self.emit(OP_POP);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or(&mut self) {
        let end_jump = self.emit_jump(OP_JUMP_IF_TRUE);
        self.emit(OP_POP);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn call(&mut self) {
        let mut args: u16 = 0;
        if !self.check(TokenKind::RParen) {
            loop {
                if args == u16::MAX {
                    self.error("Can't have more than 65535 arguments.");
                }
                self.expression();
                args = args.saturating_add(1);
                if !self.matches(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expecting ')' after arguments.");
        self.emit_with(OP_CALL, args);
    }

    fn number(&mut self) {
        match self.lexeme(self.previous).parse::<f64>() {
            Ok(n) => self.emit_constant(Value::Number(n)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self) {
        let lexeme = self.lexeme(self.previous);
        let body = lexeme.get(1..lexeme.len() - 1).unwrap_or("");
        self.emit_constant(Value::str(body));
    }

    fn literal(&mut self) {
        let op = match self.previous.kind {
            TokenKind::False => OP_FALSE,
            TokenKind::True => OP_TRUE,
            _ => OP_NIL,
        };
        self.emit(op);
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.lexeme(self.previous);
        let (get, set, operand) = match self.resolve_local(name) {
            Some(slot) => (OP_GET_LOCAL, OP_SET_LOCAL, slot),
            None => {
                let idx = self.identifier_constant(name);
                (OP_GET_GLOBAL, OP_SET_GLOBAL, idx)
            }
        };
        if can_assign && self.matches(TokenKind::Eq) {
            self.expression();
            self.emit_with(set, operand);
        } else {
            self.emit_with(get, operand);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> Chunk {
        let mut chunk = Chunk::new();
        if let Err(errors) = compile(source, &mut chunk) {
            panic!("unexpected errors: {errors:?}");
        }
        chunk
    }

    fn compile_err(source: &str) -> Vec<String> {
        let mut chunk = Chunk::new();
        compile(source, &mut chunk)
            .expect_err("expected a compile error")
            .iter()
            .map(|e| e.to_string())
            .collect()
    }

    #[test]
    fn straight_line_arithmetic() {
        let chunk = compile_ok("num x = 3 + 4; print x;");
        assert_eq!(
            chunk.code(),
            &[
                OP_CONSTANT, 1,
                OP_CONSTANT, 2,
                OP_ADD,
                OP_CHECK_TYPE, ValueType::Num as u16,
                OP_DEF_GLOBAL, 0,
                OP_GET_GLOBAL, 0,
                OP_PRINT,
                OP_RETURN,
            ]
        );
        assert_eq!(chunk.constant(0), Some(&Value::str("x")));
        assert_eq!(chunk.constant(1), Some(&Value::Number(3.0)));
    }

    #[test]
    fn literals_share_pool_slots() {
        let chunk = compile_ok("print 1; print 1; print 1.0; print \"a\"; print \"a\";");
        assert_eq!(chunk.constants().len(), 2);
    }

    #[test]
    fn uninitialised_declarations_get_defaults() {
        let chunk = compile_ok("num n; bool b; str s;");
        assert_eq!(chunk.code()[0], OP_CONSTANT);
        assert_eq!(chunk.constant(chunk.code()[1] as usize), Some(&Value::Number(0.0)));
        assert!(chunk.code().contains(&OP_FALSE));
        assert!(chunk.constants().contains(&Value::str("")));
    }

    #[test]
    fn derived_comparisons() {
        let chunk = compile_ok("print 1 <= 2;");
        assert_eq!(&chunk.code()[4..6], &[OP_GREATER, OP_NOT]);
        let chunk = compile_ok("print 1 != 2;");
        assert_eq!(&chunk.code()[4..6], &[OP_EQUAL, OP_NOT]);
    }

    #[test]
    fn precedence_climbing() {
        // 1 + 2 * 3 multiplies first
        let chunk = compile_ok("print 1 + 2 * 3;");
        assert_eq!(&chunk.code()[6..8], &[OP_MULTIPLY, OP_ADD]);
    }

    #[test]
    fn block_locals_use_slots() {
        let chunk = compile_ok("{ num a = 1; print a; a = 2; }");
        let code = chunk.code();
        assert!(code.windows(2).any(|w| w == [OP_GET_LOCAL, 0]));
        assert!(code.windows(2).any(|w| w == [OP_SET_LOCAL, 0]));
        assert!(!code.contains(&OP_DEF_GLOBAL));
        // one POP for the assignment statement and one for leaving the block
        assert_eq!(code.iter().filter(|w| **w == OP_POP).count(), 2);
    }

    #[test]
    fn shadowing_in_nested_block() {
        compile_ok("{ num a = 1; { num a = 2; print a; } print a; }");
    }

    #[test]
    fn duplicate_local_in_same_scope() {
        let errors = compile_err("{ num a = 1; num a = 2; }");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("same name in the same scope"));
    }

    #[test]
    fn local_in_own_initializer() {
        let errors = compile_err("{ num a = a; }");
        assert!(errors[0].contains("own initializer"));
    }

    #[test]
    fn function_layout() {
        let chunk = compile_ok("num one() { return 1; }");
        let code = chunk.code();
        assert_eq!(code[0], OP_JUMP);
        let body_end = 2 + code[1] as usize;
        assert_eq!(code[body_end - 1], OP_RETURN);
        assert_eq!(code[body_end], OP_CONSTANT);
        assert_eq!(code[body_end + 2], OP_DEF_FUNCTION);
        let entry = chunk.constant(code[body_end + 3] as usize);
        assert_eq!(entry, Some(&Value::Number(2.0)));
        assert_eq!(code[body_end + 4], OP_DEF_GLOBAL);
        assert_eq!(chunk.overloads("one").len(), 1);
    }

    #[test]
    fn missing_return_synthesises_default() {
        let chunk = compile_ok("num f(bool b) { if (b) { return 1; } }");
        let code = chunk.code();
        let body_end = 2 + code[1] as usize;
        assert_eq!(&code[body_end - 2..body_end], &[OP_DEFAULT, OP_RETURN]);
    }

    #[test]
    fn optional_fun_keyword() {
        let chunk = compile_ok("fun void greet() { print \"hi\"; }");
        assert_eq!(chunk.overloads("greet").len(), 1);
        assert_eq!(chunk.overloads("greet")[0].return_type, ValueType::Nil);
    }

    #[test]
    fn overloads_need_distinct_parameters() {
        compile_ok("num f(num a) { return a; } num f(str s) { return 0; }");
        let errors = compile_err("num f(num a) { return a; } bool f(num b) { return true; }");
        assert!(errors[0].contains("Overloaded functions must have differing parameter lists."));
    }

    #[test]
    fn functions_only_at_top_level() {
        let errors = compile_err("{ num f() { return 1; } }");
        assert!(errors[0].contains("Cannot declare functions in a local scope."));
    }

    #[test]
    fn using_must_come_first() {
        compile_ok("using math; using string; print floor(1.5);");
        let errors = compile_err("print 1; using math;");
        assert!(errors[0].contains("'using' statements"));
    }

    #[test]
    fn void_variables_are_rejected() {
        let errors = compile_err("void x;");
        assert_eq!(errors[0], "[line 1] Error at 'x'. 'void' is not a valid type in this context.");
    }

    #[test]
    fn top_level_return_value_is_rejected() {
        compile_ok("return;");
        let errors = compile_err("return 1;");
        assert!(errors[0].contains("top-level"));
    }

    #[test]
    fn message_formats() {
        assert_eq!(compile_err("print 1"), vec!["[line 1] Error at the end. Expecting ';' after statement."]);
        assert_eq!(compile_err("print ;"), vec!["[line 1] Error at ';'. Expecting expression."]);
        assert_eq!(compile_err("print \"abc"), vec!["[line 1] Error. Unterminated string."]);
        assert_eq!(compile_err("1 = 2;"), vec!["[line 1] Error at '='. Invalid assignment target."]);
    }

    #[test]
    fn recovery_reports_independent_errors() {
        let errors = compile_err("num x = ;\nprint 1;\nstr y = ;\n");
        assert_eq!(errors.len(), 2);
        assert!(errors[0].starts_with("[line 1]"));
        assert!(errors[1].starts_with("[line 3]"));
    }

    #[test]
    fn classes_are_reserved() {
        let errors = compile_err("class Point {}");
        assert!(errors[0].contains("Classes are not supported."));
    }

    #[test]
    fn line_table_round_trips_through_disassembly() {
        let source = "num a = 1;\nnum b = 2;\n\nif (a < b) {\n  print a;\n} else {\n  print b;\n}\n";
        let chunk = compile_ok(source);
        let listing = disassemble(&chunk, "test");
        let mut offset = 0;
        let mut last_line = 0;
        for row in listing.lines().skip(1) {
            let column = line_column(row).expect("row has a line column");
            let line = if column == REPEATED_LINE { last_line } else { column.parse().expect("line number") };
            assert_eq!(line, chunk.line(offset), "row {row}");
            last_line = line;
            offset = disassemble_instruction(&chunk, offset).1;
        }
        assert_eq!(offset, chunk.len());
        assert_eq!(chunk.line(0), 1);
        // The closing RETURN sits on the line of the end of input, after the trailing newline.
        assert_eq!(chunk.code()[chunk.len() - 1], OP_RETURN);
        assert_eq!(chunk.line(chunk.len() - 1), 9);
        assert_eq!(chunk.lines()[..chunk.len() - 1].iter().max(), Some(&8));
    }

    #[test]
    fn local_function_is_skipped_whole() {
        let errors = compile_err("{ num a = 4; num g(num x) { return x; } }");
        assert_eq!(errors, vec!["[line 1] Error at 'g'. Cannot declare functions in a local scope."]);
    }
}
