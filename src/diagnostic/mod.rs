//! Structured diagnostics for tooling output.
//!
//! The plain `[line N] Error...` text comes straight from the error types'
//! `Display`. `Diagnostic` is the richer form behind `--json` and `--pretty`.

pub mod ansi;
pub mod json;
mod source_map;

pub use source_map::SourceMap;

use serde::Serialize;

use crate::compiler::{CompileError, Location};
use crate::lexer::Span;
use crate::value::NativeError;
use crate::vm::{InterpretError, RuntimeError};

/// Which stage rejected the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Compile,
    Runtime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Label {
    pub span: Span,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub phase: Phase,
    pub message: String,
    pub line: Option<usize>,
    pub label: Option<Label>,
    pub notes: Vec<String>,
    pub source: Option<String>,
}

impl Diagnostic {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Diagnostic { phase, message: message.into(), line: None, label: None, notes: Vec::new(), source: None }
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }

    pub fn with_span(mut self, span: Span, label: impl Into<String>) -> Self {
        self.label = Some(Label { span, message: label.into() });
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl From<&CompileError> for Diagnostic {
    fn from(e: &CompileError) -> Self {
        let label = match &e.location {
            Location::At(lexeme) => format!("at '{lexeme}'"),
            Location::End => "at the end of the script".to_string(),
            Location::Unknown => String::new(),
        };
        Diagnostic::new(Phase::Compile, &e.message).with_line(e.line).with_span(e.span, label)
    }
}

impl From<&RuntimeError> for Diagnostic {
    fn from(e: &RuntimeError) -> Self {
        let mut d = Diagnostic::new(Phase::Runtime, &e.message);
        if let Some(innermost) = e.trace.first() {
            d = d.with_line(innermost.line);
        }
        e.trace.iter().fold(d, |d, frame| d.with_note(frame.to_string()))
    }
}

impl From<&NativeError> for Diagnostic {
    fn from(e: &NativeError) -> Self {
        Diagnostic::new(Phase::Runtime, e.to_string())
    }
}

/// One diagnostic per compile error; one for any other failure.
pub fn from_interpret_error(e: &InterpretError) -> Vec<Diagnostic> {
    match e {
        InterpretError::Compile(errors) => errors.iter().map(Diagnostic::from).collect(),
        InterpretError::Runtime(e) => vec![Diagnostic::from(e)],
        InterpretError::Native(e) => vec![Diagnostic::from(e)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::TraceLine;

    #[test]
    fn builder() {
        let d = Diagnostic::new(Phase::Compile, "bad")
            .with_line(3)
            .with_span(Span::new(5, 8), "here")
            .with_note("first");
        assert_eq!(d.line, Some(3));
        assert_eq!(d.label, Some(Label { span: Span::new(5, 8), message: "here".into() }));
        assert_eq!(d.notes, vec!["first"]);
        assert!(d.source.is_none());
    }

    #[test]
    fn from_compile_error() {
        let e = CompileError {
            line: 2,
            location: Location::At("+".into()),
            message: "Expecting expression.".into(),
            span: Span::new(10, 11),
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.phase, Phase::Compile);
        assert_eq!(d.message, "Expecting expression.");
        assert_eq!(d.line, Some(2));
        assert_eq!(d.label.map(|l| l.message), Some("at '+'".to_string()));
    }

    #[test]
    fn from_runtime_error_keeps_the_backtrace() {
        let e = RuntimeError {
            message: "Undefined variable 'x'.".into(),
            trace: vec![
                TraceLine { line: 2, function: Some("f".into()) },
                TraceLine { line: 5, function: None },
            ],
        };
        let d = Diagnostic::from(&e);
        assert_eq!(d.phase, Phase::Runtime);
        assert_eq!(d.line, Some(2));
        assert_eq!(d.notes, vec!["[line 2] in f()", "[line 5] in script"]);
        assert!(d.label.is_none());
    }

    #[test]
    fn every_compile_error_becomes_a_diagnostic() {
        let err = crate::interpret("print ;\nprint ;").unwrap_err();
        let diagnostics = from_interpret_error(&err);
        assert_eq!(diagnostics.len(), 2);
        assert_eq!(diagnostics[1].line, Some(2));
    }
}
