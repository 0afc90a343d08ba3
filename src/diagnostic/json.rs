use super::{Diagnostic, SourceMap};

/// Render as a single-line JSON object.
pub fn render(d: &Diagnostic) -> String {
    let mut obj = serde_json::json!({
        "phase": d.phase,
        "message": d.message,
        "notes": d.notes,
    });

    if let Some(line) = d.line {
        obj["line"] = serde_json::Value::from(line);
    }

    if let Some(label) = &d.label {
        let mut span = serde_json::json!({
            "start": label.span.start,
            "end": label.span.end,
            "label": label.message,
        });
        if let Some(source) = &d.source {
            let (_, col) = SourceMap::new(source).lookup(label.span.start);
            span["col"] = serde_json::Value::from(col);
        }
        obj["span"] = span;
    }

    serde_json::to_string(&obj)
        .unwrap_or_else(|_| r#"{"phase":"runtime","message":"internal error serializing diagnostic"}"#.to_string())
}

#[cfg(test)]
mod tests {
    use super::super::Phase;
    use super::*;
    use crate::lexer::Span;

    fn parse_json(s: &str) -> serde_json::Value {
        serde_json::from_str(s).expect("valid JSON")
    }

    #[test]
    fn render_runtime_error() {
        let d = Diagnostic::new(Phase::Runtime, "Stack overflow.").with_line(4).with_note("[line 4] in script");
        let v = parse_json(&render(&d));
        assert_eq!(v["phase"], "runtime");
        assert_eq!(v["message"], "Stack overflow.");
        assert_eq!(v["line"], 4);
        assert_eq!(v["notes"][0], "[line 4] in script");
        assert!(v.get("span").is_none());
    }

    #[test]
    fn render_span_with_column() {
        let d = Diagnostic::new(Phase::Compile, "Expecting ';' after value.")
            .with_line(2)
            .with_span(Span::new(17, 18), "at '}'")
            .with_source("print 1;\nprint 2 }");
        let v = parse_json(&render(&d));
        assert_eq!(v["phase"], "compile");
        assert_eq!(v["span"]["start"], 17);
        assert_eq!(v["span"]["label"], "at '}'");
        assert_eq!(v["span"]["col"], 9);
    }

    #[test]
    fn span_without_source_has_no_column() {
        let d = Diagnostic::new(Phase::Compile, "bad").with_span(Span::new(0, 1), "");
        let v = parse_json(&render(&d));
        assert!(v["span"].get("col").is_none());
        assert!(v.get("line").is_none());
    }

    #[test]
    fn output_is_one_line() {
        let d = Diagnostic::new(Phase::Runtime, "a").with_note("b").with_note("c");
        assert!(!render(&d).contains('\n'));
    }
}
