use super::{Diagnostic, Phase, SourceMap};

pub struct AnsiRenderer {
    pub use_color: bool,
}

impl AnsiRenderer {
    fn bold(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1m{s}\x1b[0m") } else { s.to_string() }
    }

    fn bold_red(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[1;31m{s}\x1b[0m") } else { s.to_string() }
    }

    fn cyan(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[36m{s}\x1b[0m") } else { s.to_string() }
    }

    fn dim(&self, s: &str) -> String {
        if self.use_color { format!("\x1b[2m{s}\x1b[0m") } else { s.to_string() }
    }

    pub fn render(&self, d: &Diagnostic) -> String {
        let mut out = String::new();

        let heading = match d.phase {
            Phase::Compile => "error",
            Phase::Runtime => "runtime error",
        };
        out.push_str(&format!("{}: {}\n", self.bold_red(heading), self.bold(&d.message)));

        match (&d.label, &d.source) {
            (Some(label), Some(source)) => {
                let map = SourceMap::new(source);
                let (line, col) = map.lookup(label.span.start);
                let line_text = map.line_text(source, line);

                out.push_str(&format!("  {} line {}:{}\n", self.cyan("-->"), line, col));

                let gutter = line.to_string().len();
                let pipe = self.cyan("|");
                let pad = " ".repeat(gutter);
                out.push_str(&format!("{pad} {pipe}\n"));
                let line_num = self.cyan(&format!("{line:>gutter$}"));
                out.push_str(&format!("{line_num} {pipe} {line_text}\n"));

                // Carets stop at the end of the line.
                let room = line_text.len().saturating_sub(col - 1).max(1);
                let span_len = label.span.end.saturating_sub(label.span.start).clamp(1, room);
                let carets = self.bold_red(&"^".repeat(span_len));
                let indent = " ".repeat(col - 1);
                if label.message.is_empty() {
                    out.push_str(&format!("{pad} {pipe} {indent}{carets}\n"));
                } else {
                    out.push_str(&format!("{pad} {pipe} {indent}{carets} {}\n", self.bold_red(&label.message)));
                }
                out.push_str(&format!("{pad} {pipe}\n"));
            }
            _ => {
                if let Some(line) = d.line {
                    out.push_str(&format!("  {} line {}\n", self.cyan("-->"), line));
                }
            }
        }

        for note in &d.notes {
            out.push_str(&format!("  {} {}\n", self.dim("="), note));
        }

        out
    }
}
