use std::fmt::Write;

use super::*;
use crate::value::ValueType;

/// Render the whole chunk, one instruction per line, under a `=== name ===` header.
pub fn disassemble(chunk: &Chunk, name: &str) -> String {
    let mut out = format!("=== {name} ===\n");
    let mut offset = 0;
    while offset < chunk.len() {
        let (line, next) = disassemble_instruction(chunk, offset);
        out.push_str(&line);
        out.push('\n');
        offset = next;
    }
    out
}

/// Marker in the line column for an instruction on the previous one's line.
pub const REPEATED_LINE: &str = "|";

/// The line column of a listing row: a line number or [`REPEATED_LINE`].
pub fn line_column(row: &str) -> Option<&str> {
    row.split_whitespace().nth(1)
}

/// Render the instruction at `offset`. Returns the text and the next offset.
///
/// Layout: `OFFSET LINE MNEMONIC OPERAND`, where LINE is `|` when it repeats the
/// previous instruction's line.
pub fn disassemble_instruction(chunk: &Chunk, offset: usize) -> (String, usize) {
    let mut out = format!("{offset:04}  ");
    if offset > 0 && chunk.line(offset) == chunk.line(offset - 1) {
        let _ = write!(out, "{REPEATED_LINE:>4}  ");
    } else {
        let _ = write!(out, "{:>4}  ", chunk.line(offset));
    }

    let op = chunk.word(offset).unwrap_or(u16::MAX);
    let Some(name) = op_name(op) else {
        let _ = write!(out, "UNKNOWN {op}");
        return (out, offset + 1);
    };
    if operand_count(op) == 0 {
        out.push_str(name);
        return (out, offset + 1);
    }

    let operand = chunk.word(offset + 1).unwrap_or(0);
    match op {
        OP_CONSTANT | OP_DEF_GLOBAL | OP_GET_GLOBAL | OP_SET_GLOBAL | OP_DEF_FUNCTION
        | OP_LIBRARY => {
            let value = chunk
                .constant(operand as usize)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "???".to_string());
            let _ = write!(out, "{name:<16} {operand:>4}   '{value}'");
        }
        OP_CHECK_TYPE => {
            let ty = ValueType::from_word(operand).map(ValueType::name).unwrap_or("???");
            let _ = write!(out, "{name:<16} {ty:>4}");
        }
        OP_JUMP | OP_JUMP_IF_TRUE | OP_JUMP_IF_FALSE => {
            let target = offset + 2 + operand as usize;
            let _ = write!(out, "{name:<16} {operand:>4} -> {target:04}");
        }
        OP_LOOP => {
            let target = (offset + 2).saturating_sub(operand as usize);
            let _ = write!(out, "{name:<16} {operand:>4} -> {target:04}");
        }
        _ => {
            let _ = write!(out, "{name:<16} {operand:>4}");
        }
    }
    (out, offset + 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn sample() -> Chunk {
        let mut chunk = Chunk::new();
        let k = chunk.add_constant(Value::Number(1.5)) as u16;
        chunk.write(OP_CONSTANT, 1);
        chunk.write(k, 1);
        chunk.write(OP_JUMP_IF_FALSE, 2);
        chunk.write(1, 2);
        chunk.write(OP_PRINT, 2);
        chunk.write(OP_RETURN, 3);
        chunk
    }

    #[test]
    fn constant_shows_value() {
        let (line, next) = disassemble_instruction(&sample(), 0);
        assert_eq!(next, 2);
        assert!(line.contains("CONSTANT"));
        assert!(line.contains("'1.5'"));
        assert!(line.starts_with("0000     1  "));
    }

    #[test]
    fn repeated_line_is_elided() {
        let (line, _) = disassemble_instruction(&sample(), 4);
        assert!(line.contains("   |  PRINT"), "got {line}");
        assert_eq!(line_column(&line), Some(REPEATED_LINE));
        let (first, _) = disassemble_instruction(&sample(), 0);
        assert_eq!(line_column(&first), Some("1"));
    }

    #[test]
    fn jumps_show_target() {
        let (line, next) = disassemble_instruction(&sample(), 2);
        assert_eq!(next, 4);
        assert!(line.ends_with("-> 0005"), "got {line}");
    }

    #[test]
    fn listing_covers_every_instruction() {
        let text = disassemble(&sample(), "test");
        assert!(text.starts_with("=== test ==="));
        assert_eq!(text.lines().count(), 1 + 4);
    }

    #[test]
    fn unknown_word_is_reported() {
        let mut chunk = Chunk::new();
        chunk.write(999, 1);
        let (line, next) = disassemble_instruction(&chunk, 0);
        assert!(line.contains("UNKNOWN 999"));
        assert_eq!(next, 1);
    }
}
