use logos::Logos;
use serde::Serialize;

/// Byte range of a token in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Span { start, end }
    }
}

impl From<std::ops::Range<usize>> for Span {
    fn from(r: std::ops::Range<usize>) -> Self {
        Span { start: r.start, end: r.end }
    }
}

/// Alias so the `Logos` derive doesn't rewrite `'static` to the source lifetime.
type StaticStr = &'static str;

/// `extras` is the number of newlines consumed so far.
#[derive(Logos, Debug, PartialEq, Clone, Copy)]
#[logos(extras = usize)]
#[logos(skip r"[ \t\r\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum TokenKind {
    #[token("and")]
    And,
    #[token("bool")]
    Bool,
    #[token("class")]
    Class,
    #[token("else")]
    Else,
    #[token("false")]
    False,
    #[token("for")]
    For,
    #[token("fun")]
    Fun,
    #[token("helper")]
    Helper,
    #[token("if")]
    If,
    #[token("nil")]
    Nil,
    #[token("num")]
    Num,
    #[token("or")]
    Or,
    #[token("print")]
    Print,
    #[token("return")]
    Return,
    #[token("str")]
    Str,
    #[token("struct")]
    Struct,
    #[token("super")]
    Super,
    #[token("this")]
    This,
    #[token("true")]
    True,
    #[token("using")]
    Using,
    #[token("void")]
    Void,
    #[token("while")]
    While,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("-")]
    Minus,
    #[token("%")]
    Percent,
    #[token("+")]
    Plus,
    #[token(";")]
    Semi,
    #[token("/")]
    Slash,
    #[token("*")]
    Star,
    #[token("!")]
    Bang,
    #[token("!=")]
    NotEq,
    #[token("=")]
    Eq,
    #[token("==")]
    EqEq,
    #[token("<")]
    Less,
    #[token("<=")]
    LessEq,
    #[token(">")]
    Greater,
    #[token(">=")]
    GreaterEq,

    #[regex(r"[0-9]+(\.[0-9]+)?")]
    Number,
    #[regex(r#""[^"]*""#, count_newlines)]
    String,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Identifier,

    #[regex(r"\n", |lex| {
        lex.extras += 1;
        logos::Skip
    })]
    Newline,

    /// Malformed input. Carries the diagnostic; the compiler decides what to do.
    #[regex(r#""[^"]*"#, unterminated)]
    Error(StaticStr),

    Eof,
}

fn count_newlines(lex: &mut logos::Lexer<TokenKind>) {
    lex.extras += lex.slice().bytes().filter(|b| *b == b'\n').count();
}

fn unterminated(lex: &mut logos::Lexer<TokenKind>) -> &'static str {
    count_newlines(lex);
    "Unterminated string."
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    pub line: usize,
}

impl Token {
    /// A token that points at nothing. Used before the first token is read.
    pub fn synthetic() -> Self {
        Token { kind: TokenKind::Eof, span: Span::default(), line: 1 }
    }

    pub fn lexeme<'s>(&self, source: &'s str) -> &'s str {
        source.get(self.span.start..self.span.end).unwrap_or("")
    }
}

/// On-demand token source. Once the end is reached every call yields `Eof`.
pub struct Scanner<'s> {
    lexer: logos::Lexer<'s, TokenKind>,
    finished: bool,
}

impl<'s> Scanner<'s> {
    pub fn new(source: &'s str) -> Self {
        Scanner { lexer: TokenKind::lexer(source), finished: false }
    }

    pub fn next_token(&mut self) -> Token {
        let end = self.lexer.source().len();
        if self.finished {
            return Token { kind: TokenKind::Eof, span: Span::new(end, end), line: self.line() };
        }
        match self.lexer.next() {
            Some(Ok(kind)) => self.token(kind),
            Some(Err(())) => self.token(TokenKind::Error("Unexpected character.")),
            None => {
                self.finished = true;
                Token { kind: TokenKind::Eof, span: Span::new(end, end), line: self.line() }
            }
        }
    }

    fn token(&self, kind: TokenKind) -> Token {
        Token { kind, span: self.lexer.span().into(), line: self.line() }
    }

    fn line(&self) -> usize {
        self.lexer.extras + 1
    }
}

/// Lex everything up to and including `Eof`.
pub fn lex(source: &str) -> Vec<Token> {
    let mut scanner = Scanner::new(source);
    let mut tokens = Vec::new();
    loop {
        let token = scanner.next_token();
        tokens.push(token);
        if token.kind == TokenKind::Eof {
            return tokens;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lex_variable_declaration() {
        assert_eq!(
            kinds("num x = 3 + 4;"),
            vec![
                TokenKind::Num,
                TokenKind::Identifier,
                TokenKind::Eq,
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Semi,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn keywords_need_whole_words() {
        assert_eq!(kinds("structure"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("st"), vec![TokenKind::Identifier, TokenKind::Eof]);
        assert_eq!(kinds("str struct"), vec![TokenKind::Str, TokenKind::Struct, TokenKind::Eof]);
        assert_eq!(kinds("fun_"), vec![TokenKind::Identifier, TokenKind::Eof]);
    }

    #[test]
    fn two_character_operators() {
        assert_eq!(
            kinds("!= ! == = <= < >= >"),
            vec![
                TokenKind::NotEq,
                TokenKind::Bang,
                TokenKind::EqEq,
                TokenKind::Eq,
                TokenKind::LessEq,
                TokenKind::Less,
                TokenKind::GreaterEq,
                TokenKind::Greater,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn comments_and_lines() {
        let tokens = lex("// header\nprint 1;\n\nprint 2;");
        assert_eq!(tokens[0].kind, TokenKind::Print);
        assert_eq!(tokens[0].line, 2);
        assert_eq!(tokens[3].kind, TokenKind::Print);
        assert_eq!(tokens[3].line, 4);
    }

    #[test]
    fn string_spans_lines() {
        let source = "\"a\nb\" x";
        let tokens = lex(source);
        assert_eq!(tokens[0].kind, TokenKind::String);
        assert_eq!(tokens[0].lexeme(source), "\"a\nb\"");
        assert_eq!(tokens[1].line, 2);
    }

    #[test]
    fn number_then_dot() {
        let source = "1.5 2.";
        let tokens = lex(source);
        assert_eq!(tokens[0].lexeme(source), "1.5");
        assert_eq!(tokens[1].lexeme(source), "2");
        assert_eq!(tokens[2].kind, TokenKind::Dot);
    }

    #[test]
    fn errors_are_tokens() {
        assert_eq!(kinds("\"open"), vec![TokenKind::Error("Unterminated string."), TokenKind::Eof]);
        assert_eq!(
            kinds("@ x"),
            vec![TokenKind::Error("Unexpected character."), TokenKind::Identifier, TokenKind::Eof]
        );
    }

    #[test]
    fn eof_repeats() {
        let mut scanner = Scanner::new("x");
        assert_eq!(scanner.next_token().kind, TokenKind::Identifier);
        for _ in 0..3 {
            assert_eq!(scanner.next_token().kind, TokenKind::Eof);
        }
    }
}
