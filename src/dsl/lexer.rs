use super::ast::Span;
use super::error::DslError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    Int(i64),
    Float(f64),
    Str(String),
    True,
    False,
    NoneKw,

    // Identifiers & keywords
    Ident(String),
    And,
    Or,
    Not,

    // Punctuation
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Semicolon,

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,     // **
    Slash,
    DoubleSlash,  // //
    Percent,
    Lt,
    Gt,
    Le,           // <=
    Ge,           // >=
    EqEq,         // ==
    Ne,           // !=
    Eq,           // =

    // Special
    Newline,
    Eof,
}

#[derive(Debug, Clone)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

pub fn lex(source: &str) -> Result<Vec<SpannedToken>, Vec<DslError>> {
    let mut lexer = Lexer::new(source);
    lexer.tokenize()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    /// Open (, [ and { count. Newlines inside brackets are not statement ends.
    depth: usize,
    tokens: Vec<SpannedToken>,
    errors: Vec<DslError>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            depth: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn tokenize(&mut self) -> Result<Vec<SpannedToken>, Vec<DslError>> {
        while self.pos < self.bytes.len() {
            self.skip_whitespace_and_comments();
            if self.pos >= self.bytes.len() {
                break;
            }

            let start = self.pos;
            let ch = self.bytes[self.pos];

            match ch {
                b'\n' | b'\r' => {
                    // Collapse multiple newlines
                    while self.pos < self.bytes.len()
                        && (self.bytes[self.pos] == b'\n' || self.bytes[self.pos] == b'\r')
                    {
                        self.pos += 1;
                    }
                    if self.depth == 0 {
                        if let Some(last) = self.tokens.last() {
                            if !Self::continues_expression(&last.token) {
                                self.push(Token::Newline, start, self.pos);
                            }
                        }
                    }
                }
                b'(' => { self.open(); self.push(Token::LParen, start, self.pos); }
                b'[' => { self.open(); self.push(Token::LBracket, start, self.pos); }
                b'{' => { self.open(); self.push(Token::LBrace, start, self.pos); }
                b')' => { self.close(); self.push(Token::RParen, start, self.pos); }
                b']' => { self.close(); self.push(Token::RBracket, start, self.pos); }
                b'}' => { self.close(); self.push(Token::RBrace, start, self.pos); }
                b',' => { self.pos += 1; self.push(Token::Comma, start, self.pos); }
                b':' => { self.pos += 1; self.push(Token::Colon, start, self.pos); }
                b';' => { self.pos += 1; self.push(Token::Semicolon, start, self.pos); }
                b'+' => { self.pos += 1; self.push(Token::Plus, start, self.pos); }
                b'-' => { self.pos += 1; self.push(Token::Minus, start, self.pos); }
                b'%' => { self.pos += 1; self.push(Token::Percent, start, self.pos); }
                b'.' => {
                    if self.bytes.get(self.pos + 1).is_some_and(u8::is_ascii_digit) {
                        self.lex_number(start);
                    } else {
                        self.pos += 1;
                        self.push(Token::Dot, start, self.pos);
                    }
                }
                b'*' => {
                    self.pos += 1;
                    if self.peek() == Some(b'*') {
                        self.pos += 1;
                        self.push(Token::StarStar, start, self.pos);
                    } else {
                        self.push(Token::Star, start, self.pos);
                    }
                }
                b'/' => {
                    self.pos += 1;
                    if self.peek() == Some(b'/') {
                        self.pos += 1;
                        self.push(Token::DoubleSlash, start, self.pos);
                    } else {
                        self.push(Token::Slash, start, self.pos);
                    }
                }
                b'<' => {
                    self.pos += 1;
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        self.push(Token::Le, start, self.pos);
                    } else {
                        self.push(Token::Lt, start, self.pos);
                    }
                }
                b'>' => {
                    self.pos += 1;
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        self.push(Token::Ge, start, self.pos);
                    } else {
                        self.push(Token::Gt, start, self.pos);
                    }
                }
                b'=' => {
                    self.pos += 1;
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        self.push(Token::EqEq, start, self.pos);
                    } else {
                        self.push(Token::Eq, start, self.pos);
                    }
                }
                b'!' => {
                    self.pos += 1;
                    if self.peek() == Some(b'=') {
                        self.pos += 1;
                        self.push(Token::Ne, start, self.pos);
                    } else {
                        self.errors.push(DslError::lexer(
                            "Expected '!=', use 'not' for negation",
                            Span::new(start, self.pos),
                        ));
                    }
                }
                b'"' | b'\'' => {
                    self.lex_string(start, ch);
                }
                b'0'..=b'9' => {
                    self.lex_number(start);
                }
                b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                    self.lex_ident(start);
                }
                _ => {
                    let c = self.source[self.pos..].chars().next().unwrap_or('\u{fffd}');
                    self.pos += c.len_utf8().max(1);
                    self.errors.push(DslError::lexer(
                        format!("Unexpected character: '{c}'"),
                        Span::new(start, self.pos),
                    ));
                }
            }
        }

        // Remove trailing newline
        if let Some(last) = self.tokens.last() {
            if matches!(last.token, Token::Newline) {
                self.tokens.pop();
            }
        }

        self.tokens.push(SpannedToken {
            token: Token::Eof,
            span: Span::new(self.pos, self.pos),
        });

        if self.errors.is_empty() {
            Ok(std::mem::take(&mut self.tokens))
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn open(&mut self) {
        self.pos += 1;
        self.depth += 1;
    }

    fn close(&mut self) {
        self.pos += 1;
        self.depth = self.depth.saturating_sub(1);
    }

    fn push(&mut self, token: Token, start: usize, end: usize) {
        self.tokens.push(SpannedToken {
            token,
            span: Span::new(start, end),
        });
    }

    /// Returns true if a newline after this token should be suppressed,
    /// because the token cannot end a statement.
    fn continues_expression(token: &Token) -> bool {
        matches!(
            token,
            Token::Plus
                | Token::Minus
                | Token::Star
                | Token::StarStar
                | Token::Slash
                | Token::DoubleSlash
                | Token::Percent
                | Token::Lt
                | Token::Gt
                | Token::Le
                | Token::Ge
                | Token::EqEq
                | Token::Ne
                | Token::And
                | Token::Or
                | Token::Not
                | Token::Eq
                | Token::Comma
                | Token::Dot
                | Token::Semicolon
                | Token::Newline
        )
    }

    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\x0c' => self.pos += 1,
                b'#' => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                // Explicit line continuation
                b'\\' if matches!(self.bytes.get(self.pos + 1), Some(b'\n' | b'\r')) => {
                    self.pos += 1;
                    while self.pos < self.bytes.len()
                        && (self.bytes[self.pos] == b'\n' || self.bytes[self.pos] == b'\r')
                    {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
    }

    fn lex_string(&mut self, start: usize, quote: u8) {
        let triple = self.bytes.get(self.pos + 1) == Some(&quote)
            && self.bytes.get(self.pos + 2) == Some(&quote);
        self.pos += if triple { 3 } else { 1 };

        let source = self.source;
        let body = self.pos;
        let mut out = String::new();
        let mut chars = source[body..].char_indices();
        let mut closed = false;
        let mut consumed = 0;

        while let Some((i, c)) = chars.next() {
            consumed = i + c.len_utf8();
            if c == quote as char {
                if !triple {
                    closed = true;
                    break;
                }
                let rest = &source[body + consumed..];
                let q = quote as char;
                if rest.starts_with(q) && rest[q.len_utf8()..].starts_with(q) {
                    chars.next();
                    chars.next();
                    consumed += 2;
                    closed = true;
                    break;
                }
                out.push(c);
                continue;
            }
            if c == '\n' && !triple {
                consumed = i;
                break;
            }
            if c != '\\' {
                out.push(c);
                continue;
            }
            let Some((j, esc)) = chars.next() else { break };
            consumed = j + esc.len_utf8();
            match esc {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' => out.push('\\'),
                '\'' => out.push('\''),
                '"' => out.push('"'),
                '\n' => {}
                'x' | 'u' => {
                    let width = if esc == 'x' { 2 } else { 4 };
                    let digits: String = (0..width).filter_map(|_| chars.next()).map(|(_, d)| d).collect();
                    consumed += digits.len();
                    match u32::from_str_radix(&digits, 16).ok().and_then(char::from_u32) {
                        Some(decoded) if digits.len() == width => out.push(decoded),
                        _ => self.errors.push(DslError::lexer(
                            format!("Invalid \\{esc} escape"),
                            Span::new(body + i, body + consumed),
                        )),
                    }
                }
                other => {
                    out.push('\\');
                    out.push(other);
                }
            }
        }

        self.pos += consumed;
        if !closed {
            self.errors.push(DslError::lexer(
                "Unterminated string literal",
                Span::new(start, self.pos),
            ));
        }
        self.push(Token::Str(out), start, self.pos);
    }

    fn lex_number(&mut self, start: usize) {
        let digits = |lexer: &mut Self| {
            while lexer.pos < lexer.bytes.len()
                && (lexer.bytes[lexer.pos].is_ascii_digit() || lexer.bytes[lexer.pos] == b'_')
            {
                lexer.pos += 1;
            }
        };
        digits(self);
        let mut is_float = false;
        if self.peek() == Some(b'.') {
            is_float = true;
            self.pos += 1;
            digits(self);
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            let save = self.pos;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if self.peek().is_some_and(|b| b.is_ascii_digit()) {
                is_float = true;
                digits(self);
            } else {
                self.pos = save;
            }
        }

        let text: String = self.source[start..self.pos].chars().filter(|c| *c != '_').collect();
        if is_float {
            match text.parse::<f64>() {
                Ok(v) => self.push(Token::Float(v), start, self.pos),
                Err(_) => self.errors.push(DslError::lexer(
                    format!("Invalid float: {text}"),
                    Span::new(start, self.pos),
                )),
            }
        } else {
            match text.parse::<i64>() {
                Ok(v) => self.push(Token::Int(v), start, self.pos),
                Err(_) => {
                    // Too large for an integer; keep it as a float
                    match text.parse::<f64>() {
                        Ok(v) => self.push(Token::Float(v), start, self.pos),
                        Err(_) => self.errors.push(DslError::lexer(
                            format!("Invalid number: {text}"),
                            Span::new(start, self.pos),
                        )),
                    }
                }
            }
        }
    }

    fn lex_ident(&mut self, start: usize) {
        while self.pos < self.bytes.len()
            && (self.bytes[self.pos].is_ascii_alphanumeric() || self.bytes[self.pos] == b'_')
        {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];
        let token = match word {
            "True" => Token::True,
            "False" => Token::False,
            "None" => Token::NoneKw,
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => Token::Ident(word.to_string()),
        };
        self.push(token, start, self.pos);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn tok(s: &str) -> Vec<Token> {
        lex(s).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn simple_assignment() {
        let tokens = tok("x = Add(A=1, B=2.5)");
        assert_eq!(tokens, vec![
            Token::Ident("x".into()), Token::Eq, Token::Ident("Add".into()), Token::LParen,
            Token::Ident("A".into()), Token::Eq, Token::Int(1), Token::Comma,
            Token::Ident("B".into()), Token::Eq, Token::Float(2.5), Token::RParen,
            Token::Eof,
        ]);
    }

    #[test]
    fn keywords_and_literals() {
        let tokens = tok("True False None and or not");
        assert_eq!(tokens, vec![
            Token::True, Token::False, Token::NoneKw, Token::And, Token::Or, Token::Not, Token::Eof,
        ]);
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = tok("a = 1  # the answer\nb = 2");
        assert_eq!(tokens, vec![
            Token::Ident("a".into()), Token::Eq, Token::Int(1), Token::Newline,
            Token::Ident("b".into()), Token::Eq, Token::Int(2), Token::Eof,
        ]);
    }

    #[test]
    fn no_newline_inside_brackets() {
        let tokens = tok("f(\n  A=1,\n  B=[1,\n 2]\n)");
        assert!(!tokens.contains(&Token::Newline));
    }

    #[test]
    fn semicolons_separate_statements() {
        let tokens = tok("a=1; b=2");
        assert_eq!(tokens[3], Token::Semicolon);
    }

    #[test]
    fn both_quote_styles_and_escapes() {
        let tokens = tok(r#"'it\'s' "a\tb" "é""#);
        assert_eq!(tokens, vec![
            Token::Str("it's".into()), Token::Str("a\tb".into()), Token::Str("é".into()), Token::Eof,
        ]);
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        let tokens = tok("\"\"\"doc\nstring\"\"\"\nx = 1");
        assert_eq!(tokens[0], Token::Str("doc\nstring".into()));
        assert_eq!(tokens[1], Token::Newline);
    }

    #[test]
    fn unicode_inside_strings() {
        let tokens = tok("name = \"温度\"");
        assert_eq!(tokens[2], Token::Str("温度".into()));
    }

    #[test]
    fn numbers() {
        assert_eq!(tok("1_000 .5 1e3 2.")[..4], [
            Token::Int(1000), Token::Float(0.5), Token::Float(1000.0), Token::Float(2.0),
        ]);
    }

    #[test]
    fn power_and_floor_division() {
        let tokens = tok("a ** b // c");
        assert_eq!(tokens, vec![
            Token::Ident("a".into()), Token::StarStar, Token::Ident("b".into()),
            Token::DoubleSlash, Token::Ident("c".into()), Token::Eof,
        ]);
    }

    #[test]
    fn comparison_tokens() {
        let tokens = tok("a <= b != c == d");
        assert_eq!(tokens, vec![
            Token::Ident("a".into()), Token::Le, Token::Ident("b".into()), Token::Ne,
            Token::Ident("c".into()), Token::EqEq, Token::Ident("d".into()), Token::Eof,
        ]);
    }

    #[test]
    fn backslash_continuation() {
        let tokens = tok("a = 1 \\\n + 2");
        assert!(!tokens.contains(&Token::Newline));
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let errs = lex("x = \"abc\ny = 1").unwrap_err();
        assert_eq!(errs[0].message, "Unterminated string literal");
    }

    #[test]
    fn stray_character_is_an_error() {
        let errs = lex("x = 1 $ 2").unwrap_err();
        assert!(errs[0].message.contains('$'));
    }
}
