use super::ast::*;
use super::error::DslError;
use super::lexer::{SpannedToken, Token};

/// Python statements the DSL deliberately does not support.
const UNSUPPORTED_STATEMENTS: &[&str] = &[
    "if", "elif", "else", "for", "while", "def", "class", "return", "import", "from", "with",
    "try", "except", "finally", "lambda", "global", "nonlocal", "del", "pass", "break",
    "continue", "raise", "assert", "yield", "async", "await",
];

pub fn parse(tokens: Vec<SpannedToken>) -> Result<Program, Vec<DslError>> {
    let mut parser = Parser::new(tokens);
    parser.parse_program()
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    errors: Vec<DslError>,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>) -> Self {
        Self {
            tokens,
            pos: 0,
            errors: Vec::new(),
        }
    }

    fn parse_program(&mut self) -> Result<Program, Vec<DslError>> {
        let mut body = Vec::new();

        self.skip_terminators();

        while !self.at_eof() {
            match self.parse_stmt() {
                Ok(s) => body.push(s),
                Err(e) => {
                    self.errors.push(e);
                    self.recover_to_terminator();
                }
            }
            self.skip_terminators();
        }

        if self.errors.is_empty() {
            Ok(Program { body })
        } else {
            Err(std::mem::take(&mut self.errors))
        }
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).map_or(&Token::Eof, |t| &t.token)
    }

    fn span(&self) -> Span {
        self.tokens.get(self.pos).map_or(
            Span::new(0, 0),
            |t| t.span,
        )
    }

    fn prev_span(&self) -> Span {
        self.pos
            .checked_sub(1)
            .and_then(|p| self.tokens.get(p))
            .map_or(Span::new(0, 0), |t| t.span)
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    fn lookahead_is_eq(&self) -> bool {
        self.tokens.get(self.pos + 1).is_some_and(|t| matches!(t.token, Token::Eq))
    }

    fn advance(&mut self) -> &SpannedToken {
        let tok = &self.tokens[self.pos];
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, expected: &Token) -> Result<Span, DslError> {
        if self.peek() == expected {
            let sp = self.span();
            self.advance();
            Ok(sp)
        } else {
            Err(DslError::parser(
                format!("Expected {expected:?}, got {:?}", self.peek()),
                self.span(),
            ))
        }
    }

    fn expect_ident(&mut self) -> Result<(String, Span), DslError> {
        if let Token::Ident(name) = self.peek().clone() {
            let sp = self.span();
            self.advance();
            Ok((name, sp))
        } else {
            Err(DslError::parser(
                format!("Expected identifier, got {:?}", self.peek()),
                self.span(),
            ))
        }
    }

    fn skip_terminators(&mut self) {
        while matches!(self.peek(), Token::Semicolon | Token::Newline) {
            self.advance();
        }
    }

    fn expect_terminator(&mut self) -> Result<(), DslError> {
        if matches!(self.peek(), Token::Semicolon | Token::Newline | Token::Eof) {
            Ok(())
        } else {
            Err(DslError::parser(
                format!("Expected end of statement, got {:?}", self.peek()),
                self.span(),
            ))
        }
    }

    fn recover_to_terminator(&mut self) {
        while !matches!(self.peek(), Token::Semicolon | Token::Newline | Token::Eof) {
            self.advance();
        }
    }

    // ── Statements ────────────────────────────────────────────────

    fn parse_stmt(&mut self) -> Result<Stmt, DslError> {
        if let Token::Ident(word) = self.peek() {
            if UNSUPPORTED_STATEMENTS.contains(&word.as_str()) && !self.lookahead_is_eq() {
                return Err(DslError::parser(
                    format!("'{word}' statements are not supported; only assignments and calls are"),
                    self.span(),
                ));
            }
        }

        let expr = self.parse_expr()?;
        if !matches!(self.peek(), Token::Eq) {
            self.expect_terminator()?;
            return Ok(Stmt::Expr(expr));
        }

        let target = match &expr.kind {
            ExprKind::Name(name) => name.clone(),
            _ => {
                return Err(DslError::parser(
                    "Only a plain name can be assigned to",
                    expr.span,
                ))
            }
        };
        self.advance(); // skip =
        let value = self.parse_expr()?;
        if matches!(self.peek(), Token::Eq) {
            return Err(DslError::parser(
                "Chained assignment is not supported",
                self.span(),
            ));
        }
        self.expect_terminator()?;
        let span = expr.span.merge(value.span);
        Ok(Stmt::Assign { target, value, span })
    }

    // ── Expression parsing (precedence climbing) ──────────────────

    fn parse_expr(&mut self) -> Result<Expr, DslError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr, DslError> {
        self.parse_bool_chain(Token::Or, BoolOp::Or, Self::parse_and)
    }

    fn parse_and(&mut self) -> Result<Expr, DslError> {
        self.parse_bool_chain(Token::And, BoolOp::And, Self::parse_not)
    }

    /// `a op b op c` collected into a single n-ary node.
    fn parse_bool_chain(
        &mut self,
        token: Token,
        op: BoolOp,
        next: fn(&mut Self) -> Result<Expr, DslError>,
    ) -> Result<Expr, DslError> {
        let first = next(self)?;
        if *self.peek() != token {
            return Ok(first);
        }
        let mut span = first.span;
        let mut values = vec![first];
        while *self.peek() == token {
            self.advance();
            let right = next(self)?;
            span = span.merge(right.span);
            values.push(right);
        }
        Ok(Expr {
            kind: ExprKind::BoolOp { op, values },
            span,
        })
    }

    fn parse_not(&mut self) -> Result<Expr, DslError> {
        if matches!(self.peek(), Token::Not) {
            let start = self.span();
            self.advance();
            let operand = self.parse_not()?;
            let span = start.merge(operand.span);
            return Ok(Expr {
                kind: ExprKind::UnaryOp {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                span,
            });
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr, DslError> {
        let left = self.parse_add()?;
        let mut ops = Vec::new();
        let mut span = left.span;
        loop {
            let op = match self.peek() {
                Token::Lt => CmpOp::Lt,
                Token::Gt => CmpOp::Gt,
                Token::Le => CmpOp::Le,
                Token::Ge => CmpOp::Ge,
                Token::EqEq => CmpOp::Eq,
                Token::Ne => CmpOp::Ne,
                _ => break,
            };
            self.advance();
            let right = self.parse_add()?;
            span = span.merge(right.span);
            ops.push((op, right));
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr {
            kind: ExprKind::Compare {
                left: Box::new(left),
                ops,
            },
            span,
        })
    }

    fn parse_add(&mut self) -> Result<Expr, DslError> {
        let mut left = self.parse_mul()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_mul()?;
            let span = left.span.merge(right.span);
            left = Expr {
                kind: ExprKind::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Ok(left)
    }

    fn parse_mul(&mut self) -> Result<Expr, DslError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                Token::Percent => BinOp::Mod,
                Token::DoubleSlash => {
                    return Err(DslError::parser(
                        "Floor division '//' is not supported; use floor(a / b)",
                        self.span(),
                    ))
                }
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            let span = left.span.merge(right.span);
            left = Expr {
                kind: ExprKind::BinOp {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, DslError> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Pos,
            _ => return self.parse_power(),
        };
        let start = self.span();
        self.advance();
        let operand = self.parse_unary()?;
        let span = start.merge(operand.span);
        Ok(Expr {
            kind: ExprKind::UnaryOp {
                op,
                operand: Box::new(operand),
            },
            span,
        })
    }

    /// Power operator `**`: right-associative, binds tighter than unary
    /// minus on its left: `-a ** b` is `-(a ** b)`.
    fn parse_power(&mut self) -> Result<Expr, DslError> {
        let left = self.parse_postfix()?;
        if matches!(self.peek(), Token::StarStar) {
            self.advance();
            // Right-associative: the exponent may itself be signed or a power
            let right = self.parse_unary()?;
            let span = left.span.merge(right.span);
            Ok(Expr {
                kind: ExprKind::BinOp {
                    op: BinOp::Pow,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                span,
            })
        } else {
            Ok(left)
        }
    }

    fn parse_postfix(&mut self) -> Result<Expr, DslError> {
        let mut expr = self.parse_primary()?;

        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let (attr, attr_span) = self.expect_ident()?;
                    let span = expr.span.merge(attr_span);
                    expr = Expr {
                        kind: ExprKind::Attribute {
                            value: Box::new(expr),
                            attr,
                        },
                        span,
                    };
                }
                Token::LParen => {
                    self.advance();
                    let (args, keywords) = self.parse_call_args()?;
                    let span = expr.span.merge(self.prev_span());
                    expr = Expr {
                        kind: ExprKind::Call {
                            func: Box::new(expr),
                            args,
                            keywords,
                        },
                        span,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.parse_expr()?;
                    let end = self.expect(&Token::RBracket)?;
                    let span = expr.span.merge(end);
                    expr = Expr {
                        kind: ExprKind::Subscript {
                            value: Box::new(expr),
                            index: Box::new(index),
                        },
                        span,
                    };
                }
                _ => break,
            }
        }

        Ok(expr)
    }

    /// Arguments after `(`, through the closing `)`. Positional arguments
    /// must precede keywords and keywords may not repeat.
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<Keyword>), DslError> {
        let mut args = Vec::new();
        let mut keywords: Vec<Keyword> = Vec::new();
        while !matches!(self.peek(), Token::RParen) {
            if matches!(self.peek(), Token::Star | Token::StarStar) {
                return Err(DslError::parser(
                    "Argument unpacking is not supported",
                    self.span(),
                ));
            }
            if matches!(self.peek(), Token::Ident(_)) && self.lookahead_is_eq() {
                let (name, name_span) = self.expect_ident()?;
                self.advance(); // skip =
                let value = self.parse_expr()?;
                if keywords.iter().any(|k| k.name == name) {
                    return Err(DslError::parser(
                        format!("Keyword argument '{name}' repeated"),
                        name_span,
                    ));
                }
                let span = name_span.merge(value.span);
                keywords.push(Keyword { name, value, span });
            } else {
                let value = self.parse_expr()?;
                if !keywords.is_empty() {
                    return Err(DslError::parser(
                        "Positional argument follows keyword argument",
                        value.span,
                    ));
                }
                args.push(value);
            }
            if matches!(self.peek(), Token::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&Token::RParen)?;
        Ok((args, keywords))
    }

    fn parse_primary(&mut self) -> Result<Expr, DslError> {
        let span = self.span();
        match self.peek().clone() {
            Token::Int(v) => {
                self.advance();
                Ok(Expr { kind: ExprKind::Int(v), span })
            }
            Token::Float(v) => {
                self.advance();
                Ok(Expr { kind: ExprKind::Float(v), span })
            }
            Token::Str(s) => {
                self.advance();
                // Adjacent string literals concatenate
                let mut text = s;
                let mut span = span;
                while let Token::Str(more) = self.peek().clone() {
                    span = span.merge(self.span());
                    self.advance();
                    text.push_str(&more);
                }
                Ok(Expr { kind: ExprKind::Str(text), span })
            }
            Token::True => {
                self.advance();
                Ok(Expr { kind: ExprKind::Bool(true), span })
            }
            Token::False => {
                self.advance();
                Ok(Expr { kind: ExprKind::Bool(false), span })
            }
            Token::NoneKw => {
                self.advance();
                Ok(Expr { kind: ExprKind::NoneLit, span })
            }
            Token::Ident(name) => {
                self.advance();
                Ok(Expr { kind: ExprKind::Name(name), span })
            }
            Token::LParen => {
                self.advance();
                if matches!(self.peek(), Token::RParen) {
                    let end = self.expect(&Token::RParen)?;
                    return Ok(Expr { kind: ExprKind::Tuple(Vec::new()), span: span.merge(end) });
                }
                let first = self.parse_expr()?;
                if !matches!(self.peek(), Token::Comma) {
                    self.expect(&Token::RParen)?;
                    return Ok(first);
                }
                let items = self.parse_sequence_tail(first, &Token::RParen)?;
                Ok(Expr { kind: ExprKind::Tuple(items), span: span.merge(self.prev_span()) })
            }
            Token::LBracket => {
                self.advance();
                if matches!(self.peek(), Token::RBracket) {
                    let end = self.expect(&Token::RBracket)?;
                    return Ok(Expr { kind: ExprKind::List(Vec::new()), span: span.merge(end) });
                }
                let first = self.parse_expr()?;
                let items = self.parse_sequence_tail(first, &Token::RBracket)?;
                Ok(Expr { kind: ExprKind::List(items), span: span.merge(self.prev_span()) })
            }
            Token::LBrace => {
                self.advance();
                let mut pairs = Vec::new();
                while !matches!(self.peek(), Token::RBrace) {
                    let key = self.parse_expr()?;
                    self.expect(&Token::Colon)?;
                    let value = self.parse_expr()?;
                    pairs.push((key, value));
                    if matches!(self.peek(), Token::Comma) {
                        self.advance();
                    } else {
                        break;
                    }
                }
                let end = self.expect(&Token::RBrace)?;
                Ok(Expr { kind: ExprKind::Dict(pairs), span: span.merge(end) })
            }
            _ => {
                Err(DslError::parser(
                    format!("Unexpected token: {:?}", self.peek()),
                    self.span(),
                ))
            }
        }
    }

    /// Remaining `, item` elements of a list or tuple, through `close`.
    fn parse_sequence_tail(&mut self, first: Expr, close: &Token) -> Result<Vec<Expr>, DslError> {
        let mut items = vec![first];
        while matches!(self.peek(), Token::Comma) {
            self.advance();
            if self.peek() == close {
                break;
            }
            items.push(self.parse_expr()?);
        }
        self.expect(close)?;
        Ok(items)
    }
}
