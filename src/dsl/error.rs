use super::ast::Span;
use crate::error::CompileError;

/// A front-end error with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct DslError {
    pub message: String,
    pub span: Span,
    pub kind: ErrorKind,
    /// IR node the error concerns, when the builder already created one.
    pub node_id: Option<String>,
    pub port: Option<String>,
    pub variable: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Lexer,
    Parser,
    Type,
    Graph,
}

impl DslError {
    fn new(kind: ErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
            kind,
            node_id: None,
            port: None,
            variable: None,
        }
    }

    pub fn lexer(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Lexer, message, span)
    }

    pub fn parser(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Parser, message, span)
    }

    pub fn type_error(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Type, message, span)
    }

    pub fn graph(message: impl Into<String>, span: Span) -> Self {
        Self::new(ErrorKind::Graph, message, span)
    }

    pub fn with_node(mut self, id: impl Into<String>) -> Self {
        self.node_id = Some(id.into());
        self
    }

    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variable = Some(name.into());
        self
    }

    fn kind_label(&self) -> &'static str {
        match self.kind {
            ErrorKind::Lexer => "lexer",
            ErrorKind::Parser => "parser",
            ErrorKind::Type => "type",
            ErrorKind::Graph => "graph",
        }
    }

    /// Format the error with source context.
    pub fn format_with_source(&self, source: &str) -> String {
        let (line, col) = offset_to_line_col(source, self.span.start);
        format!("[{}] line {}:{}: {}", self.kind_label(), line, col, self.message)
    }

    /// Lift into the pipeline error, resolving the span against `source`.
    pub fn into_compile_error(self, source: &str) -> CompileError {
        let (line, col) = offset_to_line_col(source, self.span.start);
        let mut err = CompileError::parser(format!("{}: {}", self.kind_label(), self.message))
            .with_line(line)
            .with_column(col);
        if let Some(id) = self.node_id {
            err = err.with_node(id);
        }
        if let Some(port) = self.port {
            err = err.with_port(port);
        }
        if let Some(var) = self.variable {
            err = err.with_variable(var);
        }
        err
    }
}

impl std::fmt::Display for DslError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DslError {}

/// All front-end errors of one compile lifted into a single pipeline error.
/// The first error leads; the rest are appended to the message.
pub fn collect(errors: Vec<DslError>, source: &str) -> CompileError {
    let mut iter = errors.into_iter();
    let Some(first) = iter.next() else {
        return CompileError::parser("front end failed without a diagnostic");
    };
    let rest: Vec<String> = iter.map(|e| e.format_with_source(source)).collect();
    let mut err = first.into_compile_error(source);
    if !rest.is_empty() {
        err.message = format!("{} (+{} more: {})", err.message, rest.len(), rest.join("; "));
    }
    err
}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 1;
    let mut col = 1;
    for (i, ch) in source.char_indices() {
        if i >= offset {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (line, col)
}
