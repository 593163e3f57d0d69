//! AST node types for the chip DSL.

use serde_json::{Map, Number, Value};

/// Source span for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn merge(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// A complete DSL program: a flat list of statements.
#[derive(Debug, Clone)]
pub struct Program {
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone)]
pub enum Stmt {
    /// `name = expr`
    Assign {
        target: String,
        value: Expr,
        span: Span,
    },
    /// A bare expression.
    Expr(Expr),
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    NoneLit,
    Name(String),
    /// `value.attr`, only meaningful as a dotted callee.
    Attribute {
        value: Box<Expr>,
        attr: String,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
    },
    /// `value[index]`
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
    },
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// `a and b and c`
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
    },
    /// `a < b <= c`
    Compare {
        left: Box<Expr>,
        ops: Vec<(CmpOp, Expr)>,
    },
    Dict(Vec<(Expr, Expr)>),
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
}

/// `name=value` inside a call.
#[derive(Debug, Clone)]
pub struct Keyword {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl Expr {
    /// Statically evaluate a literal expression: numbers, strings, booleans,
    /// `None`, and dicts/lists/tuples of those, with unary sign on numbers.
    /// Returns `None` for anything that needs the graph.
    pub fn literal(&self) -> Option<Value> {
        match &self.kind {
            ExprKind::Int(v) => Some(Value::from(*v)),
            ExprKind::Float(v) => Number::from_f64(*v).map(Value::Number),
            ExprKind::Str(s) => Some(Value::String(s.clone())),
            ExprKind::Bool(b) => Some(Value::Bool(*b)),
            ExprKind::NoneLit => Some(Value::Null),
            ExprKind::UnaryOp { op, operand } if *op != UnaryOp::Not => {
                let inner = operand.literal()?;
                let n = inner.as_number()?;
                if *op == UnaryOp::Pos {
                    return Some(inner);
                }
                if let Some(i) = n.as_i64() {
                    i.checked_neg().map(Value::from)
                } else {
                    n.as_f64().and_then(|f| Number::from_f64(-f)).map(Value::Number)
                }
            }
            ExprKind::List(items) | ExprKind::Tuple(items) => {
                items.iter().map(Expr::literal).collect::<Option<Vec<_>>>().map(Value::Array)
            }
            ExprKind::Dict(pairs) => {
                let mut map = Map::new();
                for (k, v) in pairs {
                    let key = match &k.kind {
                        ExprKind::Str(s) => s.clone(),
                        _ => return None,
                    };
                    map.insert(key, v.literal()?);
                }
                Some(Value::Object(map))
            }
            _ => None,
        }
    }

    pub fn is_none_literal(&self) -> bool {
        matches!(self.kind, ExprKind::NoneLit)
    }

    /// Dotted name of a callee: `Add` or `chips.math.Add`.
    pub fn dotted_name(&self) -> Option<String> {
        match &self.kind {
            ExprKind::Name(n) => Some(n.clone()),
            ExprKind::Attribute { value, attr } => Some(format!("{}.{attr}", value.dotted_name()?)),
            _ => None,
        }
    }
}
