//! Static checks on literal operands. Only literals have a type before
//! inference runs, so these catch the obvious mistakes early: adding a string
//! to a number, taking the square root of a vector, and so on.

use serde_json::Value;

use super::ast::{Expr, Span};
use super::error::DslError;

/// Coarse type of a literal operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiteralKind {
    Number,
    String,
    Vector,
    None,
    Other,
}

impl LiteralKind {
    fn describe(self) -> &'static str {
        match self {
            LiteralKind::Number => "number",
            LiteralKind::String => "string",
            LiteralKind::Vector => "vector",
            LiteralKind::None => "None",
            LiteralKind::Other => "literal",
        }
    }
}

/// True for a dict with numeric `x`, `y` and `z` entries.
pub fn is_vector_literal(v: &Value) -> bool {
    v.as_object().is_some_and(|m| {
        ["x", "y", "z"]
            .iter()
            .all(|k| m.get(*k).is_some_and(|c| c.is_number() || c.is_boolean()))
    })
}

pub fn kind_of_value(v: &Value) -> LiteralKind {
    match v {
        Value::Number(_) | Value::Bool(_) => LiteralKind::Number,
        Value::String(_) => LiteralKind::String,
        Value::Null => LiteralKind::None,
        _ if is_vector_literal(v) => LiteralKind::Vector,
        _ => LiteralKind::Other,
    }
}

/// Kind of an expression if it is a literal; `None` when only inference can
/// tell.
pub fn literal_kind(expr: &Expr) -> Option<LiteralKind> {
    expr.literal().as_ref().map(kind_of_value)
}

/// Operand rules for an operator or builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandRule {
    /// `+`: both sides must agree when either is a vector or string.
    Addition,
    /// `-`, `*`, `/`: vectors only with vectors; never strings.
    VectorArithmetic,
    /// Plain numbers only: no vectors, no strings.
    DecimalOnly,
    /// Rounding family: no strings.
    NoStrings,
    /// No check.
    Any,
}

/// Check literal operands of `op_name` against `rule`.
pub fn check_operands(
    op_name: &str,
    rule: OperandRule,
    operands: &[&Expr],
    span: Span,
) -> Result<(), DslError> {
    let kinds: Vec<Option<LiteralKind>> = operands.iter().map(|e| literal_kind(e)).collect();
    let known: Vec<LiteralKind> = kinds.iter().flatten().copied().collect();
    let has = |k: LiteralKind| known.contains(&k);

    let fail = |msg: String| Err(DslError::type_error(msg, span));

    match rule {
        OperandRule::Any => Ok(()),
        OperandRule::Addition => {
            if let [Some(a), Some(b)] = kinds.as_slice() {
                if a != b {
                    if has(LiteralKind::Vector) {
                        return fail(format!(
                            "{op_name}: vector addition only supports vector + vector, got {} + {}",
                            a.describe(),
                            b.describe()
                        ));
                    }
                    if has(LiteralKind::String) {
                        return fail(format!(
                            "{op_name}: string concatenation only supports string + string, got {} + {}",
                            a.describe(),
                            b.describe()
                        ));
                    }
                }
            }
            Ok(())
        }
        OperandRule::VectorArithmetic => {
            if has(LiteralKind::String) {
                return fail(format!("{op_name}: strings are not supported"));
            }
            if let [Some(a), Some(b)] = kinds.as_slice() {
                if a != b && has(LiteralKind::Vector) {
                    return fail(format!(
                        "{op_name}: vectors can only be combined with vectors, got {} and {}",
                        a.describe(),
                        b.describe()
                    ));
                }
            }
            Ok(())
        }
        OperandRule::DecimalOnly => {
            if has(LiteralKind::Vector) || has(LiteralKind::String) {
                return fail(format!("{op_name}: only numbers are supported"));
            }
            Ok(())
        }
        OperandRule::NoStrings => {
            if has(LiteralKind::String) {
                return fail(format!("{op_name}: strings are not supported"));
            }
            Ok(())
        }
    }
}
