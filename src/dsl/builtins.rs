use super::typeck::OperandRule;

/// How a builtin call turns into graph nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    /// One node of `node` type, parameters wired to their ports.
    Direct,
    /// `min(a, b)` as `Negate(Max(Negate(a), Negate(b)))`.
    NegatedMax,
    /// `square(a)` as `Multiply(A=a, B=a)` with `a` emitted once.
    SelfProduct,
}

/// One parameter of a builtin: the lowercase keyword it answers to, any
/// alternative keywords, and the port it feeds.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub key: &'static str,
    pub alt: &'static [&'static str],
    pub port: &'static str,
}

const fn param(key: &'static str, alt: &'static [&'static str], port: &'static str) -> Param {
    Param { key, alt, port }
}

/// Builtin function: single source of truth for the accepted names, the node
/// it lowers to and its positional parameter order.
#[derive(Debug, Clone)]
pub struct BuiltinFn {
    pub names: &'static [&'static str],
    pub node: &'static str,
    pub params: &'static [Param],
    pub rule: OperandRule,
    pub expansion: Expansion,
    pub description: &'static str,
}

const INPUT: &[Param] = &[param("input", &["a"], "Input")];
const A_B: &[Param] = &[param("a", &["input"], "A"), param("b", &[], "B")];

/// All builtin calls available in the DSL.
pub static BUILTINS: &[BuiltinFn] = &[
    // ── Unary math ──────────────────────────────────────────────
    BuiltinFn {
        names: &["abs", "positive"], node: "Positive", params: INPUT,
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Absolute value",
    },
    BuiltinFn {
        names: &["sqrt"], node: "Sqrt", params: INPUT,
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Square root",
    },
    BuiltinFn {
        names: &["round"], node: "Round", params: INPUT,
        rule: OperandRule::NoStrings, expansion: Expansion::Direct,
        description: "Round to nearest",
    },
    BuiltinFn {
        names: &["floor"], node: "Floor", params: INPUT,
        rule: OperandRule::NoStrings, expansion: Expansion::Direct,
        description: "Round down",
    },
    BuiltinFn {
        names: &["ceil", "ceiling"], node: "Ceiling", params: INPUT,
        rule: OperandRule::NoStrings, expansion: Expansion::Direct,
        description: "Round up",
    },
    BuiltinFn {
        names: &["clamp01"], node: "Clamp01", params: INPUT,
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Clamp to [0, 1]",
    },
    BuiltinFn {
        names: &["sign"], node: "Sign", params: INPUT,
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Sign: -1, 0 or 1",
    },
    BuiltinFn {
        names: &["exp", "exponent"], node: "Exponent", params: INPUT,
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "e^x",
    },
    BuiltinFn {
        names: &["inverse"], node: "Inverse", params: &[param("a", &["input"], "A")],
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "1 / x",
    },
    BuiltinFn {
        names: &["square"], node: "Multiply", params: &[param("a", &["input"], "A")],
        rule: OperandRule::Any, expansion: Expansion::SelfProduct,
        description: "x * x",
    },
    // ── Binary math ─────────────────────────────────────────────
    BuiltinFn {
        names: &["average"], node: "Average", params: A_B,
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Mean of two values",
    },
    BuiltinFn {
        names: &["max"], node: "Max", params: A_B,
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Maximum",
    },
    BuiltinFn {
        names: &["min"], node: "Max", params: A_B,
        rule: OperandRule::DecimalOnly, expansion: Expansion::NegatedMax,
        description: "Minimum, as -max(-a, -b)",
    },
    BuiltinFn {
        names: &["log", "logarithm"], node: "Logarithm",
        params: &[param("value", &["a", "input"], "Value"), param("base", &["b"], "Base")],
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Logarithm of value in base",
    },
    BuiltinFn {
        names: &["random"], node: "Random",
        params: &[param("min", &["a"], "Min"), param("max", &["b"], "Max")],
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Random number in [min, max]",
    },
    BuiltinFn {
        names: &["pow", "power"], node: "Power",
        params: &[param("value", &["a"], "Value"), param("power", &["b"], "Power")],
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Power",
    },
    BuiltinFn {
        names: &["remainder"], node: "Remainder",
        params: &[param("dividend", &["a"], "Dividend"), param("divider", &["b"], "Divider")],
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Remainder of a division",
    },
    // ── Ternary ─────────────────────────────────────────────────
    BuiltinFn {
        names: &["clamp"], node: "Clamp",
        params: &[param("input", &["a"], "Input"), param("min", &[], "Min"), param("max", &[], "Max")],
        rule: OperandRule::DecimalOnly, expansion: Expansion::Direct,
        description: "Clamp input to [min, max]",
    },
];

/// Look up a builtin by call name, case-insensitively.
pub fn lookup(name: &str) -> Option<&'static BuiltinFn> {
    let lower = name.to_ascii_lowercase();
    BUILTINS.iter().find(|b| b.names.contains(&lower.as_str()))
}

/// Canonical node type for a callee name: the last dotted segment, with the
/// builtin spellings mapped onto their module names.
pub fn canonical_type_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return raw.to_string();
    }
    let base = trimmed.rsplit('.').next().unwrap_or(trimmed).trim();
    let alias = match base.to_ascii_lowercase().as_str() {
        "add" => "Add",
        "subtract" => "Subtract",
        "multiply" => "Multiply",
        "divide" => "Divide",
        "negate" => "Negate",
        "square" => "Square",
        "min" => "Min",
        _ => match lookup(base) {
            Some(b) if b.expansion == Expansion::Direct => b.node,
            _ => return base.to_string(),
        },
    };
    alias.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for b in BUILTINS {
            for n in b.names {
                assert!(seen.insert(*n), "duplicate builtin name {n}");
                assert_eq!(*n, n.to_ascii_lowercase());
            }
        }
    }

    #[test]
    fn canonical_names() {
        assert_eq!(canonical_type_name("abs"), "Positive");
        assert_eq!(canonical_type_name("math.ceil"), "Ceiling");
        assert_eq!(canonical_type_name("LOG"), "Logarithm");
        assert_eq!(canonical_type_name("min"), "Min");
        assert_eq!(canonical_type_name("chips.GREATER THAN"), "GREATER THAN");
        assert_eq!(canonical_type_name("OUTPUT"), "OUTPUT");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(lookup("Clamp").map(|b| b.node), Some("Clamp"));
        assert_eq!(lookup("pow").map(|b| b.params.len()), Some(2));
        assert!(lookup("Add").is_none());
    }
}
