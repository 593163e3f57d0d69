//! Walks the syntax tree and builds the IR graph. Nothing is evaluated: every
//! call becomes a node, keyword arguments become wired input ports, and
//! operators desugar into arithmetic, logic and comparison nodes.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};
use tracing::warn;

use super::ast::*;
use super::builtins::{self, BuiltinFn, Expansion};
use super::dedup::ConstantCache;
use super::error::DslError;
use super::ir::{IrEdge, IrGraph, IrNode, NodeKind, VariableDef, AUTO_PORT};
use super::typeck::{self, is_vector_literal, OperandRule};

/// Port a literal constant feeds from.
const CONSTANT_PORT: &str = "Output";

const LABEL_MAX_CHARS: usize = 18;

/// Where a value comes from: a node's port, or a name not bound yet.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ValueRef {
    Node { id: String, port: String },
    Var { name: String, port: String },
}

impl ValueRef {
    fn node(id: impl Into<String>, port: impl Into<String>) -> Self {
        ValueRef::Node {
            id: id.into(),
            port: port.into(),
        }
    }

    fn with_port(self, port: String) -> Self {
        match self {
            ValueRef::Node { id, .. } => ValueRef::Node { id, port },
            ValueRef::Var { name, .. } => ValueRef::Var { name, port },
        }
    }
}

/// A reference to a name that had no node when it was used.
#[derive(Debug, Clone)]
struct Pending {
    name: String,
    port: String,
    to_node: String,
    to_port: String,
    span: Span,
}

/// Build the IR graph for a parsed program.
pub fn build(program: &Program) -> Result<IrGraph, Vec<DslError>> {
    let mut builder = GraphBuilder::default();
    for stmt in &program.body {
        if let Err(e) = builder.visit_stmt(stmt) {
            builder.errors.push(e);
        }
    }
    if !builder.errors.is_empty() {
        return Err(builder.errors);
    }
    builder.resolve_unresolved()?;
    Ok(builder.finish())
}

#[derive(Debug, Default)]
struct GraphBuilder {
    graph: IrGraph,
    index: HashMap<String, usize>,
    /// DSL name to node id; the first binding wins.
    var2node: HashMap<String, String>,
    /// Names that denote a (node, port) pair rather than a node.
    aliases: HashMap<String, ValueRef>,
    unresolved: Vec<Pending>,
    used_ids: HashSet<String>,
    counters: HashMap<String, usize>,
    constants: ConstantCache,
    errors: Vec<DslError>,
}

impl GraphBuilder {
    // ── Statements ──────────────────────────────────────────────

    fn visit_stmt(&mut self, stmt: &Stmt) -> Result<(), DslError> {
        match stmt {
            Stmt::Assign { target, value, .. } => self.visit_assign(target, value),
            Stmt::Expr(expr) => self.visit_expr_stmt(expr),
        }
    }

    fn visit_assign(&mut self, target: &str, value: &Expr) -> Result<(), DslError> {
        match &value.kind {
            ExprKind::Call { func, .. } => {
                let r = self.emit_expr(value)?;
                if let ValueRef::Node { id, .. } = &r {
                    self.bind(target, id);
                }
                let callee = func.dotted_name().unwrap_or_default();
                if builtins::canonical_type_name(&callee).eq_ignore_ascii_case("variable") {
                    self.adopt_variable_call(target, value);
                }
                Ok(())
            }
            ExprKind::Subscript { value: base, index } => {
                let port = subscript_port(index)?;
                match &base.kind {
                    ExprKind::Name(up) => {
                        let r = self.value_ref_for_name(up).with_port(port);
                        self.aliases.insert(target.to_string(), r);
                        Ok(())
                    }
                    ExprKind::Call { .. } => match self.emit_expr(base)? {
                        ValueRef::Node { id, .. } => {
                            self.bind(target, &id);
                            self.aliases.insert(target.to_string(), ValueRef::node(id, port));
                            Ok(())
                        }
                        ValueRef::Var { name, .. } => Err(DslError::graph(
                            "Cannot subscript an expression that is not a node",
                            base.span,
                        )
                        .with_variable(name)),
                    },
                    _ => Err(DslError::graph(
                        "Port subscripts apply only to a name or a call",
                        base.span,
                    )),
                }
            }
            _ => {
                if let Some(lit) = value.literal() {
                    if is_variable_def(&lit) {
                        self.register_variable_dict(&lit, Some(target));
                        return Ok(());
                    }
                    if is_constant_like(&lit) {
                        let id = self.emit_constant(lit);
                        self.bind(target, &id);
                        return Ok(());
                    }
                }
                match self.emit_expr(value)? {
                    ValueRef::Node { id, port }
                        if port != AUTO_PORT && matches!(value.kind, ExprKind::Name(_)) =>
                    {
                        self.aliases.insert(target.to_string(), ValueRef::Node { id, port });
                    }
                    ValueRef::Node { id, .. } => self.bind(target, &id),
                    r @ ValueRef::Var { .. } => {
                        self.aliases.insert(target.to_string(), r);
                    }
                }
                Ok(())
            }
        }
    }

    fn visit_expr_stmt(&mut self, expr: &Expr) -> Result<(), DslError> {
        if let Some(lit) = expr.literal() {
            if is_variable_def(&lit) {
                self.register_variable_dict(&lit, None);
            }
            // Docstrings and other bare literals carry no graph.
            return Ok(());
        }
        match expr.kind {
            ExprKind::Call { .. }
            | ExprKind::BinOp { .. }
            | ExprKind::UnaryOp { .. }
            | ExprKind::BoolOp { .. }
            | ExprKind::Compare { .. }
            | ExprKind::Subscript { .. } => self.emit_expr(expr).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// `x = VARIABLE(Value=<literal>)` declares variable `x` when no
    /// definition with that key exists yet. The node is tagged with the name
    /// either way.
    fn adopt_variable_call(&mut self, target: &str, call: &Expr) {
        let has_def = self.graph.variables.iter().any(|d| d.key == target);
        if !has_def {
            let value = match &call.kind {
                ExprKind::Call { keywords, .. } => keywords
                    .iter()
                    .find(|kw| kw.name == "Value")
                    .and_then(|kw| kw.value.literal()),
                _ => None,
            };
            if let Some(value) = value.filter(|v| !v.is_null()) {
                let gate = gate_name_for_literal(&value);
                self.register_variable(VariableDef {
                    key: target.to_string(),
                    gate_data_type: gate.to_string(),
                    value,
                    dsl_name: Some(target.to_string()),
                    from_var_call: true,
                });
            }
        }
        if let Some(id) = self.var2node.get(target).cloned() {
            if let Some(node) = self.node_mut(&id) {
                node.attrs
                    .entry("dsl_name")
                    .or_insert_with(|| Value::String(target.to_string()));
            }
        }
    }

    fn register_variable_dict(&mut self, lit: &Value, alias: Option<&str>) {
        let key = lit.get("Key").and_then(Value::as_str);
        let gate = lit.get("GateDataType").and_then(Value::as_str);
        let (Some(key), Some(gate)) = (key, gate) else {
            warn!("variable definition without string Key/GateDataType ignored");
            return;
        };
        self.register_variable(VariableDef {
            key: key.to_string(),
            gate_data_type: gate.to_string(),
            value: lit.get("Value").cloned().unwrap_or(Value::Null),
            dsl_name: alias.map(str::to_string),
            from_var_call: false,
        });
    }

    /// Record a definition. A named definition that did not come from a
    /// `VARIABLE(...)` call also gets a VARIABLE node of its own.
    fn register_variable(&mut self, def: VariableDef) {
        let alias = if def.from_var_call { None } else { def.dsl_name.clone() };
        self.graph.variables.push(def);
        let Some(alias) = alias else { return };

        let mut attrs = Map::new();
        attrs.insert("dsl_name".into(), Value::String(alias.clone()));
        let id = self.new_node("VARIABLE", attrs, None, None);
        self.add_input(&id, "Value");
        self.add_input(&id, "Set");
        self.bind(&alias, &id);
    }

    // ── Expressions ─────────────────────────────────────────────

    fn emit_expr(&mut self, expr: &Expr) -> Result<ValueRef, DslError> {
        match &expr.kind {
            ExprKind::BoolOp { op, values } => return self.emit_bool_op(*op, values, expr.span),
            ExprKind::Compare { left, ops } => return self.emit_compare(left, ops, expr.span),
            ExprKind::UnaryOp {
                op: UnaryOp::Not,
                operand,
            } => {
                let r = self.emit_expr(operand)?;
                let id = self.new_node("NOT", Map::new(), None, None);
                self.connect(r, &id, "A", operand.span);
                return Ok(ValueRef::node(id, AUTO_PORT));
            }
            ExprKind::Name(name) => return Ok(self.value_ref_for_name(name)),
            ExprKind::Subscript { value, index } => return self.emit_subscript(value, index),
            _ => {}
        }

        if let Some(lit) = expr.literal() {
            if is_constant_like(&lit) {
                let id = self.emit_constant(lit);
                return Ok(ValueRef::node(id, CONSTANT_PORT));
            }
        }

        match &expr.kind {
            ExprKind::BinOp { op, left, right } => self.emit_binop(*op, left, right, expr.span),
            ExprKind::UnaryOp {
                op: UnaryOp::Neg,
                operand,
            } => {
                let id = self.new_node("Negate", Map::new(), None, None);
                self.connect_expr(&id, "Input", operand)?;
                Ok(ValueRef::node(id, AUTO_PORT))
            }
            ExprKind::UnaryOp {
                op: UnaryOp::Pos,
                operand,
            } => self.emit_expr(operand),
            ExprKind::Call {
                func,
                args,
                keywords,
            } => self.emit_call(func, args, keywords, expr.span),
            _ => Err(DslError::graph(
                "Unsupported expression; expected a call, a name, a port subscript, an operator or a constant literal",
                expr.span,
            )),
        }
    }

    fn emit_subscript(&mut self, value: &Expr, index: &Expr) -> Result<ValueRef, DslError> {
        let port = subscript_port(index)?;
        match &value.kind {
            ExprKind::Name(name) => Ok(self.value_ref_for_name(name).with_port(port)),
            ExprKind::Call { .. } => match self.emit_expr(value)? {
                ValueRef::Node { id, .. } => Ok(ValueRef::Node { id, port }),
                ValueRef::Var { name, .. } => Err(DslError::graph(
                    "Cannot subscript an expression that is not a node",
                    value.span,
                )
                .with_variable(name)),
            },
            _ => Err(DslError::graph(
                "Port subscripts apply only to a name or a call",
                value.span,
            )),
        }
    }

    fn emit_binop(&mut self, op: BinOp, left: &Expr, right: &Expr, span: Span) -> Result<ValueRef, DslError> {
        let (type_name, a, b, rule) = match op {
            BinOp::Add => ("Add", "A", "B", OperandRule::Addition),
            BinOp::Sub => ("Subtract", "A", "B", OperandRule::VectorArithmetic),
            BinOp::Mul => ("Multiply", "A", "B", OperandRule::VectorArithmetic),
            BinOp::Div => ("Divide", "A", "B", OperandRule::VectorArithmetic),
            BinOp::Mod => ("Remainder", "Dividend", "Divider", OperandRule::DecimalOnly),
            BinOp::Pow => ("Power", "Value", "Power", OperandRule::DecimalOnly),
        };
        typeck::check_operands(type_name, rule, &[left, right], span)?;
        let id = self.new_node(type_name, Map::new(), None, None);
        self.connect_expr(&id, a, left)?;
        self.connect_expr(&id, b, right)?;
        Ok(ValueRef::node(id, AUTO_PORT))
    }

    /// `a and b and c` folds left into `AND(AND(a, b), c)`.
    fn emit_bool_op(&mut self, op: BoolOp, values: &[Expr], span: Span) -> Result<ValueRef, DslError> {
        let type_name = match op {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
        };
        let [first, rest @ ..] = values else {
            return Err(DslError::graph(format!("{type_name} needs at least two operands"), span));
        };
        if rest.is_empty() {
            return Err(DslError::graph(format!("{type_name} needs at least two operands"), span));
        }
        let mut acc = self.emit_expr(first)?;
        for value in rest {
            let right = self.emit_expr(value)?;
            acc = self.logic_node(type_name, acc, right, value.span);
        }
        Ok(acc)
    }

    /// `a < b < c` becomes `(a < b) and (b < c)`, each operand emitted once.
    fn emit_compare(&mut self, left: &Expr, ops: &[(CmpOp, Expr)], span: Span) -> Result<ValueRef, DslError> {
        let mut lhs = self.emit_expr(left)?;
        let mut results = Vec::with_capacity(ops.len());
        for (op, right) in ops {
            let rhs = self.emit_expr(right)?;
            let type_name = match op {
                CmpOp::Gt => "GREATER THAN",
                CmpOp::Lt => "LESS THAN",
                CmpOp::Ge => "GREATER OR EQUAL",
                CmpOp::Le => "LESS OR EQUAL",
                CmpOp::Eq => "EQUAL",
                CmpOp::Ne => "NOT EQUAL",
            };
            results.push(self.logic_node(type_name, lhs, rhs.clone(), right.span));
            lhs = rhs;
        }
        let mut iter = results.into_iter();
        let Some(mut acc) = iter.next() else {
            return Err(DslError::graph("Comparison without operator", span));
        };
        for next in iter {
            acc = self.logic_node("AND", acc, next, span);
        }
        Ok(acc)
    }

    fn logic_node(&mut self, type_name: &str, a: ValueRef, b: ValueRef, span: Span) -> ValueRef {
        let id = self.new_node(type_name, Map::new(), None, None);
        self.connect(a, &id, "A", span);
        self.connect(b, &id, "B", span);
        ValueRef::node(id, AUTO_PORT)
    }

    fn emit_call(
        &mut self,
        func: &Expr,
        args: &[Expr],
        keywords: &[Keyword],
        span: Span,
    ) -> Result<ValueRef, DslError> {
        let Some(raw) = func.dotted_name() else {
            return Err(DslError::graph("Callee must be a name such as Add or chips.Add", func.span));
        };
        let type_name = builtins::canonical_type_name(&raw);
        if let Some(builtin) = builtins::lookup(&type_name) {
            return self.emit_builtin(builtin, args, keywords, span);
        }
        if !args.is_empty() {
            return Err(DslError::graph(
                format!(
                    "{type_name}: node calls take keyword ports only, e.g. {type_name}(A=..., B=...)"
                ),
                span,
            ));
        }
        self.emit_node_call(type_name, keywords)
    }

    fn emit_builtin(
        &mut self,
        builtin: &'static BuiltinFn,
        args: &[Expr],
        keywords: &[Keyword],
        span: Span,
    ) -> Result<ValueRef, DslError> {
        let name = builtin.names.first().copied().unwrap_or(builtin.node);
        if args.len() > builtin.params.len() {
            return Err(DslError::graph(
                format!(
                    "{name}() takes at most {} positional argument(s), got {}",
                    builtin.params.len(),
                    args.len()
                ),
                span,
            ));
        }
        let mut by_key: HashMap<String, &Expr> = keywords
            .iter()
            .map(|kw| (kw.name.to_ascii_lowercase(), &kw.value))
            .collect();
        for (p, arg) in builtin.params.iter().zip(args) {
            by_key.entry(p.key.to_string()).or_insert(arg);
        }

        let mut operands = Vec::with_capacity(builtin.params.len());
        for p in builtin.params {
            let found = std::iter::once(p.key)
                .chain(p.alt.iter().copied())
                .find_map(|k| by_key.get(k).copied());
            let Some(expr) = found else {
                return Err(DslError::graph(format!("{name}(): missing argument '{}'", p.key), span));
            };
            operands.push((p.port, expr));
        }
        let exprs: Vec<&Expr> = operands.iter().map(|(_, e)| *e).collect();
        typeck::check_operands(builtin.node, builtin.rule, &exprs, span)?;

        let id = match builtin.expansion {
            Expansion::Direct => {
                let id = self.new_node(builtin.node, Map::new(), None, None);
                for (port, expr) in operands {
                    self.connect_expr(&id, port, expr)?;
                }
                id
            }
            Expansion::SelfProduct => {
                let id = self.new_node("Multiply", Map::new(), None, None);
                for (_, expr) in operands {
                    let r = self.emit_expr(expr)?;
                    self.connect(r.clone(), &id, "A", expr.span);
                    self.connect(r, &id, "B", expr.span);
                }
                id
            }
            Expansion::NegatedMax => {
                let outer = self.new_node("Negate", Map::new(), None, None);
                let max = self.new_node("Max", Map::new(), None, None);
                for (port, expr) in operands {
                    let neg = self.new_node("Negate", Map::new(), None, None);
                    self.connect_expr(&neg, "Input", expr)?;
                    self.connect(ValueRef::node(neg, AUTO_PORT), &max, port, expr.span);
                }
                self.connect(ValueRef::node(max, AUTO_PORT), &outer, "Input", span);
                outer
            }
        };
        Ok(ValueRef::node(id, AUTO_PORT))
    }

    /// A plain node call: `Type(Port=expr, ..., attrs={...}, id="...", label="...")`.
    fn emit_node_call(&mut self, type_name: String, keywords: &[Keyword]) -> Result<ValueRef, DslError> {
        let mut attrs = Map::new();
        let mut fixed_id = None;
        let mut label = None;
        let mut ports: Vec<&Keyword> = Vec::new();

        // `attrs`, `id` and `label` set metadata; every other keyword is a port.
        for kw in keywords {
            match kw.name.as_str() {
                "attrs" => match kw.value.literal() {
                    Some(Value::Object(map)) => attrs = map,
                    _ => warn!(node_type = %type_name, "attrs is not a literal dict; ignored"),
                },
                "id" => {
                    if let ExprKind::Str(s) = &kw.value.kind {
                        fixed_id = Some(s.clone());
                    }
                }
                "label" => {
                    if let ExprKind::Str(s) = &kw.value.kind {
                        label = Some(s.clone());
                    }
                }
                _ => ports.push(kw),
            }
        }

        if NodeKind::of(&type_name) == NodeKind::Constant {
            // Constant(value=<literal>) folds into the attributes so it
            // shares the literal cache.
            ports.retain(|kw| {
                if !kw.name.eq_ignore_ascii_case("value") {
                    return true;
                }
                match kw.value.literal() {
                    Some(lit) if !lit.is_null() => {
                        attrs.insert("value".into(), lit);
                        false
                    }
                    _ => true,
                }
            });
            if ports.is_empty() && fixed_id.is_none() && label.is_none() && attrs.contains_key("value") {
                let id = self.emit_constant_attrs(&type_name, attrs);
                return Ok(ValueRef::node(id, AUTO_PORT));
            }
        }

        let id = self.new_node(&type_name, attrs, fixed_id, label);
        for kw in ports {
            self.connect_expr(&id, &kw.name, &kw.value)?;
        }
        Ok(ValueRef::node(id, AUTO_PORT))
    }

    fn emit_constant(&mut self, lit: Value) -> String {
        let mut attrs = Map::new();
        attrs.insert("value".into(), lit);
        self.emit_constant_attrs("Constant", attrs)
    }

    fn emit_constant_attrs(&mut self, type_name: &str, attrs: Map<String, Value>) -> String {
        if let Some(existing) = self.constants.get(&attrs) {
            return existing.to_string();
        }
        let id = self.new_node(type_name, attrs.clone(), None, None);
        self.constants.insert(&attrs, &id);
        id
    }

    // ── Graph bookkeeping ───────────────────────────────────────

    fn value_ref_for_name(&self, name: &str) -> ValueRef {
        if let Some(alias) = self.aliases.get(name) {
            return match alias {
                ValueRef::Var { name: up, port } => match self.var2node.get(up) {
                    Some(id) => ValueRef::node(id.clone(), port.clone()),
                    None => alias.clone(),
                },
                ValueRef::Node { .. } => alias.clone(),
            };
        }
        match self.var2node.get(name) {
            Some(id) => ValueRef::node(id.clone(), AUTO_PORT),
            None => ValueRef::Var {
                name: name.to_string(),
                port: AUTO_PORT.to_string(),
            },
        }
    }

    fn bind(&mut self, name: &str, id: &str) {
        self.var2node
            .entry(name.to_string())
            .or_insert_with(|| id.to_string());
    }

    fn next_id(&mut self, type_name: &str) -> String {
        let base = normalize_id_base(type_name);
        let counter = self.counters.entry(base.clone()).or_insert(0);
        loop {
            let id = format!("{base}_{counter}");
            *counter += 1;
            if self.used_ids.insert(id.clone()) {
                return id;
            }
        }
    }

    fn new_node(
        &mut self,
        type_name: &str,
        attrs: Map<String, Value>,
        fixed_id: Option<String>,
        label: Option<String>,
    ) -> String {
        let id = match fixed_id {
            Some(f) if !f.is_empty() && self.used_ids.insert(f.clone()) => f,
            _ => self.next_id(type_name),
        };
        let label = label.unwrap_or_else(|| auto_label(type_name, &attrs));
        self.index.insert(id.clone(), self.graph.nodes.len());
        self.graph.nodes.push(IrNode {
            id: id.clone(),
            type_name: type_name.to_string(),
            kind: NodeKind::of(type_name),
            label,
            attrs,
            inputs: Vec::new(),
            outputs: Vec::new(),
        });
        id
    }

    fn node_mut(&mut self, id: &str) -> Option<&mut IrNode> {
        let idx = *self.index.get(id)?;
        self.graph.nodes.get_mut(idx)
    }

    fn add_input(&mut self, id: &str, port: &str) {
        if let Some(node) = self.node_mut(id) {
            if !node.inputs.iter().any(|p| p == port) {
                node.inputs.push(port.to_string());
            }
        }
    }

    /// Wire `expr` into `to.port`; a `None` literal only declares the port.
    fn connect_expr(&mut self, to: &str, port: &str, expr: &Expr) -> Result<(), DslError> {
        if expr.is_none_literal() {
            self.add_input(to, port);
            return Ok(());
        }
        let r = self.emit_expr(expr)?;
        self.connect(r, to, port, expr.span);
        Ok(())
    }

    fn connect(&mut self, from: ValueRef, to: &str, port: &str, span: Span) {
        self.add_input(to, port);
        match from {
            ValueRef::Node { id, port: from_port } => self.graph.edges.push(IrEdge {
                from_node: id,
                from_port,
                to_node: to.to_string(),
                to_port: port.to_string(),
            }),
            ValueRef::Var { name, port: from_port } => self.unresolved.push(Pending {
                name,
                port: from_port,
                to_node: to.to_string(),
                to_port: port.to_string(),
                span,
            }),
        }
    }

    // ── Resolution ──────────────────────────────────────────────

    /// Resolve every forward reference in one sweep. Any name still unknown
    /// fails the whole build.
    fn resolve_unresolved(&mut self) -> Result<(), Vec<DslError>> {
        let pending = std::mem::take(&mut self.unresolved);
        let mut errors = Vec::new();
        for p in pending {
            match self.resolve_name(&p.name, &p.port, 0) {
                Some((from_node, from_port)) => self.graph.edges.push(IrEdge {
                    from_node,
                    from_port,
                    to_node: p.to_node,
                    to_port: p.to_port,
                }),
                None => errors.push(
                    DslError::graph(
                        format!("Reference to undefined variable '{}' (never assigned anywhere)", p.name),
                        p.span,
                    )
                    .with_node(p.to_node)
                    .with_port(p.to_port)
                    .with_variable(p.name),
                ),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn resolve_name(&self, name: &str, port: &str, depth: usize) -> Option<(String, String)> {
        if depth > self.aliases.len() {
            return None;
        }
        let pick = |alias_port: &str| {
            if port == AUTO_PORT {
                alias_port.to_string()
            } else {
                port.to_string()
            }
        };
        if let Some(alias) = self.aliases.get(name) {
            return match alias {
                ValueRef::Node { id, port: ap } => Some((id.clone(), pick(ap))),
                ValueRef::Var { name: up, port: ap } => self.resolve_name(up, &pick(ap), depth + 1),
            };
        }
        self.var2node
            .get(name)
            .map(|id| (id.clone(), port.to_string()))
    }

    fn finish(mut self) -> IrGraph {
        self.graph.finalize_outputs();
        self.graph
    }
}

// ── Helpers ─────────────────────────────────────────────────────

fn subscript_port(index: &Expr) -> Result<String, DslError> {
    match &index.kind {
        ExprKind::Str(s) => Ok(s.clone()),
        ExprKind::Int(i) => Ok(i.to_string()),
        _ => match index.literal() {
            Some(Value::Number(n)) if n.is_i64() => Ok(n.to_string()),
            _ => Err(DslError::graph(
                "Port subscripts must be a string or integer literal",
                index.span,
            )),
        },
    }
}

/// Literals that become anonymous constant nodes when used as a value.
fn is_constant_like(lit: &Value) -> bool {
    matches!(lit, Value::Number(_) | Value::String(_) | Value::Bool(_)) || is_vector_literal(lit)
}

fn is_variable_def(lit: &Value) -> bool {
    lit.as_object().is_some_and(|m| {
        ["Key", "GateDataType", "Value"]
            .iter()
            .all(|k| m.contains_key(*k))
    })
}

fn gate_name_for_literal(lit: &Value) -> &'static str {
    match lit {
        Value::String(_) => "String",
        _ if is_vector_literal(lit) => "Vector",
        _ => "Number",
    }
}

/// Id prefix for a type name: ASCII alphanumerics and `_`, lowercased.
pub fn normalize_id_base(type_name: &str) -> String {
    let base: String = type_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect::<String>()
        .to_ascii_lowercase();
    if base.is_empty() {
        "node".to_string()
    } else {
        base
    }
}

fn auto_label(type_name: &str, attrs: &Map<String, Value>) -> String {
    let upper = type_name.to_ascii_uppercase();
    if upper.starts_with("CONSTANT") {
        let text = match attrs.get("value") {
            Some(Value::String(s)) => s.clone(),
            Some(v) => display_value(v),
            None => String::new(),
        };
        let text = text.replace('\n', " ");
        let text = text.trim();
        let head: String = text.chars().take(LABEL_MAX_CHARS).collect();
        let tail = if text.chars().count() > LABEL_MAX_CHARS { "…" } else { "" };
        return format!("Const {head}{tail}");
    }
    if upper == "INPUT" || upper == "OUTPUT" {
        if let Some(name) = attrs.get("name").and_then(Value::as_str).filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        return type_name.to_string();
    }
    if type_name.is_empty() {
        "node".to_string()
    } else {
        type_name.to_string()
    }
}

/// JSON with spaces after separators, for human-facing labels.
fn display_value(v: &Value) -> String {
    match v {
        Value::Object(map) => {
            let items: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}: {}", Value::String(k.clone()), display_value(v)))
                .collect();
            format!("{{{}}}", items.join(", "))
        }
        Value::Array(items) => {
            let items: Vec<String> = items.iter().map(display_value).collect();
            format!("[{}]", items.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;
    use crate::dsl::compile_source;
    use std::collections::BTreeSet;

    fn build_str(src: &str) -> IrGraph {
        match compile_source(src) {
            Ok(g) => g,
            Err(errors) => panic!("build failed: {errors:?}"),
        }
    }

    fn build_err(src: &str) -> Vec<DslError> {
        match compile_source(src) {
            Ok(g) => panic!("expected failure, got {g:?}"),
            Err(errors) => errors,
        }
    }

    fn edge_set(g: &IrGraph) -> BTreeSet<(String, String, String, String)> {
        g.edges
            .iter()
            .map(|e| (e.from_node.clone(), e.from_port.clone(), e.to_node.clone(), e.to_port.clone()))
            .collect()
    }

    fn count_type(g: &IrGraph, ty: &str) -> usize {
        g.nodes.iter().filter(|n| n.type_name == ty).count()
    }

    #[test]
    fn ids_come_from_per_type_counters() {
        let g = build_str("a = Add(A=None, B=None)\nb = Add(A=a, B=None)\nc = Compare(A=b)");
        let ids: Vec<&str> = g.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["add_0", "add_1", "compare_0"]);
        assert_eq!(g.nodes[1].inputs, vec!["A", "B"]);
        assert_eq!(g.nodes[0].outputs, vec![AUTO_PORT]);
    }

    #[test]
    fn explicit_id_is_honoured_once() {
        let g = build_str("a = Add(id=\"sum\")\nb = Add(id=\"sum\")");
        assert_eq!(g.nodes[0].id, "sum");
        assert_eq!(g.nodes[1].id, "add_0");
    }

    #[test]
    fn arithmetic_desugars_and_dedups_constants() {
        let src = "x = INPUT(attrs={\"name\": \"x\"})\ny = INPUT(attrs={\"name\": \"y\"})\nz = (x + y) * 2\nw = z * 2";
        let g = build_str(src);
        assert_eq!(count_type(&g, "Add"), 1);
        assert_eq!(count_type(&g, "Multiply"), 2);
        assert_eq!(count_type(&g, "Constant"), 1);
        let into_mul = g.edges.iter().filter(|e| e.to_node == "multiply_0").count();
        assert_eq!(into_mul, 2);
        let constant = g.nodes.iter().find(|n| n.type_name == "Constant").unwrap();
        assert_eq!(constant.label, "Const 2");
        assert_eq!(constant.outputs, vec![CONSTANT_PORT]);
    }

    #[test]
    fn constant_calls_share_the_cache_but_not_across_types() {
        let src = "a = Constant(value=5)\nb = Constant(attrs={\"value\": 5})\nc = Constant(value=\"5\")\nd = Add(A=5, B=c)";
        let g = build_str(src);
        assert_eq!(count_type(&g, "Constant"), 2);
        let a = g.nodes[0].id.clone();
        assert!(g.edges.iter().any(|e| e.from_node == a && e.to_port == "A"));
    }

    #[test]
    fn forward_reference_matches_definition_first() {
        let fwd = build_str("o = OUTPUT(INPUT=v[\"OUT\"])\nv = INPUT(attrs={\"name\": \"v\"})");
        let back = build_str("v = INPUT(attrs={\"name\": \"v\"})\no = OUTPUT(INPUT=v[\"OUT\"])");
        assert_eq!(edge_set(&fwd), edge_set(&back));
        assert_eq!(fwd.nodes.iter().find(|n| n.id == "input_0").unwrap().outputs, vec!["OUT"]);
    }

    #[test]
    fn undefined_name_fails_with_context() {
        let errors = build_err("o = OUTPUT(INPUT=ghost)");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].variable.as_deref(), Some("ghost"));
        assert_eq!(errors[0].node_id.as_deref(), Some("output_0"));
        assert_eq!(errors[0].port.as_deref(), Some("INPUT"));
    }

    #[test]
    fn aliases_carry_their_port() {
        let src = "s = Split(Input=None)\nx = s[\"X\"]\nt = Split(Input=None)[\"Y\"]\no = Add(A=x, B=t)\np = Add(A=later)\nlater = s[\"Z\"]";
        let g = build_str(src);
        let edges = edge_set(&g);
        assert!(edges.contains(&("split_0".into(), "X".into(), "add_0".into(), "A".into())));
        assert!(edges.contains(&("split_1".into(), "Y".into(), "add_0".into(), "B".into())));
        assert!(edges.contains(&("split_0".into(), "Z".into(), "add_1".into(), "A".into())));
    }

    #[test]
    fn chained_comparison_becomes_conjunction() {
        let g = build_str("a = INPUT()\nb = INPUT()\nc = INPUT()\nr = a < b <= c");
        assert_eq!(count_type(&g, "LESS THAN"), 1);
        assert_eq!(count_type(&g, "LESS OR EQUAL"), 1);
        assert_eq!(count_type(&g, "AND"), 1);
        let and = g.nodes.iter().find(|n| n.type_name == "AND").unwrap();
        assert_eq!(g.incoming(&and.id).count(), 2);
    }

    #[test]
    fn boolean_ops_fold_left() {
        let g = build_str("a = INPUT()\nb = INPUT()\nc = INPUT()\nr = a and b or not c");
        assert_eq!(count_type(&g, "AND"), 1);
        assert_eq!(count_type(&g, "OR"), 1);
        assert_eq!(count_type(&g, "NOT"), 1);
        assert_eq!(count_type(&g, "Constant"), 0);
    }

    #[test]
    fn min_and_square_expand() {
        let g = build_str("a = INPUT()\nb = INPUT()\nm = min(a, b)\ns = square(a + 1)");
        assert_eq!(count_type(&g, "Negate"), 3);
        assert_eq!(count_type(&g, "Max"), 1);
        assert_eq!(count_type(&g, "Add"), 1);
        let mul = g.nodes.iter().find(|n| n.type_name == "Multiply").unwrap();
        assert_eq!(mul.inputs, vec!["A", "B"]);
    }

    #[test]
    fn builtin_positional_and_keyword_arguments() {
        let g = build_str("x = INPUT()\nc = clamp(x, Min=0, max=10)\nl = log(x, 2)");
        let clamp = g.nodes.iter().find(|n| n.type_name == "Clamp").unwrap();
        assert_eq!(clamp.inputs, vec!["Input", "Min", "Max"]);
        let log = g.nodes.iter().find(|n| n.type_name == "Logarithm").unwrap();
        assert_eq!(log.inputs, vec!["Value", "Base"]);
    }

    #[test]
    fn positional_arguments_rejected_on_plain_nodes() {
        let errors = build_err("a = Add(1, 2)");
        assert!(errors[0].message.contains("keyword ports only"));
    }

    #[test]
    fn literal_type_errors_raise_immediately() {
        let errors = build_err("a = \"x\" + 1");
        assert_eq!(errors[0].kind, crate::dsl::error::ErrorKind::Type);
        let errors = build_err("v = {\"x\": 1, \"y\": 2, \"z\": 3} * 2");
        assert!(errors[0].message.contains("vectors"));
        let errors = build_err("r = sqrt(\"four\")");
        assert!(errors[0].message.contains("only numbers"));
    }

    #[test]
    fn variable_definitions() {
        let src = "speed = {\"Key\": \"speed\", \"GateDataType\": \"Number\", \"Value\": 1.5}\n{\"Key\": \"name\", \"GateDataType\": \"String\", \"Value\": \"a\"}\ncount = VARIABLE(Value=3)\no = OUTPUT(INPUT=speed)";
        let g = build_str(src);
        assert_eq!(g.variables.len(), 3);
        assert_eq!(g.variables[0].dsl_name.as_deref(), Some("speed"));
        assert!(g.variables[1].dsl_name.is_none());
        assert_eq!(g.variables[2].key, "count");
        assert_eq!(g.variables[2].gate_data_type, "Number");
        assert!(g.variables[2].from_var_call);

        let vars: Vec<&IrNode> = g.nodes.iter().filter(|n| n.kind == NodeKind::Variable).collect();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].dsl_name(), Some("speed"));
        assert_eq!(vars[0].inputs, vec!["Value", "Set"]);
        assert_eq!(vars[1].dsl_name(), Some("count"));
        assert!(g.edges.iter().any(|e| e.from_node == vars[0].id && e.to_node == "output_0"));
    }

    #[test]
    fn labels() {
        let g = build_str("i = INPUT(attrs={\"name\": \"#speed\"})\nc = Add(A=\"a very long string constant value\", label=\"sum\")");
        assert_eq!(g.nodes[0].label, "#speed");
        assert_eq!(g.nodes[1].label, "sum");
        assert_eq!(g.nodes[2].label, "Const a very long string…");
    }

    #[test]
    fn id_base_normalisation() {
        assert_eq!(normalize_id_base("GREATER THAN"), "greaterthan");
        assert_eq!(normalize_id_base("Set_Value"), "set_value");
        assert_eq!(normalize_id_base("+++"), "node");
    }
}
