//! Gate-type inference over the IR graph.
//!
//! Every IR node is a member of a disjoint-set forest. Ports whose rule says
//! "same as the node" are type variables standing for their node's set;
//! everything else is either a fixed type or unconstrained. Edges unify
//! variables, pin variables to fixed types, or (for a fixed Vector) only
//! leave a hint. A set's final type is its fixed type when it has one,
//! otherwise a vote over member defaults.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::catalog::{port_index, ModuleClass, ModuleDescriptor, PortRule, RuleTable};
use crate::dsl::ir::{IrGraph, IrNode};
use crate::lower::Resolution;
use crate::model::{GateType, Vector4};

/// A fixed type that two constraints disagreed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeConflict {
    pub node: String,
    pub kept: GateType,
    pub dropped: GateType,
}

#[derive(Debug, Clone, Default)]
pub struct Inference {
    pub types: HashMap<String, GateType>,
    pub conflicts: Vec<TypeConflict>,
}

impl Inference {
    pub fn get(&self, ir_id: &str) -> Option<GateType> {
        self.types.get(ir_id).copied()
    }
}

/// Gate type implied by a literal constant value.
pub fn literal_type(value: &Value) -> Option<GateType> {
    let is_vector = |v: &Value| match v {
        Value::Object(_) => Vector4::from_value(v).is_some(),
        Value::Array(items) => items.len() >= 3 && items.iter().take(3).all(Value::is_number),
        _ => false,
    };
    match value {
        Value::Number(_) | Value::Bool(_) => Some(GateType::Number),
        Value::String(_) => Some(GateType::String),
        Value::Object(_) if is_vector(value) => Some(GateType::Vector),
        Value::Array(items) => {
            if items.iter().all(|v| v.is_number() || v.is_boolean()) {
                Some(GateType::ArrayNumber)
            } else if items.iter().all(Value::is_string) {
                Some(GateType::ArrayString)
            } else if items.iter().all(is_vector) {
                Some(GateType::ArrayVector)
            } else {
                None
            }
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Input,
    Output,
}

/// Type of one port end: a fixed type, or the type of node `usize`'s set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Term {
    Fixed(GateType),
    Var(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Pin {
    ty: GateType,
    /// Seeded from the node itself (explicit type, literal, variable).
    /// Edge constraints never override a pinned type.
    pinned: bool,
}

struct Forest {
    parent: Vec<usize>,
    rank: Vec<u8>,
    fixed: Vec<Option<Pin>>,
}

impl Forest {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            rank: vec![0; n],
            fixed: vec![None; n],
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while let Some(&p) = self.parent.get(root) {
            if p == root {
                break;
            }
            root = p;
        }
        let mut cur = x;
        while cur != root {
            let Some(slot) = self.parent.get_mut(cur) else { break };
            let next = *slot;
            *slot = root;
            cur = next;
        }
        root
    }

    fn fixed_of(&mut self, x: usize) -> Option<GateType> {
        let r = self.find(x);
        self.fixed.get(r).copied().flatten().map(|p| p.ty)
    }

    /// Fix the type of `x`'s set. On a clash the newer pin wins unless only
    /// the older one is pinned; the replaced type comes back as
    /// `(kept, dropped)` so the caller records a `TypeConflict`.
    fn set_fixed(&mut self, x: usize, pin: Pin) -> Option<(GateType, GateType)> {
        let r = self.find(x);
        let slot = self.fixed.get_mut(r)?;
        let current = *slot;
        match current {
            None => {
                *slot = Some(pin);
                None
            }
            Some(cur) if cur.ty == pin.ty => {
                *slot = Some(Pin {
                    ty: cur.ty,
                    pinned: cur.pinned || pin.pinned,
                });
                None
            }
            Some(cur) if cur.pinned && !pin.pinned => Some((cur.ty, pin.ty)),
            Some(cur) => {
                *slot = Some(pin);
                Some((pin.ty, cur.ty))
            }
        }
    }

    fn union(&mut self, a: usize, b: usize) -> Option<(GateType, GateType)> {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return None;
        }
        let rank = |f: &Self, i: usize| f.rank.get(i).copied().unwrap_or(0);
        if rank(self, ra) < rank(self, rb) {
            std::mem::swap(&mut ra, &mut rb);
        }
        if let Some(p) = self.parent.get_mut(rb) {
            *p = ra;
        }
        if rank(self, ra) == rank(self, rb) {
            if let Some(r) = self.rank.get_mut(ra) {
                *r = r.saturating_add(1);
            }
        }

        let fa = self.fixed.get(ra).copied().flatten();
        let fb = self.fixed.get(rb).copied().flatten();
        let (merged, conflict) = match (fa, fb) {
            (None, other) | (other, None) => (other, None),
            (Some(a), Some(b)) if a.ty == b.ty => (
                Some(Pin {
                    ty: a.ty,
                    pinned: a.pinned || b.pinned,
                }),
                None,
            ),
            (Some(a), Some(b)) if b.pinned && !a.pinned => (Some(b), Some((b.ty, a.ty))),
            (Some(a), Some(b)) => (Some(a), Some((a.ty, b.ty))),
        };
        if let Some(slot) = self.fixed.get_mut(ra) {
            *slot = merged;
        }
        conflict
    }
}

struct Solver<'a, 'c> {
    graph: &'a IrGraph,
    resolution: &'a Resolution<'c>,
    rules: &'a RuleTable,
    port_cutoff: f64,
    index: HashMap<&'a str, usize>,
    defaults: Vec<Option<GateType>>,
    forest: Forest,
    hints: Vec<usize>,
    conflicts: Vec<TypeConflict>,
}

impl<'a, 'c> Solver<'a, 'c> {
    fn new(graph: &'a IrGraph, resolution: &'a Resolution<'c>, rules: &'a RuleTable, port_cutoff: f64) -> Self {
        let n = graph.nodes.len();
        Self {
            graph,
            resolution,
            rules,
            port_cutoff,
            index: graph.nodes.iter().enumerate().map(|(i, n)| (n.id.as_str(), i)).collect(),
            defaults: vec![None; n],
            forest: Forest::new(n),
            hints: vec![0; n],
            conflicts: Vec::new(),
        }
    }

    fn node(&self, i: usize) -> Option<&'a IrNode> {
        self.graph.nodes.get(i)
    }

    fn descriptor(&self, i: usize) -> Option<&'c ModuleDescriptor> {
        self.node(i).and_then(|n| self.resolution.descriptor(&n.id))
    }

    fn record(&mut self, i: usize, conflict: Option<(GateType, GateType)>) {
        let Some((kept, dropped)) = conflict else { return };
        let node = self.node(i).map(|n| n.id.clone()).unwrap_or_default();
        warn!(node = %node, kept = %kept, dropped = %dropped, "conflicting gate types");
        self.conflicts.push(TypeConflict { node, kept, dropped });
    }

    fn pin(&mut self, i: usize, ty: GateType, pinned: bool) {
        let conflict = self.forest.set_fixed(i, Pin { ty, pinned });
        self.record(i, conflict);
    }

    /// Default type of every node, and pins for the ones that know their type.
    fn seed(&mut self) {
        for i in 0..self.graph.nodes.len() {
            let Some(node) = self.node(i) else { continue };
            let class = self.descriptor(i).map(|d| d.class);
            let (ty, pinned) = if let Some(t) = node.explicit_type() {
                (Some(t), true)
            } else {
                match class {
                    Some(ModuleClass::Constant) => (node.value().and_then(literal_type), true),
                    Some(ModuleClass::Variable) => (self.resolution.variable_type(&node.id), true),
                    _ => (self.descriptor(i).and_then(|d| d.gate_type), false),
                }
            };
            if let Some(slot) = self.defaults.get_mut(i) {
                *slot = ty;
            }
            if let (Some(t), true) = (ty, pinned) {
                self.pin(i, t, true);
            }
        }
    }

    fn port_names(&self, i: usize, side: Side) -> Vec<&str> {
        let from_catalog: Vec<&str> = match (self.descriptor(i), side) {
            (Some(d), Side::Input) => d.input_names().collect(),
            (Some(d), Side::Output) => d.output_names().collect(),
            (None, _) => Vec::new(),
        };
        if !from_catalog.is_empty() {
            return from_catalog;
        }
        match (self.node(i), side) {
            (Some(n), Side::Input) => n.inputs.iter().map(String::as_str).collect(),
            (Some(n), Side::Output) => n.outputs.iter().map(String::as_str).collect(),
            (None, _) => Vec::new(),
        }
    }

    fn port_idx(&self, i: usize, side: Side, port: &str) -> Option<usize> {
        let names = self.port_names(i, side);
        if names.is_empty() {
            return None;
        }
        port_index(port, &names, self.port_cutoff).ok()
    }

    fn term(&self, i: usize, side: Side, port: &str) -> Option<Term> {
        let idx = self.port_idx(i, side, port)?;
        let desc = self.descriptor(i)?;
        match desc.class {
            ModuleClass::Input | ModuleClass::Output => return Some(Term::Var(i)),
            ModuleClass::Variable => {
                if side == Side::Input && idx == 1 {
                    return Some(Term::Fixed(GateType::Entity));
                }
                let node = self.node(i)?;
                return self.resolution.variable_type(&node.id).map(Term::Fixed);
            }
            ModuleClass::Constant => return self.defaults.get(i).copied().flatten().map(Term::Fixed),
            ModuleClass::Generic => {}
        }

        let row = desc.catalog_id.as_deref().and_then(|id| self.rules.get(id));
        if let Some(rule) = row.and_then(|r| match side {
            Side::Input => r.input(idx),
            Side::Output => r.output(idx),
        }) {
            return match rule {
                PortRule::Same => Some(Term::Var(i)),
                PortRule::Fixed(t) => Some(Term::Fixed(t)),
                PortRule::Any | PortRule::Element => None,
            };
        }
        let spec = match side {
            Side::Input => desc.inputs.get(idx),
            Side::Output => desc.outputs.get(idx),
        };
        spec.and_then(|p| p.ty).map(Term::Fixed)
    }

    fn constrain_edges(&mut self) {
        let graph = self.graph;
        for edge in &graph.edges {
            let (Some(&from), Some(&to)) = (
                self.index.get(edge.from_node.as_str()),
                self.index.get(edge.to_node.as_str()),
            ) else {
                continue;
            };
            let left = self.term(from, Side::Output, &edge.from_port);
            let right = self.term(to, Side::Input, &edge.to_port);
            match (left, right) {
                (Some(Term::Fixed(a)), Some(Term::Fixed(b))) => {
                    if a != b {
                        debug!(from = %edge.from_node, to = %edge.to_node, %a, %b, "fixed port types differ");
                    }
                }
                (Some(Term::Var(n)), Some(Term::Fixed(t))) | (Some(Term::Fixed(t)), Some(Term::Var(n))) => {
                    if t == GateType::Vector {
                        if let Some(h) = self.hints.get_mut(n) {
                            *h += 1;
                        }
                    } else {
                        self.pin(n, t, false);
                    }
                }
                (Some(Term::Var(a)), Some(Term::Var(b))) => {
                    let conflict = self.forest.union(a, b);
                    self.record(a, conflict);
                }
                _ => {}
            }
        }
    }

    /// The array getter's first output carries the element type of its
    /// array, which no static rule can express.
    fn propagate_array_elements(&mut self) {
        let graph = self.graph;
        for edge in &graph.edges {
            let (Some(&from), Some(&to)) = (
                self.index.get(edge.from_node.as_str()),
                self.index.get(edge.to_node.as_str()),
            ) else {
                continue;
            };
            if self.descriptor(from).map(|d| d.key.as_str()) != Some("arraysget") {
                continue;
            }
            if self.port_idx(from, Side::Output, &edge.from_port) != Some(0) {
                continue;
            }
            let array = self
                .forest
                .fixed_of(from)
                .or_else(|| self.defaults.get(from).copied().flatten());
            let Some(element) = array.and_then(GateType::element) else {
                continue;
            };
            if let Some(Term::Var(n)) = self.term(to, Side::Input, &edge.to_port) {
                debug!(getter = %edge.from_node, target = %edge.to_node, %element, "array element type");
                self.pin(n, element, false);
            }
        }
    }

    fn finish(mut self) -> Inference {
        let n = self.graph.nodes.len();
        let mut groups: IndexMap<usize, Vec<usize>> = IndexMap::new();
        for i in 0..n {
            let root = self.forest.find(i);
            groups.entry(root).or_default().push(i);
        }

        let mut types = HashMap::new();
        for (root, members) in &groups {
            let chosen = match self.forest.fixed.get(*root).copied().flatten() {
                Some(pin) => Some(pin.ty),
                None => vote(members.iter().map(|&m| {
                    (
                        self.defaults.get(m).copied().flatten(),
                        self.hints.get(m).copied().unwrap_or(0),
                    )
                })),
            };
            let Some(ty) = chosen else { continue };
            for &m in members {
                if let Some(node) = self.graph.nodes.get(m) {
                    types.insert(node.id.clone(), ty);
                }
            }
        }
        Inference {
            types,
            conflicts: self.conflicts,
        }
    }
}

/// Majority over member defaults, with vector hints counted as extra
/// Vector votes. Vector wins ties; other ties go to the first type seen.
fn vote(members: impl Iterator<Item = (Option<GateType>, usize)>) -> Option<GateType> {
    let mut counts: IndexMap<GateType, usize> = IndexMap::new();
    let mut hints = 0;
    for (default, hint) in members {
        if let Some(t) = default {
            *counts.entry(t).or_insert(0) += 1;
        }
        hints += hint;
    }
    if hints > 0 {
        *counts.entry(GateType::Vector).or_insert(0) += hints;
    }
    let best = counts.values().copied().max()?;
    if counts.get(&GateType::Vector) == Some(&best) {
        return Some(GateType::Vector);
    }
    counts.into_iter().find(|&(_, c)| c == best).map(|(t, _)| t)
}

/// Infer a gate type for every IR node that can be typed.
pub fn infer(graph: &IrGraph, resolution: &Resolution<'_>, rules: &RuleTable, port_cutoff: f64) -> Inference {
    let mut solver = Solver::new(graph, resolution, rules, port_cutoff);
    solver.seed();
    solver.constrain_edges();
    solver.propagate_array_elements();
    let inference = solver.finish();
    info!(
        typed = inference.types.len(),
        nodes = graph.nodes.len(),
        conflicts = inference.conflicts.len(),
        "inferred gate types"
    );
    inference
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::catalog::ModuleCatalog;
    use crate::dsl::compile_source;
    use crate::lower::resolve;
    use serde_json::json;

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::from_json(json!({
            "1": {
                "source_info": {"chip_names_friendly_name": "Add", "allmod_viewmodel": "AddNodeViewModel"},
                "inputs": [{"name": "A", "type": "any"}, {"name": "B", "type": "any"}],
                "outputs": [{"name": "Sum", "type": "any"}],
                "gate_data_type": 2
            },
            "2": {
                "source_info": {"chip_names_friendly_name": "Push", "allmod_viewmodel": "PushViewModel"},
                "inputs": [{"name": "Direction", "type": "Vector"}],
                "outputs": []
            },
            "3": {
                "source_info": {"chip_names_friendly_name": "Concat", "allmod_viewmodel": "ConcatViewModel"},
                "inputs": [{"name": "A", "type": "String"}, {"name": "B", "type": "String"}],
                "outputs": [{"name": "Out", "type": "String"}]
            },
            "4": {
                "source_info": {"chip_names_friendly_name": "ArraysGet", "allmod_viewmodel": "ArraysGetViewModel"},
                "inputs": [{"name": "Array"}, {"name": "Index"}],
                "outputs": [{"name": "Element"}],
                "gate_data_type": 128
            }
        }))
        .unwrap()
    }

    fn rules() -> RuleTable {
        RuleTable::from_json(json!({
            "1": {"inputs": ["same", "same"], "outputs": ["same"]},
            "4": {"module_name": "ArraysGet", "inputs": ["same", 2], "outputs": ["element"]}
        }))
        .unwrap()
    }

    fn run(src: &str) -> (IrGraph, Inference) {
        let graph = compile_source(src).unwrap();
        let catalog = catalog();
        let res = resolve(&graph, &catalog, 0.1).unwrap();
        let inference = infer(&graph, &res, &rules(), 0.4);
        (graph, inference)
    }

    fn id_of<'g>(graph: &'g IrGraph, type_name: &str) -> Vec<&'g str> {
        graph
            .nodes
            .iter()
            .filter(|n| n.type_name.eq_ignore_ascii_case(type_name))
            .map(|n| n.id.as_str())
            .collect()
    }

    #[test]
    fn explicit_type_flows_through_same_ports() {
        let (g, inf) = run(r#"a = INPUT(attrs={"data_type": "Vector"})
s = Add(A=a, B=INPUT())
o = OUTPUT(Number=s)"#);
        for id in id_of(&g, "Add").into_iter().chain(id_of(&g, "OUTPUT")).chain(id_of(&g, "INPUT")) {
            assert_eq!(inf.get(id), Some(GateType::Vector), "{id}");
        }
    }

    #[test]
    fn fixed_port_pins_the_upstream_set() {
        let (g, inf) = run("c = Concat(A=INPUT(), B=INPUT())");
        for id in id_of(&g, "INPUT") {
            assert_eq!(inf.get(id), Some(GateType::String));
        }
    }

    #[test]
    fn vector_port_is_only_a_hint() {
        let (g, inf) = run("s = Add(A=Add(A=INPUT(), B=INPUT()), B=INPUT())\nPush(Direction=s)");
        for id in id_of(&g, "Add") {
            assert_eq!(inf.get(id), Some(GateType::Number));
        }

        let (g, inf) = run("x = INPUT()\nPush(Direction=x)");
        assert_eq!(inf.get(id_of(&g, "INPUT")[0]), Some(GateType::Vector));
    }

    #[test]
    fn connected_same_ports_share_a_type() {
        let (g, inf) = run("s = Add(A=INPUT(), B=5)\no = OUTPUT(Number=s)");
        let add = inf.get(id_of(&g, "Add")[0]);
        let out = inf.get(id_of(&g, "OUTPUT")[0]);
        assert_eq!(add, Some(GateType::Number));
        assert_eq!(add, out);
    }

    #[test]
    fn array_getter_feeds_element_type_downstream() {
        let (g, inf) = run(r#"arr = ArraysGet(Array=INPUT(attrs={"data_type": "ArrayString"}), Index=0)
o = OUTPUT(Number=arr)"#);
        assert_eq!(inf.get(id_of(&g, "OUTPUT")[0]), Some(GateType::String));
        assert_eq!(inf.get(id_of(&g, "ArraysGet")[0]), Some(GateType::ArrayString));
    }

    #[test]
    fn pinned_types_survive_edge_constraints() {
        let (g, inf) = run(r#"a = INPUT(attrs={"data_type": "Number"})
c = Concat(A=a, B="x")"#);
        assert_eq!(inf.get(id_of(&g, "INPUT")[0]), Some(GateType::Number));
        assert_eq!(inf.conflicts.len(), 1);
        assert_eq!(inf.conflicts[0].kept, GateType::Number);
        assert_eq!(inf.conflicts[0].dropped, GateType::String);
    }

    #[test]
    fn vote_prefers_vector_on_ties() {
        let v = vote([(Some(GateType::Number), 0), (Some(GateType::String), 0)].into_iter());
        assert_eq!(v, Some(GateType::Number));
        let v = vote([(Some(GateType::Number), 1)].into_iter());
        assert_eq!(v, Some(GateType::Vector));
        assert_eq!(vote([(None, 0)].into_iter()), None);
    }

    #[test]
    fn later_pin_wins_unless_only_the_earlier_is_pinned() {
        let pin = |ty, pinned| Pin { ty, pinned };
        let mut forest = Forest::new(3);
        assert_eq!(forest.set_fixed(0, pin(GateType::Number, false)), None);
        assert_eq!(
            forest.set_fixed(0, pin(GateType::String, false)),
            Some((GateType::String, GateType::Number))
        );
        assert_eq!(forest.fixed_of(0), Some(GateType::String));

        forest.set_fixed(1, pin(GateType::Vector, true));
        assert_eq!(
            forest.set_fixed(1, pin(GateType::Number, false)),
            Some((GateType::Vector, GateType::Number))
        );
        assert_eq!(forest.fixed_of(1), Some(GateType::Vector));

        forest.set_fixed(2, pin(GateType::Vector, true));
        assert_eq!(
            forest.set_fixed(2, pin(GateType::String, true)),
            Some((GateType::String, GateType::Vector))
        );
        assert_eq!(forest.fixed_of(2), Some(GateType::String));
    }

    #[test]
    fn literal_shapes() {
        assert_eq!(literal_type(&json!(1.5)), Some(GateType::Number));
        assert_eq!(literal_type(&json!({"x": 1, "y": 2, "z": 3})), Some(GateType::Vector));
        assert_eq!(literal_type(&json!([1, 2])), Some(GateType::ArrayNumber));
        assert_eq!(literal_type(&json!(["a"])), Some(GateType::ArrayString));
        assert_eq!(literal_type(&json!([[1, 2, 3], {"x": 0, "y": 0, "z": 0}])), Some(GateType::ArrayVector));
        assert_eq!(literal_type(&json!([1, "a"])), None);
        assert_eq!(literal_type(&json!([])), Some(GateType::ArrayNumber));
    }
}
