//! Intermediate representation produced by the front end: named nodes,
//! port-to-port edges and variable definitions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::catalog::normalize;
use crate::model::GateType;

/// Syntactic category of an IR node, decided from its type name. The module
/// resolver makes the final call after fuzzy matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Input,
    Output,
    Constant,
    Variable,
    Generic,
}

impl NodeKind {
    pub fn of(type_name: &str) -> Self {
        match normalize(type_name).as_str() {
            "input" => NodeKind::Input,
            "output" => NodeKind::Output,
            "constant" => NodeKind::Constant,
            "variable" => NodeKind::Variable,
            _ => NodeKind::Generic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrNode {
    pub id: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub kind: NodeKind,
    pub label: String,
    pub attrs: Map<String, Value>,
    /// Input ports in first-mention order.
    pub inputs: Vec<String>,
    /// Output ports referenced by outgoing edges, sorted.
    pub outputs: Vec<String>,
}

impl IrNode {
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).and_then(Value::as_str)
    }

    /// Constant payload, if any.
    pub fn value(&self) -> Option<&Value> {
        self.attrs.get("value")
    }

    /// Explicit gate type from `data_type` or `datatype`.
    pub fn explicit_type(&self) -> Option<GateType> {
        let raw = self.attrs.get("data_type").or_else(|| self.attrs.get("datatype"))?;
        GateType::from_value(raw)
    }

    /// DSL variable name bound to a VARIABLE node.
    pub fn dsl_name(&self) -> Option<&str> {
        self.attr_str("dsl_name").or_else(|| self.attr_str("var_key"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IrEdge {
    pub from_node: String,
    pub from_port: String,
    pub to_node: String,
    pub to_port: String,
}

/// Port name that means "the node's only port".
pub const AUTO_PORT: &str = "__auto__";

/// A declared chip variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableDef {
    #[serde(rename = "Key")]
    pub key: String,
    /// Declared type name as written.
    #[serde(rename = "GateDataType")]
    pub gate_data_type: String,
    #[serde(rename = "Value")]
    pub value: Value,
    /// Identifier the DSL bound this definition to, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsl_name: Option<String>,
    /// Registered implicitly from `x = VARIABLE(Value=...)`.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub from_var_call: bool,
}

impl VariableDef {
    pub fn gate_type(&self) -> Option<GateType> {
        GateType::from_name(&self.gate_data_type)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IrGraph {
    pub nodes: Vec<IrNode>,
    pub edges: Vec<IrEdge>,
    pub variables: Vec<VariableDef>,
}

impl IrGraph {
    pub fn node(&self, id: &str) -> Option<&IrNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.id == id)
    }

    pub fn incoming<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a IrEdge> + 'a {
        self.edges.iter().filter(move |e| e.to_node == id)
    }

    /// Write each node's sorted set of used output ports.
    pub fn finalize_outputs(&mut self) {
        for node in &mut self.nodes {
            let used: BTreeSet<&str> = self
                .edges
                .iter()
                .filter(|e| e.from_node == node.id)
                .map(|e| e.from_port.as_str())
                .collect();
            node.outputs = used.into_iter().map(str::to_string).collect();
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str, ty: &str) -> IrNode {
        IrNode {
            id: id.into(),
            type_name: ty.into(),
            kind: NodeKind::of(ty),
            label: ty.into(),
            attrs: Map::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    #[test]
    fn kind_from_type_name() {
        assert_eq!(NodeKind::of("INPUT"), NodeKind::Input);
        assert_eq!(NodeKind::of("Variable"), NodeKind::Variable);
        assert_eq!(NodeKind::of("GREATER THAN"), NodeKind::Generic);
    }

    #[test]
    fn explicit_type_reads_either_attr_spelling() {
        let mut n = node("o", "OUTPUT");
        n.attrs.insert("datatype".into(), json!("vector"));
        assert_eq!(n.explicit_type(), Some(GateType::Vector));
        n.attrs.insert("data_type".into(), json!(4));
        assert_eq!(n.explicit_type(), Some(GateType::String));
        n.attrs.insert("data_type".into(), json!(true));
        assert_eq!(n.explicit_type(), None);
    }

    #[test]
    fn finalize_outputs_sorts_and_dedups() {
        let mut g = IrGraph {
            nodes: vec![node("a", "Split"), node("b", "Add")],
            ..IrGraph::default()
        };
        for port in ["Z", "X", "Z"] {
            g.edges.push(IrEdge {
                from_node: "a".into(),
                from_port: port.into(),
                to_node: "b".into(),
                to_port: "A".into(),
            });
        }
        g.finalize_outputs();
        assert_eq!(g.nodes[0].outputs, vec!["X", "Z"]);
        assert!(g.nodes[1].outputs.is_empty());
    }

    #[test]
    fn json_dump_uses_document_field_names() {
        let g = IrGraph {
            nodes: vec![node("n_0", "Add")],
            edges: Vec::new(),
            variables: vec![VariableDef {
                key: "speed".into(),
                gate_data_type: "Number".into(),
                value: json!(1.5),
                dsl_name: None,
                from_var_call: false,
            }],
        };
        let v: Value = serde_json::from_str(&g.to_json_pretty().unwrap()).unwrap();
        assert_eq!(v["nodes"][0]["type"], "Add");
        assert_eq!(v["variables"][0]["Key"], "speed");
        assert!(v["variables"][0].get("dsl_name").is_none());
    }
}
