//! Module resolution: one catalog descriptor per IR node, plus the variable
//! definition every VARIABLE node belongs to.

use std::collections::{HashMap, HashSet};

use tracing::{debug, warn};

use crate::catalog::{ModuleCatalog, ModuleClass, ModuleDescriptor};
use crate::dsl::ir::{IrGraph, NodeKind, VariableDef};
use crate::error::{CompileError, Result};
use crate::model::GateType;

/// Which definition a VARIABLE node instantiates.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableBinding {
    pub key: String,
    pub gate_type: GateType,
    /// First instance of its key, named bindings before fallbacks. Only this
    /// one seeds the stored value.
    pub seeds_value: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedNode<'c> {
    pub ir_id: String,
    pub descriptor: &'c ModuleDescriptor,
    pub variable: Option<VariableBinding>,
}

impl ResolvedNode<'_> {
    pub fn class(&self) -> ModuleClass {
        self.descriptor.class
    }
}

/// Resolver output, in IR node order.
#[derive(Debug, Clone)]
pub struct Resolution<'c> {
    pub nodes: Vec<ResolvedNode<'c>>,
    /// Definitions no VARIABLE node claimed; each still gets a node.
    pub orphans: Vec<VariableDef>,
    index: HashMap<String, usize>,
}

impl<'c> Resolution<'c> {
    pub fn get(&self, ir_id: &str) -> Option<&ResolvedNode<'c>> {
        self.index.get(ir_id).and_then(|&i| self.nodes.get(i))
    }

    pub fn descriptor(&self, ir_id: &str) -> Option<&'c ModuleDescriptor> {
        self.get(ir_id).map(|n| n.descriptor)
    }

    pub fn variable_type(&self, ir_id: &str) -> Option<GateType> {
        self.get(ir_id).and_then(|n| n.variable.as_ref()).map(|v| v.gate_type)
    }

    /// Nodes the document will contain: every IR node plus one per orphan.
    pub fn expected_nodes(&self) -> usize {
        self.nodes.len() + self.orphans.len()
    }
}

fn definition_type(def: &VariableDef) -> Result<GateType> {
    def.gate_type().ok_or_else(|| {
        CompileError::resolver(format!(
            "variable '{}' declares unknown GateDataType '{}'",
            def.key, def.gate_data_type
        ))
        .with_variable(&def.key)
    })
}

/// Match every IR node against the catalog and bind VARIABLE nodes to their
/// definitions.
pub fn resolve<'c>(graph: &IrGraph, catalog: &'c ModuleCatalog, cutoff: f64) -> Result<Resolution<'c>> {
    let mut nodes = Vec::with_capacity(graph.nodes.len());
    let mut index = HashMap::new();
    for node in &graph.nodes {
        let descriptor = catalog.require(&node.type_name, &node.id, cutoff)?;
        if descriptor.class == ModuleClass::Generic && node.kind != NodeKind::Generic {
            warn!(node = %node.id, module = %descriptor.friendly_name, "special node matched a generic module");
        }
        debug!(node = %node.id, module = %descriptor.friendly_name, "resolved module");
        index.insert(node.id.clone(), nodes.len());
        nodes.push(ResolvedNode {
            ir_id: node.id.clone(),
            descriptor,
            variable: None,
        });
    }

    let keys = bind_variable_keys(graph, &nodes);

    let defs: HashMap<&str, &VariableDef> = graph.variables.iter().map(|d| (d.key.as_str(), d)).collect();
    let mut bound: Vec<Option<String>> = vec![None; nodes.len()];
    let mut fallback = vec![false; nodes.len()];
    let mut used: HashSet<String> = HashSet::new();

    for (slot, resolved) in bound.iter_mut().zip(&nodes) {
        if resolved.class() != ModuleClass::Variable {
            continue;
        }
        if let Some(k) = keys.get(resolved.ir_id.as_str()).filter(|k| defs.contains_key(k.as_str())) {
            used.insert(k.clone());
            *slot = Some(k.clone());
        }
    }

    // Nodes without a key of their own take the first definition no node names.
    for ((slot, is_fallback), resolved) in bound.iter_mut().zip(fallback.iter_mut()).zip(&nodes) {
        if resolved.class() != ModuleClass::Variable || slot.is_some() {
            continue;
        }
        let key = graph
            .variables
            .iter()
            .map(|d| d.key.as_str())
            .find(|k| !used.contains(*k))
            .map(str::to_string)
            .ok_or_else(|| {
                CompileError::resolver(
                    "VARIABLE node has no matching variable definition left; declare one as \
                     {\"Key\": ..., \"GateDataType\": ..., \"Value\": ...}",
                )
                .with_node(&resolved.ir_id)
                .with_node_type("VARIABLE")
            })?;
        used.insert(key.clone());
        *slot = Some(key);
        *is_fallback = true;
    }

    // Named bindings count first, so the node that names a key seeds it.
    let mut order: Vec<usize> = (0..nodes.len()).collect();
    order.sort_by_key(|&i| fallback.get(i).copied().unwrap_or(false));
    let mut instances: HashMap<String, usize> = HashMap::new();
    for i in order {
        let (Some(resolved), Some(Some(key))) = (nodes.get_mut(i), bound.get(i)) else {
            continue;
        };
        let def = defs
            .get(key.as_str())
            .ok_or_else(|| CompileError::resolver(format!("variable '{key}' vanished")).with_variable(key))?;
        let count = instances.entry(key.clone()).or_insert(0);
        *count += 1;
        debug!(node = %resolved.ir_id, key = %key, instance = *count, "bound variable node");
        resolved.variable = Some(VariableBinding {
            key: key.clone(),
            gate_type: definition_type(def)?,
            seeds_value: *count == 1,
        });
    }

    let mut orphans = Vec::new();
    for def in &graph.variables {
        if !used.contains(&def.key) {
            definition_type(def)?;
            debug!(key = %def.key, "variable definition has no node; adding one");
            orphans.push(def.clone());
        }
    }

    Ok(Resolution { nodes, orphans, index })
}

/// Variable key per VARIABLE node, by DSL name, then by a string constant on
/// the `Value` input, then inherited from an upstream VARIABLE node.
fn bind_variable_keys(graph: &IrGraph, nodes: &[ResolvedNode<'_>]) -> HashMap<String, String> {
    let is_variable: HashSet<&str> = nodes
        .iter()
        .filter(|n| n.class() == ModuleClass::Variable)
        .map(|n| n.ir_id.as_str())
        .collect();
    let def_keys: HashSet<&str> = graph.variables.iter().map(|d| d.key.as_str()).collect();
    let by_dsl_name: HashMap<&str, &str> = graph
        .variables
        .iter()
        .filter_map(|d| d.dsl_name.as_deref().map(|n| (n, d.key.as_str())))
        .collect();

    let mut keys: HashMap<String, String> = HashMap::new();
    for node in graph.nodes.iter().filter(|n| is_variable.contains(n.id.as_str())) {
        if let Some(key) = node.dsl_name().and_then(|n| by_dsl_name.get(n)) {
            keys.insert(node.id.clone(), (*key).to_string());
        }
    }

    let value_sources = |id: &str| {
        graph
            .incoming(id)
            .filter(|e| e.to_port == "Value")
            .filter_map(|e| graph.node(&e.from_node))
            .collect::<Vec<_>>()
    };

    for node in graph.nodes.iter().filter(|n| is_variable.contains(n.id.as_str())) {
        if keys.contains_key(&node.id) {
            continue;
        }
        let key = value_sources(&node.id).into_iter().find_map(|up| {
            (up.kind == NodeKind::Constant)
                .then(|| up.value().and_then(|v| v.as_str()))
                .flatten()
                .filter(|k| def_keys.contains(k))
        });
        if let Some(key) = key {
            keys.insert(node.id.clone(), key.to_string());
        }
    }

    let mut changed = true;
    while changed {
        changed = false;
        for node in graph.nodes.iter().filter(|n| is_variable.contains(n.id.as_str())) {
            if keys.contains_key(&node.id) {
                continue;
            }
            let inherited = value_sources(&node.id)
                .into_iter()
                .filter(|up| is_variable.contains(up.id.as_str()))
                .find_map(|up| keys.get(&up.id).cloned());
            if let Some(key) = inherited {
                keys.insert(node.id.clone(), key);
                changed = true;
            }
        }
    }
    keys
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::dsl::compile_source;
    use serde_json::json;

    pub(crate) fn catalog() -> ModuleCatalog {
        ModuleCatalog::from_json(json!({
            "1": {
                "source_info": {"chip_names_friendly_name": "Add", "allmod_viewmodel": "AddNodeViewModel"},
                "inputs": [{"name": "A"}, {"name": "B"}],
                "outputs": [{"name": "Sum"}],
                "gate_data_type": 2
            }
        }))
        .unwrap()
    }

    #[test]
    fn unknown_type_names_the_node() {
        let graph = compile_source("q = QQQQ(A=1)").unwrap();
        let err = resolve(&graph, &catalog(), 0.1).unwrap_err();
        assert_eq!(err.context.node_type.as_deref(), Some("QQQQ"));
        assert_eq!(err.context.node_id.as_deref(), Some("qqqq_0"));
    }

    #[test]
    fn variables_bind_by_name_then_first_unused() {
        let src = r#"
speed = {"Key": "speed", "GateDataType": "Number", "Value": 3}
label = {"Key": "label", "GateDataType": "String", "Value": "hi"}
s2 = VARIABLE(Value=speed)
other = VARIABLE(Value=2)
"#;
        let graph = compile_source(src).unwrap();
        let cat = catalog();
        let res = resolve(&graph, &cat, 0.1).unwrap();
        let bindings: Vec<_> = res
            .nodes
            .iter()
            .filter_map(|n| n.variable.as_ref().map(|v| (v.key.as_str(), v.seeds_value)))
            .collect();
        assert!(bindings.contains(&("speed", true)));
        assert!(bindings.contains(&("speed", false)));
        assert!(bindings.contains(&("label", true)));
        assert!(res.orphans.is_empty());
    }

    #[test]
    fn unnamed_variable_skips_keys_named_later() {
        let src = r#"
VARIABLE(Value=1)
speed = {"Key": "speed", "GateDataType": "Number", "Value": 3}
{"Key": "label", "GateDataType": "String", "Value": "hi"}
"#;
        let graph = compile_source(src).unwrap();
        let cat = catalog();
        let res = resolve(&graph, &cat, 0.1).unwrap();
        let bindings: Vec<_> = res
            .nodes
            .iter()
            .filter_map(|n| n.variable.as_ref().map(|v| (n.ir_id.as_str(), v.key.as_str(), v.seeds_value)))
            .collect();
        assert_eq!(bindings.len(), 2);
        let named = graph.nodes.iter().find(|n| n.dsl_name() == Some("speed")).unwrap();
        assert!(bindings.contains(&(named.id.as_str(), "speed", true)));
        assert!(bindings.iter().any(|&(id, key, seeds)| id != named.id && key == "label" && seeds));
        assert!(res.orphans.is_empty());
    }

    #[test]
    fn unclaimed_definitions_become_orphans() {
        let src = r#"{"Key": "hp", "GateDataType": "Number", "Value": 10}"#;
        let graph = compile_source(src).unwrap();
        let cat = catalog();
        let res = resolve(&graph, &cat, 0.1).unwrap();
        assert_eq!(res.orphans.len(), 1);
        assert_eq!(res.expected_nodes(), graph.nodes.len() + 1);
    }

    #[test]
    fn variable_without_definition_fails() {
        let mut graph = compile_source("v = VARIABLE(Value=1)").unwrap();
        graph.variables.clear();
        let err = resolve(&graph, &catalog(), 0.1).unwrap_err();
        assert_eq!(err.stage, crate::error::Stage::ModuleResolver);
    }
}
