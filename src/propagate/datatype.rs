//! Gate-type pass: retype lowered nodes whose explicit or inferred type
//! differs from what lowering gave them, and mirror I/O changes into the
//! side tables in the same edit.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, warn};

use crate::catalog::{normalize, ModuleClass, ModuleDescriptor, PortRule, RuleTable};
use crate::dsl::ir::IrGraph;
use crate::error::{CompileError, Result};
use crate::infer::Inference;
use crate::lower::NodeMap;
use crate::model::node::normalize_node_id;
use crate::model::payload;
use crate::model::{ChipDocument, GateType, LoweredNode, OpSchema};

/// One node to retype.
#[derive(Debug, Clone)]
pub struct Retype<'c> {
    pub ir_id: String,
    pub lowered_id: String,
    pub gate_type: GateType,
    pub descriptor: &'c ModuleDescriptor,
}

/// Target type per IR node: explicit first, inferred otherwise. Constants,
/// variables and modules that forbid retyping are left alone.
pub fn plan<'c>(graph: &IrGraph, inference: &Inference, nodes: &NodeMap<'c>) -> Vec<Retype<'c>> {
    let mut out = Vec::new();
    for node in &graph.nodes {
        let explicit = node.explicit_type();
        let Some(gate_type) = explicit.or_else(|| inference.get(&node.id)) else {
            continue;
        };
        let Some(lowered) = nodes.get(&node.id) else {
            if explicit.is_some() {
                warn!(node = %node.id, "explicit data type on a node that was not lowered");
            }
            continue;
        };
        let desc = lowered.descriptor;
        if matches!(desc.class, ModuleClass::Constant | ModuleClass::Variable) || !desc.can_modify_data_type {
            continue;
        }
        out.push(Retype {
            ir_id: node.id.clone(),
            lowered_id: lowered.lowered_id.clone(),
            gate_type,
            descriptor: desc,
        });
    }
    out
}

fn looks_like_index(port: &str) -> bool {
    normalize(port).contains("index")
}

/// Type for port `idx` under `rule`, or `None` to leave it untouched.
fn port_type(rule: PortRule, ty: GateType, name: Option<&str>) -> Option<GateType> {
    match rule {
        PortRule::Same if ty.is_array() && name.is_some_and(looks_like_index) => Some(GateType::Number),
        PortRule::Any => None,
        other => other.resolve(ty),
    }
}

fn retype_generic(node: &mut LoweredNode, step: &Retype<'_>, rules: &RuleTable, schema: OpSchema) {
    let ty = step.gate_type;
    node.gate_data_type = Some(ty.encode(schema));
    node.save_data = payload::default_save_data(ty);

    let row = step.descriptor.catalog_id.as_deref().and_then(|id| rules.get(id));
    let Some(row) = row else {
        debug!(node = %step.ir_id, "no rule row; every port follows the node");
        node.retype_all(ty, schema);
        return;
    };
    for (i, port) in node.inputs.iter_mut().enumerate() {
        let name = step.descriptor.inputs.get(i).map(|p| p.name.as_str());
        if let Some(t) = row.input(i).and_then(|r| port_type(r, ty, name)) {
            port.data_type = Some(t.encode(schema));
        }
    }
    for (i, port) in node.outputs.iter_mut().enumerate() {
        let name = step.descriptor.outputs.get(i).map(|p| p.name.as_str());
        if let Some(t) = row.output(i).and_then(|r| port_type(r, ty, name)) {
            port.data_type = Some(t.encode(schema));
        }
    }
}

/// Apply the plan. Returns how many nodes changed. A retyped I/O node with
/// no side-table row is an error.
pub fn apply(doc: &mut ChipDocument, plan: &[Retype<'_>], rules: &RuleTable) -> Result<usize> {
    let schema = doc.schema();
    let mut mirror: HashMap<String, GateType> = HashMap::new();
    let mut changed = 0;

    for step in plan {
        let key = normalize_node_id(&step.lowered_id);
        let idx = doc.node_index(&key).ok_or_else(|| {
            CompileError::propagation("lowered node disappeared before retyping").with_node(&step.ir_id)
        })?;
        let Some(node) = doc.graph.nodes.get_mut(idx) else {
            continue;
        };
        if node.gate_type() == Some(step.gate_type) {
            continue;
        }
        debug!(node = %step.ir_id, from = ?node.gate_type(), to = %step.gate_type, "retyping node");
        if let Some(conn) = &node.mechanic_connection_id {
            mirror.insert(conn.clone(), step.gate_type);
        }
        match step.descriptor.class {
            ModuleClass::Input | ModuleClass::Output => node.retype_all(step.gate_type, schema),
            _ => retype_generic(node, step, rules, schema),
        }
        changed += 1;
    }

    let mut mirrored = 0;
    let mut found: HashSet<String> = HashSet::new();
    for entry in doc.inputs.iter_mut().chain(doc.outputs.iter_mut()) {
        if let Some(&ty) = mirror.get(&entry.key) {
            entry.gate_data_type = Some(ty.encode(schema));
            entry.serialized_value = payload::default_io_value(ty);
            found.insert(entry.key.clone());
            mirrored += 1;
        }
    }
    for (_, inputs) in &mut doc.mechanics {
        for item in inputs.iter_mut() {
            if let Some(&ty) = mirror.get(&item.key) {
                item.data_type = Some(ty.encode(schema));
                item.gate_data = payload::default_gate_data(ty);
                found.insert(item.key.clone());
                mirrored += 1;
            }
        }
    }
    let mut missing: Vec<&str> = mirror.keys().filter(|k| !found.contains(*k)).map(String::as_str).collect();
    missing.sort_unstable();
    if let Some(&first) = missing.first() {
        let keys = missing.join(", ");
        return Err(CompileError::propagation(format!(
            "retyped I/O node has no side-table row: {keys}"
        ))
        .with_node(first));
    }
    info!(nodes = changed, rows = mirrored, "propagated gate types");
    Ok(changed)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::catalog::ModuleCatalog;
    use crate::dsl::compile_source;
    use crate::error::Stage;
    use crate::infer::infer;
    use crate::lower::{instantiate, resolve};
    use crate::model::{GateValue, MechanicInput, SaveDocument};
    use serde_json::{json, Map};

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::from_json(json!({
            "10": {
                "source_info": {"chip_names_friendly_name": "Add", "allmod_viewmodel": "AddNodeViewModel"},
                "inputs": [{"name": "A"}, {"name": "B"}],
                "outputs": [{"name": "Sum"}],
                "gate_data_type": 2
            },
            "11": {
                "source_info": {"chip_names_friendly_name": "ArraysGet", "allmod_viewmodel": "ArraysGetViewModel"},
                "inputs": [{"name": "Array"}, {"name": "Index"}],
                "outputs": [{"name": "Element"}],
                "gate_data_type": 128
            },
            "12": {
                "source_info": {"chip_names_friendly_name": "Locked", "allmod_viewmodel": "LockedViewModel"},
                "inputs": [{"name": "A"}],
                "outputs": [{"name": "B"}],
                "gate_data_type": 2,
                "can_modify_data_type": false
            }
        }))
        .unwrap()
    }

    fn rules() -> RuleTable {
        RuleTable::from_json(json!({
            "10": {"inputs": ["same", "same"], "outputs": ["same"]},
            "11": {"inputs": ["same", "same"], "outputs": ["element"]}
        }))
        .unwrap()
    }

    fn run(src: &str) -> ChipDocument {
        let graph = compile_source(src).unwrap();
        let catalog = catalog();
        let res = resolve(&graph, &catalog, 0.1).unwrap();
        let inference = infer(&graph, &res, &rules(), 0.4);
        let mut doc = SaveDocument::from_value(json!({"saveObjectContainers": [{"saveObjects": {}}]}))
            .unwrap()
            .unpack(Stage::Propagation)
            .unwrap();
        let map = instantiate(&mut doc, &graph, &res, catalog.get("variable").unwrap()).unwrap();
        doc.mechanics.push((
            0,
            doc.inputs
                .iter()
                .map(|e| MechanicInput {
                    key: e.key.clone(),
                    data_type: Some(GateValue::Code(2)),
                    gate_data: None,
                    extra: Map::new(),
                })
                .collect(),
        ));
        let steps = plan(&graph, &inference, &map);
        apply(&mut doc, &steps, &rules()).unwrap();
        doc
    }

    fn node<'d>(doc: &'d ChipDocument, view_model: &str) -> &'d LoweredNode {
        doc.graph.nodes.iter().find(|n| n.id.starts_with(view_model)).unwrap()
    }

    #[test]
    fn io_retype_is_mirrored() {
        let doc = run(r#"v = INPUT(attrs={"data_type": "Vector"})
s = Add(A=v, B=v)"#);
        let root = node(&doc, "RootNodeViewModel");
        assert_eq!(root.gate_data_type, Some(GateValue::Code(8)));
        assert_eq!(root.outputs[0].data_type, Some(GateValue::Code(8)));
        assert_eq!(doc.inputs[0].gate_data_type, Some(GateValue::Code(8)));
        assert!(doc.inputs[0].serialized_value.as_deref().unwrap().contains("\"Default\""));
        let mech = &doc.mechanics[0].1[0];
        assert_eq!(mech.data_type, Some(GateValue::Code(8)));
        assert!(mech.gate_data.as_deref().unwrap().contains("MaxVector"));

        let add = node(&doc, "AddNodeViewModel");
        assert_eq!(add.gate_data_type, Some(GateValue::Code(8)));
        assert!(add.inputs.iter().all(|p| p.data_type == Some(GateValue::Code(8))));
        assert!(add.save_data.as_deref().unwrap().contains("sqrMagnitude"));
    }

    #[test]
    fn retype_without_side_table_row_fails() {
        let graph = compile_source(r#"v = INPUT(attrs={"data_type": "Vector"})
s = Add(A=v, B=v)"#)
        .unwrap();
        let catalog = catalog();
        let res = resolve(&graph, &catalog, 0.1).unwrap();
        let inference = infer(&graph, &res, &rules(), 0.4);
        let mut doc = SaveDocument::from_value(json!({"saveObjectContainers": [{"saveObjects": {}}]}))
            .unwrap()
            .unpack(Stage::Propagation)
            .unwrap();
        let map = instantiate(&mut doc, &graph, &res, catalog.get("variable").unwrap()).unwrap();
        let key = doc.inputs[0].key.clone();
        doc.inputs.clear();
        let steps = plan(&graph, &inference, &map);
        let err = apply(&mut doc, &steps, &rules()).unwrap_err();
        assert_eq!(err.stage, Stage::Propagation);
        assert!(err.to_string().contains(&key), "{err}");
    }

    #[test]
    fn array_index_ports_stay_numeric() {
        let doc = run(r#"g = ArraysGet(Array=INPUT(attrs={"data_type": "ArrayVector"}), Index=INPUT())"#);
        let get = node(&doc, "ArraysGetViewModel");
        assert_eq!(get.gate_data_type, Some(GateValue::Code(512)));
        assert_eq!(get.inputs[0].data_type, Some(GateValue::Code(512)));
        assert_eq!(get.inputs[1].data_type, Some(GateValue::Code(2)));
        assert_eq!(get.outputs[0].data_type, Some(GateValue::Code(8)));
        assert_eq!(get.save_data, None);
    }

    #[test]
    fn unchanged_and_locked_nodes_are_skipped() {
        let graph = compile_source(r#"l = Locked(A=INPUT(attrs={"data_type": "String"}))"#).unwrap();
        let catalog = catalog();
        let res = resolve(&graph, &catalog, 0.1).unwrap();
        let inference = infer(&graph, &res, &rules(), 0.4);
        let mut doc = SaveDocument::from_value(json!({"saveObjectContainers": [{"saveObjects": {}}]}))
            .unwrap()
            .unpack(Stage::Propagation)
            .unwrap();
        let map = instantiate(&mut doc, &graph, &res, catalog.get("variable").unwrap()).unwrap();
        let steps = plan(&graph, &inference, &map);
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].descriptor.class, ModuleClass::Input);
        assert_eq!(apply(&mut doc, &steps, &rules()).unwrap(), 1);
        assert_eq!(apply(&mut doc, &steps, &rules()).unwrap(), 0);
    }
}
