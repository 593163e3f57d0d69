//! Lowering: turn resolved IR nodes into document nodes and side-table rows.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::resolve::{Resolution, ResolvedNode, VariableBinding};
use crate::catalog::{ModuleClass, ModuleDescriptor, PortSpec};
use crate::dsl::ir::{IrGraph, IrNode, VariableDef};
use crate::error::{CompileError, Result};
use crate::model::node::{input_port_id, node_id, output_port_id};
use crate::model::payload;
use crate::model::{
    ChipDocument, GateType, GateValue, InputPort, IoEntry, LoweredNode, OpCode, OpSchema, OutputPort,
    Position, VariableEntry,
};

const STAGING_X: f64 = 1000.0;
const GENERIC_X: f64 = -120.0;
const STAGING_STEP: f64 = 200.0;

/// Where one IR node ended up in the document.
#[derive(Debug, Clone)]
pub struct LoweredRef<'c> {
    pub lowered_id: String,
    pub descriptor: &'c ModuleDescriptor,
}

/// IR node id to lowered node, in IR order.
#[derive(Debug, Clone, Default)]
pub struct NodeMap<'c> {
    entries: IndexMap<String, LoweredRef<'c>>,
}

impl<'c> NodeMap<'c> {
    pub fn get(&self, ir_id: &str) -> Option<&LoweredRef<'c>> {
        self.entries.get(ir_id)
    }

    pub fn lowered_id(&self, ir_id: &str) -> Option<&str> {
        self.get(ir_id).map(|r| r.lowered_id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LoweredRef<'c>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn guid() -> String {
    Uuid::new_v4().to_string()
}

/// Table key for an I/O display name: lowercase, whitespace to `_`, only
/// `[a-z0-9_]` kept, plus a short random suffix.
pub fn safe_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 5);
    let mut in_space = false;
    for c in name.to_lowercase().chars() {
        if c.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
            out.push(c);
        }
    }
    let suffix: String = guid().chars().take(4).collect();
    out.push('_');
    out.push_str(&suffix);
    out
}

/// `"#name"`, without doubling a `#` the author already wrote.
fn data_name(name: &str) -> String {
    if name.starts_with('#') {
        name.to_string()
    } else {
        format!("#{name}")
    }
}

fn capitalize(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Label used inside port ids of special nodes.
fn type_label(ty: GateType, schema: OpSchema) -> &'static str {
    match schema {
        OpSchema::Named => ty.name(),
        OpSchema::Legacy => GateType::Number.name(),
    }
}

fn bare_node(id: String, op: OpCode, gate: GateValue, position: Position) -> LoweredNode {
    LoweredNode {
        id,
        model_version: 1,
        version: "0.1".to_string(),
        operation_type: op,
        inputs: Vec::new(),
        outputs: Vec::new(),
        visual_position: position,
        visual_collapsed: false,
        mechanic_connection_id: None,
        gate_data_type: Some(gate),
        save_data: None,
        extra: Map::new(),
    }
}

fn input_port(node: &str, label: &str, data_type: GateValue) -> InputPort {
    InputPort {
        id: input_port_id(node, label, &guid()),
        data_type: Some(data_type),
        connected_output: None,
        extra: Map::new(),
    }
}

fn output_port(node: &str, label: &str, data_type: GateValue) -> OutputPort {
    OutputPort {
        id: output_port_id(node, label, &guid()),
        data_type: Some(data_type),
        connected_inputs: Vec::new(),
        extra: Map::new(),
    }
}

/// Data type of a catalog port; undeclared ports get `0` in the legacy
/// schema and the module's own type in the named one.
fn port_value(spec: &PortSpec, module: GateType, schema: OpSchema) -> GateValue {
    match (spec.ty, schema) {
        (Some(t), _) => t.encode(schema),
        (None, OpSchema::Legacy) => GateValue::Code(0),
        (None, OpSchema::Named) => module.encode(schema),
    }
}

struct Lowerer<'d> {
    doc: &'d mut ChipDocument,
    schema: OpSchema,
    staging_y: f64,
}

impl Lowerer<'_> {
    fn next_position(&mut self, x: f64) -> Position {
        let p = Position { x, y: self.staging_y };
        self.staging_y += STAGING_STEP;
        p
    }

    fn push(&mut self, node: LoweredNode) -> String {
        let id = node.id.clone();
        self.doc.graph.nodes.push(node);
        id
    }

    fn io_node(&mut self, ir: &IrNode, desc: &ModuleDescriptor) -> String {
        let name = ir.attr_str("name").unwrap_or(&desc.friendly_name).to_string();
        let key = safe_key(name.trim_start_matches('#'));
        let ty = GateType::Number;
        let gate = ty.encode(self.schema);
        let id = node_id(&desc.view_model, &guid());
        let label = type_label(ty, self.schema);

        let position = self.next_position(STAGING_X);
        let mut node = bare_node(id.clone(), desc.operation(self.schema), gate.clone(), position);
        node.mechanic_connection_id = Some(key.clone());
        let entry = IoEntry {
            key,
            data_name: data_name(&name),
            serialized_value: payload::default_io_value(ty),
            gate_data_type: Some(gate.clone()),
            extra: Map::new(),
        };
        if desc.class == ModuleClass::Input {
            node.outputs.push(output_port(&id, label, gate));
            self.doc.inputs.push(entry);
        } else {
            node.inputs.push(input_port(&id, label, gate));
            self.doc.outputs.push(entry);
        }
        self.push(node)
    }

    fn constant_node(&mut self, desc: &ModuleDescriptor) -> String {
        let ty = GateType::Number;
        let gate = ty.encode(self.schema);
        let id = node_id(&desc.view_model, &guid());
        let position = self.next_position(STAGING_X);
        let mut node = bare_node(id.clone(), desc.operation(self.schema), gate.clone(), position);
        node.outputs.push(output_port(&id, type_label(ty, self.schema), gate));
        node.save_data = Some(r#"{"DataValue":"0"}"#.to_string());
        self.push(node)
    }

    fn variable_node(&mut self, desc: &ModuleDescriptor, binding: &VariableBinding, seed: Option<&Value>) -> String {
        let ty = binding.gate_type;
        let gate = ty.encode(self.schema);
        let id = node_id(&desc.view_model, &guid());
        let position = self.next_position(STAGING_X);
        let mut node = bare_node(id.clone(), desc.operation(OpSchema::Named), gate.clone(), position);
        node.model_version = 2;
        node.mechanic_connection_id = Some(binding.key.clone());
        node.inputs.push(input_port(&id, ty.name(), gate.clone()));
        node.inputs.push(input_port(
            &id,
            GateType::Number.name(),
            GateType::Number.encode(self.schema),
        ));
        node.outputs.push(output_port(&id, ty.name(), gate.clone()));

        if !self.doc.variables.iter().any(|v| v.key == binding.key) {
            self.doc.variables.push(VariableEntry {
                key: binding.key.clone(),
                data_name: format!("#{}", capitalize(&binding.key)),
                serialized_value: payload::variable_value(ty, seed),
                is_save_between_session: false,
                gate_data_type: Some(gate),
                extra: Map::new(),
            });
        } else if seed.is_some() {
            warn!(key = %binding.key, "variable already present in template; keeping its stored value");
        }
        self.push(node)
    }

    fn generic_node(&mut self, desc: &ModuleDescriptor) -> Option<String> {
        let op = desc.operation(self.schema);
        if self.schema == OpSchema::Legacy && op.is_named() {
            warn!(module = %desc.friendly_name, "module has no numeric operation id; not instantiated");
            return None;
        }
        let module = desc.gate_type.unwrap_or(GateType::Number);
        let id = node_id(&desc.view_model, &guid());
        let position = self.next_position(GENERIC_X);
        let mut node = bare_node(id.clone(), op, module.encode(self.schema), position);
        for spec in &desc.inputs {
            node.inputs.push(input_port(&id, &spec.name, port_value(spec, module, self.schema)));
        }
        for spec in &desc.outputs {
            node.outputs.push(output_port(&id, &spec.name, port_value(spec, module, self.schema)));
        }
        Some(self.push(node))
    }

    fn lower(&mut self, ir: &IrNode, resolved: &ResolvedNode<'_>, defs: &[VariableDef]) -> Result<Option<String>> {
        let desc = resolved.descriptor;
        let id = match desc.class {
            ModuleClass::Input | ModuleClass::Output => Some(self.io_node(ir, desc)),
            ModuleClass::Constant => Some(self.constant_node(desc)),
            ModuleClass::Variable => {
                let binding = resolved.variable.as_ref().ok_or_else(|| {
                    CompileError::resolver("VARIABLE node was never bound to a definition").with_node(&ir.id)
                })?;
                let seed = binding
                    .seeds_value
                    .then(|| defs.iter().find(|d| d.key == binding.key).map(|d| &d.value))
                    .flatten();
                Some(self.variable_node(desc, binding, seed))
            }
            ModuleClass::Generic => self.generic_node(desc),
        };
        Ok(id)
    }
}

/// Create every document node and side-table row the resolution asks for.
pub fn instantiate<'c>(
    doc: &mut ChipDocument,
    graph: &IrGraph,
    resolution: &Resolution<'c>,
    variable_module: &'c ModuleDescriptor,
) -> Result<NodeMap<'c>> {
    let schema = doc.schema();
    let staging_y = doc
        .graph
        .nodes
        .iter()
        .map(|n| n.visual_position.y)
        .fold(None, |acc: Option<f64>, y| Some(acc.map_or(y, |a| a.max(y))))
        .map_or(180.0, |y| y + STAGING_STEP);
    let mut lowerer = Lowerer {
        doc,
        schema,
        staging_y,
    };

    let mut map = NodeMap::default();
    let mut created = 0usize;
    for ir in &graph.nodes {
        let Some(resolved) = resolution.get(&ir.id) else {
            continue;
        };
        if let Some(lowered_id) = lowerer.lower(ir, resolved, &graph.variables)? {
            debug!(ir = %ir.id, lowered = %lowered_id, "instantiated node");
            created += 1;
            map.entries.insert(
                ir.id.clone(),
                LoweredRef {
                    lowered_id,
                    descriptor: resolved.descriptor,
                },
            );
        }
    }

    for def in &resolution.orphans {
        let gate_type = def.gate_type().unwrap_or(GateType::Number);
        let binding = VariableBinding {
            key: def.key.clone(),
            gate_type,
            seeds_value: true,
        };
        lowerer.variable_node(variable_module, &binding, Some(&def.value));
        created += 1;
    }

    let expected = resolution.expected_nodes();
    if created != expected {
        return Err(CompileError::resolver(format!(
            "instantiated {created} of {expected} requested nodes; the module catalog does not match the template"
        )));
    }
    info!(nodes = created, schema = ?schema, "lowered graph");
    Ok(map)
}
