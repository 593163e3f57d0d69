//! Typed view of the lowered chip-graph records.
//!
//! Field names follow the document format exactly. Unknown fields are kept in
//! `extra` so that template nodes survive a round trip untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::gate::{GateType, GateValue, OpSchema};

/// `OperationType`: an integer code in the legacy schema, a name in the
/// newer one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OpCode {
    Code(i64),
    Name(String),
}

impl OpCode {
    pub fn is_named(&self) -> bool {
        matches!(self, OpCode::Name(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Reference from one port to another: the port id and its owner node id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRef {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "NodeId")]
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPort {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "DataType", default)]
    pub data_type: Option<GateValue>,
    #[serde(rename = "connectedOutputIdModel", default)]
    pub connected_output: Option<PortRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPort {
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "DataType", default)]
    pub data_type: Option<GateValue>,
    #[serde(rename = "ConnectedInputsIds", default)]
    pub connected_inputs: Vec<PortRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_model_version() -> u32 {
    1
}

fn default_version() -> String {
    "0.1".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoweredNode {
    pub id: String,
    #[serde(default = "default_model_version")]
    pub model_version: u32,
    #[serde(default = "default_version")]
    pub version: String,
    pub operation_type: OpCode,
    #[serde(default)]
    pub inputs: Vec<InputPort>,
    #[serde(default)]
    pub outputs: Vec<OutputPort>,
    #[serde(default)]
    pub visual_position: Position,
    #[serde(default)]
    pub visual_collapsed: bool,
    #[serde(default)]
    pub mechanic_connection_id: Option<String>,
    #[serde(default)]
    pub gate_data_type: Option<GateValue>,
    #[serde(default)]
    pub save_data: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LoweredNode {
    /// Node id with all whitespace removed; the form used for lookups.
    pub fn lookup_key(&self) -> String {
        normalize_node_id(&self.id)
    }

    pub fn gate_type(&self) -> Option<GateType> {
        self.gate_data_type.as_ref().and_then(GateValue::gate_type)
    }

    /// Set the gate type and every port's data type.
    pub fn retype_all(&mut self, ty: GateType, schema: OpSchema) {
        let v = ty.encode(schema);
        self.gate_data_type = Some(v.clone());
        for p in &mut self.inputs {
            p.data_type = Some(v.clone());
        }
        for p in &mut self.outputs {
            p.data_type = Some(v.clone());
        }
    }
}

pub fn normalize_node_id(id: &str) -> String {
    id.chars().filter(|c| !c.is_whitespace()).collect()
}

// ── Port id construction ─────────────────────────────────────────

/// `"<ViewModel> : <uuid>"`
pub fn node_id(view_model: &str, guid: &str) -> String {
    format!("{view_model} : {guid}")
}

/// `"<nodeId>\nInput : <label> <uuid>"`
pub fn input_port_id(node_id: &str, label: &str, guid: &str) -> String {
    format!("{node_id}\nInput : {label} {guid}")
}

/// `"<nodeId>\nOutput : <label> <uuid>"`
pub fn output_port_id(node_id: &str, label: &str, guid: &str) -> String {
    format!("{node_id}\nOutput : {label} {guid}")
}
