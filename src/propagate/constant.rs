//! Constant pass: write each constant's literal into its node payload.

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::catalog::ModuleClass;
use crate::dsl::ir::IrGraph;
use crate::error::{CompileError, Result};
use crate::lower::NodeMap;
use crate::model::node::normalize_node_id;
use crate::model::payload::{float_repr, Vector4};
use crate::model::{ChipDocument, GateType};

#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Decimal(f64),
    Text(String),
    Vector(Vector4),
    ArrayNumber(Vec<f64>),
    ArrayString(Vec<String>),
    ArrayVector(Vec<Vector4>),
}

fn number(v: &Value) -> Option<f64> {
    v.as_f64().or_else(|| v.as_bool().map(|b| f64::from(u8::from(b))))
}

impl ConstantValue {
    /// Classify a literal. `None` for null, mixed arrays and other shapes
    /// the engine cannot store.
    pub fn from_literal(v: &Value) -> Option<Self> {
        match v {
            Value::Number(_) | Value::Bool(_) => number(v).map(Self::Decimal),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Object(_) => Vector4::from_value(v).map(Self::Vector),
            Value::Array(items) => {
                if let Some(nums) = items.iter().map(number).collect::<Option<Vec<_>>>() {
                    return Some(Self::ArrayNumber(nums));
                }
                if let Some(strs) = items.iter().map(|i| i.as_str().map(str::to_string)).collect::<Option<Vec<_>>>() {
                    return Some(Self::ArrayString(strs));
                }
                items
                    .iter()
                    .map(Vector4::from_value)
                    .collect::<Option<Vec<_>>>()
                    .map(Self::ArrayVector)
            }
            Value::Null => None,
        }
    }

    pub fn gate_type(&self) -> GateType {
        match self {
            Self::Decimal(_) => GateType::Number,
            Self::Text(_) => GateType::String,
            Self::Vector(_) => GateType::Vector,
            Self::ArrayNumber(_) => GateType::ArrayNumber,
            Self::ArrayString(_) => GateType::ArrayString,
            Self::ArrayVector(_) => GateType::ArrayVector,
        }
    }

    fn is_array(&self) -> bool {
        self.gate_type().is_array()
    }

    /// `DataValue` text: scalars inline, arrays as indented JSON.
    pub fn data_value(&self) -> serde_json::Result<String> {
        Ok(match self {
            Self::Decimal(n) => float_repr(*n),
            Self::Text(s) => s.clone(),
            Self::Vector(v) => serde_json::to_string(v)?,
            Self::ArrayNumber(items) => serde_json::to_string_pretty(items)?,
            Self::ArrayString(items) => serde_json::to_string_pretty(items)?,
            Self::ArrayVector(items) => serde_json::to_string_pretty(items)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ConstantWrite {
    pub ir_id: String,
    pub lowered_id: String,
    pub value: ConstantValue,
}

/// One write per lowered constant that carries a `value`.
pub fn plan(graph: &IrGraph, nodes: &NodeMap<'_>) -> Result<Vec<ConstantWrite>> {
    let mut out = Vec::new();
    for node in &graph.nodes {
        let Some(lowered) = nodes.get(&node.id) else { continue };
        if lowered.descriptor.class != ModuleClass::Constant {
            continue;
        }
        let Some(raw) = node.value() else { continue };
        let value = ConstantValue::from_literal(raw).ok_or_else(|| {
            CompileError::propagation(format!(
                "constant value {raw} is not a number, string, vector or homogeneous array"
            ))
            .with_node(&node.id)
        })?;
        out.push(ConstantWrite {
            ir_id: node.id.clone(),
            lowered_id: lowered.lowered_id.clone(),
            value,
        });
    }
    Ok(out)
}

pub fn apply(doc: &mut ChipDocument, plan: &[ConstantWrite]) -> Result<usize> {
    let schema = doc.schema();
    for write in plan {
        let idx = doc
            .node_index(&normalize_node_id(&write.lowered_id))
            .ok_or_else(|| CompileError::propagation("constant node disappeared").with_node(&write.ir_id))?;
        let Some(node) = doc.graph.nodes.get_mut(idx) else { continue };

        let ty = write.value.gate_type().encode(schema);
        node.gate_data_type = Some(ty.clone());
        for port in &mut node.outputs {
            port.data_type = Some(ty.clone());
        }

        let mut save: Map<String, Value> = node
            .save_data
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default();
        let data_value = write.value.data_value().map_err(|e| {
            CompileError::propagation(format!("cannot encode constant: {e}"))
                .with_node(&write.ir_id)
                .with_source(e)
        })?;
        save.insert("DataValue".into(), Value::String(data_value));
        if write.value.is_array() {
            save.insert("IsMultiline".into(), Value::Null);
        }
        node.save_data = Some(Value::Object(save).to_string());
        debug!(node = %write.ir_id, ty = %write.value.gate_type(), "wrote constant");
    }
    info!(constants = plan.len(), "propagated constant values");
    Ok(plan.len())
}
