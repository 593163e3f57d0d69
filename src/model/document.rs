//! The save document: an outer JSON object whose interesting parts are JSON
//! strings nested inside `saveMetaDatas` slots.
//!
//! Stages never touch the nested strings directly. They call
//! [`SaveDocument::edit`], which decodes every slot into typed records, runs
//! the stage, and re-encodes only if the stage succeeded.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::gate::{GateValue, OpSchema};
use super::node::LoweredNode;
use crate::error::{CompileError, Result, Stage};

// ── Slot keys ────────────────────────────────────────────────────

pub const CHIP_GRAPH_KEY: &str = "chip_graph";
pub const CHIP_INPUTS_KEY: &str = "chip_inputs";
pub const CHIP_OUTPUTS_KEY: &str = "chip_outputs";
pub const CHIP_VARIABLES_KEY: &str = "chip_variables";

const EMPTY_GRAPH: &str = r#"{"ValidationState":1,"Nodes":[]}"#;
const EMPTY_LIST: &str = "[]";

// ── Inner records ────────────────────────────────────────────────

fn default_validation_state() -> Value {
    Value::from(1)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChipGraph {
    #[serde(default = "default_validation_state")]
    pub validation_state: Value,
    #[serde(default)]
    pub nodes: Vec<LoweredNode>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One row of `chip_inputs` / `chip_outputs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct IoEntry {
    pub key: String,
    #[serde(default)]
    pub data_name: String,
    #[serde(default)]
    pub serialized_value: Option<String>,
    #[serde(default)]
    pub gate_data_type: Option<GateValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One row of `chip_variables`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VariableEntry {
    pub key: String,
    #[serde(default)]
    pub data_name: String,
    #[serde(default)]
    pub serialized_value: Option<String>,
    #[serde(default)]
    pub is_save_between_session: bool,
    #[serde(default)]
    pub gate_data_type: Option<GateValue>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One element of a `mechanicSerializedInputs` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MechanicInput {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub data_type: Option<GateValue>,
    #[serde(default)]
    pub gate_data: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Decoded contents of the compile container.
#[derive(Debug, Clone, PartialEq)]
pub struct ChipDocument {
    pub graph: ChipGraph,
    pub inputs: Vec<IoEntry>,
    pub outputs: Vec<IoEntry>,
    pub variables: Vec<VariableEntry>,
    /// (index into `mechanicData`, decoded inputs) for every mechanic that
    /// carries serialized inputs.
    pub mechanics: Vec<(usize, Vec<MechanicInput>)>,
}

impl ChipDocument {
    /// Named schema if any node already uses string operation types.
    pub fn schema(&self) -> OpSchema {
        if self.graph.nodes.iter().any(|n| n.operation_type.is_named()) {
            OpSchema::Named
        } else {
            OpSchema::Legacy
        }
    }

    pub fn node_index(&self, lookup_key: &str) -> Option<usize> {
        self.graph.nodes.iter().position(|n| n.lookup_key() == lookup_key)
    }
}

// ── Outer document ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct SaveDocument {
    root: Value,
    container: usize,
}

impl SaveDocument {
    pub fn parse(text: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(text).map_err(|e| {
            CompileError::new(Stage::FileIo, format!("template is not valid JSON: {e}"))
                .with_line(e.line())
                .with_source(e)
        })?;
        Self::from_value(root)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
        Self::parse(&text).map_err(|e| e.with_file(path.display().to_string()))
    }

    pub fn from_value(root: Value) -> Result<Self> {
        let containers = root
            .get("saveObjectContainers")
            .and_then(Value::as_array)
            .ok_or_else(|| CompileError::new(Stage::FileIo, "template has no saveObjectContainers"))?;
        let has_graph = |c: &Value| {
            c.pointer("/saveObjects/saveMetaDatas")
                .and_then(Value::as_array)
                .is_some_and(|metas| {
                    metas.iter().any(|m| m.get("key").and_then(Value::as_str) == Some(CHIP_GRAPH_KEY))
                })
        };
        let container = containers
            .iter()
            .position(has_graph)
            .or_else(|| containers.iter().position(|c| c.get("saveObjects").is_some()))
            .ok_or_else(|| CompileError::new(Stage::FileIo, "template has no saveObjects container"))?;
        Ok(Self { root, container })
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(&self.root).map_err(|e| {
            CompileError::archive(format!("cannot serialize document: {e}")).with_source(e)
        })
    }

    /// Decode, run `f`, and write back only if `f` succeeded.
    pub fn edit<T>(
        &mut self,
        stage: Stage,
        f: impl FnOnce(&mut ChipDocument) -> Result<T>,
    ) -> Result<T> {
        let mut doc = self.unpack(stage)?;
        let out = f(&mut doc)?;
        self.pack(stage, &doc)?;
        Ok(out)
    }

    pub fn unpack(&self, stage: Stage) -> Result<ChipDocument> {
        let graph = decode(stage, CHIP_GRAPH_KEY, self.slot(CHIP_GRAPH_KEY).unwrap_or(EMPTY_GRAPH))?;
        let inputs = decode(stage, CHIP_INPUTS_KEY, self.slot(CHIP_INPUTS_KEY).unwrap_or(EMPTY_LIST))?;
        let outputs = decode(stage, CHIP_OUTPUTS_KEY, self.slot(CHIP_OUTPUTS_KEY).unwrap_or(EMPTY_LIST))?;
        let variables =
            decode(stage, CHIP_VARIABLES_KEY, self.slot(CHIP_VARIABLES_KEY).unwrap_or(EMPTY_LIST))?;

        let mut mechanics = Vec::new();
        if let Some(list) = self.save_objects().and_then(|s| s.get("mechanicData")).and_then(Value::as_array) {
            for (i, item) in list.iter().enumerate() {
                let Some(raw) = item.get("mechanicSerializedInputs").and_then(Value::as_str) else {
                    continue;
                };
                if raw.is_empty() {
                    continue;
                }
                mechanics.push((i, decode(stage, "mechanicSerializedInputs", raw)?));
            }
        }

        Ok(ChipDocument {
            graph,
            inputs,
            outputs,
            variables,
            mechanics,
        })
    }

    pub fn pack(&mut self, stage: Stage, doc: &ChipDocument) -> Result<()> {
        self.set_slot(stage, CHIP_GRAPH_KEY, encode(stage, CHIP_GRAPH_KEY, &doc.graph)?)?;
        self.set_slot(stage, CHIP_INPUTS_KEY, encode(stage, CHIP_INPUTS_KEY, &doc.inputs)?)?;
        self.set_slot(stage, CHIP_OUTPUTS_KEY, encode(stage, CHIP_OUTPUTS_KEY, &doc.outputs)?)?;
        self.set_slot(stage, CHIP_VARIABLES_KEY, encode(stage, CHIP_VARIABLES_KEY, &doc.variables)?)?;

        for (i, inputs) in &doc.mechanics {
            let text = encode(stage, "mechanicSerializedInputs", inputs)?;
            let item = self
                .save_objects_mut()
                .and_then(|s| s.get_mut("mechanicData"))
                .and_then(Value::as_array_mut)
                .and_then(|list| list.get_mut(*i))
                .and_then(Value::as_object_mut)
                .ok_or_else(|| CompileError::new(stage, format!("mechanicData[{i}] disappeared")))?;
            item.insert("mechanicSerializedInputs".to_string(), Value::String(text));
        }
        Ok(())
    }

    fn save_objects(&self) -> Option<&Value> {
        self.root
            .get("saveObjectContainers")
            .and_then(|c| c.get(self.container))
            .and_then(|c| c.get("saveObjects"))
    }

    fn save_objects_mut(&mut self) -> Option<&mut Value> {
        self.root
            .get_mut("saveObjectContainers")
            .and_then(|c| c.get_mut(self.container))
            .and_then(|c| c.get_mut("saveObjects"))
    }

    fn slot(&self, key: &str) -> Option<&str> {
        self.save_objects()?
            .get("saveMetaDatas")?
            .as_array()?
            .iter()
            .find(|m| m.get("key").and_then(Value::as_str) == Some(key))?
            .get("stringValue")?
            .as_str()
    }

    fn set_slot(&mut self, stage: Stage, key: &str, text: String) -> Result<()> {
        let objects = self
            .save_objects_mut()
            .and_then(Value::as_object_mut)
            .ok_or_else(|| CompileError::new(stage, "saveObjects is not an object"))?;
        let metas = objects
            .entry("saveMetaDatas")
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| CompileError::new(stage, "saveMetaDatas is not a list"))?;
        let existing = metas
            .iter_mut()
            .find(|m| m.get("key").and_then(Value::as_str) == Some(key))
            .and_then(Value::as_object_mut);
        match existing {
            Some(meta) => {
                meta.insert("stringValue".to_string(), Value::String(text));
            }
            None => {
                let mut meta = Map::new();
                meta.insert("key".to_string(), Value::String(key.to_string()));
                meta.insert("stringValue".to_string(), Value::String(text));
                metas.push(Value::Object(meta));
            }
        }
        Ok(())
    }
}

fn decode<T: serde::de::DeserializeOwned>(stage: Stage, slot: &str, text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| {
        CompileError::new(stage, format!("slot '{slot}' does not decode: {e}")).with_source(e)
    })
}

fn encode<T: Serialize>(stage: Stage, slot: &str, value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| {
        CompileError::new(stage, format!("slot '{slot}' does not encode: {e}")).with_source(e)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> SaveDocument {
        SaveDocument::from_value(json!({
            "version": 3,
            "saveObjectContainers": [{
                "saveObjects": {
                    "saveMetaDatas": [
                        {"key": "chip_graph", "stringValue": "{\"ValidationState\":1,\"Nodes\":[]}"},
                        {"key": "other", "stringValue": "keep me"}
                    ],
                    "mechanicData": [
                        {"mechanicSerializedInputs": "[{\"Key\":\"in_1\",\"DataType\":2,\"GateData\":null}]"},
                        {"name": "no inputs"}
                    ]
                }
            }]
        }))
        .unwrap()
    }

    #[test]
    fn missing_slots_are_created_on_pack() {
        let mut doc = template();
        doc.edit(Stage::ModuleResolver, |_| Ok(())).unwrap();
        let metas = doc.as_value()["saveObjectContainers"][0]["saveObjects"]["saveMetaDatas"]
            .as_array()
            .unwrap();
        let keys: Vec<_> = metas.iter().map(|m| m["key"].as_str().unwrap()).collect();
        assert_eq!(keys, ["chip_graph", "other", "chip_inputs", "chip_outputs", "chip_variables"]);
        assert_eq!(metas[1]["stringValue"], "keep me");
        assert_eq!(metas[2]["stringValue"], "[]");
    }

    #[test]
    fn failed_edit_leaves_document_untouched() {
        let mut doc = template();
        let before = doc.clone();
        let res: Result<()> = doc.edit(Stage::Propagation, |d| {
            d.inputs.push(IoEntry {
                key: "x".into(),
                data_name: "#x".into(),
                serialized_value: None,
                gate_data_type: None,
                extra: Map::new(),
            });
            Err(CompileError::propagation("boom"))
        });
        assert!(res.is_err());
        assert_eq!(doc, before);
    }

    #[test]
    fn mechanic_inputs_round_trip() {
        let mut doc = template();
        doc.edit(Stage::Propagation, |d| {
            assert_eq!(d.mechanics.len(), 1);
            d.mechanics[0].1[0].data_type = Some(GateValue::Code(8));
            Ok(())
        })
        .unwrap();
        let raw = doc.as_value()["saveObjectContainers"][0]["saveObjects"]["mechanicData"][0]
            ["mechanicSerializedInputs"]
            .as_str()
            .unwrap();
        let parsed: Value = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed[0]["DataType"], 8);
    }

    #[test]
    fn rejects_template_without_containers() {
        assert!(SaveDocument::from_value(json!({"x": 1})).is_err());
    }
}
