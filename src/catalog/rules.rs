use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::read_json;
use crate::error::{Result, Stage};
use crate::model::GateType;

/// How one port's type relates to its module's gate type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRule {
    /// Follows the module's gate type.
    Same,
    /// Unconstrained.
    Any,
    /// Always this type.
    Fixed(GateType),
    /// Element type of the module's (array) gate type.
    Element,
}

impl PortRule {
    /// `"same"`, `"any"`, `"element"`, `null`, an integer code, or a type name.
    /// Anything unrecognized is treated as unconstrained.
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => PortRule::Any,
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "same" => PortRule::Same,
                "any" | "" => PortRule::Any,
                "element" => PortRule::Element,
                _ => GateType::from_value(v).map_or(PortRule::Any, PortRule::Fixed),
            },
            Value::Number(_) => GateType::from_value(v).map_or(PortRule::Any, PortRule::Fixed),
            _ => PortRule::Any,
        }
    }

    /// Concrete type for this port once the module's gate type is known.
    pub fn resolve(self, gate: GateType) -> Option<GateType> {
        match self {
            PortRule::Same => Some(gate),
            PortRule::Any => None,
            PortRule::Fixed(t) => Some(t),
            PortRule::Element => gate.element(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleRow {
    pub module_name: Option<String>,
    pub inputs: Vec<PortRule>,
    pub outputs: Vec<PortRule>,
}

impl RuleRow {
    pub fn input(&self, idx: usize) -> Option<PortRule> {
        self.inputs.get(idx).copied()
    }

    pub fn output(&self, idx: usize) -> Option<PortRule> {
        self.outputs.get(idx).copied()
    }
}

#[derive(Deserialize)]
struct RawRow {
    #[serde(default)]
    module_name: Option<String>,
    #[serde(default)]
    inputs: Vec<Value>,
    #[serde(default)]
    outputs: Vec<Value>,
}

/// Per-module port type rules keyed by catalog id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleTable {
    rows: HashMap<String, RuleRow>,
}

impl RuleTable {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: HashMap<String, RawRow> = read_json(path, Stage::FileIo)?;
        let table = Self::from_raw(raw);
        debug!(rows = table.rows.len(), path = %path.display(), "loaded rule table");
        Ok(table)
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let raw: HashMap<String, RawRow> = serde_json::from_value(value).map_err(|e| {
            crate::error::CompileError::new(Stage::FileIo, format!("rule table does not decode: {e}"))
                .with_source(e)
        })?;
        Ok(Self::from_raw(raw))
    }

    fn from_raw(raw: HashMap<String, RawRow>) -> Self {
        let rows = raw
            .into_iter()
            .map(|(id, r)| {
                let row = RuleRow {
                    module_name: r.module_name,
                    inputs: r.inputs.iter().map(PortRule::from_value).collect(),
                    outputs: r.outputs.iter().map(PortRule::from_value).collect(),
                };
                (id, row)
            })
            .collect();
        Self { rows }
    }

    pub fn get(&self, catalog_id: &str) -> Option<&RuleRow> {
        self.rows.get(catalog_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
