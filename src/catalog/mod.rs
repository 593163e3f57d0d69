//! Module catalog: every chip the document format knows, indexed by a
//! normalized friendly name, plus the four special modules that are not
//! listed in the catalog file.

pub mod fuzzy;
pub mod rules;

use std::path::Path;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::read_json;
use crate::error::{CompileError, Result, Stage};
use crate::model::{GateType, OpCode, OpSchema};

pub use fuzzy::normalize;
pub use rules::{PortRule, RuleRow, RuleTable};

/// Special handling a module receives during lowering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleClass {
    Input,
    Output,
    Constant,
    Variable,
    Generic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortSpec {
    pub name: String,
    /// Declared type; `None` for "any" or unknown.
    pub ty: Option<GateType>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDescriptor {
    /// Normalized friendly name; the catalog key.
    pub key: String,
    /// Id in the catalog file. `None` for modules without one (Variable).
    pub catalog_id: Option<String>,
    pub friendly_name: String,
    pub view_model: String,
    pub inputs: Vec<PortSpec>,
    pub outputs: Vec<PortSpec>,
    pub gate_type: Option<GateType>,
    pub can_modify_data_type: bool,
    pub class: ModuleClass,
}

impl ModuleDescriptor {
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.iter().map(|p| p.name.as_str())
    }

    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|p| p.name.as_str())
    }

    /// `OperationType` for a new node of this module.
    pub fn operation(&self, schema: OpSchema) -> OpCode {
        let named = schema == OpSchema::Named;
        match self.class {
            ModuleClass::Input if named => OpCode::Name("Root".into()),
            ModuleClass::Output if named => OpCode::Name("Exit".into()),
            ModuleClass::Constant if named => OpCode::Name("Constant".into()),
            ModuleClass::Variable => OpCode::Name("Variable".into()),
            _ => match self.catalog_id.as_deref().map(str::parse::<i64>) {
                Some(Ok(code)) => OpCode::Code(code),
                _ => OpCode::Name(self.catalog_id.clone().unwrap_or_else(|| self.friendly_name.clone())),
            },
        }
    }

    fn special(
        class: ModuleClass,
        id: Option<&str>,
        name: &str,
        view_model: &str,
        inputs: &[&str],
        outputs: &[&str],
    ) -> Self {
        let port = |n: &&str| PortSpec {
            name: (*n).to_string(),
            ty: None,
        };
        Self {
            key: normalize(name),
            catalog_id: id.map(str::to_string),
            friendly_name: name.to_string(),
            view_model: view_model.to_string(),
            inputs: inputs.iter().map(port).collect(),
            outputs: outputs.iter().map(port).collect(),
            gate_type: None,
            can_modify_data_type: true,
            class,
        }
    }
}

// ── Catalog file format ─────────────────────────────────────────

#[derive(Deserialize, Default)]
struct RawSourceInfo {
    #[serde(default)]
    chip_names_friendly_name: Option<String>,
    #[serde(default)]
    allmod_viewmodel: Option<String>,
}

#[derive(Deserialize)]
struct RawPort {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    ty: Option<Value>,
}

fn yes() -> bool {
    true
}

#[derive(Deserialize)]
struct RawModule {
    #[serde(default)]
    source_info: RawSourceInfo,
    #[serde(default)]
    inputs: Vec<RawPort>,
    #[serde(default)]
    outputs: Vec<RawPort>,
    #[serde(default)]
    gate_data_type: Option<Value>,
    #[serde(default = "yes")]
    can_modify_data_type: bool,
}

fn port_specs(raw: Vec<RawPort>, default_name: &str) -> Vec<PortSpec> {
    raw.into_iter()
        .map(|p| PortSpec {
            name: p.name.unwrap_or_else(|| default_name.to_string()),
            ty: p.ty.as_ref().and_then(GateType::from_value),
        })
        .collect()
}

fn class_for(friendly_name: &str) -> ModuleClass {
    match normalize(friendly_name).as_str() {
        "input" => ModuleClass::Input,
        "output" => ModuleClass::Output,
        "constant" => ModuleClass::Constant,
        "variable" => ModuleClass::Variable,
        _ => ModuleClass::Generic,
    }
}

// ── Catalog ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleCatalog {
    modules: IndexMap<String, ModuleDescriptor>,
}

impl ModuleCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        let raw: IndexMap<String, Value> = read_json(path, Stage::FileIo)?;
        let catalog = Self::from_entries(raw);
        debug!(modules = catalog.len(), path = %path.display(), "loaded module catalog");
        Ok(catalog)
    }

    pub fn from_json(value: Value) -> Result<Self> {
        let raw: IndexMap<String, Value> = serde_json::from_value(value).map_err(|e| {
            CompileError::new(Stage::FileIo, format!("module catalog does not decode: {e}")).with_source(e)
        })?;
        Ok(Self::from_entries(raw))
    }

    fn from_entries(raw: IndexMap<String, Value>) -> Self {
        let mut modules = IndexMap::new();
        for (id, value) in raw {
            let module: RawModule = match serde_json::from_value(value) {
                Ok(m) => m,
                Err(e) => {
                    warn!(id = %id, error = %e, "skipping malformed catalog entry");
                    continue;
                }
            };
            let (Some(friendly_name), Some(view_model)) =
                (module.source_info.chip_names_friendly_name, module.source_info.allmod_viewmodel)
            else {
                continue;
            };
            if friendly_name.is_empty() || view_model.is_empty() {
                continue;
            }
            let key = normalize(&friendly_name);
            let desc = ModuleDescriptor {
                key: key.clone(),
                catalog_id: Some(id),
                class: class_for(&friendly_name),
                friendly_name,
                view_model,
                inputs: port_specs(module.inputs, "Input"),
                outputs: port_specs(module.outputs, "Output"),
                gate_type: module.gate_data_type.as_ref().and_then(GateType::from_value),
                can_modify_data_type: module.can_modify_data_type,
            };
            modules.insert(key, desc);
        }

        let specials = [
            ModuleDescriptor::special(
                ModuleClass::Input,
                Some("256"),
                "Input",
                "RootNodeViewModel",
                &[],
                &["Number"],
            ),
            ModuleDescriptor::special(
                ModuleClass::Output,
                Some("512"),
                "Output",
                "ExitNodeViewModel",
                &["Number"],
                &[],
            ),
            ModuleDescriptor::special(
                ModuleClass::Constant,
                Some("257"),
                "Constant",
                "ConstantNodeViewModel",
                &[],
                &["Output"],
            ),
            ModuleDescriptor::special(
                ModuleClass::Variable,
                None,
                "Variable",
                "VariableNodeViewModel",
                &["Value", "Set"],
                &["Value"],
            ),
        ];
        for desc in specials {
            modules.insert(desc.key.clone(), desc);
        }
        Self { modules }
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&ModuleDescriptor> {
        self.modules.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleDescriptor> {
        self.modules.values()
    }

    /// Closest module to a DSL type name, or `None` below `cutoff`.
    pub fn resolve(&self, type_name: &str, cutoff: f64) -> Option<&ModuleDescriptor> {
        let wanted = normalize(type_name);
        if let Some(exact) = self.modules.get(&wanted) {
            return Some(exact);
        }
        fuzzy::best_match(&wanted, self.modules.keys().map(String::as_str), cutoff)
            .and_then(|k| self.modules.get(k))
    }

    /// Like [`resolve`](Self::resolve) but fails with the nearest names as
    /// candidates.
    pub fn require(&self, type_name: &str, node_id: &str, cutoff: f64) -> Result<&ModuleDescriptor> {
        self.resolve(type_name, cutoff).ok_or_else(|| {
            CompileError::resolver(format!("cannot resolve module type '{type_name}'"))
                .with_node(node_id)
                .with_node_type(type_name)
                .with_candidates(self.nearest(type_name, 5))
        })
    }

    /// Up to `n` friendly names ordered by similarity.
    pub fn nearest(&self, type_name: &str, n: usize) -> Vec<String> {
        let wanted = normalize(type_name);
        let mut scored: Vec<(f64, &ModuleDescriptor)> = self
            .modules
            .values()
            .map(|d| (fuzzy::ratio(&wanted, &d.key), d))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.key.cmp(&b.1.key)));
        scored
            .into_iter()
            .take(n)
            .map(|(_, d)| d.friendly_name.clone())
            .collect()
    }
}

// ── Port lookup ─────────────────────────────────────────────────

/// Why a port reference did not resolve to an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortMiss {
    /// The automatic port was requested on a side with this many ports.
    Ambiguous(usize),
    /// A numeric index past the end of the port list.
    OutOfRange(usize),
    /// No name scored above the cutoff.
    Unmatched,
}

/// Index of `port` in `names`: the automatic port needs exactly one port, a
/// single-port side always yields 0, digits are taken as an index, anything
/// else is fuzzy matched.
pub fn port_index(port: &str, names: &[&str], cutoff: f64) -> std::result::Result<usize, PortMiss> {
    if port == crate::dsl::ir::AUTO_PORT {
        return if names.len() == 1 {
            Ok(0)
        } else {
            Err(PortMiss::Ambiguous(names.len()))
        };
    }
    if names.len() == 1 {
        return Ok(0);
    }
    if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
        let idx: usize = port.parse().map_err(|_| PortMiss::OutOfRange(usize::MAX))?;
        return if idx < names.len() {
            Ok(idx)
        } else {
            Err(PortMiss::OutOfRange(idx))
        };
    }
    let normalized: Vec<String> = names.iter().map(|n| normalize(n)).collect();
    let wanted = normalize(port);
    let best = fuzzy::best_match(&wanted, normalized.iter().map(String::as_str), cutoff)
        .ok_or(PortMiss::Unmatched)?;
    normalized.iter().position(|n| n == best).ok_or(PortMiss::Unmatched)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn catalog() -> ModuleCatalog {
        ModuleCatalog::from_json(json!({
            "1": {
                "source_info": {"chip_names_friendly_name": "Add", "allmod_viewmodel": "AddNodeViewModel"},
                "inputs": [{"name": "A", "type": "any"}, {"name": "B", "type": "any"}],
                "outputs": [{"name": "Sum"}],
                "gate_data_type": 2
            },
            "2": {
                "source_info": {"chip_names_friendly_name": "GREATER THAN", "allmod_viewmodel": "GreaterThanViewModel"},
                "inputs": [{"name": "A", "type": "Number"}, {"name": "B", "type": "Number"}],
                "outputs": [{"name": "Result", "type": "Entity"}],
                "can_modify_data_type": false
            },
            "3": {"source_info": {"chip_names_friendly_name": "Broken"}},
            "4": "not an object"
        }))
        .unwrap()
    }

    #[test]
    fn builds_index_with_specials() {
        let c = catalog();
        assert_eq!(c.len(), 6);
        let add = c.get("add").unwrap();
        assert_eq!(add.catalog_id.as_deref(), Some("1"));
        assert_eq!(add.outputs[0].name, "Sum");
        assert_eq!(add.gate_type, Some(GateType::Number));
        assert_eq!(add.class, ModuleClass::Generic);

        let gt = c.get("greaterthan").unwrap();
        assert!(!gt.can_modify_data_type);
        assert_eq!(gt.outputs[0].ty, Some(GateType::Entity));

        let var = c.get("variable").unwrap();
        assert_eq!(var.catalog_id, None);
        assert_eq!(var.input_names().collect::<Vec<_>>(), ["Value", "Set"]);
    }

    #[test]
    fn resolve_is_fuzzy_above_cutoff() {
        let c = catalog();
        assert_eq!(c.resolve("ADD", 0.1).unwrap().friendly_name, "Add");
        assert_eq!(c.resolve("greater_than", 0.1).unwrap().friendly_name, "GREATER THAN");
        assert_eq!(c.resolve("Inptu", 0.1).unwrap().class, ModuleClass::Input);
        assert!(c.resolve("QQQQ", 0.1).is_none());
    }

    #[test]
    fn require_reports_candidates() {
        let c = catalog();
        let err = c.require("QQQQ", "qqqq_0", 0.1).unwrap_err();
        assert_eq!(err.stage, Stage::ModuleResolver);
        assert_eq!(err.context.node_id.as_deref(), Some("qqqq_0"));
        assert_eq!(err.context.candidates.len(), 5);
    }

    #[test]
    fn port_index_forms() {
        let ports = ["A", "B", "Result"];
        assert_eq!(port_index("1", &ports, 0.4), Ok(1));
        assert_eq!(port_index("7", &ports, 0.4), Err(PortMiss::OutOfRange(7)));
        assert_eq!(port_index("result", &ports, 0.4), Ok(2));
        assert_eq!(port_index("__auto__", &ports, 0.4), Err(PortMiss::Ambiguous(3)));
        assert_eq!(port_index("__auto__", &["Sum"], 0.4), Ok(0));
        assert_eq!(port_index("anything", &["Sum"], 0.4), Ok(0));
        assert_eq!(port_index("QQQQ", &ports, 0.4), Err(PortMiss::Unmatched));
    }

    #[test]
    fn operation_codes_follow_schema() {
        let c = catalog();
        let input = c.get("input").unwrap();
        assert_eq!(input.operation(OpSchema::Legacy), OpCode::Code(256));
        assert_eq!(input.operation(OpSchema::Named), OpCode::Name("Root".into()));
        assert_eq!(c.get("add").unwrap().operation(OpSchema::Named), OpCode::Code(1));
        assert_eq!(
            c.get("variable").unwrap().operation(OpSchema::Legacy),
            OpCode::Name("Variable".into())
        );
    }
}
