//! Gate data types shared by every stage after the front end.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One member of the closed gate-type domain. The integer codes are the
/// on-disk values in the legacy schema.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum GateType {
    Entity,
    Number,
    String,
    Vector,
    ArrayNumber,
    ArrayString,
    ArrayVector,
    ArrayEntity,
}

impl GateType {
    pub const ALL: [GateType; 8] = [
        GateType::Entity,
        GateType::Number,
        GateType::String,
        GateType::Vector,
        GateType::ArrayNumber,
        GateType::ArrayString,
        GateType::ArrayVector,
        GateType::ArrayEntity,
    ];

    pub fn code(self) -> i64 {
        match self {
            GateType::Entity => 1,
            GateType::Number => 2,
            GateType::String => 4,
            GateType::Vector => 8,
            GateType::ArrayNumber => 128,
            GateType::ArrayString => 256,
            GateType::ArrayVector => 512,
            GateType::ArrayEntity => 1024,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn name(self) -> &'static str {
        match self {
            GateType::Entity => "Entity",
            GateType::Number => "Number",
            GateType::String => "String",
            GateType::Vector => "Vector",
            GateType::ArrayNumber => "ArrayNumber",
            GateType::ArrayString => "ArrayString",
            GateType::ArrayVector => "ArrayVector",
            GateType::ArrayEntity => "ArrayEntity",
        }
    }

    /// Parse a type name as it appears in port declarations, attrs and
    /// variable definitions. Case-insensitive; accepts the catalog's
    /// synonyms. `"any"` and unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "decimal" | "number" | "integernumber" | "integer" | "float" => Some(GateType::Number),
            "string" => Some(GateType::String),
            "vector" | "vector3" => Some(GateType::Vector),
            "entity" | "signal" => Some(GateType::Entity),
            "arraynumber" => Some(GateType::ArrayNumber),
            "arraystring" => Some(GateType::ArrayString),
            "arrayvector" => Some(GateType::ArrayVector),
            "arrayentity" => Some(GateType::ArrayEntity),
            _ => None,
        }
    }

    /// Accepts an integer code, a digit string, or a type name. Booleans
    /// are rejected even though JSON tooling sometimes treats them as ints.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().and_then(Self::from_code),
            Value::String(s) => {
                let s = s.trim();
                if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
                    s.parse().ok().and_then(Self::from_code)
                } else {
                    Self::from_name(s)
                }
            }
            _ => None,
        }
    }

    pub fn is_array(self) -> bool {
        matches!(
            self,
            GateType::ArrayNumber | GateType::ArrayString | GateType::ArrayVector | GateType::ArrayEntity
        )
    }

    /// Element type of an array type.
    pub fn element(self) -> Option<Self> {
        match self {
            GateType::ArrayNumber => Some(GateType::Number),
            GateType::ArrayString => Some(GateType::String),
            GateType::ArrayVector => Some(GateType::Vector),
            GateType::ArrayEntity => Some(GateType::Entity),
            _ => None,
        }
    }

    /// Encode for the document according to its schema.
    pub fn encode(self, schema: OpSchema) -> GateValue {
        match schema {
            OpSchema::Legacy => GateValue::Code(self.code()),
            OpSchema::Named => GateValue::Name(self.name().to_string()),
        }
    }
}

impl fmt::Display for GateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How a document encodes operation and gate types: integer codes, or the
/// newer string names. Detected once per document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpSchema {
    #[default]
    Legacy,
    Named,
}

/// A gate type exactly as stored in a document: an integer code or a name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GateValue {
    Code(i64),
    Name(String),
}

impl GateValue {
    pub fn gate_type(&self) -> Option<GateType> {
        match self {
            GateValue::Code(c) => GateType::from_code(*c),
            GateValue::Name(n) => GateType::from_name(n),
        }
    }
}
