//! Serialized payload strings stored inside lowered nodes and side tables:
//! node `SaveData`, I/O `SerializedValue`, variable `SerializedValue` and
//! runtime `GateData`. Every payload is JSON text embedded in JSON.

use serde::Serialize;
use serde_json::{json, Value};

use super::gate::GateType;

const F32_MAX: f64 = 3.402_823_47E+38;

const NUMBER_SERIALIZED: &str =
    r#"{"Value":0.0,"Default":0.0,"Min":-3.40282347E+38,"Max":3.40282347E+38,"IsCheckbox":false}"#;
const STRING_SERIALIZED: &str = r#"{"Value":"","Default":null,"MaxLength":2147483647}"#;
const EMPTY_ARRAY_SERIALIZED: &str = r#"{"Value":[],"Default":[]}"#;

/// A vector in the engine's serialized shape.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Vector4 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
    pub magnitude: f64,
    #[serde(rename = "sqrMagnitude")]
    pub sqr_magnitude: f64,
}

impl Vector4 {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self {
            x,
            y,
            z,
            w,
            ..Self::default()
        }
    }

    /// `{x, y, z[, w]}` object, or a 3/4-element list.
    pub fn from_value(v: &Value) -> Option<Self> {
        let num = |c: &Value| c.as_f64().or_else(|| c.as_bool().map(|b| f64::from(u8::from(b))));
        match v {
            Value::Object(m) => {
                let x = num(m.get("x")?)?;
                let y = num(m.get("y")?)?;
                let z = num(m.get("z")?)?;
                let w = m.get("w").and_then(num).unwrap_or(0.0);
                Some(Self::new(x, y, z, w))
            }
            Value::Array(items) if items.len() == 3 || items.len() == 4 => {
                let mut c = items.iter().map(num);
                let x = c.next()??;
                let y = c.next()??;
                let z = c.next()??;
                let w = match c.next() {
                    Some(w) => w?,
                    None => 0.0,
                };
                Some(Self::new(x, y, z, w))
            }
            _ => None,
        }
    }
}

/// Float text the way the engine's own tooling writes it: shortest
/// round-trip digits, `.0` on integral values, exponent form outside
/// `[1e-4, 1e16)`.
pub fn float_repr(v: f64) -> String {
    if v.is_nan() {
        return "nan".to_string();
    }
    if v.is_infinite() {
        return if v > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if v == 0.0 {
        return if v.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }
    let sci = format!("{v:e}");
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let sign = if mantissa.starts_with('-') { "-" } else { "" };
    let digits: String = mantissa.chars().filter(char::is_ascii_digit).collect();

    if (-4..16).contains(&exp) {
        let point = exp + 1;
        if point <= 0 {
            let zeros = "0".repeat(point.unsigned_abs() as usize);
            return format!("{sign}0.{zeros}{digits}");
        }
        let point = point.unsigned_abs() as usize;
        if point >= digits.len() {
            let zeros = "0".repeat(point - digits.len());
            return format!("{sign}{digits}{zeros}.0");
        }
        let (int_part, frac) = digits.split_at(point);
        return format!("{sign}{int_part}.{frac}");
    }

    let (lead, rest) = digits.split_at(1usize.min(digits.len()));
    let m = if rest.is_empty() {
        lead.to_string()
    } else {
        format!("{lead}.{rest}")
    };
    let exp_sign = if exp < 0 { '-' } else { '+' };
    format!("{sign}{m}e{exp_sign}{:02}", exp.unsigned_abs())
}

/// Default `SaveData` of a generic node of type `ty`.
pub fn default_save_data(ty: GateType) -> Option<String> {
    let data_value = match ty {
        GateType::Number => "0.0".to_string(),
        GateType::String => String::new(),
        GateType::Vector => serde_json::to_string(&Vector4::default()).ok()?,
        _ => return None,
    };
    serde_json::to_string(&json!({ "DataValue": data_value })).ok()
}

/// Default `SerializedValue` of a `chip_inputs` / `chip_outputs` row.
pub fn default_io_value(ty: GateType) -> Option<String> {
    match ty {
        GateType::Entity => None,
        GateType::Number => Some(NUMBER_SERIALIZED.to_string()),
        GateType::String => Some(STRING_SERIALIZED.to_string()),
        GateType::Vector => {
            let zero = Vector4::default();
            serde_json::to_string(&json!({ "Value": zero, "Default": zero })).ok()
        }
        _ => Some(EMPTY_ARRAY_SERIALIZED.to_string()),
    }
}

/// Default `GateData` of a runtime mechanic input.
pub fn default_gate_data(ty: GateType) -> Option<String> {
    match ty {
        GateType::Vector => {
            let zero = Vector4::default();
            let bound = |v: f64| {
                json!({
                    "x": v, "y": v, "z": v, "w": v,
                    "normalized": zero,
                    "magnitude": "Infinity",
                    "sqrMagnitude": "Infinity",
                })
            };
            serde_json::to_string(&json!({
                "Value": zero,
                "Default": zero,
                "MinVector": bound(-F32_MAX),
                "MaxVector": bound(F32_MAX),
            }))
            .ok()
        }
        other => default_io_value(other),
    }
}

/// `SerializedValue` of a `chip_variables` row. `seed` fills both `Value`
/// and `Default` when it fits the type.
pub fn variable_value(ty: GateType, seed: Option<&Value>) -> Option<String> {
    let seed = seed.filter(|v| !v.is_null());
    let value = match ty {
        GateType::Entity => return None,
        GateType::Number => {
            let n = seed
                .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
                .unwrap_or(0.0);
            json!({"Value": n, "Default": n, "Min": -F32_MAX, "Max": F32_MAX, "IsCheckbox": false})
        }
        GateType::String => {
            let s = seed.map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            });
            json!({
                "IsMultiline": false,
                "Value": s.clone().unwrap_or_default(),
                "Default": s,
                "MaxLength": 2_147_483_647,
            })
        }
        GateType::Vector => {
            let v = seed.and_then(Vector4::from_value).unwrap_or_default();
            let bound = |b: f64| json!({"x": b, "y": b, "z": b, "w": b});
            json!({
                "Value": v,
                "Default": v,
                "MinVector": bound(-F32_MAX),
                "MaxVector": bound(F32_MAX),
            })
        }
        _ => {
            let items = seed.filter(|v| v.is_array()).cloned().unwrap_or_else(|| json!([]));
            json!({"Value": items, "Default": items})
        }
    };
    serde_json::to_string(&value).ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn float_repr_matches_reference_forms() {
        assert_eq!(float_repr(0.0), "0.0");
        assert_eq!(float_repr(5.0), "5.0");
        assert_eq!(float_repr(-2.5), "-2.5");
        assert_eq!(float_repr(0.1), "0.1");
        assert_eq!(float_repr(0.0001), "0.0001");
        assert_eq!(float_repr(0.000_015), "1.5e-05");
        assert_eq!(float_repr(1e16), "1e+16");
        assert_eq!(float_repr(123_456.0), "123456.0");
        assert_eq!(float_repr(3.402_823_47E+38), "3.40282347e+38");
    }

    #[test]
    fn vector_from_dict_or_list() {
        let v = Vector4::from_value(&json!({"x": 1, "y": 2.5, "z": -1})).unwrap();
        assert_eq!((v.x, v.y, v.z, v.w), (1.0, 2.5, -1.0, 0.0));
        let w = Vector4::from_value(&json!([1, 2, 3, 4])).unwrap();
        assert!((w.w - 4.0).abs() < f64::EPSILON);
        assert!(Vector4::from_value(&json!([1, 2])).is_none());
        assert!(Vector4::from_value(&json!({"x": 1, "y": "a", "z": 0})).is_none());
    }

    #[test]
    fn save_data_defaults() {
        assert_eq!(default_save_data(GateType::Number).unwrap(), r#"{"DataValue":"0.0"}"#);
        assert_eq!(default_save_data(GateType::Entity), None);
        let vector: Value = serde_json::from_str(&default_save_data(GateType::Vector).unwrap()).unwrap();
        let inner: Value = serde_json::from_str(vector["DataValue"].as_str().unwrap()).unwrap();
        assert_eq!(inner["sqrMagnitude"], 0.0);
    }

    #[test]
    fn variable_value_is_seeded() {
        let n: Value = serde_json::from_str(&variable_value(GateType::Number, Some(&json!(3))).unwrap()).unwrap();
        assert_eq!(n["Value"], 3.0);
        assert_eq!(n["Default"], 3.0);
        let s: Value = serde_json::from_str(&variable_value(GateType::String, None).unwrap()).unwrap();
        assert_eq!(s["Value"], "");
        assert_eq!(s["Default"], Value::Null);
        assert_eq!(variable_value(GateType::Entity, Some(&json!(1))), None);
        let a: Value =
            serde_json::from_str(&variable_value(GateType::ArrayNumber, Some(&json!([1, 2]))).unwrap()).unwrap();
        assert_eq!(a["Value"], json!([1, 2]));
    }

    #[test]
    fn gate_data_vector_has_bounds() {
        let g: Value = serde_json::from_str(&default_gate_data(GateType::Vector).unwrap()).unwrap();
        assert_eq!(g["MaxVector"]["magnitude"], "Infinity");
        assert_eq!(default_gate_data(GateType::Number), default_io_value(GateType::Number));
    }
}
