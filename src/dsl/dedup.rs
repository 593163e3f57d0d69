//! Constant de-duplication. Equal literal constants share one node; the key is
//! the canonical JSON of the constant's attribute map, so `1`, `1.0` and `"1"`
//! stay distinct.

use std::collections::HashMap;
use std::fmt::Write as _;

use serde_json::{Map, Value};

#[derive(Debug, Default)]
pub struct ConstantCache {
    by_key: HashMap<String, String>,
}

impl ConstantCache {
    pub fn get(&self, attrs: &Map<String, Value>) -> Option<&str> {
        self.by_key.get(&cache_key(attrs)).map(String::as_str)
    }

    pub fn insert(&mut self, attrs: &Map<String, Value>, node_id: &str) {
        self.by_key.entry(cache_key(attrs)).or_insert_with(|| node_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

pub fn cache_key(attrs: &Map<String, Value>) -> String {
    let mut out = String::new();
    write_canonical(&mut out, &Value::Object(attrs.clone()));
    out
}

/// JSON with object keys sorted at every level.
fn write_canonical(out: &mut String, v: &Value) {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, k) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let _ = write!(out, "{}:", Value::String(k.clone()));
                if let Some(inner) = map.get(k) {
                    write_canonical(out, inner);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(out, item);
            }
            out.push(']');
        }
        other => {
            let _ = write!(out, "{other}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn key_is_type_sensitive() {
        let a = cache_key(&attrs(json!({"value": 5})));
        let b = cache_key(&attrs(json!({"value": "5"})));
        let c = cache_key(&attrs(json!({"value": 5.0})));
        let d = cache_key(&attrs(json!({"value": true})));
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn key_ignores_insertion_order() {
        let mut m1 = Map::new();
        m1.insert("value".into(), json!({"z": 3, "x": 1, "y": 2}));
        m1.insert("name".into(), json!("v"));
        let m2 = attrs(json!({"name": "v", "value": {"x": 1, "y": 2, "z": 3}}));
        assert_eq!(cache_key(&m1), cache_key(&m2));
    }

    #[test]
    fn first_insert_wins() {
        let mut cache = ConstantCache::default();
        let a = attrs(json!({"value": 2}));
        cache.insert(&a, "constant_0");
        cache.insert(&a, "constant_1");
        assert_eq!(cache.get(&a), Some("constant_0"));
        assert_eq!(cache.len(), 1);
    }
}
