// =============================================================================
// Matrixon Homeserver Core - Canonical JSON Encoding
// =============================================================================
//
// Project: Matrixon - a federated Matrix homeserver core
// Author: arkSong (arksong2018@gmail.com)
// Contributors: Matrixon Development Team
// Date: 2024-12-11
// Version: 0.11.0-alpha (file-backed object store core)
// License: Apache 2.0 / MIT
//
// Description:
//   Deterministic JSON encoding for event hashing: no whitespace, object keys 
//   sorted byte-wise, floating-point values dropped entirely.
//
// Performance Targets:
//   • Single-pass recursive encode, no intermediate allocation beyond the output buffer
//
// Architecture:
//   • Byte-wise key sort, not locale-aware string comparison
// =============================================================================

//! Deterministic JSON encoding for event hashing (§4.12): no
//! whitespace, object keys sorted byte-wise, floating-point values
//! dropped entirely from objects and arrays.

use serde_json::Value;

/// Encode `value` in canonical form.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Bool(_) => out.push_str(&value.to_string()),
        Value::Number(n) => {
            // Floats are not permitted by this encoding; only integers
            // reach here because callers filter them out one level up.
            // A bare top-level float still needs a defined rendering,
            // so fall back to its compact form.
            out.push_str(&n.to_string());
        }
        Value::String(s) => out.push_str(&serde_json::to_string(s).expect("string always encodes")),
        Value::Array(items) => {
            out.push('[');
            let mut first = true;
            for item in items {
                if is_float(item) {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
            let mut first = true;
            for key in keys {
                let v = &map[key];
                if is_float(v) {
                    continue;
                }
                if !first {
                    out.push(',');
                }
                first = false;
                out.push_str(&serde_json::to_string(key).expect("string always encodes"));
                out.push(':');
                write_value(v, out);
            }
            out.push('}');
        }
    }
}

fn is_float(value: &Value) -> bool {
    matches!(value, Value::Number(n) if n.is_f64() && n.as_i64().is_none() && n.as_u64().is_none())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sorts_object_keys_byte_wise() {
        let v = json!({"b": 1, "a": 2, "A": 3});
        assert_eq!(encode(&v), r#"{"A":3,"a":2,"b":1}"#);
    }

    #[test]
    fn omits_whitespace() {
        let v = json!({"a": [1, 2, 3]});
        assert_eq!(encode(&v), r#"{"a":[1,2,3]}"#);
    }

    #[test]
    fn drops_float_object_fields() {
        let v = json!({"a": 1, "b": 1.5});
        assert_eq!(encode(&v), r#"{"a":1}"#);
    }

    #[test]
    fn drops_float_array_elements() {
        let v = json!([1, 2.5, 3]);
        assert_eq!(encode(&v), "[1,3]");
    }

    #[test]
    fn is_stable_under_re_encoding() {
        let v = json!({"z": [true, null, "x"], "a": {"nested": 1}});
        let once = encode(&v);
        let parsed: Value = serde_json::from_str(&once).unwrap();
        let twice = encode(&parsed);
        assert_eq!(once, twice);
    }
}
