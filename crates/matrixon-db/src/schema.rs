// =============================================================================
// Matrixon Homeserver Core - JSON Schema Layer
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
//   FromJson/ToJson traits and the require_* helpers records implement against, 
//   tolerant of unknown fields and strict only about fields a type actually 
//   needs.
//
// Performance Targets:
//   • No reflection: every record writes its own encode/decode
//
// Architecture:
//   • Decode failures surface as StoreError::Corrupt, not a panic
// =============================================================================

use crate::error::StoreError;
use serde_json::Value;

/// Decode a stored JSON document into a typed record (§4.2's JSON
/// Schema Layer). Implementations should be tolerant of unknown fields
/// and reject a document only when a field required for the type is
/// missing or of the wrong shape.
pub trait FromJson: Sized {
    fn from_json(value: &Value) -> Result<Self, StoreError>;
}

/// Encode a typed record back into a JSON document for storage.
pub trait ToJson {
    fn to_json(&self) -> Value;
}

/// A small helper used throughout the higher crates: pull a required
/// string field out of an object, producing a [`StoreError::Corrupt`]
/// with the field name on failure.
pub fn require_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, StoreError> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Corrupt(format!("missing or non-string field '{field}'")))
}

/// Pull a required u64 field out of an object.
pub fn require_u64(value: &Value, field: &str) -> Result<u64, StoreError> {
    value
        .get(field)
        .and_then(Value::as_u64)
        .ok_or_else(|| StoreError::Corrupt(format!("missing or non-integer field '{field}'")))
}

/// Pull a required i64 field out of an object.
pub fn require_i64(value: &Value, field: &str) -> Result<i64, StoreError> {
    value
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| StoreError::Corrupt(format!("missing or non-integer field '{field}'")))
}

/// Pull a required bool field out of an object.
pub fn require_bool(value: &Value, field: &str) -> Result<bool, StoreError> {
    value
        .get(field)
        .and_then(Value::as_bool)
        .ok_or_else(|| StoreError::Corrupt(format!("missing or non-boolean field '{field}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn require_str_reports_the_missing_field() {
        let v = json!({"other": 1});
        let err = require_str(&v, "name").unwrap_err();
        assert!(matches!(err, StoreError::Corrupt(msg) if msg.contains("name")));
    }

    #[test]
    fn require_u64_rejects_negative_numbers() {
        let v = json!({"used": -1});
        assert!(require_u64(&v, "used").is_err());
        let v = json!({"used": 3});
        assert_eq!(require_u64(&v, "used").unwrap(), 3);
    }
}
