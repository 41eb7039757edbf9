//! Field discovery for sample data

use crate::eval::type_of;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

/// Fields of an object, or of the first row of an array
pub fn inspect(value: &Value) -> Vec<FieldInfo> {
    match value {
        Value::Object(map) => map
            .iter()
            .map(|(name, v)| FieldInfo {
                name: name.clone(),
                ty: type_of(v).to_string(),
            })
            .collect(),
        Value::Array(items) => items.first().map(inspect).unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// First row of an array, the value itself otherwise
pub fn first_row(value: &Value) -> Value {
    match value {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}
