//! Parameter value initialization

use serde_json::{Map, Value};

/// Parameter values for a report.
///
/// For each declared parameter the first present value wins: an explicit
/// override, the report's `defaultParams` entry, the parameter's own
/// `default`, then the zero value of its `type`.
pub fn init_parameters(report: &Value, overrides: &Map<String, Value>) -> Map<String, Value> {
    let mut params = Map::new();
    let declared = report
        .get("parameters")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    let report_defaults = report.get("defaultParams").and_then(Value::as_object);

    for parameter in declared {
        let Some(name) = parameter.get("name").and_then(Value::as_str) else {
            continue;
        };
        let value = overrides
            .get(name)
            .or_else(|| report_defaults.and_then(|d| d.get(name)))
            .or_else(|| parameter.get("default").filter(|v| !v.is_null()))
            .cloned()
            .unwrap_or_else(|| type_default(parameter.get("type").and_then(Value::as_str)));
        params.insert(name.to_string(), value);
    }

    params
}

fn type_default(ty: Option<&str>) -> Value {
    match ty {
        Some("string") | Some("text") => Value::String(String::new()),
        Some("number") | Some("integer") => Value::from(0),
        Some("boolean") => Value::Bool(false),
        Some("array") => Value::Array(Vec::new()),
        Some("object") => Value::Object(Map::new()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence_of_parameter_sources() {
        let report = json!({
            "parameters": [
                { "name": "a", "type": "number", "default": 1 },
                { "name": "b", "type": "number", "default": 1 },
                { "name": "c", "type": "number", "default": 1 },
                { "name": "d", "type": "string" },
                { "type": "string" }
            ],
            "defaultParams": { "b": 2, "c": 2 }
        });
        let mut overrides = Map::new();
        overrides.insert("c".into(), json!(3));

        let params = init_parameters(&report, &overrides);
        assert_eq!(params.get("a"), Some(&json!(1)));
        assert_eq!(params.get("b"), Some(&json!(2)));
        assert_eq!(params.get("c"), Some(&json!(3)));
        assert_eq!(params.get("d"), Some(&json!("")));
        assert_eq!(params.len(), 4);
    }

    #[test]
    fn test_report_without_parameters() {
        assert!(init_parameters(&json!({ "type": "page" }), &Map::new()).is_empty());
    }
}
