//! File boundary: reading reports and data in, handing files out

use crate::errors::EditorError;
use crate::model::Download;
use folio_expr::{evaluate, evaluate_template, parse, Context, Root};
use serde_json::{json, Value};
use std::sync::Arc;

pub const JSON_MIME: &str = "application/json";
pub const SOURCE_MIME: &str = "text/javascript";

/// Parse JSON, falling back to an expression literal such as
/// `{ type: 'page', widgets: [] }`
pub fn parse_value(text: &str) -> Result<Value, EditorError> {
    let json_error = match serde_json::from_str::<Value>(text) {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    let literal = parse(text).map_err(|error| {
        EditorError::Load(format!("not JSON ({}) and not an expression ({})", json_error, error.message))
    })?;
    let ctx = Context::root(Arc::new(Root::new(json!({}))));
    evaluate(&ctx, &literal).map_err(|error| EditorError::Load(format!("expression failed: {}", error)))
}

/// Read a report; the result must be an object
pub fn load_report(text: &str) -> Result<Value, EditorError> {
    let result = parse_value(text).and_then(|value| match value {
        Value::Object(_) => Ok(value),
        other => Err(EditorError::Load(format!(
            "expected a report object, got {}",
            folio_expr::type_of(&other)
        ))),
    });
    match &result {
        Ok(report) => tracing::info!(kind = ?report.get("type"), "report loaded"),
        Err(error) => tracing::error!(%error, "report load abandoned"),
    }
    result
}

/// Read a data payload for import
pub fn import_data(text: &str) -> Result<Value, EditorError> {
    parse_value(text).inspect_err(|error| tracing::error!(%error, "data import abandoned"))
}

/// Build a download; `filename` is a template evaluated against `ctx`
pub fn download(ctx: &Context, filename: &str, content: String, mime: &str) -> Download {
    let filename = match evaluate_template(ctx, filename) {
        Ok(value) => folio_expr::display(&value),
        Err(error) => {
            tracing::warn!(%error, filename, "download name kept as written");
            filename.to_string()
        }
    };
    Download {
        filename,
        content,
        mime: mime.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_json_report() {
        let report = load_report(r#"{ "type": "page", "widgets": [] }"#).unwrap();
        assert_eq!(report, json!({ "type": "page", "widgets": [] }));
    }

    #[test]
    fn test_load_expression_literal() {
        let report = load_report("{ type: 'flow', widgets: [{ type: 'label', text: ':x' }] }").unwrap();
        assert_eq!(report["type"], json!("flow"));
        assert_eq!(report["widgets"][0]["text"], json!(":x"));
    }

    #[test]
    fn test_load_failures() {
        assert!(matches!(load_report("{ type: "), Err(EditorError::Load(_))));
        assert!(matches!(load_report("[1, 2]"), Err(EditorError::Load(_))));
    }

    #[test]
    fn test_import_accepts_any_value() {
        assert_eq!(import_data("[1, 2]").unwrap(), json!([1, 2]));
        assert_eq!(import_data("[{ a: 1 }]").unwrap(), json!([{ "a": 1 }]));
    }

    #[test]
    fn test_download_name_template() {
        let ctx = Context::root(Arc::new(Root::new(json!({ "title": "sales" }))));
        let file = download(&ctx, "{{ title }}.json", "{}".to_string(), JSON_MIME);
        assert_eq!(file.filename, "sales.json");
        assert_eq!(file.mime, JSON_MIME);

        let kept = download(&ctx, "{{ broken +", String::new(), JSON_MIME);
        assert_eq!(kept.filename, "{{ broken +");
    }
}
