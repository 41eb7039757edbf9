//! # Serializer
//!
//! Full and compact renderings of a report.
//!
//! `compact` strips values equal to their documented defaults; `expand`
//! puts the defaults back, so `expand(compact(x))` is equivalent to `x` for
//! reports that only use documented defaults.

use crate::path::Path;
use crate::pipeline::{format_source, ExprMode, ExprSource};
use crate::store::REPORT;
use folio_expr::StringifyOptions;
use serde_json::{json, Map, Value};

/// Widget and source fields holding expressions
const EXPR_FIELDS: [&str; 6] = ["text", "url", "source", "hide", "context", "html"];
const SOURCE_EXPR_FIELDS: [&str; 3] = ["filter", "sort", "group"];

/// Layout switches that mean nothing when falsy
const LAYOUT_TOGGLES: [&str; 3] = ["layout", "br", "float"];

/// Root attributes dropped when empty
const ROOT_EMPTY_DEFAULTS: [&str; 5] = ["context", "defaultParams", "sources", "parameters", "headers"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactOptions {
    /// Render as object-literal source instead of JSON
    pub source: bool,
    /// With `source`, render strings as template literals
    pub template_strings: bool,
}

/// Pretty JSON, unmodified
pub fn full(report: &Value) -> String {
    serde_json::to_string_pretty(report).unwrap_or_default()
}

pub fn compact(report: &Value, options: CompactOptions) -> String {
    let stripped = strip(report);
    if options.source {
        let mut out = String::new();
        write_literal(&stripped, options.template_strings, 0, &mut out);
        out
    } else {
        serde_json::to_string(&stripped).unwrap_or_default()
    }
}

/// Report with every default-valued attribute removed
pub fn strip(report: &Value) -> Value {
    let Value::Object(map) = report else {
        return report.clone();
    };

    let mut out = Map::new();
    for (key, value) in map {
        match (key.as_str(), value) {
            ("classifyStyles", Value::Bool(true)) => continue,
            ("classifyStyles", Value::Bool(false)) => {
                out.insert(key.clone(), value.clone());
                continue;
            }
            ("orientation", Value::String(o)) if o == "landscape" => continue,
            ("header" | "footer", v) if !has_widgets(v) => continue,
            (k, v) if ROOT_EMPTY_DEFAULTS.contains(&k) && is_empty(v) => continue,
            _ => {}
        }
        if let Some(value) = strip_node(value) {
            out.insert(key.clone(), value);
        }
    }
    Value::Object(out)
}

/// Stripped copy of a nested value; `None` when nothing is left
fn strip_node(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => {
            let kind = map.get("type").and_then(Value::as_str);
            let mut out = Map::new();
            for (key, child) in map {
                if matches!(child, Value::Bool(false)) {
                    continue;
                }
                if LAYOUT_TOGGLES.contains(&key.as_str()) && !folio_expr::truthy(child) {
                    continue;
                }
                if key == "height"
                    && child.as_str() == Some("auto")
                    && matches!(kind, Some("container") | Some("repeater"))
                {
                    continue;
                }
                let stripped = if key == "font" {
                    strip_font(child, kind == Some("html"))
                } else {
                    strip_node(child)
                };
                if let Some(stripped) = stripped {
                    out.insert(key.clone(), stripped);
                }
            }
            (!out.is_empty()).then_some(Value::Object(out))
        }
        Value::Array(items) => {
            // array items keep their positions, so empty items stay
            let out: Vec<Value> = items
                .iter()
                .map(|item| strip_node(item).unwrap_or_else(|| empty_like(item)))
                .collect();
            (!out.is_empty()).then_some(Value::Array(out))
        }
        other => Some(other.clone()),
    }
}

fn strip_font(font: &Value, markup: bool) -> Option<Value> {
    let Value::Object(map) = font else {
        return strip_node(font);
    };
    let out: Map<String, Value> = map
        .iter()
        .filter(|(_, v)| !matches!(v, Value::Null | Value::Bool(false)) && v.as_str() != Some(""))
        .filter(|(k, v)| !(markup && k.as_str() == "line" && v.as_f64() == Some(0.0)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    (!out.is_empty()).then_some(Value::Object(out))
}

fn empty_like(value: &Value) -> Value {
    match value {
        Value::Array(_) => json!([]),
        _ => json!({}),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn has_widgets(value: &Value) -> bool {
    value
        .get("widgets")
        .and_then(Value::as_array)
        .is_some_and(|w| !w.is_empty())
}

/// Re-apply the documented defaults removed by [`strip`]
pub fn expand(compacted: &Value) -> Value {
    let mut report = compacted.clone();
    let Value::Object(map) = &mut report else {
        return report;
    };

    map.entry("orientation").or_insert_with(|| json!("landscape"));
    map.entry("classifyStyles").or_insert(Value::Bool(true));
    map.entry("sources").or_insert_with(|| json!([]));
    map.entry("parameters").or_insert_with(|| json!([]));
    let delimited = map.get("type").and_then(Value::as_str) == Some("delimited");
    if delimited {
        map.entry("fields").or_insert_with(|| json!([]));
        map.entry("headers").or_insert_with(|| json!([]));
    } else {
        map.entry("widgets").or_insert_with(|| json!([]));
    }

    for value in map.values_mut() {
        expand_node(value);
    }
    report
}

fn expand_node(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if matches!(map.get("type").and_then(Value::as_str), Some("container") | Some("repeater")) {
                map.entry("height").or_insert_with(|| json!("auto"));
            }
            if map.get("type").and_then(Value::as_str) == Some("container") {
                map.entry("widgets").or_insert_with(|| json!([]));
            }
            for child in map.values_mut() {
                expand_node(child);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(expand_node),
        _ => {}
    }
}

/// Format every embedded expression in place
pub fn reformat_expressions(report: &mut Value, options: StringifyOptions) {
    if let Some(Value::Array(sources)) = report.get_mut("sources") {
        for source in sources.iter_mut() {
            for field in SOURCE_EXPR_FIELDS {
                reformat_field(source, field, ExprMode::default(), options);
            }
        }
    }
    reformat_widgets(report, options);
}

fn reformat_widgets(node: &mut Value, options: StringifyOptions) {
    match node {
        Value::Object(map) => {
            if map.contains_key("type") {
                for field in EXPR_FIELDS {
                    let mode = if field == "html" {
                        ExprMode::markup()
                    } else {
                        ExprMode::default()
                    };
                    reformat_field(node, field, mode, options);
                }
            }
            if let Value::Object(map) = node {
                for (key, child) in map.iter_mut() {
                    if key != "sources" {
                        reformat_widgets(child, options);
                    }
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| reformat_widgets(item, options)),
        _ => {}
    }
}

/// Every non-empty embedded expression with its store path and grammar
pub fn expressions(report: &Value) -> Vec<(Path, ExprSource, ExprMode)> {
    let mut found = Vec::new();
    let base = Path::root().join(REPORT);
    for (index, source) in report.get("sources").and_then(Value::as_array).into_iter().flatten().enumerate() {
        let path = base.join("sources").join(index);
        for field in SOURCE_EXPR_FIELDS {
            push_expression(source, &path, field, ExprMode::default(), &mut found);
        }
    }
    collect_widgets(report, &base, &mut found);
    found
}

fn collect_widgets(node: &Value, path: &Path, found: &mut Vec<(Path, ExprSource, ExprMode)>) {
    match node {
        Value::Object(map) => {
            if map.contains_key("type") {
                for field in EXPR_FIELDS {
                    let mode = if field == "html" {
                        ExprMode::markup()
                    } else {
                        ExprMode::default()
                    };
                    push_expression(node, path, field, mode, found);
                }
            }
            for (key, child) in map {
                if key != "sources" {
                    collect_widgets(child, &path.join(key.as_str()), found);
                }
            }
        }
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                collect_widgets(item, &path.join(index), found);
            }
        }
        _ => {}
    }
}

fn push_expression(
    node: &Value,
    path: &Path,
    field: &str,
    mode: ExprMode,
    found: &mut Vec<(Path, ExprSource, ExprMode)>,
) {
    let Some(source) = node.get(field).and_then(ExprSource::from_value) else {
        return;
    };
    if matches!(&source, ExprSource::Text(t) if t.trim().is_empty()) {
        return;
    }
    found.push((path.join(field), source, mode));
}

fn reformat_field(node: &mut Value, field: &str, mode: ExprMode, options: StringifyOptions) {
    let Some(value) = node.get_mut(field) else {
        return;
    };
    if let Some(source) = ExprSource::from_value(value) {
        if matches!(&source, ExprSource::Text(t) if t.trim().is_empty()) {
            return;
        }
        *value = format_source(&source, mode, options).to_value();
    }
}

/// Object-literal source with unquoted identifier keys
fn write_literal(value: &Value, template_strings: bool, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth + 1);
    let close_pad = "  ".repeat(depth);
    match value {
        Value::Object(map) if map.is_empty() => out.push_str("{}"),
        Value::Object(map) => {
            out.push_str("{\n");
            for (i, (key, child)) in map.iter().enumerate() {
                out.push_str(&pad);
                out.push_str(&literal_key(key));
                out.push_str(": ");
                write_literal(child, template_strings, depth + 1, out);
                if i + 1 < map.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str(&close_pad);
            out.push('}');
        }
        Value::Array(items) if items.is_empty() => out.push_str("[]"),
        Value::Array(items) => {
            out.push_str("[\n");
            for (i, item) in items.iter().enumerate() {
                out.push_str(&pad);
                write_literal(item, template_strings, depth + 1, out);
                if i + 1 < items.len() {
                    out.push(',');
                }
                out.push('\n');
            }
            out.push_str(&close_pad);
            out.push(']');
        }
        Value::String(s) if template_strings => out.push_str(&template_literal(s)),
        other => out.push_str(&other.to_string()),
    }
}

fn literal_key(key: &str) -> String {
    let mut chars = key.chars();
    let ident = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };
    if ident {
        key.to_string()
    } else {
        Value::String(key.to_string()).to_string()
    }
}

fn template_literal(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('`', "\\`").replace("${", "\\${");
    format!("`{}`", escaped)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn documented_defaults_report() -> Value {
        json!({
            "type": "page",
            "orientation": "landscape",
            "classifyStyles": true,
            "sources": [],
            "parameters": [],
            "widgets": [
                { "type": "container", "height": "auto", "widgets": [{ "type": "label", "text": ":a" }] },
                {
                    "type": "repeater",
                    "height": "auto",
                    "source": "*S",
                    "row": { "type": "container", "height": "auto", "widgets": [] }
                }
            ]
        })
    }

    #[test]
    fn test_compact_strips_defaults() {
        let report = json!({
            "type": "page",
            "orientation": "landscape",
            "classifyStyles": true,
            "context": "",
            "defaultParams": {},
            "header": { "widgets": [] },
            "widgets": [
                { "type": "label", "text": ":a", "hide": false, "br": false, "font": { "family": "", "size": 12 } },
                { "type": "html", "html": "x", "font": { "line": 0 } },
                { "type": "container", "height": "auto", "margin": {}, "widgets": [] }
            ]
        });
        let stripped = strip(&report);
        assert_eq!(
            stripped,
            json!({
                "type": "page",
                "widgets": [
                    { "type": "label", "text": ":a", "font": { "size": 12 } },
                    { "type": "html", "html": "x" },
                    { "type": "container" }
                ]
            })
        );
    }

    #[test]
    fn test_classify_styles_kept_only_when_false() {
        assert_eq!(strip(&json!({ "classifyStyles": false }))["classifyStyles"], json!(false));
        assert_eq!(strip(&json!({ "classifyStyles": true })).get("classifyStyles"), None);
    }

    #[test]
    fn test_expand_compact_is_equivalent() {
        let report = documented_defaults_report();
        let compacted: Value = serde_json::from_str(&compact(&report, CompactOptions::default())).unwrap();
        assert_eq!(expand(&compacted), report);
    }

    #[test]
    fn test_source_literal_rendering() {
        let report = json!({ "type": "page", "widgets": [{ "type": "label", "text": "`a` ${b}" }] });
        let json_strings = compact(&report, CompactOptions { source: true, template_strings: false });
        assert!(json_strings.starts_with("{\n  type: \"page\",\n  widgets: ["));
        assert!(json_strings.contains("text: \"`a` ${b}\""));

        let templates = compact(&report, CompactOptions { source: true, template_strings: true });
        assert!(templates.contains("type: `page`"));
        assert!(templates.contains("text: `\\`a\\` \\${b}`"));
    }

    #[test]
    fn test_reformat_expressions() {
        let mut report = json!({
            "type": "page",
            "sources": [{ "name": "S", "source": "s", "filter": "a>1" }],
            "widgets": [
                { "type": "label", "text": "a+b" },
                { "type": "label", "text": ["x*2", { "text": "y+1", "bold": true }, 3] },
                { "type": "html", "html": "<b>{{a+1}}</b>" },
                { "type": "label", "text": "broken +" },
                { "type": "container", "widgets": [{ "type": "image", "url": "'a'+'b'" }] }
            ]
        });
        reformat_expressions(&mut report, StringifyOptions::default());
        assert_eq!(report["sources"][0]["filter"], json!("a > 1"));
        assert_eq!(report["widgets"][0]["text"], json!("a + b"));
        assert_eq!(report["widgets"][1]["text"], json!(["x * 2", { "text": "y + 1", "bold": true }, 3]));
        assert_eq!(report["widgets"][2]["html"], json!("<b>{{ a + 1 }}</b>"));
        assert_eq!(report["widgets"][3]["text"], json!("broken +"));
        assert_eq!(report["widgets"][4]["widgets"][0]["url"], json!("'a' + 'b'"));
    }

    #[test]
    fn test_expressions_are_listed_with_paths() {
        let report = json!({
            "type": "page",
            "sources": [{ "name": "S", "filter": "x > 1", "sort": "" }],
            "widgets": [
                { "type": "html", "html": "<b>{{ a }}</b>" },
                { "type": "repeater", "source": "*S", "row": { "type": "container", "widgets": [{ "type": "label", "text": ":x" }] } }
            ]
        });
        let listed: Vec<(String, bool)> = expressions(&report)
            .into_iter()
            .map(|(path, _, mode)| (path.to_string(), mode.markup))
            .collect();
        assert_eq!(
            listed,
            vec![
                ("report.sources[0].filter".to_string(), false),
                ("report.widgets[0].html".to_string(), true),
                ("report.widgets[1].source".to_string(), false),
                ("report.widgets[1].row.widgets[0].text".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_full_is_pretty_json() {
        let report = json!({ "type": "page" });
        assert_eq!(full(&report), "{\n  \"type\": \"page\"\n}");
    }
}
