//! Typed views over the JSON document
//!
//! The store keeps plain `serde_json::Value` trees so unknown attributes
//! survive edits. These types are read out of it where an operation needs
//! structure.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Report-level subtrees that hold at most one widget container each
pub const SINGLETONS: [&str; 4] = ["header", "footer", "watermark", "overlay"];

/// Repeater-owned slots
pub const REPEATER_SLOTS: [&str; 4] = ["header", "row", "footer", "group"];

/// Tag names of focusable form controls
pub const FORM_CONTROL_TAGS: [&str; 3] = ["INPUT", "TEXTAREA", "SELECT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WidgetKind {
    Label,
    Image,
    Html,
    Container,
    Repeater,
    Measured,
}

impl WidgetKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "label" => Some(Self::Label),
            "image" => Some(Self::Image),
            "html" => Some(Self::Html),
            "container" => Some(Self::Container),
            "repeater" => Some(Self::Repeater),
            "measured" => Some(Self::Measured),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Label => "label",
            Self::Image => "image",
            Self::Html => "html",
            Self::Container => "container",
            Self::Repeater => "repeater",
            Self::Measured => "measured",
        }
    }

    /// Initial value of a freshly added widget
    pub fn template(self) -> Value {
        match self {
            Self::Label => json!({ "type": "label", "text": ":label" }),
            Self::Measured => json!({ "type": "measured", "text": ":label" }),
            Self::Image => json!({ "type": "image", "url": "''" }),
            Self::Html => json!({ "type": "html", "html": "" }),
            Self::Container => json!({ "type": "container", "widgets": [] }),
            Self::Repeater => json!({
                "type": "repeater",
                "source": "",
                "row": { "type": "container", "widgets": [] }
            }),
        }
    }

    /// Field opened for editing when the widget is selected
    pub fn default_expr_field(self) -> Option<&'static str> {
        match self {
            Self::Html => Some("html"),
            Self::Label | Self::Measured => Some("text"),
            Self::Image => Some("url"),
            Self::Container | Self::Repeater => None,
        }
    }

    /// Whether the default field holds markup rather than an expression
    pub fn is_markup(self) -> bool {
        matches!(self, Self::Html)
    }

    pub fn of(widget: &Value) -> Option<Self> {
        widget.get("type").and_then(Value::as_str).and_then(Self::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReportKind {
    Page,
    Flow,
    Delimited,
}

impl ReportKind {
    pub fn of(report: &Value) -> Self {
        match report.get("type").and_then(Value::as_str) {
            Some("delimited") => Self::Delimited,
            Some("flow") => Self::Flow,
            _ => Self::Page,
        }
    }
}

/// A report's binding to an available source
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDecl {
    pub name: String,
    /// Name of the available source backing this one
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Expressions evaluated and passed to computed producers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Map<String, Value>>,
}

impl SourceDecl {
    /// Declared sources of a report; malformed entries are skipped
    pub fn list(report: &Value) -> Vec<SourceDecl> {
        report
            .get("sources")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| serde_json::from_value(item.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Backing source name, defaulting to the declared name
    pub fn backing(&self) -> &str {
        if self.source.is_empty() {
            &self.name
        } else {
            &self.source
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceKind {
    #[default]
    Static,
    Fetch,
    Computed,
}

/// An externally owned data feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableSource {
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: SourceKind,
    /// Static payload or cached fetch result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Object of templates, or a string expression producing one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// Always re-fetch and never cache
    #[serde(default)]
    pub fetch: bool,
    /// Keep text as-is instead of parsing JSON
    #[serde(default)]
    pub eval: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    #[serde(default)]
    pub report: Value,
    #[serde(default)]
    pub sources: Value,
}

impl Project {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            report: json!({ "type": "page", "widgets": [] }),
            sources: json!([]),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tab {
    #[default]
    Designer,
    Sources,
    Parameters,
    Data,
    Output,
    Projects,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shortcut {
    Undo,
    Redo,
}

/// Whether focus inside an element with this tag name swallows shortcuts
pub fn is_form_control(tag: &str) -> bool {
    FORM_CONTROL_TAGS.iter().any(|t| t.eq_ignore_ascii_case(tag))
}

/// A generated file handed to the host for download
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Download {
    pub filename: String,
    pub content: String,
    pub mime: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_template() {
        assert_eq!(WidgetKind::Label.template(), json!({ "type": "label", "text": ":label" }));
        assert_eq!(WidgetKind::of(&WidgetKind::Repeater.template()), Some(WidgetKind::Repeater));
    }

    #[test]
    fn test_default_expr_fields() {
        assert_eq!(WidgetKind::Html.default_expr_field(), Some("html"));
        assert_eq!(WidgetKind::Measured.default_expr_field(), Some("text"));
        assert_eq!(WidgetKind::Image.default_expr_field(), Some("url"));
        assert_eq!(WidgetKind::Container.default_expr_field(), None);
    }

    #[test]
    fn test_source_decls_skip_malformed() {
        let report = json!({ "sources": [{ "name": "a", "source": "feed" }, 7, { "name": "b" }] });
        let decls = SourceDecl::list(&report);
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].backing(), "feed");
        assert_eq!(decls[1].backing(), "b");
    }

    #[test]
    fn test_available_source_reads_type() {
        let source: AvailableSource = serde_json::from_value(json!({
            "name": "feed", "type": "fetch", "method": "GET", "url": "https://x", "fetch": true
        }))
        .unwrap();
        assert_eq!(source.kind, SourceKind::Fetch);
        assert!(source.fetch);
        assert!(!source.eval);
        assert_eq!(source.data, None);
    }

    #[test]
    fn test_form_control_tags() {
        assert!(is_form_control("INPUT"));
        assert!(is_form_control("textarea"));
        assert!(!is_form_control("DIV"));
    }
}
