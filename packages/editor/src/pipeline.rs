//! # Expression Pipeline
//!
//! Debounced parse cycle for the buffer linked as `expr`.
//!
//! ```text
//! set_text ──► version += 1 ──► Parsing ──(latency)──► poll ──► Valid(ast) | Invalid(error)
//! set_ast  ──► stringify    ──► version += 1 ──► Valid(ast), nothing scheduled
//! ```
//!
//! Every parse is tagged with the buffer version it was scheduled for. A
//! result whose version is no longer current is dropped, so text and AST
//! writes never feed back into each other.

use crate::debounce::Debounce;
use folio_expr::{format, format_template, parse, parse_template, stringify, Ast, ParseError, StringifyOptions};
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// What the buffer holds
#[derive(Debug, Clone, PartialEq)]
pub enum ExprSource {
    Text(String),
    /// Ordered entries; strings and `{ text }` objects are parsed, others pass through
    Fragments(Vec<Value>),
}

impl ExprSource {
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(items) => Some(Self::Fragments(items.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Text(text) => Value::String(text.clone()),
            Self::Fragments(items) => Value::Array(items.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExprMode {
    /// Target is markup text with interpolations
    pub markup: bool,
    /// Target is a label text
    pub label: bool,
    /// Target is a template string
    pub template: bool,
}

impl ExprMode {
    pub fn markup() -> Self {
        Self {
            markup: true,
            ..Self::default()
        }
    }

    pub fn template() -> Self {
        Self {
            template: true,
            ..Self::default()
        }
    }

    fn template_grammar(self) -> bool {
        self.markup || self.template
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Parsed(Ast),
    Raw(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    Single(Ast),
    Fragments(Vec<Fragment>),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExprState {
    #[default]
    Idle,
    Parsing {
        version: u64,
    },
    Valid(Parsed),
    Invalid(ParseError),
}

#[derive(Debug)]
pub struct ExprPipeline {
    source: Option<ExprSource>,
    mode: ExprMode,
    version: u64,
    state: ExprState,
    pending: Debounce<u64>,
    options: StringifyOptions,
}

impl ExprPipeline {
    pub fn new(latency: Duration, options: StringifyOptions) -> Self {
        Self {
            source: None,
            mode: ExprMode::default(),
            version: 0,
            state: ExprState::Idle,
            pending: Debounce::new(latency),
            options,
        }
    }

    /// Seed the buffer for a new edit target
    pub fn open(&mut self, source: ExprSource, mode: ExprMode) {
        self.mode = mode;
        self.write(source);
    }

    pub fn close(&mut self) {
        self.source = None;
        self.mode = ExprMode::default();
        self.version += 1;
        self.pending.cancel();
        self.state = ExprState::Idle;
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    pub fn source(&self) -> Option<&ExprSource> {
        self.source.as_ref()
    }

    /// Buffer text when it is not a fragment list
    pub fn text(&self) -> Option<&str> {
        match &self.source {
            Some(ExprSource::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub fn mode(&self) -> ExprMode {
        self.mode
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn state(&self) -> &ExprState {
        &self.state
    }

    pub fn ast(&self) -> Option<&Ast> {
        match &self.state {
            ExprState::Valid(Parsed::Single(ast)) => Some(ast),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&ParseError> {
        match &self.state {
            ExprState::Invalid(error) => Some(error),
            _ => None,
        }
    }

    pub fn set_latency(&mut self, latency: Duration) {
        self.pending.set_delay(latency);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.deadline()
    }

    /// Replace the buffer; schedules a parse for the new version
    pub fn set_text(&mut self, text: impl Into<String>) -> u64 {
        self.write(ExprSource::Text(text.into()))
    }

    pub fn set_source(&mut self, source: ExprSource) -> u64 {
        self.write(source)
    }

    /// Replace the tree; the buffer text is derived and no parse is scheduled
    pub fn set_ast(&mut self, ast: Ast) -> &str {
        let text = stringify(&ast, self.options);
        self.version += 1;
        self.pending.cancel();
        self.state = ExprState::Valid(Parsed::Single(ast));
        self.source = Some(ExprSource::Text(text));
        self.text().unwrap_or_default()
    }

    /// Run a parse whose debounce has elapsed. Returns true when the state changed.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.pending.take_due(now) {
            Some(version) => self.run(version),
            None => false,
        }
    }

    /// Parse immediately, skipping the debounce
    pub fn flush(&mut self) -> bool {
        match self.pending.cancel() {
            Some(version) => self.run(version),
            None => false,
        }
    }

    /// Store a parse result computed for `version`; stale results are dropped
    pub fn complete(&mut self, version: u64, result: Result<Parsed, ParseError>) -> bool {
        if version != self.version {
            tracing::debug!(version, current = self.version, "discarding stale parse");
            return false;
        }
        self.state = match result {
            Ok(parsed) => ExprState::Valid(parsed),
            Err(error) => {
                tracing::debug!(%error, "expression invalid");
                ExprState::Invalid(error)
            }
        };
        true
    }

    /// Canonical text of the buffer; returned unchanged when it does not parse
    pub fn format(&self) -> Option<ExprSource> {
        let source = self.source.as_ref()?;
        Some(format_source(source, self.mode, self.options))
    }

    fn write(&mut self, source: ExprSource) -> u64 {
        self.version += 1;
        self.source = Some(source);
        self.state = ExprState::Parsing { version: self.version };
        self.pending.schedule(self.version);
        self.version
    }

    fn run(&mut self, version: u64) -> bool {
        let Some(source) = &self.source else {
            return false;
        };
        let result = parse_source(source, self.mode);
        self.complete(version, result)
    }
}

/// Parse a buffer in consume-all mode
pub fn parse_source(source: &ExprSource, mode: ExprMode) -> Result<Parsed, ParseError> {
    let grammar = |text: &str| {
        if mode.template_grammar() {
            parse_template(text)
        } else {
            parse(text)
        }
    };

    match source {
        ExprSource::Text(text) => grammar(text).map(Parsed::Single),
        ExprSource::Fragments(items) => {
            let mut fragments = Vec::with_capacity(items.len());
            for item in items {
                let text = match item {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(map) => map.get("text").and_then(Value::as_str),
                    _ => None,
                };
                match text {
                    Some(text) => fragments.push(Fragment::Parsed(grammar(text)?)),
                    None => fragments.push(Fragment::Raw(item.clone())),
                }
            }
            Ok(Parsed::Fragments(fragments))
        }
    }
}

pub fn format_source(source: &ExprSource, mode: ExprMode, options: StringifyOptions) -> ExprSource {
    let format_text = |text: &str| {
        if mode.template_grammar() {
            format_template(text, options)
        } else {
            format(text, options)
        }
    };

    match source {
        ExprSource::Text(text) => ExprSource::Text(format_text(text)),
        ExprSource::Fragments(items) => ExprSource::Fragments(
            items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Value::String(format_text(s)),
                    Value::Object(map) => match map.get("text").and_then(Value::as_str) {
                        Some(text) => {
                            let mut map = map.clone();
                            map.insert("text".to_string(), Value::String(format_text(text)));
                            Value::Object(map)
                        }
                        None => item.clone(),
                    },
                    other => other.clone(),
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use folio_expr::RefPrefix;
    use serde_json::json;

    fn pipeline() -> ExprPipeline {
        ExprPipeline::new(Duration::from_millis(150), StringifyOptions::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_parses_after_latency() {
        let mut pipe = pipeline();
        pipe.open(ExprSource::Text(":label".into()), ExprMode::default());
        pipe.set_text(":name");
        assert!(matches!(pipe.state(), ExprState::Parsing { .. }));
        assert!(!pipe.poll(Instant::now()));

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(pipe.poll(Instant::now()));
        assert_eq!(pipe.ast(), Some(&Ast::reference(RefPrefix::Label, &["name"])));
        assert!(pipe.error().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_then_valid_clears_error() {
        let mut pipe = pipeline();
        pipe.open(ExprSource::Text("a +".into()), ExprMode::default());
        assert!(pipe.flush());
        let error = pipe.error().unwrap();
        assert_eq!(error.line, 1);
        assert!(!error.context.is_empty());

        pipe.set_text("a + 1");
        assert!(pipe.flush());
        assert!(pipe.error().is_none());
        assert!(pipe.ast().is_some());
    }

    #[test]
    fn test_stale_results_are_discarded() {
        let mut pipe = pipeline();
        let old = pipe.set_text("a");
        pipe.set_text("b");
        assert!(!pipe.complete(old, Ok(Parsed::Single(Ast::string("a")))));
        assert!(matches!(pipe.state(), ExprState::Parsing { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_ast_derives_text_without_reparse() {
        let mut pipe = pipeline();
        pipe.set_text("x");
        let text = pipe.set_ast(parse("a+b").unwrap()).to_string();
        assert_eq!(text, "a + b");
        assert_eq!(pipe.next_deadline(), None);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!pipe.poll(Instant::now()));
        assert!(pipe.ast().is_some());
    }

    #[test]
    fn test_fragments_stop_at_first_failure() {
        let source = ExprSource::Fragments(vec![json!("a"), json!({ "text": "b +" }), json!("c +")]);
        let error = parse_source(&source, ExprMode::default()).unwrap_err();
        assert!(error.message.contains("end of input"));

        let source = ExprSource::Fragments(vec![json!("a"), json!({ "text": "1" }), json!(5)]);
        let parsed = parse_source(&source, ExprMode::default()).unwrap();
        assert_eq!(
            parsed,
            Parsed::Fragments(vec![
                Fragment::Parsed(parse("a").unwrap()),
                Fragment::Parsed(parse("1").unwrap()),
                Fragment::Raw(json!(5)),
            ])
        );
    }

    #[test]
    fn test_markup_uses_template_grammar() {
        let source = ExprSource::Text("<b>{{ name }}</b>".into());
        assert!(parse_source(&source, ExprMode::markup()).is_ok());
        assert!(parse_source(&source, ExprMode::default()).is_err());
    }

    #[test]
    fn test_format_is_idempotent_and_tolerant() {
        let mut pipe = pipeline();
        pipe.open(ExprSource::Text("if(a,b,c)+1".into()), ExprMode::default());
        let once = pipe.format().unwrap();
        assert_eq!(once, ExprSource::Text("if(a, b, c) + 1".into()));
        pipe.set_source(once.clone());
        assert_eq!(pipe.format().unwrap(), once);

        pipe.set_text("a +");
        assert_eq!(pipe.format().unwrap(), ExprSource::Text("a +".into()));
    }
}
