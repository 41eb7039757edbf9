//! Error types for parsing and evaluation

use crate::lexer::TokenSpan;
use serde::Serialize;
use thiserror::Error;

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for evaluation
pub type EvalResult<T> = Result<T, EvalError>;

/// Structured parse failure: position, excerpt, and an optional deeper cause
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("{message} at line {line}, column {column}")]
pub struct ParseError {
    pub message: String,
    /// 1-based
    pub line: usize,
    /// 1-based, counted in characters
    pub column: usize,
    /// Byte offset into the parsed text
    pub offset: usize,
    #[serde(skip)]
    pub length: usize,
    /// Rendered source excerpt pointing at the failure
    pub context: String,
    /// Deeper failure reported by a nested grammar stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<Box<ParseError>>,
}

impl ParseError {
    pub fn at(source: &str, span: TokenSpan, message: impl Into<String>) -> Self {
        let message = message.into();
        let start = span.start.min(source.len());
        let end = span.end.clamp(start, source.len());
        let (line, column) = line_column(source, start);
        let context = render_context(source, start, end, &message);

        Self {
            message,
            line,
            column,
            offset: start,
            length: end - start,
            context,
            latest: None,
        }
    }

    pub fn unexpected_token(source: &str, span: TokenSpan, expected: &str, found: &str) -> Self {
        Self::at(source, span, format!("Expected {}, found {}", expected, found))
    }

    pub fn unexpected_eof(source: &str, expected: &str) -> Self {
        let end = source.len();
        Self::at(
            source,
            TokenSpan { start: end, end },
            format!("Unexpected end of input, expected {}", expected),
        )
    }

    pub fn with_latest(mut self, latest: ParseError) -> Self {
        self.latest = Some(Box::new(latest));
        self
    }

    /// Re-anchor an error produced for a slice of `source` starting at `base`
    pub fn rebase(&self, source: &str, base: usize) -> Self {
        let span = TokenSpan {
            start: base + self.offset,
            end: base + self.offset + self.length,
        };
        let mut rebased = Self::at(source, span, self.message.clone());
        rebased.latest = self
            .latest
            .as_ref()
            .map(|inner| Box::new(inner.rebase(source, base)));
        rebased
    }

    /// The innermost error in the `latest` chain
    pub fn deepest(&self) -> &ParseError {
        match &self.latest {
            Some(inner) => inner.deepest(),
            None => self,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Division by zero")]
    DivisionByZero,

    #[error("Operator '{name}' failed: {message}")]
    Operator { name: String, message: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let before = &source[..offset];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

/// Render an excerpt with ariadne, colour disabled so it can be stored as text
fn render_context(source: &str, start: usize, end: usize, message: &str) -> String {
    use ariadne::{Config, Label, Report, ReportKind, Source};

    if source.is_empty() {
        return String::new();
    }

    // ariadne counts characters, not bytes
    let char_start = source[..start].chars().count();
    let char_end = char_start + source[start..end].chars().count();
    let filename = "expr";

    let mut output = Vec::new();
    let written = Report::build(ReportKind::Error, filename, char_start)
        .with_config(Config::default().with_color(false))
        .with_message(message)
        .with_label(Label::new((filename, char_start..char_end.max(char_start))).with_message(message))
        .finish()
        .write((filename, Source::from(source)), &mut output);

    match written {
        Ok(()) => String::from_utf8(output).unwrap_or_default(),
        Err(_) => String::new(),
    }
}
