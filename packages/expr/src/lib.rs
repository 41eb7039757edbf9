//! # Folio Expressions
//!
//! The expression language embedded in report definitions.
//!
//! ```text
//! text ──► lexer (logos) ──► parser ──► Ast ──► stringify (wrap/indent)
//!                                        │
//!                                        └──► evaluate(Context) ──► serde_json::Value
//! ```
//!
//! Two grammars share the same tree: [`parse`] reads a single expression and
//! [`parse_template`] reads markup text with `{{ expr }}` interpolations.
//! Both consume the whole input; failures are [`ParseError`] values carrying
//! position, a rendered excerpt, and an optional deeper `latest` error.
//!
//! Evaluation walks a chain of [`Context`]s ending at a shared [`Root`] that
//! holds resolved sources (`*name`), parameters (`!name`), special values
//! (`@now`) and the [`Operators`] registry used by calls.

pub mod ast;
pub mod error;
pub mod eval;
pub mod inspect;
pub mod lexer;
pub mod operators;
pub mod params;
pub mod parser;
pub mod stringify;

pub use ast::{Ast, BinaryOp, Literal, PathPart, RefPrefix, Reference, TemplatePart, UnaryOp};
pub use error::{EvalError, EvalResult, ParseError, ParseResult};
pub use eval::{
    clock_specials, display, evaluate, evaluate_str, evaluate_template, truthy, type_of, Context, Root,
};
pub use inspect::{first_row, inspect, FieldInfo};
pub use operators::{OperatorFn, Operators};
pub use params::init_parameters;
pub use parser::{parse, parse_template};
pub use stringify::{stringify, StringifyOptions};

/// Parse and re-stringify; the input is returned unchanged when it does not parse
pub fn format(text: &str, options: StringifyOptions) -> String {
    match parse(text) {
        Ok(ast) => stringify(&ast, options),
        Err(_) => text.to_string(),
    }
}

/// [`format`] for markup text
pub fn format_template(text: &str, options: StringifyOptions) -> String {
    match parse_template(text) {
        Ok(ast) => stringify(&ast, options),
        Err(_) => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_is_idempotent() {
        for text in [
            "a+b*c",
            "{a:1,b:[1,2,3],c:'a long string value here'}",
            "if( x>1 ,'big','small')",
            "not(a or b)",
        ] {
            let once = format(text, StringifyOptions::default());
            let twice = format(&once, StringifyOptions::default());
            assert_eq!(once, twice, "{}", text);
        }
    }

    #[test]
    fn test_format_returns_invalid_text_unchanged() {
        assert_eq!(format("a +", StringifyOptions::default()), "a +");
        assert_eq!(format_template("{{ x", StringifyOptions::default()), "{{ x");
    }

    #[test]
    fn test_format_canonicalizes() {
        assert_eq!(format("a+b*c", StringifyOptions::default()), "a + b * c");
        assert_eq!(format("(a+b)*c", StringifyOptions::flat()), "(a + b) * c");
    }
}
