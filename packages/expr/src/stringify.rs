//! Serializer converts an expression AST back to source text
//!
//! Output is canonical: parsing it yields the same tree, so
//! `stringify(parse(stringify(parse(t))))` equals `stringify(parse(t))`.

use crate::ast::*;

/// Formatting options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StringifyOptions {
    /// Break arrays, objects and calls longer than this; 0 disables wrapping
    pub wrap: usize,
    /// Indent wrapped children
    pub indent: bool,
}

impl Default for StringifyOptions {
    fn default() -> Self {
        Self {
            wrap: 40,
            indent: true,
        }
    }
}

impl StringifyOptions {
    /// Single-line output
    pub fn flat() -> Self {
        Self {
            wrap: 0,
            indent: false,
        }
    }
}

pub struct Stringifier {
    options: StringifyOptions,
    indent_level: usize,
    indent_string: String,
}

impl Stringifier {
    pub fn new(options: StringifyOptions) -> Self {
        Self {
            options,
            indent_level: 0,
            indent_string: if options.indent { "  ".to_string() } else { String::new() },
        }
    }

    pub fn stringify(&mut self, ast: &Ast) -> String {
        let mut output = String::new();
        self.write_node(ast, &mut output);
        output
    }

    fn write_node(&mut self, ast: &Ast, output: &mut String) {
        match ast {
            Ast::Literal { value } => write_literal(value, output),
            Ast::Ref { reference } => self.write_reference(reference, output),
            Ast::Array { items } => {
                let children: Vec<&Ast> = items.iter().collect();
                self.write_group("[", "]", &children, None, output);
            }
            Ast::Object { entries } => {
                let keys: Vec<String> = entries.iter().map(|(k, _)| format_key(k)).collect();
                let children: Vec<&Ast> = entries.iter().map(|(_, v)| v).collect();
                self.write_group("{ ", " }", &children, Some(keys.as_slice()), output);
            }
            Ast::Unary { op, operand } => {
                match op {
                    UnaryOp::Neg => output.push('-'),
                    UnaryOp::Not => output.push_str("not "),
                }
                // `-2` would re-parse as a folded literal
                let wrap = matches!(
                    operand.as_ref(),
                    Ast::Binary { .. }
                        | Ast::Unary { .. }
                        | Ast::Literal {
                            value: Literal::Number(_)
                        }
                );
                self.write_wrapped(operand, wrap, output);
            }
            Ast::Binary { op, left, right } => {
                let prec = op.precedence();
                let left_wrap = matches!(left.as_ref(), Ast::Binary { op: l, .. } if l.precedence() < prec);
                let right_wrap = matches!(right.as_ref(), Ast::Binary { op: r, .. } if r.precedence() <= prec);
                self.write_wrapped(left, left_wrap, output);
                output.push(' ');
                output.push_str(op.symbol());
                output.push(' ');
                self.write_wrapped(right, right_wrap, output);
            }
            Ast::Call { name, args } => {
                let children: Vec<&Ast> = args.iter().collect();
                let open = format!("{}(", name);
                self.write_group(&open, ")", &children, None, output);
            }
            Ast::Template { parts } => {
                for part in parts {
                    match part {
                        TemplatePart::Text(text) => output.push_str(&text.replace("{{", "\\{{")),
                        TemplatePart::Expr(expr) => {
                            output.push_str("{{ ");
                            let mut inner = Stringifier::new(StringifyOptions::flat());
                            output.push_str(&inner.stringify(expr));
                            output.push_str(" }}");
                        }
                    }
                }
            }
        }
    }

    fn write_wrapped(&mut self, ast: &Ast, parens: bool, output: &mut String) {
        if parens {
            output.push('(');
            self.write_node(ast, output);
            output.push(')');
        } else {
            self.write_node(ast, output);
        }
    }

    fn write_reference(&mut self, reference: &Reference, output: &mut String) {
        match reference.prefix {
            RefPrefix::Local => {}
            RefPrefix::Parent(hops) => output.push_str(&"^".repeat(hops)),
            RefPrefix::Root => output.push('~'),
            RefPrefix::Source => output.push('*'),
            RefPrefix::Special => output.push('@'),
            RefPrefix::Param => output.push('!'),
            RefPrefix::Label => output.push(':'),
        }

        for (i, part) in reference.path.iter().enumerate() {
            match part {
                PathPart::Field(name) => {
                    if i > 0 {
                        output.push('.');
                    }
                    output.push_str(name);
                }
                PathPart::Index(index) => {
                    output.push('[');
                    let mut inner = Stringifier::new(StringifyOptions::flat());
                    output.push_str(&inner.stringify(index));
                    output.push(']');
                }
            }
        }
    }

    /// Comma separated children, broken over lines when the flat form is too wide
    fn write_group(
        &mut self,
        open: &str,
        close: &str,
        children: &[&Ast],
        keys: Option<&[String]>,
        output: &mut String,
    ) {
        if children.is_empty() {
            output.push_str(open.trim_end());
            output.push_str(close.trim_start());
            return;
        }

        let mut flat = String::new();
        flat.push_str(open);
        for (i, child) in children.iter().enumerate() {
            if i > 0 {
                flat.push_str(", ");
            }
            if let Some(keys) = keys {
                flat.push_str(&keys[i]);
                flat.push_str(": ");
            }
            let mut inner = Stringifier::new(StringifyOptions::flat());
            flat.push_str(&inner.stringify(child));
        }
        flat.push_str(close);

        let current_column = output.len() - output.rfind('\n').map(|i| i + 1).unwrap_or(0);
        if self.options.wrap == 0 || current_column + flat.len() <= self.options.wrap {
            output.push_str(&flat);
            return;
        }

        output.push_str(open.trim_end());
        self.indent_level += 1;
        for (i, child) in children.iter().enumerate() {
            output.push('\n');
            self.write_indent(output);
            if let Some(keys) = keys {
                output.push_str(&keys[i]);
                output.push_str(": ");
            }
            self.write_node(child, output);
            if i + 1 < children.len() {
                output.push(',');
            }
        }
        self.indent_level -= 1;
        output.push('\n');
        self.write_indent(output);
        output.push_str(close.trim_start());
    }

    fn write_indent(&self, output: &mut String) {
        for _ in 0..self.indent_level {
            output.push_str(&self.indent_string);
        }
    }
}

fn write_literal(value: &Literal, output: &mut String) {
    match value {
        Literal::Null => output.push_str("null"),
        Literal::Bool(b) => output.push_str(if *b { "true" } else { "false" }),
        Literal::Number(n) => output.push_str(&format_number(*n)),
        Literal::String(s) => output.push_str(&quote(s)),
    }
}

/// Integers print without a fractional part
pub fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// Single-quoted string literal
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for ch in s.chars() {
        match ch {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

const KEYWORDS: &[&str] = &["true", "false", "null", "and", "or", "not"];

fn format_key(key: &str) -> String {
    let mut chars = key.chars();
    let is_ident = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        }
        _ => false,
    };
    if is_ident && !KEYWORDS.contains(&key) {
        key.to_string()
    } else {
        quote(key)
    }
}

/// Render an AST to text
pub fn stringify(ast: &Ast, options: StringifyOptions) -> String {
    Stringifier::new(options).stringify(ast)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, parse_template};

    fn roundtrip(source: &str) {
        let ast = parse(source).unwrap();
        let text = stringify(&ast, StringifyOptions::default());
        let reparsed = parse(&text).unwrap_or_else(|e| panic!("{} -> {}: {}", source, text, e));
        assert_eq!(ast, reparsed, "{} -> {}", source, text);
    }

    #[test]
    fn test_roundtrip_samples() {
        for source in [
            ":label",
            "a - (b - c)",
            "(a or b) and c",
            "-(1 + 2)",
            "-(-1)",
            "-(2)",
            "not not x",
            "*orders[0].total * 2",
            "^^name + ~title",
            "{ 'a b': 1, c: [1, 2.5, 'x\\'y'], d: null }",
            "if(!flag, 'yes', 'no')",
            "[1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17]",
        ] {
            roundtrip(source);
        }
    }

    #[test]
    fn test_wrapping_breaks_long_arrays() {
        let ast = parse("['aaaaaaaaaa', 'bbbbbbbbbb', 'cccccccccc', 'dddddddddd']").unwrap();
        let text = stringify(&ast, StringifyOptions::default());
        assert_eq!(
            text,
            "[\n  'aaaaaaaaaa',\n  'bbbbbbbbbb',\n  'cccccccccc',\n  'dddddddddd'\n]"
        );

        let unwrapped = stringify(&ast, StringifyOptions { wrap: 0, indent: true });
        assert!(!unwrapped.contains('\n'));
    }

    #[test]
    fn test_wrapping_without_indent() {
        let ast = parse("{ first: 'aaaaaaaaaaaaaaa', second: 'bbbbbbbbbbbbbbbb' }").unwrap();
        let text = stringify(&ast, StringifyOptions { wrap: 20, indent: false });
        assert_eq!(text, "{\nfirst: 'aaaaaaaaaaaaaaa',\nsecond: 'bbbbbbbbbbbbbbbb'\n}");
    }

    #[test]
    fn test_numbers_render_canonically() {
        assert_eq!(format_number(3.0), "3");
        assert_eq!(format_number(2.5), "2.5");
    }

    #[test]
    fn test_template_roundtrip() {
        let ast = parse_template("Dear {{:name}}, total {{ *o.sum }}").unwrap();
        let text = stringify(&ast, StringifyOptions::default());
        assert_eq!(text, "Dear {{ :name }}, total {{ *o.sum }}");
        assert_eq!(parse_template(&text).unwrap(), ast);
    }

    mod generated {
        use super::*;
        use proptest::prelude::*;

        fn ident() -> impl Strategy<Value = String> {
            "[a-z_$][a-z0-9_]{0,5}".prop_filter("keyword", |name| !KEYWORDS.contains(&name.as_str()))
        }

        fn literal() -> impl Strategy<Value = Ast> {
            prop_oneof![
                Just(Ast::Literal { value: Literal::Null }),
                any::<bool>().prop_map(|b| Ast::Literal { value: Literal::Bool(b) }),
                (-4000i32..4000).prop_map(|n| Ast::number(n as f64 / 4.0)),
                "[a-zA-Z0-9 '\\\\]{0,6}".prop_map(|text: String| Ast::string(text)),
            ]
        }

        fn reference() -> impl Strategy<Value = Ast> {
            let prefix = prop_oneof![
                Just(RefPrefix::Local),
                (1usize..4).prop_map(RefPrefix::Parent),
                Just(RefPrefix::Root),
                Just(RefPrefix::Source),
                Just(RefPrefix::Special),
                Just(RefPrefix::Param),
            ];
            let part = prop_oneof![
                ident().prop_map(PathPart::Field),
                (0u32..20).prop_map(|i| PathPart::Index(Box::new(Ast::number(i as f64)))),
                ident().prop_map(|name| PathPart::Index(Box::new(Ast::reference(RefPrefix::Local, &[name.as_str()])))),
            ];
            let path = (ident(), prop::collection::vec(part, 0..3)).prop_map(|(first, rest)| {
                let mut path = vec![PathPart::Field(first)];
                path.extend(rest);
                path
            });
            let label = ident().prop_map(|name| Ast::reference(RefPrefix::Label, &[name.as_str()]));
            prop_oneof![
                3 => (prefix, path).prop_map(|(prefix, path)| Ast::Ref {
                    reference: Reference { prefix, path }
                }),
                1 => label,
            ]
        }

        fn binary_op() -> impl Strategy<Value = BinaryOp> {
            prop_oneof![
                Just(BinaryOp::Or),
                Just(BinaryOp::And),
                Just(BinaryOp::Eq),
                Just(BinaryOp::NotEq),
                Just(BinaryOp::Lt),
                Just(BinaryOp::Lte),
                Just(BinaryOp::Gt),
                Just(BinaryOp::Gte),
                Just(BinaryOp::Add),
                Just(BinaryOp::Sub),
                Just(BinaryOp::Mul),
                Just(BinaryOp::Div),
                Just(BinaryOp::Mod),
            ]
        }

        fn expression() -> impl Strategy<Value = Ast> {
            let leaf = prop_oneof![literal(), reference()];
            leaf.prop_recursive(4, 32, 4, |inner| {
                let key = prop_oneof![ident(), "[a-z ]{0,5}"];
                prop_oneof![
                    (binary_op(), inner.clone(), inner.clone()).prop_map(|(op, left, right)| Ast::Binary {
                        op,
                        left: Box::new(left),
                        right: Box::new(right),
                    }),
                    (prop_oneof![Just(UnaryOp::Neg), Just(UnaryOp::Not)], inner.clone())
                        .prop_map(|(op, operand)| Ast::Unary { op, operand: Box::new(operand) }),
                    (ident(), prop::collection::vec(inner.clone(), 0..4))
                        .prop_map(|(name, args)| Ast::Call { name, args }),
                    prop::collection::vec(inner.clone(), 0..4).prop_map(|items| Ast::Array { items }),
                    prop::collection::vec((key, inner), 0..4).prop_map(|entries| Ast::Object { entries }),
                ]
            })
        }

        proptest! {
            #[test]
            fn test_generated_trees_roundtrip(ast in expression(), wrap in prop_oneof![Just(0usize), Just(20), Just(40)], indent in any::<bool>()) {
                let text = stringify(&ast, StringifyOptions { wrap, indent });
                let reparsed = parse(&text);
                prop_assert!(reparsed.is_ok(), "{} did not parse: {:?}", text, reparsed.err());
                prop_assert_eq!(reparsed.unwrap(), ast, "{}", text);
            }

            #[test]
            fn test_generated_format_is_idempotent(ast in expression()) {
                let once = stringify(&ast, StringifyOptions::default());
                let twice = stringify(&parse(&once).unwrap(), StringifyOptions::default());
                prop_assert_eq!(once, twice);
            }
        }
    }
}
