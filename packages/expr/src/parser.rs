//! Recursive-descent parser for expressions and markup templates
//!
//! Both entry points consume the whole input: trailing tokens are an error.

use crate::ast::*;
use crate::error::{ParseError, ParseResult};
use crate::lexer::{lex, Token, TokenSpan};

/// Parser over a pre-lexed token stream
pub struct Parser<'src> {
    source: &'src str,
    tokens: Vec<(Token<'src>, TokenSpan)>,
    pos: usize,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> ParseResult<Self> {
        let mut tokens = Vec::new();
        for result in lex(source) {
            match result {
                Ok(spanned) => tokens.push((spanned.token, spanned.span)),
                Err(err) => return Err(ParseError::at(source, err.span, err.message)),
            }
        }

        Ok(Self {
            source,
            tokens,
            pos: 0,
        })
    }

    /// Parse a single expression and require end of input
    pub fn parse_complete(&mut self) -> ParseResult<Ast> {
        if self.is_at_end() {
            return Err(ParseError::unexpected_eof(self.source, "an expression"));
        }

        let expr = self.parse_expression()?;

        if !self.is_at_end() {
            return Err(ParseError::unexpected_token(
                self.source,
                self.peek_span(),
                "end of input",
                &Self::format_token(self.peek()),
            ));
        }

        Ok(expr)
    }

    pub fn parse_expression(&mut self) -> ParseResult<Ast> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> ParseResult<Ast> {
        let mut left = self.parse_and()?;
        while self.match_token(Token::OrKw) || self.match_token(Token::Or) {
            let right = self.parse_and()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult<Ast> {
        let mut left = self.parse_equality()?;
        while self.match_token(Token::AndKw) || self.match_token(Token::And) {
            let right = self.parse_equality()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn parse_equality(&mut self) -> ParseResult<Ast> {
        let mut left = self.parse_comparison()?;
        while let Some(op) = self.match_equality_op() {
            let right = self.parse_comparison()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> ParseResult<Ast> {
        let mut left = self.parse_additive()?;
        while let Some(op) = self.match_comparison_op() {
            let right = self.parse_additive()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> ParseResult<Ast> {
        let mut left = self.parse_multiplicative()?;
        while let Some(op) = self.match_additive_op() {
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> ParseResult<Ast> {
        let mut left = self.parse_unary()?;
        while let Some(op) = self.match_multiplicative_op() {
            let right = self.parse_unary()?;
            left = binary(op, left, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult<Ast> {
        if self.match_token(Token::Minus) {
            // Fold `-1` into a negative literal so data values round-trip
            if let Some((Token::Number(n), _)) = self.peek() {
                let n = *n;
                self.advance();
                return self.parse_postfix(Ast::number(-n));
            }
            let operand = self.parse_unary()?;
            return Ok(Ast::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }

        if self.match_token(Token::Not) {
            let operand = self.parse_unary()?;
            return Ok(Ast::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }

        let primary = self.parse_primary()?;
        self.parse_postfix(primary)
    }

    fn parse_primary(&mut self) -> ParseResult<Ast> {
        let span = self.peek_span();
        let token = match self.advance() {
            Some((token, _)) => token.clone(),
            None => return Err(ParseError::unexpected_eof(self.source, "an expression")),
        };

        match token {
            Token::Null => Ok(Ast::Literal { value: Literal::Null }),
            Token::True => Ok(Ast::Literal {
                value: Literal::Bool(true),
            }),
            Token::False => Ok(Ast::Literal {
                value: Literal::Bool(false),
            }),
            Token::Number(n) => Ok(Ast::number(n)),
            Token::String(raw) => Ok(Ast::string(unescape(raw))),
            Token::Symbol(name) => Ok(Ast::Ref {
                reference: Reference {
                    prefix: RefPrefix::Label,
                    path: vec![PathPart::Field(name.to_string())],
                },
            }),
            Token::Ident(name) => {
                if self.check(Token::LParen) {
                    self.parse_call(name.to_string())
                } else {
                    self.parse_reference_path(RefPrefix::Local, Some(name.to_string()))
                }
            }
            Token::Caret => {
                let mut hops = 1;
                while self.match_token(Token::Caret) {
                    hops += 1;
                }
                self.parse_reference_path(RefPrefix::Parent(hops), None)
            }
            Token::Tilde => self.parse_reference_path(RefPrefix::Root, None),
            Token::Star => self.parse_reference_path(RefPrefix::Source, None),
            Token::At => self.parse_reference_path(RefPrefix::Special, None),
            Token::Bang => self.parse_reference_path(RefPrefix::Param, None),
            Token::LParen => {
                let expr = self.parse_expression()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Token::LBracket => self.parse_array(),
            Token::LBrace => self.parse_object(),
            other => Err(ParseError::unexpected_token(
                self.source,
                span,
                "an expression",
                &Self::format_token(Some(&(other, span))),
            )),
        }
    }

    /// Reference after its prefix; `first` is the already-consumed leading name
    fn parse_reference_path(&mut self, prefix: RefPrefix, first: Option<String>) -> ParseResult<Ast> {
        let mut path = Vec::new();
        match first {
            Some(name) => path.push(PathPart::Field(name)),
            None => {
                // `~` and `^` may stand alone, or go straight into an index
                if let Some((Token::Ident(_), _)) = self.peek() {
                    path.push(PathPart::Field(self.expect_ident()?));
                } else if !matches!(prefix, RefPrefix::Root | RefPrefix::Parent(_)) {
                    return Err(ParseError::unexpected_token(
                        self.source,
                        self.peek_span(),
                        "identifier",
                        &Self::format_token(self.peek()),
                    ));
                }
            }
        }

        loop {
            if self.match_token(Token::Dot) {
                path.push(PathPart::Field(self.expect_ident()?));
            } else if self.match_token(Token::LBracket) {
                let index = self.parse_expression()?;
                self.expect(Token::RBracket)?;
                path.push(PathPart::Index(Box::new(index)));
            } else {
                break;
            }
        }

        Ok(Ast::Ref {
            reference: Reference { prefix, path },
        })
    }

    /// Parse `name(arg, ...)`
    fn parse_call(&mut self, name: String) -> ParseResult<Ast> {
        self.expect(Token::LParen)?;
        let args = self.parse_list(Token::RParen)?;
        Ok(Ast::Call { name, args })
    }

    fn parse_array(&mut self) -> ParseResult<Ast> {
        let items = self.parse_list(Token::RBracket)?;
        Ok(Ast::Array { items })
    }

    /// Comma separated expressions up to and including `close`; trailing comma allowed
    fn parse_list(&mut self, close: Token<'src>) -> ParseResult<Vec<Ast>> {
        let mut items = Vec::new();
        while !self.check(close.clone()) {
            items.push(self.parse_expression()?);
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_object(&mut self) -> ParseResult<Ast> {
        let mut entries = Vec::new();
        while !self.check(Token::RBrace) {
            let key = match self.peek() {
                Some((Token::String(raw), _)) => unescape(raw),
                Some((Token::Ident(_), _)) => self.peek_ident_like(),
                Some((Token::True, _)) => "true".to_string(),
                Some((Token::False, _)) => "false".to_string(),
                Some((Token::Null, _)) => "null".to_string(),
                Some((Token::AndKw, _)) => "and".to_string(),
                Some((Token::OrKw, _)) => "or".to_string(),
                Some((Token::Not, _)) => "not".to_string(),
                _ => {
                    return Err(ParseError::unexpected_token(
                        self.source,
                        self.peek_span(),
                        "object key",
                        &Self::format_token(self.peek()),
                    ))
                }
            };
            self.advance();

            // `{a:b}` lexes the value as a label symbol; split it back into `:` and `b`
            if let Some((Token::Symbol(name), span)) = self.peek() {
                let ident = (
                    Token::Ident(*name),
                    TokenSpan {
                        start: span.start + 1,
                        end: span.end,
                    },
                );
                self.tokens[self.pos] = ident;
            } else {
                self.expect(Token::Colon)?;
            }
            let value = self.parse_expression()?;
            entries.push((key, value));

            if !self.match_token(Token::Comma) {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Ast::Object { entries })
    }

    /// Indexing and member access after a literal or call
    fn parse_postfix(&mut self, expr: Ast) -> ParseResult<Ast> {
        if !self.check(Token::Dot) && !self.check(Token::LBracket) {
            return Ok(expr);
        }
        if let Ast::Ref { .. } = expr {
            return Ok(expr);
        }
        Err(ParseError::at(
            self.source,
            self.peek_span(),
            "Only references can be indexed",
        ))
    }

    fn peek_ident_like(&self) -> String {
        match self.peek() {
            Some((Token::Ident(s), _)) => s.to_string(),
            _ => String::new(),
        }
    }

    // Helper methods for matching operators

    fn match_equality_op(&mut self) -> Option<BinaryOp> {
        if self.match_token(Token::EqEq) {
            Some(BinaryOp::Eq)
        } else if self.match_token(Token::NotEq) {
            Some(BinaryOp::NotEq)
        } else {
            None
        }
    }

    fn match_comparison_op(&mut self) -> Option<BinaryOp> {
        if self.match_token(Token::Lte) {
            Some(BinaryOp::Lte)
        } else if self.match_token(Token::Gte) {
            Some(BinaryOp::Gte)
        } else if self.match_token(Token::Lt) {
            Some(BinaryOp::Lt)
        } else if self.match_token(Token::Gt) {
            Some(BinaryOp::Gt)
        } else {
            None
        }
    }

    fn match_additive_op(&mut self) -> Option<BinaryOp> {
        if self.match_token(Token::Plus) {
            Some(BinaryOp::Add)
        } else if self.match_token(Token::Minus) {
            Some(BinaryOp::Sub)
        } else {
            None
        }
    }

    fn match_multiplicative_op(&mut self) -> Option<BinaryOp> {
        if self.match_token(Token::Star) {
            Some(BinaryOp::Mul)
        } else if self.match_token(Token::Slash) {
            Some(BinaryOp::Div)
        } else if self.match_token(Token::Percent) {
            Some(BinaryOp::Mod)
        } else {
            None
        }
    }

    // Helper methods

    fn peek(&self) -> Option<&(Token<'src>, TokenSpan)> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&(Token<'src>, TokenSpan)> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn check(&self, token: Token) -> bool {
        if let Some((t, _)) = self.peek() {
            std::mem::discriminant(t) == std::mem::discriminant(&token)
        } else {
            false
        }
    }

    fn match_token(&mut self, token: Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> ParseResult<()> {
        if self.check(token.clone()) {
            self.advance();
            Ok(())
        } else if self.is_at_end() {
            Err(ParseError::unexpected_eof(
                self.source,
                &Self::format_expected_token(&token),
            ))
        } else {
            Err(ParseError::unexpected_token(
                self.source,
                self.peek_span(),
                &Self::format_expected_token(&token),
                &Self::format_token(self.peek()),
            ))
        }
    }

    fn expect_ident(&mut self) -> ParseResult<String> {
        match self.peek() {
            Some((Token::Ident(s), _)) => {
                let val = s.to_string();
                self.advance();
                Ok(val)
            }
            None => Err(ParseError::unexpected_eof(self.source, "identifier")),
            _ => Err(ParseError::unexpected_token(
                self.source,
                self.peek_span(),
                "identifier",
                &Self::format_token(self.peek()),
            )),
        }
    }

    /// Get the span of the next token (the one we're about to consume)
    fn peek_span(&self) -> TokenSpan {
        self.tokens
            .get(self.pos)
            .map(|(_, span)| *span)
            .unwrap_or_else(|| {
                let end = self.tokens.last().map(|(_, span)| span.end).unwrap_or(0);
                TokenSpan { start: end, end }
            })
    }

    /// Format a token for display in error messages
    fn format_token(token: Option<&(Token, TokenSpan)>) -> String {
        match token {
            None => "end of input".to_string(),
            Some((Token::Ident(s), _)) => format!("identifier '{}'", s),
            Some((Token::String(s), _)) => format!("string {}", s),
            Some((Token::Number(n), _)) => format!("number {}", n),
            Some((Token::Symbol(s), _)) => format!("label ':{}'", s),
            Some((Token::LBrace, _)) => "'{'".to_string(),
            Some((Token::RBrace, _)) => "'}'".to_string(),
            Some((Token::LParen, _)) => "'('".to_string(),
            Some((Token::RParen, _)) => "')'".to_string(),
            Some((Token::LBracket, _)) => "'['".to_string(),
            Some((Token::RBracket, _)) => "']'".to_string(),
            Some((Token::Colon, _)) => "':'".to_string(),
            Some((Token::Comma, _)) => "','".to_string(),
            Some((Token::Dot, _)) => "'.'".to_string(),
            Some((token, _)) => format!("{:?}", token),
        }
    }

    fn format_expected_token(token: &Token) -> String {
        match token {
            Token::RBrace => "'}'".to_string(),
            Token::RParen => "')'".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Colon => "':'".to_string(),
            token => format!("{:?}", token),
        }
    }
}

fn binary(op: BinaryOp, left: Ast, right: Ast) -> Ast {
    Ast::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}

/// Strip quotes and resolve escapes of a string token
fn unescape(raw: &str) -> String {
    let inner = &raw[1..raw.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}

/// Parse a complete expression
pub fn parse(source: &str) -> ParseResult<Ast> {
    Parser::new(source)?.parse_complete()
}

/// Parse markup text with `{{ expr }}` interpolations
pub fn parse_template(source: &str) -> ParseResult<Ast> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut rest = 0;

    while let Some(found) = source[rest..].find("{{") {
        let open = rest + found;

        // `\{{` stays literal
        if source[..open].ends_with('\\') {
            text.push_str(&source[rest..open - 1]);
            text.push_str("{{");
            rest = open + 2;
            continue;
        }

        text.push_str(&source[rest..open]);
        let body_start = open + 2;
        let close = match source[body_start..].find("}}") {
            Some(offset) => body_start + offset,
            None => {
                return Err(ParseError::at(
                    source,
                    TokenSpan {
                        start: open,
                        end: open + 2,
                    },
                    "Unclosed interpolation",
                ))
            }
        };

        let expr = parse(&source[body_start..close]).map_err(|inner| {
            ParseError::at(
                source,
                TokenSpan {
                    start: open,
                    end: close + 2,
                },
                "Invalid interpolation",
            )
            .with_latest(inner.rebase(source, body_start))
        })?;

        if !text.is_empty() {
            parts.push(TemplatePart::Text(std::mem::take(&mut text)));
        }
        parts.push(TemplatePart::Expr(expr));
        rest = close + 2;
    }

    text.push_str(&source[rest..]);
    if !text.is_empty() {
        parts.push(TemplatePart::Text(text));
    }

    Ok(Ast::Template { parts })
}
