//! Expression AST

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Ast {
    Literal { value: Literal },
    Ref { reference: Reference },
    Array { items: Vec<Ast> },
    Object { entries: Vec<(String, Ast)> },
    Unary { op: UnaryOp, operand: Box<Ast> },
    Binary {
        op: BinaryOp,
        left: Box<Ast>,
        right: Box<Ast>,
    },
    Call { name: String, args: Vec<Ast> },
    /// Markup text with `{{ }}` interpolations
    Template { parts: Vec<TemplatePart> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Literal {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
}

/// Where a reference starts looking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefPrefix {
    /// Current context
    Local,
    /// `^`, one per hop
    Parent(usize),
    /// `~`
    Root,
    /// `*`
    Source,
    /// `@`
    Special,
    /// `!`
    Param,
    /// `:name`, falls back to the bare name
    Label,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    pub prefix: RefPrefix,
    pub path: Vec<PathPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PathPart {
    Field(String),
    Index(Box<Ast>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

impl BinaryOp {
    pub fn precedence(self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::NotEq => 3,
            BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 6,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Or => "or",
            BinaryOp::And => "and",
            BinaryOp::Eq => "==",
            BinaryOp::NotEq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplatePart {
    Text(String),
    Expr(Ast),
}

impl Ast {
    pub fn string(value: impl Into<String>) -> Self {
        Ast::Literal {
            value: Literal::String(value.into()),
        }
    }

    pub fn number(value: f64) -> Self {
        Ast::Literal {
            value: Literal::Number(value),
        }
    }

    pub fn reference(prefix: RefPrefix, fields: &[&str]) -> Self {
        Ast::Ref {
            reference: Reference {
                prefix,
                path: fields.iter().map(|f| PathPart::Field(f.to_string())).collect(),
            },
        }
    }

    pub fn is_reference(&self) -> bool {
        matches!(self, Ast::Ref { .. })
    }

    /// Build a literal expression tree for a plain data value
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Null => Ast::Literal { value: Literal::Null },
            Value::Bool(b) => Ast::Literal {
                value: Literal::Bool(*b),
            },
            Value::Number(n) => Ast::number(n.as_f64().unwrap_or_default()),
            Value::String(s) => Ast::string(s.clone()),
            Value::Array(items) => Ast::Array {
                items: items.iter().map(Ast::from_value).collect(),
            },
            Value::Object(map) => Ast::Object {
                entries: map
                    .iter()
                    .map(|(k, v)| (k.clone(), Ast::from_value(v)))
                    .collect(),
            },
        }
    }
}
