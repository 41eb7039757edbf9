//! Evaluator
//!
//! Evaluates an [`Ast`] against a chain of data contexts. Each context has a
//! value and an optional parent; the chain ends at the root context, which
//! also carries the resolved sources, parameter values, special values and
//! the operator registry.

use crate::ast::*;
use crate::error::{EvalError, EvalResult};
use crate::operators::Operators;
use crate::stringify::format_number;
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// Data shared by every context in a chain
#[derive(Debug, Clone, Default)]
pub struct Root {
    pub value: Value,
    pub sources: Map<String, Value>,
    pub params: Map<String, Value>,
    pub special: Map<String, Value>,
    pub operators: Arc<Operators>,
}

impl Root {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            operators: Arc::new(Operators::builtin()),
            ..Self::default()
        }
    }

    pub fn with_sources(mut self, sources: Map<String, Value>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params = params;
        self
    }

    pub fn with_special(mut self, special: Map<String, Value>) -> Self {
        self.special = special;
        self
    }

    pub fn with_operators(mut self, operators: Arc<Operators>) -> Self {
        self.operators = operators;
        self
    }
}

/// Special values available as `@now` and `@date`
pub fn clock_specials() -> Map<String, Value> {
    let now = chrono::Local::now();
    let mut special = Map::new();
    special.insert("now".to_string(), Value::String(now.to_rfc3339()));
    special.insert("date".to_string(), Value::String(now.format("%Y-%m-%d").to_string()));
    special
}

#[derive(Debug)]
struct Frame {
    value: Value,
    parent: Option<Context>,
    root: Arc<Root>,
}

/// One link of the context chain; cheap to clone
#[derive(Debug, Clone)]
pub struct Context {
    frame: Arc<Frame>,
}

impl Context {
    /// Root context; its value is `root.value`
    pub fn root(root: Arc<Root>) -> Self {
        Self {
            frame: Arc::new(Frame {
                value: root.value.clone(),
                parent: None,
                root,
            }),
        }
    }

    /// A nested context whose parent is `self`
    pub fn child(&self, value: Value) -> Self {
        Self {
            frame: Arc::new(Frame {
                value,
                parent: Some(self.clone()),
                root: self.frame.root.clone(),
            }),
        }
    }

    pub fn value(&self) -> &Value {
        &self.frame.value
    }

    pub fn parent(&self) -> Option<&Context> {
        self.frame.parent.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.frame.parent.is_none()
    }

    pub fn shared(&self) -> &Arc<Root> {
        &self.frame.root
    }

    /// Walk up `hops` parents, stopping at the root
    pub fn ancestor(&self, hops: usize) -> &Context {
        let mut current = self;
        for _ in 0..hops {
            match current.parent() {
                Some(parent) => current = parent,
                None => break,
            }
        }
        current
    }

    pub fn root_context(&self) -> &Context {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }
}

pub fn evaluate(ctx: &Context, ast: &Ast) -> EvalResult<Value> {
    match ast {
        Ast::Literal { value } => Ok(literal_value(value)),
        Ast::Ref { reference } => resolve_reference(ctx, reference),
        Ast::Array { items } => items
            .iter()
            .map(|item| evaluate(ctx, item))
            .collect::<EvalResult<Vec<_>>>()
            .map(Value::Array),
        Ast::Object { entries } => {
            let mut map = Map::new();
            for (key, value) in entries {
                map.insert(key.clone(), evaluate(ctx, value)?);
            }
            Ok(Value::Object(map))
        }
        Ast::Unary { op, operand } => {
            let value = evaluate(ctx, operand)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => match value.as_f64() {
                    Some(n) => Ok(number_value(-n)),
                    None => Err(EvalError::TypeError(format!("cannot negate {}", type_of(&value)))),
                },
            }
        }
        Ast::Binary { op, left, right } => {
            let left = evaluate(ctx, left)?;
            match op {
                BinaryOp::And if !truthy(&left) => Ok(left),
                BinaryOp::Or if truthy(&left) => Ok(left),
                BinaryOp::And | BinaryOp::Or => evaluate(ctx, right),
                _ => {
                    let right = evaluate(ctx, right)?;
                    binary(*op, &left, &right)
                }
            }
        }
        Ast::Call { name, args } => {
            let operator = ctx
                .shared()
                .operators
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::UnknownOperator(name.clone()))?;
            let args = args
                .iter()
                .map(|arg| evaluate(ctx, arg))
                .collect::<EvalResult<Vec<_>>>()?;
            operator(&args).map_err(|message| EvalError::Operator {
                name: name.clone(),
                message,
            })
        }
        Ast::Template { parts } => {
            let mut text = String::new();
            for part in parts {
                match part {
                    TemplatePart::Text(t) => text.push_str(t),
                    TemplatePart::Expr(expr) => text.push_str(&display(&evaluate(ctx, expr)?)),
                }
            }
            Ok(Value::String(text))
        }
    }
}

/// Parse and evaluate an expression
pub fn evaluate_str(ctx: &Context, source: &str) -> EvalResult<Value> {
    let ast = crate::parser::parse(source)?;
    evaluate(ctx, &ast)
}

/// Parse and evaluate markup text with `{{ }}` interpolations
pub fn evaluate_template(ctx: &Context, source: &str) -> EvalResult<Value> {
    let ast = crate::parser::parse_template(source)?;
    evaluate(ctx, &ast)
}

fn resolve_reference(ctx: &Context, reference: &Reference) -> EvalResult<Value> {
    let path = reference.path.as_slice();
    let shared = ctx.shared();

    let (base, rest) = match reference.prefix {
        RefPrefix::Local | RefPrefix::Label => (ctx.value().clone(), path),
        RefPrefix::Parent(hops) => (ctx.ancestor(hops).value().clone(), path),
        RefPrefix::Root => (ctx.root_context().value().clone(), path),
        RefPrefix::Source => named(&shared.sources, path),
        RefPrefix::Special => named(&shared.special, path),
        RefPrefix::Param => named(&shared.params, path),
    };

    let mut current = base;
    for part in rest {
        current = match part {
            PathPart::Field(name) => field(&current, name),
            PathPart::Index(index) => {
                let key = evaluate(ctx, index)?;
                match (&current, &key) {
                    (Value::Array(items), Value::Number(n)) => n
                        .as_f64()
                        .filter(|n| *n >= 0.0)
                        .and_then(|n| items.get(n as usize))
                        .cloned()
                        .unwrap_or(Value::Null),
                    _ => field(&current, &display(&key)),
                }
            }
        };
    }

    if reference.prefix == RefPrefix::Label && current.is_null() {
        if let Some(PathPart::Field(name)) = path.last() {
            return Ok(Value::String(name.clone()));
        }
    }
    Ok(current)
}

/// Look up the first path segment in a name table
fn named<'a>(table: &Map<String, Value>, path: &'a [PathPart]) -> (Value, &'a [PathPart]) {
    match path.split_first() {
        Some((PathPart::Field(name), rest)) => (table.get(name).cloned().unwrap_or(Value::Null), rest),
        _ => (Value::Object(table.clone()), path),
    }
}

fn field(value: &Value, name: &str) -> Value {
    match value {
        Value::Object(map) => map.get(name).cloned().unwrap_or(Value::Null),
        Value::Array(items) if name == "length" => Value::from(items.len()),
        Value::Array(items) => name
            .parse::<usize>()
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or(Value::Null),
        Value::String(s) if name == "length" => Value::from(s.chars().count()),
        _ => Value::Null,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(loose_equal(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!loose_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Lte | BinaryOp::Gt | BinaryOp::Gte => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => match (left.as_f64(), right.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                },
            };
            let result = ordering.is_some_and(|o| match op {
                BinaryOp::Lt => o.is_lt(),
                BinaryOp::Lte => o.is_le(),
                BinaryOp::Gt => o.is_gt(),
                _ => o.is_ge(),
            });
            Ok(Value::Bool(result))
        }
        BinaryOp::Add => match (left, right) {
            (Value::Array(a), Value::Array(b)) => Ok(Value::Array(a.iter().chain(b).cloned().collect())),
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::String(format!("{}{}", display(left), display(right))))
            }
            _ => arithmetic(op, left, right),
        },
        _ => arithmetic(op, left, right),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> EvalResult<Value> {
    let (a, b) = match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(EvalError::TypeError(format!(
                "cannot apply '{}' to {} and {}",
                op.symbol(),
                type_of(left),
                type_of(right)
            )))
        }
    };
    let n = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Div => a / b,
        BinaryOp::Mod if b == 0.0 => return Err(EvalError::DivisionByZero),
        BinaryOp::Mod => a % b,
        _ => unreachable!("non-arithmetic operator {:?}", op),
    };
    Ok(number_value(n))
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => number_value(*n),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Integral values become JSON integers
pub fn number_value(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        Value::from(n as i64)
    } else {
        Number::from_f64(n).map(Value::Number).unwrap_or(Value::Null)
    }
}

fn loose_equal(left: &Value, right: &Value) -> bool {
    match (left.as_f64(), right.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => left == right,
    }
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Text form used when a value is interpolated
pub fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub fn type_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
