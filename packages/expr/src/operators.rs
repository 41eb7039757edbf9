//! Operator registry for call expressions
//!
//! `name(args)` dispatches to a registered operator. Hosts may register their
//! own operators next to the builtins.

use crate::eval::{display, number_value, truthy};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub type OperatorFn = Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Operators {
    ops: HashMap<String, OperatorFn>,
}

impl fmt::Debug for Operators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.ops.keys().collect();
        names.sort();
        f.debug_struct("Operators").field("ops", &names).finish()
    }
}

impl Operators {
    /// Registry with no operators at all
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the builtin operators
    pub fn builtin() -> Self {
        let mut ops = Self::new();

        ops.register("if", |args| {
            let cond = args.first().map(truthy).unwrap_or(false);
            let pick = if cond { args.get(1) } else { args.get(2) };
            Ok(pick.cloned().unwrap_or(Value::Null))
        });
        ops.register("coalesce", |args| {
            Ok(args.iter().find(|v| !v.is_null()).cloned().unwrap_or(Value::Null))
        });
        ops.register("len", |args| match args.first() {
            Some(Value::Array(items)) => Ok(Value::from(items.len())),
            Some(Value::String(s)) => Ok(Value::from(s.chars().count())),
            Some(Value::Object(map)) => Ok(Value::from(map.len())),
            _ => Ok(Value::from(0)),
        });
        ops.register("upper", |args| Ok(Value::String(first_text(args).to_uppercase())));
        ops.register("lower", |args| Ok(Value::String(first_text(args).to_lowercase())));
        ops.register("trim", |args| Ok(Value::String(first_text(args).trim().to_string())));
        ops.register("string", |args| Ok(Value::String(first_text(args))));
        ops.register("number", |args| {
            let n = match args.first() {
                Some(Value::Number(n)) => n.as_f64(),
                Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
                Some(Value::Bool(b)) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            };
            Ok(n.map(number_value).unwrap_or(Value::Null))
        });
        ops.register("join", |args| {
            let sep = args.get(1).map(display).unwrap_or_else(|| ", ".to_string());
            match args.first() {
                Some(Value::Array(items)) => {
                    Ok(Value::String(items.iter().map(display).collect::<Vec<_>>().join(&sep)))
                }
                Some(other) => Ok(Value::String(display(other))),
                None => Ok(Value::String(String::new())),
            }
        });
        ops.register("contains", |args| {
            let found = match (args.first(), args.get(1)) {
                (Some(Value::Array(items)), Some(needle)) => items.contains(needle),
                (Some(Value::String(hay)), Some(needle)) => hay.contains(&display(needle)),
                (Some(Value::Object(map)), Some(needle)) => map.contains_key(&display(needle)),
                _ => false,
            };
            Ok(Value::Bool(found))
        });
        ops.register("keys", |args| match args.first() {
            Some(Value::Object(map)) => Ok(Value::Array(map.keys().cloned().map(Value::String).collect())),
            _ => Ok(Value::Array(Vec::new())),
        });
        ops.register("first", |args| match args.first() {
            Some(Value::Array(items)) => Ok(items.first().cloned().unwrap_or(Value::Null)),
            _ => Ok(Value::Null),
        });
        ops.register("last", |args| match args.first() {
            Some(Value::Array(items)) => Ok(items.last().cloned().unwrap_or(Value::Null)),
            _ => Ok(Value::Null),
        });
        ops.register("sum", |args| Ok(number_value(numbers(args).iter().sum())));
        ops.register("avg", |args| {
            let nums = numbers(args);
            if nums.is_empty() {
                return Ok(Value::Null);
            }
            Ok(number_value(nums.iter().sum::<f64>() / nums.len() as f64))
        });
        ops.register("min", |args| {
            Ok(numbers(args).into_iter().reduce(f64::min).map(number_value).unwrap_or(Value::Null))
        });
        ops.register("max", |args| {
            Ok(numbers(args).into_iter().reduce(f64::max).map(number_value).unwrap_or(Value::Null))
        });
        ops.register("round", |args| {
            let n = match args.first() {
                Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
                _ => return Err("expected a number".to_string()),
            };
            let places = args.get(1).and_then(Value::as_i64).unwrap_or(0) as i32;
            let factor = 10f64.powi(places);
            Ok(number_value((n * factor).round() / factor))
        });
        ops.register("format_date", |args| {
            let text = first_text(args);
            let pattern = args.get(1).map(display).unwrap_or_else(|| "%Y-%m-%d".to_string());
            chrono::DateTime::parse_from_rfc3339(&text)
                .map(|date| Value::String(date.format(&pattern).to_string()))
                .map_err(|e| e.to_string())
        });

        ops
    }

    pub fn register<F>(&mut self, name: impl Into<String>, op: F)
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.ops.insert(name.into(), Arc::new(op));
    }

    pub fn get(&self, name: &str) -> Option<&OperatorFn> {
        self.ops.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ops.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.ops.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

fn first_text(args: &[Value]) -> String {
    args.first().map(display).unwrap_or_default()
}

/// Numbers from the arguments, flattening a single array argument
fn numbers(args: &[Value]) -> Vec<f64> {
    let items: Vec<&Value> = match args {
        [Value::Array(items)] => items.iter().collect(),
        _ => args.iter().collect(),
    };
    items.into_iter().filter_map(Value::as_f64).collect()
}
