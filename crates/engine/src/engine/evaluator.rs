//! Branch predicates and their evaluation against the execution context.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::template::TemplateRenderer;

/// Comparison operator for [`Predicate::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    #[default]
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    /// Substring, or membership when the field is an array.
    Contains,
    /// Regex match.
    Matches,
    In,
    NotIn,
    Truthy,
    Falsy,
    /// Field is present and not null.
    Exists,
}

/// A branch guard. The set is closed: rule documents can only express these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Jinja expression, e.g. `trigger.amount > 100`.
    Expr(String),
    Compare {
        field: String,
        #[serde(default)]
        op: CompareOp,
        #[serde(default)]
        value: serde_json::Value,
    },
    All(Vec<Predicate>),
    Any(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn field_equals(field: impl Into<String>, value: serde_json::Value) -> Self {
        Predicate::Compare {
            field: field.into(),
            op: CompareOp::Eq,
            value,
        }
    }

    /// Parse the `when` of a rule node. A bare string is an expression.
    pub fn from_rule(value: &serde_json::Value) -> Result<Self, String> {
        match value {
            serde_json::Value::String(expr) if !expr.trim().is_empty() => {
                Ok(Predicate::Expr(expr.clone()))
            }
            serde_json::Value::Bool(b) => Ok(Predicate::Expr(b.to_string())),
            serde_json::Value::Object(_) => {
                serde_json::from_value(value.clone()).map_err(|e| e.to_string())
            }
            other => Err(format!("unsupported predicate: {}", other)),
        }
    }

    /// Static checks: expression syntax and regex patterns.
    pub fn check(&self, renderer: &TemplateRenderer) -> Vec<String> {
        let mut errors = Vec::new();
        self.collect_errors(renderer, &mut errors);
        errors
    }

    fn collect_errors(&self, renderer: &TemplateRenderer, errors: &mut Vec<String>) {
        match self {
            Predicate::Expr(expr) => {
                if let Err(e) = renderer.check_expression(expr) {
                    errors.push(format!("invalid expression '{}': {}", expr, e));
                }
            }
            Predicate::Compare { field, op, value } => {
                if field.trim().is_empty() {
                    errors.push("compare requires a field".to_string());
                }
                if *op == CompareOp::Matches {
                    match value.as_str().map(Regex::new) {
                        Some(Ok(_)) => {}
                        Some(Err(e)) => errors.push(format!("invalid regex: {}", e)),
                        None => errors.push("matches requires a string pattern".to_string()),
                    }
                }
                if matches!(op, CompareOp::In | CompareOp::NotIn) && !value.is_array() {
                    errors.push(format!("{:?} requires an array value", op).to_lowercase());
                }
            }
            Predicate::All(items) | Predicate::Any(items) => {
                for p in items {
                    p.collect_errors(renderer, errors);
                }
            }
            Predicate::Not(inner) => inner.collect_errors(renderer, errors),
        }
    }
}

/// Evaluate a predicate. `All([])` is true and `Any([])` is false.
pub fn evaluate(
    predicate: &Predicate,
    context: &serde_json::Value,
    renderer: &TemplateRenderer,
) -> AppResult<bool> {
    match predicate {
        Predicate::Expr(expr) => renderer.evaluate_condition(expr, context),
        Predicate::Compare { field, op, value } => {
            compare(resolve_path(context, field), *op, value)
        }
        Predicate::All(items) => {
            for p in items {
                if !evaluate(p, context, renderer)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Predicate::Any(items) => {
            for p in items {
                if evaluate(p, context, renderer)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Predicate::Not(inner) => Ok(!evaluate(inner, context, renderer)?),
    }
}

/// Look up a dotted path in the context; paths that miss at the root are
/// retried under `trigger`, so `package` finds `trigger.package`.
pub fn resolve_path<'a>(
    context: &'a serde_json::Value,
    path: &str,
) -> Option<&'a serde_json::Value> {
    json_path(context, path).or_else(|| {
        context
            .get("trigger")
            .and_then(|trigger| json_path(trigger, path))
    })
}

pub fn json_path<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(obj) => obj.get(segment)?,
            serde_json::Value::Array(arr) => arr.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn compare(
    left: Option<&serde_json::Value>,
    op: CompareOp,
    right: &serde_json::Value,
) -> AppResult<bool> {
    let null = serde_json::Value::Null;
    let left_value = left.unwrap_or(&null);

    Ok(match op {
        CompareOp::Eq => loosely_equal(left_value, right),
        CompareOp::Ne => !loosely_equal(left_value, right),
        CompareOp::Gt => numeric(left_value, right, |a, b| a > b),
        CompareOp::Lt => numeric(left_value, right, |a, b| a < b),
        CompareOp::Gte => numeric(left_value, right, |a, b| a >= b),
        CompareOp::Lte => numeric(left_value, right, |a, b| a <= b),
        CompareOp::Contains => match left_value {
            serde_json::Value::Array(items) => items.iter().any(|i| loosely_equal(i, right)),
            serde_json::Value::String(s) => right.as_str().is_some_and(|r| s.contains(r)),
            _ => false,
        },
        CompareOp::Matches => {
            let pattern = right.as_str().unwrap_or_default();
            let re = Regex::new(pattern)
                .map_err(|e| AppError::Validation(format!("Invalid regex: {}", e)))?;
            left_value.as_str().is_some_and(|s| re.is_match(s))
        }
        CompareOp::In => right
            .as_array()
            .is_some_and(|items| items.iter().any(|i| loosely_equal(left_value, i))),
        CompareOp::NotIn => !right
            .as_array()
            .is_some_and(|items| items.iter().any(|i| loosely_equal(left_value, i))),
        CompareOp::Truthy => is_truthy(left_value),
        CompareOp::Falsy => !is_truthy(left_value),
        CompareOp::Exists => !left_value.is_null(),
    })
}

/// Equality that treats `5`, `5.0` and `"5"` as equal.
fn loosely_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    if a == b {
        return true;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => (x - y).abs() < f64::EPSILON,
        _ => false,
    }
}

fn numeric(a: &serde_json::Value, b: &serde_json::Value, cmp: fn(f64, f64) -> bool) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => cmp(x, y),
        _ => false,
    }
}

fn as_number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn is_truthy(v: &serde_json::Value) -> bool {
    match v {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => !s.is_empty() && s != "false" && s != "0",
        serde_json::Value::Array(a) => !a.is_empty(),
        serde_json::Value::Object(o) => !o.is_empty(),
    }
}
