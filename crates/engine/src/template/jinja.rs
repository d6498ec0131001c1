//! Jinja2-style rendering with minijinja.
//!
//! The render context is always the execution context object, so templates
//! read `{{ trigger.email }}`, `{{ user_id }}` or `{{ steps.s002.status }}`.

use minijinja::{Environment, Error, ErrorKind, Value};

use crate::error::{AppError, AppResult};

/// Template renderer with Drip's filter set.
pub struct TemplateRenderer {
    env: Environment<'static>,
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateRenderer {
    pub fn new() -> Self {
        let mut env = Environment::new();

        env.add_filter("tojson", filter_tojson);
        env.add_filter("default", filter_default);
        env.add_filter("int", filter_int);
        env.add_filter("first_name", filter_first_name);

        Self { env }
    }

    /// Render a template string against `context`.
    pub fn render(&self, template: &str, context: &serde_json::Value) -> AppResult<String> {
        if !contains_template_syntax(template) {
            return Ok(template.to_string());
        }

        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| AppError::Template(format!("Template parse error: {}", e)))?;

        tmpl.render(Value::from_serialize(context))
            .map_err(|e| AppError::Template(format!("Template render error: {}", e)))
    }

    /// Render a template; a result that is a single JSON scalar or document
    /// is returned typed, anything else as a string.
    pub fn render_to_value(
        &self,
        template: &str,
        context: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        if !contains_template_syntax(template) {
            return Ok(serde_json::Value::String(template.to_string()));
        }

        let rendered = self.render(template, context)?;
        let trimmed = rendered.trim();

        if (trimmed.starts_with('{') && trimmed.ends_with('}'))
            || (trimmed.starts_with('[') && trimmed.ends_with(']'))
        {
            if let Ok(value) = serde_json::from_str(trimmed) {
                return Ok(value);
            }
        }
        if let Ok(b) = trimmed.parse::<bool>() {
            return Ok(serde_json::Value::Bool(b));
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Ok(serde_json::Value::Number(i.into()));
        }
        if trimmed.contains('.') {
            if let Some(n) = trimmed
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
            {
                return Ok(serde_json::Value::Number(n));
            }
        }
        if trimmed.is_empty() || trimmed == "none" {
            return Ok(serde_json::Value::Null);
        }

        Ok(serde_json::Value::String(rendered))
    }

    /// Render every string leaf of a JSON structure.
    pub fn render_value(
        &self,
        value: &serde_json::Value,
        context: &serde_json::Value,
    ) -> AppResult<serde_json::Value> {
        match value {
            serde_json::Value::String(s) => self.render_to_value(s, context),
            serde_json::Value::Object(map) => {
                let mut result = serde_json::Map::with_capacity(map.len());
                for (k, v) in map {
                    result.insert(k.clone(), self.render_value(v, context)?);
                }
                Ok(serde_json::Value::Object(result))
            }
            serde_json::Value::Array(arr) => arr
                .iter()
                .map(|v| self.render_value(v, context))
                .collect::<AppResult<Vec<_>>>()
                .map(serde_json::Value::Array),
            _ => Ok(value.clone()),
        }
    }

    /// Evaluate a bare expression such as `trigger.amount > 100`.
    pub fn evaluate_condition(
        &self,
        expression: &str,
        context: &serde_json::Value,
    ) -> AppResult<bool> {
        let expr = expression
            .trim()
            .trim_start_matches("{{")
            .trim_end_matches("}}")
            .trim();

        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(|e| AppError::Template(format!("Expression parse error: {}", e)))?;

        compiled
            .eval(Value::from_serialize(context))
            .map(|v| v.is_true())
            .map_err(|e| AppError::Template(format!("Expression eval error: {}", e)))
    }

    /// Check that an expression parses, without evaluating it.
    pub fn check_expression(&self, expression: &str) -> Result<(), String> {
        self.env
            .compile_expression(expression)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

fn contains_template_syntax(s: &str) -> bool {
    (s.contains("{{") && s.contains("}}")) || (s.contains("{%") && s.contains("%}"))
}

fn filter_tojson(value: &Value) -> Result<String, Error> {
    serde_json::to_string(value)
        .map_err(|e| Error::new(ErrorKind::InvalidOperation, format!("tojson error: {}", e)))
}

fn filter_default(value: &Value, default: Option<&Value>) -> Value {
    if value.is_undefined() || value.is_none() {
        default.cloned().unwrap_or(Value::from(""))
    } else {
        value.clone()
    }
}

fn filter_int(value: &Value) -> Result<i64, Error> {
    if let Some(i) = value.as_i64() {
        return Ok(i);
    }
    let s = value.to_string();
    if let Ok(f) = s.parse::<f64>() {
        return Ok(f as i64);
    }
    Err(Error::new(
        ErrorKind::InvalidOperation,
        format!("int error: cannot convert '{}'", s),
    ))
}

/// "Jane Q. Doe" -> "Jane"
fn filter_first_name(value: &Value) -> String {
    if value.is_undefined() || value.is_none() {
        return String::new();
    }
    value
        .to_string()
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}
