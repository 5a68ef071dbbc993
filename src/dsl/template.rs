//! Pure minijinja templating engine
//!
//! Django/Jinja2-style templating using minijinja's native syntax, with the
//! BeemFlow helper set registered on top of the builtins. Lookups are strict:
//! referencing a missing context key is an error, so typos in flow files
//! surface immediately instead of rendering as empty strings.

use crate::constants::{MAX_RENDER_PASSES, TEMPLATE_CLOSE_DELIM, TEMPLATE_OPEN_DELIM};
use crate::error::TemplateError;
use crate::Result;
use base64::Engine as _;
use minijinja::value::Rest;
use minijinja::{Environment, ErrorKind, Value};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Templater provides minijinja template rendering with the BeemFlow helpers
pub struct Templater {
    env: Arc<Environment<'static>>,
}

impl Templater {
    /// Create a new templater with the BeemFlow helper set
    pub fn new() -> Self {
        let mut env = Environment::new();

        Self::register_helpers(&mut env);

        env.set_auto_escape_callback(|_| minijinja::AutoEscape::None);

        // Strict lookups: an undefined variable is an error, never an empty
        // string. evaluate() relies on this to reject typo'd references.
        env.set_undefined_behavior(minijinja::UndefinedBehavior::Strict);

        Self { env: Arc::new(env) }
    }

    /// Register the fixed helper set
    ///
    /// Builtin filters (join, length, map, upper, ...) come from minijinja's
    /// `builtins` feature; these add the call-syntax helpers flows use in
    /// expressions like `{{ list('a', 'b') }}`.
    fn register_helpers(env: &mut Environment<'static>) {
        env.add_function("eq", |a: Value, b: Value| a == b);
        env.add_function("ne", |a: Value, b: Value| a != b);

        env.add_function("list", |items: Rest<Value>| {
            Value::from_serialize(&items.0)
        });

        env.add_function("join", |seq: Vec<Value>, sep: String| {
            seq.iter()
                .map(|v| match v.as_str() {
                    Some(s) => s.to_string(),
                    None => v.to_string(),
                })
                .collect::<Vec<_>>()
                .join(&sep)
        });

        env.add_function("length", |seq: Value| -> std::result::Result<Value, minijinja::Error> {
            seq.len().map(Value::from).ok_or_else(|| {
                minijinja::Error::new(
                    ErrorKind::InvalidOperation,
                    "length() requires a sequence, mapping, or string",
                )
            })
        });

        env.add_function("map", |seq: Vec<Value>, field: String| -> std::result::Result<Value, minijinja::Error> {
            let projected: std::result::Result<Vec<Value>, minijinja::Error> = seq
                .iter()
                .map(|item| item.get_attr(&field))
                .collect();
            Ok(Value::from(projected?))
        });

        env.add_function("now", || chrono::Utc::now().to_rfc3339());

        env.add_function("duration", |n: i64, unit: String| -> std::result::Result<String, minijinja::Error> {
            let suffix = match unit.as_str() {
                "s" | "sec" | "second" | "seconds" => "s",
                "m" | "min" | "minute" | "minutes" => "m",
                "h" | "hour" | "hours" => "h",
                _ => {
                    return Err(minijinja::Error::new(
                        ErrorKind::InvalidOperation,
                        format!("unknown duration unit: {}", unit),
                    ));
                }
            };
            Ok(format!("{}{}", n, suffix))
        });

        let encode = |s: String| base64::engine::general_purpose::STANDARD.encode(s);
        env.add_function("base64", encode);
        env.add_filter("base64", encode);
    }

    /// Render a template string with the provided data
    ///
    /// Rendering is iterative: when a pass produces output that is itself a
    /// template (the data contained `{{ ... }}`), the output is fed back in,
    /// up to a fixed cap of passes. A failure on the first pass is an error;
    /// a failure on a later pass returns the last successful result, since
    /// by then the delimiters are payload, not syntax.
    pub fn render(&self, template: &str, data: &HashMap<String, JsonValue>) -> Result<String> {
        let context = Value::from_serialize(data);

        let mut current = self.render_once(template, &context)?;

        for _ in 1..MAX_RENDER_PASSES {
            if !Self::looks_like_template(&current) || current == template {
                break;
            }
            match self.render_once(&current, &context) {
                Ok(next) => {
                    if next == current {
                        break;
                    }
                    current = next;
                }
                // Stabilize on the previous pass when the data itself
                // contains literal delimiters.
                Err(_) => break,
            }
        }

        Ok(current)
    }

    /// Evaluate a template expression and return the actual value
    ///
    /// Foreach collections and conditionals need real arrays/booleans, not a
    /// string rendering. A bare `{{ expr }}` is compiled and evaluated as an
    /// expression; anything else is rendered and re-parsed.
    pub fn evaluate(&self, expr: &str, data: &HashMap<String, JsonValue>) -> Result<JsonValue> {
        let trimmed = expr.trim();

        if let Some(inner) = Self::as_single_expression(trimmed) {
            let compiled = self
                .env
                .compile_expression(inner)
                .map_err(|e| TemplateError::Syntax(e.to_string()))?;
            let value = compiled.eval(data).map_err(map_template_error)?;
            return Ok(serde_json::to_value(&value)
                .map_err(|e| TemplateError::Render(e.to_string()))?);
        }

        let rendered = self.render(expr, data)?;

        // The rendering may be a serialized array/object (foreach over a
        // templated list); try JSON first, fall back to the raw string.
        if let Ok(value) = serde_json::from_str::<JsonValue>(&rendered) {
            return Ok(value);
        }

        Ok(JsonValue::String(rendered))
    }

    fn render_once(&self, template: &str, context: &Value) -> Result<String> {
        self.env
            .render_str(template, context)
            .map_err(|e| map_template_error(e).into())
    }

    /// Whether a string contains template delimiters worth another pass
    fn looks_like_template(s: &str) -> bool {
        s.contains(TEMPLATE_OPEN_DELIM) && s.contains(TEMPLATE_CLOSE_DELIM)
    }

    /// Extract the inner expression when the whole string is one `{{ expr }}`
    fn as_single_expression(s: &str) -> Option<&str> {
        let inner = s
            .strip_prefix(TEMPLATE_OPEN_DELIM)?
            .strip_suffix(TEMPLATE_CLOSE_DELIM)?;
        // A second delimiter means concatenation, not a single expression
        if inner.contains(TEMPLATE_OPEN_DELIM) || inner.contains(TEMPLATE_CLOSE_DELIM) {
            return None;
        }
        Some(inner.trim())
    }
}

fn map_template_error(e: minijinja::Error) -> TemplateError {
    match e.kind() {
        ErrorKind::SyntaxError => TemplateError::Syntax(e.to_string()),
        ErrorKind::UndefinedError => TemplateError::VariableNotFound(e.to_string()),
        _ => TemplateError::Render(e.to_string()),
    }
}

impl Default for Templater {
    fn default() -> Self {
        Self::new()
    }
}
