//! CWL expression evaluation.
//!
//! Parameter references `$(...)`, function bodies `${...}` and strings mixing
//! literal text with `$(...)` placeholders are evaluated with an embedded
//! JavaScript interpreter (`boa_engine`). Every evaluation runs in a fresh
//! interpreter context that only sees `inputs`, `self`, `runtime` and the
//! process's `expressionLib`, so nothing leaks between tasks.
//!
//! Values cross the interpreter boundary as plain JSON: records, files and
//! arrays are converted once on the way in and once on the way out.

pub mod scan;

pub use scan::StringPart;

use crate::error::{Component, CwlError};
use crate::value::Value;
use boa_engine::property::Attribute;
use boa_engine::{js_string, Context, JsValue, Source};
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Expression failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    #[error("failed to evaluate '{expression}': {message}")]
    Eval { expression: String, message: String },

    #[error("empty expression")]
    EmptyExpression,

    #[error("expression '{expression}' returned {found}, expected {expected}")]
    TypeMismatch {
        expression: String,
        expected: String,
        found: String,
    },
}

impl From<ExprError> for CwlError {
    fn from(error: ExprError) -> Self {
        CwlError::eval(Component::ExpressionEvaluator, error.to_string())
    }
}

/// Variables visible to an expression.
#[derive(Debug, Clone, PartialEq)]
pub struct ExprContext {
    pub inputs: JsonValue,
    pub self_value: JsonValue,
    pub runtime: JsonValue,
    pub expression_lib: Vec<String>,
}

impl Default for ExprContext {
    fn default() -> Self {
        Self {
            inputs: JsonValue::Object(Map::new()),
            self_value: JsonValue::Null,
            runtime: JsonValue::Object(Map::new()),
            expression_lib: Vec::new(),
        }
    }
}

impl ExprContext {
    /// Context exposing `inputs`, with records and files flattened to plain
    /// objects.
    pub fn new(inputs: &IndexMap<String, Value>) -> Self {
        let inputs = inputs
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<Map<_, _>>();
        Self {
            inputs: JsonValue::Object(inputs),
            ..Self::default()
        }
    }

    pub fn with_self(mut self, value: &Value) -> Self {
        self.self_value = value.to_json();
        self
    }

    pub fn with_runtime(mut self, runtime: JsonValue) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_expression_lib(mut self, lib: Vec<String>) -> Self {
        self.expression_lib = lib;
        self
    }
}

/// Evaluate a CWL string. Text without expressions is returned unchanged.
pub fn evaluate(expression: &str, context: &ExprContext) -> Result<Value, ExprError> {
    evaluate_json(expression, context).map(|json| Value::from_json(&json))
}

/// [`evaluate`] returning the raw JSON result.
pub fn evaluate_json(expression: &str, context: &ExprContext) -> Result<JsonValue, ExprError> {
    if let Some(body) = scan::function_body(expression) {
        if body.trim().is_empty() {
            return Err(ExprError::EmptyExpression);
        }
        return run_js(expression, &format!("(function(){{{}}})()", body), context);
    }

    if let Some(code) = scan::single_placeholder(expression) {
        if code.trim().is_empty() {
            return Err(ExprError::EmptyExpression);
        }
        return run_js(expression, &format!("({})", code), context);
    }

    let parts = scan::scan(expression)?;
    let mut result = String::new();
    for part in parts {
        match part {
            StringPart::Text(text) => result.push_str(&text),
            StringPart::Placeholder(code) => {
                if code.trim().is_empty() {
                    return Err(ExprError::EmptyExpression);
                }
                let value = run_js(expression, &format!("({})", code), context)?;
                result.push_str(&stringify(&value));
            }
        }
    }
    Ok(JsonValue::String(result))
}

/// Evaluate an expression that must produce a string.
pub fn evaluate_string(expression: &str, context: &ExprContext) -> Result<String, ExprError> {
    match evaluate_json(expression, context)? {
        JsonValue::String(s) => Ok(s),
        other => Err(ExprError::TypeMismatch {
            expression: expression.to_string(),
            expected: "string".to_string(),
            found: json_type_name(&other).to_string(),
        }),
    }
}

/// Interpolated text of a placeholder result: strings verbatim, everything
/// else as JSON.
fn stringify(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn run_js(expression: &str, code: &str, context: &ExprContext) -> Result<JsonValue, ExprError> {
    let fail = |message: String| ExprError::Eval {
        expression: expression.to_string(),
        message,
    };

    let mut js = Context::default();
    for (name, value) in [
        (js_string!("inputs"), &context.inputs),
        (js_string!("self"), &context.self_value),
        (js_string!("runtime"), &context.runtime),
    ] {
        let value = JsValue::from_json(value, &mut js).map_err(|e| fail(e.to_string()))?;
        js.register_global_property(name, value, Attribute::all())
            .map_err(|e| fail(e.to_string()))?;
    }

    for lib in &context.expression_lib {
        js.eval(Source::from_bytes(lib.as_bytes()))
            .map_err(|e| fail(format!("expressionLib: {}", e)))?;
    }

    let result = js
        .eval(Source::from_bytes(code.as_bytes()))
        .map_err(|e| fail(e.to_string()))?;
    if result.is_undefined() {
        return Ok(JsonValue::Null);
    }
    let json = result.to_json(&mut js).map_err(|e| fail(e.to_string()))?;
    Ok(integral_numbers(json))
}

/// JavaScript has a single number type; integral results become integers the
/// way `JSON.stringify` prints them.
fn integral_numbers(json: JsonValue) -> JsonValue {
    match json {
        JsonValue::Number(n) if n.as_i64().is_none() && n.as_u64().is_none() => {
            match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 9.0e15 => JsonValue::from(f as i64),
                _ => JsonValue::Number(n),
            }
        }
        JsonValue::Array(items) => {
            JsonValue::Array(items.into_iter().map(integral_numbers).collect())
        }
        JsonValue::Object(fields) => JsonValue::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, integral_numbers(v)))
                .collect(),
        ),
        other => other,
    }
}
