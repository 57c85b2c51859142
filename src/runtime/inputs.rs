//! Input binding
//!
//! Turns the parameters a task receives into the values its tool sees, in
//! three stages: the step's `valueFrom`, File location normalization, and the
//! tool's `inputBinding.valueFrom`. The normalized values form the `inputs`
//! object of every expression; the final values feed the command line.

use crate::error::{Component, CwlError, CwlResult};
use crate::expr::{self, ExprContext};
use crate::runtime::config::Config;
use crate::runtime::fs_utils::read_prefix;
use crate::runtime::outputs::secondary_file_path;
use crate::runtime::task::TaskLog;
use crate::tree::{CwlType, Process, WorkflowStep};
use crate::value::{FileValue, Value};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::path::Path;

/// Result of binding a tool's inputs
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundInputs {
    /// Normalized values, exposed to expressions as `inputs`
    pub inputs: IndexMap<String, Value>,
    /// Values after `inputBinding.valueFrom`, rendered on the command line
    pub provided: IndexMap<String, Value>,
}

/// Evaluate the `valueFrom` of each step input. `self` is the value the step
/// input received; `inputs` holds every step input before evaluation.
pub fn apply_step_value_from(
    step: &WorkflowStep,
    params: IndexMap<String, Value>,
    expression_lib: &[String],
) -> CwlResult<IndexMap<String, Value>> {
    if step.inputs.iter().all(|i| i.value_from.is_none()) {
        return Ok(params);
    }

    let base = ExprContext::new(&params).with_expression_lib(expression_lib.to_vec());
    let mut result = params.clone();
    for input in &step.inputs {
        let Some(value_from) = &input.value_from else {
            continue;
        };
        let current = params.get(&input.id).cloned().unwrap_or(Value::Null);
        let context = base.clone().with_self(&current);
        let value = expr::evaluate(value_from, &context)
            .map_err(|e| CwlError::from(e).with_task_id(&step.id))?;
        result.insert(input.id.clone(), value);
    }
    Ok(result)
}

/// Parameters of `process` with defaults applied, in declaration order.
///
/// A null or absent value takes the input's default; an optional input
/// without one binds null. Undeclared parameters are dropped.
pub fn fill_defaults(
    process: &Process,
    params: &IndexMap<String, Value>,
) -> CwlResult<IndexMap<String, Value>> {
    let mut filled = IndexMap::new();
    for input in &process.inputs {
        let value = match params.get(&input.id) {
            Some(value) if !value.is_null() => value.clone(),
            _ => match &input.default {
                Some(default) => default.clone(),
                None if input.param_type.is_optional() => Value::Null,
                None => return Err(CwlError::missing_input(&input.id)),
            },
        };
        filled.insert(input.id.clone(), value);
    }
    Ok(filled)
}

/// Rewrite a location by its prefix: `COMMONS/<guid>` resolves under the
/// commons data root, `USER/<path>` under the user data root. Other
/// locations are returned unchanged, so the rewrite is idempotent.
pub fn rewrite_location(location: &str, config: &Config) -> String {
    if let Some(guid) = location.strip_prefix("COMMONS/") {
        return config.commons_data_root.join(guid).display().to_string();
    }
    if let Some(rel) = location.strip_prefix("USER/") {
        return config.user_data_root.join(rel).display().to_string();
    }
    location.to_string()
}

/// Rewrite the location of every File in `value` and re-derive its names.
pub fn normalize_files(value: &mut Value, config: &Config) {
    value.for_each_file_mut(&mut |file: &mut FileValue| {
        let location = rewrite_location(&file.location, config);
        file.set_location(location);
    });
}

/// True when `value` is acceptable for a parameter of type `expected`.
pub fn conforms(value: &Value, expected: &CwlType) -> bool {
    match (expected, value) {
        (CwlType::Any, _) => true,
        (CwlType::Null, Value::Null) => true,
        (CwlType::Union(members), _) => members.iter().any(|t| conforms(value, t)),
        (CwlType::Boolean, Value::Boolean(_)) => true,
        (CwlType::Int | CwlType::Long, Value::Int(_)) => true,
        (CwlType::Float | CwlType::Double, Value::Int(_) | Value::Float(_)) => true,
        (CwlType::String, Value::String(_)) => true,
        (CwlType::File | CwlType::Stdout | CwlType::Stderr, Value::File(_)) => true,
        (CwlType::Directory, Value::Directory(_)) => true,
        (CwlType::Array { items, .. }, Value::Array(values)) => {
            values.iter().all(|v| conforms(v, items))
        }
        (CwlType::Record { fields }, Value::Record(values)) => fields.iter().all(|field| {
            conforms(values.get(&field.name).unwrap_or(&Value::Null), &field.field_type)
        }),
        (CwlType::Enum { symbols }, Value::String(s)) => symbols.iter().any(|sym| sym == s),
        _ => false,
    }
}

/// Bind the (defaulted) parameters of a tool.
pub fn bind_inputs(
    process: &Process,
    params: &IndexMap<String, Value>,
    runtime: &JsonValue,
    expression_lib: &[String],
    config: &Config,
    log: &TaskLog,
) -> CwlResult<BoundInputs> {
    let mut declared: Vec<_> = process.inputs.iter().collect();
    declared.sort_by(|a, b| a.id.cmp(&b.id));

    let mut inputs = IndexMap::new();
    for input in &declared {
        let mut value = params.get(&input.id).cloned().unwrap_or(Value::Null);
        normalize_files(&mut value, config);

        if !conforms(&value, &input.param_type) {
            return Err(CwlError::binding(
                Component::InputBinder,
                format!(
                    "input '{}' expects {}, got {}",
                    input.id,
                    input.param_type,
                    value.type_name()
                ),
            ));
        }

        if input.load_contents {
            let mut failure = None;
            value.for_each_file_mut(&mut |file: &mut FileValue| {
                if failure.is_some() {
                    return;
                }
                match read_prefix(&file.path, config.load_contents_limit, Component::InputBinder) {
                    Ok(contents) => file.contents = Some(contents),
                    Err(e) => failure = Some(e),
                }
            });
            if let Some(e) = failure {
                return Err(e);
            }
        }

        for pattern in input.secondary_files.iter().filter(|p| !p.starts_with('$')) {
            value.for_each_file_mut(&mut |file: &mut FileValue| {
                attach_secondary(file, pattern, log);
            });
        }

        inputs.insert(input.id.clone(), value);
    }

    let base = ExprContext::new(&inputs)
        .with_runtime(runtime.clone())
        .with_expression_lib(expression_lib.to_vec());
    let mut provided = IndexMap::new();
    for input in &declared {
        let value = &inputs[input.id.as_str()];
        let value_from = input
            .input_binding
            .as_ref()
            .and_then(|b| b.value_from.as_deref());
        let bound = match value_from {
            Some(expression) => expr::evaluate(expression, &base.clone().with_self(value))?,
            None => value.clone(),
        };
        provided.insert(input.id.clone(), bound);
    }

    Ok(BoundInputs { inputs, provided })
}

/// Add the sibling named by `pattern` when it exists and is not listed yet.
fn attach_secondary(file: &mut FileValue, pattern: &str, log: &TaskLog) {
    let path = secondary_file_path(&file.path, pattern);
    let listed = file
        .secondary_files
        .iter()
        .any(|s| s.get("location").and_then(JsonValue::as_str) == Some(path.as_str()));
    if listed {
        return;
    }
    if Path::new(&path).exists() {
        file.secondary_files
            .push(Value::File(FileValue::from_path(Path::new(&path))).to_json());
    } else {
        log.warn(format!("secondary file {} of {} not found", path, file.path));
    }
}
