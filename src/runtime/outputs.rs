//! Output collection
//!
//! ExpressionTool outputs are read from the object the expression returns.
//! CommandLineTool outputs run through glob, `loadContents`, `outputEval` and
//! `secondaryFiles` in that order, then are reconciled with the declared type.

use crate::error::{Component, CwlError, CwlResult};
use crate::expr::{self, json_type_name, ExprContext, ExprError};
use crate::runtime::config::Config;
use crate::runtime::fs_utils::{read_file_to_string, read_prefix, resolve_against};
use crate::runtime::inputs::conforms;
use crate::runtime::task::TaskLog;
use crate::tree::{CwlType, OutputParameter, Process};
use crate::value::{DirectoryValue, FileValue, Value};
use indexmap::IndexMap;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

/// File a tool may write to report its outputs directly
pub const OUTPUT_JSON: &str = "cwl.output.json";

/// Path of the secondary file `pattern` names for `primary`.
///
/// Each leading `^` strips one extension from the primary's basename before
/// the rest of the pattern is appended: `x.bam` with `.bai` gives
/// `x.bam.bai`, with `^.bai` gives `x.bai`.
pub fn secondary_file_path(primary: &str, pattern: &str) -> String {
    let carets = pattern.chars().take_while(|c| *c == '^').count();
    let suffix = &pattern[carets..];
    let mut base = primary.to_string();
    for _ in 0..carets {
        let name_start = base.rfind('/').map(|i| i + 1).unwrap_or(0);
        match base[name_start..].rfind('.') {
            Some(dot) if dot > 0 => base.truncate(name_start + dot),
            _ => break,
        }
    }
    base.push_str(suffix);
    base
}

/// Outputs of an ExpressionTool from the object its expression returned.
pub fn collect_expression_outputs(
    process: &Process,
    result: &JsonValue,
) -> CwlResult<IndexMap<String, Value>> {
    let fields = result.as_object().ok_or_else(|| {
        CwlError::output(format!(
            "expression of {} returned {}, expected an object",
            process.id,
            json_type_name(result)
        ))
    })?;

    let mut outputs = IndexMap::new();
    for output in &process.outputs {
        let value = match fields.get(&output.id) {
            Some(json) => Value::from_json(json),
            None if output.param_type.is_optional() => Value::Null,
            None => {
                return Err(CwlError::output(format!(
                    "expression of {} did not return output '{}'",
                    process.id, output.id
                )))
            }
        };
        outputs.insert(output.id.clone(), value);
    }
    Ok(outputs)
}

/// Everything output collection of a CommandLineTool needs
pub struct ToolOutputContext<'a> {
    pub workdir: &'a Path,
    pub stdout: Option<&'a str>,
    pub stderr: Option<&'a str>,
    /// Expression context with `inputs` and `runtime` bound
    pub expressions: &'a ExprContext,
    pub config: &'a Config,
    pub log: &'a TaskLog,
}

/// Outputs of a CommandLineTool after it ran in `ctx.workdir`.
pub fn collect_tool_outputs(
    process: &Process,
    ctx: &ToolOutputContext<'_>,
) -> CwlResult<IndexMap<String, Value>> {
    let report = ctx.workdir.join(OUTPUT_JSON);
    if report.is_file() {
        return read_output_json(process, &report, ctx.workdir);
    }

    let mut outputs = IndexMap::new();
    for output in &process.outputs {
        let value = collect_output(output, ctx)?;
        outputs.insert(output.id.clone(), value);
    }
    Ok(outputs)
}

fn collect_output(output: &OutputParameter, ctx: &ToolOutputContext<'_>) -> CwlResult<Value> {
    let declared = output.param_type.non_null();

    let patterns = match declared {
        CwlType::Stdout => vec![capture_target(ctx.stdout, "stdout", output)?],
        CwlType::Stderr => vec![capture_target(ctx.stderr, "stderr", output)?],
        _ => match &output.output_binding {
            Some(binding) => {
                let mut patterns = Vec::new();
                for glob in &binding.glob {
                    patterns.extend(glob_patterns(glob, ctx.expressions)?);
                }
                patterns
            }
            None if output.param_type.is_optional() => return Ok(Value::Null),
            None => {
                return Err(CwlError::output(format!(
                    "output '{}' has no outputBinding",
                    output.id
                )))
            }
        },
    };

    let want_directories = matches!(declared, CwlType::Directory)
        || matches!(declared, CwlType::Array { items, .. } if matches!(items.non_null(), CwlType::Directory));
    let mut matches = Vec::new();
    for pattern in &patterns {
        matches.extend(glob_paths(ctx.workdir, pattern, want_directories)?);
    }

    let load_contents = output
        .output_binding
        .as_ref()
        .map(|b| b.load_contents)
        .unwrap_or(false);
    let mut found: Vec<Value> = Vec::new();
    for path in &matches {
        if want_directories {
            found.push(Value::Directory(DirectoryValue::new(path.display().to_string())));
            continue;
        }
        let mut file = FileValue::from_path(path);
        if load_contents {
            file.contents = Some(read_prefix(
                path,
                ctx.config.load_contents_limit,
                Component::OutputCollector,
            )?);
        }
        found.push(Value::File(file));
    }

    if let Some(output_eval) = output.output_binding.as_ref().and_then(|b| b.output_eval.as_ref()) {
        let self_value = if declared.is_file() {
            found.first().cloned().unwrap_or(Value::Null)
        } else {
            Value::Array(found)
        };
        let context = ctx.expressions.clone().with_self(&self_value);
        let value = expr::evaluate(output_eval, &context)?;
        if !conforms(&value, &output.param_type) {
            return Err(CwlError::output(format!(
                "outputEval of '{}' returned {}, expected {}",
                output.id,
                value.type_name(),
                output.param_type
            )));
        }
        return Ok(value);
    }

    for value in found.iter_mut() {
        if let Value::File(file) = value {
            for pattern in &output.secondary_files {
                add_secondary_files(file, pattern, ctx)?;
            }
        }
    }

    reconcile(output, found)
}

fn capture_target(target: Option<&str>, stream: &str, output: &OutputParameter) -> CwlResult<String> {
    target.map(str::to_string).ok_or_else(|| {
        CwlError::output(format!(
            "output '{}' has type {} but the tool does not capture {}",
            output.id, stream, stream
        ))
    })
}

/// Evaluate one `glob` entry into literal patterns.
fn glob_patterns(glob: &str, context: &ExprContext) -> CwlResult<Vec<String>> {
    match expr::evaluate_json(glob, context)? {
        JsonValue::String(pattern) => Ok(vec![pattern]),
        JsonValue::Array(items) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(pattern) => Ok(pattern),
                other => Err(glob_type_error(glob, &other)),
            })
            .collect(),
        other => Err(glob_type_error(glob, &other)),
    }
}

fn glob_type_error(glob: &str, found: &JsonValue) -> CwlError {
    ExprError::TypeMismatch {
        expression: glob.to_string(),
        expected: "string".to_string(),
        found: json_type_name(found).to_string(),
    }
    .into()
}

/// Sorted matches of `pattern` resolved against `workdir`.
fn glob_paths(workdir: &Path, pattern: &str, directories: bool) -> CwlResult<Vec<PathBuf>> {
    let full = resolve_against(workdir, pattern);
    let full = full.to_string_lossy();
    let entries = glob::glob(&full)
        .map_err(|e| CwlError::output(format!("invalid glob pattern '{}': {}", pattern, e)))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            CwlError::output(format!("cannot read glob match of '{}': {}", pattern, e))
        })?;
        let keep = if directories { path.is_dir() } else { path.is_file() };
        if keep {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

fn add_secondary_files(file: &mut FileValue, pattern: &str, ctx: &ToolOutputContext<'_>) -> CwlResult<()> {
    let candidates: Vec<Value> = if pattern.starts_with('$') {
        let context = ctx.expressions.clone().with_self(&Value::File(file.clone()));
        match expr::evaluate(pattern, &context)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            single => vec![single],
        }
    } else {
        vec![Value::String(secondary_file_path(&file.path, pattern))]
    };

    for candidate in candidates {
        let path = match candidate {
            Value::String(name) => resolve_against(Path::new(&file.dirname), &name),
            Value::File(secondary) => PathBuf::from(secondary.path),
            other => {
                return Err(CwlError::output(format!(
                    "secondaryFiles expression for {} returned {}",
                    file.basename,
                    other.type_name()
                )))
            }
        };
        if path.exists() {
            file.secondary_files
                .push(Value::File(FileValue::from_path(&path)).to_json());
        } else {
            ctx.log.warn(format!(
                "secondary file {} of {} not found",
                path.display(),
                file.path
            ));
        }
    }
    Ok(())
}

/// Fit the matched values to the declared output type.
fn reconcile(output: &OutputParameter, mut found: Vec<Value>) -> CwlResult<Value> {
    let declared = output.param_type.non_null();
    if declared.is_array() {
        return Ok(Value::Array(found));
    }
    if matches!(declared, CwlType::File | CwlType::Stdout | CwlType::Stderr | CwlType::Directory | CwlType::Any) {
        return match found.len() {
            1 => Ok(found.remove(0)),
            0 if output.param_type.is_optional() && *declared != CwlType::Any => Ok(Value::Null),
            count => Err(CwlError::output(format!(
                "output '{}' of type {} matched {} files, expected exactly one",
                output.id, output.param_type, count
            ))),
        };
    }
    Err(CwlError::output(format!(
        "output '{}' of type {} needs an outputEval",
        output.id, output.param_type
    )))
}

/// Outputs reported in `cwl.output.json`; relative locations resolve against
/// the working directory.
fn read_output_json(process: &Process, report: &Path, workdir: &Path) -> CwlResult<IndexMap<String, Value>> {
    let text = read_file_to_string(report)?;
    let json: JsonValue = serde_json::from_str(&text)
        .map_err(|e| CwlError::output(format!("invalid {}: {}", OUTPUT_JSON, e)))?;
    let fields = json
        .as_object()
        .ok_or_else(|| CwlError::output(format!("{} must hold an object", OUTPUT_JSON)))?;

    let mut outputs = IndexMap::new();
    for output in &process.outputs {
        let mut value = match fields.get(&output.id) {
            Some(json) => Value::from_json(json),
            None if output.param_type.is_optional() => Value::Null,
            None => {
                return Err(CwlError::output(format!(
                    "{} has no value for output '{}'",
                    OUTPUT_JSON, output.id
                )))
            }
        };
        value.for_each_file_mut(&mut |file: &mut FileValue| {
            if !Path::new(&file.path).is_absolute() {
                let absolute = resolve_against(workdir, &file.path);
                file.set_location(absolute.display().to_string());
                file.size = std::fs::metadata(&absolute).ok().map(|m| m.len());
            }
        });
        outputs.insert(output.id.clone(), value);
    }
    Ok(outputs)
}
