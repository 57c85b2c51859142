//! Packed JSON parsing and structural checks.

use super::{
    local_id, normalize_id, qualify, Argument, CommandLineBinding, CommandLineTool, CwlType,
    InputParameter, OutputBinding, OutputParameter, Process, ProcessKind, Requirement,
    ScatterMethod, StepInput, WorkflowStep,
};
use crate::error::{Component, CwlError, CwlResult};
use crate::value::Value;
use indexmap::IndexMap;
use serde_json::{Map, Value as JsonValue};
use std::sync::Arc;

/// A packed CWL document: every process of `$graph`, keyed by normalised id.
#[derive(Debug, Clone)]
pub struct PackedDocument {
    pub cwl_version: String,
    pub processes: IndexMap<String, Arc<Process>>,
}

impl PackedDocument {
    /// Parse a packed document from JSON text.
    pub fn from_str(text: &str) -> CwlResult<Self> {
        let json: JsonValue = serde_json::from_str(text).map_err(|e| {
            CwlError::parse(Component::Document, format!("invalid packed document: {}", e))
        })?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &JsonValue) -> CwlResult<Self> {
        let root = json.as_object().ok_or_else(|| {
            CwlError::parse(Component::Document, "packed document must be a JSON object")
        })?;

        let cwl_version = root
            .get("cwlVersion")
            .and_then(JsonValue::as_str)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| CwlError::parse(Component::Document, "missing 'cwlVersion'"))?
            .to_string();

        let graph = root
            .get("$graph")
            .and_then(JsonValue::as_array)
            .ok_or_else(|| CwlError::parse(Component::Document, "missing '$graph' array"))?;

        let mut parsed = Vec::new();
        for entry in graph {
            let process = parse_process(entry, None, &mut parsed)?;
            parsed.push(process);
        }

        let mut processes = IndexMap::new();
        for process in parsed {
            if processes.contains_key(&process.id) {
                return Err(CwlError::parse(
                    Component::Document,
                    format!("duplicate process id '{}'", process.id),
                ));
            }
            processes.insert(process.id.clone(), Arc::new(process));
        }

        Ok(PackedDocument {
            cwl_version,
            processes,
        })
    }

    pub fn process(&self, id: &str) -> Option<&Arc<Process>> {
        self.processes.get(&normalize_id(id))
    }

    /// The `#main` process.
    pub fn main(&self) -> CwlResult<&Arc<Process>> {
        self.process("#main").ok_or_else(|| {
            CwlError::resolve(Component::GraphResolver, "no '#main' process in the packed graph")
        })
    }
}

/// Entries of a CWL list-or-map field as `(raw id, body)` pairs.
///
/// Accepts the list form (`[{id: a, ...}]`), bare strings in a list
/// (`out: [x]`) and the map form (`{a: {...}}`); a map value that is not an
/// object is treated as the shorthand for the `type` field.
pub fn id_entries(json: Option<&JsonValue>, key_field: &str) -> CwlResult<Vec<(String, JsonValue)>> {
    id_entries_with(json, key_field, "type")
}

/// Like [`id_entries`] with a custom shorthand field for map values.
pub fn id_entries_with(
    json: Option<&JsonValue>,
    key_field: &str,
    shorthand: &str,
) -> CwlResult<Vec<(String, JsonValue)>> {
    match json {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|item| match item {
                JsonValue::String(id) => Ok((id.clone(), JsonValue::Object(Map::new()))),
                JsonValue::Object(fields) => {
                    let id = fields
                        .get(key_field)
                        .and_then(JsonValue::as_str)
                        .ok_or_else(|| {
                            CwlError::parse(
                                Component::Document,
                                format!("entry without '{}': {}", key_field, item),
                            )
                        })?;
                    Ok((id.to_string(), item.clone()))
                }
                other => Err(CwlError::parse(
                    Component::Document,
                    format!("invalid list entry: {}", other),
                )),
            })
            .collect(),
        Some(JsonValue::Object(map)) => Ok(map
            .iter()
            .map(|(id, body)| {
                let body = match body {
                    JsonValue::Object(_) => body.clone(),
                    other => {
                        let mut fields = Map::new();
                        fields.insert(shorthand.to_string(), other.clone());
                        JsonValue::Object(fields)
                    }
                };
                (id.clone(), body)
            })
            .collect()),
        Some(other) => Err(CwlError::parse(
            Component::Document,
            format!("expected a list or a map, found {}", other),
        )),
    }
}

fn string_list(json: Option<&JsonValue>) -> Vec<String> {
    match json {
        Some(JsonValue::String(s)) => vec![s.clone()],
        Some(JsonValue::Array(items)) => items
            .iter()
            .filter_map(JsonValue::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn optional_string(json: &JsonValue, key: &str) -> Option<String> {
    json.get(key).and_then(JsonValue::as_str).map(str::to_string)
}

/// `secondaryFiles` patterns; the object form keeps its `pattern`.
fn secondary_files(json: Option<&JsonValue>) -> Vec<String> {
    let items = match json {
        Some(JsonValue::Array(items)) => items.clone(),
        Some(single) => vec![single.clone()],
        None => Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::String(s) => Some(s.clone()),
            JsonValue::Object(fields) => fields
                .get("pattern")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}

fn param_type(body: &JsonValue) -> CwlResult<CwlType> {
    match body.get("type") {
        Some(t) => CwlType::from_json(t),
        None => Ok(CwlType::Any),
    }
}

fn parse_inputs(json: Option<&JsonValue>) -> CwlResult<Vec<InputParameter>> {
    let mut inputs = Vec::new();
    for (id, body) in id_entries(json, "id")? {
        let input_binding = body
            .get("inputBinding")
            .map(CommandLineBinding::from_json)
            .transpose()?;
        let load_contents = body
            .get("loadContents")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
            || input_binding.as_ref().map(|b| b.load_contents).unwrap_or(false);
        inputs.push(InputParameter {
            id: local_id(&id).to_string(),
            param_type: param_type(&body)?,
            default: body.get("default").map(Value::from_json),
            input_binding,
            secondary_files: secondary_files(body.get("secondaryFiles")),
            load_contents,
        });
    }
    Ok(inputs)
}

fn parse_outputs(json: Option<&JsonValue>, scope: &str) -> CwlResult<Vec<OutputParameter>> {
    let mut outputs = Vec::new();
    for (id, body) in id_entries(json, "id")? {
        let output_binding = body
            .get("outputBinding")
            .map(OutputBinding::from_json)
            .transpose()?;
        let output_source = string_list(body.get("outputSource"))
            .iter()
            .map(|s| qualify(scope, s))
            .collect();
        outputs.push(OutputParameter {
            id: local_id(&id).to_string(),
            param_type: param_type(&body)?,
            output_binding,
            secondary_files: secondary_files(body.get("secondaryFiles")),
            output_source,
        });
    }
    Ok(outputs)
}

fn parse_step(
    raw_id: &str,
    body: &JsonValue,
    workflow_id: &str,
    registry: &mut Vec<Process>,
) -> CwlResult<WorkflowStep> {
    let id = qualify(workflow_id, raw_id);

    let run = match body.get("run") {
        Some(JsonValue::String(target)) => normalize_id(target),
        Some(inline @ JsonValue::Object(_)) => {
            let fallback = format!("{}/run", id);
            let process = parse_process(inline, Some(&fallback), registry)?;
            let run = process.id.clone();
            registry.push(process);
            run
        }
        _ => {
            return Err(CwlError::parse(
                Component::Document,
                format!("step '{}' has no 'run'", id),
            ))
        }
    };

    let mut inputs = Vec::new();
    for (input_id, input) in id_entries_with(body.get("in"), "id", "source")? {
        inputs.push(StepInput {
            id: local_id(&input_id).to_string(),
            source: string_list(input.get("source"))
                .iter()
                .map(|s| qualify(workflow_id, s))
                .collect(),
            value_from: optional_string(&input, "valueFrom"),
            default: input.get("default").map(Value::from_json),
        });
    }

    let outputs = id_entries(body.get("out"), "id")?
        .into_iter()
        .map(|(out_id, _)| local_id(&out_id).to_string())
        .collect();

    let scatter: Vec<String> = string_list(body.get("scatter"))
        .iter()
        .map(|s| local_id(s).to_string())
        .collect();
    let scatter_method = match body.get("scatterMethod").and_then(JsonValue::as_str) {
        Some(name) => Some(ScatterMethod::parse(local_id(name)).ok_or_else(|| {
            CwlError::parse(
                Component::Document,
                format!("step '{}': unknown scatterMethod '{}'", id, name),
            )
        })?),
        None => None,
    };

    Ok(WorkflowStep {
        id,
        run,
        inputs,
        outputs,
        scatter,
        scatter_method,
        requirements: Requirement::parse_list(body.get("requirements"))?,
        hints: Requirement::parse_list(body.get("hints"))?,
    })
}

/// Parse one process. Inline `run` processes of its steps are pushed onto
/// `registry` so they can be looked up by id like any other graph entry.
fn parse_process(
    json: &JsonValue,
    fallback_id: Option<&str>,
    registry: &mut Vec<Process>,
) -> CwlResult<Process> {
    if !json.is_object() {
        return Err(CwlError::parse(
            Component::Document,
            format!("process must be an object: {}", json),
        ));
    }
    let id = match (json.get("id").and_then(JsonValue::as_str), fallback_id) {
        (Some(id), _) => normalize_id(id),
        (None, Some(fallback)) => fallback.to_string(),
        (None, None) => {
            return Err(CwlError::parse(
                Component::Document,
                "process in '$graph' without 'id'",
            ))
        }
    };
    let class = json.get("class").and_then(JsonValue::as_str).ok_or_else(|| {
        CwlError::parse(Component::Document, format!("process '{}' has no 'class'", id))
    })?;

    let kind = match class {
        "Workflow" => {
            let mut steps = Vec::new();
            for (step_id, body) in id_entries(json.get("steps"), "id")? {
                steps.push(Arc::new(parse_step(&step_id, &body, &id, registry)?));
            }
            ProcessKind::Workflow { steps }
        }
        "CommandLineTool" => {
            let arguments = match json.get("arguments") {
                Some(JsonValue::Array(items)) => items
                    .iter()
                    .map(Argument::from_json)
                    .collect::<CwlResult<Vec<_>>>()?,
                _ => Vec::new(),
            };
            ProcessKind::CommandLineTool(CommandLineTool {
                base_command: string_list(json.get("baseCommand")),
                arguments,
                stdin: optional_string(json, "stdin"),
                stdout: optional_string(json, "stdout"),
                stderr: optional_string(json, "stderr"),
            })
        }
        "ExpressionTool" => {
            let expression = optional_string(json, "expression").ok_or_else(|| {
                CwlError::parse(
                    Component::Document,
                    format!("ExpressionTool '{}' has no 'expression'", id),
                )
            })?;
            ProcessKind::ExpressionTool { expression }
        }
        other => {
            return Err(CwlError::not_implemented(
                Component::Document,
                format!("process '{}' has unsupported class '{}'", id, other),
            ))
        }
    };

    Ok(Process {
        inputs: parse_inputs(json.get("inputs"))?,
        outputs: parse_outputs(json.get("outputs"), &id)?,
        requirements: Requirement::parse_list(json.get("requirements"))?,
        hints: Requirement::parse_list(json.get("hints"))?,
        id,
        kind,
    })
}
