//! Process requirements and hints.

use crate::error::{Component, CwlError, CwlResult};
use serde_json::Value as JsonValue;

/// A requirement or hint the engine understands.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    InlineJavascript {
        expression_lib: Vec<String>,
    },
    InitialWorkDir {
        listing: Vec<WorkDirEntry>,
    },
    Docker {
        docker_pull: Option<String>,
    },
    EnvVar {
        env_def: Vec<(String, String)>,
    },
    Resource {
        cores_min: Option<JsonValue>,
        cores_max: Option<JsonValue>,
        ram_min: Option<JsonValue>,
        ram_max: Option<JsonValue>,
    },
    ShellCommand,
    /// Recognised as a requirement but carries nothing the engine acts on
    Other {
        class: String,
    },
}

/// One `listing` entry of an `InitialWorkDirRequirement`.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkDirEntry {
    /// An expression yielding a File, Directory or an array of them
    Expression(String),
    Dirent {
        entry: String,
        entryname: Option<String>,
        writable: bool,
    },
    /// A literal File or Directory object
    Literal(JsonValue),
}

impl Requirement {
    pub fn class(&self) -> &str {
        match self {
            Requirement::InlineJavascript { .. } => "InlineJavascriptRequirement",
            Requirement::InitialWorkDir { .. } => "InitialWorkDirRequirement",
            Requirement::Docker { .. } => "DockerRequirement",
            Requirement::EnvVar { .. } => "EnvVarRequirement",
            Requirement::Resource { .. } => "ResourceRequirement",
            Requirement::ShellCommand => "ShellCommandRequirement",
            Requirement::Other { class } => class,
        }
    }

    /// Parse a `requirements`/`hints` list, accepting both the list form and
    /// the `{class: body}` map form.
    pub fn parse_list(json: Option<&JsonValue>) -> CwlResult<Vec<Requirement>> {
        match json {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(JsonValue::Array(items)) => items.iter().map(Requirement::from_json).collect(),
            Some(JsonValue::Object(map)) => map
                .iter()
                .map(|(class, body)| {
                    let mut body = body.clone();
                    if let JsonValue::Object(fields) = &mut body {
                        fields.insert("class".to_string(), JsonValue::String(class.clone()));
                    }
                    Requirement::from_json(&body)
                })
                .collect(),
            Some(other) => Err(CwlError::parse(
                Component::Document,
                format!("invalid requirements: {}", other),
            )),
        }
    }

    pub fn from_json(json: &JsonValue) -> CwlResult<Requirement> {
        let class = json.get("class").and_then(JsonValue::as_str).ok_or_else(|| {
            CwlError::parse(Component::Document, format!("requirement without class: {}", json))
        })?;
        let class = class.rsplit('#').next().unwrap_or(class);

        let requirement = match class {
            "InlineJavascriptRequirement" => Requirement::InlineJavascript {
                expression_lib: strings(json.get("expressionLib")),
            },
            "InitialWorkDirRequirement" => {
                let listing = match json.get("listing") {
                    Some(JsonValue::Array(items)) => items
                        .iter()
                        .map(WorkDirEntry::from_json)
                        .collect::<CwlResult<Vec<_>>>()?,
                    Some(JsonValue::String(expr)) => vec![WorkDirEntry::Expression(expr.clone())],
                    _ => Vec::new(),
                };
                Requirement::InitialWorkDir { listing }
            }
            "DockerRequirement" => Requirement::Docker {
                docker_pull: json
                    .get("dockerPull")
                    .and_then(JsonValue::as_str)
                    .map(str::to_string),
            },
            "EnvVarRequirement" => {
                let env_def = match json.get("envDef") {
                    Some(JsonValue::Array(items)) => items
                        .iter()
                        .filter_map(|item| {
                            let name = item.get("envName")?.as_str()?;
                            let value = item.get("envValue")?.as_str()?;
                            Some((name.to_string(), value.to_string()))
                        })
                        .collect(),
                    Some(JsonValue::Object(map)) => map
                        .iter()
                        .filter_map(|(name, value)| {
                            let value = match value {
                                JsonValue::String(s) => s.clone(),
                                JsonValue::Object(o) => o.get("envValue")?.as_str()?.to_string(),
                                _ => return None,
                            };
                            Some((name.clone(), value))
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                Requirement::EnvVar { env_def }
            }
            "ResourceRequirement" => Requirement::Resource {
                cores_min: json.get("coresMin").cloned(),
                cores_max: json.get("coresMax").cloned(),
                ram_min: json.get("ramMin").cloned(),
                ram_max: json.get("ramMax").cloned(),
            },
            "ShellCommandRequirement" => Requirement::ShellCommand,
            other => Requirement::Other {
                class: other.to_string(),
            },
        };
        Ok(requirement)
    }
}

impl WorkDirEntry {
    fn from_json(json: &JsonValue) -> CwlResult<WorkDirEntry> {
        match json {
            JsonValue::String(expr) => Ok(WorkDirEntry::Expression(expr.clone())),
            JsonValue::Object(fields) => {
                if let Some(entry) = fields.get("entry") {
                    let entry = match entry {
                        JsonValue::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    Ok(WorkDirEntry::Dirent {
                        entry,
                        entryname: fields
                            .get("entryname")
                            .and_then(JsonValue::as_str)
                            .map(str::to_string),
                        writable: fields
                            .get("writable")
                            .and_then(JsonValue::as_bool)
                            .unwrap_or(false),
                    })
                } else {
                    Ok(WorkDirEntry::Literal(json.clone()))
                }
            }
            other => Err(CwlError::parse(
                Component::Document,
                format!("invalid InitialWorkDirRequirement listing entry: {}", other),
            )),
        }
    }
}

fn strings(json: Option<&JsonValue>) -> Vec<String> {
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
