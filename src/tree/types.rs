//! CWL parameter types.

use crate::error::{Component, CwlError, CwlResult};
use crate::tree::binding::CommandLineBinding;
use serde_json::Value as JsonValue;
use std::fmt;

/// A CWL type expression.
#[derive(Debug, Clone, PartialEq)]
pub enum CwlType {
    Null,
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    File,
    Directory,
    Any,
    /// `stdout` shorthand output type
    Stdout,
    /// `stderr` shorthand output type
    Stderr,
    Array {
        items: Box<CwlType>,
        input_binding: Option<CommandLineBinding>,
    },
    Record {
        fields: Vec<RecordField>,
    },
    Enum {
        symbols: Vec<String>,
    },
    Union(Vec<CwlType>),
}

/// A field of a record type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub field_type: CwlType,
    pub input_binding: Option<CommandLineBinding>,
}

impl CwlType {
    /// Parse a type from its JSON form: a name (`"int"`, `"File[]?"`), a
    /// union list, or an `array`/`record`/`enum` schema object.
    pub fn from_json(json: &JsonValue) -> CwlResult<CwlType> {
        match json {
            JsonValue::String(name) => Self::from_name(name),
            JsonValue::Array(members) => {
                let members = members
                    .iter()
                    .map(CwlType::from_json)
                    .collect::<CwlResult<Vec<_>>>()?;
                Ok(CwlType::Union(members))
            }
            JsonValue::Object(schema) => {
                let kind = schema.get("type").and_then(JsonValue::as_str).ok_or_else(|| {
                    CwlError::parse(Component::Document, format!("type schema without 'type': {}", json))
                })?;
                match kind {
                    "array" => {
                        let items = schema.get("items").ok_or_else(|| {
                            CwlError::parse(Component::Document, "array schema without 'items'")
                        })?;
                        let input_binding = schema
                            .get("inputBinding")
                            .map(CommandLineBinding::from_json)
                            .transpose()?;
                        Ok(CwlType::Array {
                            items: Box::new(CwlType::from_json(items)?),
                            input_binding,
                        })
                    }
                    "record" => {
                        let mut fields = Vec::new();
                        for (name, body) in crate::tree::parse::id_entries(schema.get("fields"), "name")? {
                            let field_type = body
                                .get("type")
                                .map(CwlType::from_json)
                                .transpose()?
                                .unwrap_or(CwlType::Any);
                            let input_binding = body
                                .get("inputBinding")
                                .map(CommandLineBinding::from_json)
                                .transpose()?;
                            fields.push(RecordField {
                                name: crate::tree::local_id(&name).to_string(),
                                field_type,
                                input_binding,
                            });
                        }
                        Ok(CwlType::Record { fields })
                    }
                    "enum" => {
                        let symbols = schema
                            .get("symbols")
                            .and_then(JsonValue::as_array)
                            .map(|s| {
                                s.iter()
                                    .filter_map(JsonValue::as_str)
                                    .map(|s| crate::tree::local_id(s).to_string())
                                    .collect()
                            })
                            .unwrap_or_default();
                        Ok(CwlType::Enum { symbols })
                    }
                    other => Self::from_name(other),
                }
            }
            other => Err(CwlError::parse(
                Component::Document,
                format!("invalid type expression: {}", other),
            )),
        }
    }

    fn from_name(name: &str) -> CwlResult<CwlType> {
        if let Some(inner) = name.strip_suffix('?') {
            return Ok(CwlType::Union(vec![CwlType::Null, Self::from_name(inner)?]));
        }
        if let Some(inner) = name.strip_suffix("[]") {
            return Ok(CwlType::Array {
                items: Box::new(Self::from_name(inner)?),
                input_binding: None,
            });
        }
        let bare = name.trim_start_matches("https://w3id.org/cwl/salad#");
        match bare {
            "null" => Ok(CwlType::Null),
            "boolean" => Ok(CwlType::Boolean),
            "int" => Ok(CwlType::Int),
            "long" => Ok(CwlType::Long),
            "float" => Ok(CwlType::Float),
            "double" => Ok(CwlType::Double),
            "string" => Ok(CwlType::String),
            "File" => Ok(CwlType::File),
            "Directory" => Ok(CwlType::Directory),
            "Any" => Ok(CwlType::Any),
            "stdout" => Ok(CwlType::Stdout),
            "stderr" => Ok(CwlType::Stderr),
            other => Err(CwlError::not_implemented(
                Component::Document,
                format!("unsupported type '{}'", other),
            )),
        }
    }

    /// True when `null` is an acceptable value.
    pub fn is_optional(&self) -> bool {
        match self {
            CwlType::Null | CwlType::Any => true,
            CwlType::Union(members) => members.iter().any(CwlType::is_optional),
            _ => false,
        }
    }

    /// The type with `null` removed from a `[null, T]` union.
    pub fn non_null(&self) -> &CwlType {
        match self {
            CwlType::Union(members) => {
                let mut rest = members.iter().filter(|t| **t != CwlType::Null);
                match (rest.next(), rest.next()) {
                    (Some(only), None) => only.non_null(),
                    _ => self,
                }
            }
            _ => self,
        }
    }

    /// True for `File` and the `stdout`/`stderr` shorthands.
    pub fn is_file(&self) -> bool {
        matches!(self.non_null(), CwlType::File | CwlType::Stdout | CwlType::Stderr)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.non_null(), CwlType::Array { .. })
    }
}

impl fmt::Display for CwlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CwlType::Null => write!(f, "null"),
            CwlType::Boolean => write!(f, "boolean"),
            CwlType::Int => write!(f, "int"),
            CwlType::Long => write!(f, "long"),
            CwlType::Float => write!(f, "float"),
            CwlType::Double => write!(f, "double"),
            CwlType::String => write!(f, "string"),
            CwlType::File => write!(f, "File"),
            CwlType::Directory => write!(f, "Directory"),
            CwlType::Any => write!(f, "Any"),
            CwlType::Stdout => write!(f, "stdout"),
            CwlType::Stderr => write!(f, "stderr"),
            CwlType::Array { items, .. } => write!(f, "{}[]", items),
            CwlType::Record { .. } => write!(f, "record"),
            CwlType::Enum { .. } => write!(f, "enum"),
            CwlType::Union(members) => {
                if let [CwlType::Null, only] = members.as_slice() {
                    return write!(f, "{}?", only);
                }
                let names: Vec<String> = members.iter().map(|m| m.to_string()).collect();
                write!(f, "[{}]", names.join(", "))
            }
        }
    }
}
