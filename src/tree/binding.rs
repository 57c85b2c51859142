//! Command line and output bindings.

use crate::error::{Component, CwlError, CwlResult};
use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

/// `inputBinding` of a parameter, array type or argument.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandLineBinding {
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default = "default_true")]
    pub separate: bool,
    #[serde(default)]
    pub item_separator: Option<String>,
    #[serde(default, deserialize_with = "expression_text")]
    pub value_from: Option<String>,
    #[serde(default = "default_true")]
    pub shell_quote: bool,
    #[serde(default)]
    pub load_contents: bool,
}

impl Default for CommandLineBinding {
    fn default() -> Self {
        Self {
            position: 0,
            prefix: None,
            separate: true,
            item_separator: None,
            value_from: None,
            shell_quote: true,
            load_contents: false,
        }
    }
}

impl CommandLineBinding {
    pub fn from_json(json: &JsonValue) -> CwlResult<Self> {
        serde_json::from_value(json.clone()).map_err(|e| {
            CwlError::parse(Component::Document, format!("invalid inputBinding: {}", e))
        })
    }
}

/// `outputBinding` of a CommandLineTool output.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputBinding {
    #[serde(default, deserialize_with = "one_or_many")]
    pub glob: Vec<String>,
    #[serde(default)]
    pub load_contents: bool,
    #[serde(default)]
    pub output_eval: Option<String>,
}

impl OutputBinding {
    pub fn from_json(json: &JsonValue) -> CwlResult<Self> {
        serde_json::from_value(json.clone()).map_err(|e| {
            CwlError::parse(Component::Document, format!("invalid outputBinding: {}", e))
        })
    }
}

/// One entry of a CommandLineTool's `arguments`.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
    /// Plain string form of the argument
    pub literal: Option<String>,
    pub binding: CommandLineBinding,
}

impl Argument {
    pub fn from_json(json: &JsonValue) -> CwlResult<Self> {
        match json {
            JsonValue::String(s) => Ok(Argument {
                literal: Some(s.clone()),
                binding: CommandLineBinding::default(),
            }),
            JsonValue::Object(_) => Ok(Argument {
                literal: None,
                binding: CommandLineBinding::from_json(json)?,
            }),
            other => Err(CwlError::parse(
                Component::Document,
                format!("invalid argument: {}", other),
            )),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Accept a string or a list of strings.
pub(crate) fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(s)) => vec![s],
        Some(OneOrMany::Many(v)) => v,
    })
}

/// `valueFrom` may be written as a non-string literal; keep its JSON text.
fn expression_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<JsonValue>::deserialize(deserializer)? {
        None | Some(JsonValue::Null) => None,
        Some(JsonValue::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}
