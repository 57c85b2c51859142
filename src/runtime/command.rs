//! Command line assembly for CommandLineTools
//!
//! The command line is built from the tool's `baseCommand` followed by one
//! fragment per `arguments` entry and per input with an `inputBinding`.
//! Fragments are ordered by `position`; on equal positions arguments come
//! before inputs (in declaration order) and inputs are ordered by id. The
//! `stdout`/`stderr` redirections close the command line.

use crate::error::{Component, CwlError, CwlResult};
use crate::expr::{self, ExprContext};
use crate::tree::{local_id, CommandLineBinding, CommandLineTool, CwlType, Process};
use crate::value::Value;
use indexmap::IndexMap;
use serde_json::Value as JsonValue;

/// The rendered command of one tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledCommand {
    /// Shell words, redirections included
    pub argv: Vec<String>,
    /// File the tool reads its standard input from
    pub stdin: Option<String>,
    /// File standard output is captured in, relative to the working directory
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// Wrap a word in double quotes, escaping the characters that stay special
/// inside them.
pub fn shell_quote(word: &str) -> String {
    let mut quoted = String::with_capacity(word.len() + 2);
    quoted.push('"');
    for c in word.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

struct Fragment {
    position: i64,
    /// 0 for arguments, 1 for inputs
    class: u8,
    index: usize,
    id: String,
    words: Vec<String>,
}

/// Assemble the command line of `process`.
///
/// `provided` holds the bound input values (after any `inputBinding.valueFrom`);
/// `context` exposes the normalized inputs and `runtime` to expressions.
pub fn assemble(
    process: &Process,
    tool: &CommandLineTool,
    provided: &IndexMap<String, Value>,
    context: &ExprContext,
    shell_command: bool,
) -> CwlResult<AssembledCommand> {
    let mut fragments = Vec::new();

    for (index, argument) in tool.arguments.iter().enumerate() {
        let binding = &argument.binding;
        let value = match (&argument.literal, &binding.value_from) {
            (Some(literal), _) => expr::evaluate(literal, context)?,
            (None, Some(value_from)) => expr::evaluate(value_from, context)?,
            (None, None) => Value::Null,
        };
        let words = render(&value, binding, None, shell_command)?;
        fragments.push(Fragment {
            position: binding.position,
            class: 0,
            index,
            id: String::new(),
            words,
        });
    }

    for input in &process.inputs {
        let Some(binding) = &input.input_binding else {
            continue;
        };
        let value = provided.get(&input.id).cloned().unwrap_or(Value::Null);
        let words = render(&value, binding, Some(input.param_type.non_null()), shell_command)?;
        fragments.push(Fragment {
            position: binding.position,
            class: 1,
            index: 0,
            id: input.id.clone(),
            words,
        });
    }

    fragments.sort_by(|a, b| {
        (a.position, a.class, a.index, &a.id).cmp(&(b.position, b.class, b.index, &b.id))
    });

    let mut argv = tool.base_command.iter().map(|w| shell_quote(w)).collect::<Vec<_>>();
    argv.extend(fragments.into_iter().flat_map(|f| f.words));

    let stdin = match &tool.stdin {
        Some(expression) => Some(redirect_target(expression, context)?),
        None => None,
    };
    let stdout = capture_file(process, tool.stdout.as_deref(), CwlType::Stdout, "stdout", context)?;
    let stderr = capture_file(process, tool.stderr.as_deref(), CwlType::Stderr, "stderr", context)?;

    if let Some(file) = &stdout {
        argv.push("1>>".to_string());
        argv.push(shell_quote(file));
    }
    if let Some(file) = &stderr {
        argv.push("2>>".to_string());
        argv.push(shell_quote(file));
    }

    Ok(AssembledCommand {
        argv,
        stdin,
        stdout,
        stderr,
    })
}

/// Target of a `stdout`/`stderr` capture: the evaluated field, or a generated
/// name when an output of the shorthand type needs one.
fn capture_file(
    process: &Process,
    field: Option<&str>,
    shorthand: CwlType,
    suffix: &str,
    context: &ExprContext,
) -> CwlResult<Option<String>> {
    if let Some(expression) = field {
        return Ok(Some(expr::evaluate_string(expression, context)?));
    }
    if process.outputs.iter().any(|o| *o.param_type.non_null() == shorthand) {
        return Ok(Some(format!("{}.{}", local_id(&process.id), suffix)));
    }
    Ok(None)
}

fn redirect_target(expression: &str, context: &ExprContext) -> CwlResult<String> {
    match expr::evaluate(expression, context)? {
        Value::String(path) => Ok(path),
        Value::File(file) => Ok(file.path),
        other => Err(CwlError::eval(
            Component::CommandAssembler,
            format!("stdin must be a string or File, got {}", other.type_name()),
        )),
    }
}

/// Render one bound value into shell words.
fn render(
    value: &Value,
    binding: &CommandLineBinding,
    declared: Option<&CwlType>,
    shell_command: bool,
) -> CwlResult<Vec<String>> {
    let quote = |word: String| {
        if shell_command && !binding.shell_quote {
            word
        } else {
            shell_quote(&word)
        }
    };
    let with_prefix = |text: String| -> Vec<String> {
        match &binding.prefix {
            Some(prefix) if binding.separate => vec![quote(prefix.clone()), quote(text)],
            Some(prefix) => vec![quote(format!("{}{}", prefix, text))],
            None => vec![quote(text)],
        }
    };

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Boolean(true) => Ok(binding.prefix.iter().map(|p| quote(p.clone())).collect()),
        Value::Boolean(false) => Ok(Vec::new()),
        Value::Array(items) if items.is_empty() => Ok(Vec::new()),
        Value::Array(items) => {
            if let Some(separator) = &binding.item_separator {
                let joined = items
                    .iter()
                    .map(scalar_text)
                    .collect::<CwlResult<Vec<_>>>()?
                    .join(separator);
                return Ok(with_prefix(joined));
            }

            let (item_type, item_binding) = match declared {
                Some(CwlType::Array { items, input_binding }) => {
                    (Some(items.non_null()), input_binding.as_ref())
                }
                _ => (None, None),
            };
            let mut words: Vec<String> = binding.prefix.iter().map(|p| quote(p.clone())).collect();
            for item in items {
                match item_binding {
                    Some(nested) => words.extend(render(item, nested, item_type, shell_command)?),
                    None => match item {
                        Value::Null => {}
                        other => words.push(quote(scalar_text(other)?)),
                    },
                }
            }
            Ok(words)
        }
        Value::Record(_) => Err(CwlError::not_implemented(
            Component::CommandAssembler,
            "record values cannot be bound to the command line",
        )),
        scalar => Ok(with_prefix(scalar_text(scalar)?)),
    }
}

/// Command line text of a non-container value.
fn scalar_text(value: &Value) -> CwlResult<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(JsonValue::from(*f).to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::File(file) => Ok(if file.path.is_empty() {
            file.location.clone()
        } else {
            file.path.clone()
        }),
        Value::Directory(dir) => Ok(if dir.path.is_empty() {
            dir.location.clone()
        } else {
            dir.path.clone()
        }),
        other => Err(CwlError::not_implemented(
            Component::CommandAssembler,
            format!("cannot render {} as a command line word", other.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::PackedDocument;
    use crate::value::FileValue;
    use serde_json::json;
    use std::sync::Arc;

    fn tool_process(body: JsonValue) -> Arc<Process> {
        let mut body = body;
        body["id"] = json!("#main");
        body["class"] = json!("CommandLineTool");
        let doc = PackedDocument::from_json(&json!({"cwlVersion": "v1.0", "$graph": [body]}))
            .unwrap();
        Arc::clone(doc.main().unwrap())
    }

    fn assemble_with(process: &Process, provided: IndexMap<String, Value>) -> CwlResult<AssembledCommand> {
        let crate::tree::ProcessKind::CommandLineTool(tool) = &process.kind else {
            panic!("not a tool");
        };
        let context = ExprContext::new(&provided);
        assemble(process, tool, &provided, &context, false)
    }

    fn params(pairs: &[(&str, Value)]) -> IndexMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_echo_with_stdout() {
        let process = tool_process(json!({
            "baseCommand": ["echo"],
            "inputs": [{"id": "msg", "type": "string", "inputBinding": {"position": 1}}],
            "outputs": [],
            "stdout": "out.txt"
        }));
        let command = assemble_with(&process, params(&[("msg", Value::from("hello"))])).unwrap();
        assert_eq!(command.argv, vec!["\"echo\"", "\"hello\"", "1>>", "\"out.txt\""]);
        assert_eq!(command.stdout.as_deref(), Some("out.txt"));
        assert!(command.stderr.is_none());
    }

    #[test]
    fn test_position_and_tie_order() {
        let process = tool_process(json!({
            "baseCommand": "tool",
            "arguments": [{"valueFrom": "--fast", "position": 2}, "-v"],
            "inputs": {
                "zeta": {"type": "string", "inputBinding": {"position": 2}},
                "alpha": {"type": "string", "inputBinding": {"position": 2}},
                "first": {"type": "int", "inputBinding": {"position": 1, "prefix": "-n"}}
            },
            "outputs": []
        }));
        let provided = params(&[
            ("zeta", Value::from("z")),
            ("alpha", Value::from("a")),
            ("first", Value::Int(3)),
        ]);
        let command = assemble_with(&process, provided.clone()).unwrap();
        assert_eq!(
            command.argv,
            vec!["\"tool\"", "\"-v\"", "\"-n\"", "\"3\"", "\"--fast\"", "\"a\"", "\"z\""]
        );
        assert_eq!(assemble_with(&process, provided).unwrap(), command);
    }

    #[test]
    fn test_type_rules() {
        let process = tool_process(json!({
            "baseCommand": "t",
            "inputs": {
                "a_flag": {"type": "boolean", "inputBinding": {"position": 1, "prefix": "--flag"}},
                "b_off": {"type": "boolean", "inputBinding": {"position": 2, "prefix": "--off"}},
                "c_none": {"type": "string?", "inputBinding": {"position": 3, "prefix": "-x"}},
                "d_joined": {"type": "int", "inputBinding": {"position": 4, "prefix": "-k=", "separate": false}},
                "e_file": {"type": "File", "inputBinding": {"position": 5}},
                "f_list": {"type": "string[]", "inputBinding": {"position": 6, "prefix": "-l", "itemSeparator": ","}},
                "g_empty": {"type": "string[]", "inputBinding": {"position": 7, "prefix": "-e"}}
            },
            "outputs": []
        }));
        let provided = params(&[
            ("a_flag", Value::Boolean(true)),
            ("b_off", Value::Boolean(false)),
            ("c_none", Value::Null),
            ("d_joined", Value::Int(5)),
            ("e_file", Value::File(FileValue::new("/data/in.bam"))),
            ("f_list", Value::Array(vec![Value::from("a"), Value::from("b")])),
            ("g_empty", Value::Array(vec![])),
        ]);
        let command = assemble_with(&process, provided).unwrap();
        assert_eq!(
            command.argv,
            vec!["\"t\"", "\"--flag\"", "\"-k=5\"", "\"/data/in.bam\"", "\"-l\"", "\"a,b\""]
        );
    }

    #[test]
    fn test_array_item_bindings() {
        let process = tool_process(json!({
            "baseCommand": "t",
            "inputs": {
                "xs": {
                    "type": {"type": "array", "items": "int", "inputBinding": {"prefix": "-i"}},
                    "inputBinding": {"position": 1, "prefix": "--all"}
                }
            },
            "outputs": []
        }));
        let provided = params(&[("xs", Value::Array(vec![Value::Int(1), Value::Int(2)]))]);
        let command = assemble_with(&process, provided).unwrap();
        assert_eq!(
            command.argv,
            vec!["\"t\"", "\"--all\"", "\"-i\"", "\"1\"", "\"-i\"", "\"2\""]
        );
    }

    #[test]
    fn test_record_not_implemented() {
        let process = tool_process(json!({
            "baseCommand": "t",
            "inputs": {"r": {"type": "Any", "inputBinding": {}}},
            "outputs": []
        }));
        let mut record = IndexMap::new();
        record.insert("a".to_string(), Value::Int(1));
        let err = assemble_with(&process, params(&[("r", Value::Record(record))])).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotImplemented);
    }

    #[test]
    fn test_shell_quote_disabled_with_shell_command() {
        let process = tool_process(json!({
            "baseCommand": "cat",
            "arguments": [{"valueFrom": "| wc -l", "shellQuote": false, "position": 1}],
            "inputs": [],
            "outputs": []
        }));
        let crate::tree::ProcessKind::CommandLineTool(tool) = &process.kind else {
            panic!("not a tool");
        };
        let provided = IndexMap::new();
        let context = ExprContext::new(&provided);
        let raw = assemble(&process, tool, &provided, &context, true).unwrap();
        assert_eq!(raw.argv, vec!["\"cat\"", "| wc -l"]);
        let quoted = assemble(&process, tool, &provided, &context, false).unwrap();
        assert_eq!(quoted.argv, vec!["\"cat\"", "\"| wc -l\""]);
    }

    #[test]
    fn test_generated_stdout_and_stdin() {
        let process = tool_process(json!({
            "baseCommand": "wc",
            "inputs": {"src": "File"},
            "outputs": {"count": "stdout"},
            "stdin": "$(inputs.src.path)"
        }));
        let provided = params(&[("src", Value::File(FileValue::new("/data/in.txt")))]);
        let command = assemble_with(&process, provided).unwrap();
        assert_eq!(command.stdout.as_deref(), Some("main.stdout"));
        assert_eq!(command.stdin.as_deref(), Some("/data/in.txt"));
        assert_eq!(command.argv, vec!["\"wc\"", "1>>", "\"main.stdout\""]);
    }

    #[test]
    fn test_shell_quote_escapes() {
        assert_eq!(shell_quote("a b"), "\"a b\"");
        assert_eq!(shell_quote("say \"$HOME\""), "\"say \\\"\\$HOME\\\"\"");
    }
}
