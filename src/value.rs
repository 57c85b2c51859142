//! CWL parameter values.
//!
//! [`Value`] is the tagged union every parameter, output and expression result
//! is represented with inside the engine. It converts to and from plain JSON at
//! the boundaries: the request/response objects and the JavaScript interpreter.
//! `File` and `Directory` are recognised by their `class` key.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::Path;

/// A CWL parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int(i64),
    Float(f64),
    String(String),
    File(FileValue),
    Directory(DirectoryValue),
    Array(Vec<Value>),
    Record(IndexMap<String, Value>),
}

/// A `File` object.
///
/// `basename`, `nameroot`, `nameext` and `dirname` are derived from
/// `location`; use [`FileValue::set_location`] to change it so they stay in
/// sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileValue {
    #[serde(default = "file_class")]
    pub class: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub basename: String,
    #[serde(default)]
    pub nameroot: String,
    #[serde(default)]
    pub nameext: String,
    #[serde(default)]
    pub dirname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secondary_files: Vec<JsonValue>,
}

/// A `Directory` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryValue {
    #[serde(default = "directory_class")]
    pub class: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub basename: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub listing: Vec<JsonValue>,
}

fn file_class() -> String {
    "File".to_string()
}

fn directory_class() -> String {
    "Directory".to_string()
}

/// Strip a `file://` scheme, leaving any other location untouched.
pub fn location_to_path(location: &str) -> String {
    if location.starts_with("file://") {
        if let Ok(url) = url::Url::parse(location) {
            if let Ok(path) = url.to_file_path() {
                return path.display().to_string();
            }
        }
        return location.trim_start_matches("file://").to_string();
    }
    location.to_string()
}

/// Split a basename into `(nameroot, nameext)`.
///
/// Leading dots never start an extension: `.hidden.tar.gz` gives
/// `(".hidden.tar", ".gz")` and `.bashrc` gives `(".bashrc", "")`.
pub fn split_basename(basename: &str) -> (String, String) {
    let trimmed = basename.trim_start_matches('.');
    let leading = &basename[..basename.len() - trimmed.len()];
    match trimmed.rfind('.') {
        Some(idx) => (
            format!("{}{}", leading, &trimmed[..idx]),
            trimmed[idx..].to_string(),
        ),
        None => (basename.to_string(), String::new()),
    }
}

impl FileValue {
    /// Create a file from a location and derive its name fields.
    pub fn new(location: impl Into<String>) -> Self {
        let mut file = FileValue {
            class: file_class(),
            location: String::new(),
            path: String::new(),
            basename: String::new(),
            nameroot: String::new(),
            nameext: String::new(),
            dirname: String::new(),
            contents: None,
            size: None,
            checksum: None,
            format: None,
            secondary_files: Vec::new(),
        };
        file.set_location(location);
        file
    }

    /// Create a file for a path on the local file system, recording its size.
    pub fn from_path(path: &Path) -> Self {
        let mut file = FileValue::new(path.display().to_string());
        file.size = std::fs::metadata(path).ok().map(|m| m.len());
        file
    }

    /// Replace the location and re-derive `path`, `basename`, `nameroot`,
    /// `nameext` and `dirname`.
    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
        self.path = location_to_path(&self.location);
        self.derive_names();
    }

    fn derive_names(&mut self) {
        let path = Path::new(&self.path);
        self.basename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.dirname = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let (nameroot, nameext) = split_basename(&self.basename);
        self.nameroot = nameroot;
        self.nameext = nameext;
    }

    /// Fill in location/path when a record supplied only one of them.
    fn complete(mut self) -> Self {
        if self.location.is_empty() && !self.path.is_empty() {
            self.location = self.path.clone();
        }
        if !self.location.is_empty() {
            let location = self.location.clone();
            self.set_location(location);
        }
        self
    }
}

impl DirectoryValue {
    pub fn new(location: impl Into<String>) -> Self {
        let location = location.into();
        let path = location_to_path(&location);
        let basename = Path::new(&path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        DirectoryValue {
            class: directory_class(),
            location,
            path,
            basename,
            listing: Vec::new(),
        }
    }

    fn complete(self) -> Self {
        let location = if self.location.is_empty() {
            self.path.clone()
        } else {
            self.location.clone()
        };
        DirectoryValue {
            listing: self.listing,
            ..DirectoryValue::new(location)
        }
    }
}

impl Value {
    /// Convert a JSON value, recognising `File`/`Directory` records.
    pub fn from_json(json: &JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Boolean(*b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            JsonValue::String(s) => Value::String(s.clone()),
            JsonValue::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            JsonValue::Object(map) => match map.get("class").and_then(JsonValue::as_str) {
                Some("File") => match serde_json::from_value::<FileValue>(json.clone()) {
                    Ok(file) => Value::File(file.complete()),
                    Err(_) => Value::Record(record_from_json(map)),
                },
                Some("Directory") => match serde_json::from_value::<DirectoryValue>(json.clone())
                {
                    Ok(dir) => Value::Directory(dir.complete()),
                    Err(_) => Value::Record(record_from_json(map)),
                },
                _ => Value::Record(record_from_json(map)),
            },
        }
    }

    /// Convert to plain JSON; records and files become objects.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Boolean(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::File(file) => serde_json::to_value(file).unwrap_or(JsonValue::Null),
            Value::Directory(dir) => serde_json::to_value(dir).unwrap_or(JsonValue::Null),
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Record(fields) => JsonValue::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_file(&self) -> Option<&FileValue> {
        match self {
            Value::File(file) => Some(file),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "boolean",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::File(_) => "File",
            Value::Directory(_) => "Directory",
            Value::Array(_) => "array",
            Value::Record(_) => "record",
        }
    }

    /// Apply `f` to every `File` reachable through arrays and records.
    pub fn for_each_file_mut<F: FnMut(&mut FileValue)>(&mut self, f: &mut F) {
        match self {
            Value::File(file) => f(file),
            Value::Array(items) => items.iter_mut().for_each(|v| v.for_each_file_mut(f)),
            Value::Record(fields) => fields.values_mut().for_each(|v| v.for_each_file_mut(f)),
            _ => {}
        }
    }
}

fn record_from_json(map: &serde_json::Map<String, JsonValue>) -> IndexMap<String, Value> {
    map.iter()
        .map(|(k, v)| (k.clone(), Value::from_json(v)))
        .collect()
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<FileValue> for Value {
    fn from(file: FileValue) -> Self {
        Value::File(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_split_basename() {
        assert_eq!(
            split_basename(".hidden.tar.gz"),
            (".hidden.tar".to_string(), ".gz".to_string())
        );
        assert_eq!(split_basename(".bashrc"), (".bashrc".to_string(), String::new()));
        assert_eq!(split_basename("reads.bam"), ("reads".to_string(), ".bam".to_string()));
        assert_eq!(split_basename("README"), ("README".to_string(), String::new()));
    }

    #[test]
    fn test_file_names_follow_location() {
        let mut file = FileValue::new("/data/in/sample.fastq.gz");
        assert_eq!(file.basename, "sample.fastq.gz");
        assert_eq!(file.nameroot, "sample.fastq");
        assert_eq!(file.nameext, ".gz");
        assert_eq!(file.dirname, "/data/in");

        file.set_location("/other/..cfg");
        assert_eq!(file.basename, "..cfg");
        assert_eq!(file.nameroot, "..cfg");
        assert_eq!(file.nameext, "");
        assert_eq!(file.dirname, "/other");
    }

    #[test]
    fn test_file_url_location() {
        let file = FileValue::new("file:///tmp/x/a.txt");
        assert_eq!(file.path, "/tmp/x/a.txt");
        assert_eq!(file.basename, "a.txt");
    }

    #[test]
    fn test_from_json_recognises_file() {
        let value = Value::from_json(&json!({"class": "File", "path": "/a/b.txt"}));
        match value {
            Value::File(file) => {
                assert_eq!(file.location, "/a/b.txt");
                assert_eq!(file.nameroot, "b");
            }
            other => panic!("Expected File, got {:?}", other),
        }
    }

    #[test]
    fn test_json_boundary() {
        let json = json!({"n": 3, "x": 1.5, "tags": ["a", null], "ok": true});
        let value = Value::from_json(&json);
        match &value {
            Value::Record(fields) => {
                assert_eq!(fields.get("n"), Some(&Value::Int(3)));
                assert_eq!(fields.get("x"), Some(&Value::Float(1.5)));
            }
            other => panic!("Expected record, got {:?}", other),
        }
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_file_record_reingests_unchanged() {
        let mut file = FileValue::from_path(Path::new("/nonexistent/out.txt"));
        file.contents = Some("hello\n".to_string());
        let value = Value::File(file);
        let again = Value::from_json(&value.to_json());
        assert_eq!(again, value);
    }
}
