//! Packed CWL document model
//!
//! This module contains the in-memory representation of a packed CWL
//! document: the processes of its `$graph` (workflows, command line tools and
//! expression tools), their parameters, bindings, types and requirements.
//! The model is built once by [`PackedDocument::from_json`] and shared
//! read-only (behind `Arc`) by every task of a run.

use crate::value::Value;
use std::sync::Arc;

pub mod binding;
pub mod parse;
pub mod requirements;
pub mod types;


pub use binding::{Argument, CommandLineBinding, OutputBinding};
pub use parse::PackedDocument;
pub use requirements::{Requirement, WorkDirEntry};
pub use types::{CwlType, RecordField};

/// Last segment of a CWL identifier: `#main/step/x` gives `x`, `#main` gives
/// `main`.
pub fn local_id(id: &str) -> &str {
    let tail = match id.rfind('/') {
        Some(idx) => &id[idx + 1..],
        None => id,
    };
    let tail = match tail.rfind('#') {
        Some(idx) => &tail[idx + 1..],
        None => tail,
    };
    tail
}

/// Normalise a process identifier so it starts with `#`. A document URI
/// prefix (`file:///wf.cwl#main`) is dropped.
pub fn normalize_id(id: &str) -> String {
    match id.find('#') {
        Some(idx) => id[idx..].to_string(),
        None => format!("#{}", id),
    }
}

/// Resolve a possibly relative reference (`A/x`, `msg`) against the id of
/// the process it appears in. Absolute references are normalised.
pub fn qualify(scope: &str, reference: &str) -> String {
    if reference.contains('#') {
        normalize_id(reference)
    } else {
        format!("{}/{}", scope, reference)
    }
}

/// Scatter combination method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScatterMethod {
    DotProduct,
    FlatCrossProduct,
    NestedCrossProduct,
}

impl ScatterMethod {
    pub fn parse(name: &str) -> Option<ScatterMethod> {
        match name {
            "dotproduct" => Some(ScatterMethod::DotProduct),
            "flat_crossproduct" => Some(ScatterMethod::FlatCrossProduct),
            "nested_crossproduct" => Some(ScatterMethod::NestedCrossProduct),
            _ => None,
        }
    }
}

/// A declared input of a process.
#[derive(Debug, Clone, PartialEq)]
pub struct InputParameter {
    /// Local name, without the process prefix
    pub id: String,
    pub param_type: CwlType,
    pub default: Option<Value>,
    pub input_binding: Option<CommandLineBinding>,
    pub secondary_files: Vec<String>,
    pub load_contents: bool,
}

/// A declared output of a process.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputParameter {
    /// Local name, without the process prefix
    pub id: String,
    pub param_type: CwlType,
    pub output_binding: Option<OutputBinding>,
    pub secondary_files: Vec<String>,
    /// Fully qualified sources of a workflow output
    pub output_source: Vec<String>,
}

/// One input of a workflow step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepInput {
    /// Local name, matching an input of the step's process
    pub id: String,
    /// Fully qualified source ids
    pub source: Vec<String>,
    pub value_from: Option<String>,
    pub default: Option<Value>,
}

/// A step of a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    /// Fully qualified step id (`#main/align`)
    pub id: String,
    /// Id of the process the step runs
    pub run: String,
    pub inputs: Vec<StepInput>,
    /// Local output names
    pub outputs: Vec<String>,
    /// Local names of the scattered inputs
    pub scatter: Vec<String>,
    pub scatter_method: Option<ScatterMethod>,
    pub requirements: Vec<Requirement>,
    pub hints: Vec<Requirement>,
}

impl WorkflowStep {
    pub fn name(&self) -> &str {
        local_id(&self.id)
    }

    pub fn input(&self, id: &str) -> Option<&StepInput> {
        self.inputs.iter().find(|i| i.id == id)
    }

    /// Qualified id of one of this step's outputs, as other steps reference it.
    pub fn output_id(&self, name: &str) -> String {
        format!("{}/{}", self.id, name)
    }
}

/// CommandLineTool specific fields.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandLineTool {
    pub base_command: Vec<String>,
    pub arguments: Vec<Argument>,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProcessKind {
    Workflow { steps: Vec<Arc<WorkflowStep>> },
    CommandLineTool(CommandLineTool),
    ExpressionTool { expression: String },
}

/// A node of the packed graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Process {
    /// Normalised id starting with `#`
    pub id: String,
    pub kind: ProcessKind,
    pub inputs: Vec<InputParameter>,
    pub outputs: Vec<OutputParameter>,
    pub requirements: Vec<Requirement>,
    pub hints: Vec<Requirement>,
}

impl Process {
    pub fn class_name(&self) -> &'static str {
        match self.kind {
            ProcessKind::Workflow { .. } => "Workflow",
            ProcessKind::CommandLineTool(_) => "CommandLineTool",
            ProcessKind::ExpressionTool { .. } => "ExpressionTool",
        }
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self.kind, ProcessKind::Workflow { .. })
    }

    pub fn steps(&self) -> &[Arc<WorkflowStep>] {
        match &self.kind {
            ProcessKind::Workflow { steps } => steps,
            _ => &[],
        }
    }

    pub fn input(&self, id: &str) -> Option<&InputParameter> {
        self.inputs.iter().find(|i| i.id == id)
    }

    pub fn output(&self, id: &str) -> Option<&OutputParameter> {
        self.outputs.iter().find(|o| o.id == id)
    }
}
