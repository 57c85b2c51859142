//! Error types for CWL graph resolution, binding, evaluation and execution.
//!
//! Every failure carries the id of the task it happened in (once known), the
//! engine component that raised it, and a human readable message. Errors are
//! `Clone` so a failed task can publish the same error to every consumer that
//! waits on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Engine component that raised an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Document,
    GraphResolver,
    StepScheduler,
    ScatterEngine,
    InputBinder,
    CommandAssembler,
    OutputCollector,
    ToolRunner,
    ExpressionEvaluator,
    Dispatcher,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Component::Document => "document",
            Component::GraphResolver => "graph resolver",
            Component::StepScheduler => "step scheduler",
            Component::ScatterEngine => "scatter engine",
            Component::InputBinder => "input binder",
            Component::CommandAssembler => "command assembler",
            Component::OutputCollector => "output collector",
            Component::ToolRunner => "tool runner",
            Component::ExpressionEvaluator => "expression evaluator",
            Component::Dispatcher => "dispatcher",
        };
        f.write_str(name)
    }
}

/// User-visible failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ParseError,
    ResolveError,
    BindingError,
    EvalError,
    NotImplemented,
    DispatchError,
    OutputError,
    CancelledError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Main error type for the engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CwlError {
    /// Packed graph or parameters are malformed
    #[error("Parse error: {message}")]
    Parse {
        task_id: Option<String>,
        component: Component,
        message: String,
    },

    /// Missing `#main`, missing `run` target, cyclic step dependencies
    #[error("Resolve error: {message}")]
    Resolve {
        task_id: Option<String>,
        component: Component,
        message: String,
    },

    /// Input cannot be resolved or has the wrong type
    #[error("Binding error: {message}")]
    Binding {
        task_id: Option<String>,
        component: Component,
        message: String,
    },

    /// Required input with neither a value nor a default
    #[error("Missing required input '{input}'")]
    MissingInput {
        task_id: Option<String>,
        component: Component,
        input: String,
    },

    /// Expression interpreter fault, empty expression, wrong result type
    #[error("Evaluation error: {message}")]
    Eval {
        task_id: Option<String>,
        component: Component,
        message: String,
    },

    /// CWL feature outside the supported subset
    #[error("Not implemented: {message}")]
    NotImplemented {
        task_id: Option<String>,
        component: Component,
        message: String,
    },

    /// Executor rejected or lost the task
    #[error("Dispatch error: {message}")]
    Dispatch {
        task_id: Option<String>,
        component: Component,
        message: String,
    },

    /// Output collection failed
    #[error("Output error: {message}")]
    Output {
        task_id: Option<String>,
        component: Component,
        message: String,
    },

    /// Cooperative cancellation
    #[error("Cancelled: {message}")]
    Cancelled {
        task_id: Option<String>,
        component: Component,
        message: String,
    },

    /// File system operation failed
    #[error("File system error at {path}: {message}")]
    FileSystem {
        task_id: Option<String>,
        component: Component,
        path: String,
        message: String,
    },
}

impl CwlError {
    pub fn parse(component: Component, message: impl Into<String>) -> Self {
        CwlError::Parse {
            task_id: None,
            component,
            message: message.into(),
        }
    }

    pub fn resolve(component: Component, message: impl Into<String>) -> Self {
        CwlError::Resolve {
            task_id: None,
            component,
            message: message.into(),
        }
    }

    pub fn binding(component: Component, message: impl Into<String>) -> Self {
        CwlError::Binding {
            task_id: None,
            component,
            message: message.into(),
        }
    }

    pub fn missing_input(input: impl Into<String>) -> Self {
        CwlError::MissingInput {
            task_id: None,
            component: Component::InputBinder,
            input: input.into(),
        }
    }

    pub fn eval(component: Component, message: impl Into<String>) -> Self {
        CwlError::Eval {
            task_id: None,
            component,
            message: message.into(),
        }
    }

    pub fn not_implemented(component: Component, message: impl Into<String>) -> Self {
        CwlError::NotImplemented {
            task_id: None,
            component,
            message: message.into(),
        }
    }

    pub fn dispatch(message: impl Into<String>) -> Self {
        CwlError::Dispatch {
            task_id: None,
            component: Component::Dispatcher,
            message: message.into(),
        }
    }

    pub fn output(message: impl Into<String>) -> Self {
        CwlError::Output {
            task_id: None,
            component: Component::OutputCollector,
            message: message.into(),
        }
    }

    pub fn cancelled(component: Component, message: impl Into<String>) -> Self {
        CwlError::Cancelled {
            task_id: None,
            component,
            message: message.into(),
        }
    }

    pub fn filesystem(component: Component, path: impl Into<String>, error: &io::Error) -> Self {
        CwlError::FileSystem {
            task_id: None,
            component,
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CwlError::Parse { .. } => ErrorKind::ParseError,
            CwlError::Resolve { .. } => ErrorKind::ResolveError,
            CwlError::Binding { .. } | CwlError::MissingInput { .. } => ErrorKind::BindingError,
            CwlError::Eval { .. } => ErrorKind::EvalError,
            CwlError::NotImplemented { .. } => ErrorKind::NotImplemented,
            CwlError::Dispatch { .. } => ErrorKind::DispatchError,
            CwlError::Output { .. } => ErrorKind::OutputError,
            CwlError::Cancelled { .. } => ErrorKind::CancelledError,
            CwlError::FileSystem { component, .. } => match component {
                Component::OutputCollector => ErrorKind::OutputError,
                Component::InputBinder => ErrorKind::BindingError,
                Component::Document => ErrorKind::ParseError,
                _ => ErrorKind::DispatchError,
            },
        }
    }

    pub fn component(&self) -> Component {
        match self {
            CwlError::Parse { component, .. }
            | CwlError::Resolve { component, .. }
            | CwlError::Binding { component, .. }
            | CwlError::MissingInput { component, .. }
            | CwlError::Eval { component, .. }
            | CwlError::NotImplemented { component, .. }
            | CwlError::Dispatch { component, .. }
            | CwlError::Output { component, .. }
            | CwlError::Cancelled { component, .. }
            | CwlError::FileSystem { component, .. } => *component,
        }
    }

    pub fn task_id(&self) -> Option<&str> {
        self.task_id_slot_ref().as_deref()
    }

    /// Attach the id of the task the error happened in, keeping an id that
    /// was already recorded closer to the failure.
    pub fn with_task_id(mut self, task_id: &str) -> Self {
        let slot = self.task_id_slot();
        if slot.is_none() {
            *slot = Some(task_id.to_string());
        }
        self
    }

    /// Message without the kind prefix.
    pub fn message(&self) -> String {
        match self {
            CwlError::Parse { message, .. }
            | CwlError::Resolve { message, .. }
            | CwlError::Binding { message, .. }
            | CwlError::Eval { message, .. }
            | CwlError::NotImplemented { message, .. }
            | CwlError::Dispatch { message, .. }
            | CwlError::Output { message, .. }
            | CwlError::Cancelled { message, .. } => message.clone(),
            CwlError::MissingInput { input, .. } => {
                format!("required input '{}' has neither a value nor a default", input)
            }
            CwlError::FileSystem { path, message, .. } => format!("{}: {}", path, message),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CwlError::Cancelled { .. })
    }

    fn task_id_slot(&mut self) -> &mut Option<String> {
        match self {
            CwlError::Parse { task_id, .. }
            | CwlError::Resolve { task_id, .. }
            | CwlError::Binding { task_id, .. }
            | CwlError::MissingInput { task_id, .. }
            | CwlError::Eval { task_id, .. }
            | CwlError::NotImplemented { task_id, .. }
            | CwlError::Dispatch { task_id, .. }
            | CwlError::Output { task_id, .. }
            | CwlError::Cancelled { task_id, .. }
            | CwlError::FileSystem { task_id, .. } => task_id,
        }
    }

    fn task_id_slot_ref(&self) -> &Option<String> {
        match self {
            CwlError::Parse { task_id, .. }
            | CwlError::Resolve { task_id, .. }
            | CwlError::Binding { task_id, .. }
            | CwlError::MissingInput { task_id, .. }
            | CwlError::Eval { task_id, .. }
            | CwlError::NotImplemented { task_id, .. }
            | CwlError::Dispatch { task_id, .. }
            | CwlError::Output { task_id, .. }
            | CwlError::Cancelled { task_id, .. }
            | CwlError::FileSystem { task_id, .. } => task_id,
        }
    }
}

/// Result type for engine operations
pub type CwlResult<T> = Result<T, CwlError>;

/// Extension trait for converting IO errors to engine errors
pub trait IntoCwlError<T> {
    fn fs_context(self, component: Component, path: &std::path::Path) -> CwlResult<T>;
}

impl<T> IntoCwlError<T> for Result<T, io::Error> {
    fn fs_context(self, component: Component, path: &std::path::Path) -> CwlResult<T> {
        self.map_err(|e| CwlError::filesystem(component, path.display().to_string(), &e))
    }
}
