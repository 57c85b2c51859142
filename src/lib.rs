//! # flowy-cwl
//!
//! Execution engine for packed Common Workflow Language (v1.0) documents.
//!
//! A packed document is resolved into a tree of tasks rooted at `#main`.
//! Workflow steps run as soon as their sources are available, scattered steps
//! fan out into subtasks, and every CommandLineTool is handed to a
//! [`runtime::Dispatcher`] that executes it. Expressions run on an embedded
//! JavaScript interpreter.

pub mod error;
pub mod expr;
pub mod runtime;
pub mod tree;
pub mod value;

pub use error::{Component, CwlError, CwlResult, ErrorKind};
pub use expr::{ExprContext, ExprError};
pub use runtime::{run_packed, Config, Engine, Run, RunResult};
pub use tree::{PackedDocument, Process};
pub use value::{DirectoryValue, FileValue, Value};
