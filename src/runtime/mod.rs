//! CWL Runtime Module
//!
//! This module runs packed CWL documents. [`Engine::run`] parses the packed
//! graph, resolves it into a task tree rooted at `#main`, schedules every task
//! and returns the outputs of `#main` (or the first failure) together with
//! the tree, whose log stays inspectable after the run.
//!
//! Tools never run in process: a [`Dispatcher`] executes each prepared
//! CommandLineTool and the engine polls it until the tool is done.

pub mod command;
pub mod config;
pub mod dispatch;
pub mod fs_utils;
pub mod graph;
pub mod inputs;
pub mod outputs;
pub mod scatter;
pub mod task;
pub mod task_context;
pub mod workflow;

#[cfg(test)]
mod task_tests;

pub use config::{Config, ConfigBuilder};
pub use fs_utils::RunDirectory;
pub use dispatch::{
    DispatchHandle, DispatchStatus, Dispatcher, DockerDispatcher, LocalDispatcher, PreparedTool,
    StatusPoller,
};
pub use task::{LogEvent, LogLevel, Task, TaskLog, TaskStatus};

use crate::error::{Component, CwlError, CwlResult, ErrorKind};
use crate::runtime::fs_utils::new_run_id;
use crate::tree::{local_id, PackedDocument};
use crate::value::Value;
use indexmap::IndexMap;
use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-run state shared by every task of one run
pub struct RunContext {
    pub document: Arc<PackedDocument>,
    pub config: Config,
    pub dispatcher: Arc<dyn Dispatcher>,
    /// Directory tree of this run; task directories live under it
    pub directory: RunDirectory,
    /// Cancelled when the caller gives up on the run
    pub cancel: CancellationToken,
}

/// Outcome of a run
#[derive(Debug, Clone, PartialEq)]
pub enum RunResult {
    /// Outputs of `#main`, keyed `#main/<name>`
    Succeeded(JsonValue),
    Failed {
        kind: ErrorKind,
        message: String,
        task_id: Option<String>,
    },
}

impl RunResult {
    pub fn from_error(error: &CwlError) -> Self {
        RunResult::Failed {
            kind: error.kind(),
            message: error.message(),
            task_id: error.task_id().map(str::to_string),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Succeeded(_))
    }

    pub fn outputs(&self) -> Option<&JsonValue> {
        match self {
            RunResult::Succeeded(outputs) => Some(outputs),
            RunResult::Failed { .. } => None,
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            RunResult::Succeeded(outputs) => json!({"status": "success", "outputs": outputs}),
            RunResult::Failed {
                kind,
                message,
                task_id,
            } => json!({
                "status": "failed",
                "kind": kind.to_string(),
                "message": message,
                "taskId": task_id,
            }),
        }
    }
}

/// A finished run: its result and the task tree it executed.
#[derive(Debug)]
pub struct Run {
    /// `None` when the document failed before a tree was built
    pub root: Option<Arc<Task>>,
    /// `<work_root>/<run_id>`, once created
    pub directory: Option<RunDirectory>,
    pub result: RunResult,
}

impl Run {
    /// Status, parameters, outputs and log events of every task, as JSON.
    pub fn log_tree(&self) -> JsonValue {
        match &self.root {
            Some(root) => root.log_tree(),
            None => JsonValue::Null,
        }
    }
}

/// Runs packed documents against one configuration and dispatcher
pub struct Engine {
    config: Config,
    dispatcher: Arc<dyn Dispatcher>,
}

impl Engine {
    pub fn new(config: Config, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { config, dispatcher }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run `#main` of `packed` with `params`.
    pub async fn run(&self, packed: &JsonValue, params: &JsonValue) -> Run {
        self.run_with_cancellation(packed, params, CancellationToken::new())
            .await
    }

    /// Like [`Engine::run`]; cancelling `cancel` stops dispatched tools and
    /// finishes every unfinished task as cancelled.
    pub async fn run_with_cancellation(
        &self,
        packed: &JsonValue,
        params: &JsonValue,
        cancel: CancellationToken,
    ) -> Run {
        let (document, root, directory) = match self.prepare(packed, params) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::error!("run failed before scheduling: {}", e);
                return Run {
                    root: None,
                    directory: None,
                    result: RunResult::from_error(&e),
                };
            }
        };

        let ctx = Arc::new(RunContext {
            document,
            config: self.config.clone(),
            dispatcher: Arc::clone(&self.dispatcher),
            directory: directory.clone(),
            cancel,
        });
        tracing::info!(run_dir = %directory.root.display(), "starting run of #main");
        workflow::run_task(ctx, Arc::clone(&root)).await;

        let result = match root.status() {
            TaskStatus::Succeeded => RunResult::Succeeded(main_outputs(&root.outputs())),
            TaskStatus::Failed(e) => RunResult::from_error(&e),
            other => RunResult::from_error(&CwlError::cancelled(
                Component::StepScheduler,
                format!("#main ended {}", other.label()),
            )),
        };
        match &result {
            RunResult::Succeeded(_) => tracing::info!("run succeeded"),
            RunResult::Failed { kind, message, .. } => {
                tracing::error!("run failed: {}: {}", kind, message)
            }
        }
        Run {
            root: Some(root),
            directory: Some(directory),
            result,
        }
    }

    fn prepare(
        &self,
        packed: &JsonValue,
        params: &JsonValue,
    ) -> CwlResult<(Arc<PackedDocument>, Arc<Task>, RunDirectory)> {
        self.config.validate().map_err(|message| {
            CwlError::parse(
                Component::Document,
                format!("invalid configuration: {}", message),
            )
        })?;
        let document = PackedDocument::from_json(packed)?;
        let parameters = parse_parameters(params)?;
        let root = graph::resolve(&document)?;
        root.set_parameters(parameters);
        let directory = RunDirectory::create(&self.config.work_root, &new_run_id())?;
        Ok((Arc::new(document), root, directory))
    }
}

/// Run a packed document once with the given configuration and dispatcher.
pub async fn run_packed(
    packed: &JsonValue,
    params: &JsonValue,
    config: Config,
    dispatcher: Arc<dyn Dispatcher>,
) -> RunResult {
    Engine::new(config, dispatcher)
        .run(packed, params)
        .await
        .result
}

/// Parameters object of a run, keyed by input name. A `#main/` prefix on a
/// key is dropped.
pub fn parse_parameters(params: &JsonValue) -> CwlResult<IndexMap<String, Value>> {
    let object = match params {
        JsonValue::Object(object) => object,
        JsonValue::Null => return Ok(IndexMap::new()),
        other => {
            return Err(CwlError::parse(
                Component::Document,
                format!("parameters must be a JSON object, got {}", other),
            ))
        }
    };
    Ok(object
        .iter()
        .map(|(key, value)| (local_id(key).to_string(), Value::from_json(value)))
        .collect())
}

fn main_outputs(outputs: &IndexMap<String, Value>) -> JsonValue {
    let map: Map<String, JsonValue> = outputs
        .iter()
        .map(|(name, value)| (format!("#main/{}", name), value.to_json()))
        .collect();
    JsonValue::Object(map)
}
