//! Runtime task instances
//!
//! A [`Task`] is one process bound to concrete parameter values: the root
//! workflow, a step of a workflow, or one subtask of a scattered step. Tasks
//! form a tree owned top-down (a workflow task owns its children, a scatter
//! task its subtasks); nothing points back to a parent.
//!
//! Completion is published through a `tokio::sync::watch` channel. The
//! terminal status is set exactly once, after the outputs are written, so a
//! consumer that observed [`TaskStatus::Succeeded`] can read the outputs.

use crate::error::{Component, CwlError};
use crate::tree::{Process, Requirement, WorkflowStep};
use crate::value::Value;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Lifecycle state of a task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed(CwlError),
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One entry of a task's event log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Append-only event log of a task, mirrored to `tracing`.
#[derive(Debug)]
pub struct TaskLog {
    task_id: String,
    events: Mutex<Vec<LogEvent>>,
}

impl TaskLog {
    pub fn new(task_id: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(task_id = %self.task_id, "{}", message);
        self.push(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(task_id = %self.task_id, "{}", message);
        self.push(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(task_id = %self.task_id, "{}", message);
        self.push(LogLevel::Error, message);
    }

    pub fn events(&self) -> Vec<LogEvent> {
        lock(&self.events).clone()
    }

    fn push(&self, level: LogLevel, message: String) {
        lock(&self.events).push(LogEvent {
            timestamp: Utc::now(),
            level,
            message,
        });
    }
}

#[derive(Debug, Default)]
struct TaskState {
    parameters: IndexMap<String, Value>,
    outputs: IndexMap<String, Value>,
    subtasks: Vec<Arc<Task>>,
}

/// A runtime instance of a process.
#[derive(Debug)]
pub struct Task {
    /// Task id: `#main` for the root, `<parent path>/<step>` for steps
    pub id: String,
    pub process: Arc<Process>,
    /// Step this task instantiates, if any
    pub step: Option<Arc<WorkflowStep>>,
    /// 1-based index of a scattered subtask
    pub scatter_index: Option<usize>,
    /// Effective requirements: the process's own, then inherited ones
    pub requirements: Vec<Requirement>,
    pub hints: Vec<Requirement>,
    /// Step id to child task; built once by the graph resolver
    pub children: IndexMap<String, Arc<Task>>,
    pub log: TaskLog,
    state: Mutex<TaskState>,
    status: watch::Sender<TaskStatus>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        process: Arc<Process>,
        step: Option<Arc<WorkflowStep>>,
        scatter_index: Option<usize>,
        requirements: Vec<Requirement>,
        hints: Vec<Requirement>,
        children: IndexMap<String, Arc<Task>>,
    ) -> Self {
        let id = id.into();
        let (status, _) = watch::channel(TaskStatus::Pending);
        let log_id = match scatter_index {
            Some(index) => format!("{}[{}]", id, index),
            None => id.clone(),
        };
        Self {
            log: TaskLog::new(&log_id),
            id,
            process,
            step,
            scatter_index,
            requirements,
            hints,
            children,
            state: Mutex::new(TaskState::default()),
            status,
        }
    }

    /// Unique path of this task, used for its working directory and as the
    /// prefix of its children's ids.
    pub fn path(&self) -> String {
        match self.scatter_index {
            Some(index) => format!("{}-scatter-{}", self.id, index),
            None => self.id.clone(),
        }
    }

    /// True when this task fans out over its step's scatter inputs.
    pub fn is_scatter(&self) -> bool {
        self.scatter_index.is_none()
            && self
                .step
                .as_ref()
                .map(|s| !s.scatter.is_empty())
                .unwrap_or(false)
    }

    /// First requirement, then hint, of the given class.
    pub fn requirement(&self, class: &str) -> Option<&Requirement> {
        self.requirements
            .iter()
            .chain(self.hints.iter())
            .find(|r| r.class() == class)
    }

    pub fn parameters(&self) -> IndexMap<String, Value> {
        lock(&self.state).parameters.clone()
    }

    pub fn set_parameters(&self, parameters: IndexMap<String, Value>) {
        lock(&self.state).parameters = parameters;
    }

    pub fn outputs(&self) -> IndexMap<String, Value> {
        lock(&self.state).outputs.clone()
    }

    pub fn output(&self, name: &str) -> Option<Value> {
        lock(&self.state).outputs.get(name).cloned()
    }

    pub fn subtasks(&self) -> Vec<Arc<Task>> {
        lock(&self.state).subtasks.clone()
    }

    pub fn set_subtasks(&self, subtasks: Vec<Arc<Task>>) {
        lock(&self.state).subtasks = subtasks;
    }

    pub fn status(&self) -> TaskStatus {
        self.status.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    pub fn mark_running(&self) {
        self.status.send_if_modified(|status| {
            if *status == TaskStatus::Pending {
                *status = TaskStatus::Running;
                true
            } else {
                false
            }
        });
    }

    /// Publish the terminal state. Outputs are stored before the status
    /// changes. Returns false when the task had already finished.
    pub fn finish(&self, result: Result<IndexMap<String, Value>, CwlError>) -> bool {
        let mut failure = None;
        let changed = self.status.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = match result {
                Ok(outputs) => {
                    lock(&self.state).outputs = outputs;
                    TaskStatus::Succeeded
                }
                Err(error) => {
                    let error = error.with_task_id(&self.id);
                    failure = Some(error.to_string());
                    TaskStatus::Failed(error)
                }
            };
            true
        });
        if let Some(message) = failure {
            self.log.error(message);
        }
        changed
    }

    /// Finish this task and every unfinished descendant as cancelled.
    pub fn abandon(&self, reason: &str) {
        for child in self.children.values() {
            child.abandon(reason);
        }
        for subtask in self.subtasks() {
            subtask.abandon(reason);
        }
        self.finish(Err(CwlError::cancelled(Component::StepScheduler, reason)));
    }

    /// Wait until the task reaches a terminal status and return it.
    pub async fn wait(&self) -> TaskStatus {
        let mut receiver = self.status.subscribe();
        let result = receiver.wait_for(TaskStatus::is_terminal).await;
        match result {
            Ok(status) => status.clone(),
            // The sender lives as long as `self`
            Err(_) => self.status(),
        }
    }

    /// Every task of this subtree, depth first, including `self`.
    pub fn descendants(self: &Arc<Self>) -> Vec<Arc<Task>> {
        let mut all = vec![Arc::clone(self)];
        for child in self.children.values() {
            all.extend(child.descendants());
        }
        for subtask in self.subtasks() {
            all.extend(subtask.descendants());
        }
        all
    }

    /// JSON view of this subtree: status, parameters, outputs and events.
    pub fn log_tree(&self) -> JsonValue {
        let status = self.status();
        let error = match &status {
            TaskStatus::Failed(e) => json!({
                "kind": e.kind().to_string(),
                "component": e.component().to_string(),
                "message": e.message(),
            }),
            _ => JsonValue::Null,
        };
        let to_object = |map: IndexMap<String, Value>| {
            JsonValue::Object(map.into_iter().map(|(k, v)| (k, v.to_json())).collect())
        };
        json!({
            "id": self.id,
            "class": self.process.class_name(),
            "process": self.process.id,
            "scatterIndex": self.scatter_index,
            "status": status.label(),
            "error": error,
            "parameters": to_object(self.parameters()),
            "outputs": to_object(self.outputs()),
            "events": serde_json::to_value(self.log.events()).unwrap_or(JsonValue::Null),
            "children": self.children.values().map(|c| c.log_tree()).collect::<Vec<_>>(),
            "subtasks": self.subtasks().iter().map(|s| s.log_tree()).collect::<Vec<_>>(),
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Requirements of a process as run from a step: its own first, then those
/// inherited from the step and enclosing workflows that it doesn't override.
pub fn merge_requirements(own: &[Requirement], inherited: &[Requirement]) -> Vec<Requirement> {
    let mut merged = own.to_vec();
    for requirement in inherited {
        if !merged.iter().any(|r| r.class() == requirement.class()) {
            merged.push(requirement.clone());
        }
    }
    merged
}
