//! Workflow execution engine
//!
//! This module schedules the steps of a workflow task. Every step runs on
//! its own tokio task as soon as it is spawned and waits on the completion
//! signal of each step it takes a source from. A failed producer finishes its
//! consumers as cancelled, so nothing downstream waits forever; the workflow
//! then fails with the first real failure among its steps.

use crate::error::{Component, CwlError, CwlResult};
use crate::runtime::graph::output_id_map;
use crate::runtime::inputs::{apply_step_value_from, fill_defaults};
use crate::runtime::task::{Task, TaskStatus};
use crate::runtime::{scatter, task_context, RunContext};
use crate::tree::{local_id, ProcessKind, Requirement, StepInput};
use crate::value::Value;
use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;

/// Run `task` to completion. The task is finished exactly once, and every
/// descendant left unfinished is abandoned.
pub fn run_task(ctx: Arc<RunContext>, task: Arc<Task>) -> BoxFuture<'static, ()> {
    let span = tracing::info_span!(
        "task",
        task_id = %task.id,
        scatter_index = ?task.scatter_index
    );
    async move {
        task.mark_running();
        task.log.info(format!("running {} {}", task.process.class_name(), task.process.id));

        let result = execute(&ctx, &task).await;
        if result.is_ok() {
            task.log.info("succeeded");
        }
        task.finish(result);

        for descendant in task.descendants() {
            if !descendant.is_done() {
                descendant.abandon("enclosing task finished first");
            }
        }
    }
    .instrument(span)
    .boxed()
}

async fn execute(ctx: &Arc<RunContext>, task: &Arc<Task>) -> CwlResult<IndexMap<String, Value>> {
    if ctx.cancel.is_cancelled() {
        return Err(CwlError::cancelled(Component::StepScheduler, "run cancelled"));
    }
    if task.is_scatter() {
        return scatter::run_scatter(ctx, task).await;
    }

    if let Some(step) = &task.step {
        let params = apply_step_value_from(step, task.parameters(), &expression_lib(task))?;
        task.set_parameters(params);
    }

    match &task.process.kind {
        ProcessKind::Workflow { .. } => run_workflow(ctx, task).await,
        _ => task_context::run_tool(ctx, task).await,
    }
}

/// `expressionLib` of the task's `InlineJavascriptRequirement`, if any.
pub fn expression_lib(task: &Task) -> Vec<String> {
    match task.requirement("InlineJavascriptRequirement") {
        Some(Requirement::InlineJavascript { expression_lib }) => expression_lib.clone(),
        _ => Vec::new(),
    }
}

/// Where a workflow's steps read their sources from
struct Sources {
    workflow: Arc<Task>,
    params: IndexMap<String, Value>,
    /// Step output id to producing step id
    producers: HashMap<String, String>,
}

impl Sources {
    /// Value of one source: a workflow input, or a step output once its step
    /// has succeeded.
    async fn resolve(&self, ctx: &RunContext, source: &str) -> CwlResult<Value> {
        let Some(step_id) = self.producers.get(source) else {
            return Ok(self.params.get(local_id(source)).cloned().unwrap_or(Value::Null));
        };
        let producer = self.workflow.children.get(step_id).ok_or_else(|| {
            CwlError::resolve(
                Component::StepScheduler,
                format!("no task for step '{}'", step_id),
            )
        })?;

        let status = tokio::select! {
            status = producer.wait() => status,
            _ = ctx.cancel.cancelled() => {
                return Err(CwlError::cancelled(Component::StepScheduler, "run cancelled"));
            }
        };
        match status {
            TaskStatus::Failed(e) => Err(CwlError::cancelled(
                Component::StepScheduler,
                format!("upstream step {} failed: {}", step_id, e.message()),
            )),
            _ => Ok(producer.output(local_id(source)).unwrap_or(Value::Null)),
        }
    }

    /// Value of a step input or workflow output with the given sources.
    async fn gather(&self, ctx: &RunContext, sources: &[String]) -> CwlResult<Value> {
        match sources {
            [] => Ok(Value::Null),
            [single] => self.resolve(ctx, single).await,
            many => {
                let mut values = Vec::with_capacity(many.len());
                for source in many {
                    values.push(self.resolve(ctx, source).await?);
                }
                Ok(Value::Array(values))
            }
        }
    }

    async fn step_input(&self, ctx: &RunContext, input: &StepInput) -> CwlResult<Value> {
        let value = self.gather(ctx, &input.source).await?;
        Ok(match (&value, &input.default) {
            (Value::Null, Some(default)) => default.clone(),
            _ => value,
        })
    }
}

/// Run the steps of a workflow task and merge its outputs.
async fn run_workflow(
    ctx: &Arc<RunContext>,
    task: &Arc<Task>,
) -> CwlResult<IndexMap<String, Value>> {
    let params = fill_defaults(&task.process, &task.parameters())?;
    task.set_parameters(params.clone());

    let sources = Arc::new(Sources {
        workflow: Arc::clone(task),
        params,
        producers: output_id_map(&task.process),
    });

    let handles: Vec<_> = task
        .children
        .values()
        .map(|child| {
            let ctx = Arc::clone(ctx);
            let sources = Arc::clone(&sources);
            let child = Arc::clone(child);
            tokio::spawn(async move { feed_and_run(ctx, sources, child).await })
        })
        .collect();
    for handle in handles {
        if let Err(e) = handle.await {
            task.log.error(format!("step aborted: {}", e));
        }
    }

    let mut cancelled = None;
    for child in task.children.values() {
        match child.status() {
            TaskStatus::Succeeded => {}
            TaskStatus::Failed(e) if e.is_cancelled() => {
                cancelled.get_or_insert(e);
            }
            TaskStatus::Failed(e) => return Err(e),
            _ => {
                child.abandon("step did not finish");
                cancelled.get_or_insert_with(|| {
                    CwlError::cancelled(Component::StepScheduler, "step did not finish")
                });
            }
        }
    }
    if let Some(e) = cancelled {
        return Err(e);
    }

    let mut outputs = IndexMap::new();
    for output in &task.process.outputs {
        let value = sources.gather(ctx, &output.output_source).await?;
        outputs.insert(output.id.clone(), value);
    }
    Ok(outputs)
}

/// Wait for a step's sources, then run it. A step whose sources cannot be
/// resolved is finished without running.
async fn feed_and_run(ctx: Arc<RunContext>, sources: Arc<Sources>, child: Arc<Task>) {
    let Some(step) = child.step.clone() else {
        child.finish(Err(CwlError::resolve(
            Component::StepScheduler,
            format!("task '{}' is not a step", child.id),
        )));
        return;
    };

    let mut params = IndexMap::new();
    for input in &step.inputs {
        match sources.step_input(&ctx, input).await {
            Ok(value) => {
                params.insert(input.id.clone(), value);
            }
            Err(e) => {
                child.log.warn(e.message());
                if e.is_cancelled() {
                    child.abandon(&e.message());
                } else {
                    child.finish(Err(e));
                    child.abandon("step inputs could not be resolved");
                }
                return;
            }
        }
    }

    child.set_parameters(params);
    run_task(ctx, child).await;
}
