//! Dispatcher abstraction for tool execution
//!
//! The engine never runs a CommandLineTool itself. It prepares a
//! [`PreparedTool`] (image, argv, working directory, environment, resources)
//! and hands it to a [`Dispatcher`], then polls the executor's status until it
//! is terminal. Executors implement these traits: [`local::LocalDispatcher`]
//! runs tools as host processes and [`docker::DockerDispatcher`] in Docker
//! containers.

use crate::error::{Component, CwlError, CwlResult};
use crate::runtime::config::Config;
use crate::runtime::task::TaskLog;
use std::path::PathBuf;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod docker;
pub mod local;

pub use docker::DockerDispatcher;
pub use local::LocalDispatcher;

/// An environment variable passed to a tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// Resource request of a tool
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resources {
    pub cpu_min: Option<f64>,
    pub cpu_max: Option<f64>,
    pub mem_min_bytes: Option<u64>,
    pub mem_max_bytes: Option<u64>,
}

/// A host path the executor must make visible to the tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub host_path: PathBuf,
    pub container_path: PathBuf,
    pub read_only: bool,
}

/// Everything an executor needs to run one CommandLineTool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedTool {
    /// Id of the task the tool runs for
    pub task_id: String,
    pub image: String,
    /// Shell words, including the `1>>`/`2>>` redirections
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<EnvVar>,
    pub resources: Resources,
    pub volumes: Vec<Volume>,
    pub stdin: Option<String>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

impl PreparedTool {
    /// Command line for `sh -c`, with stdin redirected when the tool reads
    /// from a file.
    pub fn shell_command(&self) -> String {
        let mut command = self.argv.join(" ");
        if let Some(stdin) = &self.stdin {
            command.push_str(" < ");
            command.push_str(&crate::runtime::command::shell_quote(stdin));
        }
        command
    }
}

/// Executor-issued identifier of a dispatched tool
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchHandle(pub String);

/// Status reported by an executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchStatus {
    Running,
    Completed,
    Failed(String),
    Unknown,
}

impl DispatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DispatchStatus::Completed | DispatchStatus::Failed(_))
    }
}

/// Reports the status of dispatched tools. Once a terminal status has been
/// reported the executor may release the handle.
#[async_trait::async_trait]
pub trait StatusPoller: Send + Sync {
    async fn status(&self, handle: &DispatchHandle) -> CwlResult<DispatchStatus>;
}

/// Enqueues prepared tools for external execution
#[async_trait::async_trait]
pub trait Dispatcher: StatusPoller {
    async fn dispatch(&self, tool: &PreparedTool) -> CwlResult<DispatchHandle>;

    /// Stop a dispatched tool. Executors that cannot cancel ignore it.
    async fn cancel(&self, _handle: &DispatchHandle) -> CwlResult<()> {
        Ok(())
    }
}

/// Poll `handle` until it is terminal.
///
/// Polls start at `config.poll_interval` and double up to
/// `config.max_poll_interval`. A status of `Unknown` for longer than
/// `config.unknown_status_timeout`, or a run longer than
/// `config.task_timeout`, fails with a dispatch error. Cancellation stops
/// the tool and returns a cancelled error.
pub async fn await_completion(
    dispatcher: &dyn Dispatcher,
    handle: &DispatchHandle,
    config: &Config,
    cancel: &CancellationToken,
    log: &TaskLog,
) -> CwlResult<()> {
    let started = Instant::now();
    let mut delay = config.poll_interval;
    let mut unknown_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = dispatcher.cancel(handle).await {
                    log.warn(format!("failed to cancel {}: {}", handle.0, e));
                }
                return Err(CwlError::cancelled(Component::ToolRunner, "run cancelled"));
            }
            _ = tokio::time::sleep(delay) => {}
        }

        match dispatcher.status(handle).await? {
            DispatchStatus::Completed => return Ok(()),
            DispatchStatus::Failed(reason) => {
                return Err(CwlError::dispatch(format!("tool {} failed: {}", handle.0, reason)))
            }
            DispatchStatus::Running => unknown_since = None,
            DispatchStatus::Unknown => {
                let since = *unknown_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= config.unknown_status_timeout {
                    return Err(CwlError::dispatch(format!(
                        "status of {} unknown for {:?}",
                        handle.0, config.unknown_status_timeout
                    )));
                }
            }
        }

        if started.elapsed() >= config.task_timeout {
            if let Err(e) = dispatcher.cancel(handle).await {
                log.warn(format!("failed to cancel {}: {}", handle.0, e));
            }
            return Err(CwlError::dispatch(format!(
                "tool {} exceeded the task timeout of {:?}",
                handle.0, config.task_timeout
            )));
        }

        delay = std::cmp::min(delay * 2, config.max_poll_interval);
    }
}
