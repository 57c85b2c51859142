//! Host process executor
//!
//! Runs each prepared tool as `sh -c <command>` in its working directory on
//! the local machine. The image, volumes and resource request are ignored:
//! host paths are already visible and the host is not partitioned.

use super::{DispatchHandle, DispatchStatus, Dispatcher, PreparedTool, StatusPoller};
use crate::error::{CwlError, CwlResult};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Mutex, MutexGuard};
use tokio::process::{Child, Command};

/// Dispatcher running tools as child processes of the engine
#[derive(Debug, Default)]
pub struct LocalDispatcher {
    children: Mutex<HashMap<String, Child>>,
}

impl LocalDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of dispatched processes not yet reported terminal
    pub fn active(&self) -> usize {
        self.children().len()
    }

    fn children(&self) -> MutexGuard<'_, HashMap<String, Child>> {
        self.children
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait::async_trait]
impl StatusPoller for LocalDispatcher {
    async fn status(&self, handle: &DispatchHandle) -> CwlResult<DispatchStatus> {
        let mut children = self.children();
        let Some(child) = children.get_mut(&handle.0) else {
            return Ok(DispatchStatus::Unknown);
        };
        let status = match child.try_wait() {
            Ok(Some(status)) if status.success() => DispatchStatus::Completed,
            Ok(Some(status)) => DispatchStatus::Failed(match status.code() {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            }),
            Ok(None) => DispatchStatus::Running,
            Err(e) => {
                return Err(CwlError::dispatch(format!(
                    "failed to query process {}: {}",
                    handle.0, e
                )))
            }
        };
        // A reaped child is reported once; later polls see `Unknown`.
        if status.is_terminal() {
            children.remove(&handle.0);
        }
        Ok(status)
    }
}

#[async_trait::async_trait]
impl Dispatcher for LocalDispatcher {
    async fn dispatch(&self, tool: &PreparedTool) -> CwlResult<DispatchHandle> {
        let command = tool.shell_command();
        tracing::debug!(task_id = %tool.task_id, %command, "spawning local process");

        let child = Command::new("sh")
            .arg("-c")
            .arg(&command)
            .current_dir(&tool.working_dir)
            .envs(tool.env.iter().map(|e| (e.name.as_str(), e.value.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                CwlError::dispatch(format!("failed to spawn '{}': {}", command, e))
            })?;

        let handle = DispatchHandle(format!("local-{}", uuid::Uuid::new_v4()));
        self.children().insert(handle.0.clone(), child);
        Ok(handle)
    }

    async fn cancel(&self, handle: &DispatchHandle) -> CwlResult<()> {
        if let Some(child) = self.children().get_mut(&handle.0) {
            child.start_kill().map_err(|e| {
                CwlError::dispatch(format!("failed to kill process {}: {}", handle.0, e))
            })?;
        }
        Ok(())
    }
}
