//! Docker executor
//!
//! Runs each prepared tool in its own container through the bollard Docker
//! API client. The task working directory is bind-mounted read-write at the
//! same path inside the container, so paths in the command line and in the
//! collected outputs agree. The scratch directory is mounted read-write and
//! input directories read-only. A container is removed once its terminal
//! status has been read.

use super::{DispatchHandle, DispatchStatus, Dispatcher, PreparedTool, StatusPoller};
use crate::error::{CwlError, CwlResult};
use bollard::container::{
    Config as DockerConfig, CreateContainerOptions, InspectContainerOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{
    ContainerState, ContainerStateStatusEnum, HostConfig, Mount, MountTypeEnum, RestartPolicy,
    RestartPolicyNameEnum,
};
use bollard::Docker;
use futures_util::stream::StreamExt;

/// Dispatcher running tools in Docker containers
pub struct DockerDispatcher {
    client: Docker,
    pull_images: bool,
}

impl DockerDispatcher {
    /// Connect to the local Docker daemon
    pub fn connect() -> CwlResult<Self> {
        let client = Docker::connect_with_local_defaults().map_err(|e| {
            CwlError::dispatch(format!("failed to connect to Docker daemon: {}", e))
        })?;
        Ok(Self {
            client,
            pull_images: true,
        })
    }

    /// Skip pulling images that are expected to be present locally
    pub fn without_pull(mut self) -> Self {
        self.pull_images = false;
        self
    }

    async fn pull(&self, image: &str) -> CwlResult<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(progress) = stream.next().await {
            progress.map_err(|e| CwlError::dispatch(format!("failed to pull {}: {}", image, e)))?;
        }
        Ok(())
    }

    /// Force-remove a container and its anonymous volumes
    async fn cleanup_container(&self, container_id: &str) -> CwlResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        self.client
            .remove_container(container_id, Some(options))
            .await
            .map_err(|e| {
                CwlError::dispatch(format!("failed to remove container {}: {}", container_id, e))
            })
    }

    /// Container configuration of a prepared tool
    fn create_docker_config(tool: &PreparedTool) -> DockerConfig<String> {
        let env: Vec<String> = tool
            .env
            .iter()
            .map(|e| format!("{}={}", e.name, e.value))
            .collect();

        let working_dir = tool.working_dir.to_string_lossy().to_string();
        let mut mounts = vec![Mount {
            typ: Some(MountTypeEnum::BIND),
            source: Some(working_dir.clone()),
            target: Some(working_dir.clone()),
            read_only: Some(false),
            ..Default::default()
        }];
        mounts.extend(tool.volumes.iter().map(|volume| Mount {
            typ: Some(MountTypeEnum::BIND),
            source: Some(volume.host_path.to_string_lossy().to_string()),
            target: Some(volume.container_path.to_string_lossy().to_string()),
            read_only: Some(volume.read_only),
            ..Default::default()
        }));

        let mut host_config = HostConfig {
            mounts: Some(mounts),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: Some(0),
            }),
            ..Default::default()
        };

        let cpus = tool.resources.cpu_max.or(tool.resources.cpu_min);
        if let Some(cpus) = cpus {
            host_config.nano_cpus = Some((cpus * 1_000_000_000.0) as i64);
        }
        if let Some(memory) = tool.resources.mem_max_bytes.or(tool.resources.mem_min_bytes) {
            host_config.memory = Some(memory as i64);
        }
        if let Some(reservation) = tool.resources.mem_min_bytes {
            host_config.memory_reservation = Some(reservation as i64);
        }

        DockerConfig {
            image: Some(tool.image.clone()),
            cmd: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                tool.shell_command(),
            ]),
            working_dir: Some(working_dir),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl StatusPoller for DockerDispatcher {
    async fn status(&self, handle: &DispatchHandle) -> CwlResult<DispatchStatus> {
        let response = match self
            .client
            .inspect_container(&handle.0, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(container = %handle.0, "inspect failed: {}", e);
                return Ok(DispatchStatus::Unknown);
            }
        };

        let status = match response.state {
            Some(state) => status_of(&state),
            None => DispatchStatus::Unknown,
        };
        if status.is_terminal() {
            if let Err(e) = self.cleanup_container(&handle.0).await {
                tracing::warn!(container = %handle.0, "{}", e);
            }
        }
        Ok(status)
    }
}

/// Dispatch status of a container state
fn status_of(state: &ContainerState) -> DispatchStatus {
    match state.status {
        Some(ContainerStateStatusEnum::CREATED)
        | Some(ContainerStateStatusEnum::RUNNING)
        | Some(ContainerStateStatusEnum::RESTARTING) => DispatchStatus::Running,
        Some(ContainerStateStatusEnum::EXITED) => match state.exit_code {
            Some(0) => DispatchStatus::Completed,
            Some(code) => DispatchStatus::Failed(format!("exit code {}", code)),
            None => DispatchStatus::Unknown,
        },
        Some(ContainerStateStatusEnum::DEAD) => DispatchStatus::Failed(
            state
                .error
                .clone()
                .unwrap_or_else(|| "container died".to_string()),
        ),
        _ => DispatchStatus::Unknown,
    }
}

/// Container name for a task: Docker only accepts `[a-zA-Z0-9_.-]`, the
/// uuid keeps names unique.
fn container_name(task_id: &str) -> String {
    let task: String = task_id
        .trim_start_matches('#')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    format!("flowy-cwl-{}-{}", task, uuid::Uuid::new_v4())
}

#[async_trait::async_trait]
impl Dispatcher for DockerDispatcher {
    async fn dispatch(&self, tool: &PreparedTool) -> CwlResult<DispatchHandle> {
        if self.pull_images {
            self.pull(&tool.image).await?;
        }

        let config = Self::create_docker_config(tool);
        let name = container_name(&tool.task_id);
        let options = CreateContainerOptions {
            name: name.clone(),
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| CwlError::dispatch(format!("failed to create container {}: {}", name, e)))?;

        self.client
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| CwlError::dispatch(format!("failed to start container {}: {}", name, e)))?;

        tracing::info!(task_id = %tool.task_id, container = %response.id, image = %tool.image, "container started");
        Ok(DispatchHandle(response.id))
    }

    async fn cancel(&self, handle: &DispatchHandle) -> CwlResult<()> {
        self.cleanup_container(&handle.0).await
    }
}
