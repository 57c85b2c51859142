//! Task execution context
//!
//! This module runs leaf tasks: CommandLineTools and ExpressionTools. A
//! [`TaskContext`] creates the working directory, binds inputs, stages the
//! `InitialWorkDirRequirement` listing and builds the expression context;
//! a CommandLineTool is then handed to the dispatcher and polled, an
//! ExpressionTool is evaluated in process. Outputs are collected last.

use crate::error::{Component, CwlError, CwlResult};
use crate::expr::{self, ExprContext};
use crate::runtime::command::{assemble, AssembledCommand};
use crate::runtime::dispatch::{await_completion, EnvVar, PreparedTool, Resources, Volume};
use crate::runtime::fs_utils::{copy_file, write_file_atomic, TaskDirectory};
use crate::runtime::inputs::{bind_inputs, fill_defaults, BoundInputs};
use crate::runtime::outputs::{collect_expression_outputs, collect_tool_outputs, ToolOutputContext};
use crate::runtime::task::Task;
use crate::runtime::workflow::expression_lib;
use crate::runtime::RunContext;
use crate::tree::{CommandLineTool, ProcessKind, Requirement, WorkDirEntry};
use crate::value::{FileValue, Value};
use indexmap::IndexMap;
use serde_json::{json, Value as JsonValue};
use std::collections::BTreeSet;
use std::path::{Component as PathComponent, Path, PathBuf};
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

/// Run a CommandLineTool or ExpressionTool task and return its outputs.
pub async fn run_tool(
    ctx: &Arc<RunContext>,
    task: &Arc<Task>,
) -> CwlResult<IndexMap<String, Value>> {
    let context = TaskContext::prepare(ctx, task)?;
    match &task.process.kind {
        ProcessKind::ExpressionTool { expression } => {
            let result = expr::evaluate_json(expression, &context.expressions)?;
            collect_expression_outputs(&task.process, &result)
        }
        ProcessKind::CommandLineTool(tool) => context.run_command(ctx, tool).await,
        ProcessKind::Workflow { .. } => Err(CwlError::resolve(
            Component::ToolRunner,
            format!("'{}' is a workflow, not a tool", task.process.id),
        )),
    }
}

/// Everything a leaf task needs once its inputs are bound
pub struct TaskContext {
    pub task: Arc<Task>,
    pub dir: TaskDirectory,
    pub bound: BoundInputs,
    /// `inputs`, `runtime` and the expression library
    pub expressions: ExprContext,
    pub resources: Resources,
}

impl TaskContext {
    /// Create the working directory, bind inputs and stage the initial
    /// working directory listing.
    pub fn prepare(ctx: &RunContext, task: &Arc<Task>) -> CwlResult<Self> {
        let dir = TaskDirectory::create(&ctx.directory, &task.path())?;
        let params = fill_defaults(&task.process, &task.parameters())?;
        let lib = expression_lib(task);

        let plain = ExprContext::new(&params).with_expression_lib(lib.clone());
        let (resources, cores, ram_mib) = evaluate_resources(task, &plain, &ctx.config)?;
        let runtime = json!({
            "outdir": dir.root.display().to_string(),
            "tmpdir": dir.tmp.display().to_string(),
            "cores": cores,
            "ram": ram_mib,
        });

        let bound = bind_inputs(&task.process, &params, &runtime, &lib, &ctx.config, &task.log)?;
        task.set_parameters(bound.inputs.clone());

        let expressions = ExprContext::new(&bound.inputs)
            .with_runtime(runtime)
            .with_expression_lib(lib);

        let context = Self {
            task: Arc::clone(task),
            dir,
            bound,
            expressions,
            resources,
        };
        context.stage_initial_workdir()?;
        Ok(context)
    }

    async fn run_command(
        &self,
        ctx: &RunContext,
        tool: &CommandLineTool,
    ) -> CwlResult<IndexMap<String, Value>> {
        let shell_command = self.task.requirement("ShellCommandRequirement").is_some();
        let command = assemble(
            &self.task.process,
            tool,
            &self.bound.provided,
            &self.expressions,
            shell_command,
        )?;
        let prepared = self.prepare_tool(ctx, &command)?;
        self.task
            .log
            .info(format!("dispatching in {}: {}", prepared.image, prepared.shell_command()));

        let handle = ctx.dispatcher.dispatch(&prepared).await?;
        await_completion(
            ctx.dispatcher.as_ref(),
            &handle,
            &ctx.config,
            &ctx.cancel,
            &self.task.log,
        )
        .await?;
        self.task.log.info(format!("tool {} completed", handle.0));

        collect_tool_outputs(
            &self.task.process,
            &ToolOutputContext {
                workdir: &self.dir.root,
                stdout: command.stdout.as_deref(),
                stderr: command.stderr.as_deref(),
                expressions: &self.expressions,
                config: &ctx.config,
                log: &self.task.log,
            },
        )
    }

    /// The dispatcher's view of this invocation.
    pub fn prepare_tool(&self, ctx: &RunContext, command: &AssembledCommand) -> CwlResult<PreparedTool> {
        let image = match self.task.requirement("DockerRequirement") {
            Some(Requirement::Docker {
                docker_pull: Some(image),
            }) => image.clone(),
            _ => ctx.config.default_image.clone(),
        };

        let mut env = vec![
            EnvVar {
                name: "HOME".to_string(),
                value: self.dir.root.display().to_string(),
            },
            EnvVar {
                name: "TMPDIR".to_string(),
                value: self.dir.tmp.display().to_string(),
            },
        ];
        let mut extra: Vec<_> = ctx.config.env_vars.iter().collect();
        extra.sort();
        env.extend(extra.into_iter().map(|(name, value)| EnvVar {
            name: name.clone(),
            value: value.clone(),
        }));
        if let Some(Requirement::EnvVar { env_def }) = self.task.requirement("EnvVarRequirement") {
            for (name, value) in env_def {
                env.push(EnvVar {
                    name: name.clone(),
                    value: expr::evaluate_string(value, &self.expressions)?,
                });
            }
        }

        Ok(PreparedTool {
            task_id: self.task.path(),
            image,
            argv: command.argv.clone(),
            working_dir: self.dir.root.clone(),
            env,
            resources: self.resources.clone(),
            volumes: self.volumes(),
            stdin: command.stdin.clone(),
            stdout: command.stdout.clone(),
            stderr: command.stderr.clone(),
        })
    }

    /// The scratch directory (read-write) and read-only mounts for the
    /// directories input files live in.
    fn volumes(&self) -> Vec<Volume> {
        let mut directories = BTreeSet::new();
        for value in self.bound.inputs.values() {
            let mut value = value.clone();
            value.for_each_file_mut(&mut |file: &mut FileValue| {
                if !file.dirname.is_empty() {
                    directories.insert(PathBuf::from(&file.dirname));
                }
            });
        }
        let scratch = Volume {
            host_path: self.dir.tmp.clone(),
            container_path: self.dir.tmp.clone(),
            read_only: false,
        };
        std::iter::once(scratch)
            .chain(
                directories
                    .into_iter()
                    .filter(|d| {
                        d.is_absolute() && !d.starts_with(&self.dir.root) && !d.starts_with(&self.dir.tmp)
                    })
                    .map(|d| Volume {
                        host_path: d.clone(),
                        container_path: d,
                        read_only: true,
                    }),
            )
            .collect()
    }

    fn stage_initial_workdir(&self) -> CwlResult<()> {
        let Some(Requirement::InitialWorkDir { listing }) =
            self.task.requirement("InitialWorkDirRequirement")
        else {
            return Ok(());
        };

        for entry in listing {
            match entry {
                WorkDirEntry::Dirent {
                    entry, entryname, ..
                } => {
                    let content = expr::evaluate(entry, &self.expressions)?;
                    let name = entryname
                        .as_ref()
                        .map(|n| expr::evaluate_string(n, &self.expressions))
                        .transpose()?;
                    self.stage_dirent(content, name)?;
                }
                WorkDirEntry::Expression(expression) => {
                    let value = expr::evaluate(expression, &self.expressions)?;
                    self.stage_value(value)?;
                }
                WorkDirEntry::Literal(json) => self.stage_value(Value::from_json(json))?,
            }
        }
        Ok(())
    }

    fn stage_dirent(&self, content: Value, name: Option<String>) -> CwlResult<()> {
        match content {
            Value::File(file) => self.stage_file(&file, name.as_deref()),
            Value::Directory(_) => Err(CwlError::not_implemented(
                Component::ToolRunner,
                "staging a Directory through InitialWorkDirRequirement is not supported",
            )),
            other => {
                let name = name.ok_or_else(|| {
                    CwlError::binding(
                        Component::ToolRunner,
                        "InitialWorkDirRequirement entry with text content needs an entryname",
                    )
                })?;
                let text = match other {
                    Value::String(text) => text,
                    other => other.to_json().to_string(),
                };
                let target = self.staging_path(&name)?;
                self.task.log.info(format!("writing {}", name));
                write_file_atomic(target, text)
            }
        }
    }

    /// Path of an initial working directory entry; it must stay inside the
    /// working directory.
    fn staging_path(&self, name: &str) -> CwlResult<PathBuf> {
        let relative = Path::new(name);
        let escapes = name.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, PathComponent::Normal(_) | PathComponent::CurDir));
        if escapes {
            return Err(CwlError::binding(
                Component::ToolRunner,
                format!(
                    "InitialWorkDirRequirement entryname '{}' must be a relative path inside the working directory",
                    name
                ),
            ));
        }
        Ok(self.dir.join(relative))
    }

    fn stage_value(&self, value: Value) -> CwlResult<()> {
        match value {
            Value::Null => Ok(()),
            Value::File(file) => self.stage_file(&file, None),
            Value::Array(items) => items.into_iter().try_for_each(|item| self.stage_value(item)),
            Value::Directory(_) => Err(CwlError::not_implemented(
                Component::ToolRunner,
                "staging a Directory through InitialWorkDirRequirement is not supported",
            )),
            other => Err(CwlError::binding(
                Component::ToolRunner,
                format!(
                    "InitialWorkDirRequirement listing yielded {}, expected File entries",
                    other.type_name()
                ),
            )),
        }
    }

    fn stage_file(&self, file: &FileValue, name: Option<&str>) -> CwlResult<()> {
        let target = self.staging_path(name.unwrap_or(&file.basename))?;
        match &file.contents {
            Some(contents) if file.path.is_empty() => write_file_atomic(&target, contents),
            _ => copy_file(&file.path, &target).map(|_| ()),
        }?;
        self.task
            .log
            .info(format!("staged {} as {}", file.path, target.display()));
        Ok(())
    }
}

/// Resource request of a task and the `runtime.cores`/`runtime.ram` it
/// implies. Minimums fill in `runtime`; RAM is given in MiB.
fn evaluate_resources(
    task: &Task,
    context: &ExprContext,
    config: &crate::runtime::config::Config,
) -> CwlResult<(Resources, u64, u64)> {
    let Some(Requirement::Resource {
        cores_min,
        cores_max,
        ram_min,
        ram_max,
    }) = task.requirement("ResourceRequirement")
    else {
        return Ok((Resources::default(), config.default_cores, config.default_ram_mib));
    };

    let number = |value: &Option<JsonValue>| -> CwlResult<Option<f64>> {
        let Some(value) = value else {
            return Ok(None);
        };
        let evaluated = match value {
            JsonValue::String(expression) => expr::evaluate_json(expression, context)?,
            other => other.clone(),
        };
        match evaluated {
            JsonValue::Null => Ok(None),
            JsonValue::Number(n) => Ok(n.as_f64()),
            other => Err(CwlError::eval(
                Component::ToolRunner,
                format!("ResourceRequirement value must be a number, got {}", other),
            )),
        }
    };

    let cores_min = number(cores_min)?;
    let cores_max = number(cores_max)?;
    let ram_min = number(ram_min)?;
    let ram_max = number(ram_max)?;

    let resources = Resources {
        cpu_min: cores_min,
        cpu_max: cores_max,
        mem_min_bytes: ram_min.map(|m| (m * MIB as f64) as u64),
        mem_max_bytes: ram_max.map(|m| (m * MIB as f64) as u64),
    };
    let cores = cores_min
        .or(cores_max)
        .map(|c| c.ceil() as u64)
        .unwrap_or(config.default_cores);
    let ram = ram_min
        .or(ram_max)
        .map(|r| r.ceil() as u64)
        .unwrap_or(config.default_ram_mib);
    Ok((resources, cores, ram))
}
