//! Tool runner tests
//!
//! These run single CommandLineTools and ExpressionTools end to end through
//! [`Engine`]: input binding, working directory staging, command assembly,
//! dispatch and output collection. Most tools run as real host processes via
//! [`LocalDispatcher`]; a scripted [`MockDispatcher`] stands in where the
//! test needs to inspect the prepared tool or control its status.

use crate::error::{CwlResult, ErrorKind};
use crate::runtime::config::Config;
use crate::runtime::dispatch::{
    DispatchHandle, DispatchStatus, Dispatcher, LocalDispatcher, PreparedTool, Resources,
    StatusPoller,
};
use crate::runtime::task::LogLevel;
use crate::runtime::{Engine, Run, RunResult};
use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

type Behaviour = dyn Fn(&PreparedTool) -> DispatchStatus + Send + Sync;

/// Dispatcher that records every prepared tool and answers status polls with
/// whatever its behaviour returned at dispatch time. The behaviour may write
/// files into the working directory to play the tool.
pub(super) struct MockDispatcher {
    behaviour: Box<Behaviour>,
    dispatched: Mutex<Vec<PreparedTool>>,
    statuses: Mutex<HashMap<String, DispatchStatus>>,
    cancelled: Mutex<Vec<String>>,
}

impl MockDispatcher {
    pub(super) fn new<F>(behaviour: F) -> Self
    where
        F: Fn(&PreparedTool) -> DispatchStatus + Send + Sync + 'static,
    {
        Self {
            behaviour: Box::new(behaviour),
            dispatched: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Completes every tool without doing anything.
    pub(super) fn completing() -> Self {
        Self::new(|_| DispatchStatus::Completed)
    }

    pub(super) fn dispatched(&self) -> Vec<PreparedTool> {
        self.dispatched.lock().unwrap().clone()
    }

    pub(super) fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusPoller for MockDispatcher {
    async fn status(&self, handle: &DispatchHandle) -> CwlResult<DispatchStatus> {
        Ok(self
            .statuses
            .lock()
            .unwrap()
            .get(&handle.0)
            .cloned()
            .unwrap_or(DispatchStatus::Unknown))
    }
}

#[async_trait]
impl Dispatcher for MockDispatcher {
    async fn dispatch(&self, tool: &PreparedTool) -> CwlResult<DispatchHandle> {
        let status = (self.behaviour)(tool);
        let mut dispatched = self.dispatched.lock().unwrap();
        dispatched.push(tool.clone());
        let handle = format!("mock-{}", dispatched.len());
        self.statuses.lock().unwrap().insert(handle.clone(), status);
        Ok(DispatchHandle(handle))
    }

    async fn cancel(&self, handle: &DispatchHandle) -> CwlResult<()> {
        self.cancelled.lock().unwrap().push(handle.0.clone());
        Ok(())
    }
}

/// Scratch directory and a fast-polling configuration for one test
pub(super) struct EngineFixture {
    temp_dir: TempDir,
    config: Config,
}

impl EngineFixture {
    pub(super) fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::default()
            .with_work_root(temp_dir.path().join("work"))
            .with_poll_intervals(Duration::from_millis(5), Duration::from_millis(40));
        Self { temp_dir, config }
    }

    pub(super) fn config(&self) -> Config {
        self.config.clone()
    }

    pub(super) fn with_config(mut self, edit: impl FnOnce(Config) -> Config) -> Self {
        self.config = edit(self.config);
        self
    }

    pub(super) fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp_dir.path().join("inputs").join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    /// Run `graph` on host processes.
    pub(super) async fn run(&self, graph: JsonValue, params: JsonValue) -> Run {
        self.run_with(Arc::new(LocalDispatcher::new()), graph, params)
            .await
    }

    pub(super) async fn run_with(
        &self,
        dispatcher: Arc<dyn Dispatcher>,
        graph: JsonValue,
        params: JsonValue,
    ) -> Run {
        Engine::new(self.config(), dispatcher)
            .run(&packed(graph), &params)
            .await
    }
}

pub(super) fn packed(graph: JsonValue) -> JsonValue {
    json!({"cwlVersion": "v1.0", "$graph": graph})
}

pub(super) fn outputs(run: &Run) -> &JsonValue {
    match &run.result {
        RunResult::Succeeded(outputs) => outputs,
        RunResult::Failed { kind, message, .. } => panic!("run failed: {}: {}", kind, message),
    }
}

pub(super) fn failure_kind(run: &Run) -> ErrorKind {
    match &run.result {
        RunResult::Failed { kind, .. } => *kind,
        RunResult::Succeeded(outputs) => panic!("run unexpectedly succeeded: {}", outputs),
    }
}

fn echo_tool() -> JsonValue {
    json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["echo"],
        "inputs": {"msg": {"type": "string", "inputBinding": {"position": 1}}},
        "stdout": "out.txt",
        "outputs": {
            "out": {"type": "File", "outputBinding": {"glob": "out.txt", "loadContents": true}}
        }
    })
}

#[tokio::test]
async fn test_echo_to_stdout() {
    let fixture = EngineFixture::new();
    let run = fixture.run(json!([echo_tool()]), json!({"msg": "hello"})).await;

    let out = &outputs(&run)["#main/out"];
    assert_eq!(out["class"], json!("File"));
    assert_eq!(out["contents"], json!("hello\n"));
    assert_eq!(out["basename"], json!("out.txt"));
    assert_eq!(out["size"], json!(6));
    let location = out["location"].as_str().unwrap();
    assert!(Path::new(location).is_absolute());
    assert!(location.starts_with(fixture.config().work_root.to_str().unwrap()));
}

#[tokio::test]
async fn test_repeated_runs_get_fresh_directories() {
    let fixture = EngineFixture::new();
    let first = fixture.run(json!([echo_tool()]), json!({"msg": "hello"})).await;
    let second = fixture.run(json!([echo_tool()]), json!({"msg": "hello"})).await;

    assert_eq!(outputs(&first)["#main/out"]["contents"], json!("hello\n"));
    assert_eq!(outputs(&second)["#main/out"]["contents"], json!("hello\n"));

    let first_dir = first.directory.as_ref().unwrap();
    let second_dir = second.directory.as_ref().unwrap();
    assert_ne!(first_dir.root, second_dir.root);
    assert!(first_dir.root.starts_with(&fixture.config().work_root));
    assert_ne!(
        outputs(&first)["#main/out"]["location"],
        outputs(&second)["#main/out"]["location"]
    );
}

#[tokio::test]
async fn test_relative_work_root_gives_absolute_locations() {
    let fixture = EngineFixture::new();
    let config = fixture.config();
    // A path relative to the current directory that resolves inside the
    // fixture's scratch directory.
    let cwd = std::env::current_dir().unwrap();
    let relative = relative_to(&config.work_root, &cwd);
    assert!(relative.is_relative());
    let fixture = fixture.with_config(|c| c.with_work_root(&relative));

    let run = fixture.run(json!([echo_tool()]), json!({"msg": "hi"})).await;
    let out = &outputs(&run)["#main/out"];
    assert!(Path::new(out["location"].as_str().unwrap()).is_absolute());
    assert!(run.directory.unwrap().root.is_absolute());
}

/// `path` expressed relative to `base` with `..` steps.
fn relative_to(path: &Path, base: &Path) -> PathBuf {
    let base: Vec<_> = base.components().collect();
    let path: Vec<_> = path.components().collect();
    let shared = base
        .iter()
        .zip(path.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut relative = PathBuf::new();
    for _ in shared..base.len() {
        relative.push("..");
    }
    for component in &path[shared..] {
        relative.push(component.as_os_str());
    }
    relative
}

#[tokio::test]
async fn test_missing_input_is_binding_error() {
    let fixture = EngineFixture::new();
    let run = fixture.run(json!([echo_tool()]), json!({})).await;
    assert_eq!(failure_kind(&run), ErrorKind::BindingError);

    let run = fixture.run(json!([echo_tool()]), json!({"msg": 42})).await;
    assert_eq!(failure_kind(&run), ErrorKind::BindingError);
}

#[tokio::test]
async fn test_secondary_files_by_suffix() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["touch"],
        "arguments": ["a.bam", "a.bam.bai", "b.bam"],
        "inputs": {},
        "outputs": {
            "indexed": {
                "type": "File",
                "secondaryFiles": [".bai"],
                "outputBinding": {"glob": "a*.bam"}
            },
            "plain": {
                "type": "File",
                "secondaryFiles": [".bai"],
                "outputBinding": {"glob": "b*.bam"}
            }
        }
    });
    let run = fixture.run(json!([tool]), json!({})).await;
    let result = outputs(&run);

    let indexed = &result["#main/indexed"];
    assert_eq!(indexed["basename"], json!("a.bam"));
    assert_eq!(indexed["secondaryFiles"][0]["basename"], json!("a.bam.bai"));

    let plain = &result["#main/plain"];
    assert_eq!(plain["basename"], json!("b.bam"));
    let secondary = plain
        .get("secondaryFiles")
        .and_then(JsonValue::as_array)
        .map(Vec::len)
        .unwrap_or(0);
    assert_eq!(secondary, 0);

    let root = run.root.as_ref().unwrap();
    assert!(root
        .log
        .events()
        .iter()
        .any(|e| e.level == LogLevel::Warn && e.message.contains("b.bam.bai")));
}

#[tokio::test]
async fn test_glob_without_match_is_output_error() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["true"],
        "inputs": {},
        "outputs": {"f": {"type": "File", "outputBinding": {"glob": "missing.txt"}}}
    });
    let run = fixture.run(json!([tool]), json!({})).await;
    assert_eq!(failure_kind(&run), ErrorKind::OutputError);
    match &run.result {
        RunResult::Failed { task_id, .. } => assert_eq!(task_id.as_deref(), Some("#main")),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_optional_output_without_match_is_null() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["true"],
        "inputs": {},
        "outputs": {"f": {"type": "File?", "outputBinding": {"glob": "missing.txt"}}}
    });
    let run = fixture.run(json!([tool]), json!({})).await;
    assert_eq!(outputs(&run)["#main/f"], JsonValue::Null);
}

#[tokio::test]
async fn test_failing_tool_is_dispatch_error() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["false"],
        "inputs": {},
        "outputs": {}
    });
    let run = fixture.run(json!([tool]), json!({})).await;
    assert_eq!(failure_kind(&run), ErrorKind::DispatchError);
    match &run.result {
        RunResult::Failed { message, .. } => assert!(message.contains("exit code 1")),
        _ => unreachable!(),
    }
}

#[tokio::test]
async fn test_prepared_tool_carries_requirements() {
    let fixture = EngineFixture::new().with_config(|c| c.with_env_var("SITE", "lab"));
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "requirements": [
            {"class": "DockerRequirement", "dockerPull": "alpine:3.19"},
            {"class": "EnvVarRequirement", "envDef": {"GREETING": "$(inputs.msg)"}},
            {"class": "ResourceRequirement", "coresMin": 2, "ramMin": 512}
        ],
        "baseCommand": ["run-it"],
        "arguments": ["$(runtime.cores)", "$(runtime.ram)"],
        "inputs": {"msg": {"type": "string", "inputBinding": {"position": 1, "prefix": "-m"}}},
        "outputs": {}
    });
    let mock = Arc::new(MockDispatcher::completing());
    let run = fixture
        .run_with(mock.clone(), json!([tool]), json!({"msg": "hi there"}))
        .await;
    assert!(run.result.is_success());

    let dispatched = mock.dispatched();
    assert_eq!(dispatched.len(), 1);
    let prepared = &dispatched[0];
    assert_eq!(prepared.image, "alpine:3.19");
    assert_eq!(
        prepared.argv,
        vec!["\"run-it\"", "\"2\"", "\"512\"", "\"-m\"", "\"hi there\""]
    );
    assert_eq!(prepared.resources.cpu_min, Some(2.0));
    assert_eq!(prepared.resources.mem_min_bytes, Some(512 * 1024 * 1024));
    assert!(prepared.working_dir.starts_with(&fixture.config().work_root));

    let env: HashMap<_, _> = prepared
        .env
        .iter()
        .map(|v| (v.name.as_str(), v.value.as_str()))
        .collect();
    assert_eq!(env["GREETING"], "hi there");
    assert_eq!(env["SITE"], "lab");
    assert_eq!(env["HOME"], prepared.working_dir.display().to_string());

    let scratch = &prepared.volumes[0];
    assert_eq!(scratch.host_path.display().to_string(), env["TMPDIR"]);
    assert_eq!(scratch.container_path, scratch.host_path);
    assert!(!scratch.read_only);
    assert!(!scratch.host_path.starts_with(&prepared.working_dir));
}

#[tokio::test]
async fn test_default_image_and_runtime() {
    let fixture = EngineFixture::new().with_config(|c| c.with_default_image("debian:stable"));
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["report"],
        "arguments": ["$(runtime.cores)", "$(runtime.outdir)"],
        "inputs": {},
        "outputs": {}
    });
    let mock = Arc::new(MockDispatcher::completing());
    let run = fixture.run_with(mock.clone(), json!([tool]), json!({})).await;
    assert!(run.result.is_success());

    let prepared = &mock.dispatched()[0];
    assert_eq!(prepared.image, "debian:stable");
    assert_eq!(prepared.argv[1], "\"1\"");
    assert_eq!(
        prepared.argv[2],
        format!("\"{}\"", prepared.working_dir.display())
    );
    assert_eq!(prepared.resources, Resources::default());
}

#[tokio::test]
async fn test_mock_tool_outputs_are_collected() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["count"],
        "inputs": {},
        "outputs": {
            "n": {
                "type": "int",
                "outputBinding": {"glob": "n.txt", "loadContents": true, "outputEval": "$(parseInt(self[0].contents))"}
            }
        }
    });
    let mock = Arc::new(MockDispatcher::new(|tool: &PreparedTool| {
        fs::write(tool.working_dir.join("n.txt"), "41\n").unwrap();
        DispatchStatus::Completed
    }));
    let run = fixture.run_with(mock, json!([tool]), json!({})).await;
    assert_eq!(outputs(&run)["#main/n"], json!(41));
}

#[tokio::test]
async fn test_cwl_output_json_takes_priority() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["report"],
        "inputs": {},
        "outputs": {
            "n": {"type": "int", "outputBinding": {"glob": "never.txt"}},
            "f": "File"
        }
    });
    let mock = Arc::new(MockDispatcher::new(|tool: &PreparedTool| {
        fs::write(tool.working_dir.join("data.txt"), "x").unwrap();
        fs::write(
            tool.working_dir.join("cwl.output.json"),
            r#"{"n": 3, "f": {"class": "File", "location": "data.txt"}}"#,
        )
        .unwrap();
        DispatchStatus::Completed
    }));
    let run = fixture.run_with(mock, json!([tool]), json!({})).await;
    let result = outputs(&run);
    assert_eq!(result["#main/n"], json!(3));
    assert_eq!(result["#main/f"]["basename"], json!("data.txt"));
    assert_eq!(result["#main/f"]["size"], json!(1));
    assert!(Path::new(result["#main/f"]["path"].as_str().unwrap()).is_absolute());
}

#[tokio::test]
async fn test_initial_workdir_staging() {
    let fixture = EngineFixture::new();
    let data = fixture.create_file("data.txt", "payload\n");
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "requirements": [{
            "class": "InitialWorkDirRequirement",
            "listing": [
                {"entryname": "config.txt", "entry": "threads=$(inputs.n)\n"},
                "$(inputs.src)"
            ]
        }],
        "baseCommand": ["cat", "config.txt", "data.txt"],
        "inputs": {"src": "File", "n": "int"},
        "stdout": "out.txt",
        "outputs": {
            "out": {"type": "File", "outputBinding": {"glob": "out.txt", "loadContents": true}}
        }
    });
    let params = json!({
        "src": {"class": "File", "location": data.display().to_string()},
        "n": 4
    });
    let run = fixture.run(json!([tool]), params).await;
    assert_eq!(outputs(&run)["#main/out"]["contents"], json!("threads=4\npayload\n"));
}

#[tokio::test]
async fn test_initial_workdir_directory_not_implemented() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "requirements": [{
            "class": "InitialWorkDirRequirement",
            "listing": ["$(inputs.dir)"]
        }],
        "baseCommand": ["true"],
        "inputs": {"dir": "Directory"},
        "outputs": {}
    });
    let params = json!({"dir": {"class": "Directory", "location": "/tmp"}});
    let mock = Arc::new(MockDispatcher::completing());
    let run = fixture.run_with(mock.clone(), json!([tool]), params).await;
    assert_eq!(failure_kind(&run), ErrorKind::NotImplemented);
    assert!(mock.dispatched().is_empty());
}

#[tokio::test]
async fn test_initial_workdir_entryname_must_stay_inside() {
    let fixture = EngineFixture::new();
    for entryname in ["../escaped.txt", "/tmp/escaped.txt", "nested/../../escaped.txt"] {
        let tool = json!({
            "id": "#main",
            "class": "CommandLineTool",
            "requirements": [{
                "class": "InitialWorkDirRequirement",
                "listing": [{"entryname": entryname, "entry": "payload"}]
            }],
            "baseCommand": ["true"],
            "inputs": {},
            "outputs": {}
        });
        let mock = Arc::new(MockDispatcher::completing());
        let run = fixture.run_with(mock.clone(), json!([tool]), json!({})).await;
        assert_eq!(failure_kind(&run), ErrorKind::BindingError, "{}", entryname);
        assert!(mock.dispatched().is_empty());
        let dir = run.directory.as_ref().unwrap();
        assert!(!dir.work.join("escaped.txt").exists());
        assert!(!dir.root.join("escaped.txt").exists());
    }

    assert!(!fixture.config().work_root.join("escaped.txt").exists());
}

#[tokio::test]
async fn test_initial_workdir_nested_entryname() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "requirements": [{
            "class": "InitialWorkDirRequirement",
            "listing": [{"entryname": "conf/./app.txt", "entry": "on\n"}]
        }],
        "baseCommand": ["cat", "conf/app.txt"],
        "inputs": {},
        "stdout": "out.txt",
        "outputs": {
            "out": {"type": "File", "outputBinding": {"glob": "out.txt", "loadContents": true}}
        }
    });
    let run = fixture.run(json!([tool]), json!({})).await;
    assert_eq!(outputs(&run)["#main/out"]["contents"], json!("on\n"));
}

#[tokio::test]
async fn test_stdin_and_generated_stdout() {
    let fixture = EngineFixture::new();
    let text = fixture.create_file("lines.txt", "one\ntwo\n");
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["cat"],
        "stdin": "$(inputs.text.path)",
        "inputs": {"text": "File"},
        "outputs": {"copied": "stdout"}
    });
    let params = json!({"text": {"class": "File", "location": text.display().to_string()}});
    let run = fixture.run(json!([tool]), params).await;

    let copied = &outputs(&run)["#main/copied"];
    assert_eq!(copied["basename"], json!("main.stdout"));
    let path = copied["path"].as_str().unwrap();
    assert_eq!(fs::read_to_string(path).unwrap(), "one\ntwo\n");
}

#[tokio::test]
async fn test_expression_tool_returns_file_unchanged() {
    let fixture = EngineFixture::new();
    let data = fixture.create_file("sample.bam", "bam");
    let tool = json!({
        "id": "#main",
        "class": "ExpressionTool",
        "requirements": [{"class": "InlineJavascriptRequirement"}],
        "expression": "${ return {\"same\": inputs.f}; }",
        "inputs": {"f": "File"},
        "outputs": {"same": "File"}
    });
    let params = json!({"f": {"class": "File", "location": data.display().to_string()}});
    let run = fixture.run(json!([tool]), params).await;

    let root = run.root.as_ref().unwrap();
    let bound = root.parameters()["f"].to_json();
    assert_eq!(outputs(&run)["#main/same"], bound);
    assert_eq!(bound["nameroot"], json!("sample"));
}

#[tokio::test]
async fn test_expression_tool_missing_output() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "ExpressionTool",
        "expression": "${ return {}; }",
        "inputs": {},
        "outputs": {"required": "int", "optional": "int?"}
    });
    let run = fixture.run(json!([tool]), json!({})).await;
    assert_eq!(failure_kind(&run), ErrorKind::OutputError);
}

#[tokio::test]
async fn test_cancellation_stops_dispatched_tool() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["sleep", "600"],
        "inputs": {},
        "outputs": {}
    });
    let mock = Arc::new(MockDispatcher::new(|_| DispatchStatus::Running));
    let engine = Engine::new(fixture.config(), mock.clone());
    let graph = packed(json!([tool]));
    let params = json!({});

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    let (run, _) = tokio::join!(
        engine.run_with_cancellation(&graph, &params, cancel),
        async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            trigger.cancel();
        }
    );

    assert_eq!(failure_kind(&run), ErrorKind::CancelledError);
    assert_eq!(mock.cancelled(), vec!["mock-1".to_string()]);
    assert!(run.root.as_ref().unwrap().is_done());
}

#[tokio::test]
async fn test_unknown_status_times_out() {
    let fixture = EngineFixture::new()
        .with_config(|c| c.with_unknown_status_timeout(Duration::from_millis(50)));
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["lost"],
        "inputs": {},
        "outputs": {}
    });
    let mock = Arc::new(MockDispatcher::new(|_| DispatchStatus::Unknown));
    let run = fixture.run_with(mock, json!([tool]), json!({})).await;
    assert_eq!(failure_kind(&run), ErrorKind::DispatchError);
}

#[tokio::test]
async fn test_assembly_is_deterministic() {
    let fixture = EngineFixture::new();
    let tool = json!({
        "id": "#main",
        "class": "CommandLineTool",
        "baseCommand": ["tool"],
        "arguments": [{"valueFrom": "--fast", "position": 2}],
        "inputs": {
            "b": {"type": "int", "inputBinding": {"position": 1}},
            "a": {"type": "string[]", "inputBinding": {"position": 1, "prefix": "-i"}}
        },
        "outputs": {}
    });
    let params = json!({"a": ["x", "y"], "b": 3});

    let mut argvs = Vec::new();
    for _ in 0..2 {
        let mock = Arc::new(MockDispatcher::completing());
        let run = fixture
            .run_with(mock.clone(), json!([tool.clone()]), params.clone())
            .await;
        assert!(run.result.is_success());
        argvs.push(mock.dispatched()[0].argv.clone());
    }
    assert_eq!(argvs[0], argvs[1]);
    assert_eq!(
        argvs[0],
        vec!["\"tool\"", "\"-i\"", "\"x\"", "\"y\"", "\"3\"", "\"--fast\""]
    );
}
