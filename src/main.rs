//! flowy-cwl CLI
//!
//! Runs the `#main` process of a packed CWL document with a parameters file
//! and prints the result as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use flowy_cwl::runtime::{Config, Dispatcher, DockerDispatcher, Engine, LocalDispatcher};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "flowy-cwl")]
#[command(about = "Common Workflow Language (v1.0) engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a packed document
    Run {
        /// Packed CWL document (JSON, with a `$graph` containing `#main`)
        packed: PathBuf,

        /// Parameters of `#main` (JSON object)
        params: PathBuf,

        /// Parent directory of task working directories
        #[arg(short, long)]
        work_dir: Option<PathBuf>,

        /// Engine configuration (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Where tools run
        #[arg(short, long, value_enum, default_value_t = Executor::Local)]
        executor: Executor,

        /// Also write the task log tree to this file
        #[arg(long)]
        log_tree: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Executor {
    Local,
    Docker,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowy_cwl=info".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Run {
            packed,
            params,
            work_dir,
            config,
            executor,
            log_tree,
        } => run(packed, params, work_dir, config, executor, log_tree).await,
    }
}

async fn run(
    packed: PathBuf,
    params: PathBuf,
    work_dir: Option<PathBuf>,
    config_path: Option<PathBuf>,
    executor: Executor,
    log_tree: Option<PathBuf>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(work_dir) = work_dir {
        config = config.with_work_root(work_dir);
    }

    let dispatcher: Arc<dyn Dispatcher> = match executor {
        Executor::Local => Arc::new(LocalDispatcher::new()),
        Executor::Docker => Arc::new(DockerDispatcher::connect()?),
    };

    let packed = read_json(&packed)?;
    let params = read_json(&params)?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    let engine = Engine::new(config, dispatcher);
    let run = engine.run_with_cancellation(&packed, &params, cancel).await;

    if let Some(path) = log_tree {
        let text = serde_json::to_string_pretty(&run.log_tree())?;
        std::fs::write(&path, text)
            .with_context(|| format!("failed to write log tree to {}", path.display()))?;
    }

    println!("{}", serde_json::to_string_pretty(&run.result.to_json())?);
    if !run.result.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn read_json(path: &Path) -> Result<JsonValue> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}
