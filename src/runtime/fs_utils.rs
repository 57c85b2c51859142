//! File system utilities for runtime execution
//!
//! This module provides the file system operations tool execution needs:
//! working directory creation, staging, bounded reads for `loadContents` and
//! path helpers. Every failure carries the path it happened on.

use crate::error::{Component, CwlResult, IntoCwlError};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use uuid::Uuid;

static ESCAPED_NAME_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9.-]").expect("constant pattern"));

/// Create a directory and all parent directories if they don't exist
pub fn create_dir_all<P: AsRef<Path>>(path: P) -> CwlResult<()> {
    let path = path.as_ref();
    fs::create_dir_all(path).fs_context(Component::ToolRunner, path)
}

/// Copy a file from source to destination
pub fn copy_file<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> CwlResult<u64> {
    let from = from.as_ref();
    let to = to.as_ref();

    if let Some(parent) = to.parent() {
        create_dir_all(parent)?;
    }

    fs::copy(from, to).fs_context(Component::ToolRunner, from)
}

/// Write content to a file atomically
pub fn write_file_atomic<P: AsRef<Path>, C: AsRef<[u8]>>(path: P, contents: C) -> CwlResult<()> {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent).fs_context(Component::ToolRunner, parent)?;
    temp.write_all(contents.as_ref())
        .fs_context(Component::ToolRunner, temp.path())?;
    temp.persist(path)
        .map_err(|e| e.error)
        .fs_context(Component::ToolRunner, path)?;
    Ok(())
}

/// Read file contents as string
pub fn read_file_to_string<P: AsRef<Path>>(path: P) -> CwlResult<String> {
    let path = path.as_ref();
    fs::read_to_string(path).fs_context(Component::OutputCollector, path)
}

/// Read at most `limit` bytes of a file, decoding them as UTF-8 (lossily).
/// A shorter file is read completely.
pub fn read_prefix<P: AsRef<Path>>(path: P, limit: u64, component: Component) -> CwlResult<String> {
    let path = path.as_ref();
    let file = fs::File::open(path).fs_context(component, path)?;
    let mut buffer = Vec::new();
    file.take(limit)
        .read_to_end(&mut buffer)
        .fs_context(component, path)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Turn a task id into a single directory name: `#main/align` gives
/// `main_align`. `/` becomes `_` and every other character outside
/// `[A-Za-z0-9.-]` (including `_` itself) is percent-escaped, so distinct
/// ids never share a name.
pub fn sanitize_id(id: &str) -> String {
    ESCAPED_NAME_CHARS
        .replace_all(id.trim_start_matches('#'), |caps: &Captures| match &caps[0] {
            "/" => "_".to_string(),
            other => other.bytes().map(|b| format!("%{:02X}", b)).collect(),
        })
        .into_owned()
}

/// `path` made absolute against the current directory, without touching
/// the file system.
pub fn absolute_path<P: AsRef<Path>>(path: P) -> CwlResult<PathBuf> {
    let path = path.as_ref();
    std::path::absolute(path).fs_context(Component::Document, path)
}

/// Identifier of one engine run: UTC timestamp, process id and a random
/// suffix.
pub fn new_run_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "run_{}_{}_{}",
        Utc::now().format("%Y%m%dT%H%M%S"),
        std::process::id(),
        &suffix[..8]
    )
}

/// Make `path` absolute against `base` unless it already is.
pub fn resolve_against(base: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        base.join(candidate)
    }
}

/// Directory tree of one engine run
#[derive(Debug, Clone, PartialEq)]
pub struct RunDirectory {
    /// `<work_root>/<run_id>`
    pub root: PathBuf,
    /// Parent of the task working directories
    pub work: PathBuf,
    /// Parent of the task scratch directories
    pub temp: PathBuf,
}

impl RunDirectory {
    /// Create `<work_root>/<run_id>/{work,temp}`. A relative `work_root` is
    /// taken against the current directory.
    pub fn create<P: AsRef<Path>>(work_root: P, run_id: &str) -> CwlResult<Self> {
        let root = absolute_path(work_root)?.join(run_id);
        let work = root.join("work");
        let temp = root.join("temp");
        create_dir_all(&work)?;
        create_dir_all(&temp)?;
        Ok(Self { root, work, temp })
    }
}

/// Working directory of one tool invocation
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDirectory {
    /// Output directory the tool runs in (`runtime.outdir`)
    pub root: PathBuf,
    /// Scratch directory (`runtime.tmpdir`)
    pub tmp: PathBuf,
}

impl TaskDirectory {
    /// Create `work/<sanitized task path>/` and `temp/<sanitized task path>/`
    /// under the run directory; scratch files stay out of output globs.
    pub fn create(run: &RunDirectory, task_path: &str) -> CwlResult<Self> {
        let name = sanitize_id(task_path);
        let root = run.work.join(&name);
        let tmp = run.temp.join(&name);
        create_dir_all(&root)?;
        create_dir_all(&tmp)?;
        Ok(Self { root, tmp })
    }

    /// Path of a file inside the working directory
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.root.join(path)
    }
}
