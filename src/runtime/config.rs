//! Runtime configuration system
//!
//! This module provides configuration management for CWL workflow execution:
//! where task working directories live, how file locations are rewritten,
//! which image tools run in by default and how dispatched tools are polled.

use crate::error::{Component, CwlError, CwlResult, IntoCwlError};
use crate::runtime::fs_utils::absolute_path;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for workflow execution
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Parent of every per-task working directory
    pub work_root: PathBuf,

    /// Target of `COMMONS/<guid>` location rewrites
    pub commons_data_root: PathBuf,

    /// Target of `USER/<path>` location rewrites
    pub user_data_root: PathBuf,

    /// Image used when a tool has no `DockerRequirement`
    pub default_image: String,

    /// Delay before the first status poll of a dispatched tool
    pub poll_interval: Duration,

    /// Ceiling of the doubling poll back-off
    pub max_poll_interval: Duration,

    /// How long a dispatched tool may report `Unknown` before it is failed
    pub unknown_status_timeout: Duration,

    /// Upper bound on the run time of a single dispatched tool
    pub task_timeout: Duration,

    /// Bytes read into `contents` by `loadContents`
    pub load_contents_limit: u64,

    /// `runtime.cores` when no `ResourceRequirement` applies
    pub default_cores: u64,

    /// `runtime.ram` (MiB) when no `ResourceRequirement` applies
    pub default_ram_mib: u64,

    /// Extra environment passed to every dispatched tool
    pub env_vars: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            work_root: PathBuf::from("/data"),
            commons_data_root: PathBuf::from("/commons-data/data/by-guid"),
            user_data_root: PathBuf::from("/engine-workspace"),
            default_image: "ubuntu".to_string(),
            poll_interval: Duration::from_secs(1),
            max_poll_interval: Duration::from_secs(30),
            unknown_status_timeout: Duration::from_secs(600),
            task_timeout: Duration::from_secs(24 * 3600),
            load_contents_limit: 64 * 1024,
            default_cores: 1,
            default_ram_mib: 1024,
            env_vars: HashMap::new(),
        }
    }
}

/// On-disk form of [`Config`]; durations are given in seconds and every
/// field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    work_root: Option<PathBuf>,
    commons_data_root: Option<PathBuf>,
    user_data_root: Option<PathBuf>,
    default_image: Option<String>,
    poll_interval_secs: Option<f64>,
    max_poll_interval_secs: Option<f64>,
    unknown_status_timeout_secs: Option<f64>,
    task_timeout_secs: Option<f64>,
    load_contents_limit: Option<u64>,
    default_cores: Option<u64>,
    default_ram_mib: Option<u64>,
    #[serde(default)]
    env_vars: HashMap<String, String>,
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML configuration, filling unspecified fields with defaults
    pub fn from_toml_str(text: &str) -> CwlResult<Self> {
        let file: ConfigFile = toml::from_str(text).map_err(|e| {
            CwlError::parse(Component::Document, format!("invalid configuration: {}", e))
        })?;

        let mut config = Config::default();
        if let Some(v) = file.work_root {
            config.work_root = absolute_path(&v)?;
        }
        if let Some(v) = file.commons_data_root {
            config.commons_data_root = v;
        }
        if let Some(v) = file.user_data_root {
            config.user_data_root = v;
        }
        if let Some(v) = file.default_image {
            config.default_image = v;
        }
        if let Some(v) = file.poll_interval_secs {
            config.poll_interval = seconds(v)?;
        }
        if let Some(v) = file.max_poll_interval_secs {
            config.max_poll_interval = seconds(v)?;
        }
        if let Some(v) = file.unknown_status_timeout_secs {
            config.unknown_status_timeout = seconds(v)?;
        }
        if let Some(v) = file.task_timeout_secs {
            config.task_timeout = seconds(v)?;
        }
        if let Some(v) = file.load_contents_limit {
            config.load_contents_limit = v;
        }
        if let Some(v) = file.default_cores {
            config.default_cores = v;
        }
        if let Some(v) = file.default_ram_mib {
            config.default_ram_mib = v;
        }
        config.env_vars.extend(file.env_vars);

        config
            .validate()
            .map_err(|message| CwlError::parse(Component::Document, message))?;
        Ok(config)
    }

    /// Load a TOML configuration file
    pub fn load(path: &Path) -> CwlResult<Self> {
        let text = std::fs::read_to_string(path).fs_context(Component::Document, path)?;
        Self::from_toml_str(&text)
    }

    /// Set the parent of run directories. A relative path is taken against
    /// the current directory.
    pub fn with_work_root<P: Into<PathBuf>>(mut self, work_root: P) -> Self {
        self.work_root = absolute_or_given(work_root.into());
        self
    }

    /// Set the default tool image
    pub fn with_default_image(mut self, image: impl Into<String>) -> Self {
        self.default_image = image.into();
        self
    }

    /// Set the first poll delay and the back-off ceiling
    pub fn with_poll_intervals(mut self, first: Duration, max: Duration) -> Self {
        self.poll_interval = first;
        self.max_poll_interval = max;
        self
    }

    /// Set the bound on extended `Unknown` status
    pub fn with_unknown_status_timeout(mut self, timeout: Duration) -> Self {
        self.unknown_status_timeout = timeout;
        self
    }

    /// Set task timeout
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Add environment variable
    pub fn with_env_var<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval.is_zero() {
            return Err("poll_interval must be greater than 0".to_string());
        }

        if self.max_poll_interval < self.poll_interval {
            return Err("max_poll_interval must not be shorter than poll_interval".to_string());
        }

        if self.task_timeout.is_zero() {
            return Err("task_timeout must be greater than 0".to_string());
        }

        if self.default_image.trim().is_empty() {
            return Err("default_image must not be empty".to_string());
        }

        Ok(())
    }
}

// Run directories resolve relative roots again, so an unreadable current
// directory only surfaces there.
fn absolute_or_given(path: PathBuf) -> PathBuf {
    absolute_path(&path).unwrap_or(path)
}

fn seconds(value: f64) -> CwlResult<Duration> {
    Duration::try_from_secs_f64(value).map_err(|e| {
        CwlError::parse(Component::Document, format!("invalid duration {}: {}", value, e))
    })
}

/// Configuration builder for fluent API
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new configuration builder
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn work_root<P: Into<PathBuf>>(mut self, work_root: P) -> Self {
        self.config.work_root = absolute_or_given(work_root.into());
        self
    }

    pub fn commons_data_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.commons_data_root = root.into();
        self
    }

    pub fn user_data_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.config.user_data_root = root.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    pub fn max_poll_interval(mut self, interval: Duration) -> Self {
        self.config.max_poll_interval = interval;
        self
    }

    pub fn task_timeout(mut self, timeout: Duration) -> Self {
        self.config.task_timeout = timeout;
        self
    }

    pub fn env_var<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.config.env_vars.insert(key.into(), value.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<Config, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
