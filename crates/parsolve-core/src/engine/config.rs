use super::backend::process::WorkerCommand;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum ConfigError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(&'static str),

    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Unknown {kind} '{value}'")]
    UnknownVariant { kind: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Every task runs on the calling thread, one after another.
    Sequential,
    /// Tasks run on a pool of OS threads sharing the caller's memory.
    SharedThread,
    /// Every task runs in its own child process and talks to the caller over pipes.
    IsolatedProcess,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::Sequential,
        BackendKind::SharedThread,
        BackendKind::IsolatedProcess,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::SharedThread => "shared-thread",
            Self::IsolatedProcess => "isolated-process",
        }
    }

    /// Whether live workspaces can be handed to this backend's workers.
    pub fn shares_memory(self) -> bool {
        !matches!(self, Self::IsolatedProcess)
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sequential" | "serial" => Ok(Self::Sequential),
            "shared-thread" | "thread" | "threads" => Ok(Self::SharedThread),
            "isolated-process" | "process" | "processes" => Ok(Self::IsolatedProcess),
            _ => Err(ConfigError::UnknownVariant {
                kind: "backend",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorPolicy {
    /// Run everything and report per-task errors alongside successes.
    #[default]
    CollectAll,
    /// Stop scheduling after the first failed task.
    FailFast,
}

impl fmt::Display for ErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CollectAll => "collect-all",
            Self::FailFast => "fail-fast",
        })
    }
}

impl FromStr for ErrorPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "collect-all" | "collect" => Ok(Self::CollectAll),
            "fail-fast" | "fast" => Ok(Self::FailFast),
            _ => Err(ConfigError::UnknownVariant {
                kind: "error policy",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessOptions {
    /// Program spawned for each task. `None` re-runs the current executable as a worker.
    pub worker_command: Option<WorkerCommand>,
    /// Wall-clock limit per child process. Children that exceed it are killed.
    pub task_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchConfig {
    pub worker_count: NonZeroUsize,
    pub backend: BackendKind,
    pub on_error: ErrorPolicy,
    /// Turns on per-iteration solver messages and routes every progress event through
    /// one mutex so output from concurrent workers never interleaves.
    ///
    /// That mutex is a synchronization point all workers share. With the shared-thread
    /// backend a verbose batch spends part of its time queued on it and gets less
    /// parallel speedup; leave it off when measuring throughput.
    pub verbose: bool,
    pub process: ProcessOptions,
}

impl DispatchConfig {
    /// Same settings with a different backend, for running one batch several ways.
    pub fn with_backend(&self, backend: BackendKind) -> Self {
        Self {
            backend,
            ..self.clone()
        }
    }
}

#[derive(Default)]
pub struct DispatchConfigBuilder {
    worker_count: Option<usize>,
    backend: Option<BackendKind>,
    on_error: Option<ErrorPolicy>,
    verbose: Option<bool>,
    worker_command: Option<WorkerCommand>,
    task_timeout: Option<Duration>,
}

impl DispatchConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn worker_count(mut self, count: usize) -> Self {
        self.worker_count = Some(count);
        self
    }
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = Some(kind);
        self
    }
    pub fn on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }
    pub fn worker_command(mut self, command: WorkerCommand) -> Self {
        self.worker_command = Some(command);
        self
    }
    pub fn task_timeout(mut self, limit: Duration) -> Self {
        self.task_timeout = Some(limit);
        self
    }

    pub fn build(self) -> Result<DispatchConfig, ConfigError> {
        let count = self
            .worker_count
            .ok_or(ConfigError::MissingParameter("worker_count"))?;
        let worker_count =
            NonZeroUsize::new(count).ok_or_else(|| ConfigError::InvalidParameter {
                name: "worker_count",
                reason: "must be greater than zero".to_string(),
            })?;
        if self.task_timeout.is_some_and(|limit| limit.is_zero()) {
            return Err(ConfigError::InvalidParameter {
                name: "task_timeout",
                reason: "must be a positive duration".to_string(),
            });
        }

        Ok(DispatchConfig {
            worker_count,
            backend: self.backend.ok_or(ConfigError::MissingParameter("backend"))?,
            on_error: self.on_error.unwrap_or_default(),
            verbose: self.verbose.unwrap_or(false),
            process: ProcessOptions {
                worker_command: self.worker_command,
                task_timeout: self.task_timeout,
            },
        })
    }
}
